//! # Pull Coordinator
//!
//! **Nothing is granted without being paid for, and nothing is paid for
//! without being granted.**
//!
//! The single entry point for pulls. One call charges the cost, resolves the
//! batch, credits the rewards, advances pity and writes the audit trail, and
//! all of it lands in one store commit.
//!
//! ## The Pull Path
//!
//! ```text
//! execute_pull(player, table, count)
//!        │
//!        ├── load table, check active + count          (no lock)
//!        │
//!        ├── acquire player lock (timeout -> ConcurrentModification)
//!        │      │
//!        │      ├── read account + pity               PlayerStore::read
//!        │      ├── plan + apply charge               (working copy)
//!        │      ├── resolve N attempts                PullResolver
//!        │      ├── credit rewards                    (working copy)
//!        │      └── commit account + pity + records   PlayerStore::commit
//!        │
//!        └── release player lock
//! ```
//!
//! Any failure before the commit drops the working copy, so a failed pull
//! leaves no trace: the cost is never taken and no counter moves.
//!
//! ## Thread Safety
//!
//! `PullCoordinator` is `Send + Sync`. Pulls of one player are serialized by a
//! per-player lock; pulls of different players only meet inside the store's
//! short commit section.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::account::{apply_charge, plan_charge, ChargePlan, PlayerId};
use crate::audit::{PullRecord, RecordedReward};
use crate::catalog::CatalogRewards;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{GachaError, GachaResult};
use crate::pity::PityLedger;
use crate::repository::LootTableRepository;
use crate::resolver::{PullResolver, ResolvedBatch};
use crate::rng::{RandomSource, SecureRandom, SeededRandom};
use crate::selection::ResolvedReward;
use crate::store::{PlayerStore, PullCommit};
use crate::table::{Cost, EntryId, LootTable, Rarity, Reward, TableId};

/// A reward as returned to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct GrantedReward {
    /// Entry that won.
    pub entry_id: EntryId,
    /// What was granted.
    pub reward: Reward,
    /// How many.
    pub quantity: u32,
    /// The reward carried a rate-up.
    pub featured: bool,
    /// Catalog name, for item rewards the catalog knows.
    pub display_name: Option<String>,
}

/// One attempt of a committed batch.
#[derive(Clone, Debug, PartialEq)]
pub struct AttemptOutcome {
    /// Rewards of this attempt.
    pub rewards: Vec<GrantedReward>,
    /// A guarantee produced the result.
    pub was_guaranteed: bool,
    /// Pity threshold that fired, if any.
    pub triggered_threshold_rarity: Option<Rarity>,
    /// Awarded rarity on rarity-tiered tables.
    pub rarity: Option<Rarity>,
    /// 1-based ordinal for the (player, table) pair.
    pub pull_number: u64,
}

/// Result of a committed pull request.
#[derive(Clone, Debug, PartialEq)]
pub struct PullBatchResult {
    /// Who pulled.
    pub player_id: PlayerId,
    /// Which table.
    pub table_id: TableId,
    /// One entry per attempt, in order.
    pub results: Vec<AttemptOutcome>,
    /// Attempts produced by a guarantee.
    pub guaranteed_count: u32,
    /// Featured rewards across the batch.
    pub featured_count: u32,
    /// How the batch was paid for.
    pub charge: ChargePlan,
    /// Seed of a verifiable pull.
    pub seed: Option<String>,
}

/// Serializes, charges, resolves and commits pulls.
pub struct PullCoordinator {
    config: EngineConfig,
    repository: Arc<dyn LootTableRepository>,
    store: Arc<dyn PlayerStore>,
    catalog: Arc<dyn CatalogRewards>,
    clock: Arc<dyn Clock>,
    player_locks: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for PullCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullCoordinator")
            .field("config", &self.config)
            .field("locked_players", &self.player_locks.lock().len())
            .finish_non_exhaustive()
    }
}

impl PullCoordinator {
    /// Wires the coordinator to its collaborators.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn LootTableRepository>,
        store: Arc<dyn PlayerStore>,
        catalog: Arc<dyn CatalogRewards>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            repository,
            store,
            catalog,
            clock,
            player_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pulls `count` times with unpredictable draws.
    ///
    /// `cost_override` replaces the table's per-pull price for this request.
    ///
    /// # Errors
    ///
    /// - `TableNotFound` / `TableInactive` / `InvalidPullCount`
    /// - `InsufficientFunds` when the player cannot pay
    /// - `EmptyPool` when the table cannot award anything
    /// - `ConcurrentModification` when another pull of the player is in flight
    /// - `InventoryFull`, `ArithmeticOverflow`, `Storage`
    ///
    /// On any error nothing is charged, credited or recorded.
    pub fn execute_pull(
        &self,
        player_id: PlayerId,
        table_id: TableId,
        count: u32,
        cost_override: Option<Cost>,
    ) -> GachaResult<PullBatchResult> {
        let mut rng = SecureRandom::from_entropy();
        self.execute_with(player_id, table_id, count, cost_override, &mut rng)
    }

    /// Pulls `count` times with draws derived from `seed`.
    ///
    /// The seed is written to every audit record so the batch can be
    /// re-run and checked later.
    ///
    /// # Errors
    ///
    /// Same as [`execute_pull`](Self::execute_pull).
    pub fn execute_seeded_pull(
        &self,
        player_id: PlayerId,
        table_id: TableId,
        count: u32,
        seed: impl Into<String>,
        cost_override: Option<Cost>,
    ) -> GachaResult<PullBatchResult> {
        let mut rng = SeededRandom::new(seed);
        self.execute_with(player_id, table_id, count, cost_override, &mut rng)
    }

    /// Pulls with a caller-supplied random source.
    ///
    /// # Errors
    ///
    /// Same as [`execute_pull`](Self::execute_pull).
    pub fn execute_with<R: RandomSource + ?Sized>(
        &self,
        player_id: PlayerId,
        table_id: TableId,
        count: u32,
        cost_override: Option<Cost>,
        rng: &mut R,
    ) -> GachaResult<PullBatchResult> {
        let table = self.repository.load(table_id)?;
        if !table.active {
            return Err(GachaError::TableInactive(table_id));
        }
        let max = table
            .max_pulls_per_batch
            .unwrap_or(self.config.max_pulls_per_batch);
        if count == 0 || count > max {
            return Err(GachaError::InvalidPullCount {
                requested: count,
                max,
            });
        }
        let cost = cost_override.unwrap_or(table.cost);

        let lock = self.player_lock(player_id);
        let result = match lock.try_lock_for(self.config.lock_timeout()) {
            Some(_guard) => self.pull_locked(player_id, &table, count, &cost, rng),
            None => {
                tracing::warn!(
                    player_id,
                    table_id,
                    timeout_ms = self.config.lock_timeout_ms,
                    "player lock timed out"
                );
                Err(GachaError::ConcurrentModification { player_id })
            }
        };
        self.release_player_lock(player_id, lock);

        if let Err(e) = &result {
            tracing::debug!(player_id, table_id, count, error = %e, "pull aborted");
        }
        result
    }

    /// The commit phase. Runs with the player lock held.
    fn pull_locked<R: RandomSource + ?Sized>(
        &self,
        player_id: PlayerId,
        table: &LootTable,
        count: u32,
        cost: &Cost,
        rng: &mut R,
    ) -> GachaResult<PullBatchResult> {
        let view = self.store.read(player_id, table.id)?;
        let mut account = view.account;
        let mut pity = view
            .pity
            .unwrap_or_else(|| PityLedger::initialize(player_id, table));
        pity.ensure_thresholds(table);
        let first_pull = pity.total_pulls + 1;

        let charge = plan_charge(cost, count, &account)?;
        apply_charge(&mut account, cost, &charge)?;

        let batch = PullResolver::new(table)
            .resolve(rng, &mut pity, count)
            .map_err(|e| {
                if matches!(e, GachaError::EmptyPool(_)) {
                    tracing::warn!(player_id, table_id = table.id, "empty pool, pull refunded");
                }
                e
            })?;

        for resolved in &batch.attempts {
            for reward in &resolved.attempt.rewards {
                account.grant(&reward.reward, reward.quantity, self.max_stack(&reward.reward))?;
            }
        }

        let now = self.clock.now();
        pity.touch(now);
        let seed = rng.seed().map(str::to_owned);
        let records = build_records(player_id, table.id, &batch, first_pull, now, seed.as_deref());

        self.store.commit(PullCommit {
            expected_version: view.version,
            account,
            pity,
            records,
        })?;

        tracing::info!(
            player_id,
            table_id = table.id,
            count,
            guaranteed = batch.guaranteed_count,
            featured = batch.featured_count,
            currency_spent = charge.currency_spent,
            tickets_spent = charge.tickets_spent,
            seeded = seed.is_some(),
            "pull committed"
        );

        Ok(self.to_result(player_id, table.id, batch, first_pull, charge, seed))
    }

    fn max_stack(&self, reward: &Reward) -> u32 {
        reward
            .item_id()
            .and_then(|id| self.catalog.resolve(id))
            .map_or(self.config.default_max_stack, |d| d.max_stack)
    }

    fn to_result(
        &self,
        player_id: PlayerId,
        table_id: TableId,
        batch: ResolvedBatch,
        first_pull: u64,
        charge: ChargePlan,
        seed: Option<String>,
    ) -> PullBatchResult {
        let results = batch
            .attempts
            .into_iter()
            .zip(first_pull..)
            .map(|(resolved, pull_number)| AttemptOutcome {
                rewards: resolved
                    .attempt
                    .rewards
                    .into_iter()
                    .map(|r| self.granted(r))
                    .collect(),
                was_guaranteed: resolved.attempt.was_guaranteed,
                triggered_threshold_rarity: resolved.attempt.triggered_threshold_rarity,
                rarity: resolved.attempt.rarity,
                pull_number,
            })
            .collect();

        PullBatchResult {
            player_id,
            table_id,
            results,
            guaranteed_count: batch.guaranteed_count,
            featured_count: batch.featured_count,
            charge,
            seed,
        }
    }

    fn granted(&self, reward: ResolvedReward) -> GrantedReward {
        let display_name = reward
            .reward
            .item_id()
            .and_then(|id| self.catalog.resolve(id))
            .map(|d| d.name);
        GrantedReward {
            entry_id: reward.entry_id,
            reward: reward.reward,
            quantity: reward.quantity,
            featured: reward.featured,
            display_name,
        }
    }

    fn player_lock(&self, player_id: PlayerId) -> Arc<Mutex<()>> {
        Arc::clone(self.player_locks.lock().entry(player_id).or_default())
    }

    /// Drops the caller's handle and forgets the lock once nobody else holds it.
    fn release_player_lock(&self, player_id: PlayerId, lock: Arc<Mutex<()>>) {
        let mut locks = self.player_locks.lock();
        drop(lock);
        if locks
            .get(&player_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&player_id);
        }
    }
}

fn build_records(
    player_id: PlayerId,
    table_id: TableId,
    batch: &ResolvedBatch,
    first_pull: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
    seed: Option<&str>,
) -> Vec<PullRecord> {
    let batch_size = u32::try_from(batch.len()).unwrap_or(u32::MAX);
    batch
        .attempts
        .iter()
        .zip(0u32..)
        .map(|(resolved, index)| PullRecord {
            player_id,
            table_id,
            timestamp,
            seed: seed.map(str::to_owned),
            rewards: resolved
                .attempt
                .rewards
                .iter()
                .map(RecordedReward::from)
                .collect(),
            was_guaranteed: resolved.attempt.was_guaranteed,
            triggered_threshold_rarity: resolved.attempt.triggered_threshold_rarity,
            rarity: resolved.attempt.rarity,
            pull_number: first_pull + u64::from(index),
            batch_index: index,
            batch_size,
            pity_before: resolved.pity_before.clone(),
        })
        .collect()
}
