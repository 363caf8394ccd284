//! # Audit Log
//!
//! One immutable [`PullRecord`] per resolved attempt, appended in the same
//! commit as the balance and pity changes it describes. Records are never
//! edited or removed.
//!
//! Seeded records carry everything needed to re-run their batch: the seed, the
//! pity counters in effect and the position in the batch. [`AuditLog::verify_batch`]
//! does exactly that and compares the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::account::PlayerId;
use crate::error::{GachaError, GachaResult};
use crate::pity::{PityCounters, PityLedger};
use crate::resolver::PullResolver;
use crate::rng::SeededRandom;
use crate::selection::ResolvedReward;
use crate::table::{EntryId, LootTable, Rarity, Reward, TableId};

/// A reward as written to the audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedReward {
    /// Entry that won.
    pub entry_id: EntryId,
    /// What was granted.
    pub reward: Reward,
    /// How many.
    pub quantity: u32,
}

impl From<&ResolvedReward> for RecordedReward {
    fn from(resolved: &ResolvedReward) -> Self {
        Self {
            entry_id: resolved.entry_id,
            reward: resolved.reward.clone(),
            quantity: resolved.quantity,
        }
    }
}

/// Immutable record of one attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullRecord {
    /// Who pulled.
    pub player_id: PlayerId,
    /// Which table.
    pub table_id: TableId,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Seed of a verifiable pull.
    pub seed: Option<String>,
    /// Rewards granted by this attempt.
    pub rewards: Vec<RecordedReward>,
    /// A guarantee produced the result.
    pub was_guaranteed: bool,
    /// Pity threshold that fired, if any.
    pub triggered_threshold_rarity: Option<Rarity>,
    /// Awarded rarity on rarity-tiered tables.
    pub rarity: Option<Rarity>,
    /// 1-based ordinal of this attempt for the (player, table) pair.
    pub pull_number: u64,
    /// Position inside its batch.
    pub batch_index: u32,
    /// Size of its batch.
    pub batch_size: u32,
    /// Pity counters in effect before the attempt.
    pub pity_before: PityCounters,
}

/// Append-only store of pull records.
#[derive(Clone, Debug, Default)]
pub struct AuditLog {
    records: Vec<PullRecord>,
    by_pair: HashMap<(PlayerId, TableId), Vec<usize>>,
}

impl AuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends records in order.
    pub fn append(&mut self, records: impl IntoIterator<Item = PullRecord>) {
        for record in records {
            self.by_pair
                .entry((record.player_id, record.table_id))
                .or_default()
                .push(self.records.len());
            self.records.push(record);
        }
    }

    /// Every record of a (player, table) pair, oldest first.
    #[must_use]
    pub fn records_for(&self, player_id: PlayerId, table_id: TableId) -> Vec<&PullRecord> {
        self.by_pair
            .get(&(player_id, table_id))
            .map(|indices| indices.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    /// All records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &PullRecord> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-runs a seeded batch and reports whether it reproduces the records.
    ///
    /// `records` must be one whole batch, in order, and `table` the definition
    /// it was pulled from.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the records are not a complete seeded batch.
    pub fn verify_batch(table: &LootTable, records: &[PullRecord]) -> GachaResult<bool> {
        let first = records
            .first()
            .ok_or_else(|| GachaError::InvalidConfig("empty batch".to_string()))?;
        let seed = first
            .seed
            .as_deref()
            .ok_or_else(|| GachaError::InvalidConfig("batch was not seeded".to_string()))?;

        let complete = records.iter().enumerate().all(|(i, r)| {
            r.seed.as_deref() == Some(seed)
                && r.player_id == first.player_id
                && r.table_id == table.id
                && r.batch_size as usize == records.len()
                && r.batch_index as usize == i
        });
        if !complete {
            return Err(GachaError::InvalidConfig(
                "records do not form one seeded batch".to_string(),
            ));
        }

        let mut pity = PityLedger {
            player_id: first.player_id,
            table_id: table.id,
            counters: first.pity_before.clone(),
            total_pulls: first.pull_number.saturating_sub(1),
            last_pull_at: None,
        };
        let mut rng = SeededRandom::new(seed);
        let count = u32::try_from(records.len()).unwrap_or(u32::MAX);
        let batch = PullResolver::new(table).resolve(&mut rng, &mut pity, count)?;

        let reproduced = batch.attempts.iter().zip(records).all(|(resolved, record)| {
            let rewards: Vec<RecordedReward> = resolved
                .attempt
                .rewards
                .iter()
                .map(RecordedReward::from)
                .collect();
            rewards == record.rewards
                && resolved.attempt.was_guaranteed == record.was_guaranteed
                && resolved.attempt.triggered_threshold_rarity == record.triggered_threshold_rarity
                && resolved.attempt.rarity == record.rarity
                && resolved.pity_before == record.pity_before
        });

        if !reproduced {
            tracing::warn!(
                player_id = first.player_id,
                table_id = table.id,
                pull_number = first.pull_number,
                "seeded batch failed verification"
            );
        }
        Ok(reproduced)
    }
}
