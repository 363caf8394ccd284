//! # Pity Ledger
//!
//! One row per (player, table) counting pulls since each guarantee last fired.
//!
//! ## Lifecycle
//!
//! ```text
//! absent ──first pull──> initialized ──commit──> active ──commit──> active ...
//! ```
//!
//! A row is created with zero counters on the first pull, mutated only by a
//! committed pull, and never deleted. Thresholds added to a table after a row
//! exists get a counter seeded with the row's historical pull count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::account::PlayerId;
use crate::table::{GuaranteeThreshold, LootTable, Rarity, TableId};

/// Counter snapshot: threshold rarity -> pulls since it last fired.
pub type PityCounters = BTreeMap<Rarity, u32>;

/// Per-(player, table) pity state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PityLedger {
    /// Owner.
    pub player_id: PlayerId,
    /// Table the counters belong to.
    pub table_id: TableId,
    /// One counter per configured threshold.
    pub counters: PityCounters,
    /// Every pull ever committed on this table by this player.
    pub total_pulls: u64,
    /// Time of the last committed pull.
    pub last_pull_at: Option<DateTime<Utc>>,
}

impl PityLedger {
    /// Creates the initial row for a first pull, with zero counters.
    #[must_use]
    pub fn initialize(player_id: PlayerId, table: &LootTable) -> Self {
        Self {
            player_id,
            table_id: table.id,
            counters: table
                .guarantee_thresholds
                .iter()
                .map(|t| (t.rarity, 0))
                .collect(),
            total_pulls: 0,
            last_pull_at: None,
        }
    }

    /// Adds counters for thresholds the row has not seen yet.
    ///
    /// New counters start at the historical pull count; existing counters are
    /// never touched.
    pub fn ensure_thresholds(&mut self, table: &LootTable) {
        let seed = u32::try_from(self.total_pulls).unwrap_or(u32::MAX);
        for threshold in &table.guarantee_thresholds {
            self.counters.entry(threshold.rarity).or_insert(seed);
        }
    }

    /// Current counter for a threshold rarity (0 when absent).
    #[must_use]
    pub fn counter(&self, rarity: Rarity) -> u32 {
        self.counters.get(&rarity).copied().unwrap_or(0)
    }

    /// The threshold that fires on the next pull, if any.
    ///
    /// A threshold fires when `counter + 1 >= pulls_required`. When several fire
    /// together the highest rarity wins.
    #[must_use]
    pub fn triggered(&self, thresholds: &[GuaranteeThreshold]) -> Option<Rarity> {
        thresholds
            .iter()
            .filter(|t| self.counter(t.rarity).saturating_add(1) >= t.pulls_required)
            .map(|t| t.rarity)
            .max()
    }

    /// Applies one resolved attempt to the counters.
    ///
    /// The triggered threshold resets to 0; thresholds with `reset_on_natural`
    /// reset when the awarded rarity reaches them; every other counter grows.
    pub fn record_attempt(
        &mut self,
        thresholds: &[GuaranteeThreshold],
        triggered: Option<Rarity>,
        awarded: Option<Rarity>,
    ) {
        for threshold in thresholds {
            let counter = self.counters.entry(threshold.rarity).or_insert(0);
            let natural_hit =
                threshold.reset_on_natural && awarded.is_some_and(|a| a >= threshold.rarity);
            if triggered == Some(threshold.rarity) || natural_hit {
                *counter = 0;
            } else {
                *counter = counter.saturating_add(1);
            }
        }
        self.total_pulls = self.total_pulls.saturating_add(1);
    }

    /// Stamps the time of the committing pull.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_pull_at = Some(at);
    }

    /// Copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PityCounters {
        self.counters.clone()
    }
}
