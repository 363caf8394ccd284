//! # Pull Resolver
//!
//! Runs the selection algorithm `count` times against a working copy of the
//! pity ledger. Every attempt sees the counters left behind by the previous
//! one, so a guarantee that fires mid-batch is visible to the rest of it.

use crate::error::GachaResult;
use crate::pity::{PityCounters, PityLedger};
use crate::rng::RandomSource;
use crate::selection::{Attempt, Selector};
use crate::table::LootTable;

/// One attempt together with the counters it was resolved against.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAttempt {
    /// Outcome of the selection.
    pub attempt: Attempt,
    /// Pity counters in effect before this attempt.
    pub pity_before: PityCounters,
}

/// Aggregated outcome of a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedBatch {
    /// Attempts in order.
    pub attempts: Vec<ResolvedAttempt>,
    /// Attempts produced by a guarantee.
    pub guaranteed_count: u32,
    /// Featured rewards across the batch.
    pub featured_count: u32,
}

impl ResolvedBatch {
    /// Number of attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// True for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Batch driver over one table.
pub struct PullResolver<'t> {
    selector: Selector<'t>,
}

impl<'t> PullResolver<'t> {
    /// Creates a resolver for a validated table.
    #[must_use]
    pub fn new(table: &'t LootTable) -> Self {
        Self {
            selector: Selector::new(table),
        }
    }

    /// Resolves `count` attempts, advancing `pity` after each one.
    ///
    /// `pity` is the caller's working copy; on error it is left half-advanced
    /// and must be discarded.
    ///
    /// # Errors
    ///
    /// Propagates `EmptyPool` from the first attempt that cannot be resolved.
    pub fn resolve<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        pity: &mut PityLedger,
        count: u32,
    ) -> GachaResult<ResolvedBatch> {
        let table = self.selector.table();
        let mut batch = ResolvedBatch {
            attempts: Vec::with_capacity(count as usize),
            ..ResolvedBatch::default()
        };

        for index in 0..count {
            let pity_before = pity.snapshot();
            let attempt = self.selector.select(rng, pity)?;

            pity.record_attempt(
                &table.guarantee_thresholds,
                attempt.triggered_threshold_rarity,
                attempt.rarity,
            );

            tracing::debug!(
                table_id = table.id,
                player_id = pity.player_id,
                index,
                rewards = attempt.rewards.len(),
                guaranteed = attempt.was_guaranteed,
                "attempt resolved"
            );

            if attempt.was_guaranteed {
                batch.guaranteed_count += 1;
            }
            batch.featured_count += attempt.featured_count();
            batch.attempts.push(ResolvedAttempt {
                attempt,
                pity_before,
            });
        }

        Ok(batch)
    }
}
