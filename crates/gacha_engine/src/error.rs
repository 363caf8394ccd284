//! # Engine Error Types
//!
//! All errors that can occur while loading tables or resolving pulls.
//!
//! The variants fall into four families:
//!
//! - **Validation** - the table or config is malformed; rejected before any pull.
//! - **Resource** - the player or the pool cannot satisfy the request; nothing mutated.
//! - **Concurrency** - a competing pull held the player; retry with backoff.
//! - **Storage** - the persistence layer failed; the transaction was not committed.

use thiserror::Error;

use crate::account::PlayerId;
use crate::table::{ItemId, TableId};

/// Errors that can occur in the gacha engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GachaError {
    /// A loot table failed validation.
    #[error("invalid table {table_id}: {reason}")]
    InvalidTable {
        /// The offending table.
        table_id: TableId,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid configuration or unparsable document.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A table references an item the catalog does not know.
    #[error("unknown reward item: {0}")]
    UnknownReward(ItemId),

    /// The table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(TableId),

    /// The table exists but is disabled.
    #[error("table inactive: {0}")]
    TableInactive(TableId),

    /// Pull count outside the allowed range.
    #[error("invalid pull count {requested}, allowed 1..={max}")]
    InvalidPullCount {
        /// The requested count.
        requested: u32,
        /// The largest allowed batch.
        max: u32,
    },

    /// The player cannot pay for the batch.
    #[error(
        "insufficient funds: need {currency_required} currency / {tickets_required} tickets, \
         have {currency_available} / {tickets_available}"
    )]
    InsufficientFunds {
        /// Currency that would have been spent.
        currency_required: u64,
        /// Currency on hand.
        currency_available: u64,
        /// Tickets that would have been spent.
        tickets_required: u64,
        /// Tickets on hand.
        tickets_available: u64,
    },

    /// No reward could be selected from the table.
    #[error("empty reward pool in table {0}")]
    EmptyPool(TableId),

    /// A competing pull for the same player was in flight.
    #[error("concurrent modification for player {player_id}, retry")]
    ConcurrentModification {
        /// The contended player.
        player_id: PlayerId,
    },

    /// Inventory is full, cannot add more items.
    #[error("inventory full: capacity {capacity}, tried to add {amount}")]
    InventoryFull {
        /// Slot capacity.
        capacity: u32,
        /// Amount that did not fit.
        amount: u64,
    },

    /// Arithmetic overflow in a balance or counter.
    #[error("arithmetic overflow in balance calculation")]
    ArithmeticOverflow,

    /// Persistence layer failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl GachaError {
    /// Returns true if the caller should retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Returns true for errors raised while validating definitions.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTable { .. } | Self::InvalidConfig(_) | Self::UnknownReward(_)
        )
    }

    pub(crate) fn invalid_table(table_id: TableId, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table_id,
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type GachaResult<T> = Result<T, GachaError>;
