//! # Gacha Engine
//!
//! Loot-box and banner resolution with pity guarantees and atomic pulls.
//!
//! ## Design Principles
//!
//! 1. **Selection is pure** - tables, a random source and a pity snapshot in,
//!    rewards out. No shared state is touched while drawing.
//! 2. **Seeded pulls are verifiable** - the same seed gives the same outcome on
//!    every machine, forever.
//! 3. **All-or-nothing pulls** - cost, rewards, pity and audit commit together.
//! 4. **External configuration** - tables, catalog and engine settings in TOML.
//!
//! ## Thread Safety
//!
//! [`PullCoordinator`] is `Send + Sync`. Pulls of the same player are strictly
//! serialized; pulls of different players run side by side.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gacha_engine::{
//!     EngineConfig, MemoryStore, PullCoordinator, StaticCatalog, SystemClock, TableRegistry,
//! };
//! use std::sync::Arc;
//!
//! let config = EngineConfig::from_file("config/engine.toml")?;
//! let catalog = Arc::new(StaticCatalog::from_toml_str(&catalog_toml)?);
//! let registry = Arc::new(TableRegistry::new());
//! registry.load_dir("data/tables", catalog.as_ref())?;
//! let store = Arc::new(MemoryStore::from_config(&config)?);
//!
//! let engine = PullCoordinator::new(config, registry, store, catalog, Arc::new(SystemClock));
//! let result = engine.execute_pull(player_id, banner_id, 10, None)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod audit;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod pity;
pub mod repository;
pub mod resolver;
pub mod rng;
pub mod selection;
pub mod store;
pub mod table;

pub use account::{Account, ChargePlan, Inventory, ItemStack, PlayerId};
pub use audit::{AuditLog, PullRecord, RecordedReward};
pub use catalog::{CatalogRewards, RewardDescriptor, StaticCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use coordinator::{AttemptOutcome, GrantedReward, PullBatchResult, PullCoordinator};
pub use error::{GachaError, GachaResult};
pub use journal::{Journal, JournalOp};
pub use pity::{PityCounters, PityLedger};
pub use repository::{LootTableRepository, TableRegistry};
pub use resolver::{PullResolver, ResolvedAttempt, ResolvedBatch};
pub use rng::{RandomSource, SecureRandom, SeededRandom, SequenceRandom};
pub use selection::{Attempt, ResolvedReward, Selector};
pub use store::{MemoryStore, PlayerStore, PlayerView, PullCommit, Version};
pub use table::{
    Cost, Entry, EntryId, FeaturedBoost, GuaranteeThreshold, ItemId, LootTable, Rarity,
    RarityRate, Reward, SelectionMode, TableId, TicketCost,
};
