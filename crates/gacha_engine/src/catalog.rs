//! Reward catalog collaborator.
//!
//! The catalog names rewards and says how they stack. It is consulted for
//! display, stacking and load-time checks, never by selection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GachaError, GachaResult};
use crate::table::{ItemId, LootTable};

/// Display and stacking data for one catalog item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDescriptor {
    /// Human-readable name.
    pub name: String,
    /// Largest stack a single inventory slot holds.
    pub max_stack: u32,
}

/// Source of reward descriptors.
pub trait CatalogRewards: Send + Sync {
    /// Looks up an item.
    fn resolve(&self, item_id: ItemId) -> Option<RewardDescriptor>;
}

/// Checks that every item reward of a table exists in the catalog.
///
/// # Errors
///
/// `UnknownReward` naming the first missing item.
pub fn check_rewards(table: &LootTable, catalog: &dyn CatalogRewards) -> GachaResult<()> {
    let mut referenced = table
        .entries
        .iter()
        .filter_map(|e| e.reward.item_id())
        .chain(table.cost.ticket.map(|t| t.item_id));
    match referenced.find(|id| catalog.resolve(*id).is_none()) {
        Some(missing) => Err(GachaError::UnknownReward(missing)),
        None => Ok(()),
    }
}

/// In-memory catalog, usually loaded from TOML.
///
/// ```toml
/// [[items]]
/// id = 501
/// name = "Starfall Blade"
/// max_stack = 1
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    items: HashMap<ItemId, RewardDescriptor>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Deserialize)]
struct CatalogItem {
    id: ItemId,
    name: String,
    max_stack: u32,
}

impl StaticCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an item.
    pub fn insert(&mut self, item_id: ItemId, name: impl Into<String>, max_stack: u32) {
        self.items.insert(
            item_id,
            RewardDescriptor {
                name: name.into(),
                max_stack,
            },
        );
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_item(mut self, item_id: ItemId, name: impl Into<String>, max_stack: u32) -> Self {
        self.insert(item_id, name, max_stack);
        self
    }

    /// Parses a catalog document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse, repeats an id or uses
    /// the reserved id 0 (an empty inventory slot).
    pub fn from_toml_str(source: &str) -> GachaResult<Self> {
        let file: CatalogFile = toml::from_str(source)
            .map_err(|e| GachaError::InvalidConfig(format!("Failed to parse catalog: {e}")))?;
        let mut catalog = Self::new();
        for item in file.items {
            if item.id == 0 {
                return Err(GachaError::InvalidConfig(format!(
                    "catalog item \"{}\" uses the reserved id 0",
                    item.name
                )));
            }
            if catalog.items.contains_key(&item.id) {
                return Err(GachaError::InvalidConfig(format!(
                    "duplicate catalog item {}",
                    item.id
                )));
            }
            catalog.insert(item.id, item.name, item.max_stack);
        }
        Ok(catalog)
    }

    /// Number of known items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CatalogRewards for StaticCatalog {
    fn resolve(&self, item_id: ItemId) -> Option<RewardDescriptor> {
        self.items.get(&item_id).cloned()
    }
}
