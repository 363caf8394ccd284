//! # Loot Table Repository
//!
//! Tables are validated on the way in and handed out as shared, immutable
//! snapshots. A pull keeps its `Arc` for its whole duration, so replacing a
//! table never changes a pull that is already running.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{check_rewards, CatalogRewards};
use crate::error::{GachaError, GachaResult};
use crate::table::{LootTable, TableId};

/// Source of validated loot tables.
pub trait LootTableRepository: Send + Sync {
    /// Returns the current definition of a table.
    ///
    /// # Errors
    ///
    /// `TableNotFound` if no such table is registered.
    fn load(&self, table_id: TableId) -> GachaResult<Arc<LootTable>>;
}

/// In-memory registry of tables.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: RwLock<HashMap<TableId, Arc<LootTable>>>,
}

impl TableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a table, replacing any previous version.
    ///
    /// # Errors
    ///
    /// `InvalidTable` if the table fails validation; the old version stays.
    pub fn register(&self, table: LootTable) -> GachaResult<()> {
        table.validate()?;
        tracing::info!(
            table_id = table.id,
            entries = table.entries.len(),
            rarity_tiered = table.is_rarity_tiered(),
            "loot table registered"
        );
        self.tables.write().insert(table.id, Arc::new(table));
        Ok(())
    }

    /// Like [`register`](Self::register), also requiring every referenced
    /// item to exist in the catalog.
    ///
    /// # Errors
    ///
    /// `InvalidTable` or `UnknownReward`.
    pub fn register_checked(
        &self,
        table: LootTable,
        catalog: &dyn CatalogRewards,
    ) -> GachaResult<()> {
        table.validate()?;
        check_rewards(&table, catalog)?;
        self.register(table)
    }

    /// Loads every `*.toml` file in a directory, in file-name order.
    ///
    /// Returns the number of tables registered.
    ///
    /// # Errors
    ///
    /// `Storage` if the directory cannot be read; the first validation error
    /// otherwise. Tables loaded before the failing file stay registered.
    pub fn load_dir(
        &self,
        dir: impl AsRef<Path>,
        catalog: &dyn CatalogRewards,
    ) -> GachaResult<usize> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| GachaError::Storage(format!("{}: {e}", dir.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in &paths {
            let source = std::fs::read_to_string(path)
                .map_err(|e| GachaError::Storage(format!("{}: {e}", path.display())))?;
            let table = LootTable::from_toml_str(&source).map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "rejected loot table");
                e
            })?;
            self.register_checked(table, catalog)?;
        }

        Ok(paths.len())
    }

    /// Flips the `active` flag of a registered table.
    ///
    /// # Errors
    ///
    /// `TableNotFound`.
    pub fn set_active(&self, table_id: TableId, active: bool) -> GachaResult<()> {
        let mut tables = self.tables.write();
        let current = tables
            .get(&table_id)
            .ok_or(GachaError::TableNotFound(table_id))?;
        let mut updated = LootTable::clone(current);
        updated.active = active;
        tables.insert(table_id, Arc::new(updated));
        Ok(())
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl LootTableRepository for TableRegistry {
    fn load(&self, table_id: TableId) -> GachaResult<Arc<LootTable>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(GachaError::TableNotFound(table_id))
    }
}
