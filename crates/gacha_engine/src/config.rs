//! # Engine Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! lock_timeout_ms = 250
//! max_pulls_per_batch = 10
//! journal_path = "/var/lib/gacha/pulls.gjnl"
//! default_max_stack = 999
//! inventory_slots = 256
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GachaError, GachaResult};

/// Runtime settings of the pull coordinator and its store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a pull waits for a competing pull of the same player.
    pub lock_timeout_ms: u64,
    /// Largest batch accepted when a table sets no limit of its own.
    pub max_pulls_per_batch: u32,
    /// Journal file; `None` keeps everything in memory.
    pub journal_path: Option<PathBuf>,
    /// Stack size for items the catalog does not describe.
    pub default_max_stack: u32,
    /// Slots in a newly created inventory.
    pub inventory_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 100,
            max_pulls_per_batch: 10,
            journal_path: None,
            default_max_stack: 999,
            inventory_slots: 64,
        }
    }
}

impl EngineConfig {
    /// Production preset: journaled, with more patience for contended players.
    #[must_use]
    pub fn production(journal_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_timeout_ms: 250,
            journal_path: Some(journal_path.into()),
            inventory_slots: 256,
            ..Self::default()
        }
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse or a value is out of range.
    pub fn from_toml_str(source: &str) -> GachaResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| GachaError::InvalidConfig(format!("Failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> GachaResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            GachaError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> GachaResult<()> {
        if self.max_pulls_per_batch == 0 {
            return Err(GachaError::InvalidConfig(
                "max_pulls_per_batch must be >= 1".to_string(),
            ));
        }
        if self.default_max_stack == 0 {
            return Err(GachaError::InvalidConfig(
                "default_max_stack must be >= 1".to_string(),
            ));
        }
        if self.inventory_slots == 0 {
            return Err(GachaError::InvalidConfig(
                "inventory_slots must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Lock wait as a duration.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
