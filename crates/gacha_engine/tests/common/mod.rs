//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use gacha_engine::{
    Cost, EngineConfig, Entry, FixedClock, GuaranteeThreshold, LootTable, MemoryStore,
    PlayerStore, PullCoordinator, Rarity, RarityRate, SelectionMode, StaticCatalog,
    TableRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;

pub const BANNER: u32 = 1;
pub const WEAPON_BOX: u32 = 2;
pub const STARTER_CHEST: u32 = 3;
pub const EMPTY_BOX: u32 = 4;
pub const TICKET: u32 = 900;

pub fn temp_journal_path(tag: &str) -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("test_{tag}_{id}.gjnl"))
}

/// Rarity-tiered banner: 3 rares, 1 epic, 2 legendaries (one featured).
pub fn banner() -> LootTable {
    let mut table = LootTable::new(BANNER, SelectionMode::SinglePick);
    table.name = "Limited Banner".to_string();
    table.entries = vec![
        Entry::item(1, 300).with_rarity(Rarity::Rare),
        Entry::item(2, 301).with_rarity(Rarity::Rare),
        Entry::item(3, 302).with_rarity(Rarity::Rare),
        Entry::item(4, 400).with_rarity(Rarity::Epic),
        Entry::item(5, 500).with_rarity(Rarity::Legendary),
        Entry::item(6, 501).with_rarity(Rarity::Legendary),
    ];
    table.rarity_drop_rates = vec![
        RarityRate { rarity: Rarity::Rare, rate: 0.943 },
        RarityRate { rarity: Rarity::Epic, rate: 0.051 },
        RarityRate { rarity: Rarity::Legendary, rate: 0.006 },
    ];
    table.featured_boost = vec![gacha_engine::FeaturedBoost {
        item_id: 501,
        multiplier: 3.0,
    }];
    table.guarantee_thresholds = vec![
        GuaranteeThreshold::new(Rarity::Epic, 10),
        GuaranteeThreshold::new(Rarity::Legendary, 90),
    ];
    table.cost = Cost::tickets_or_currency(TICKET, 1, 160);
    table
}

/// Weighted single-pick box: 70 / 20 / 10, quantity 1..=3.
pub fn weapon_box() -> LootTable {
    let mut table = LootTable::new(WEAPON_BOX, SelectionMode::SinglePick);
    table.name = "Weapon Box".to_string();
    table.entries = vec![
        Entry::item(1, 100).with_weight(70).with_amount(1, 3).in_group("weapon"),
        Entry::item(2, 101).with_weight(20).with_amount(1, 3).in_group("weapon"),
        Entry::item(3, 102).with_weight(10).with_amount(1, 3).in_group("weapon"),
    ];
    table.cost = Cost::currency(50);
    table
}

/// Independent-trials chest with a guaranteed consolation item.
pub fn starter_chest() -> LootTable {
    let mut table = LootTable::new(STARTER_CHEST, SelectionMode::IndependentTrials);
    table.name = "Starter Chest".to_string();
    table.entries = vec![
        Entry::item(1, 110).with_probability(0.1).in_group("bonus"),
        Entry::item(2, 111).with_probability(0.1).in_group("bonus"),
        Entry::item(3, 112).with_probability(0.1).in_group("bonus"),
        Entry::item(4, 113).in_group("bonus").guaranteed(),
    ];
    table.cost = Cost::tickets(TICKET, 1);
    table
}

/// A registered table with nothing in it.
pub fn empty_box() -> LootTable {
    let mut table = LootTable::new(EMPTY_BOX, SelectionMode::SinglePick);
    table.cost = Cost::currency(10);
    table
}

pub fn catalog() -> StaticCatalog {
    let mut catalog = StaticCatalog::new().with_item(TICKET, "Wish", 999);
    for id in [100, 101, 102, 110, 111, 112, 113] {
        catalog.insert(id, format!("Item {id}"), 99);
    }
    for id in [300, 301, 302, 400, 500, 501] {
        catalog.insert(id, format!("Character {id}"), 1);
    }
    catalog
}

pub struct Engine {
    pub coordinator: Arc<PullCoordinator>,
    pub registry: Arc<TableRegistry>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
}

pub fn engine_with_store(store: MemoryStore, config: EngineConfig) -> Engine {
    let catalog = Arc::new(catalog());
    let registry = Arc::new(TableRegistry::new());
    for table in [banner(), weapon_box(), starter_chest(), empty_box()] {
        registry.register_checked(table, catalog.as_ref()).unwrap();
    }
    let store = Arc::new(store);
    let clock = Arc::new(FixedClock::at_unix(1_800_000_000));
    let coordinator = Arc::new(PullCoordinator::new(
        config,
        registry.clone(),
        store.clone() as Arc<dyn PlayerStore>,
        catalog,
        clock.clone(),
    ));
    Engine {
        coordinator,
        registry,
        store,
        clock,
    }
}

pub fn engine() -> Engine {
    let config = EngineConfig {
        inventory_slots: 256,
        ..EngineConfig::default()
    };
    engine_with_store(MemoryStore::new(config.inventory_slots), config)
}
