//! All-or-nothing pulls: failures leave no trace, commits survive restarts.

mod common;

use common::{engine, engine_with_store, BANNER, EMPTY_BOX, STARTER_CHEST, TICKET, WEAPON_BOX};
use gacha_engine::{Clock, Cost, EngineConfig, GachaError, MemoryStore, Rarity, SequenceRandom};

#[test]
fn test_empty_pool_leaves_no_trace() {
    let e = engine();
    e.store.deposit_currency(1, 500).unwrap();
    let account_before = e.store.account(1).unwrap();

    let err = e.coordinator.execute_pull(1, EMPTY_BOX, 3, None).unwrap_err();
    assert_eq!(err, GachaError::EmptyPool(EMPTY_BOX));
    assert!(!err.is_retryable());

    assert_eq!(e.store.account(1).unwrap(), account_before);
    assert!(e.store.pity(1, EMPTY_BOX).is_none());
    assert!(e.store.audit().is_empty());
}

#[test]
fn test_all_trials_failing_still_awards_guaranteed_item() {
    let e = engine();
    e.store.deposit_item(1, TICKET, 1, 999).unwrap();

    // Every trial draw is 0.95 > 0.1.
    let result = e
        .coordinator
        .execute_with(1, STARTER_CHEST, 1, None, &mut SequenceRandom::constant(0.95))
        .unwrap();

    let rewards = &result.results[0].rewards;
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].entry_id, 4);
    assert_eq!(rewards[0].display_name.as_deref(), Some("Item 113"));
    assert!(result.results[0].was_guaranteed);

    let account = e.store.account(1).unwrap();
    assert_eq!(account.ticket_balance(TICKET), 0);
    assert_eq!(account.inventory.count_item(113), 1);
}

#[test]
fn test_ticket_only_table_never_takes_currency() {
    let e = engine();
    e.store.deposit_currency(1, 1_000_000).unwrap();
    e.store.deposit_item(1, TICKET, 2, 999).unwrap();

    let err = e.coordinator.execute_pull(1, STARTER_CHEST, 3, None).unwrap_err();
    assert!(matches!(
        err,
        GachaError::InsufficientFunds {
            tickets_required: 3,
            tickets_available: 2,
            ..
        }
    ));

    let account = e.store.account(1).unwrap();
    assert_eq!(account.currency, 1_000_000);
    assert_eq!(account.ticket_balance(TICKET), 2);
}

#[test]
fn test_batch_is_paid_in_full_or_not_at_all() {
    let e = engine();
    // Nine pulls' worth of currency for a ten-pull.
    e.store.deposit_currency(1, 160 * 9).unwrap();
    assert!(e.coordinator.execute_pull(1, BANNER, 10, None).is_err());
    assert_eq!(e.store.account(1).unwrap().currency, 160 * 9);
    assert!(e.store.records_for(1, BANNER).is_empty());

    e.store.deposit_item(1, TICKET, 1, 999).unwrap();
    let result = e.coordinator.execute_pull(1, BANNER, 10, None).unwrap();
    assert_eq!(result.charge.pulls_by_ticket, 1);
    assert_eq!(result.charge.currency_spent, 160 * 9);
    assert_eq!(e.store.account(1).unwrap().currency, 0);
    assert_eq!(e.store.records_for(1, BANNER).len(), 10);
}

#[test]
fn test_full_inventory_aborts_and_refunds() {
    let config = EngineConfig {
        inventory_slots: 2,
        ..EngineConfig::default()
    };
    let e = engine_with_store(MemoryStore::new(2), config);
    e.store.deposit_currency(1, 10_000).unwrap();

    // Characters do not stack, so the third one has nowhere to go.
    let err = e
        .coordinator
        .execute_with(1, BANNER, 3, None, &mut SequenceRandom::constant(0.5))
        .unwrap_err();
    assert!(matches!(err, GachaError::InventoryFull { .. }));
    assert_eq!(e.store.account(1).unwrap().currency, 10_000);
    assert!(e.store.pity(1, BANNER).is_none());
}

#[test]
fn test_pity_carries_across_requests() {
    let e = engine();
    e.store.deposit_currency(1, 100_000).unwrap();
    let mut rare_only = SequenceRandom::constant(0.5);

    for _ in 0..9 {
        let result = e
            .coordinator
            .execute_with(1, BANNER, 1, None, &mut rare_only)
            .unwrap();
        assert!(!result.results[0].was_guaranteed);
    }
    assert_eq!(e.store.pity(1, BANNER).unwrap().counter(Rarity::Epic), 9);

    let tenth = e
        .coordinator
        .execute_with(1, BANNER, 1, None, &mut rare_only)
        .unwrap();
    assert!(tenth.results[0].was_guaranteed);
    assert_eq!(tenth.results[0].rarity, Some(Rarity::Epic));
    assert_eq!(tenth.results[0].pull_number, 10);

    let pity = e.store.pity(1, BANNER).unwrap();
    assert_eq!(pity.counter(Rarity::Epic), 0);
    assert_eq!(pity.counter(Rarity::Legendary), 10);
    assert_eq!(pity.total_pulls, 10);
    assert_eq!(pity.last_pull_at, Some(e.clock.now()));
}

#[test]
fn test_threshold_added_later_starts_from_history() {
    let e = engine();
    e.store.deposit_currency(1, 100_000).unwrap();
    for _ in 0..3 {
        e.coordinator.execute_pull(1, WEAPON_BOX, 1, None).unwrap();
    }
    assert_eq!(e.store.pity(1, WEAPON_BOX).unwrap().total_pulls, 3);

    let mut table = common::banner();
    table.guarantee_thresholds.push(gacha_engine::GuaranteeThreshold::new(
        Rarity::Mythic,
        200,
    ));
    table.rarity_drop_rates.push(gacha_engine::RarityRate {
        rarity: Rarity::Mythic,
        rate: 0.0,
    });
    for _ in 0..4 {
        e.coordinator.execute_pull(1, BANNER, 1, None).unwrap();
    }
    e.registry.register(table).unwrap();
    e.coordinator.execute_pull(1, BANNER, 1, None).unwrap();

    let pity = e.store.pity(1, BANNER).unwrap();
    // Seeded with the 4 historical pulls, then counted the fifth.
    assert_eq!(pity.counter(Rarity::Mythic), 5);
}

#[test]
fn test_commits_survive_restart() {
    let path = common::temp_journal_path("restart");
    let config = EngineConfig {
        journal_path: Some(path.clone()),
        inventory_slots: 256,
        ..EngineConfig::default()
    };

    let (records, account, pity) = {
        let e = engine_with_store(MemoryStore::from_config(&config).unwrap(), config.clone());
        e.store.deposit_currency(1, 5_000).unwrap();
        e.coordinator
            .execute_seeded_pull(1, BANNER, 10, "persist", None)
            .unwrap();
        e.coordinator
            .execute_pull(1, WEAPON_BOX, 5, Some(Cost::currency(10)))
            .unwrap();
        (
            e.store.records_for(1, BANNER),
            e.store.account(1).unwrap(),
            e.store.pity(1, BANNER).unwrap(),
        )
    };

    let e = engine_with_store(MemoryStore::from_config(&config).unwrap(), config);
    assert_eq!(e.store.records_for(1, BANNER), records);
    assert_eq!(e.store.account(1).unwrap(), account);
    assert_eq!(e.store.pity(1, BANNER).unwrap(), pity);
    assert_eq!(e.store.audit().len(), 15);
    assert_eq!(account.currency, 5_000 - 1_600 - 50);

    // Pull numbers continue where they left off.
    let next = e.coordinator.execute_pull(1, BANNER, 1, None).unwrap();
    assert_eq!(next.results[0].pull_number, 11);

    std::fs::remove_file(&path).ok();
}
