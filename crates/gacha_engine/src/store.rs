//! # Player Store
//!
//! Holds balances, inventories, pity rows and the audit log, and applies a
//! pull's changes to all of them in one step.
//!
//! ## Commit Pipeline
//!
//! ```text
//! commit(PullCommit) ──> version check ──> journal txn (synced) ──> apply in memory
//!                              │                   │
//!                              ▼                   ▼
//!                    ConcurrentModification     Storage
//!                      (nothing written)     (nothing applied)
//! ```
//!
//! Every account carries a version that grows with each commit touching it.
//! A commit names the version it was computed from; if the account moved in
//! the meantime the commit is refused.
//!
//! ## Locking
//!
//! Commits for one player run one at a time behind that player's gate. The
//! state lock is taken only to read the version and to apply, never across
//! the journal sync, so readers and other players are not held up by disk.
//! Compaction excludes commits between their journal write and their apply.

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::account::{Account, PlayerId};
use crate::audit::{AuditLog, PullRecord};
use crate::config::EngineConfig;
use crate::error::{GachaError, GachaResult};
use crate::journal::{Journal, JournalOp};
use crate::pity::PityLedger;
use crate::table::{ItemId, TableId};

/// Optimistic concurrency token of an account.
pub type Version = u64;

/// What a pull reads before it resolves.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerView {
    /// Current account (empty for unknown players).
    pub account: Account,
    /// Pity row, absent before the first pull on the table.
    pub pity: Option<PityLedger>,
    /// Version the view was taken at.
    pub version: Version,
}

/// Everything a successful pull writes.
#[derive(Clone, Debug, PartialEq)]
pub struct PullCommit {
    /// Version from the [`PlayerView`] the pull started from.
    pub expected_version: Version,
    /// Account after charging and crediting.
    pub account: Account,
    /// Pity row after the batch.
    pub pity: PityLedger,
    /// One record per attempt.
    pub records: Vec<PullRecord>,
}

/// Persistence collaborator of the coordinator.
pub trait PlayerStore: Send + Sync {
    /// Reads the account and pity row a pull needs.
    ///
    /// # Errors
    ///
    /// `Storage` if the backend is unavailable.
    fn read(&self, player_id: PlayerId, table_id: TableId) -> GachaResult<PlayerView>;

    /// Applies a pull atomically and returns the new account version.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` on a version mismatch, `Storage` if the write
    /// fails. Either way nothing is applied.
    fn commit(&self, commit: PullCommit) -> GachaResult<Version>;
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<PlayerId, (Account, Version)>,
    pity: HashMap<(PlayerId, TableId), PityLedger>,
    audit: AuditLog,
}

impl State {
    fn apply(&mut self, ops: Vec<JournalOp>) {
        for op in ops {
            match op {
                JournalOp::Account(account) => {
                    let version = self
                        .accounts
                        .get(&account.player_id)
                        .map_or(0, |(_, v)| *v);
                    self.accounts
                        .insert(account.player_id, (account, version + 1));
                }
                JournalOp::Pity(ledger) => {
                    self.pity
                        .insert((ledger.player_id, ledger.table_id), ledger);
                }
                JournalOp::Audit(record) => self.audit.append([record]),
            }
        }
    }

    fn snapshot(&self) -> Vec<JournalOp> {
        let mut ops: Vec<JournalOp> = self
            .accounts
            .values()
            .map(|(account, _)| JournalOp::Account(account.clone()))
            .collect();
        ops.extend(self.pity.values().cloned().map(JournalOp::Pity));
        ops.extend(self.audit.iter().cloned().map(JournalOp::Audit));
        ops
    }
}

/// In-memory store, optionally backed by a write-ahead journal.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    journal: Option<Journal>,
    inventory_slots: usize,
    gates: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
    /// Shared by commits, exclusive for compaction.
    commit_lock: RwLock<()>,
}

impl MemoryStore {
    /// Creates a volatile store.
    #[must_use]
    pub fn new(inventory_slots: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            journal: None,
            inventory_slots,
            gates: Mutex::new(HashMap::new()),
            commit_lock: RwLock::new(()),
        }
    }

    /// Opens a journal-backed store, replaying every committed transaction.
    ///
    /// # Errors
    ///
    /// `Storage` if the journal cannot be opened.
    pub fn open(path: impl AsRef<Path>, inventory_slots: usize) -> GachaResult<Self> {
        let (journal, recovery) = Journal::open(path)?;
        let mut state = State::default();
        let transactions = recovery.committed.len();
        for ops in recovery.committed {
            state.apply(ops);
        }
        tracing::info!(
            transactions,
            accounts = state.accounts.len(),
            audit_records = state.audit.len(),
            "player store restored from journal"
        );
        Ok(Self {
            state: RwLock::new(state),
            journal: Some(journal),
            inventory_slots,
            gates: Mutex::new(HashMap::new()),
            commit_lock: RwLock::new(()),
        })
    }

    /// Builds the store described by `config`.
    ///
    /// # Errors
    ///
    /// `Storage` if a configured journal cannot be opened.
    pub fn from_config(config: &EngineConfig) -> GachaResult<Self> {
        match &config.journal_path {
            Some(path) => Self::open(path, config.inventory_slots),
            None => Ok(Self::new(config.inventory_slots)),
        }
    }

    /// Adds currency outside of a pull (purchases, grants).
    ///
    /// # Errors
    ///
    /// `ArithmeticOverflow` or `Storage`.
    pub fn deposit_currency(&self, player_id: PlayerId, amount: u64) -> GachaResult<()> {
        self.update_account(player_id, |account| account.credit(amount))
    }

    /// Adds items (typically tickets) outside of a pull.
    ///
    /// # Errors
    ///
    /// `InventoryFull` or `Storage`.
    pub fn deposit_item(
        &self,
        player_id: PlayerId,
        item_id: ItemId,
        quantity: u32,
        max_stack: u32,
    ) -> GachaResult<()> {
        self.update_account(player_id, |account| {
            account.inventory.add(item_id, quantity, max_stack)
        })
    }

    fn update_account(
        &self,
        player_id: PlayerId,
        change: impl FnOnce(&mut Account) -> GachaResult<()>,
    ) -> GachaResult<()> {
        let gate = self.gate(player_id);
        let _player = gate.lock();
        let _section = self.commit_lock.read();

        let mut account = self
            .account(player_id)
            .unwrap_or_else(|| Account::new(player_id, self.inventory_slots));
        change(&mut account)?;
        self.journal_and_apply(vec![JournalOp::Account(account)])
    }

    /// Commit gate of one player, created on first use.
    fn gate(&self, player_id: PlayerId) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.lock().entry(player_id).or_default())
    }

    /// Caller holds the player's gate and the shared commit lock.
    fn journal_and_apply(&self, ops: Vec<JournalOp>) -> GachaResult<()> {
        if let Some(journal) = &self.journal {
            journal.write_transaction(&ops)?;
        }
        self.state.write().apply(ops);
        Ok(())
    }

    /// Current account, if the player exists.
    #[must_use]
    pub fn account(&self, player_id: PlayerId) -> Option<Account> {
        self.state
            .read()
            .accounts
            .get(&player_id)
            .map(|(account, _)| account.clone())
    }

    /// Current pity row, if the player has pulled on the table.
    #[must_use]
    pub fn pity(&self, player_id: PlayerId, table_id: TableId) -> Option<PityLedger> {
        self.state.read().pity.get(&(player_id, table_id)).cloned()
    }

    /// Read access to the audit log.
    #[must_use]
    pub fn audit(&self) -> MappedRwLockReadGuard<'_, AuditLog> {
        RwLockReadGuard::map(self.state.read(), |state| &state.audit)
    }

    /// Copies of the audit records of one (player, table) pair.
    #[must_use]
    pub fn records_for(&self, player_id: PlayerId, table_id: TableId) -> Vec<PullRecord> {
        self.audit()
            .records_for(player_id, table_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Rewrites the journal as a single snapshot of the current state.
    ///
    /// A no-op for volatile stores.
    ///
    /// # Errors
    ///
    /// `Storage` if the new journal cannot be written.
    pub fn compact(&self) -> GachaResult<()> {
        let _exclusive = self.commit_lock.write();
        if let Some(journal) = &self.journal {
            let snapshot = self.state.read().snapshot();
            journal.compact(&snapshot)?;
        }
        Ok(())
    }
}

impl PlayerStore for MemoryStore {
    fn read(&self, player_id: PlayerId, table_id: TableId) -> GachaResult<PlayerView> {
        let state = self.state.read();
        let (account, version) = state.accounts.get(&player_id).map_or_else(
            || (Account::new(player_id, self.inventory_slots), 0),
            |(account, version)| (account.clone(), *version),
        );
        Ok(PlayerView {
            account,
            pity: state.pity.get(&(player_id, table_id)).cloned(),
            version,
        })
    }

    fn commit(&self, commit: PullCommit) -> GachaResult<Version> {
        let player_id = commit.account.player_id;
        let gate = self.gate(player_id);
        let _player = gate.lock();
        let _section = self.commit_lock.read();

        let current = self
            .state
            .read()
            .accounts
            .get(&player_id)
            .map_or(0, |(_, v)| *v);
        if current != commit.expected_version {
            tracing::warn!(
                player_id,
                expected = commit.expected_version,
                current,
                "stale pull commit refused"
            );
            return Err(GachaError::ConcurrentModification { player_id });
        }

        let mut ops = Vec::with_capacity(commit.records.len() + 2);
        ops.push(JournalOp::Account(commit.account));
        ops.push(JournalOp::Pity(commit.pity));
        ops.extend(commit.records.into_iter().map(JournalOp::Audit));

        self.journal_and_apply(ops)?;
        Ok(current + 1)
    }
}
