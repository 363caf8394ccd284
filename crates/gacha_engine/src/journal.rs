//! # Write-Ahead Journal
//!
//! **Crash-safe persistence for committed pulls.**
//!
//! A pull is written here, and synced, before the in-memory state changes. On
//! restart the store replays every committed transaction in order:
//! - Committed transactions: replayed
//! - Uncommitted or rolled-back transactions: discarded
//!
//! Operations carry full post-commit state (an account, a pity row, an audit
//! record), so replay is a plain overwrite and never depends on what came
//! before it.
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "GJNL"]
//! [4 bytes: version]
//! [8 bytes: first LSN after the last compaction]
//!
//! Record format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [8 bytes: transaction id (LSN of its BEGIN)]
//! [1 byte: record type (BEGIN/OP/COMMIT/ROLLBACK)]
//! [4 bytes: payload length]
//! [N bytes: payload (JSON operation)]
//! [4 bytes: CRC32 of all of the above]
//! ```
//!
//! Integers are little-endian. Reading stops at the first truncated or
//! corrupt record; anything after it is treated as never written.
//!
//! ## Write Failures
//!
//! If a write, flush or sync fails, the file is cut back to the end of the
//! last synced commit and the journal is poisoned: every later call returns
//! `Storage` until the file is reopened. A commit that reported failure can
//! therefore never be replayed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::account::Account;
use crate::audit::PullRecord;
use crate::error::{GachaError, GachaResult};
use crate::pity::PityLedger;

/// Magic bytes identifying a journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"GJNL";

/// Current journal format version.
const JOURNAL_VERSION: u32 = 1;

/// Header length in bytes.
const HEADER_LEN: u64 = 16;

/// LSN, transaction id, type and payload length.
const RECORD_HEAD_LEN: usize = 8 + 8 + 1 + 4;

/// Journal record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Begin = 1,
    Operation = 2,
    Commit = 3,
    Rollback = 4,
}

impl RecordType {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Operation),
            3 => Some(Self::Commit),
            4 => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// One state change inside a journal transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    /// Account state after the transaction.
    Account(Account),
    /// Pity row after the transaction.
    Pity(PityLedger),
    /// Audit record appended by the transaction.
    Audit(PullRecord),
}

fn storage(context: &str) -> impl Fn(std::io::Error) -> GachaError + '_ {
    move |e| GachaError::Storage(format!("{context}: {e}"))
}

/// A record read back from disk.
struct RawRecord {
    lsn: u64,
    txn_id: u64,
    record_type: RecordType,
    payload: Vec<u8>,
}

impl RawRecord {
    fn encoded_len(&self) -> u64 {
        (RECORD_HEAD_LEN + self.payload.len() + 4) as u64
    }
}

/// What [`Journal::open`] found on disk.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Operations of every committed transaction, in commit order.
    pub committed: Vec<Vec<JournalOp>>,
    /// Transactions without a commit record.
    pub discarded: usize,
}

/// Handle for one transaction. Dropping it without committing rolls it back.
pub struct JournalTxn<'a> {
    journal: &'a Journal,
    txn_id: u64,
    finalized: bool,
}

impl JournalTxn<'_> {
    /// Transaction id (LSN of its BEGIN record).
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.txn_id
    }

    /// Writes one operation.
    ///
    /// # Errors
    ///
    /// `Storage` if the operation cannot be encoded or written.
    pub fn push(&mut self, op: &JournalOp) -> GachaResult<()> {
        let payload = serde_json::to_vec(op)
            .map_err(|e| GachaError::Storage(format!("journal encode: {e}")))?;
        self.journal
            .write_record(self.txn_id, RecordType::Operation, &payload)?;
        Ok(())
    }

    /// Commits the transaction. Once this returns, it is on disk.
    ///
    /// # Errors
    ///
    /// `Storage` if the commit record cannot be written or synced.
    pub fn commit(mut self) -> GachaResult<()> {
        self.journal
            .write_record(self.txn_id, RecordType::Commit, &[])?;
        self.journal.sync()?;
        self.finalized = true;
        Ok(())
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// `Storage` if the rollback record cannot be written.
    pub fn rollback(mut self) -> GachaResult<()> {
        self.finalized = true;
        self.journal
            .write_record(self.txn_id, RecordType::Rollback, &[])?;
        Ok(())
    }
}

impl Drop for JournalTxn<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            // Recovery discards it either way.
            let _ = self
                .journal
                .write_record(self.txn_id, RecordType::Rollback, &[]);
        }
    }
}

struct Writer {
    file: BufWriter<File>,
    next_lsn: u64,
    /// Logical file length, buffered bytes included.
    len: u64,
    /// File length at the last successful sync.
    synced_len: u64,
    poisoned: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Writer {
    fn new(file: BufWriter<File>, next_lsn: u64, len: u64) -> Self {
        Self {
            file,
            next_lsn,
            len,
            synced_len: len,
            poisoned: false,
            #[cfg(test)]
            fail_next_sync: false,
        }
    }

    fn check(&self) -> GachaResult<()> {
        if self.poisoned {
            return Err(GachaError::Storage(
                "journal poisoned by an earlier write failure; reopen it".to_string(),
            ));
        }
        Ok(())
    }

    fn flush_and_sync(&mut self) -> GachaResult<()> {
        self.file.flush().map_err(storage("journal flush failed"))?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(GachaError::Storage("journal sync failed: injected".to_string()));
        }
        self.file
            .get_ref()
            .sync_data()
            .map_err(storage("journal sync failed"))?;
        self.synced_len = self.len;
        Ok(())
    }

    /// Drops unsynced bytes, buffered or on disk, and refuses further writes.
    fn poison(&mut self, cause: &GachaError) {
        self.poisoned = true;
        match self.file.get_ref().try_clone() {
            Ok(handle) => {
                let stale = std::mem::replace(&mut self.file, BufWriter::new(handle));
                // into_parts hands back the buffer instead of flushing it.
                drop(stale.into_parts());
            }
            Err(e) => tracing::warn!(error = %e, "could not discard journal buffer"),
        }
        if let Err(e) = self.file.get_ref().set_len(self.synced_len) {
            tracing::error!(error = %e, "could not cut journal back to last sync");
        }
        self.len = self.synced_len;
        tracing::error!(error = %cause, synced_len = self.synced_len, "journal poisoned");
    }
}

/// Append-only, CRC-checked transaction journal.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

impl Journal {
    /// Opens or creates a journal and recovers its committed transactions.
    ///
    /// # Errors
    ///
    /// `Storage` if the file cannot be opened or has a foreign header.
    pub fn open(path: impl AsRef<Path>) -> GachaResult<(Self, Recovery)> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(storage("failed to open journal"))?;
        let len = file
            .metadata()
            .map_err(storage("failed to stat journal"))?
            .len();

        let mut writer = BufWriter::new(file);
        if len == 0 {
            write_header(&mut writer, 0)?;
            writer.flush().map_err(storage("failed to write header"))?;
        }

        let (recovery, next_lsn, valid_len) = Self::recover(&path)?;
        if valid_len < writer.get_ref().metadata().map_or(0, |m| m.len()) {
            // Drop the torn tail so new records are not written behind it.
            writer
                .get_ref()
                .set_len(valid_len)
                .map_err(storage("failed to truncate torn journal tail"))?;
        }
        if recovery.discarded > 0 {
            tracing::warn!(
                path = %path.display(),
                discarded = recovery.discarded,
                "journal recovery discarded uncommitted transactions"
            );
        }
        tracing::info!(
            path = %path.display(),
            committed = recovery.committed.len(),
            "journal recovered"
        );

        let journal = Self {
            path,
            writer: Mutex::new(Writer::new(writer, next_lsn, valid_len)),
        };
        Ok((journal, recovery))
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// `Storage` if the BEGIN record cannot be written.
    pub fn begin(&self) -> GachaResult<JournalTxn<'_>> {
        let mut writer = self.writer.lock();
        writer.check()?;
        let txn_id = writer.next_lsn;
        if let Err(e) = append_record(&mut writer, txn_id, RecordType::Begin, &[]) {
            writer.poison(&e);
            return Err(e);
        }
        Ok(JournalTxn {
            journal: self,
            txn_id,
            finalized: false,
        })
    }

    /// Writes `ops` as one committed transaction.
    ///
    /// # Errors
    ///
    /// `Storage`; the transaction is rolled back, and if the failure was in
    /// the file itself the journal is poisoned.
    pub fn write_transaction(&self, ops: &[JournalOp]) -> GachaResult<u64> {
        let mut txn = self.begin()?;
        for op in ops {
            txn.push(op)?;
        }
        let id = txn.id();
        txn.commit()?;
        Ok(id)
    }

    /// Replaces the whole journal with a single committed transaction holding
    /// `snapshot`.
    ///
    /// The new file is written beside the old one and renamed over it, so a
    /// crash leaves either the old journal or the new one.
    ///
    /// # Errors
    ///
    /// `Storage` if the new file cannot be written or swapped in.
    pub fn compact(&self, snapshot: &[JournalOp]) -> GachaResult<()> {
        let mut writer = self.writer.lock();
        writer.check()?;
        if let Err(e) = writer.file.flush().map_err(storage("flush before compaction")) {
            writer.poison(&e);
            return Err(e);
        }

        let staging = self.path.with_extension("compact");
        let file = File::create(&staging).map_err(storage("failed to create compaction file"))?;
        let base_lsn = writer.next_lsn;
        let mut fresh = Writer::new(BufWriter::new(file), base_lsn, HEADER_LEN);
        write_header(&mut fresh.file, base_lsn)?;
        let txn_id = fresh.next_lsn;
        append_record(&mut fresh, txn_id, RecordType::Begin, &[])?;
        for op in snapshot {
            let payload = serde_json::to_vec(op)
                .map_err(|e| GachaError::Storage(format!("journal encode: {e}")))?;
            append_record(&mut fresh, txn_id, RecordType::Operation, &payload)?;
        }
        append_record(&mut fresh, txn_id, RecordType::Commit, &[])?;
        fresh.file.flush().map_err(storage("flush compaction file"))?;
        fresh
            .file
            .get_ref()
            .sync_all()
            .map_err(storage("sync compaction file"))?;

        std::fs::rename(&staging, &self.path).map_err(storage("failed to swap journal"))?;
        let reopened = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(storage("failed to reopen journal"))?;
        *writer = Writer::new(BufWriter::new(reopened), fresh.next_lsn, fresh.len);

        tracing::info!(
            path = %self.path.display(),
            ops = snapshot.len(),
            "journal compacted"
        );
        Ok(())
    }

    fn write_record(&self, txn_id: u64, record_type: RecordType, payload: &[u8]) -> GachaResult<u64> {
        let mut writer = self.writer.lock();
        writer.check()?;
        append_record(&mut writer, txn_id, record_type, payload).map_err(|e| {
            writer.poison(&e);
            e
        })
    }

    fn sync(&self) -> GachaResult<()> {
        let mut writer = self.writer.lock();
        writer.check()?;
        writer.flush_and_sync().map_err(|e| {
            writer.poison(&e);
            e
        })
    }

    /// Makes the next sync fail after its bytes reach the file.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&self) {
        self.writer.lock().fail_next_sync = true;
    }

    /// Reads the file and groups operations by transaction.
    ///
    /// Also returns the length of the readable prefix.
    fn recover(path: &Path) -> GachaResult<(Recovery, u64, u64)> {
        let file = File::open(path).map_err(storage("failed to open journal for recovery"))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(storage("failed to read journal header"))?;
        if &magic != JOURNAL_MAGIC {
            return Err(GachaError::Storage(format!(
                "{} is not a journal file",
                path.display()
            )));
        }
        let mut version = [0u8; 4];
        reader
            .read_exact(&mut version)
            .map_err(storage("failed to read journal version"))?;
        let version = u32::from_le_bytes(version);
        if version != JOURNAL_VERSION {
            return Err(GachaError::Storage(format!(
                "unsupported journal version {version}"
            )));
        }
        let mut base = [0u8; 8];
        reader
            .read_exact(&mut base)
            .map_err(storage("failed to read journal base LSN"))?;
        let mut next_lsn = u64::from_le_bytes(base);

        let mut open: HashMap<u64, Vec<JournalOp>> = HashMap::new();
        let mut recovery = Recovery::default();
        let mut valid_len = HEADER_LEN;

        while let Some(record) = read_record(&mut reader) {
            valid_len += record.encoded_len();
            next_lsn = next_lsn.max(record.lsn + 1);
            match record.record_type {
                RecordType::Begin => {
                    open.insert(record.txn_id, Vec::new());
                }
                RecordType::Operation => {
                    let Some(ops) = open.get_mut(&record.txn_id) else {
                        continue;
                    };
                    match serde_json::from_slice(&record.payload) {
                        Ok(op) => ops.push(op),
                        Err(e) => {
                            tracing::warn!(lsn = record.lsn, error = %e, "undecodable journal op");
                            open.remove(&record.txn_id);
                            recovery.discarded += 1;
                        }
                    }
                }
                RecordType::Commit => {
                    if let Some(ops) = open.remove(&record.txn_id) {
                        recovery.committed.push(ops);
                    }
                }
                RecordType::Rollback => {
                    if open.remove(&record.txn_id).is_some() {
                        recovery.discarded += 1;
                    }
                }
            }
        }
        recovery.discarded += open.len();

        Ok((recovery, next_lsn, valid_len))
    }
}

fn write_header(out: &mut BufWriter<File>, base_lsn: u64) -> GachaResult<()> {
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    header.extend_from_slice(JOURNAL_MAGIC);
    header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    header.extend_from_slice(&base_lsn.to_le_bytes());
    out.write_all(&header).map_err(storage("failed to write journal header"))
}

fn append_record(
    writer: &mut Writer,
    txn_id: u64,
    record_type: RecordType,
    payload: &[u8],
) -> GachaResult<u64> {
    let lsn = writer.next_lsn;
    let len = u32::try_from(payload.len())
        .map_err(|_| GachaError::Storage("journal payload too large".to_string()))?;

    let mut buf = Vec::with_capacity(RECORD_HEAD_LEN + payload.len() + 4);
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.extend_from_slice(&txn_id.to_le_bytes());
    buf.push(record_type as u8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    writer
        .file
        .write_all(&buf)
        .map_err(storage("journal write failed"))?;
    writer.next_lsn += 1;
    writer.len += buf.len() as u64;
    Ok(lsn)
}

/// Reads one record; `None` at end of file or at the first damaged record.
fn read_record(reader: &mut impl Read) -> Option<RawRecord> {
    let mut head = [0u8; RECORD_HEAD_LEN];
    reader.read_exact(&mut head).ok()?;
    let lsn = u64::from_le_bytes(head[0..8].try_into().ok()?);
    let txn_id = u64::from_le_bytes(head[8..16].try_into().ok()?);
    let type_byte = head[16];
    let len = u32::from_le_bytes(head[17..21].try_into().ok()?) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).ok()?;
    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).ok()?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&head);
    hasher.update(&payload);
    if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
        tracing::warn!(lsn, "journal CRC mismatch, ignoring tail");
        return None;
    }

    Some(RawRecord {
        lsn,
        txn_id,
        record_type: RecordType::from_u8(type_byte)?,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{LootTable, SelectionMode};
    use std::fs;

    fn temp_journal_path() -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("test_journal_{id}.gjnl"))
    }

    fn account_op(player_id: u64, currency: u64) -> JournalOp {
        let mut account = Account::new(player_id, 4);
        account.currency = currency;
        JournalOp::Account(account)
    }

    #[test]
    fn test_create_writes_header() {
        let path = temp_journal_path();
        {
            let (_journal, recovery) = Journal::open(&path).unwrap();
            assert!(recovery.committed.is_empty());
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_committed_transactions_recovered_in_order() {
        let path = temp_journal_path();
        {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.write_transaction(&[account_op(1, 10)]).unwrap();
            let table = LootTable::new(3, SelectionMode::SinglePick);
            journal
                .write_transaction(&[
                    account_op(1, 5),
                    JournalOp::Pity(PityLedger::initialize(1, &table)),
                ])
                .unwrap();
        }
        {
            let (_journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery.committed.len(), 2);
            assert_eq!(recovery.committed[0], vec![account_op(1, 10)]);
            assert_eq!(recovery.committed[1].len(), 2);
            assert_eq!(recovery.discarded, 0);
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rolled_back_and_dropped_transactions_discarded() {
        let path = temp_journal_path();
        {
            let (journal, _) = Journal::open(&path).unwrap();
            let mut txn = journal.begin().unwrap();
            txn.push(&account_op(1, 999)).unwrap();
            txn.rollback().unwrap();

            let mut txn = journal.begin().unwrap();
            txn.push(&account_op(2, 999)).unwrap();
            drop(txn);

            journal.write_transaction(&[account_op(3, 1)]).unwrap();
        }
        {
            let (_journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery.committed, vec![vec![account_op(3, 1)]]);
            assert_eq!(recovery.discarded, 2);
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let path = temp_journal_path();
        {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.write_transaction(&[account_op(1, 10)]).unwrap();
            journal.write_transaction(&[account_op(1, 20)]).unwrap();
        }
        // Chop the last few bytes off the final COMMIT record.
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);
        {
            let (_journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery.committed, vec![vec![account_op(1, 10)]]);
            assert_eq!(recovery.discarded, 1);
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_failed_sync_is_never_replayed() {
        let path = temp_journal_path();
        {
            let (journal, _) = Journal::open(&path).unwrap();
            journal.write_transaction(&[account_op(1, 10)]).unwrap();
            let synced = fs::metadata(&path).unwrap().len();

            journal.fail_next_sync();
            let failed = journal.write_transaction(&[account_op(1, 999)]);
            assert!(matches!(failed, Err(GachaError::Storage(_))));
            // The COMMIT bytes reached the file before the sync failed.
            assert_eq!(fs::metadata(&path).unwrap().len(), synced);

            let after = journal.write_transaction(&[account_op(1, 20)]);
            assert!(matches!(after, Err(GachaError::Storage(msg)) if msg.contains("poisoned")));
            assert!(journal.begin().is_err());
        }
        {
            let (journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery.committed, vec![vec![account_op(1, 10)]]);
            assert_eq!(recovery.discarded, 0);
            journal.write_transaction(&[account_op(1, 30)]).unwrap();
        }
        {
            let (_journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(
                recovery.committed,
                vec![vec![account_op(1, 10)], vec![account_op(1, 30)]]
            );
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_compact_keeps_only_snapshot() {
        let path = temp_journal_path();
        {
            let (journal, _) = Journal::open(&path).unwrap();
            for i in 0..20 {
                journal.write_transaction(&[account_op(1, i)]).unwrap();
            }
            journal.compact(&[account_op(1, 19)]).unwrap();
            journal.write_transaction(&[account_op(1, 25)]).unwrap();
        }
        {
            let (journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(
                recovery.committed,
                vec![vec![account_op(1, 19)], vec![account_op(1, 25)]]
            );
            // LSNs keep growing across compaction.
            assert!(journal.begin().unwrap().id() > 60);
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_foreign_file_rejected() {
        let path = temp_journal_path();
        fs::write(&path, b"NOPE0000000000000000").unwrap();
        assert!(matches!(Journal::open(&path), Err(GachaError::Storage(_))));
        fs::remove_file(&path).ok();
    }
}
