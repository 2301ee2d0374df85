//! Durable retry state.
//!
//! Three tables share one redb file:
//!
//! - `pending`: submitted proofs awaiting their on-chain outcome, keyed by tx hash
//! - `deferred`: proofs rejected for a transient reason, keyed by the record itself
//! - `failed`: proofs dropped after a fatal error, kept for the operator
//!
//! Every key starts with the big-endian `(source, dest)` chain ids so a
//! direction's entries are contiguous. Moving a record between `pending` and
//! `deferred` happens in one write transaction, so a request is never present
//! in both.

use log::{debug, info};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use crate::{
    codec::{Sink, Source},
    types::{Direction, RetryRecord},
    Error, Result,
};

const PENDING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending");
const DEFERRED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("deferred");
const FAILED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("failed");

pub const DEFAULT_LIST_LIMIT: usize = 1000;

const PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Pending,
    Deferred,
    Failed,
}

impl Namespace {
    fn table(self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        match self {
            Namespace::Pending => PENDING,
            Namespace::Deferred => DEFERRED,
            Namespace::Failed => FAILED,
        }
    }
}

impl std::str::FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Namespace::Pending),
            "deferred" => Ok(Namespace::Deferred),
            "failed" => Ok(Namespace::Failed),
            other => Err(Error::Config(format!("Unknown namespace: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub direction: Direction,
    pub tx_hash: Vec<u8>,
    pub record: RetryRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredEntry {
    pub direction: Direction,
    pub record: RetryRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub direction: Direction,
    pub record: RetryRecord,
    pub reason: String,
}

fn direction_prefix(direction: Direction) -> [u8; PREFIX_LEN] {
    let mut prefix = [0u8; PREFIX_LEN];
    prefix[..8].copy_from_slice(&direction.source.to_be_bytes());
    prefix[8..].copy_from_slice(&direction.dest.to_be_bytes());
    prefix
}

fn make_key(direction: Direction, payload: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_LEN + payload.len());
    key.extend_from_slice(&direction_prefix(direction));
    key.extend_from_slice(payload);
    key
}

fn split_key(key: &[u8]) -> Result<(Direction, &[u8])> {
    if key.len() < PREFIX_LEN {
        return Err(Error::Decode(format!("store key too short: {} bytes", key.len())));
    }
    let mut source = [0u8; 8];
    let mut dest = [0u8; 8];
    source.copy_from_slice(&key[..8]);
    dest.copy_from_slice(&key[8..PREFIX_LEN]);
    Ok((
        Direction::new(u64::from_be_bytes(source), u64::from_be_bytes(dest)),
        &key[PREFIX_LEN..],
    ))
}

fn encode_failed(record: &RetryRecord, reason: &str) -> Vec<u8> {
    let mut sink = Sink::new();
    record.encode_to(&mut sink);
    sink.write_string(reason);
    sink.into_bytes()
}

pub struct RetryStore {
    db: Database,
    lock: Mutex<()>,
    list_limit: usize,
}

impl RetryStore {
    pub fn open<P: AsRef<Path>>(path: P, list_limit: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("create {}: {}", parent.display(), e)))?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(PENDING)?;
            txn.open_table(DEFERRED)?;
            txn.open_table(FAILED)?;
        }
        txn.commit()?;

        info!("Opened retry store at {}", path.display());
        Ok(Self {
            db,
            lock: Mutex::new(()),
            list_limit: list_limit.max(1),
        })
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<()> {
        let _guard = self.guard();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ns.table())?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &[u8]) -> Result<bool> {
        let _guard = self.guard();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(ns.table())?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    fn list_raw(&self, ns: Namespace) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let _guard = self.guard();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ns.table())?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            out.push((k.value().to_vec(), v.value().to_vec()));
            if out.len() >= self.list_limit {
                debug!("Listing of {:?} truncated at {} entries", ns, self.list_limit);
                break;
            }
        }
        Ok(out)
    }

    pub fn count(&self, ns: Namespace) -> Result<u64> {
        let _guard = self.guard();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ns.table())?;
        Ok(table.len()?)
    }

    pub fn put_pending(&self, direction: Direction, tx_hash: &[u8], record: &RetryRecord) -> Result<()> {
        self.put(Namespace::Pending, &make_key(direction, tx_hash), &record.to_bytes())
    }

    pub fn delete_pending(&self, direction: Direction, tx_hash: &[u8]) -> Result<bool> {
        self.delete(Namespace::Pending, &make_key(direction, tx_hash))
    }

    pub fn list_pending(&self) -> Result<Vec<PendingEntry>> {
        self.list_raw(Namespace::Pending)?
            .into_iter()
            .map(|(k, v)| {
                let (direction, tx_hash) = split_key(&k)?;
                Ok(PendingEntry {
                    direction,
                    tx_hash: tx_hash.to_vec(),
                    record: RetryRecord::from_bytes(&v)?,
                })
            })
            .collect()
    }

    pub fn put_deferred(&self, direction: Direction, record: &RetryRecord) -> Result<()> {
        let bytes = record.to_bytes();
        self.put(Namespace::Deferred, &make_key(direction, &bytes), &bytes)
    }

    pub fn delete_deferred(&self, direction: Direction, record: &RetryRecord) -> Result<bool> {
        self.delete(Namespace::Deferred, &make_key(direction, &record.to_bytes()))
    }

    pub fn list_deferred(&self) -> Result<Vec<DeferredEntry>> {
        self.list_raw(Namespace::Deferred)?
            .into_iter()
            .map(|(k, _)| {
                let (direction, payload) = split_key(&k)?;
                Ok(DeferredEntry {
                    direction,
                    record: RetryRecord::from_bytes(payload)?,
                })
            })
            .collect()
    }

    pub fn put_failed(&self, direction: Direction, record: &RetryRecord, reason: &str) -> Result<()> {
        let key = make_key(direction, &record.to_bytes());
        self.put(Namespace::Failed, &key, &encode_failed(record, reason))
    }

    pub fn list_failed(&self) -> Result<Vec<FailedEntry>> {
        self.list_raw(Namespace::Failed)?
            .into_iter()
            .map(|(k, v)| {
                let (direction, _) = split_key(&k)?;
                let mut source = Source::new(&v);
                let record = RetryRecord::decode_from(&mut source)?;
                let reason = source.next_string()?;
                Ok(FailedEntry { direction, record, reason })
            })
            .collect()
    }

    /// Replaces a deferred record with a pending one after a resubmission.
    pub fn promote(&self, direction: Direction, record: &RetryRecord, tx_hash: &[u8]) -> Result<()> {
        let bytes = record.to_bytes();
        let _guard = self.guard();
        let txn = self.db.begin_write()?;
        {
            let mut deferred = txn.open_table(DEFERRED)?;
            deferred.remove(make_key(direction, &bytes).as_slice())?;
            let mut pending = txn.open_table(PENDING)?;
            pending.insert(make_key(direction, tx_hash).as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Turns a pending entry whose transaction failed back into a deferred
    /// record. Returns false when the pending entry no longer exists.
    pub fn demote(&self, direction: Direction, tx_hash: &[u8]) -> Result<bool> {
        let _guard = self.guard();
        let txn = self.db.begin_write()?;
        let moved = {
            let mut pending = txn.open_table(PENDING)?;
            let removed = pending
                .remove(make_key(direction, tx_hash).as_slice())?
                .map(|v| v.value().to_vec());
            match removed {
                Some(bytes) => {
                    // validate before persisting it as a key
                    RetryRecord::from_bytes(&bytes)?;
                    let mut deferred = txn.open_table(DEFERRED)?;
                    deferred.insert(make_key(direction, &bytes).as_slice(), bytes.as_slice())?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(moved)
    }

    /// Deletes deferred records of `direction` that fell more than `window`
    /// blocks behind `current_height`. Returns the number removed.
    pub fn purge_expired(&self, direction: Direction, current_height: u32, window: u32) -> Result<usize> {
        let prefix = direction_prefix(direction);
        let _guard = self.guard();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DEFERRED)?;
            let mut stale = Vec::new();
            for entry in table.range(prefix.as_slice()..)? {
                let (k, _) = entry?;
                let key = k.value();
                if !key.starts_with(&prefix) {
                    break;
                }
                let record = RetryRecord::from_bytes(&key[PREFIX_LEN..])?;
                if current_height.saturating_sub(record.height) > window {
                    stale.push(key.to_vec());
                }
            }
            for key in &stale {
                table.remove(key.as_slice())?;
            }
            stale.len()
        };
        txn.commit()?;
        if removed > 0 {
            info!(
                "[{}] purged {} deferred records older than {} blocks (current height {})",
                direction, removed, window, current_height
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(limit: usize) -> (TempDir, RetryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RetryStore::open(dir.path().join("retry.redb"), limit).unwrap();
        (dir, store)
    }

    fn record(height: u32, key: &str) -> RetryRecord {
        RetryRecord {
            tx_hash: vec![0xaa; 32],
            height,
            key: key.to_string(),
        }
    }

    const DIR: Direction = Direction { source: 3, dest: 0 };

    #[test]
    fn test_deferred_put_is_idempotent() {
        let (_dir, store) = open_store(DEFAULT_LIST_LIMIT);
        store.put_deferred(DIR, &record(10, "k1")).unwrap();
        store.put_deferred(DIR, &record(10, "k1")).unwrap();
        store.put_deferred(DIR, &record(11, "k2")).unwrap();

        let entries = store.list_deferred().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.direction == DIR));

        assert!(store.delete_deferred(DIR, &record(10, "k1")).unwrap());
        assert!(!store.delete_deferred(DIR, &record(10, "k1")).unwrap());
        assert_eq!(store.count(Namespace::Deferred).unwrap(), 1);
    }

    #[test]
    fn test_pending_roundtrip() {
        let (_dir, store) = open_store(DEFAULT_LIST_LIMIT);
        store.put_pending(DIR, &[1, 2, 3], &record(5, "abc")).unwrap();

        let pending = store.list_pending().unwrap();
        assert_eq!(
            pending,
            vec![PendingEntry { direction: DIR, tx_hash: vec![1, 2, 3], record: record(5, "abc") }]
        );
        assert!(store.delete_pending(DIR, &[1, 2, 3]).unwrap());
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_listing_is_capped() {
        let (_dir, store) = open_store(10);
        for h in 0..25 {
            store.put_deferred(DIR, &record(h, "k")).unwrap();
        }
        assert_eq!(store.count(Namespace::Deferred).unwrap(), 25);
        assert_eq!(store.list_deferred().unwrap().len(), 10);
    }

    #[test]
    fn test_promote_and_demote_are_exclusive() {
        let (_dir, store) = open_store(DEFAULT_LIST_LIMIT);
        let r = record(100, "abc123");
        store.put_deferred(DIR, &r).unwrap();

        store.promote(DIR, &r, &[9; 32]).unwrap();
        assert!(store.list_deferred().unwrap().is_empty());
        assert_eq!(store.list_pending().unwrap()[0].record, r);

        assert!(store.demote(DIR, &[9; 32]).unwrap());
        assert!(store.list_pending().unwrap().is_empty());
        assert_eq!(store.list_deferred().unwrap()[0].record, r);

        assert!(!store.demote(DIR, &[9; 32]).unwrap());
    }

    #[test]
    fn test_purge_expired_respects_window_and_direction() {
        let (_dir, store) = open_store(DEFAULT_LIST_LIMIT);
        let other = Direction::new(0, 3);
        store.put_deferred(DIR, &record(100, "old")).unwrap();
        store.put_deferred(DIR, &record(120, "edge")).unwrap();
        store.put_deferred(DIR, &record(160, "fresh")).unwrap();
        store.put_deferred(other, &record(100, "other")).unwrap();

        // 170 - 120 == 50 is still inside the window
        assert_eq!(store.purge_expired(DIR, 170, 50).unwrap(), 1);

        let mut keys: Vec<_> = store.list_deferred().unwrap().into_iter().map(|e| e.record.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["edge", "fresh", "other"]);

        assert_eq!(store.purge_expired(DIR, 171, 50).unwrap(), 1);
        assert_eq!(store.count(Namespace::Deferred).unwrap(), 2);
    }

    #[test]
    fn test_failed_records_keep_reason() {
        let (_dir, store) = open_store(DEFAULT_LIST_LIMIT);
        store.put_failed(DIR, &record(7, "zz"), "hex decode: odd length").unwrap();
        let failed = store.list_failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].record.height, 7);
        assert_eq!(failed[0].reason, "hex decode: odd length");
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("retry.redb");
        {
            let store = RetryStore::open(&path, DEFAULT_LIST_LIMIT).unwrap();
            store.put_deferred(DIR, &record(1, "persist")).unwrap();
            store.put_pending(DIR, &[4; 32], &record(2, "pending")).unwrap();
        }
        let store = RetryStore::open(&path, DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(store.list_deferred().unwrap()[0].record.key, "persist");
        assert_eq!(store.list_pending().unwrap()[0].record.key, "pending");
    }

    #[test]
    fn test_namespace_parse() {
        assert_eq!("failed".parse::<Namespace>().unwrap(), Namespace::Failed);
        assert!("check".parse::<Namespace>().is_err());
    }
}
