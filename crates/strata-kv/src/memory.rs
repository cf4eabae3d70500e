//! In-memory `BTreeMap`-backed store, transactions, and the snapshot
//! store used by snapshot transactions.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strata_error::{Result, StrataError};

use crate::traits::{KvStore, KvTransaction};
use crate::{KvPair, RangeIter};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

fn scan(map: &Map, lo: &[u8], hi: Option<&[u8]>, reverse: bool) -> RangeIter {
    let upper = match hi {
        Some(hi) => Bound::Excluded(hi.to_vec()),
        None => Bound::Unbounded,
    };
    let mut pairs: Vec<KvPair> = map
        .range((Bound::Included(lo.to_vec()), upper))
        .map(|(k, v)| KvPair::new(k.clone(), v.clone()))
        .collect();
    if reverse {
        pairs.reverse();
    }
    RangeIter::new(pairs)
}

fn clear_range(map: &mut Map, lo: &[u8], hi: Option<&[u8]>) {
    let keys: Vec<Vec<u8>> = match hi {
        Some(hi) => map
            .range((Bound::Included(lo.to_vec()), Bound::Excluded(hi.to_vec())))
            .map(|(k, _)| k.clone())
            .collect(),
        None => map
            .range((Bound::Included(lo.to_vec()), Bound::Unbounded))
            .map(|(k, _)| k.clone())
            .collect(),
    };
    for key in keys {
        map.remove(&key);
    }
}

/// Shared in-memory store. Cloning yields another handle to the same
/// underlying map; distinct transactions may run on distinct threads.
///
/// This is test and embedding scaffolding: transactions copy the whole
/// map at begin and publish it back at commit (last committer wins, no
/// conflict detection). Production deployments provide their own
/// [`KvTransaction`] implementation with real isolation.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<Map>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a transaction holding a private copy of the current state.
    #[must_use]
    pub fn begin(&self) -> MemoryKvTransaction {
        MemoryKvTransaction {
            store: Arc::clone(&self.inner),
            working: Mutex::new(self.inner.read().clone()),
            state: Mutex::new(TxState::Active),
        }
    }

    /// Number of keys currently committed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the committed state is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of the committed state, for assertions in tests.
    #[must_use]
    pub fn dump(&self) -> Vec<KvPair> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| KvPair::new(k.clone(), v.clone()))
            .collect()
    }
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("keys", &self.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Finished,
}

/// A transaction over [`MemoryKvStore`].
pub struct MemoryKvTransaction {
    store: Arc<RwLock<Map>>,
    working: Mutex<Map>,
    state: Mutex<TxState>,
}

impl MemoryKvTransaction {
    fn check_active(&self) -> Result<()> {
        if *self.state.lock() == TxState::Active {
            Ok(())
        } else {
            Err(StrataError::StaleTransaction)
        }
    }
}

impl KvStore for MemoryKvTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_active()?;
        Ok(self.working.lock().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_active()?;
        self.working.lock().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_active()?;
        self.working.lock().remove(key);
        Ok(())
    }

    fn remove_range(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<()> {
        self.check_active()?;
        clear_range(&mut self.working.lock(), lo, hi);
        Ok(())
    }

    fn get_range(&self, lo: &[u8], hi: Option<&[u8]>, reverse: bool) -> Result<RangeIter> {
        self.check_active()?;
        Ok(scan(&self.working.lock(), lo, hi, reverse))
    }
}

impl KvTransaction for MemoryKvTransaction {
    fn commit(&self) -> Result<()> {
        self.check_active()?;
        *self.state.lock() = TxState::Finished;
        let working = std::mem::take(&mut *self.working.lock());
        *self.store.write() = working;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.check_active()?;
        *self.state.lock() = TxState::Finished;
        self.working.lock().clear();
        Ok(())
    }

    fn is_stale(&self) -> bool {
        *self.state.lock() == TxState::Finished
    }
}

/// The in-memory store behind a snapshot transaction.
///
/// Reads and writes behave exactly like a regular store; `commit` and
/// `rollback` always fail because a snapshot never publishes anywhere.
#[derive(Default)]
pub struct SnapshotKv {
    map: Mutex<Map>,
}

impl SnapshotKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the snapshot with pre-existing pairs (schema meta-data).
    #[must_use]
    pub fn seeded(pairs: Vec<KvPair>) -> Self {
        let snapshot = Self::new();
        {
            let mut map = snapshot.map.lock();
            for pair in pairs {
                map.insert(pair.key, pair.value);
            }
        }
        snapshot
    }
}

impl KvStore for SnapshotKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.map.lock().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn remove_range(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<()> {
        clear_range(&mut self.map.lock(), lo, hi);
        Ok(())
    }

    fn get_range(&self, lo: &[u8], hi: Option<&[u8]>, reverse: bool) -> Result<RangeIter> {
        Ok(scan(&self.map.lock(), lo, hi, reverse))
    }
}

impl KvTransaction for SnapshotKv {
    fn commit(&self) -> Result<()> {
        Err(StrataError::Unsupported { op: "commit on a snapshot transaction" })
    }

    fn rollback(&self) -> Result<()> {
        Err(StrataError::Unsupported { op: "rollback on a snapshot transaction" })
    }

    fn is_stale(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        tx.put(vec![1], vec![10]).unwrap();
        assert_eq!(tx.get(&[1]).unwrap(), Some(vec![10]));
        tx.remove(&[1]).unwrap();
        assert_eq!(tx.get(&[1]).unwrap(), None);
    }

    #[test]
    fn commit_publishes_and_kills_handle() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        tx.put(vec![1], vec![10]).unwrap();
        assert!(store.is_empty());
        tx.commit().unwrap();
        assert_eq!(store.len(), 1);
        assert!(tx.is_stale());
        assert!(matches!(
            tx.get(&[1]),
            Err(StrataError::StaleTransaction)
        ));
    }

    #[test]
    fn rollback_discards() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        tx.put(vec![1], vec![10]).unwrap();
        tx.rollback().unwrap();
        assert!(store.is_empty());
        assert!(tx.is_stale());
    }

    #[test]
    fn transaction_sees_own_writes_in_scans() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        tx.put(vec![2], vec![]).unwrap();
        tx.put(vec![1], vec![]).unwrap();
        tx.put(vec![3], vec![]).unwrap();
        let keys: Vec<Vec<u8>> = tx
            .get_range(&[1], Some(&[3]), false)
            .unwrap()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![vec![1], vec![2]]);
    }

    #[test]
    fn reverse_scan() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        for k in 1u8..=3 {
            tx.put(vec![k], vec![]).unwrap();
        }
        let keys: Vec<Vec<u8>> = tx
            .get_range(&[0], None, true)
            .unwrap()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![vec![3], vec![2], vec![1]]);
    }

    #[test]
    fn scan_is_snapshot_of_creation_time() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        tx.put(vec![1], vec![]).unwrap();
        let iter = tx.get_range(&[0], None, false).unwrap();
        tx.put(vec![2], vec![]).unwrap();
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn remove_range_bounds() {
        let store = MemoryKvStore::new();
        let tx = store.begin();
        for k in 1u8..=5 {
            tx.put(vec![k], vec![]).unwrap();
        }
        tx.remove_range(&[2], Some(&[4])).unwrap();
        let keys: Vec<Vec<u8>> = tx
            .get_range(&[0], None, false)
            .unwrap()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec![vec![1], vec![4], vec![5]]);
    }

    #[test]
    fn snapshot_commit_rollback_fail() {
        let snapshot = SnapshotKv::new();
        snapshot.put(vec![1], vec![2]).unwrap();
        assert!(matches!(
            snapshot.commit(),
            Err(StrataError::Unsupported { op: "commit on a snapshot transaction" })
        ));
        assert!(matches!(
            snapshot.rollback(),
            Err(StrataError::Unsupported { op: "rollback on a snapshot transaction" })
        ));
        // Still usable afterwards.
        assert_eq!(snapshot.get(&[1]).unwrap(), Some(vec![2]));
    }
}
