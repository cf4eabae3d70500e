//! Snapshot transactions and the interned object handle table.
//!
//! A snapshot transaction mirrors the full transaction semantics over a
//! private in-memory store, but never publishes anywhere: `commit` and
//! `rollback` always fail while the snapshot stays usable. Snapshots are
//! seeded with the database's meta area (format version, schema catalog,
//! allocation counters) so migration and object creation work inside
//! them, and they persist for as long as the caller keeps them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_error::{Result, StrataError};
use strata_kv::SnapshotKv;
use strata_types::{keys, ObjId};

use crate::tx::Transaction;

/// A lightweight per-transaction object handle.
///
/// The handle does not pin any object state; it exists so that hosts can
/// attach identity semantics to "the object with this id in this
/// transaction". The referenced object need not exist; field access
/// through a handle of a missing object fails with `DeletedObject` like
/// any other access.
#[derive(Debug)]
pub struct ObjHandle {
    id: ObjId,
}

impl ObjHandle {
    /// The object id this handle stands for.
    #[must_use]
    pub fn id(&self) -> ObjId {
        self.id
    }
}

/// Interned handle table with weak semantics: for any id, at most one
/// live [`ObjHandle`] exists per transaction, and handles nobody holds
/// anymore may be collected.
#[derive(Default)]
pub struct HandleTable {
    inner: Mutex<HashMap<ObjId, Weak<ObjHandle>>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, id: ObjId) -> Arc<ObjHandle> {
        let mut table = self.inner.lock();
        if let Some(handle) = table.get(&id).and_then(Weak::upgrade) {
            return handle;
        }
        // Drop entries whose handles have been collected while we are
        // here; the table stays proportional to the live handle count.
        table.retain(|_, weak| weak.strong_count() > 0);
        let handle = Arc::new(ObjHandle { id });
        table.insert(id, Arc::downgrade(&handle));
        handle
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }

    #[cfg(test)]
    fn live_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Transaction {
    /// The interned handle for `id`: the same `Arc` is returned for the
    /// same id for as long as someone holds it.
    #[must_use]
    pub fn handle(&self, id: ObjId) -> Arc<ObjHandle> {
        self.handles.get_or_create(id)
    }

    /// Create an initially empty in-memory snapshot transaction bound to
    /// the same target schema, registry and listeners.
    ///
    /// The snapshot starts with this transaction's meta area (schema
    /// catalog, format version, allocation counters) and no objects.
    /// Its `commit` and `rollback` always fail.
    pub fn create_snapshot_transaction(&self) -> Result<Transaction> {
        self.check_usable()?;
        let pairs = self
            .kv_get_range(&[keys::META_PREFIX], Some(keys::META_AREA_END), false)?
            .collect();
        Ok(Transaction {
            kv: Box::new(SnapshotKv::seeded(pairs)),
            registry: Arc::clone(&self.registry),
            catalog: self.catalog.clone(),
            schema: Arc::clone(&self.schema),
            listeners: self.listeners.clone(),
            stale: std::cell::Cell::new(false),
            read_only: false,
            is_snapshot: true,
            handles: HandleTable::new(),
        })
    }

    /// Delete every object in this snapshot transaction and reset it to
    /// its initial state. The schema catalog and the rest of the meta
    /// area are preserved.
    pub fn reset(&self) -> Result<()> {
        if !self.is_snapshot {
            return Err(StrataError::Unsupported {
                op: "reset of a non-snapshot transaction",
            });
        }
        self.check_usable()?;
        self.kv_remove_range(keys::META_AREA_END, None)?;
        self.handles.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ObjId {
        ObjId::new(strata_types::StorageId::new(100).unwrap(), n).unwrap()
    }

    #[test]
    fn handles_are_interned() {
        let table = HandleTable::new();
        let a = table.get_or_create(id(1));
        let b = table.get_or_create(id(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), id(1));
    }

    #[test]
    fn unreferenced_handles_are_collectable() {
        let table = HandleTable::new();
        {
            let _handle = table.get_or_create(id(1));
            assert_eq!(table.live_count(), 1);
        }
        assert_eq!(table.live_count(), 0);
        // A fresh request after collection re-creates the handle.
        let again = table.get_or_create(id(1));
        assert_eq!(again.id(), id(1));
    }
}
