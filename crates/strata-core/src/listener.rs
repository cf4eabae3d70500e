//! Mutation listeners and their dispatch.
//!
//! Listeners are registered per transaction (the database copies its own
//! registrations into every transaction it creates). Callbacks fire after
//! every key update of the triggering mutation has been applied, on the
//! mutating thread. A listener that returns an error aborts the mutation
//! and poisons the transaction: the error propagates to the caller and
//! every subsequent operation fails with `StaleTransaction`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_types::{ObjId, StorageId, Value};

use crate::tx::Transaction;

/// Callbacks observing object mutations within one transaction.
///
/// All methods default to doing nothing, so implementations override only
/// what they care about.
pub trait TransactionListener {
    /// An object was created.
    fn on_create(&self, tx: &Transaction, id: ObjId) -> Result<()> {
        let _ = (tx, id);
        Ok(())
    }

    /// An object was deleted. Fires per cascade step, after the step's
    /// keys are gone and before the next step is dequeued.
    fn on_delete(&self, tx: &Transaction, id: ObjId) -> Result<()> {
        let _ = (tx, id);
        Ok(())
    }

    /// A field changed. For simple fields both `old` and `new` are
    /// present; for collection mutations the absent side marks an added
    /// or removed element (for maps, the values are the entry values
    /// under the mutated key).
    fn on_change(
        &self,
        tx: &Transaction,
        id: ObjId,
        field_id: StorageId,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<()> {
        let _ = (tx, id, field_id, old, new);
        Ok(())
    }

    /// An object was migrated between schema versions. `old_values` holds
    /// the object's simple and counter field values as they were under
    /// the old schema, keyed by field name.
    fn on_schema_change(
        &self,
        tx: &Transaction,
        id: ObjId,
        old_version: u32,
        new_version: u32,
        old_values: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let _ = (tx, id, old_version, new_version, old_values);
        Ok(())
    }

    /// Whether this listener also observes snapshot transactions.
    /// Defaults to true; snapshot transactions skip listeners that
    /// return false.
    fn snapshot_transactions(&self) -> bool {
        true
    }
}

/// One registered listener plus its optional reference-path filter.
#[derive(Clone)]
pub(crate) struct ListenerRegistration {
    pub listener: Arc<dyn TransactionListener>,
    /// Reference-field hops; when nonempty, a callback for object `x`
    /// fires only if some object reaches `x` through these hops in order.
    pub path: Vec<StorageId>,
}

impl Transaction {
    /// Register a listener for every mutation in this transaction.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.borrow_mut().push(ListenerRegistration {
            listener,
            path: Vec::new(),
        });
    }

    /// Register a listener filtered by a reference path.
    ///
    /// Each storage id in `path` must name an indexed reference field or
    /// sub-field in the transaction's schema; the hops are followed from
    /// a root object down to the changed object.
    pub fn add_listener_with_path(
        &self,
        listener: Arc<dyn TransactionListener>,
        path: Vec<StorageId>,
    ) -> Result<()> {
        self.validate_listener_path(&path)?;
        self.listeners
            .borrow_mut()
            .push(ListenerRegistration { listener, path });
        Ok(())
    }

    pub(crate) fn validate_listener_path(&self, path: &[StorageId]) -> Result<()> {
        for &field_id in path {
            if !self.is_indexed_reference(field_id) {
                return Err(StrataError::InvalidPath {
                    detail: format!(
                        "storage id {field_id} is not an indexed reference field"
                    ),
                });
            }
        }
        Ok(())
    }

    fn is_indexed_reference(&self, field_id: StorageId) -> bool {
        use strata_schema::Field;
        for object_type in self.schema.object_types() {
            for field in &object_type.fields {
                if let Field::Simple(f) = field {
                    if f.storage_id == field_id {
                        return f.element.is_reference() && f.indexed;
                    }
                }
                for sub in field.sub_fields() {
                    if sub.storage_id == field_id {
                        return sub.element.is_reference() && sub.indexed;
                    }
                }
            }
        }
        false
    }

    /// Whether any root object reaches `target` through `path`, walking
    /// the reference indexes backwards from the target.
    pub(crate) fn path_reaches(&self, path: &[StorageId], target: ObjId) -> Result<bool> {
        let mut current: BTreeSet<ObjId> = BTreeSet::new();
        current.insert(target);
        for &field_id in path.iter().rev() {
            let mut next = BTreeSet::new();
            for &id in &current {
                next.extend(self.referrers_via(field_id, id)?);
            }
            if next.is_empty() {
                return Ok(false);
            }
            current = next;
        }
        Ok(true)
    }

    fn dispatch<F>(&self, target: ObjId, invoke: F) -> Result<()>
    where
        F: Fn(&dyn TransactionListener) -> Result<()>,
    {
        // Clone the registrations out so listeners may register further
        // listeners (or run transaction operations) without re-entering
        // the registration list borrow.
        let registrations: Vec<ListenerRegistration> = self.listeners.borrow().clone();
        for registration in registrations {
            if self.is_snapshot && !registration.listener.snapshot_transactions() {
                continue;
            }
            if !registration.path.is_empty() && !self.path_reaches(&registration.path, target)? {
                continue;
            }
            if let Err(err) = invoke(registration.listener.as_ref()) {
                // A failing listener aborts the mutation and poisons the
                // transaction; no further KV calls are possible.
                self.stale.set(true);
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn notify_create(&self, id: ObjId) -> Result<()> {
        self.dispatch(id, |listener| listener.on_create(self, id))
    }

    pub(crate) fn notify_delete(&self, id: ObjId) -> Result<()> {
        self.dispatch(id, |listener| listener.on_delete(self, id))
    }

    pub(crate) fn notify_change(
        &self,
        id: ObjId,
        field_id: StorageId,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<()> {
        self.dispatch(id, |listener| listener.on_change(self, id, field_id, old, new))
    }

    pub(crate) fn notify_schema_change(
        &self,
        id: ObjId,
        old_version: u32,
        new_version: u32,
        old_values: &BTreeMap<String, Value>,
    ) -> Result<()> {
        self.dispatch(id, |listener| {
            listener.on_schema_change(self, id, old_version, new_version, old_values)
        })
    }
}
