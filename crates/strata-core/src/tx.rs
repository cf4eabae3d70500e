//! The transaction: object lifecycle, simple field and counter access,
//! and the cascading delete worklist.
//!
//! A transaction is a single-threaded unit of work over one KV
//! transaction handle. All state is carried explicitly; interior
//! mutability covers the listener list and the staleness flag. Every
//! mutation updates content keys first, then index entries, and fires
//! listener callbacks only after all key updates have been applied.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_kv::{KvTransaction, RangeIter};
use strata_schema::{
    CounterField, DeleteAction, Field, ListField, MapField, ObjectType, Schema, SchemaCatalog,
    SetField, SimpleField,
};
use strata_types::{
    key_after_prefix, keys, ByteReader, ByteWriter, ObjId, StorageId, TypeRegistry, Value,
    OBJ_ID_LEN,
};
use tracing::{debug, trace};

use crate::index::{slot_in_type, Slot};
use crate::listener::ListenerRegistration;
use crate::snapshot::HandleTable;

/// Decoded object metadata: the schema version the object currently
/// lives under, plus a flags byte reserved for future use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObjectMeta {
    pub version: u32,
    pub flags: u8,
}

impl ObjectMeta {
    pub(crate) fn encode(self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(6);
        strata_types::write_varint(&mut writer, self.version);
        writer.write_u8(self.flags);
        writer.into_bytes()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let version = strata_types::read_varint(&mut reader)?;
        let flags = reader.read_u8()?;
        reader.expect_end()?;
        Ok(Self { version, flags })
    }
}

/// A transaction over the object store.
///
/// Created through [`Database::create_transaction`]; snapshot
/// transactions come from [`Transaction::create_snapshot_transaction`].
///
/// [`Database::create_transaction`]: crate::db::Database::create_transaction
pub struct Transaction {
    pub(crate) kv: Box<dyn KvTransaction>,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) catalog: SchemaCatalog,
    pub(crate) schema: Arc<Schema>,
    pub(crate) listeners: RefCell<Vec<ListenerRegistration>>,
    pub(crate) stale: Cell<bool>,
    pub(crate) read_only: bool,
    pub(crate) is_snapshot: bool,
    pub(crate) handles: HandleTable,
}

impl Transaction {
    /// The schema this transaction targets.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The transaction's target schema version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.schema.version()
    }

    /// The codec registry in effect.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Whether this is a snapshot transaction.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    /// Whether mutations are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the handle has become unusable.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.get()
    }

    // -- State checks and KV plumbing -----------------------------------

    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.stale.get() {
            Err(StrataError::StaleTransaction)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_usable()?;
        if self.read_only {
            Err(StrataError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Record staleness reported by the KV; after the first such error
    /// the core makes no further KV calls on this handle.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_stale() {
                self.stale.set(true);
            }
        }
        result
    }

    pub(crate) fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_usable()?;
        self.track(self.kv.get(key))
    }

    pub(crate) fn kv_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_usable()?;
        self.track(self.kv.put(key, value))
    }

    pub(crate) fn kv_remove(&self, key: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.track(self.kv.remove(key))
    }

    pub(crate) fn kv_remove_range(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<()> {
        self.check_usable()?;
        self.track(self.kv.remove_range(lo, hi))
    }

    pub(crate) fn kv_get_range(
        &self,
        lo: &[u8],
        hi: Option<&[u8]>,
        reverse: bool,
    ) -> Result<RangeIter> {
        self.check_usable()?;
        self.track(self.kv.get_range(lo, hi, reverse))
    }

    // -- Metadata -------------------------------------------------------

    pub(crate) fn read_meta(&self, id: ObjId) -> Result<Option<ObjectMeta>> {
        match self.kv_get(&keys::obj_meta_key(id))? {
            Some(bytes) => Ok(Some(ObjectMeta::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn require_meta(&self, id: ObjId) -> Result<ObjectMeta> {
        self.read_meta(id)?.ok_or_else(|| StrataError::DeletedObject {
            id: id.to_hex(),
        })
    }

    pub(crate) fn write_meta(&self, id: ObjId, version: u32) -> Result<()> {
        self.kv_put(
            keys::obj_meta_key(id),
            ObjectMeta { version, flags: 0 }.encode(),
        )
    }

    // -- Schema resolution ----------------------------------------------

    pub(crate) fn object_type_in<'a>(
        &self,
        schema: &'a Schema,
        id: ObjId,
    ) -> Result<&'a ObjectType> {
        let type_id = id.storage_id()?;
        schema
            .object_type(type_id)
            .ok_or_else(|| StrataError::UnknownType {
                storage_id: type_id.get(),
                version: schema.version(),
            })
    }

    pub(crate) fn target_type(&self, id: ObjId) -> Result<&ObjectType> {
        self.object_type_in(&self.schema, id)
    }

    /// The recorded schema of one version, for objects not yet migrated.
    pub(crate) fn recorded_schema(&self, version: u32) -> Result<Arc<Schema>> {
        self.catalog
            .get(version)
            .map(|recorded| Arc::clone(&recorded.schema))
            .ok_or_else(|| {
                StrataError::invalid_schema(format!(
                    "object version {version} is not recorded in the schema catalog"
                ))
            })
    }

    // -- Object lifecycle -----------------------------------------------

    /// Create a new object of the given type and return its fresh id.
    ///
    /// Writes the metadata key under the transaction's target version and
    /// the index entries for every indexed field's default value, then
    /// fires create notifications.
    pub fn create(&self, type_id: StorageId) -> Result<ObjId> {
        self.check_writable()?;
        if self.schema.object_type(type_id).is_none() {
            return Err(StrataError::UnknownType {
                storage_id: type_id.get(),
                version: self.schema.version(),
            });
        }
        let id = self.allocate_id(type_id)?;
        self.write_meta(id, self.schema.version())?;
        let schema = Arc::clone(&self.schema);
        self.add_index_entries_for_object(&schema, id)?;
        debug!(id = %id, type_id = %type_id, "created object");
        self.notify_create(id)?;
        Ok(id)
    }

    fn allocate_id(&self, type_id: StorageId) -> Result<ObjId> {
        let key = keys::counter_key(type_id);
        let next = match self.kv_get(&key)? {
            Some(bytes) => {
                let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StrataError::corrupt("object sequence counter is not 8 bytes")
                })?;
                u64::from_be_bytes(array)
            }
            None => 1,
        };
        let id = ObjId::new(type_id, next)?;
        self.kv_put(key, (next + 1).to_be_bytes().to_vec())?;
        Ok(id)
    }

    /// Make sure the sequence counter of `type_id` will never hand out
    /// `sequence` again; used when objects are copied in from elsewhere.
    pub(crate) fn reserve_sequence(&self, type_id: StorageId, sequence: u64) -> Result<()> {
        let key = keys::counter_key(type_id);
        let current = match self.kv_get(&key)? {
            Some(bytes) => {
                let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StrataError::corrupt("object sequence counter is not 8 bytes")
                })?;
                u64::from_be_bytes(array)
            }
            None => 1,
        };
        if sequence >= current {
            self.kv_put(key, (sequence + 1).to_be_bytes().to_vec())?;
        }
        Ok(())
    }

    /// Whether the object exists in this transaction.
    pub fn exists(&self, id: ObjId) -> Result<bool> {
        Ok(self.read_meta(id)?.is_some())
    }

    /// The schema version the object is currently recorded under.
    pub fn get_version(&self, id: ObjId) -> Result<u32> {
        self.check_usable()?;
        Ok(self.require_meta(id)?.version)
    }

    /// Migrate the object to the transaction's target version if needed.
    /// Returns true when a migration ran.
    pub fn upgrade(&self, id: ObjId) -> Result<bool> {
        self.check_usable()?;
        let meta = self.require_meta(id)?;
        if meta.version == self.schema.version() {
            return Ok(false);
        }
        self.ensure_current(id)?;
        Ok(true)
    }

    /// Delete an object, applying on-delete dispositions to its reverse
    /// references and draining cascading deletes in FIFO order. Returns
    /// false if the object did not exist.
    pub fn delete(&self, id: ObjId) -> Result<bool> {
        self.check_writable()?;
        if self.read_meta(id)?.is_none() {
            return Ok(false);
        }

        let mut queue: VecDeque<ObjId> = VecDeque::new();
        let mut queued: BTreeSet<ObjId> = BTreeSet::new();
        let mut deleted: BTreeSet<ObjId> = BTreeSet::new();
        queue.push_back(id);
        queued.insert(id);

        while let Some(current) = queue.pop_front() {
            let Some(meta) = self.read_meta(current)? else {
                continue;
            };
            self.delete_one(current, meta, &mut queue, &mut queued, &mut deleted)?;
        }
        Ok(true)
    }

    /// Delete a single object after its referrers have been dealt with,
    /// then notify. `queue`/`queued`/`deleted` carry the cascade state.
    fn delete_one(
        &self,
        current: ObjId,
        meta: ObjectMeta,
        queue: &mut VecDeque<ObjId>,
        queued: &mut BTreeSet<ObjId>,
        deleted: &mut BTreeSet<ObjId>,
    ) -> Result<()> {
        // Gather reverse references through the reference indexes of
        // every recorded schema version, then check EXCEPTION holders
        // before touching anything.
        let mut unreference: Vec<(ObjId, StorageId)> = Vec::new();
        let mut seen: BTreeSet<(StorageId, ObjId)> = BTreeSet::new();
        for field_id in self.indexed_reference_ids() {
            for referrer in self.referrers_via(field_id, current)? {
                if referrer == current
                    || deleted.contains(&referrer)
                    || !seen.insert((field_id, referrer))
                {
                    continue;
                }
                if self.read_meta(referrer)?.is_none() {
                    continue;
                }
                // Dispositions are evaluated under the target schema, so
                // bring the referrer up to date first.
                self.ensure_current(referrer)?;
                let referrer_type = self.target_type(referrer)?;
                let Some(slot) = slot_in_type(referrer_type, field_id) else {
                    continue;
                };
                let Some(policy) = slot.reference() else {
                    continue;
                };
                match policy.on_delete {
                    DeleteAction::Nothing => {}
                    DeleteAction::Exception => {
                        return Err(StrataError::ReferencedObject {
                            id: current.to_hex(),
                            referrer: referrer.to_hex(),
                        });
                    }
                    DeleteAction::Unreference => unreference.push((referrer, field_id)),
                    DeleteAction::Delete => {
                        if !deleted.contains(&referrer) && queued.insert(referrer) {
                            queue.push_back(referrer);
                        }
                    }
                }
            }
        }

        for (referrer, field_id) in unreference {
            self.unreference_slot(referrer, field_id, current)?;
        }

        // Index entries are removed under the object's recorded version:
        // that is the schema its entries were written under.
        let recorded = self.recorded_schema(meta.version)?;
        self.remove_index_entries_for_object(&recorded, current)?;

        let prefix = keys::obj_prefix(current);
        let end = key_after_prefix(&prefix);
        self.kv_remove_range(&prefix, end.as_deref())?;
        deleted.insert(current);
        debug!(id = %current, "deleted object");
        self.notify_delete(current)
    }

    /// Every indexed reference field or sub-field storage id across all
    /// recorded schema versions.
    fn indexed_reference_ids(&self) -> BTreeSet<StorageId> {
        let mut ids = BTreeSet::new();
        let recorded: Vec<Arc<Schema>> = self
            .catalog
            .versions()
            .filter_map(|v| self.catalog.get(v).map(|r| Arc::clone(&r.schema)))
            .collect();
        for schema in recorded.iter().map(Arc::as_ref).chain([self.schema.as_ref()]) {
            for object_type in schema.object_types() {
                for field in &object_type.fields {
                    if let Field::Simple(f) = field {
                        if f.element.is_reference() && f.indexed {
                            ids.insert(f.storage_id);
                        }
                    }
                    for sub in field.sub_fields() {
                        if sub.element.is_reference() && sub.indexed {
                            ids.insert(sub.storage_id);
                        }
                    }
                }
            }
        }
        ids
    }

    /// Clear one reference to `target` held by `referrer` in the slot
    /// named by `field_id`, per the UNREFERENCE disposition.
    fn unreference_slot(
        &self,
        referrer: ObjId,
        field_id: StorageId,
        target: ObjId,
    ) -> Result<()> {
        let reference = Value::Reference(Some(target));
        let referrer_type = self.target_type(referrer)?;
        let Some(slot) = slot_in_type(referrer_type, field_id) else {
            return Ok(());
        };
        match slot {
            Slot::Simple(f) => {
                let field_id = f.storage_id;
                self.write_simple(referrer, field_id, Value::Reference(None))
            }
            Slot::SetElement(f, _) => {
                let field_id = f.storage_id;
                self.set_remove(referrer, field_id, &reference).map(|_| ())
            }
            Slot::ListElement(f, _) => {
                let field_id = f.storage_id;
                loop {
                    let position = self
                        .list_iter(referrer, field_id)?
                        .into_iter()
                        .position(|v| v == reference);
                    match position {
                        Some(position) => {
                            self.list_remove(
                                referrer,
                                field_id,
                                u32::try_from(position).expect("list position fits u32"),
                            )?;
                        }
                        None => return Ok(()),
                    }
                }
            }
            Slot::MapKey(f, _) => {
                let field_id = f.storage_id;
                self.map_remove(referrer, field_id, &reference).map(|_| ())
            }
            Slot::MapValue(f, _) => {
                let field_id = f.storage_id;
                let doomed: Vec<Value> = self
                    .map_iter(referrer, field_id)?
                    .into_iter()
                    .filter(|(_, v)| *v == reference)
                    .map(|(k, _)| k)
                    .collect();
                for key in doomed {
                    self.map_remove(referrer, field_id, &key)?;
                }
                Ok(())
            }
        }
    }

    // -- Simple fields --------------------------------------------------

    /// Read a simple field, migrating the object first if its recorded
    /// version differs from the transaction's target version. An unset
    /// field reads as its element type's default.
    pub fn read_simple(&self, id: ObjId, field_id: StorageId) -> Result<Value> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_simple(object_type, field_id)?;
        self.read_simple_raw(id, field)
    }

    /// Write a simple field, maintaining its simple index and every
    /// composite index it participates in.
    pub fn write_simple(&self, id: ObjId, field_id: StorageId, value: Value) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_simple(object_type, field_id)?;
        field.element.check_value(&value, &self.registry)?;
        if let Some(referent) = value.as_reference() {
            check_reference_allowed(field, referent)?;
        }

        let old = self.read_simple_raw(id, field)?;
        if old == value {
            return Ok(());
        }

        let default = field.element.default_value(&self.registry)?;
        let content_key = keys::field_prefix(id, field_id);
        if value == default {
            self.kv_remove(&content_key)?;
        } else {
            let mut writer = ByteWriter::new();
            field.element.encode_value(&mut writer, &value, &self.registry)?;
            self.kv_put(content_key, writer.into_bytes())?;
        }

        if field.indexed {
            self.delete_index_entry(&self.simple_index_key(field, id, &old)?)?;
            self.put_index_entry(self.simple_index_key(field, id, &value)?)?;
        }
        for composite in &object_type.composite_indexes {
            if !composite.fields.contains(&field_id) {
                continue;
            }
            let mut substitution = BTreeMap::new();
            substitution.insert(field_id, old.clone());
            let old_key =
                self.composite_entry_key(&self.schema, object_type, composite, id, &substitution)?;
            substitution.insert(field_id, value.clone());
            let new_key =
                self.composite_entry_key(&self.schema, object_type, composite, id, &substitution)?;
            if old_key != new_key {
                self.delete_index_entry(&old_key)?;
                self.put_index_entry(new_key)?;
            }
        }

        trace!(id = %id, field_id = %field_id, "wrote simple field");
        self.notify_change(id, field_id, Some(&old), Some(&value))
    }

    /// Read a simple field's stored value, without migration or
    /// notifications. The field definition (and thus the element type
    /// used for decoding) comes from whichever schema version the caller
    /// resolved it in.
    pub(crate) fn read_simple_raw(&self, id: ObjId, field: &SimpleField) -> Result<Value> {
        match self.kv_get(&keys::field_prefix(id, field.storage_id))? {
            Some(bytes) => {
                let mut reader = ByteReader::new(&bytes);
                let value = field.element.decode_value(&mut reader, &self.registry)?;
                reader.expect_end()?;
                Ok(value)
            }
            None => field.element.default_value(&self.registry),
        }
    }

    // -- Counter fields -------------------------------------------------

    /// Read a counter field; an unset counter reads as zero.
    pub fn read_counter(&self, id: ObjId, field_id: StorageId) -> Result<i64> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        require_counter(object_type, field_id)?;
        self.read_counter_raw(id, field_id)
    }

    /// Set a counter field.
    pub fn write_counter(&self, id: ObjId, field_id: StorageId, value: i64) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        require_counter(object_type, field_id)?;
        self.write_counter_raw(id, field_id, value)
    }

    /// Add `delta` to a counter and return the new value. Counters do
    /// not fire change notifications; they exist for conflict-free
    /// accumulation.
    pub fn adjust_counter(&self, id: ObjId, field_id: StorageId, delta: i64) -> Result<i64> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        require_counter(object_type, field_id)?;
        let current = self.read_counter_raw(id, field_id)?;
        let updated = current.checked_add(delta).ok_or_else(|| StrataError::OutOfRange {
            what: "counter value".into(),
            value: format!("{current} + {delta}"),
        })?;
        self.write_counter_raw(id, field_id, updated)?;
        Ok(updated)
    }

    pub(crate) fn read_counter_raw(&self, id: ObjId, field_id: StorageId) -> Result<i64> {
        match self.kv_get(&keys::field_prefix(id, field_id))? {
            Some(bytes) => {
                let array: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StrataError::corrupt("counter value is not 8 bytes"))?;
                Ok(i64::from_be_bytes(array))
            }
            None => Ok(0),
        }
    }

    pub(crate) fn write_counter_raw(&self, id: ObjId, field_id: StorageId, value: i64) -> Result<()> {
        let key = keys::field_prefix(id, field_id);
        if value == 0 {
            self.kv_remove(&key)
        } else {
            self.kv_put(key, value.to_be_bytes().to_vec())
        }
    }

    // -- Iteration ------------------------------------------------------

    /// All objects of one type, in id order.
    pub fn iter_type(&self, type_id: StorageId) -> Result<ObjIdIter> {
        self.check_usable()?;
        if self.schema.object_type(type_id).is_none() {
            return Err(StrataError::UnknownType {
                storage_id: type_id.get(),
                version: self.schema.version(),
            });
        }
        let prefix = keys::type_prefix(type_id);
        let end = key_after_prefix(&prefix);
        Ok(ObjIdIter {
            inner: self.kv_get_range(&prefix, end.as_deref(), false)?,
        })
    }

    /// Every object in the database, in id order.
    pub fn iter_all(&self) -> Result<ObjIdIter> {
        self.check_usable()?;
        Ok(ObjIdIter {
            inner: self.kv_get_range(keys::META_AREA_END, None, false)?,
        })
    }

    // -- Index maintenance over whole objects ---------------------------

    /// Keys of every index entry the object owns under `schema`.
    pub(crate) fn object_index_entry_keys(
        &self,
        schema: &Schema,
        id: ObjId,
    ) -> Result<Vec<Vec<u8>>> {
        let object_type = self.object_type_in(schema, id)?;
        let mut entry_keys = Vec::new();
        for field in &object_type.fields {
            match field {
                Field::Simple(f) if f.indexed => {
                    let value = self.read_simple_raw(id, f)?;
                    entry_keys.push(self.simple_index_key(f, id, &value)?);
                }
                Field::Simple(_) | Field::Counter(_) => {}
                Field::Set(_) | Field::List(_) | Field::Map(_) => {
                    entry_keys.extend(self.complex_index_entry_keys(field, id)?);
                }
            }
        }
        for composite in &object_type.composite_indexes {
            entry_keys.push(self.composite_entry_key(
                schema,
                object_type,
                composite,
                id,
                &BTreeMap::new(),
            )?);
        }
        Ok(entry_keys)
    }

    pub(crate) fn remove_index_entries_for_object(
        &self,
        schema: &Schema,
        id: ObjId,
    ) -> Result<()> {
        for key in self.object_index_entry_keys(schema, id)? {
            self.kv_remove(&key)?;
        }
        Ok(())
    }

    pub(crate) fn add_index_entries_for_object(&self, schema: &Schema, id: ObjId) -> Result<()> {
        for key in self.object_index_entry_keys(schema, id)? {
            self.put_index_entry(key)?;
        }
        Ok(())
    }

    // -- Transaction end ------------------------------------------------

    /// Commit the underlying KV transaction. Always fails on snapshot
    /// transactions, which remain usable afterwards.
    pub fn commit(&self) -> Result<()> {
        self.check_usable()?;
        let result = self.track(self.kv.commit());
        if self.kv.is_stale() {
            self.stale.set(true);
        }
        result
    }

    /// Roll back the underlying KV transaction. Always fails on snapshot
    /// transactions, which remain usable afterwards.
    pub fn rollback(&self) -> Result<()> {
        self.check_usable()?;
        let result = self.track(self.kv.rollback());
        if self.kv.is_stale() {
            self.stale.set(true);
        }
        result
    }
}

/// Iterator over object ids found in a content key range; meta keys are
/// exactly [`OBJ_ID_LEN`] bytes long, field keys are longer.
pub struct ObjIdIter {
    inner: RangeIter,
}

impl Iterator for ObjIdIter {
    type Item = ObjId;

    fn next(&mut self) -> Option<ObjId> {
        loop {
            let pair = self.inner.next()?;
            if pair.key.len() == OBJ_ID_LEN {
                let mut bytes = [0u8; OBJ_ID_LEN];
                bytes.copy_from_slice(&pair.key);
                return Some(ObjId::from_bytes(bytes));
            }
        }
    }
}

// -- Field resolution helpers ------------------------------------------

pub(crate) fn field_of<'a>(object_type: &'a ObjectType, field_id: StorageId) -> Result<&'a Field> {
    object_type
        .field(field_id)
        .ok_or_else(|| StrataError::UnknownField {
            object_type: object_type.name.clone(),
            storage_id: field_id.get(),
        })
}

pub(crate) fn require_simple<'a>(
    object_type: &'a ObjectType,
    field_id: StorageId,
) -> Result<&'a SimpleField> {
    match field_of(object_type, field_id)? {
        Field::Simple(f) => Ok(f),
        other => Err(StrataError::TypeMismatch {
            expected: "simple field".into(),
            actual: format!("{} field \"{}\"", other.kind_name(), other.name()),
        }),
    }
}

pub(crate) fn require_counter<'a>(
    object_type: &'a ObjectType,
    field_id: StorageId,
) -> Result<&'a CounterField> {
    match field_of(object_type, field_id)? {
        Field::Counter(f) => Ok(f),
        other => Err(StrataError::TypeMismatch {
            expected: "counter field".into(),
            actual: format!("{} field \"{}\"", other.kind_name(), other.name()),
        }),
    }
}

pub(crate) fn require_set<'a>(
    object_type: &'a ObjectType,
    field_id: StorageId,
) -> Result<&'a SetField> {
    match field_of(object_type, field_id)? {
        Field::Set(f) => Ok(f),
        other => Err(StrataError::TypeMismatch {
            expected: "set field".into(),
            actual: format!("{} field \"{}\"", other.kind_name(), other.name()),
        }),
    }
}

pub(crate) fn require_list<'a>(
    object_type: &'a ObjectType,
    field_id: StorageId,
) -> Result<&'a ListField> {
    match field_of(object_type, field_id)? {
        Field::List(f) => Ok(f),
        other => Err(StrataError::TypeMismatch {
            expected: "list field".into(),
            actual: format!("{} field \"{}\"", other.kind_name(), other.name()),
        }),
    }
}

pub(crate) fn require_map<'a>(
    object_type: &'a ObjectType,
    field_id: StorageId,
) -> Result<&'a MapField> {
    match field_of(object_type, field_id)? {
        Field::Map(f) => Ok(f),
        other => Err(StrataError::TypeMismatch {
            expected: "map field".into(),
            actual: format!("{} field \"{}\"", other.kind_name(), other.name()),
        }),
    }
}

/// Reject a referent whose type is excluded by the field's policy.
pub(crate) fn check_reference_allowed(field: &SimpleField, referent: ObjId) -> Result<()> {
    let referent_type = referent.storage_id()?;
    let allowed = field
        .reference
        .as_ref()
        .map_or(true, |policy| policy.allows(referent_type));
    if allowed {
        Ok(())
    } else {
        Err(StrataError::TypeMismatch {
            expected: format!("reference allowed by field \"{}\"", field.name),
            actual: format!("reference to object type {referent_type}"),
        })
    }
}

/// Like [`check_reference_allowed`] but for complex-field sub-fields.
pub(crate) fn check_sub_reference_allowed(
    sub: &strata_schema::SubField,
    field_name: &str,
    referent: ObjId,
) -> Result<()> {
    let referent_type = referent.storage_id()?;
    let allowed = sub
        .reference
        .as_ref()
        .map_or(true, |policy| policy.allows(referent_type));
    if allowed {
        Ok(())
    } else {
        Err(StrataError::TypeMismatch {
            expected: format!("reference allowed by field \"{field_name}\""),
            actual: format!("reference to object type {referent_type}"),
        })
    }
}
