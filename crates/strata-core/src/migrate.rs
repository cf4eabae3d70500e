//! Lazy per-object schema migration.
//!
//! Whenever a field of an object is accessed, the object's recorded
//! version is compared against the transaction's target version. On
//! mismatch the stored representation is rewritten in place, entirely
//! inside the caller's transaction:
//!
//! 1. composite index entries computed under the old schema are removed;
//! 2. fields present only in the old schema lose their index entries and
//!    content;
//! 3. fields present only in the new schema need no content (absent
//!    content reads as the default) but gain default index entries;
//! 4. fields present in both are re-encoded when the element type
//!    changed, have their index entries re-established per the new
//!    indexed flags, and have referents that the narrowed allowed-types
//!    set no longer permits scrubbed (simple fields read as null
//!    afterwards, collection elements are removed);
//! 5. composite index entries are rebuilt under the new schema, the
//!    metadata key is rewritten, and the schema-change notification
//!    fires with the old field values keyed by name.
//!
//! Untouched objects stay at their recorded version indefinitely.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_schema::{Field, SimpleField, SubField};
use strata_types::{key_after_prefix, keys, ByteReader, ByteWriter, ObjId, StorageId, Value};
use tracing::debug;

use crate::tx::Transaction;

impl Transaction {
    /// Bring the object to the transaction's target version, migrating
    /// lazily on first access.
    pub(crate) fn ensure_current(&self, id: ObjId) -> Result<()> {
        let meta = self.require_meta(id)?;
        if meta.version == self.schema.version() {
            return Ok(());
        }
        if self.read_only {
            // Migration rewrites keys; a read-only transaction cannot
            // access objects recorded under a different version.
            return Err(StrataError::ReadOnly);
        }
        self.migrate_object(id, meta.version)
    }

    fn migrate_object(&self, id: ObjId, old_version: u32) -> Result<()> {
        let old_schema = self.recorded_schema(old_version)?;
        let old_type = self.object_type_in(&old_schema, id)?;
        let new_schema = Arc::clone(&self.schema);
        let new_type = self.object_type_in(&new_schema, id)?;

        // Capture the old field values before anything moves; the
        // schema-change notification exposes them by name.
        let mut old_values: BTreeMap<String, Value> = BTreeMap::new();
        for field in &old_type.fields {
            match field {
                Field::Simple(f) => {
                    old_values.insert(f.name.clone(), self.read_simple_raw(id, f)?);
                }
                Field::Counter(f) => {
                    old_values.insert(
                        f.name.clone(),
                        Value::Int64(self.read_counter_raw(id, f.storage_id)?),
                    );
                }
                Field::Set(_) | Field::List(_) | Field::Map(_) => {}
            }
        }

        // Step 1: composite entries computed from the old values.
        for composite in &old_type.composite_indexes {
            let key =
                self.composite_entry_key(&old_schema, old_type, composite, id, &BTreeMap::new())?;
            self.kv_remove(&key)?;
        }

        // Step 2: fields that no longer exist.
        for field in &old_type.fields {
            if new_type.field(field.storage_id()).is_some() {
                continue;
            }
            match field {
                Field::Simple(f) => {
                    if f.indexed {
                        let value = self.read_simple_raw(id, f)?;
                        self.delete_index_entry(&self.simple_index_key(f, id, &value)?)?;
                    }
                    self.kv_remove(&keys::field_prefix(id, f.storage_id))?;
                }
                Field::Counter(f) => {
                    self.kv_remove(&keys::field_prefix(id, f.storage_id))?;
                }
                Field::Set(_) | Field::List(_) | Field::Map(_) => {
                    for key in self.complex_index_entry_keys(field, id)? {
                        self.kv_remove(&key)?;
                    }
                    let prefix = keys::field_prefix(id, field.storage_id());
                    self.kv_remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
                }
            }
        }

        // Steps 3 and 4: fields of the new schema.
        for field in &new_type.fields {
            match (field, old_type.field(field.storage_id())) {
                (Field::Simple(new_field), None) => {
                    // Absent content reads as the default; only the index
                    // entry needs creating.
                    if new_field.indexed {
                        let default = new_field.element.default_value(&self.registry)?;
                        self.put_index_entry(self.simple_index_key(new_field, id, &default)?)?;
                    }
                }
                (Field::Counter(_) | Field::Set(_) | Field::List(_) | Field::Map(_), None) => {}
                (Field::Simple(new_field), Some(Field::Simple(old_field))) => {
                    self.migrate_simple(id, old_field, new_field)?;
                }
                (Field::Counter(_), Some(Field::Counter(_))) => {
                    // The raw 8-byte value carries over untouched.
                }
                (
                    Field::Set(_) | Field::List(_) | Field::Map(_),
                    Some(old_field @ (Field::Set(_) | Field::List(_) | Field::Map(_))),
                ) => {
                    self.migrate_complex(id, old_field, field)?;
                }
                (_, Some(old_field)) => {
                    // The catalog's compatibility check keeps this
                    // unreachable for recorded schemas.
                    return Err(StrataError::schema_mismatch(format!(
                        "storage id {} changed kind from {} to {}",
                        field.storage_id(),
                        old_field.kind_name(),
                        field.kind_name()
                    )));
                }
            }
        }

        // Step 5: composite entries from the migrated values, then the
        // version stamp and the notification.
        for composite in &new_type.composite_indexes {
            let key =
                self.composite_entry_key(&new_schema, new_type, composite, id, &BTreeMap::new())?;
            self.put_index_entry(key)?;
        }
        self.write_meta(id, new_schema.version())?;
        debug!(
            id = %id,
            old_version,
            new_version = new_schema.version(),
            "migrated object"
        );
        self.notify_schema_change(id, old_version, new_schema.version(), &old_values)
    }

    fn migrate_simple(
        &self,
        id: ObjId,
        old_field: &SimpleField,
        new_field: &SimpleField,
    ) -> Result<Value> {
        let old_value = self.read_simple_raw(id, old_field)?;
        let mut new_value = if old_field.element == new_field.element {
            old_value.clone()
        } else {
            old_field
                .element
                .convert_to(&new_field.element, old_value.clone())?
        };

        // A referent type the narrowed policy no longer permits is
        // scrubbed; in simple context the field reads as null afterwards.
        if let Some(referent) = new_value.as_reference() {
            let allowed = match new_field.reference.as_ref() {
                Some(policy) => policy.allows(referent.storage_id()?),
                None => true,
            };
            if !allowed {
                new_value = Value::Reference(None);
            }
        }

        let content_key = keys::field_prefix(id, new_field.storage_id);
        let default = new_field.element.default_value(&self.registry)?;
        if new_value == default {
            self.kv_remove(&content_key)?;
        } else {
            let mut writer = ByteWriter::new();
            new_field
                .element
                .encode_value(&mut writer, &new_value, &self.registry)?;
            self.kv_put(content_key, writer.into_bytes())?;
        }

        if old_field.indexed {
            self.delete_index_entry(&self.simple_index_key(old_field, id, &old_value)?)?;
        }
        if new_field.indexed {
            self.put_index_entry(self.simple_index_key(new_field, id, &new_value)?)?;
        }
        Ok(new_value)
    }

    fn migrate_complex(&self, id: ObjId, old_field: &Field, new_field: &Field) -> Result<()> {
        // Old index entries decode with the old sub-field definitions,
        // so they go first.
        for key in self.complex_index_entry_keys(old_field, id)? {
            self.kv_remove(&key)?;
        }

        let old_subs = old_field.sub_fields();
        let new_subs = new_field.sub_fields();
        let needs_rewrite = old_subs
            .iter()
            .zip(&new_subs)
            .any(|(old_sub, new_sub)| old_sub.element != new_sub.element);
        if needs_rewrite {
            self.rewrite_complex_content(id, old_field, new_field)?;
        }

        let removed = self.disallowed_referent_types(id, new_field)?;
        self.unreference_removed_object_types(id, new_field, &removed)?;

        for key in self.complex_index_entry_keys(new_field, id)? {
            self.put_index_entry(key)?;
        }
        Ok(())
    }

    /// Re-encode a complex field's content range after an element type
    /// change within a compatible family.
    fn rewrite_complex_content(
        &self,
        id: ObjId,
        old_field: &Field,
        new_field: &Field,
    ) -> Result<()> {
        let field_id = new_field.storage_id();
        let prefix = keys::field_prefix(id, field_id);
        let pairs = self.complex_content(id, field_id)?;

        // Decode everything under the old definitions before clearing the
        // range, then write back under the new ones.
        enum Rewritten {
            Set(Value),
            List(u32, Value),
            Map(Value, Value),
        }
        let mut rewritten = Vec::with_capacity(pairs.len());
        match (old_field, new_field) {
            (Field::Set(old), Field::Set(new)) => {
                for pair in &pairs {
                    let mut reader = ByteReader::new(&pair.key);
                    reader.skip(prefix.len())?;
                    let value = old.element.element.decode_value(&mut reader, &self.registry)?;
                    rewritten.push(Rewritten::Set(convert_sub(
                        &old.element,
                        &new.element,
                        value,
                    )?));
                }
            }
            (Field::List(old), Field::List(new)) => {
                for pair in &pairs {
                    let mut reader = ByteReader::new(&pair.key);
                    reader.skip(prefix.len())?;
                    let suffix: [u8; 4] = reader
                        .read_exact(4)?
                        .try_into()
                        .map_err(|_| StrataError::corrupt("list position suffix is not 4 bytes"))?;
                    let mut value_reader = ByteReader::new(&pair.value);
                    let value = old
                        .element
                        .element
                        .decode_value(&mut value_reader, &self.registry)?;
                    rewritten.push(Rewritten::List(
                        u32::from_be_bytes(suffix),
                        convert_sub(&old.element, &new.element, value)?,
                    ));
                }
            }
            (Field::Map(old), Field::Map(new)) => {
                for pair in &pairs {
                    let mut reader = ByteReader::new(&pair.key);
                    reader.skip(prefix.len())?;
                    let key = old.key.element.decode_value(&mut reader, &self.registry)?;
                    let mut value_reader = ByteReader::new(&pair.value);
                    let value = old
                        .value
                        .element
                        .decode_value(&mut value_reader, &self.registry)?;
                    rewritten.push(Rewritten::Map(
                        convert_sub(&old.key, &new.key, key)?,
                        convert_sub(&old.value, &new.value, value)?,
                    ));
                }
            }
            _ => {
                return Err(StrataError::schema_mismatch(format!(
                    "storage id {field_id} changed collection kind"
                )))
            }
        }

        self.kv_remove_range(&prefix, key_after_prefix(&prefix).as_deref())?;
        for entry in rewritten {
            match (&entry, new_field) {
                (Rewritten::Set(value), Field::Set(new)) => {
                    let mut writer = ByteWriter::new();
                    writer.write(&prefix);
                    new.element
                        .element
                        .encode_value(&mut writer, value, &self.registry)?;
                    self.kv_put(writer.into_bytes(), Vec::new())?;
                }
                (Rewritten::List(position, value), Field::List(new)) => {
                    let mut key_writer = ByteWriter::new();
                    key_writer.write(&prefix);
                    key_writer.write(&position.to_be_bytes());
                    let mut value_writer = ByteWriter::new();
                    new.element
                        .element
                        .encode_value(&mut value_writer, value, &self.registry)?;
                    self.kv_put(key_writer.into_bytes(), value_writer.into_bytes())?;
                }
                (Rewritten::Map(key, value), Field::Map(new)) => {
                    let mut key_writer = ByteWriter::new();
                    key_writer.write(&prefix);
                    new.key.element.encode_value(&mut key_writer, key, &self.registry)?;
                    let mut value_writer = ByteWriter::new();
                    new.value
                        .element
                        .encode_value(&mut value_writer, value, &self.registry)?;
                    self.kv_put(key_writer.into_bytes(), value_writer.into_bytes())?;
                }
                _ => unreachable!("rewritten entries match the new field kind"),
            }
        }
        Ok(())
    }

    /// Referent object types present in the field's content that the new
    /// sub-field policies no longer allow.
    fn disallowed_referent_types(
        &self,
        id: ObjId,
        field: &Field,
    ) -> Result<BTreeSet<StorageId>> {
        let mut removed = BTreeSet::new();
        let prefix_len = keys::field_prefix(id, field.storage_id()).len();
        let mut note = |sub: &SubField, value: &Value| -> Result<()> {
            if let (Some(policy), Some(referent)) = (sub.reference.as_ref(), value.as_reference())
            {
                let referent_type = referent.storage_id()?;
                if !policy.allows(referent_type) {
                    removed.insert(referent_type);
                }
            }
            Ok(())
        };
        match field {
            Field::Set(f) => {
                if f.element.element.is_reference() {
                    for pair in self.complex_content(id, f.storage_id)? {
                        let mut reader = ByteReader::new(&pair.key);
                        reader.skip(prefix_len)?;
                        let value =
                            f.element.element.decode_value(&mut reader, &self.registry)?;
                        note(&f.element, &value)?;
                    }
                }
            }
            Field::List(f) => {
                if f.element.element.is_reference() {
                    for pair in self.complex_content(id, f.storage_id)? {
                        let mut reader = ByteReader::new(&pair.value);
                        let value =
                            f.element.element.decode_value(&mut reader, &self.registry)?;
                        note(&f.element, &value)?;
                    }
                }
            }
            Field::Map(f) => {
                if f.key.element.is_reference() || f.value.element.is_reference() {
                    for pair in self.complex_content(id, f.storage_id)? {
                        let mut reader = ByteReader::new(&pair.key);
                        reader.skip(prefix_len)?;
                        let key = f.key.element.decode_value(&mut reader, &self.registry)?;
                        note(&f.key, &key)?;
                        let mut value_reader = ByteReader::new(&pair.value);
                        let value =
                            f.value.element.decode_value(&mut value_reader, &self.registry)?;
                        note(&f.value, &value)?;
                    }
                }
            }
            Field::Simple(_) | Field::Counter(_) => {}
        }
        Ok(removed)
    }
}

fn convert_sub(old_sub: &SubField, new_sub: &SubField, value: Value) -> Result<Value> {
    if old_sub.element == new_sub.element {
        Ok(value)
    } else {
        old_sub.element.convert_to(&new_sub.element, value)
    }
}
