//! The complex-field engine: set, list and map layouts, iteration, and
//! per-element index maintenance.
//!
//! All content keys of one field share the prefix `<ObjId> <field-sid>`
//! and form a contiguous range bounded by the successor of that prefix:
//!
//! - **set**: suffix = encoded element, value empty;
//! - **list**: suffix = 4-byte big-endian position, value = encoded
//!   element; positions stay contiguous from 0, so an insert or remove
//!   rewrites only the shifted suffix range;
//! - **map**: suffix = encoded key, value = encoded value.
//!
//! Mutations emit add/remove index operations for every indexed
//! sub-field. List entries carry their position in the index key, so the
//! same value at several positions produces several entries; map keys and
//! values are indexed independently, the value entries disambiguated by
//! the encoded map key.

use std::collections::BTreeSet;

use strata_error::{Result, StrataError};
use strata_kv::KvPair;
use strata_schema::{Field, ListField, MapField, SetField};
use strata_types::{
    key_after_prefix, keys, ByteReader, ByteWriter, ObjId, StorageId, Value,
};
use tracing::trace;

use crate::index::{index_entry_key, IndexDisambiguator};
use crate::tx::{
    check_sub_reference_allowed, require_list, require_map, require_set, Transaction,
};

/// Largest legal list length; positions are 32-bit and bounded the way
/// signed-int collections are.
const MAX_LIST_LEN: u32 = i32::MAX as u32;

impl Transaction {
    /// Buffered content pairs of one field's key range, in key order.
    pub(crate) fn complex_content(&self, id: ObjId, field_id: StorageId) -> Result<Vec<KvPair>> {
        let prefix = keys::field_prefix(id, field_id);
        let end = key_after_prefix(&prefix);
        Ok(self.kv_get_range(&prefix, end.as_deref(), false)?.collect())
    }

    // -- Sets -----------------------------------------------------------

    /// Add an element; returns false if it was already present.
    pub fn set_add(&self, id: ObjId, field_id: StorageId, value: Value) -> Result<bool> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_set(object_type, field_id)?;
        field.element.element.check_value(&value, &self.registry)?;
        if let Some(referent) = value.as_reference() {
            check_sub_reference_allowed(&field.element, &field.name, referent)?;
        }

        let key = self.set_content_key(id, field, &value)?;
        if self.kv_get(&key)?.is_some() {
            return Ok(false);
        }
        self.kv_put(key, Vec::new())?;
        if field.element.indexed {
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &value,
                id,
                IndexDisambiguator::None,
            )?)?;
        }
        trace!(id = %id, field_id = %field_id, "set element added");
        self.notify_change(id, field_id, None, Some(&value))?;
        Ok(true)
    }

    /// Remove an element; returns false if it was absent.
    pub fn set_remove(&self, id: ObjId, field_id: StorageId, value: &Value) -> Result<bool> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_set(object_type, field_id)?;
        field.element.element.check_value(value, &self.registry)?;

        if !self.set_remove_inner(id, field, value)? {
            return Ok(false);
        }
        self.notify_change(id, field_id, Some(value), None)?;
        Ok(true)
    }

    pub(crate) fn set_remove_inner(
        &self,
        id: ObjId,
        field: &SetField,
        value: &Value,
    ) -> Result<bool> {
        let key = self.set_content_key(id, field, value)?;
        if self.kv_get(&key)?.is_none() {
            return Ok(false);
        }
        self.kv_remove(&key)?;
        if field.element.indexed {
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                value,
                id,
                IndexDisambiguator::None,
            )?)?;
        }
        Ok(true)
    }

    /// Whether the element is present.
    pub fn set_contains(&self, id: ObjId, field_id: StorageId, value: &Value) -> Result<bool> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_set(object_type, field_id)?;
        field.element.element.check_value(value, &self.registry)?;
        Ok(self
            .kv_get(&self.set_content_key(id, field, value)?)?
            .is_some())
    }

    /// All elements in element order.
    pub fn set_iter(&self, id: ObjId, field_id: StorageId) -> Result<Vec<Value>> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_set(object_type, field_id)?;
        let prefix_len = keys::field_prefix(id, field_id).len();
        self.complex_content(id, field_id)?
            .into_iter()
            .map(|pair| {
                let mut reader = ByteReader::new(&pair.key);
                reader.skip(prefix_len)?;
                let value = field
                    .element
                    .element
                    .decode_value(&mut reader, &self.registry)?;
                reader.expect_end()?;
                Ok(value)
            })
            .collect()
    }

    /// Remove every element.
    pub fn set_clear(&self, id: ObjId, field_id: StorageId) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let removed = self.set_iter(id, field_id)?;
        let object_type = self.target_type(id)?;
        let field = require_set(object_type, field_id)?;
        for value in &removed {
            self.set_remove_inner(id, field, value)?;
        }
        for value in &removed {
            self.notify_change(id, field_id, Some(value), None)?;
        }
        Ok(())
    }

    fn set_content_key(&self, id: ObjId, field: &SetField, value: &Value) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write(&keys::field_prefix(id, field.storage_id));
        field
            .element
            .element
            .encode_value(&mut writer, value, &self.registry)?;
        Ok(writer.into_bytes())
    }

    // -- Lists ----------------------------------------------------------

    /// Number of elements.
    pub fn list_len(&self, id: ObjId, field_id: StorageId) -> Result<u32> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        Ok(u32::try_from(self.list_content(id, field)?.len()).expect("list length fits u32"))
    }

    /// The element at `position`.
    pub fn list_get(&self, id: ObjId, field_id: StorageId, position: u32) -> Result<Value> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        match self.kv_get(&list_content_key(id, field_id, position))? {
            Some(bytes) => decode_list_value(field, &bytes, &self.registry),
            None => Err(StrataError::OutOfRange {
                what: format!("list position in field \"{}\"", field.name),
                value: position.to_string(),
            }),
        }
    }

    /// Append an element; returns its position.
    pub fn list_push(&self, id: ObjId, field_id: StorageId, value: Value) -> Result<u32> {
        let position = self.list_len(id, field_id)?;
        self.list_insert(id, field_id, position, value)?;
        Ok(position)
    }

    /// Insert an element at `position`, shifting later elements up.
    pub fn list_insert(
        &self,
        id: ObjId,
        field_id: StorageId,
        position: u32,
        value: Value,
    ) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        field.element.element.check_value(&value, &self.registry)?;
        if let Some(referent) = value.as_reference() {
            check_sub_reference_allowed(&field.element, &field.name, referent)?;
        }

        let entries = self.list_content(id, field)?;
        let len = u32::try_from(entries.len()).expect("list length fits u32");
        if position > len {
            return Err(StrataError::OutOfRange {
                what: format!("list position in field \"{}\" (length {len})", field.name),
                value: position.to_string(),
            });
        }
        if len == MAX_LIST_LEN {
            return Err(StrataError::OutOfRange {
                what: format!("list length of field \"{}\"", field.name),
                value: len.to_string(),
            });
        }

        // Shift the suffix range up, highest position first.
        for (pos, bytes) in entries.iter().rev() {
            if *pos < position {
                break;
            }
            self.move_list_entry(id, field, *pos, pos + 1, bytes)?;
        }

        let mut writer = ByteWriter::new();
        field
            .element
            .element
            .encode_value(&mut writer, &value, &self.registry)?;
        self.kv_put(list_content_key(id, field_id, position), writer.into_bytes())?;
        if field.element.indexed {
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &value,
                id,
                IndexDisambiguator::ListPosition(position),
            )?)?;
        }
        trace!(id = %id, field_id = %field_id, position, "list element inserted");
        self.notify_change(id, field_id, None, Some(&value))
    }

    /// Remove and return the element at `position`, shifting later
    /// elements down.
    pub fn list_remove(&self, id: ObjId, field_id: StorageId, position: u32) -> Result<Value> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        let removed = self.list_remove_inner(id, field, position)?;
        self.notify_change(id, field_id, Some(&removed), None)?;
        Ok(removed)
    }

    pub(crate) fn list_remove_inner(
        &self,
        id: ObjId,
        field: &ListField,
        position: u32,
    ) -> Result<Value> {
        let entries = self.list_content(id, field)?;
        let len = u32::try_from(entries.len()).expect("list length fits u32");
        if position >= len {
            return Err(StrataError::OutOfRange {
                what: format!("list position in field \"{}\" (length {len})", field.name),
                value: position.to_string(),
            });
        }

        let removed_bytes = &entries[position as usize].1;
        let removed = decode_list_value(field, removed_bytes, &self.registry)?;
        if field.element.indexed {
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &removed,
                id,
                IndexDisambiguator::ListPosition(position),
            )?)?;
        }

        // Shift the tail down, lowest position first.
        for (pos, bytes) in &entries[(position as usize + 1)..] {
            self.move_list_entry(id, field, *pos, pos - 1, bytes)?;
        }
        self.kv_remove(&list_content_key(id, field.storage_id, len - 1))?;
        Ok(removed)
    }

    /// Replace the element at `position`, returning the previous value.
    pub fn list_set(
        &self,
        id: ObjId,
        field_id: StorageId,
        position: u32,
        value: Value,
    ) -> Result<Value> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        field.element.element.check_value(&value, &self.registry)?;
        if let Some(referent) = value.as_reference() {
            check_sub_reference_allowed(&field.element, &field.name, referent)?;
        }

        let key = list_content_key(id, field_id, position);
        let Some(old_bytes) = self.kv_get(&key)? else {
            return Err(StrataError::OutOfRange {
                what: format!("list position in field \"{}\"", field.name),
                value: position.to_string(),
            });
        };
        let old = decode_list_value(field, &old_bytes, &self.registry)?;
        if old == value {
            return Ok(old);
        }

        let mut writer = ByteWriter::new();
        field
            .element
            .element
            .encode_value(&mut writer, &value, &self.registry)?;
        self.kv_put(key, writer.into_bytes())?;
        if field.element.indexed {
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &old,
                id,
                IndexDisambiguator::ListPosition(position),
            )?)?;
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &value,
                id,
                IndexDisambiguator::ListPosition(position),
            )?)?;
        }
        self.notify_change(id, field_id, Some(&old), Some(&value))?;
        Ok(old)
    }

    /// All elements in position order.
    pub fn list_iter(&self, id: ObjId, field_id: StorageId) -> Result<Vec<Value>> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        self.list_content(id, field)?
            .into_iter()
            .map(|(_, bytes)| decode_list_value(field, &bytes, &self.registry))
            .collect()
    }

    /// Remove every element.
    pub fn list_clear(&self, id: ObjId, field_id: StorageId) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_list(object_type, field_id)?;
        let entries = self.list_content(id, field)?;
        let mut removed = Vec::with_capacity(entries.len());
        for (position, bytes) in &entries {
            let value = decode_list_value(field, bytes, &self.registry)?;
            if field.element.indexed {
                self.delete_index_entry(&index_entry_key(
                    &self.registry,
                    field.element.storage_id,
                    &field.element.element,
                    &value,
                    id,
                    IndexDisambiguator::ListPosition(*position),
                )?)?;
            }
            removed.push(value);
        }
        let prefix = keys::field_prefix(id, field_id);
        let end = key_after_prefix(&prefix);
        self.kv_remove_range(&prefix, end.as_deref())?;
        for value in &removed {
            self.notify_change(id, field_id, Some(value), None)?;
        }
        Ok(())
    }

    /// Content entries as `(position, value bytes)` with contiguity
    /// verified.
    fn list_content(&self, id: ObjId, field: &ListField) -> Result<Vec<(u32, Vec<u8>)>> {
        let prefix_len = keys::field_prefix(id, field.storage_id).len();
        let pairs = self.complex_content(id, field.storage_id)?;
        let mut entries = Vec::with_capacity(pairs.len());
        for (expected, pair) in pairs.into_iter().enumerate() {
            let suffix = &pair.key[prefix_len..];
            let array: [u8; 4] = suffix
                .try_into()
                .map_err(|_| StrataError::corrupt("list position suffix is not 4 bytes"))?;
            let position = u32::from_be_bytes(array);
            if position as usize != expected {
                return Err(StrataError::corrupt(format!(
                    "list positions not contiguous: found {position}, expected {expected}"
                )));
            }
            entries.push((position, pair.value));
        }
        Ok(entries)
    }

    /// Move one list entry (content key and index entry) to a new
    /// position, preserving its raw value bytes.
    fn move_list_entry(
        &self,
        id: ObjId,
        field: &ListField,
        from: u32,
        to: u32,
        bytes: &[u8],
    ) -> Result<()> {
        self.kv_put(list_content_key(id, field.storage_id, to), bytes.to_vec())?;
        if from < to {
            // Shifting up vacates `from`; shifting down leaves the top
            // key for the caller to drop once the whole tail has moved.
            self.kv_remove(&list_content_key(id, field.storage_id, from))?;
        }
        if field.element.indexed {
            let value = decode_list_value(field, bytes, &self.registry)?;
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &value,
                id,
                IndexDisambiguator::ListPosition(from),
            )?)?;
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.element.storage_id,
                &field.element.element,
                &value,
                id,
                IndexDisambiguator::ListPosition(to),
            )?)?;
        }
        Ok(())
    }

    // -- Maps -----------------------------------------------------------

    /// The value stored under `key`, if any.
    pub fn map_get(&self, id: ObjId, field_id: StorageId, key: &Value) -> Result<Option<Value>> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_map(object_type, field_id)?;
        field.key.element.check_value(key, &self.registry)?;
        match self.kv_get(&self.map_content_key(id, field, key)?)? {
            Some(bytes) => Ok(Some(decode_map_value(field, &bytes, &self.registry)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn map_put(
        &self,
        id: ObjId,
        field_id: StorageId,
        key: Value,
        value: Value,
    ) -> Result<Option<Value>> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_map(object_type, field_id)?;
        field.key.element.check_value(&key, &self.registry)?;
        field.value.element.check_value(&value, &self.registry)?;
        if let Some(referent) = key.as_reference() {
            check_sub_reference_allowed(&field.key, &field.name, referent)?;
        }
        if let Some(referent) = value.as_reference() {
            check_sub_reference_allowed(&field.value, &field.name, referent)?;
        }

        let content_key = self.map_content_key(id, field, &key)?;
        let key_suffix = content_key[keys::field_prefix(id, field_id).len()..].to_vec();
        let old = match self.kv_get(&content_key)? {
            Some(bytes) => Some(decode_map_value(field, &bytes, &self.registry)?),
            None => None,
        };
        if old.as_ref() == Some(&value) {
            return Ok(old);
        }

        let mut writer = ByteWriter::new();
        field
            .value
            .element
            .encode_value(&mut writer, &value, &self.registry)?;
        self.kv_put(content_key, writer.into_bytes())?;

        if field.key.indexed && old.is_none() {
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.key.storage_id,
                &field.key.element,
                &key,
                id,
                IndexDisambiguator::None,
            )?)?;
        }
        if field.value.indexed {
            if let Some(old_value) = &old {
                self.delete_index_entry(&index_entry_key(
                    &self.registry,
                    field.value.storage_id,
                    &field.value.element,
                    old_value,
                    id,
                    IndexDisambiguator::MapKey(&key_suffix),
                )?)?;
            }
            self.put_index_entry(index_entry_key(
                &self.registry,
                field.value.storage_id,
                &field.value.element,
                &value,
                id,
                IndexDisambiguator::MapKey(&key_suffix),
            )?)?;
        }
        trace!(id = %id, field_id = %field_id, "map entry written");
        self.notify_change(id, field_id, old.as_ref(), Some(&value))?;
        Ok(old)
    }

    /// Remove the entry under `key`, returning its value.
    pub fn map_remove(&self, id: ObjId, field_id: StorageId, key: &Value) -> Result<Option<Value>> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_map(object_type, field_id)?;
        field.key.element.check_value(key, &self.registry)?;

        let Some(old) = self.map_remove_inner(id, field, key)? else {
            return Ok(None);
        };
        self.notify_change(id, field_id, Some(&old), None)?;
        Ok(Some(old))
    }

    pub(crate) fn map_remove_inner(
        &self,
        id: ObjId,
        field: &MapField,
        key: &Value,
    ) -> Result<Option<Value>> {
        let content_key = self.map_content_key(id, field, key)?;
        let Some(bytes) = self.kv_get(&content_key)? else {
            return Ok(None);
        };
        let old = decode_map_value(field, &bytes, &self.registry)?;
        let key_suffix = content_key[keys::field_prefix(id, field.storage_id).len()..].to_vec();
        self.kv_remove(&content_key)?;
        if field.key.indexed {
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.key.storage_id,
                &field.key.element,
                key,
                id,
                IndexDisambiguator::None,
            )?)?;
        }
        if field.value.indexed {
            self.delete_index_entry(&index_entry_key(
                &self.registry,
                field.value.storage_id,
                &field.value.element,
                &old,
                id,
                IndexDisambiguator::MapKey(&key_suffix),
            )?)?;
        }
        Ok(Some(old))
    }

    /// All entries in key order.
    pub fn map_iter(&self, id: ObjId, field_id: StorageId) -> Result<Vec<(Value, Value)>> {
        self.check_usable()?;
        self.ensure_current(id)?;
        let object_type = self.target_type(id)?;
        let field = require_map(object_type, field_id)?;
        let prefix_len = keys::field_prefix(id, field_id).len();
        self.complex_content(id, field_id)?
            .into_iter()
            .map(|pair| {
                let mut reader = ByteReader::new(&pair.key);
                reader.skip(prefix_len)?;
                let key = field.key.element.decode_value(&mut reader, &self.registry)?;
                reader.expect_end()?;
                let value = decode_map_value(field, &pair.value, &self.registry)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Remove every entry.
    pub fn map_clear(&self, id: ObjId, field_id: StorageId) -> Result<()> {
        self.check_writable()?;
        self.ensure_current(id)?;
        let entries = self.map_iter(id, field_id)?;
        let object_type = self.target_type(id)?;
        let field = require_map(object_type, field_id)?;
        for (key, _) in &entries {
            self.map_remove_inner(id, field, key)?;
        }
        for (_, value) in &entries {
            self.notify_change(id, field_id, Some(value), None)?;
        }
        Ok(())
    }

    fn map_content_key(&self, id: ObjId, field: &MapField, key: &Value) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write(&keys::field_prefix(id, field.storage_id));
        field.key.element.encode_value(&mut writer, key, &self.registry)?;
        Ok(writer.into_bytes())
    }

    // -- Whole-field index entries --------------------------------------

    /// Keys of every index entry one complex field currently owns, built
    /// from its content range.
    pub(crate) fn complex_index_entry_keys(
        &self,
        field: &Field,
        id: ObjId,
    ) -> Result<Vec<Vec<u8>>> {
        let field_id = field.storage_id();
        let prefix_len = keys::field_prefix(id, field_id).len();
        let mut entry_keys = Vec::new();
        match field {
            Field::Set(f) => {
                if f.element.indexed {
                    for pair in self.complex_content(id, field_id)? {
                        let mut reader = ByteReader::new(&pair.key);
                        reader.skip(prefix_len)?;
                        let value = f.element.element.decode_value(&mut reader, &self.registry)?;
                        entry_keys.push(index_entry_key(
                            &self.registry,
                            f.element.storage_id,
                            &f.element.element,
                            &value,
                            id,
                            IndexDisambiguator::None,
                        )?);
                    }
                }
            }
            Field::List(f) => {
                if f.element.indexed {
                    for (position, bytes) in self.list_content(id, f)? {
                        let value = decode_list_value(f, &bytes, &self.registry)?;
                        entry_keys.push(index_entry_key(
                            &self.registry,
                            f.element.storage_id,
                            &f.element.element,
                            &value,
                            id,
                            IndexDisambiguator::ListPosition(position),
                        )?);
                    }
                }
            }
            Field::Map(f) => {
                if f.key.indexed || f.value.indexed {
                    for pair in self.complex_content(id, field_id)? {
                        let key_suffix = pair.key[prefix_len..].to_vec();
                        let mut reader = ByteReader::new(&key_suffix);
                        let key = f.key.element.decode_value(&mut reader, &self.registry)?;
                        if f.key.indexed {
                            entry_keys.push(index_entry_key(
                                &self.registry,
                                f.key.storage_id,
                                &f.key.element,
                                &key,
                                id,
                                IndexDisambiguator::None,
                            )?);
                        }
                        if f.value.indexed {
                            let value = decode_map_value(f, &pair.value, &self.registry)?;
                            entry_keys.push(index_entry_key(
                                &self.registry,
                                f.value.storage_id,
                                &f.value.element,
                                &value,
                                id,
                                IndexDisambiguator::MapKey(&key_suffix),
                            )?);
                        }
                    }
                }
            }
            Field::Simple(_) | Field::Counter(_) => {}
        }
        Ok(entry_keys)
    }

    /// Remove every element whose reference referent belongs to one of
    /// the given object types, as if UNREFERENCE applied, updating
    /// indexes accordingly. Runs without change notifications and
    /// without a version check; the only caller is the schema migration
    /// engine, which invokes this mid-migration.
    pub(crate) fn unreference_removed_object_types(
        &self,
        id: ObjId,
        field: &Field,
        removed: &BTreeSet<StorageId>,
    ) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        let hits = |value: &Value| -> Result<bool> {
            match value.as_reference() {
                Some(referent) => Ok(removed.contains(&referent.storage_id()?)),
                None => Ok(false),
            }
        };
        let prefix_len = keys::field_prefix(id, field.storage_id()).len();
        match field {
            Field::Set(f) => {
                if f.element.element.is_reference() {
                    for pair in self.complex_content(id, f.storage_id)? {
                        let mut reader = ByteReader::new(&pair.key);
                        reader.skip(prefix_len)?;
                        let value = f.element.element.decode_value(&mut reader, &self.registry)?;
                        if hits(&value)? {
                            self.set_remove_inner(id, f, &value)?;
                        }
                    }
                }
            }
            Field::List(f) => {
                if f.element.element.is_reference() {
                    let entries = self.list_content(id, f)?;
                    // Highest positions first, so earlier removals do not
                    // shift the positions still to be removed.
                    for (position, bytes) in entries.iter().rev() {
                        let value = decode_list_value(f, bytes, &self.registry)?;
                        if hits(&value)? {
                            self.list_remove_inner(id, f, *position)?;
                        }
                    }
                }
            }
            Field::Map(f) => {
                if f.key.element.is_reference() || f.value.element.is_reference() {
                    for pair in self.complex_content(id, f.storage_id)? {
                        let mut reader = ByteReader::new(&pair.key);
                        reader.skip(prefix_len)?;
                        let key = f.key.element.decode_value(&mut reader, &self.registry)?;
                        let value = decode_map_value(f, &pair.value, &self.registry)?;
                        if hits(&key)? || hits(&value)? {
                            self.map_remove_inner(id, f, &key)?;
                        }
                    }
                }
            }
            Field::Simple(_) | Field::Counter(_) => {}
        }
        Ok(())
    }
}

fn list_content_key(id: ObjId, field_id: StorageId, position: u32) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    writer.write(&keys::field_prefix(id, field_id));
    writer.write(&position.to_be_bytes());
    writer.into_bytes()
}

fn decode_list_value(
    field: &ListField,
    bytes: &[u8],
    registry: &strata_types::TypeRegistry,
) -> Result<Value> {
    let mut reader = ByteReader::new(bytes);
    let value = field.element.element.decode_value(&mut reader, registry)?;
    reader.expect_end()?;
    Ok(value)
}

fn decode_map_value(
    field: &MapField,
    bytes: &[u8],
    registry: &strata_types::TypeRegistry,
) -> Result<Value> {
    let mut reader = ByteReader::new(bytes);
    let value = field.value.element.decode_value(&mut reader, registry)?;
    reader.expect_end()?;
    Ok(value)
}
