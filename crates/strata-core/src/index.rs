//! Index entry construction and index query views.
//!
//! Index keys live under the index's storage id:
//!
//! - simple field: `<field-sid> <enc(value)> <ObjId>`
//! - set element: `<sub-sid> <enc(element)> <ObjId>`
//! - list element: `<sub-sid> <enc(element)> <ObjId> <be32 position>`
//! - map key: `<sub-sid> <enc(key)> <ObjId>`
//! - map value: `<sub-sid> <enc(value)> <ObjId> <enc(key)>`
//! - composite: `<index-sid> <enc(v1)> … <enc(vk)> <ObjId>`
//!
//! All index values are encoded *family-normalized*: integers widen to
//! `int64` and floats to `float64` before encoding. Schema versions that
//! differ only in numeric width therefore write byte-identical index
//! entries, which keeps one shared index range decodable even while old
//! objects are still recorded under narrower versions. Queries return
//! values in the normalized type.
//!
//! Query views are O(1) to construct; iteration decodes entries lazily
//! from a buffered range snapshot, and extracting the `ObjId` never
//! requires parsing an entry's trailing disambiguator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_kv::RangeIter;
use strata_schema::{
    CompositeIndex, Field, ListField, MapField, ObjectType, Schema, SetField, SimpleField,
    SubField,
};
use strata_types::{
    encoding, keys, ByteReader, ByteWriter, ElementType, ObjId, StorageId, TypeRegistry, Value,
    EMPTY,
};

use crate::tx::Transaction;

/// The family-normalized element type used inside index keys.
pub(crate) fn normalized_element(element: &ElementType) -> ElementType {
    match element {
        ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64 => {
            ElementType::Int64
        }
        ElementType::Float32 | ElementType::Float64 => ElementType::Float64,
        other => other.clone(),
    }
}

/// Widen a value to its index-normalized form.
pub(crate) fn widen_value(value: &Value) -> Value {
    match value {
        Value::Int8(v) => Value::Int64(i64::from(*v)),
        Value::Int16(v) => Value::Int64(i64::from(*v)),
        Value::Int32(v) => Value::Int64(i64::from(*v)),
        Value::Float32(v) => Value::Float64(f64::from(*v)),
        other => other.clone(),
    }
}

/// Trailing discriminator of an index entry, present when one object may
/// hold the same value several times in one field.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IndexDisambiguator<'a> {
    None,
    ListPosition(u32),
    /// The content-encoded map key.
    MapKey(&'a [u8]),
}

/// Build the key of one index entry.
pub(crate) fn index_entry_key(
    registry: &TypeRegistry,
    index_id: StorageId,
    element: &ElementType,
    value: &Value,
    id: ObjId,
    disambiguator: IndexDisambiguator<'_>,
) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::new();
    index_id.encode(&mut writer);
    normalized_element(element).encode_value(&mut writer, &widen_value(value), registry)?;
    writer.write(id.as_bytes());
    match disambiguator {
        IndexDisambiguator::None => {}
        IndexDisambiguator::ListPosition(position) => writer.write(&position.to_be_bytes()),
        IndexDisambiguator::MapKey(bytes) => writer.write(bytes),
    }
    Ok(writer.into_bytes())
}

/// One indexed storage location resolved from a schema.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot<'a> {
    Simple(&'a SimpleField),
    SetElement(&'a SetField, &'a SubField),
    ListElement(&'a ListField, &'a SubField),
    MapKey(&'a MapField, &'a SubField),
    MapValue(&'a MapField, &'a SubField),
}

impl<'a> Slot<'a> {
    /// The declared element type stored at this slot.
    pub(crate) fn element(&self) -> &'a ElementType {
        match self {
            Slot::Simple(f) => &f.element,
            Slot::SetElement(_, sub)
            | Slot::ListElement(_, sub)
            | Slot::MapKey(_, sub)
            | Slot::MapValue(_, sub) => &sub.element,
        }
    }

    /// Whether entries of this slot are indexed.
    pub(crate) fn indexed(&self) -> bool {
        match self {
            Slot::Simple(f) => f.indexed,
            Slot::SetElement(_, sub)
            | Slot::ListElement(_, sub)
            | Slot::MapKey(_, sub)
            | Slot::MapValue(_, sub) => sub.indexed,
        }
    }

    /// The reference policy attached to this slot, if any.
    pub(crate) fn reference(&self) -> Option<&'a strata_schema::ReferencePolicy> {
        match self {
            Slot::Simple(f) => f.reference.as_ref(),
            Slot::SetElement(_, sub)
            | Slot::ListElement(_, sub)
            | Slot::MapKey(_, sub)
            | Slot::MapValue(_, sub) => sub.reference.as_ref(),
        }
    }

}

/// Find the field or sub-field slot a storage id names within one type.
pub(crate) fn slot_in_type<'a>(object_type: &'a ObjectType, id: StorageId) -> Option<Slot<'a>> {
    for field in &object_type.fields {
        match field {
            Field::Simple(f) if f.storage_id == id => return Some(Slot::Simple(f)),
            Field::Set(f) if f.element.storage_id == id => {
                return Some(Slot::SetElement(f, &f.element))
            }
            Field::List(f) if f.element.storage_id == id => {
                return Some(Slot::ListElement(f, &f.element))
            }
            Field::Map(f) if f.key.storage_id == id => return Some(Slot::MapKey(f, &f.key)),
            Field::Map(f) if f.value.storage_id == id => {
                return Some(Slot::MapValue(f, &f.value))
            }
            _ => {}
        }
    }
    None
}

/// Find a slot anywhere in a schema.
pub(crate) fn slot_in_schema<'a>(
    schema: &'a Schema,
    id: StorageId,
) -> Option<(&'a ObjectType, Slot<'a>)> {
    schema
        .object_types()
        .find_map(|ty| slot_in_type(ty, id).map(|slot| (ty, slot)))
}

/// Find a composite index anywhere in a schema.
pub(crate) fn composite_in_schema<'a>(
    schema: &'a Schema,
    id: StorageId,
) -> Option<(&'a ObjectType, &'a CompositeIndex)> {
    schema
        .object_types()
        .find_map(|ty| ty.composite_index(id).map(|ci| (ty, ci)))
}

impl Transaction {
    pub(crate) fn put_index_entry(&self, key: Vec<u8>) -> Result<()> {
        self.kv_put(key, EMPTY.to_vec())
    }

    pub(crate) fn delete_index_entry(&self, key: &[u8]) -> Result<()> {
        self.kv_remove(key)
    }

    /// Index entry key for a simple field's current value.
    pub(crate) fn simple_index_key(
        &self,
        field: &SimpleField,
        id: ObjId,
        value: &Value,
    ) -> Result<Vec<u8>> {
        index_entry_key(
            &self.registry,
            field.storage_id,
            &field.element,
            value,
            id,
            IndexDisambiguator::None,
        )
    }

    /// Composite entry key for `id`, reading component values under
    /// `schema` except where `substitutions` overrides them.
    pub(crate) fn composite_entry_key(
        &self,
        schema: &Schema,
        object_type: &ObjectType,
        composite: &CompositeIndex,
        id: ObjId,
        substitutions: &BTreeMap<StorageId, Value>,
    ) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        composite.storage_id.encode(&mut writer);
        for &field_id in &composite.fields {
            let component = object_type.composite_component(field_id)?;
            let value = match substitutions.get(&field_id) {
                Some(value) => value.clone(),
                None => self.read_simple_raw(id, component)?,
            };
            normalized_element(&component.element).encode_value(
                &mut writer,
                &widen_value(&value),
                &self.registry,
            )?;
        }
        writer.write(id.as_bytes());
        Ok(writer.into_bytes())
    }

    /// Objects whose indexed reference slot `field_id` currently holds a
    /// reference to `target`.
    pub(crate) fn referrers_via(
        &self,
        field_id: StorageId,
        target: ObjId,
    ) -> Result<BTreeSet<ObjId>> {
        let mut prefix_writer = ByteWriter::new();
        field_id.encode(&mut prefix_writer);
        encoding::encode_reference(&mut prefix_writer, Some(target));
        let prefix = prefix_writer.into_bytes();
        let end = strata_types::key_after_prefix(&prefix);

        let mut referrers = BTreeSet::new();
        for pair in self.kv_get_range(&prefix, end.as_deref(), false)? {
            referrers.insert(entry_obj_id(&pair.key, prefix.len())?);
        }
        Ok(referrers)
    }

    /// Open a query view over a simple (or sub-field) index.
    pub fn query_index(&self, index_id: StorageId) -> Result<IndexQuery<'_>> {
        self.check_usable()?;
        let Some((_, slot)) = slot_in_schema(&self.schema, index_id) else {
            return Err(StrataError::UnknownIndex {
                storage_id: index_id.get(),
            });
        };
        if !slot.indexed() {
            return Err(StrataError::UnknownIndex {
                storage_id: index_id.get(),
            });
        }
        Ok(IndexQuery {
            tx: self,
            index_id,
            element: normalized_element(slot.element()),
        })
    }

    /// Open a query view over a composite index.
    pub fn query_composite_index(&self, index_id: StorageId) -> Result<CompositeIndexQuery<'_>> {
        self.check_usable()?;
        let Some((object_type, composite)) = composite_in_schema(&self.schema, index_id) else {
            return Err(StrataError::UnknownIndex {
                storage_id: index_id.get(),
            });
        };
        let mut elements = Vec::with_capacity(composite.fields.len());
        for &field_id in &composite.fields {
            let component = object_type.composite_component(field_id)?;
            elements.push(normalized_element(&component.element));
        }
        Ok(CompositeIndexQuery {
            tx: self,
            index_id,
            elements,
        })
    }
}

/// Extract the `ObjId` that starts at `offset` in an index entry key.
pub(crate) fn entry_obj_id(key: &[u8], offset: usize) -> Result<ObjId> {
    let mut reader = ByteReader::new(key);
    reader.skip(offset)?;
    ObjId::decode(&mut reader)
}

/// Lazy view over one simple index. Values decode in the normalized
/// element type; within one value, object ids ascend in raw byte order.
pub struct IndexQuery<'tx> {
    tx: &'tx Transaction,
    index_id: StorageId,
    element: ElementType,
}

impl IndexQuery<'_> {
    /// The index's storage id.
    #[must_use]
    pub fn storage_id(&self) -> StorageId {
        self.index_id
    }

    /// Stream all entries in value order.
    pub fn iter(&self) -> Result<IndexEntryIter> {
        let prefix = keys::index_prefix(self.index_id);
        let end = strata_types::key_after_prefix(&prefix);
        let inner = self.tx.kv_get_range(&prefix, end.as_deref(), false)?;
        Ok(IndexEntryIter {
            inner,
            element: self.element.clone(),
            registry: Arc::clone(&self.tx.registry),
            prefix_len: prefix.len(),
        })
    }

    /// The object ids currently holding `value`.
    pub fn get(&self, value: &Value) -> Result<BTreeSet<ObjId>> {
        let wide = widen_value(value);
        self.element.check_value(&wide, &self.tx.registry)?;
        let mut writer = ByteWriter::new();
        self.index_id.encode(&mut writer);
        self.element
            .encode_value(&mut writer, &wide, &self.tx.registry)?;
        let prefix = writer.into_bytes();
        let end = strata_types::key_after_prefix(&prefix);

        let mut ids = BTreeSet::new();
        for pair in self.tx.kv_get_range(&prefix, end.as_deref(), false)? {
            ids.insert(entry_obj_id(&pair.key, prefix.len())?);
        }
        Ok(ids)
    }

    /// Materialize the whole index as a sorted map.
    pub fn to_map(&self) -> Result<BTreeMap<Value, BTreeSet<ObjId>>> {
        let mut map: BTreeMap<Value, BTreeSet<ObjId>> = BTreeMap::new();
        for entry in self.iter()? {
            let (value, id) = entry?;
            map.entry(value).or_default().insert(id);
        }
        Ok(map)
    }
}

/// Iterator over decoded simple-index entries.
pub struct IndexEntryIter {
    inner: RangeIter,
    element: ElementType,
    registry: Arc<TypeRegistry>,
    prefix_len: usize,
}

impl Iterator for IndexEntryIter {
    type Item = Result<(Value, ObjId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.inner.next()?;
        Some(decode_entry(
            &pair.key,
            self.prefix_len,
            &self.element,
            &self.registry,
        ))
    }
}

fn decode_entry(
    key: &[u8],
    prefix_len: usize,
    element: &ElementType,
    registry: &TypeRegistry,
) -> Result<(Value, ObjId)> {
    let mut reader = ByteReader::new(key);
    reader.skip(prefix_len)?;
    let value = element.decode_value(&mut reader, registry)?;
    let id = ObjId::decode(&mut reader)?;
    // Any remaining bytes are the entry's disambiguator; queries never
    // need to interpret it.
    Ok((value, id))
}

/// Lazy view over one composite index.
pub struct CompositeIndexQuery<'tx> {
    tx: &'tx Transaction,
    index_id: StorageId,
    elements: Vec<ElementType>,
}

impl CompositeIndexQuery<'_> {
    /// The index's storage id.
    #[must_use]
    pub fn storage_id(&self) -> StorageId {
        self.index_id
    }

    /// Number of components in the tuple.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.elements.len()
    }

    /// Stream all entries in tuple order: ties break left to right by
    /// component, then by object id.
    pub fn iter(&self) -> Result<CompositeEntryIter> {
        let prefix = keys::index_prefix(self.index_id);
        let end = strata_types::key_after_prefix(&prefix);
        let inner = self.tx.kv_get_range(&prefix, end.as_deref(), false)?;
        Ok(CompositeEntryIter {
            inner,
            elements: self.elements.clone(),
            registry: Arc::clone(&self.tx.registry),
            prefix_len: prefix.len(),
        })
    }

    /// The object ids whose leading components equal `values`. Passing
    /// the full tuple looks up one tuple; a shorter slice queries a
    /// tuple prefix.
    pub fn get(&self, values: &[Value]) -> Result<BTreeSet<ObjId>> {
        if values.len() > self.elements.len() {
            return Err(StrataError::OutOfRange {
                what: format!("composite tuple arity (max {})", self.elements.len()),
                value: values.len().to_string(),
            });
        }
        let mut writer = ByteWriter::new();
        self.index_id.encode(&mut writer);
        for (element, value) in self.elements.iter().zip(values) {
            let wide = widen_value(value);
            element.check_value(&wide, &self.tx.registry)?;
            element.encode_value(&mut writer, &wide, &self.tx.registry)?;
        }
        let prefix = writer.into_bytes();
        let end = strata_types::key_after_prefix(&prefix);

        let mut ids = BTreeSet::new();
        for pair in self.tx.kv_get_range(&prefix, end.as_deref(), false)? {
            // Skip past the remaining components to the trailing id.
            let mut reader = ByteReader::new(&pair.key);
            reader.skip(prefix.len())?;
            for element in &self.elements[values.len()..] {
                element.decode_value(&mut reader, &self.tx.registry)?;
            }
            ids.insert(ObjId::decode(&mut reader)?);
        }
        Ok(ids)
    }

    /// Materialize the whole index as a sorted tuple map.
    pub fn to_map(&self) -> Result<BTreeMap<Vec<Value>, BTreeSet<ObjId>>> {
        let mut map: BTreeMap<Vec<Value>, BTreeSet<ObjId>> = BTreeMap::new();
        for entry in self.iter()? {
            let (tuple, id) = entry?;
            map.entry(tuple).or_default().insert(id);
        }
        Ok(map)
    }
}

/// Iterator over decoded composite-index entries.
pub struct CompositeEntryIter {
    inner: RangeIter,
    elements: Vec<ElementType>,
    registry: Arc<TypeRegistry>,
    prefix_len: usize,
}

impl Iterator for CompositeEntryIter {
    type Item = Result<(Vec<Value>, ObjId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.inner.next()?;
        let decode = || -> Result<(Vec<Value>, ObjId)> {
            let mut reader = ByteReader::new(&pair.key);
            reader.skip(self.prefix_len)?;
            let mut tuple = Vec::with_capacity(self.elements.len());
            for element in &self.elements {
                tuple.push(element.decode_value(&mut reader, &self.registry)?);
            }
            let id = ObjId::decode(&mut reader)?;
            reader.expect_end()?;
            Ok((tuple, id))
        };
        Some(decode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalized_element(&ElementType::Int8), ElementType::Int64);
        assert_eq!(
            normalized_element(&ElementType::Float32),
            ElementType::Float64
        );
        assert_eq!(normalized_element(&ElementType::String), ElementType::String);
        assert_eq!(widen_value(&Value::Int32(-3)), Value::Int64(-3));
        assert_eq!(widen_value(&Value::Float32(1.5)), Value::Float64(1.5));
        assert_eq!(
            widen_value(&Value::String("x".into())),
            Value::String("x".into())
        );
    }

    #[test]
    fn entry_key_layout() {
        let registry = TypeRegistry::empty();
        let sid = StorageId::new(101).unwrap();
        let id = ObjId::new(StorageId::new(100).unwrap(), 1).unwrap();
        let key = index_entry_key(
            &registry,
            sid,
            &ElementType::Int32,
            &Value::Int32(7),
            id,
            IndexDisambiguator::None,
        )
        .unwrap();
        // varint(101) + 8 bytes of widened int64 + 8 id bytes.
        assert_eq!(key.len(), 1 + 8 + 8);
        assert_eq!(key[0], 101);
        assert_eq!(entry_obj_id(&key, 9).unwrap(), id);

        let with_position = index_entry_key(
            &registry,
            sid,
            &ElementType::Int32,
            &Value::Int32(7),
            id,
            IndexDisambiguator::ListPosition(3),
        )
        .unwrap();
        assert_eq!(with_position.len(), key.len() + 4);
        assert!(with_position.starts_with(&key));
    }

    #[test]
    fn widened_widths_share_entry_bytes() {
        let registry = TypeRegistry::empty();
        let sid = StorageId::new(5).unwrap();
        let id = ObjId::new(StorageId::new(2).unwrap(), 9).unwrap();
        let narrow = index_entry_key(
            &registry,
            sid,
            &ElementType::Int16,
            &Value::Int16(42),
            id,
            IndexDisambiguator::None,
        )
        .unwrap();
        let wide = index_entry_key(
            &registry,
            sid,
            &ElementType::Int64,
            &Value::Int64(42),
            id,
            IndexDisambiguator::None,
        )
        .unwrap();
        assert_eq!(narrow, wide);
    }
}
