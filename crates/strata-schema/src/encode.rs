//! Canonical schema serialization.
//!
//! Recorded schemas are compared by their bytes, so the encoding must be
//! stable: fields and types are written in storage-id order regardless of
//! definition order, collections in sorted order, and every tag is fixed.
//! This is a value encoding (length-prefixed strings, plain varints); it
//! never appears inside keys.

use strata_error::{Result, StrataError};
use strata_types::{
    read_varint, write_varint, ByteReader, ByteWriter, ElementType, EnumDef, StorageId,
};

use crate::model::{
    CompositeIndex, CounterField, DeleteAction, Field, ListField, MapField, ObjectType,
    ReferencePolicy, Schema, SetField, SimpleField, SubField,
};

/// Leading byte of every canonical schema encoding.
const SCHEMA_FORMAT: u8 = 0x01;

const FIELD_SIMPLE: u8 = 0;
const FIELD_COUNTER: u8 = 1;
const FIELD_SET: u8 = 2;
const FIELD_LIST: u8 = 3;
const FIELD_MAP: u8 = 4;

const ELEM_BOOL: u8 = 0;
const ELEM_INT8: u8 = 1;
const ELEM_INT16: u8 = 2;
const ELEM_INT32: u8 = 3;
const ELEM_INT64: u8 = 4;
const ELEM_FLOAT32: u8 = 5;
const ELEM_FLOAT64: u8 = 6;
const ELEM_STRING: u8 = 7;
const ELEM_BYTES: u8 = 8;
const ELEM_ENUM: u8 = 9;
const ELEM_REFERENCE: u8 = 10;
const ELEM_CUSTOM: u8 = 11;

/// Serialize a schema to its canonical byte form.
#[must_use]
pub fn encode_schema(schema: &Schema) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u8(SCHEMA_FORMAT);
    write_varint(&mut w, schema.version());

    let types: Vec<&ObjectType> = schema.object_types().collect();
    write_len(&mut w, types.len());
    for object_type in types {
        write_object_type(&mut w, object_type);
    }
    w.into_bytes()
}

/// Decode and re-validate a canonical schema.
pub fn decode_schema(bytes: &[u8]) -> Result<Schema> {
    let mut r = ByteReader::new(bytes);
    let format = r.read_u8()?;
    if format != SCHEMA_FORMAT {
        return Err(StrataError::corrupt(format!(
            "unsupported schema format byte {format:#04x}"
        )));
    }
    let version = read_varint(&mut r)?;
    let type_count = read_len(&mut r)?;
    let mut types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        types.push(read_object_type(&mut r)?);
    }
    r.expect_end()?;
    Schema::new(version, types)
}

fn write_len(w: &mut ByteWriter, len: usize) {
    write_varint(w, u32::try_from(len).expect("collection length fits u32"));
}

fn read_len(r: &mut ByteReader<'_>) -> Result<usize> {
    Ok(read_varint(r)? as usize)
}

fn write_string(w: &mut ByteWriter, s: &str) {
    write_len(w, s.len());
    w.write(s.as_bytes());
}

fn read_string(r: &mut ByteReader<'_>) -> Result<String> {
    let len = read_len(r)?;
    let bytes = r.read_exact(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StrataError::corrupt("invalid UTF-8 in schema string"))
}

fn write_storage_id(w: &mut ByteWriter, id: StorageId) {
    write_varint(w, id.get());
}

fn read_storage_id(r: &mut ByteReader<'_>) -> Result<StorageId> {
    StorageId::new(read_varint(r)?)
        .ok_or_else(|| StrataError::corrupt("storage id 0 in schema encoding"))
}

fn write_object_type(w: &mut ByteWriter, object_type: &ObjectType) {
    write_storage_id(w, object_type.storage_id);
    write_string(w, &object_type.name);

    let mut fields: Vec<&Field> = object_type.fields.iter().collect();
    fields.sort_by_key(|f| f.storage_id());
    write_len(w, fields.len());
    for field in fields {
        write_field(w, field);
    }

    let mut composites: Vec<&CompositeIndex> = object_type.composite_indexes.iter().collect();
    composites.sort_by_key(|ci| ci.storage_id);
    write_len(w, composites.len());
    for ci in composites {
        write_storage_id(w, ci.storage_id);
        write_string(w, &ci.name);
        write_len(w, ci.fields.len());
        for &field_id in &ci.fields {
            write_storage_id(w, field_id);
        }
    }
}

fn read_object_type(r: &mut ByteReader<'_>) -> Result<ObjectType> {
    let storage_id = read_storage_id(r)?;
    let name = read_string(r)?;
    let mut object_type = ObjectType::new(name, storage_id);

    let field_count = read_len(r)?;
    for _ in 0..field_count {
        object_type.fields.push(read_field(r)?);
    }

    let composite_count = read_len(r)?;
    for _ in 0..composite_count {
        let storage_id = read_storage_id(r)?;
        let name = read_string(r)?;
        let arity = read_len(r)?;
        let mut fields = Vec::with_capacity(arity);
        for _ in 0..arity {
            fields.push(read_storage_id(r)?);
        }
        object_type
            .composite_indexes
            .push(CompositeIndex::new(name, storage_id, fields));
    }
    Ok(object_type)
}

fn write_field(w: &mut ByteWriter, field: &Field) {
    match field {
        Field::Simple(f) => {
            w.write_u8(FIELD_SIMPLE);
            write_storage_id(w, f.storage_id);
            write_string(w, &f.name);
            write_element(w, &f.element);
            w.write_u8(u8::from(f.indexed));
            write_reference_policy(w, &f.reference);
        }
        Field::Counter(f) => {
            w.write_u8(FIELD_COUNTER);
            write_storage_id(w, f.storage_id);
            write_string(w, &f.name);
        }
        Field::Set(f) => {
            w.write_u8(FIELD_SET);
            write_storage_id(w, f.storage_id);
            write_string(w, &f.name);
            write_sub_field(w, &f.element);
        }
        Field::List(f) => {
            w.write_u8(FIELD_LIST);
            write_storage_id(w, f.storage_id);
            write_string(w, &f.name);
            write_sub_field(w, &f.element);
        }
        Field::Map(f) => {
            w.write_u8(FIELD_MAP);
            write_storage_id(w, f.storage_id);
            write_string(w, &f.name);
            write_sub_field(w, &f.key);
            write_sub_field(w, &f.value);
        }
    }
}

fn read_field(r: &mut ByteReader<'_>) -> Result<Field> {
    let kind = r.read_u8()?;
    let storage_id = read_storage_id(r)?;
    let name = read_string(r)?;
    Ok(match kind {
        FIELD_SIMPLE => {
            let element = read_element(r)?;
            let indexed = read_bool(r)?;
            let reference = read_reference_policy(r)?;
            Field::Simple(SimpleField {
                name,
                storage_id,
                element,
                indexed,
                reference,
            })
        }
        FIELD_COUNTER => Field::Counter(CounterField { name, storage_id }),
        FIELD_SET => Field::Set(SetField {
            name,
            storage_id,
            element: read_sub_field(r)?,
        }),
        FIELD_LIST => Field::List(ListField {
            name,
            storage_id,
            element: read_sub_field(r)?,
        }),
        FIELD_MAP => Field::Map(MapField {
            name,
            storage_id,
            key: read_sub_field(r)?,
            value: read_sub_field(r)?,
        }),
        other => {
            return Err(StrataError::corrupt(format!(
                "invalid field kind tag {other}"
            )))
        }
    })
}

fn write_sub_field(w: &mut ByteWriter, sub: &SubField) {
    write_storage_id(w, sub.storage_id);
    write_element(w, &sub.element);
    w.write_u8(u8::from(sub.indexed));
    write_reference_policy(w, &sub.reference);
}

fn read_sub_field(r: &mut ByteReader<'_>) -> Result<SubField> {
    Ok(SubField {
        storage_id: read_storage_id(r)?,
        element: read_element(r)?,
        indexed: read_bool(r)?,
        reference: read_reference_policy(r)?,
    })
}

fn write_element(w: &mut ByteWriter, element: &ElementType) {
    match element {
        ElementType::Bool => w.write_u8(ELEM_BOOL),
        ElementType::Int8 => w.write_u8(ELEM_INT8),
        ElementType::Int16 => w.write_u8(ELEM_INT16),
        ElementType::Int32 => w.write_u8(ELEM_INT32),
        ElementType::Int64 => w.write_u8(ELEM_INT64),
        ElementType::Float32 => w.write_u8(ELEM_FLOAT32),
        ElementType::Float64 => w.write_u8(ELEM_FLOAT64),
        ElementType::String => w.write_u8(ELEM_STRING),
        ElementType::Bytes => w.write_u8(ELEM_BYTES),
        ElementType::Enum(def) => {
            w.write_u8(ELEM_ENUM);
            write_string(w, &def.name);
            write_len(w, def.variants.len());
            for variant in &def.variants {
                write_string(w, variant);
            }
        }
        ElementType::Reference => w.write_u8(ELEM_REFERENCE),
        ElementType::Custom(name) => {
            w.write_u8(ELEM_CUSTOM);
            write_string(w, name);
        }
    }
}

fn read_element(r: &mut ByteReader<'_>) -> Result<ElementType> {
    Ok(match r.read_u8()? {
        ELEM_BOOL => ElementType::Bool,
        ELEM_INT8 => ElementType::Int8,
        ELEM_INT16 => ElementType::Int16,
        ELEM_INT32 => ElementType::Int32,
        ELEM_INT64 => ElementType::Int64,
        ELEM_FLOAT32 => ElementType::Float32,
        ELEM_FLOAT64 => ElementType::Float64,
        ELEM_STRING => ElementType::String,
        ELEM_BYTES => ElementType::Bytes,
        ELEM_ENUM => {
            let name = read_string(r)?;
            let count = read_len(r)?;
            let mut variants = Vec::with_capacity(count);
            for _ in 0..count {
                variants.push(read_string(r)?);
            }
            ElementType::Enum(EnumDef::new(name, variants)?)
        }
        ELEM_REFERENCE => ElementType::Reference,
        ELEM_CUSTOM => ElementType::Custom(read_string(r)?),
        other => {
            return Err(StrataError::corrupt(format!(
                "invalid element type tag {other}"
            )))
        }
    })
}

fn write_reference_policy(w: &mut ByteWriter, policy: &Option<ReferencePolicy>) {
    match policy {
        None => w.write_u8(0),
        Some(policy) => {
            w.write_u8(1);
            w.write_u8(policy.on_delete.tag());
            match &policy.allowed_types {
                None => w.write_u8(0),
                Some(types) => {
                    w.write_u8(1);
                    write_len(w, types.len());
                    // BTreeSet iterates sorted, keeping the form canonical.
                    for &type_id in types {
                        write_storage_id(w, type_id);
                    }
                }
            }
        }
    }
}

fn read_reference_policy(r: &mut ByteReader<'_>) -> Result<Option<ReferencePolicy>> {
    if !read_bool(r)? {
        return Ok(None);
    }
    let on_delete = DeleteAction::from_tag(r.read_u8()?)?;
    let allowed_types = if read_bool(r)? {
        let count = read_len(r)?;
        let mut types = std::collections::BTreeSet::new();
        for _ in 0..count {
            types.insert(read_storage_id(r)?);
        }
        Some(types)
    } else {
        None
    };
    Ok(Some(ReferencePolicy {
        on_delete,
        allowed_types,
    }))
}

fn read_bool(r: &mut ByteReader<'_>) -> Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StrataError::corrupt(format!(
            "invalid boolean tag {other} in schema encoding"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u32) -> StorageId {
        StorageId::new(n).unwrap()
    }

    fn sample_schema() -> Schema {
        Schema::new(
            3,
            vec![
                ObjectType::new("person", sid(100))
                    .with_field(SimpleField::new("age", sid(101), ElementType::Int32).indexed())
                    .with_field(
                        SimpleField::new("friend", sid(102), ElementType::Reference)
                            .indexed()
                            .with_reference(
                                ReferencePolicy::new(DeleteAction::Unreference)
                                    .restricted_to([sid(100)]),
                            ),
                    )
                    .with_field(CounterField::new("visits", sid(103)))
                    .with_field(Field::Set(SetField {
                        name: "tags".into(),
                        storage_id: sid(104),
                        element: SubField::new(sid(105), ElementType::String).indexed(),
                    }))
                    .with_field(Field::Map(MapField {
                        name: "scores".into(),
                        storage_id: sid(106),
                        key: SubField::new(sid(107), ElementType::String),
                        value: SubField::new(sid(108), ElementType::Int64).indexed(),
                    }))
                    .with_composite_index(CompositeIndex::new(
                        "age_friend",
                        sid(110),
                        vec![sid(101), sid(102)],
                    )),
                ObjectType::new("event", sid(200)).with_field(Field::List(ListField {
                    name: "codes".into(),
                    storage_id: sid(201),
                    element: SubField::new(
                        sid(202),
                        ElementType::Enum(
                            EnumDef::new("code", vec!["a".into(), "b".into()]).unwrap(),
                        ),
                    ),
                })),
            ],
        )
        .unwrap()
    }

    #[test]
    fn roundtrip() {
        let schema = sample_schema();
        let bytes = encode_schema(&schema);
        let decoded = decode_schema(&bytes).unwrap();
        assert_eq!(decoded, schema);
        assert_eq!(encode_schema(&decoded), bytes);
    }

    #[test]
    fn encoding_is_order_independent() {
        // Same fields in a different definition order produce identical
        // canonical bytes.
        let a = Schema::new(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))
                .with_field(SimpleField::new("y", sid(3), ElementType::Bool))],
        )
        .unwrap();
        let b = Schema::new(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("y", sid(3), ElementType::Bool))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        )
        .unwrap();
        assert_eq!(encode_schema(&a), encode_schema(&b));
    }

    #[test]
    fn different_schemas_differ() {
        let a = Schema::new(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        )
        .unwrap();
        let b = Schema::new(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32).indexed())],
        )
        .unwrap();
        assert_ne!(encode_schema(&a), encode_schema(&b));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_schema(&[]).is_err());
        assert!(decode_schema(&[0x02]).is_err());
        let mut bytes = encode_schema(&sample_schema());
        bytes.push(0x00);
        assert!(decode_schema(&bytes).is_err());
    }
}
