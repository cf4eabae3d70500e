//! Reserved key ranges and key-prefix construction.
//!
//! The keyspace is partitioned by its leading byte. Byte `0x00` opens the
//! meta area; storage ids are positive, and a varint encoding of one id is
//! never a prefix of another id's encoding (the first byte fixes the total
//! length), so content keys (leading `ObjId`, whose first varint is the
//! object type's storage id) and index keys (leading field or composite
//! storage id) can collide neither with the meta area nor with each other.
//!
//! | Key | Value |
//! |---|---|
//! | `0x00 0x00` | database format version (varint) |
//! | `0x00 0x01 <varint version>` | canonical schema bytes |
//! | `0x00 0x02 <varint type-sid>` | next object sequence number (u64 BE) |
//! | `<ObjId>` | object meta: varint schema version + flags byte |
//! | `<ObjId> <varint field-sid> ...` | field content |
//! | `<varint index-sid> ...` | index entries |

use crate::bytes::{ByteReader, ByteWriter};
use crate::id::{ObjId, StorageId};
use crate::varint::{read_varint, varint_bytes, write_varint};
use strata_error::Result;

/// Leading byte of the meta area.
pub const META_PREFIX: u8 = 0x00;

/// Key of the database format version.
pub const FORMAT_VERSION_KEY: &[u8] = &[META_PREFIX, 0x00];

/// Prefix of the schema catalog.
pub const CATALOG_PREFIX: &[u8] = &[META_PREFIX, 0x01];

/// Prefix of the per-type object sequence counters.
pub const COUNTER_PREFIX: &[u8] = &[META_PREFIX, 0x02];

/// Format version written by this build.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// First key after the whole meta area.
pub const META_AREA_END: &[u8] = &[0x01];

/// Catalog key of one recorded schema version.
#[must_use]
pub fn catalog_key(version: u32) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(CATALOG_PREFIX.len() + 5);
    writer.write(CATALOG_PREFIX);
    write_varint(&mut writer, version);
    writer.into_bytes()
}

/// Extract the version from a catalog key.
pub fn parse_catalog_key(key: &[u8]) -> Result<u32> {
    let mut reader = ByteReader::new(key);
    reader.skip(CATALOG_PREFIX.len())?;
    let version = read_varint(&mut reader)?;
    reader.expect_end()?;
    Ok(version)
}

/// Counter key holding the next object sequence number of one type.
#[must_use]
pub fn counter_key(type_id: StorageId) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(COUNTER_PREFIX.len() + 5);
    writer.write(COUNTER_PREFIX);
    type_id.encode(&mut writer);
    writer.into_bytes()
}

/// The object meta key: the id bytes themselves.
#[must_use]
pub fn obj_meta_key(id: ObjId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Prefix of every key belonging to one object (meta, simple fields,
/// complex field content).
#[must_use]
pub fn obj_prefix(id: ObjId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Prefix of one field's content keys within one object.
#[must_use]
pub fn field_prefix(id: ObjId, field_id: StorageId) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(8 + 5);
    writer.write(id.as_bytes());
    field_id.encode(&mut writer);
    writer.into_bytes()
}

/// Prefix of every ObjId of one object type: the type's varint.
#[must_use]
pub fn type_prefix(type_id: StorageId) -> Vec<u8> {
    varint_bytes(type_id.get())
}

/// Prefix of one index's entries: the index storage id's varint.
#[must_use]
pub fn index_prefix(index_id: StorageId) -> Vec<u8> {
    varint_bytes(index_id.get())
}
