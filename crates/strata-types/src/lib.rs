//! Core types for strata: the order-preserving byte codec, storage and
//! object identifiers, the dynamic value model, field element types, and
//! the registry of user-defined codecs.
//!
//! Everything that touches key bytes lives here so the higher layers
//! (schema, object engine, indexes) never hand-roll an encoding.

pub mod bytes;
pub mod element;
pub mod encoding;
pub mod id;
pub mod keys;
pub mod registry;
pub mod value;
pub mod varint;

pub use bytes::{key_after_prefix, ByteReader, ByteWriter, EMPTY};
pub use element::{ElementType, EnumDef};
pub use id::{ObjId, StorageId, OBJ_ID_LEN};
pub use registry::{CustomCodec, TypeRegistry, TypeRegistryBuilder};
pub use value::Value;
pub use varint::{encoded_length, read_varint, varint_bytes, varint_len, write_varint};
