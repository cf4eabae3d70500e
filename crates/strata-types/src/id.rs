//! Storage ids and object ids.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use strata_error::{Result, StrataError};

use crate::bytes::{ByteReader, ByteWriter};
use crate::varint::{read_varint, varint_len, write_varint};

/// Process-wide small positive integer naming an object type, a field, a
/// sub-field, or a composite index.
///
/// Storage ids are globally unique within one database and stable across
/// schema versions. They appear inside keys as order-preserving varints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct StorageId(NonZeroU32);

impl StorageId {
    /// Create a storage id from a raw u32.
    ///
    /// Returns `None` if `n` is 0; storage id 0 is reserved so that no
    /// content or index key can collide with the meta area.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Length in bytes of this id's varint encoding.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        varint_len(self.0.get())
    }

    /// Append this id's varint encoding.
    pub fn encode(self, writer: &mut ByteWriter) {
        write_varint(writer, self.get());
    }

    /// Decode a storage id from the reader.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let raw = read_varint(reader)?;
        Self::new(raw).ok_or_else(|| StrataError::corrupt("storage id 0 in key"))
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for StorageId {
    type Error = StrataError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value).ok_or_else(|| StrataError::invalid_schema("storage id must be positive"))
    }
}

/// Number of bytes in an [`ObjId`].
pub const OBJ_ID_LEN: usize = 8;

/// An 8-byte object identifier.
///
/// The leading bytes are the varint encoding of the object type's storage
/// id; the remaining bytes hold a big-endian sequence number assigned at
/// creation. All objects of one type therefore occupy one contiguous key
/// range, bounded by the successor of the type's varint prefix.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ObjId([u8; OBJ_ID_LEN]);

impl ObjId {
    /// Assemble an id from an object type's storage id and a per-type
    /// sequence number.
    ///
    /// Fails with [`StrataError::OutOfRange`] once the sequence number no
    /// longer fits the bytes left over after the type prefix.
    pub fn new(type_id: StorageId, sequence: u64) -> Result<Self> {
        let prefix_len = type_id.encoded_len();
        let seq_len = OBJ_ID_LEN - prefix_len;
        if seq_len < 8 && sequence >= 1u64 << (8 * seq_len) {
            return Err(StrataError::OutOfRange {
                what: format!("object sequence number for type {type_id}"),
                value: sequence.to_string(),
            });
        }
        let mut writer = ByteWriter::with_capacity(OBJ_ID_LEN);
        type_id.encode(&mut writer);
        let be = sequence.to_be_bytes();
        writer.write(&be[8 - seq_len..]);
        let mut bytes = [0u8; OBJ_ID_LEN];
        bytes.copy_from_slice(writer.as_slice());
        Ok(Self(bytes))
    }

    /// Reconstruct an id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; OBJ_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; OBJ_ID_LEN] {
        &self.0
    }

    /// Decode the object type's storage id from the leading prefix.
    pub fn storage_id(&self) -> Result<StorageId> {
        let mut reader = ByteReader::new(&self.0);
        StorageId::decode(&mut reader)
    }

    /// Read an id from the next 8 bytes of `reader`.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let slice = reader.read_exact(OBJ_ID_LEN)?;
        let mut bytes = [0u8; OBJ_ID_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Lowercase hex form, 16 characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(OBJ_ID_LEN * 2);
        for b in self.0 {
            use fmt::Write;
            write!(s, "{b:02x}").expect("write to String");
        }
        s
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.to_hex())
    }
}

impl FromStr for ObjId {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != OBJ_ID_LEN * 2 || !s.is_ascii() {
            return Err(StrataError::corrupt(format!("invalid object id \"{s}\"")));
        }
        let mut bytes = [0u8; OBJ_ID_LEN];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = (chunk[0] as char)
                .to_digit(16)
                .ok_or_else(|| StrataError::corrupt(format!("invalid object id \"{s}\"")))?;
            let lo = (chunk[1] as char)
                .to_digit(16)
                .ok_or_else(|| StrataError::corrupt(format!("invalid object id \"{s}\"")))?;
            #[allow(clippy::cast_possible_truncation)]
            {
                bytes[i] = ((hi << 4) | lo) as u8;
            }
        }
        Ok(Self(bytes))
    }
}
