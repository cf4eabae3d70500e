//! Order-preserving scalar encodings.
//!
//! Every encoding here satisfies two properties relied on throughout the
//! engine:
//!
//! - **Order**: for same-typed values `a < b` iff `enc(a) < enc(b)` under
//!   unsigned lexicographic byte comparison.
//! - **Self-delimiting**: a decoder positioned at the start of an encoded
//!   value consumes exactly its bytes, so values can be concatenated
//!   inside composite keys and split apart again.
//!
//! Signed integers flip the sign bit and store big-endian. Floats map to
//! their total-order bit key (flip everything for negatives, flip the
//! sign bit otherwise). Strings and byte strings terminate with `0x00`
//! and escape in-content `0x00`/`0x01` as `0x01 0x01`/`0x01 0x02`; the
//! terminator is smaller than every escaped or literal content byte, so
//! prefixes sort first.

use strata_error::{Result, StrataError};

use crate::bytes::{ByteReader, ByteWriter};
use crate::id::ObjId;
use crate::value::{f32_order_key, f64_order_key};

/// Terminator byte for string and byte-string encodings.
const TERMINATOR: u8 = 0x00;
/// Escape lead byte for string and byte-string encodings.
const ESCAPE: u8 = 0x01;

/// First byte of a null reference encoding.
const REF_NULL: u8 = 0x00;
/// First byte of a non-null reference encoding.
const REF_PRESENT: u8 = 0x01;

pub fn encode_bool(writer: &mut ByteWriter, value: bool) {
    writer.write_u8(u8::from(value));
}

pub fn decode_bool(reader: &mut ByteReader<'_>) -> Result<bool> {
    match reader.read_u8()? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(StrataError::corrupt(format!(
            "invalid boolean byte {other:#04x}"
        ))),
    }
}

macro_rules! signed_int_codec {
    ($encode:ident, $decode:ident, $ty:ty, $uty:ty, $flip:expr) => {
        pub fn $encode(writer: &mut ByteWriter, value: $ty) {
            #[allow(clippy::cast_sign_loss)]
            let flipped = (value as $uty) ^ $flip;
            writer.write(&flipped.to_be_bytes());
        }

        pub fn $decode(reader: &mut ByteReader<'_>) -> Result<$ty> {
            let bytes = reader.read_exact(std::mem::size_of::<$ty>())?;
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(bytes);
            #[allow(clippy::cast_possible_wrap)]
            Ok((<$uty>::from_be_bytes(buf) ^ $flip) as $ty)
        }
    };
}

signed_int_codec!(encode_i8, decode_i8, i8, u8, 0x80);
signed_int_codec!(encode_i16, decode_i16, i16, u16, 0x8000);
signed_int_codec!(encode_i32, decode_i32, i32, u32, 0x8000_0000);
signed_int_codec!(encode_i64, decode_i64, i64, u64, 0x8000_0000_0000_0000);

pub fn encode_f32(writer: &mut ByteWriter, value: f32) {
    writer.write(&f32_order_key(value).to_be_bytes());
}

pub fn decode_f32(reader: &mut ByteReader<'_>) -> Result<f32> {
    let bytes = reader.read_exact(4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    let key = u32::from_be_bytes(buf);
    let bits = if key & 0x8000_0000 != 0 {
        key ^ 0x8000_0000
    } else {
        !key
    };
    Ok(f32::from_bits(bits))
}

pub fn encode_f64(writer: &mut ByteWriter, value: f64) {
    writer.write(&f64_order_key(value).to_be_bytes());
}

pub fn decode_f64(reader: &mut ByteReader<'_>) -> Result<f64> {
    let bytes = reader.read_exact(8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    let key = u64::from_be_bytes(buf);
    let bits = if key & 0x8000_0000_0000_0000 != 0 {
        key ^ 0x8000_0000_0000_0000
    } else {
        !key
    };
    Ok(f64::from_bits(bits))
}

/// Encode raw bytes with escaping and the terminator.
pub fn encode_bytes(writer: &mut ByteWriter, value: &[u8]) {
    for &b in value {
        match b {
            TERMINATOR => {
                writer.write_u8(ESCAPE);
                writer.write_u8(0x01);
            }
            ESCAPE => {
                writer.write_u8(ESCAPE);
                writer.write_u8(0x02);
            }
            other => writer.write_u8(other),
        }
    }
    writer.write_u8(TERMINATOR);
}

/// Decode an escaped, terminated byte string.
pub fn decode_bytes(reader: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match reader.read_u8()? {
            TERMINATOR => return Ok(out),
            ESCAPE => match reader.read_u8()? {
                0x01 => out.push(0x00),
                0x02 => out.push(0x01),
                other => {
                    return Err(StrataError::corrupt(format!(
                        "invalid escape byte {other:#04x}"
                    )))
                }
            },
            other => out.push(other),
        }
    }
}

pub fn encode_string(writer: &mut ByteWriter, value: &str) {
    encode_bytes(writer, value.as_bytes());
}

pub fn decode_string(reader: &mut ByteReader<'_>) -> Result<String> {
    let bytes = decode_bytes(reader)?;
    String::from_utf8(bytes).map_err(|_| StrataError::corrupt("invalid UTF-8 in string value"))
}

/// Encode a nullable reference. Null sorts before every object id.
pub fn encode_reference(writer: &mut ByteWriter, value: Option<ObjId>) {
    match value {
        None => writer.write_u8(REF_NULL),
        Some(id) => {
            writer.write_u8(REF_PRESENT);
            writer.write(id.as_bytes());
        }
    }
}

pub fn decode_reference(reader: &mut ByteReader<'_>) -> Result<Option<ObjId>> {
    match reader.read_u8()? {
        REF_NULL => Ok(None),
        REF_PRESENT => Ok(Some(ObjId::decode(reader)?)),
        other => Err(StrataError::corrupt(format!(
            "invalid reference tag {other:#04x}"
        ))),
    }
}
