//! Field element types and their codecs.

use strata_error::{Result, StrataError};

use crate::bytes::{ByteReader, ByteWriter};
use crate::encoding;
use crate::registry::TypeRegistry;
use crate::value::Value;
use crate::varint::{read_varint, write_varint};

/// Definition of an enum element type: a name plus an ordered variant
/// list. Values are stored as variant ordinals, so reordering variants
/// between schema versions changes the meaning of stored data; the
/// compatibility rules treat any change to an enum definition as a
/// different element type.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    /// Create a validated definition.
    pub fn new(name: impl Into<String>, variants: Vec<String>) -> Result<Self> {
        let def = Self {
            name: name.into(),
            variants,
        };
        def.validate()?;
        Ok(def)
    }

    /// Reject degenerate definitions: an empty name, an empty variant
    /// list, or duplicate/empty variant names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StrataError::invalid_schema("enum with empty name"));
        }
        if self.variants.is_empty() {
            return Err(StrataError::invalid_schema(format!(
                "enum \"{}\" has no variants",
                self.name
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for variant in &self.variants {
            if variant.is_empty() {
                return Err(StrataError::invalid_schema(format!(
                    "enum \"{}\" has an empty variant name",
                    self.name
                )));
            }
            if !seen.insert(variant.as_str()) {
                return Err(StrataError::invalid_schema(format!(
                    "enum \"{}\" repeats variant \"{variant}\"",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Number of variants.
    #[must_use]
    pub fn arity(&self) -> u32 {
        u32::try_from(self.variants.len()).expect("variant count fits u32")
    }
}

/// The type of one simple field or sub-field element.
///
/// Each variant pairs a value shape with an order-preserving,
/// self-delimiting codec. `Custom` types are resolved by name through the
/// [`TypeRegistry`] at encode/decode time.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Enum(EnumDef),
    Reference,
    Custom(String),
}

impl ElementType {
    /// Human-readable name for error messages and schema dumps.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Bool => "bool".into(),
            Self::Int8 => "int8".into(),
            Self::Int16 => "int16".into(),
            Self::Int32 => "int32".into(),
            Self::Int64 => "int64".into(),
            Self::Float32 => "float32".into(),
            Self::Float64 => "float64".into(),
            Self::String => "string".into(),
            Self::Bytes => "bytes".into(),
            Self::Enum(def) => format!("enum<{}>", def.name),
            Self::Reference => "reference".into(),
            Self::Custom(name) => format!("custom<{name}>"),
        }
    }

    /// Whether this element type holds object references.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference)
    }

    /// The value a freshly created field of this type reads as.
    pub fn default_value(&self, registry: &TypeRegistry) -> Result<Value> {
        Ok(match self {
            Self::Bool => Value::Bool(false),
            Self::Int8 => Value::Int8(0),
            Self::Int16 => Value::Int16(0),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Float32 => Value::Float32(0.0),
            Self::Float64 => Value::Float64(0.0),
            Self::String => Value::String(String::new()),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::Enum(_) => Value::Enum(0),
            Self::Reference => Value::Reference(None),
            Self::Custom(name) => registry.default_value(name)?,
        })
    }

    /// Validate that `value` matches this element type.
    pub fn check_value(&self, value: &Value, registry: &TypeRegistry) -> Result<()> {
        let ok = match (self, value) {
            (Self::Bool, Value::Bool(_))
            | (Self::Int8, Value::Int8(_))
            | (Self::Int16, Value::Int16(_))
            | (Self::Int32, Value::Int32(_))
            | (Self::Int64, Value::Int64(_))
            | (Self::Float32, Value::Float32(_))
            | (Self::Float64, Value::Float64(_))
            | (Self::String, Value::String(_))
            | (Self::Bytes, Value::Bytes(_))
            | (Self::Reference, Value::Reference(_)) => true,
            (Self::Enum(def), Value::Enum(ordinal)) => {
                if *ordinal >= def.arity() {
                    return Err(StrataError::OutOfRange {
                        what: format!("ordinal of enum \"{}\"", def.name),
                        value: ordinal.to_string(),
                    });
                }
                true
            }
            (Self::Custom(name), _) => {
                return registry.lookup(name)?.check_value(value);
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(StrataError::TypeMismatch {
                expected: self.name(),
                actual: value.kind_name().into(),
            })
        }
    }

    /// Append the encoding of `value`, which must match this type.
    pub fn encode_value(
        &self,
        writer: &mut ByteWriter,
        value: &Value,
        registry: &TypeRegistry,
    ) -> Result<()> {
        self.check_value(value, registry)?;
        match (self, value) {
            (Self::Bool, Value::Bool(v)) => encoding::encode_bool(writer, *v),
            (Self::Int8, Value::Int8(v)) => encoding::encode_i8(writer, *v),
            (Self::Int16, Value::Int16(v)) => encoding::encode_i16(writer, *v),
            (Self::Int32, Value::Int32(v)) => encoding::encode_i32(writer, *v),
            (Self::Int64, Value::Int64(v)) => encoding::encode_i64(writer, *v),
            (Self::Float32, Value::Float32(v)) => encoding::encode_f32(writer, *v),
            (Self::Float64, Value::Float64(v)) => encoding::encode_f64(writer, *v),
            (Self::String, Value::String(v)) => encoding::encode_string(writer, v),
            (Self::Bytes, Value::Bytes(v)) => encoding::encode_bytes(writer, v),
            (Self::Enum(_), Value::Enum(ordinal)) => write_varint(writer, *ordinal),
            (Self::Reference, Value::Reference(v)) => encoding::encode_reference(writer, *v),
            (Self::Custom(name), v) => registry.lookup(name)?.encode(writer, v)?,
            _ => unreachable!("check_value accepted a mismatched value"),
        }
        Ok(())
    }

    /// Decode one value of this type, consuming exactly its bytes.
    pub fn decode_value(
        &self,
        reader: &mut ByteReader<'_>,
        registry: &TypeRegistry,
    ) -> Result<Value> {
        Ok(match self {
            Self::Bool => Value::Bool(encoding::decode_bool(reader)?),
            Self::Int8 => Value::Int8(encoding::decode_i8(reader)?),
            Self::Int16 => Value::Int16(encoding::decode_i16(reader)?),
            Self::Int32 => Value::Int32(encoding::decode_i32(reader)?),
            Self::Int64 => Value::Int64(encoding::decode_i64(reader)?),
            Self::Float32 => Value::Float32(encoding::decode_f32(reader)?),
            Self::Float64 => Value::Float64(encoding::decode_f64(reader)?),
            Self::String => Value::String(encoding::decode_string(reader)?),
            Self::Bytes => Value::Bytes(encoding::decode_bytes(reader)?),
            Self::Enum(_) => Value::Enum(read_varint(reader)?),
            Self::Reference => Value::Reference(encoding::decode_reference(reader)?),
            Self::Custom(name) => registry.lookup(name)?.decode(reader)?,
        })
    }

    /// Whether two element types may share a storage id across schema
    /// versions: identical, or within the signed-integer family, or
    /// within the float family (the migration engine re-encodes when the
    /// width differs).
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        matches!(
            (self.numeric_family(), other.numeric_family()),
            (Some(a), Some(b)) if a == b
        )
    }

    const fn numeric_family(&self) -> Option<u8> {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => Some(0),
            Self::Float32 | Self::Float64 => Some(1),
            _ => None,
        }
    }

    /// Convert a value of this type into `target`, used when a schema
    /// migration changes a field's element type within a compatible
    /// family. Narrowing conversions that cannot represent the value
    /// fail with [`StrataError::TypeMismatch`].
    pub fn convert_to(&self, target: &Self, value: Value) -> Result<Value> {
        if self == target {
            return Ok(value);
        }
        let mismatch = |actual: &Value| StrataError::TypeMismatch {
            expected: target.name(),
            actual: actual.kind_name().into(),
        };
        match target {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => {
                let wide = match &value {
                    Value::Int8(v) => i64::from(*v),
                    Value::Int16(v) => i64::from(*v),
                    Value::Int32(v) => i64::from(*v),
                    Value::Int64(v) => *v,
                    other => return Err(mismatch(other)),
                };
                let narrow_err = || StrataError::OutOfRange {
                    what: format!("value converted to {}", target.name()),
                    value: wide.to_string(),
                };
                Ok(match target {
                    Self::Int8 => Value::Int8(i8::try_from(wide).map_err(|_| narrow_err())?),
                    Self::Int16 => Value::Int16(i16::try_from(wide).map_err(|_| narrow_err())?),
                    Self::Int32 => Value::Int32(i32::try_from(wide).map_err(|_| narrow_err())?),
                    Self::Int64 => Value::Int64(wide),
                    _ => unreachable!(),
                })
            }
            Self::Float32 => match value {
                #[allow(clippy::cast_possible_truncation)]
                Value::Float64(v) => Ok(Value::Float32(v as f32)),
                Value::Float32(_) => Ok(value),
                ref other => Err(mismatch(other)),
            },
            Self::Float64 => match value {
                Value::Float32(v) => Ok(Value::Float64(f64::from(v))),
                Value::Float64(_) => Ok(value),
                ref other => Err(mismatch(other)),
            },
            _ => Err(mismatch(&value)),
        }
    }
}
