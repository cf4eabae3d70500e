//! Registry of user-defined element type codecs.
//!
//! Built-in element types carry their codec in the [`ElementType`] enum
//! itself; user-defined types are referenced by name and resolved through
//! a [`TypeRegistry`]. The registry is built once at startup and is
//! immutable afterwards, so lookups never race and are always
//! deterministic. Schemas store the *name*, which lets a later schema
//! revision introduce a new name without disturbing data recorded under
//! older names.
//!
//! [`ElementType`]: crate::element::ElementType

use std::collections::HashMap;
use std::sync::Arc;

use strata_error::{Result, StrataError};

use crate::bytes::{ByteReader, ByteWriter};
use crate::value::Value;

/// Codec for one user-defined element type.
///
/// Implementations must uphold the two codec laws of this crate: the
/// encoding is order-preserving under unsigned lexicographic comparison
/// for values the codec accepts, and it is self-delimiting so encoded
/// values can be embedded in composite keys.
pub trait CustomCodec: Send + Sync {
    /// The registered type name.
    fn type_name(&self) -> &str;

    /// The value a freshly created field of this type holds.
    fn default_value(&self) -> Value;

    /// Validate that `value` is acceptable to this codec.
    fn check_value(&self, value: &Value) -> Result<()>;

    /// Append the encoding of `value`.
    fn encode(&self, writer: &mut ByteWriter, value: &Value) -> Result<()>;

    /// Decode one value, consuming exactly its bytes.
    fn decode(&self, reader: &mut ByteReader<'_>) -> Result<Value>;
}

/// Immutable catalog of user-defined codecs, keyed by type name.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    codecs: HashMap<String, Arc<dyn CustomCodec>>,
}

impl TypeRegistry {
    /// A registry with no user-defined types.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a registry.
    #[must_use]
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder {
            codecs: HashMap::new(),
        }
    }

    /// Look up the codec registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn CustomCodec>> {
        self.codecs
            .get(name)
            .ok_or_else(|| StrataError::UnknownTypeName {
                name: name.to_owned(),
            })
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// The default value of the type registered under `name`.
    pub fn default_value(&self, name: &str) -> Result<Value> {
        Ok(self.lookup(name)?.default_value())
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

/// Builder for [`TypeRegistry`]; registration happens only here, which is
/// what makes the built registry immutable.
pub struct TypeRegistryBuilder {
    codecs: HashMap<String, Arc<dyn CustomCodec>>,
}

impl TypeRegistryBuilder {
    /// Register a codec under its own [`CustomCodec::type_name`].
    ///
    /// Fails with [`StrataError::InvalidSchema`] if the name is empty or
    /// already taken.
    pub fn register(mut self, codec: Arc<dyn CustomCodec>) -> Result<Self> {
        let name = codec.type_name().to_owned();
        if name.is_empty() {
            return Err(StrataError::invalid_schema("empty custom type name"));
        }
        if self.codecs.contains_key(&name) {
            return Err(StrataError::invalid_schema(format!(
                "custom type \"{name}\" registered twice"
            )));
        }
        self.codecs.insert(name, codec);
        Ok(self)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            codecs: self.codecs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode_string, encode_string};

    /// Test codec that stores lowercase hex strings.
    struct HexCodec;

    impl CustomCodec for HexCodec {
        fn type_name(&self) -> &str {
            "hex"
        }

        fn default_value(&self) -> Value {
            Value::String(String::new())
        }

        fn check_value(&self, value: &Value) -> Result<()> {
            match value {
                Value::String(s) if s.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
                other => Err(StrataError::TypeMismatch {
                    expected: "hex".into(),
                    actual: other.kind_name().into(),
                }),
            }
        }

        fn encode(&self, writer: &mut ByteWriter, value: &Value) -> Result<()> {
            self.check_value(value)?;
            match value {
                Value::String(s) => {
                    encode_string(writer, s);
                    Ok(())
                }
                _ => unreachable!("check_value accepted a non-string"),
            }
        }

        fn decode(&self, reader: &mut ByteReader<'_>) -> Result<Value> {
            Ok(Value::String(decode_string(reader)?))
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = TypeRegistry::builder()
            .register(Arc::new(HexCodec))
            .unwrap()
            .build();
        assert!(registry.contains("hex"));
        assert!(registry.lookup("hex").is_ok());
        assert!(matches!(
            registry.lookup("missing"),
            Err(StrataError::UnknownTypeName { .. })
        ));
        assert_eq!(
            registry.default_value("hex").unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let result = TypeRegistry::builder()
            .register(Arc::new(HexCodec))
            .unwrap()
            .register(Arc::new(HexCodec));
        assert!(result.is_err());
    }
}
