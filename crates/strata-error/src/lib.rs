use thiserror::Error;

/// Primary error type for strata operations.
///
/// Every error kind that callers need to distinguish has its own variant.
/// Variants carry enough context to produce a useful message but avoid
/// holding references into engine state; object ids appear pre-formatted
/// as hex strings so this crate stays at the bottom of the dependency
/// graph.
#[derive(Error, Debug)]
pub enum StrataError {
    // === Schema errors ===
    /// Two schemas disagree about a shared storage id.
    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    /// A proposed schema is rejected by validation or by the catalog.
    #[error("invalid schema: {detail}")]
    InvalidSchema { detail: String },

    /// An object id's storage id has no object type in the relevant schema.
    #[error("storage id {storage_id} has no object type in schema version {version}")]
    UnknownType { storage_id: u32, version: u32 },

    /// A registered type name has no codec in the type registry.
    #[error("no codec registered for type name \"{name}\"")]
    UnknownTypeName { name: String },

    // === Object errors ===
    /// A read or write targeted a nonexistent object.
    #[error("object {id} not found")]
    DeletedObject { id: String },

    /// A field storage id is not a field of the object's type.
    #[error("storage id {storage_id} is not a field of object type \"{object_type}\"")]
    UnknownField {
        object_type: String,
        storage_id: u32,
    },

    /// A value does not match the declared element type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A storage id names no index in the transaction's schema.
    #[error("storage id {storage_id} is not an indexed field or composite index")]
    UnknownIndex { storage_id: u32 },

    /// Deletion was blocked by a reverse reference with the EXCEPTION
    /// on-delete disposition.
    #[error("object {id} is still referenced by object {referrer}")]
    ReferencedObject { id: String, referrer: String },

    // === Transaction errors ===
    /// The underlying key/value transaction is no longer usable.
    #[error("transaction cannot be used anymore")]
    StaleTransaction,

    /// A mutation was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The operation is not supported by this kind of transaction, e.g.
    /// commit or rollback of a snapshot transaction.
    #[error("unsupported operation: {op}")]
    Unsupported { op: &'static str },

    // === Data errors ===
    /// Stored bytes could not be decoded.
    #[error("corrupted database content: {detail}")]
    Corrupt { detail: String },

    /// A numeric argument is outside its permitted range.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// A listener reference path is malformed.
    #[error("invalid reference path: {detail}")]
    InvalidPath { detail: String },
}

impl StrataError {
    /// Shorthand for a [`StrataError::Corrupt`] with a formatted detail.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`StrataError::InvalidSchema`] with a formatted detail.
    pub fn invalid_schema(detail: impl Into<String>) -> Self {
        Self::InvalidSchema {
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`StrataError::SchemaMismatch`] with a formatted detail.
    pub fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }

    /// Whether this error indicates the transaction handle is unusable.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleTransaction)
    }
}

/// Convenience alias used throughout the strata crates.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = StrataError::UnknownType {
            storage_id: 100,
            version: 2,
        };
        assert_eq!(
            err.to_string(),
            "storage id 100 has no object type in schema version 2"
        );

        let err = StrataError::Unsupported {
            op: "commit on a snapshot transaction",
        };
        assert_eq!(
            err.to_string(),
            "unsupported operation: commit on a snapshot transaction"
        );
    }

    #[test]
    fn stale_detection() {
        assert!(StrataError::StaleTransaction.is_stale());
        assert!(!StrataError::ReadOnly.is_stale());
    }
}
