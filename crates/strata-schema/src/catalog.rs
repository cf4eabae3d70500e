//! The recorded-schema catalog.
//!
//! Every schema version in use is recorded in the KV under
//! `CATALOG_PREFIX <varint version>` in canonical byte form. The catalog
//! is loaded once per transaction; additions follow first-committer-wins:
//! re-recording an identical schema is a no-op, recording a different
//! schema under an existing version fails, and concurrent recorders are
//! serialized by the underlying KV transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_kv::KvStore;
use strata_types::keys;
use tracing::debug;

use crate::compat::check_compatible;
use crate::encode::{decode_schema, encode_schema};
use crate::model::Schema;

/// One schema version as recorded in the store.
#[derive(Clone, Debug)]
pub struct RecordedSchema {
    pub schema: Arc<Schema>,
    /// The canonical bytes as stored; equality checks compare these.
    pub bytes: Vec<u8>,
}

/// All recorded schema versions of one database, keyed by version.
#[derive(Clone, Debug, Default)]
pub struct SchemaCatalog {
    versions: BTreeMap<u32, RecordedSchema>,
}

impl SchemaCatalog {
    /// Load every recorded version from the store.
    pub fn load(kv: &dyn KvStore) -> Result<Self> {
        let mut versions = BTreeMap::new();
        let end = strata_types::key_after_prefix(keys::CATALOG_PREFIX);
        for pair in kv.get_range(keys::CATALOG_PREFIX, end.as_deref(), false)? {
            let version = keys::parse_catalog_key(&pair.key)?;
            let schema = decode_schema(&pair.value)?;
            if schema.version() != version {
                return Err(StrataError::corrupt(format!(
                    "catalog key version {version} holds schema version {}",
                    schema.version()
                )));
            }
            versions.insert(
                version,
                RecordedSchema {
                    schema: Arc::new(schema),
                    bytes: pair.value,
                },
            );
        }
        Ok(Self { versions })
    }

    /// The recorded schema of one version.
    #[must_use]
    pub fn get(&self, version: u32) -> Option<&RecordedSchema> {
        self.versions.get(&version)
    }

    /// Whether any version is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Recorded versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.versions.keys().copied()
    }

    /// Bind `schema` as a transaction's target version, recording it if
    /// it is new.
    ///
    /// - If the version is already recorded with identical canonical
    ///   bytes, this is a no-op and the recorded instance is returned.
    /// - If the version is recorded with different bytes, fails with
    ///   `SchemaMismatch`.
    /// - Otherwise the schema is checked for storage-id compatibility
    ///   against every recorded version and then written to the store;
    ///   `allow_new` set to false turns this case into an error instead.
    pub fn ensure(
        &mut self,
        kv: &dyn KvStore,
        schema: Schema,
        allow_new: bool,
    ) -> Result<Arc<Schema>> {
        let version = schema.version();
        let bytes = encode_schema(&schema);

        if let Some(recorded) = self.versions.get(&version) {
            if recorded.bytes == bytes {
                return Ok(Arc::clone(&recorded.schema));
            }
            return Err(StrataError::schema_mismatch(format!(
                "schema version {version} is already recorded with a different definition"
            )));
        }

        if !allow_new {
            return Err(StrataError::invalid_schema(format!(
                "schema version {version} is not recorded and new versions are not allowed"
            )));
        }
        for recorded in self.versions.values() {
            check_compatible(&recorded.schema, &schema)?;
        }

        kv.put(keys::catalog_key(version), bytes.clone())?;
        debug!(version, "recorded new schema version");
        let schema = Arc::new(schema);
        self.versions.insert(
            version,
            RecordedSchema {
                schema: Arc::clone(&schema),
                bytes,
            },
        );
        Ok(schema)
    }
}
