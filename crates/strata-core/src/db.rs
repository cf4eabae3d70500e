//! The database: registry and listener configuration, plus transaction
//! construction against a KV transaction handle.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_error::{Result, StrataError};
use strata_kv::KvTransaction;
use strata_schema::{Schema, SchemaCatalog};
use strata_types::{keys, ByteReader, StorageId, TypeRegistry};
use tracing::debug;

use crate::listener::{ListenerRegistration, TransactionListener};
use crate::snapshot::HandleTable;
use crate::tx::Transaction;

/// Options for [`Database::create_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionConfig {
    /// Whether the transaction may record its schema version in the
    /// catalog when the version is not yet known.
    pub allow_new_schema: bool,
    /// Whether every mutation should fail with `ReadOnly`.
    pub read_only: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            allow_new_schema: true,
            read_only: false,
        }
    }
}

/// A database configuration: the immutable codec registry and the
/// listeners every new transaction starts with.
///
/// `Database` holds no storage itself; state lives behind the
/// [`KvTransaction`] handles passed to
/// [`create_transaction`](Self::create_transaction).
#[derive(Default)]
pub struct Database {
    registry: Arc<TypeRegistry>,
    listeners: Mutex<Vec<ListenerRegistration>>,
}

impl Database {
    /// A database with no user-defined element types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A database using the given codec registry.
    #[must_use]
    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The codec registry shared by all transactions.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Register a listener copied into every future transaction.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.lock().push(ListenerRegistration {
            listener,
            path: Vec::new(),
        });
    }

    /// Register a path-filtered listener copied into every future
    /// transaction. The path is validated against each transaction's
    /// schema when the transaction is created.
    pub fn add_listener_with_path(
        &self,
        listener: Arc<dyn TransactionListener>,
        path: Vec<StorageId>,
    ) {
        self.listeners
            .lock()
            .push(ListenerRegistration { listener, path });
    }

    /// Open a transaction over `kv`, binding it to `schema` as its
    /// target version.
    ///
    /// The store's format version is checked (and stamped on first use),
    /// the schema catalog is loaded, and the target schema is recorded
    /// under first-committer-wins semantics: an identical recording is a
    /// no-op, a conflicting one fails with `SchemaMismatch`, and a new
    /// version must be compatible with every recorded version.
    pub fn create_transaction(
        &self,
        kv: Box<dyn KvTransaction>,
        schema: Schema,
        config: TransactionConfig,
    ) -> Result<Transaction> {
        self.check_format_version(kv.as_ref(), config)?;

        let mut catalog = SchemaCatalog::load(kv.as_ref())?;
        let version = schema.version();
        if catalog.get(version).is_none() && config.read_only {
            return Err(StrataError::ReadOnly);
        }
        let schema = catalog.ensure(kv.as_ref(), schema, config.allow_new_schema)?;
        debug!(version, read_only = config.read_only, "opened transaction");

        let transaction = Transaction {
            kv,
            registry: Arc::clone(&self.registry),
            catalog,
            schema,
            listeners: RefCell::new(self.listeners.lock().clone()),
            stale: Cell::new(false),
            read_only: config.read_only,
            is_snapshot: false,
            handles: HandleTable::new(),
        };
        let registrations = transaction.listeners.borrow().clone();
        for registration in &registrations {
            transaction.validate_listener_path(&registration.path)?;
        }
        Ok(transaction)
    }

    fn check_format_version(&self, kv: &dyn KvTransaction, config: TransactionConfig) -> Result<()> {
        match kv.get(keys::FORMAT_VERSION_KEY)? {
            Some(bytes) => {
                let mut reader = ByteReader::new(&bytes);
                let found = strata_types::read_varint(&mut reader)?;
                reader.expect_end()?;
                if found != keys::CURRENT_FORMAT_VERSION {
                    return Err(StrataError::invalid_schema(format!(
                        "unsupported database format version {found}"
                    )));
                }
            }
            None => {
                if !config.read_only {
                    kv.put(
                        keys::FORMAT_VERSION_KEY.to_vec(),
                        strata_types::varint_bytes(keys::CURRENT_FORMAT_VERSION),
                    )?;
                }
            }
        }
        Ok(())
    }
}
