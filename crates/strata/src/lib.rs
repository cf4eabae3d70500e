//! Public API facade for strata.
//!
//! Re-exports the pieces a host needs to define a schema, open
//! transactions over a key/value store, and work with objects, indexes
//! and snapshots. The individual crates remain available for finer
//! imports.

pub use strata_core::{
    CompositeIndexQuery, Database, IndexQuery, ObjHandle, ObjIdIter, Transaction,
    TransactionConfig, TransactionListener,
};
pub use strata_error::{Result, StrataError};
pub use strata_kv::{KvPair, KvStore, KvTransaction, MemoryKvStore, SnapshotKv};
pub use strata_schema::{
    CompositeIndex, CounterField, DeleteAction, Field, ListField, MapField, ObjectType,
    ReferencePolicy, Schema, SetField, SimpleField, SubField,
};
pub use strata_types::{
    CustomCodec, ElementType, EnumDef, ObjId, StorageId, TypeRegistry, Value,
};
