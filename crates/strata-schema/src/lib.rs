//! Versioned schema machinery for strata: the immutable schema model,
//! its canonical byte serialization, cross-version compatibility rules,
//! and the recorded-schema catalog.

pub mod catalog;
pub mod compat;
pub mod encode;
pub mod model;

pub use catalog::{RecordedSchema, SchemaCatalog};
pub use compat::check_compatible;
pub use encode::{decode_schema, encode_schema};
pub use model::{
    CompositeIndex, CounterField, DeleteAction, Field, ListField, MapField, ObjectType,
    ReferencePolicy, Schema, SetField, SimpleField, SubField,
};
