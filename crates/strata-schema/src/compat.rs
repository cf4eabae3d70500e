//! Cross-version storage-id compatibility.
//!
//! Storage ids are global: two recorded schemas may assign the same id
//! only to definitions the engine can serve from one keyspace. The rules
//! (per storage id shared between two schemas):
//!
//! - the *kind* must match (object type, simple field/sub-field, counter,
//!   complex field, composite index);
//! - simple fields and sub-fields must have compatible element types
//!   (identical, or within one numeric family; the indexed flag, the
//!   on-delete disposition and the allowed-referent set may differ);
//! - complex fields must have the same collection kind and pairwise
//!   compatible sub-fields in order;
//! - composite indexes must have the same arity and compatible element
//!   types in order.
//!
//! Anything else fails with `SchemaMismatch`.

use std::collections::BTreeMap;

use strata_error::{Result, StrataError};
use strata_types::{ElementType, StorageId};

use crate::model::{Field, Schema};

/// Collection kind of a complex field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComplexKind {
    Set,
    List,
    Map,
}

impl ComplexKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

/// What one storage id denotes inside one schema.
#[derive(Debug, Clone)]
enum StorageInfo {
    ObjectType,
    Simple { element: ElementType },
    Counter,
    Complex {
        kind: ComplexKind,
        sub_elements: Vec<ElementType>,
    },
    Composite { elements: Vec<ElementType> },
}

impl StorageInfo {
    const fn kind_name(&self) -> &'static str {
        match self {
            Self::ObjectType => "object type",
            Self::Simple { .. } => "simple field",
            Self::Counter => "counter field",
            Self::Complex { .. } => "complex field",
            Self::Composite { .. } => "composite index",
        }
    }
}

fn storage_infos(schema: &Schema) -> BTreeMap<StorageId, StorageInfo> {
    let mut infos = BTreeMap::new();
    for object_type in schema.object_types() {
        infos.insert(object_type.storage_id, StorageInfo::ObjectType);
        for field in &object_type.fields {
            match field {
                Field::Simple(f) => {
                    infos.insert(
                        f.storage_id,
                        StorageInfo::Simple {
                            element: f.element.clone(),
                        },
                    );
                }
                Field::Counter(f) => {
                    infos.insert(f.storage_id, StorageInfo::Counter);
                }
                Field::Set(_) | Field::List(_) | Field::Map(_) => {
                    let kind = match field {
                        Field::Set(_) => ComplexKind::Set,
                        Field::List(_) => ComplexKind::List,
                        _ => ComplexKind::Map,
                    };
                    let subs = field.sub_fields();
                    infos.insert(
                        field.storage_id(),
                        StorageInfo::Complex {
                            kind,
                            sub_elements: subs.iter().map(|s| s.element.clone()).collect(),
                        },
                    );
                    for sub in subs {
                        infos.insert(
                            sub.storage_id,
                            StorageInfo::Simple {
                                element: sub.element.clone(),
                            },
                        );
                    }
                }
            }
        }
        for ci in &object_type.composite_indexes {
            let elements = ci
                .fields
                .iter()
                .map(|&fid| {
                    object_type
                        .composite_component(fid)
                        .map(|f| f.element.clone())
                        .expect("validated composite component")
                })
                .collect();
            infos.insert(ci.storage_id, StorageInfo::Composite { elements });
        }
    }
    infos
}

fn elements_compatible(a: &[ElementType], b: &[ElementType]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible_with(y))
}

/// Check that two schemas can coexist in one database.
pub fn check_compatible(a: &Schema, b: &Schema) -> Result<()> {
    let infos_a = storage_infos(a);
    let infos_b = storage_infos(b);
    for (id, info_a) in &infos_a {
        let Some(info_b) = infos_b.get(id) else {
            continue;
        };
        let mismatch = |detail: String| {
            Err(StrataError::schema_mismatch(format!(
                "storage id {id} (schema versions {} and {}): {detail}",
                a.version(),
                b.version()
            )))
        };
        match (info_a, info_b) {
            (StorageInfo::ObjectType, StorageInfo::ObjectType)
            | (StorageInfo::Counter, StorageInfo::Counter) => {}
            (StorageInfo::Simple { element: ea }, StorageInfo::Simple { element: eb }) => {
                if !ea.compatible_with(eb) {
                    return mismatch(format!(
                        "element type {} is incompatible with {}",
                        ea.name(),
                        eb.name()
                    ));
                }
            }
            (
                StorageInfo::Complex {
                    kind: ka,
                    sub_elements: sa,
                },
                StorageInfo::Complex {
                    kind: kb,
                    sub_elements: sb,
                },
            ) => {
                if ka != kb {
                    return mismatch(format!(
                        "collection kind {} differs from {}",
                        ka.name(),
                        kb.name()
                    ));
                }
                if !elements_compatible(sa, sb) {
                    return mismatch("incompatible sub-field element types".into());
                }
            }
            (
                StorageInfo::Composite { elements: ea },
                StorageInfo::Composite { elements: eb },
            ) => {
                if ea.len() != eb.len() {
                    return mismatch(format!(
                        "composite arity {} differs from {}",
                        ea.len(),
                        eb.len()
                    ));
                }
                if !elements_compatible(ea, eb) {
                    return mismatch("incompatible composite element types".into());
                }
            }
            _ => {
                return mismatch(format!(
                    "{} conflicts with {}",
                    info_a.kind_name(),
                    info_b.kind_name()
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CompositeIndex, CounterField, ListField, ObjectType, SetField, SimpleField, SubField,
    };

    fn sid(n: u32) -> StorageId {
        StorageId::new(n).unwrap()
    }

    fn schema(version: u32, types: Vec<ObjectType>) -> Schema {
        Schema::new(version, types).unwrap()
    }

    #[test]
    fn disjoint_ids_are_compatible() {
        let a = schema(
            1,
            vec![ObjectType::new("a", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("b", sid(10))
                .with_field(SimpleField::new("y", sid(11), ElementType::String))],
        );
        check_compatible(&a, &b).unwrap();
    }

    #[test]
    fn same_field_with_index_difference_is_compatible() {
        let a = schema(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32).indexed())],
        );
        check_compatible(&a, &b).unwrap();
    }

    #[test]
    fn numeric_promotion_is_compatible() {
        let a = schema(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int64))],
        );
        check_compatible(&a, &b).unwrap();
    }

    #[test]
    fn kind_conflict_is_rejected() {
        let a = schema(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("t", sid(1)).with_field(CounterField::new("x", sid(2)))],
        );
        assert!(matches!(
            check_compatible(&a, &b),
            Err(StrataError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn element_conflict_is_rejected() {
        let a = schema(
            1,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::String))],
        );
        assert!(check_compatible(&a, &b).is_err());
    }

    #[test]
    fn collection_kind_conflict_is_rejected() {
        let a = schema(
            1,
            vec![ObjectType::new("t", sid(1)).with_field(Field::Set(SetField {
                name: "c".into(),
                storage_id: sid(2),
                element: SubField::new(sid(3), ElementType::Int32),
            }))],
        );
        let b = schema(
            2,
            vec![ObjectType::new("t", sid(1)).with_field(Field::List(ListField {
                name: "c".into(),
                storage_id: sid(2),
                element: SubField::new(sid(3), ElementType::Int32),
            }))],
        );
        assert!(check_compatible(&a, &b).is_err());
    }

    #[test]
    fn composite_arity_conflict_is_rejected() {
        let base = |n: usize, version: u32| {
            let mut t = ObjectType::new("t", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32))
                .with_field(SimpleField::new("y", sid(3), ElementType::Int32))
                .with_field(SimpleField::new("z", sid(4), ElementType::Int32));
            let fields: Vec<StorageId> = [sid(2), sid(3), sid(4)][..n].to_vec();
            t = t.with_composite_index(CompositeIndex::new("ci", sid(9), fields));
            schema(version, vec![t])
        };
        check_compatible(&base(2, 1), &base(2, 2)).unwrap();
        assert!(check_compatible(&base(2, 1), &base(3, 2)).is_err());
    }
}
