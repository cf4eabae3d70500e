//! Property tests: after arbitrary mutation sequences, the index ranges
//! agree exactly with the values derivable from the objects themselves.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use strata_core::{Database, Transaction, TransactionConfig};
use strata_kv::MemoryKvStore;
use strata_schema::{Field, ObjectType, Schema, SetField, SimpleField, SubField};
use strata_types::{ElementType, ObjId, StorageId, Value};

fn sid(n: u32) -> StorageId {
    StorageId::new(n).unwrap()
}

fn schema() -> Schema {
    Schema::new(
        1,
        vec![ObjectType::new("t", sid(1))
            .with_field(SimpleField::new("n", sid(2), ElementType::Int32).indexed())
            .with_field(Field::Set(SetField {
                name: "s".into(),
                storage_id: sid(3),
                element: SubField::new(sid(4), ElementType::Int32).indexed(),
            }))],
    )
    .unwrap()
}

fn open(store: &MemoryKvStore) -> Transaction {
    Database::new()
        .create_transaction(
            Box::new(store.begin()),
            schema(),
            TransactionConfig::default(),
        )
        .unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    WriteSimple { object: usize, value: i32 },
    SetAdd { object: usize, value: i32 },
    SetRemove { object: usize, value: i32 },
    Delete { object: usize },
}

fn arb_op(objects: usize) -> impl Strategy<Value = Op> {
    let small = -4i32..=4;
    prop_oneof![
        (0..objects, small.clone()).prop_map(|(object, value)| Op::WriteSimple { object, value }),
        (0..objects, small.clone()).prop_map(|(object, value)| Op::SetAdd { object, value }),
        (0..objects, small).prop_map(|(object, value)| Op::SetRemove { object, value }),
        (0..objects).prop_map(|object| Op::Delete { object }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn indexes_stay_consistent_with_content(ops in proptest::collection::vec(arb_op(4), 0..40)) {
        let store = MemoryKvStore::new();
        let tx = open(&store);

        let ids: Vec<ObjId> = (0..4).map(|_| tx.create(sid(1)).unwrap()).collect();
        for op in ops {
            match op {
                Op::WriteSimple { object, value } => {
                    let id = ids[object];
                    if tx.exists(id).unwrap() {
                        tx.write_simple(id, sid(2), Value::Int32(value)).unwrap();
                    }
                }
                Op::SetAdd { object, value } => {
                    let id = ids[object];
                    if tx.exists(id).unwrap() {
                        tx.set_add(id, sid(3), Value::Int32(value)).unwrap();
                    }
                }
                Op::SetRemove { object, value } => {
                    let id = ids[object];
                    if tx.exists(id).unwrap() {
                        tx.set_remove(id, sid(3), &Value::Int32(value)).unwrap();
                    }
                }
                Op::Delete { object } => {
                    tx.delete(ids[object]).unwrap();
                }
            }
        }

        // Expected simple index: every live object maps its current value.
        let mut expected_simple: BTreeMap<Value, BTreeSet<ObjId>> = BTreeMap::new();
        let mut expected_set: BTreeMap<Value, BTreeSet<ObjId>> = BTreeMap::new();
        for &id in &ids {
            if !tx.exists(id).unwrap() {
                continue;
            }
            let value = tx.read_simple(id, sid(2)).unwrap();
            expected_simple
                .entry(strata_widen(&value))
                .or_default()
                .insert(id);
            for element in tx.set_iter(id, sid(3)).unwrap() {
                expected_set
                    .entry(strata_widen(&element))
                    .or_default()
                    .insert(id);
            }
        }

        let simple = tx.query_index(sid(2)).unwrap().to_map().unwrap();
        prop_assert_eq!(simple, expected_simple);
        let set = tx.query_index(sid(4)).unwrap().to_map().unwrap();
        prop_assert_eq!(set, expected_set);
    }
}

/// Index queries report numeric values family-widened.
fn strata_widen(value: &Value) -> Value {
    match value {
        Value::Int32(v) => Value::Int64(i64::from(*v)),
        other => other.clone(),
    }
}
