//! Engine-level behavior: cascades, delete totality, listeners,
//! snapshots, copies, counters and collection fields.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strata_core::{Database, Transaction, TransactionConfig, TransactionListener};
use strata_error::{Result, StrataError};
use strata_kv::MemoryKvStore;
use strata_schema::{
    CounterField, DeleteAction, Field, MapField, ObjectType, ReferencePolicy, Schema, SetField,
    SimpleField, SubField,
};
use strata_types::{ElementType, ObjId, StorageId, Value};

fn sid(n: u32) -> StorageId {
    StorageId::new(n).unwrap()
}

fn open(store: &MemoryKvStore, schema: Schema) -> Transaction {
    Database::new()
        .create_transaction(
            Box::new(store.begin()),
            schema,
            TransactionConfig::default(),
        )
        .unwrap()
}

fn node_schema(on_delete: DeleteAction) -> Schema {
    Schema::new(
        1,
        vec![ObjectType::new("node", sid(1)).with_field(
            SimpleField::new("next", sid(2), ElementType::Reference)
                .indexed()
                .with_reference(ReferencePolicy::new(on_delete)),
        )],
    )
    .unwrap()
}

#[test]
fn cascade_deletes_transitive_closure() {
    let store = MemoryKvStore::new();
    let tx = open(&store, node_schema(DeleteAction::Delete));

    // a -> b -> c: deleting c cascades to b (holder of c) and then a.
    let a = tx.create(sid(1)).unwrap();
    let b = tx.create(sid(1)).unwrap();
    let c = tx.create(sid(1)).unwrap();
    tx.write_simple(a, sid(2), Value::Reference(Some(b))).unwrap();
    tx.write_simple(b, sid(2), Value::Reference(Some(c))).unwrap();

    assert!(tx.delete(c).unwrap());
    assert!(!tx.exists(a).unwrap());
    assert!(!tx.exists(b).unwrap());
    assert!(!tx.exists(c).unwrap());
}

#[test]
fn cascade_survives_reference_cycles() {
    let store = MemoryKvStore::new();
    let tx = open(&store, node_schema(DeleteAction::Delete));

    let a = tx.create(sid(1)).unwrap();
    let b = tx.create(sid(1)).unwrap();
    tx.write_simple(a, sid(2), Value::Reference(Some(b))).unwrap();
    tx.write_simple(b, sid(2), Value::Reference(Some(a))).unwrap();

    assert!(tx.delete(a).unwrap());
    assert!(!tx.exists(a).unwrap());
    assert!(!tx.exists(b).unwrap());
}

#[test]
fn cascade_aborts_on_exception_holder() {
    let store = MemoryKvStore::new();
    let schema = Schema::new(
        1,
        vec![ObjectType::new("node", sid(1))
            .with_field(
                SimpleField::new("del", sid(2), ElementType::Reference)
                    .indexed()
                    .with_reference(ReferencePolicy::new(DeleteAction::Delete)),
            )
            .with_field(
                SimpleField::new("pin", sid(3), ElementType::Reference)
                    .indexed()
                    .with_reference(ReferencePolicy::new(DeleteAction::Exception)),
            )],
    )
    .unwrap();
    let tx = open(&store, schema);

    // a --del--> b, c --pin--> a: deleting b cascades to a, where the
    // EXCEPTION holder c blocks the whole cascade.
    let a = tx.create(sid(1)).unwrap();
    let b = tx.create(sid(1)).unwrap();
    let c = tx.create(sid(1)).unwrap();
    tx.write_simple(a, sid(2), Value::Reference(Some(b))).unwrap();
    tx.write_simple(c, sid(3), Value::Reference(Some(a))).unwrap();

    let err = tx.delete(b).unwrap_err();
    assert!(matches!(err, StrataError::ReferencedObject { .. }));
    tx.rollback().unwrap();
}

#[test]
fn delete_removes_every_key_mentioning_the_object() {
    let store = MemoryKvStore::new();
    let schema = Schema::new(
        1,
        vec![ObjectType::new("t", sid(10))
            .with_field(SimpleField::new("s", sid(11), ElementType::String).indexed())
            .with_field(SimpleField::new("n", sid(19), ElementType::Int32).indexed())
            .with_field(Field::Set(SetField {
                name: "tags".into(),
                storage_id: sid(12),
                element: SubField::new(sid(13), ElementType::Int32).indexed(),
            }))
            .with_field(Field::Map(MapField {
                name: "attrs".into(),
                storage_id: sid(14),
                key: SubField::new(sid(15), ElementType::String).indexed(),
                value: SubField::new(sid(16), ElementType::Int64).indexed(),
            }))
            .with_field(CounterField::new("hits", sid(17)))
            .with_composite_index(strata_schema::CompositeIndex::new(
                "ci",
                sid(18),
                vec![sid(11), sid(19)],
            ))],
    )
    .unwrap();

    let tx = open(&store, schema);
    let id = tx.create(sid(10)).unwrap();
    tx.write_simple(id, sid(11), Value::String("x".into())).unwrap();
    tx.write_simple(id, sid(19), Value::Int32(3)).unwrap();
    tx.set_add(id, sid(12), Value::Int32(5)).unwrap();
    tx.set_add(id, sid(12), Value::Int32(6)).unwrap();
    tx.map_put(id, sid(14), Value::String("k".into()), Value::Int64(9))
        .unwrap();
    tx.adjust_counter(id, sid(17), 4).unwrap();

    assert!(tx.delete(id).unwrap());
    assert!(!tx.delete(id).unwrap());
    tx.commit().unwrap();

    for pair in store.dump() {
        assert!(
            !pair
                .key
                .windows(id.as_bytes().len())
                .any(|window| window == id.as_bytes()),
            "key {:?} still mentions the deleted object",
            pair.key
        );
    }
}

#[test]
fn set_and_map_operations_maintain_indexes() {
    let store = MemoryKvStore::new();
    let tx = open(&store, rich_schema_legal());

    let id = tx.create(sid(10)).unwrap();
    assert!(tx.set_add(id, sid(12), Value::Int32(5)).unwrap());
    assert!(!tx.set_add(id, sid(12), Value::Int32(5)).unwrap());
    assert!(tx.set_contains(id, sid(12), &Value::Int32(5)).unwrap());
    assert!(tx.set_add(id, sid(12), Value::Int32(2)).unwrap());
    assert_eq!(
        tx.set_iter(id, sid(12)).unwrap(),
        vec![Value::Int32(2), Value::Int32(5)]
    );
    assert!(tx
        .query_index(sid(13))
        .unwrap()
        .get(&Value::Int32(5))
        .unwrap()
        .contains(&id));
    assert!(tx.set_remove(id, sid(12), &Value::Int32(5)).unwrap());
    assert!(tx
        .query_index(sid(13))
        .unwrap()
        .get(&Value::Int32(5))
        .unwrap()
        .is_empty());

    assert_eq!(
        tx.map_put(id, sid(14), Value::String("k".into()), Value::Int64(1))
            .unwrap(),
        None
    );
    assert_eq!(
        tx.map_put(id, sid(14), Value::String("k".into()), Value::Int64(2))
            .unwrap(),
        Some(Value::Int64(1))
    );
    assert_eq!(
        tx.map_get(id, sid(14), &Value::String("k".into())).unwrap(),
        Some(Value::Int64(2))
    );
    // The old value's index entry was replaced.
    let values = tx.query_index(sid(16)).unwrap();
    assert!(values.get(&Value::Int64(1)).unwrap().is_empty());
    assert!(values.get(&Value::Int64(2)).unwrap().contains(&id));
    let keys = tx.query_index(sid(15)).unwrap();
    assert!(keys.get(&Value::String("k".into())).unwrap().contains(&id));

    assert_eq!(
        tx.map_remove(id, sid(14), &Value::String("k".into())).unwrap(),
        Some(Value::Int64(2))
    );
    assert!(tx.map_iter(id, sid(14)).unwrap().is_empty());
    assert!(tx
        .query_index(sid(15))
        .unwrap()
        .get(&Value::String("k".into()))
        .unwrap()
        .is_empty());
}

fn rich_schema_legal() -> Schema {
    Schema::new(
        1,
        vec![ObjectType::new("t", sid(10))
            .with_field(SimpleField::new("s", sid(11), ElementType::String).indexed())
            .with_field(Field::Set(SetField {
                name: "tags".into(),
                storage_id: sid(12),
                element: SubField::new(sid(13), ElementType::Int32).indexed(),
            }))
            .with_field(Field::Map(MapField {
                name: "attrs".into(),
                storage_id: sid(14),
                key: SubField::new(sid(15), ElementType::String).indexed(),
                value: SubField::new(sid(16), ElementType::Int64).indexed(),
            }))
            .with_field(CounterField::new("hits", sid(17)))],
    )
    .unwrap()
}

#[test]
fn counters_accumulate_without_notifications() {
    struct ChangeCounter(AtomicUsize);
    impl TransactionListener for ChangeCounter {
        fn on_change(
            &self,
            _tx: &Transaction,
            _id: ObjId,
            _field_id: StorageId,
            _old: Option<&Value>,
            _new: Option<&Value>,
        ) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let store = MemoryKvStore::new();
    let tx = open(&store, rich_schema_legal());
    let listener = Arc::new(ChangeCounter(AtomicUsize::new(0)));
    tx.add_listener(Arc::clone(&listener) as Arc<dyn TransactionListener>);

    let id = tx.create(sid(10)).unwrap();
    assert_eq!(tx.read_counter(id, sid(17)).unwrap(), 0);
    assert_eq!(tx.adjust_counter(id, sid(17), 5).unwrap(), 5);
    assert_eq!(tx.adjust_counter(id, sid(17), -2).unwrap(), 3);
    tx.write_counter(id, sid(17), 10).unwrap();
    assert_eq!(tx.read_counter(id, sid(17)).unwrap(), 10);
    assert_eq!(listener.0.load(Ordering::SeqCst), 0);

    assert!(matches!(
        tx.adjust_counter(id, sid(17), i64::MAX),
        Err(StrataError::OutOfRange { .. })
    ));
}

#[test]
fn listener_error_poisons_the_transaction() {
    struct Failing;
    impl TransactionListener for Failing {
        fn on_change(
            &self,
            _tx: &Transaction,
            _id: ObjId,
            _field_id: StorageId,
            _old: Option<&Value>,
            _new: Option<&Value>,
        ) -> Result<()> {
            Err(StrataError::corrupt("listener rejected the change"))
        }
    }

    let store = MemoryKvStore::new();
    let tx = open(&store, rich_schema_legal());
    let id = tx.create(sid(10)).unwrap();
    tx.add_listener(Arc::new(Failing));

    assert!(tx
        .write_simple(id, sid(11), Value::String("x".into()))
        .is_err());
    assert!(matches!(
        tx.read_simple(id, sid(11)),
        Err(StrataError::StaleTransaction)
    ));
    assert!(matches!(tx.commit(), Err(StrataError::StaleTransaction)));
}

#[test]
fn path_filtered_listener_requires_reachability() {
    struct Recorder(Mutex<Vec<ObjId>>);
    impl TransactionListener for Recorder {
        fn on_change(
            &self,
            _tx: &Transaction,
            id: ObjId,
            _field_id: StorageId,
            _old: Option<&Value>,
            _new: Option<&Value>,
        ) -> Result<()> {
            self.0.lock().unwrap().push(id);
            Ok(())
        }
    }

    let store = MemoryKvStore::new();
    let schema = Schema::new(
        1,
        vec![
            ObjectType::new("parent", sid(1)).with_field(
                SimpleField::new("child", sid(2), ElementType::Reference)
                    .indexed()
                    .with_reference(ReferencePolicy::new(DeleteAction::Nothing)),
            ),
            ObjectType::new("leaf", sid(3))
                .with_field(SimpleField::new("n", sid(4), ElementType::Int32)),
        ],
    )
    .unwrap();
    let tx = open(&store, schema);

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    tx.add_listener_with_path(
        Arc::clone(&recorder) as Arc<dyn TransactionListener>,
        vec![sid(2)],
    )
    .unwrap();

    let parent = tx.create(sid(1)).unwrap();
    let reachable = tx.create(sid(3)).unwrap();
    let orphan = tx.create(sid(3)).unwrap();
    tx.write_simple(parent, sid(2), Value::Reference(Some(reachable)))
        .unwrap();
    recorder.0.lock().unwrap().clear();

    tx.write_simple(reachable, sid(4), Value::Int32(1)).unwrap();
    tx.write_simple(orphan, sid(4), Value::Int32(2)).unwrap();
    assert_eq!(recorder.0.lock().unwrap().as_slice(), &[reachable]);

    // A path through a non-reference field is rejected outright.
    assert!(matches!(
        tx.add_listener_with_path(Arc::new(Recorder(Mutex::new(Vec::new()))), vec![sid(4)]),
        Err(StrataError::InvalidPath { .. })
    ));
}

#[test]
fn snapshot_transactions_hold_detached_state() {
    struct SnapshotAware {
        snapshot_events: AtomicUsize,
        accepts_snapshots: bool,
    }
    impl TransactionListener for SnapshotAware {
        fn on_create(&self, tx: &Transaction, _id: ObjId) -> Result<()> {
            if tx.is_snapshot() {
                self.snapshot_events.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
        fn snapshot_transactions(&self) -> bool {
            self.accepts_snapshots
        }
    }

    let store = MemoryKvStore::new();
    let tx = open(&store, rich_schema_legal());
    let observing = Arc::new(SnapshotAware {
        snapshot_events: AtomicUsize::new(0),
        accepts_snapshots: true,
    });
    let ignoring = Arc::new(SnapshotAware {
        snapshot_events: AtomicUsize::new(0),
        accepts_snapshots: false,
    });
    tx.add_listener(Arc::clone(&observing) as Arc<dyn TransactionListener>);
    tx.add_listener(Arc::clone(&ignoring) as Arc<dyn TransactionListener>);

    let id = tx.create(sid(10)).unwrap();
    tx.write_simple(id, sid(11), Value::String("kept".into())).unwrap();
    tx.set_add(id, sid(12), Value::Int32(5)).unwrap();

    let snapshot = tx.create_snapshot_transaction().unwrap();
    assert!(snapshot.is_snapshot());
    assert!(!snapshot.exists(id).unwrap());

    assert!(tx.copy_object(id, &snapshot).unwrap());
    assert!(!tx.copy_object(id, &snapshot).unwrap());
    assert_eq!(
        snapshot.read_simple(id, sid(11)).unwrap(),
        Value::String("kept".into())
    );
    assert_eq!(snapshot.set_iter(id, sid(12)).unwrap(), vec![Value::Int32(5)]);
    assert!(snapshot
        .query_index(sid(13))
        .unwrap()
        .get(&Value::Int32(5))
        .unwrap()
        .contains(&id));
    assert_eq!(observing.snapshot_events.load(Ordering::SeqCst), 1);
    assert_eq!(ignoring.snapshot_events.load(Ordering::SeqCst), 0);

    // Commit and rollback always fail but leave the snapshot usable.
    assert!(matches!(
        snapshot.commit(),
        Err(StrataError::Unsupported { .. })
    ));
    assert!(matches!(
        snapshot.rollback(),
        Err(StrataError::Unsupported { .. })
    ));
    assert!(snapshot.exists(id).unwrap());

    // The snapshot can create objects of its own without id collisions.
    let fresh = snapshot.create(sid(10)).unwrap();
    assert_ne!(fresh, id);

    // Reset clears objects but keeps the catalog; creation still works.
    snapshot.reset().unwrap();
    assert!(!snapshot.exists(id).unwrap());
    assert!(snapshot.create(sid(10)).is_ok());

    // reset is snapshot-only.
    assert!(matches!(tx.reset(), Err(StrataError::Unsupported { .. })));

    // Handles intern per transaction.
    let h1 = snapshot.handle(id);
    let h2 = snapshot.handle(id);
    assert!(Arc::ptr_eq(&h1, &h2));
    assert_eq!(h1.id(), id);
}

#[test]
fn read_only_transactions_reject_mutation() {
    let store = MemoryKvStore::new();
    let schema = rich_schema_legal();

    // Record the schema first so the read-only bind succeeds.
    let tx = open(&store, schema.clone());
    let id = tx.create(sid(10)).unwrap();
    tx.commit().unwrap();

    let read_only = Database::new()
        .create_transaction(
            Box::new(store.begin()),
            schema,
            TransactionConfig {
                read_only: true,
                ..TransactionConfig::default()
            },
        )
        .unwrap();
    assert!(read_only.exists(id).unwrap());
    assert_eq!(
        read_only.read_simple(id, sid(11)).unwrap(),
        Value::String(String::new())
    );
    assert!(matches!(
        read_only.create(sid(10)),
        Err(StrataError::ReadOnly)
    ));
    assert!(matches!(
        read_only.write_simple(id, sid(11), Value::String("x".into())),
        Err(StrataError::ReadOnly)
    ));
}

#[test]
fn reference_type_restrictions_are_enforced() {
    let store = MemoryKvStore::new();
    let schema = Schema::new(
        1,
        vec![
            ObjectType::new("a", sid(1)).with_field(
                SimpleField::new("r", sid(2), ElementType::Reference)
                    .indexed()
                    .with_reference(
                        ReferencePolicy::new(DeleteAction::Nothing).restricted_to([sid(1)]),
                    ),
            ),
            ObjectType::new("b", sid(3)),
        ],
    )
    .unwrap();
    let tx = open(&store, schema);

    let a = tx.create(sid(1)).unwrap();
    let b = tx.create(sid(3)).unwrap();
    assert!(tx.write_simple(a, sid(2), Value::Reference(Some(a))).is_ok());
    assert!(matches!(
        tx.write_simple(a, sid(2), Value::Reference(Some(b))),
        Err(StrataError::TypeMismatch { .. })
    ));
}

#[test]
fn iteration_by_type_and_overall() {
    let store = MemoryKvStore::new();
    let schema = Schema::new(
        1,
        vec![
            ObjectType::new("a", sid(1))
                .with_field(SimpleField::new("x", sid(2), ElementType::Int32)),
            ObjectType::new("b", sid(3)),
        ],
    )
    .unwrap();
    let tx = open(&store, schema);

    let a1 = tx.create(sid(1)).unwrap();
    let a2 = tx.create(sid(1)).unwrap();
    let b1 = tx.create(sid(3)).unwrap();
    tx.write_simple(a1, sid(2), Value::Int32(5)).unwrap();

    let of_a: Vec<ObjId> = tx.iter_type(sid(1)).unwrap().collect();
    assert_eq!(of_a, vec![a1, a2]);
    let all: Vec<ObjId> = tx.iter_all().unwrap().collect();
    assert_eq!(all, vec![a1, a2, b1]);
    assert!(matches!(
        tx.iter_type(sid(99)),
        Err(StrataError::UnknownType { .. })
    ));
}

#[test]
fn unknown_fields_and_deleted_objects_error() {
    let store = MemoryKvStore::new();
    let tx = open(&store, rich_schema_legal());
    let id = tx.create(sid(10)).unwrap();

    assert!(matches!(
        tx.read_simple(id, sid(99)),
        Err(StrataError::UnknownField { .. })
    ));
    assert!(matches!(
        tx.read_simple(id, sid(12)),
        Err(StrataError::TypeMismatch { .. })
    ));
    assert!(matches!(
        tx.write_simple(id, sid(11), Value::Int32(1)),
        Err(StrataError::TypeMismatch { .. })
    ));

    tx.delete(id).unwrap();
    assert!(matches!(
        tx.read_simple(id, sid(11)),
        Err(StrataError::DeletedObject { .. })
    ));
    assert!(matches!(
        tx.get_version(id),
        Err(StrataError::DeletedObject { .. })
    ));
}

#[test]
fn upgrade_is_idempotent() {
    let store = MemoryKvStore::new();
    let v1 = Schema::new(
        1,
        vec![ObjectType::new("t", sid(1))
            .with_field(SimpleField::new("f", sid(2), ElementType::Int32))],
    )
    .unwrap();
    let v2 = Schema::new(
        2,
        vec![ObjectType::new("t", sid(1))
            .with_field(SimpleField::new("f", sid(2), ElementType::Int32).indexed())],
    )
    .unwrap();

    let tx = open(&store, v1);
    let id = tx.create(sid(1)).unwrap();
    tx.write_simple(id, sid(2), Value::Int32(9)).unwrap();
    tx.commit().unwrap();

    let tx = open(&store, v2);
    assert!(tx.upgrade(id).unwrap());
    assert!(!tx.upgrade(id).unwrap());
    assert_eq!(tx.get_version(id).unwrap(), 2);
    // The newly indexed field gained its entry during migration.
    assert!(tx
        .query_index(sid(2))
        .unwrap()
        .get(&Value::Int32(9))
        .unwrap()
        .contains(&id));
}
