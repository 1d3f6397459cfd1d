//! Integration tests for void_kernel
//!
//! Tests argument providers, selections, undo/redo, snapshots and plugins

use futures_util::stream;
use parking_lot::Mutex;
use std::sync::Arc;
use void_kernel::prelude::*;
use void_kernel::{TransactionEnvelope, UNDO_REDO_SERVICE};
use void_ir::TransactionId;

fn entity_arg(args: &Value) -> Entity {
    Entity::new(args.get("entity").and_then(Value::as_int).unwrap_or(-1))
}

fn scene_plugin() -> Plugin {
    Plugin::builder()
        .component("position", ComponentDescriptor::new(0))
        .component("label", ComponentDescriptor::new(""))
        .resource("cursor", ResourceDescriptor::transient(0))
        .resource("zoom", ResourceDescriptor::new(1))
        .archetype("Marker", ["position", "label"])
        .transaction("spawn", |t, args| {
            let archetype = t
                .archetype_id("Marker")
                .ok_or_else(|| TransactionError::aborted("Marker not registered"))?;
            let values = args.as_object().cloned().unwrap_or_default();
            let entity = t.insert(archetype, &values)?;
            Ok(Value::from(entity))
        })
        .transaction("move", |t, args| {
            let position = args.get("position").cloned().unwrap_or_default();
            t.update(entity_arg(args), &set_all([("position", position)]))?;
            Ok(Value::Null)
        })
        .transaction("despawn", |t, args| {
            t.delete(entity_arg(args))?;
            Ok(Value::Null)
        })
        .transaction("zoom", |t, args| {
            t.set_undoable(Undoable::new());
            t.set_resource("zoom", args.clone())?;
            Ok(Value::Null)
        })
        .transaction("drag_zoom", |t, args| {
            t.set_undoable(Undoable::coalesce("drag"));
            t.set_resource("zoom", args.clone())?;
            Ok(Value::Null)
        })
        .action("spawn_row", |db, args| {
            let count = args.as_int().unwrap_or(0);
            let mut spawned = Vec::new();
            for i in 0..count {
                let marker = Value::Object(values([("position", Value::Int(i)), ("label", Value::from("row"))]));
                spawned.push(db.transact("spawn", marker)?);
            }
            Ok(Value::Array(spawned))
        })
        .build()
        .unwrap()
}

fn database() -> Database {
    let db = Database::with_clock(DatabaseConfig::testing(), || 5_000);
    db.extend(&scene_plugin()).unwrap();
    db.extend(&UndoRedoService::plugin().unwrap()).unwrap();
    db
}

fn marker(position: i64, label: &str) -> Value {
    Value::Object(values([("position", Value::Int(position)), ("label", Value::from(label))]))
}

fn spawn(db: &Database, position: i64, label: &str) -> Entity {
    let id = db.transact("spawn", marker(position, label)).unwrap();
    Entity::new(id.as_int().unwrap())
}

fn move_to(entity: Entity, position: i64) -> Value {
    Value::Object(values([("entity", Value::from(entity)), ("position", Value::Int(position))]))
}

#[tokio::test]
async fn test_future_provider_commits() {
    let db = database();
    let value = db
        .transact_with("zoom", ArgsProvider::from_future(async { Ok(Value::Int(3)) }))
        .await
        .unwrap();
    assert_eq!(value, Value::Null);
    assert_eq!(db.resource("zoom"), Some(Value::Int(3)));
}

#[tokio::test]
async fn test_failed_future_applies_nothing() {
    let db = database();
    let error = db
        .transact_with(
            "zoom",
            ArgsProvider::from_future(async { Err(DatabaseError::provider("timeout")) }),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, DatabaseError::Provider(_)));
    assert_eq!(db.resource("zoom"), Some(Value::Int(1)));
}

#[tokio::test]
async fn test_closure_and_plain_value_providers() {
    let db = database();
    db.transact_with("zoom", ArgsProvider::from_fn(|| Ok(Value::Int(4))))
        .await
        .unwrap();
    assert_eq!(db.resource("zoom"), Some(Value::Int(4)));

    db.transact_with("zoom", Value::Int(6).into()).await.unwrap();
    assert_eq!(db.resource("zoom"), Some(Value::Int(6)));
}

#[tokio::test]
async fn test_empty_stream_cancels() {
    let db = database();
    let steps = stream::iter(Vec::<Result<ArgsStep, DatabaseError>>::new());
    let value = db
        .transact_with("zoom", ArgsProvider::from_stream(steps))
        .await
        .unwrap();
    assert_eq!(value, Value::Null);
    assert_eq!(db.resource("zoom"), Some(Value::Int(1)));
    assert!(db.pending_transactions().is_empty());
}

#[tokio::test]
async fn test_stream_drag_moves_entity() {
    let db = database();
    let entity = spawn(&db, 0, "a");
    let (seen, subscription) = {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = db.observe_entity(entity, None).subscribe(move |values: &Option<EntityValues>| {
            let position = values.as_ref().and_then(|v| v.get("position")).cloned();
            sink.lock().push(position);
        });
        (seen, subscription)
    };

    let steps = stream::iter(vec![
        Ok(ArgsStep::Transient(move_to(entity, 1))),
        Ok(ArgsStep::Transient(move_to(entity, 2))),
        Ok(ArgsStep::Commit(move_to(entity, 3))),
    ]);
    db.transact_with("move", ArgsProvider::from_stream(steps)).await.unwrap();
    subscription.unsubscribe();

    let positions: Vec<Option<Value>> = [0, 1, 2, 3].into_iter().map(|p| Some(Value::Int(p))).collect();
    assert_eq!(*seen.lock(), positions);
}

#[test]
fn test_transient_resource_writes_are_not_undoable() {
    let db = database();
    let undo = db.service::<UndoRedoService>(UNDO_REDO_SERVICE).unwrap();
    let (results, subscription) = {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = db
            .observe_transactions()
            .subscribe(move |result: &TransactionResult| sink.lock().push(result.transient));
        (seen, subscription)
    };

    let options = TransactionOptions { transient: None, undoable: Some(Undoable::new()) };
    db.execute(options, |t| t.set_resource("cursor", 42)).unwrap();
    subscription.unsubscribe();

    assert_eq!(*results.lock(), vec![true]);
    assert_eq!(db.resource("cursor"), Some(Value::Int(42)));
    assert!(undo.is_empty());
}

#[test]
fn test_observe_select_tracks_membership() {
    let db = database();
    let first = spawn(&db, 5, "a");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = SelectOptions::new().order_by("position", Order::Ascending);
    let subscription = db
        .observe_select(["position"], options)
        .subscribe(move |entities: &Vec<Entity>| sink.lock().push(entities.clone()));

    let second = spawn(&db, 1, "b");
    db.transact("zoom", 2).unwrap();
    db.transact("move", move_to(first, 0)).unwrap();
    db.transact("despawn", Value::Object(values([("entity", Value::from(second))])))
        .unwrap();
    subscription.unsubscribe();

    assert_eq!(
        *seen.lock(),
        vec![vec![first], vec![second, first], vec![first, second], vec![first]]
    );
}

#[test]
fn test_undo_redo_service() {
    let db = database();
    let service = db.service::<UndoRedoService>(UNDO_REDO_SERVICE).unwrap();
    let undo_enabled = service.undo_enabled();
    assert_eq!(undo_enabled.current(), Some(false));

    db.transact("zoom", 2).unwrap();
    db.transact("zoom", 3).unwrap();
    assert_eq!(service.index(), 2);
    assert_eq!(undo_enabled.current(), Some(true));

    assert!(service.undo().unwrap());
    assert_eq!(db.resource("zoom"), Some(Value::Int(2)));
    assert!(service.undo().unwrap());
    assert_eq!(db.resource("zoom"), Some(Value::Int(1)));
    assert!(!service.undo().unwrap());
    assert_eq!(undo_enabled.current(), Some(false));
    assert_eq!(service.redo_enabled().current(), Some(true));

    assert!(service.redo().unwrap());
    assert_eq!(db.resource("zoom"), Some(Value::Int(2)));

    // a new step drops the redo tail
    db.transact("zoom", 7).unwrap();
    assert_eq!(service.len(), 2);
    assert!(!service.redo().unwrap());
}

#[test]
fn test_coalesced_steps_undo_together() {
    let db = database();
    let service = db.service::<UndoRedoService>(UNDO_REDO_SERVICE).unwrap();

    for zoom in [2, 3, 4] {
        db.transact("drag_zoom", zoom).unwrap();
    }
    assert_eq!(service.len(), 1);

    service.undo().unwrap();
    assert_eq!(db.resource("zoom"), Some(Value::Int(1)));
    service.redo().unwrap();
    assert_eq!(db.resource("zoom"), Some(Value::Int(4)));
}

#[test]
fn test_snapshot_round_trip_with_pending_transient() {
    let db = database();
    let entity = spawn(&db, 1, "kept");
    let id = TransactionId::from_raw(500);
    db.apply_envelope(&TransactionEnvelope::transient(id, "move", move_to(entity, 9), 10))
        .unwrap();
    assert_eq!(db.read(|store| store.get(entity, "position").cloned()), Some(Value::Int(9)));

    let data = db.to_data();
    assert_eq!(data.pending.len(), 1);
    // the committed state is what gets saved
    let restored_store = {
        let mut store = Store::new();
        store.from_data(data.store.clone()).unwrap();
        store
    };
    assert_eq!(restored_store.get(entity, "position"), Some(&Value::Int(1)));
    assert_eq!(db.read(|store| store.get(entity, "position").cloned()), Some(Value::Int(9)));

    let bytes = db.to_bytes().unwrap();
    let copy = database();
    copy.from_bytes(&bytes).unwrap();
    assert_eq!(copy.read(|store| store.get(entity, "position").cloned()), Some(Value::Int(9)));
    assert_eq!(copy.pending_transactions().len(), 1);

    copy.cancel_transaction(id);
    assert_eq!(copy.read(|store| store.get(entity, "position").cloned()), Some(Value::Int(1)));
}

#[test]
fn test_from_data_resyncs_observers() {
    let source = database();
    let entity = spawn(&source, 4, "from source");
    source.transact("zoom", 8).unwrap();
    let data = source.to_data();

    let target = database();
    let component_calls = Arc::new(Mutex::new(0));
    let counter = component_calls.clone();
    let component = target.observe_component("zoom").subscribe(move |_| *counter.lock() += 1);
    let labels = Arc::new(Mutex::new(Vec::new()));
    let sink = labels.clone();
    let entity_subscription = target
        .observe_entity(entity, None)
        .subscribe(move |values: &Option<EntityValues>| {
            sink.lock().push(values.as_ref().and_then(|v| v.get("label")).cloned());
        });

    target.from_data(data).unwrap();
    component.unsubscribe();
    entity_subscription.unsubscribe();

    assert_eq!(*component_calls.lock(), 1);
    assert_eq!(*labels.lock(), vec![None, Some(Value::from("from source"))]);
    assert_eq!(target.resource("zoom"), Some(Value::Int(8)));
}

#[test]
fn test_actions_run_against_the_database() {
    let db = database();
    let spawned = db.action("spawn_row", 3).unwrap();
    assert_eq!(spawned.as_array().map(<[Value]>::len), Some(3));
    let marker = db.archetype_id("Marker").unwrap();
    assert_eq!(db.read(|store| store.archetype(marker).map(|a| a.len())), Some(3));
}

#[test]
fn test_unknown_transaction_is_an_error() {
    let db = database();
    assert!(matches!(
        db.transact("teleport", Value::Null),
        Err(DatabaseError::UnknownTransaction(name)) if name == "teleport"
    ));
}
