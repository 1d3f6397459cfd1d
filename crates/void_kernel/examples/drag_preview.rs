//! Drag preview demonstration
//!
//! This example shows:
//! - Declaring schema and transactions in a plugin
//! - Streaming transient drag steps before a commit
//! - Entity observers seeing provisional state
//! - Undo/redo through the built-in service
//! - Snapshots with bincode

use futures_util::stream;
use std::time::Duration;
use void_kernel::prelude::*;
use void_kernel::UNDO_REDO_SERVICE;

fn shapes() -> void_kernel::Result<Plugin> {
    Plugin::builder()
        .component("x", ComponentDescriptor::new(0))
        .component("y", ComponentDescriptor::new(0))
        .archetype("Shape", ["x", "y"])
        .transaction("add_shape", |t, args| {
            let shape = t
                .archetype_id("Shape")
                .ok_or_else(|| TransactionError::aborted("Shape not registered"))?;
            let entity = t.insert(shape, &args.as_object().cloned().unwrap_or_default())?;
            Ok(Value::from(entity))
        })
        .transaction("move_shape", |t, args| {
            t.set_undoable(Undoable::new());
            let entity = Entity::new(args.get("entity").and_then(Value::as_int).unwrap_or(-1));
            let x = args.get("x").cloned().unwrap_or_default();
            let y = args.get("y").cloned().unwrap_or_default();
            t.update(entity, &set_all([("x", x), ("y", y)]))?;
            Ok(Value::Null)
        })
        .build()
}

fn position(entity: Entity, x: i64, y: i64) -> Value {
    [("entity", Value::from(entity)), ("x", Value::Int(x)), ("y", Value::Int(y))]
        .into_iter()
        .collect()
}

#[tokio::main]
async fn main() -> void_kernel::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db = Database::new(DatabaseConfig::development());
    db.extend(&shapes()?)?;
    db.extend(&UndoRedoService::plugin()?)?;
    let undo = db.service::<UndoRedoService>(UNDO_REDO_SERVICE)?;

    let id = db.transact("add_shape", [("x", 0), ("y", 0)].into_iter().collect::<Value>())?;
    let shape = Entity::new(id.as_int().unwrap_or(-1));
    log::info!("Created shape {}", shape);

    let watcher = db.observe_entity(shape, None).subscribe(|values: &Option<EntityValues>| {
        if let Some(values) = values {
            log::info!("Shape at ({}, {})", values["x"], values["y"]);
        }
    });

    // simulated pointer moves, one every 16ms
    let steps = stream::unfold(0i64, move |step| async move {
        if step == 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(16)).await;
        let next = step + 1;
        Some((Ok(ArgsStep::Transient(position(shape, next * 10, next * 5))), next))
    });
    db.transact_with("move_shape", ArgsProvider::from_stream(steps)).await?;
    log::info!("Drag committed, {} undo step(s)", undo.len());

    undo.undo()?;
    log::info!("After undo: {:?}", db.read_entity(shape));
    undo.redo()?;

    let bytes = db.to_bytes()?;
    let copy = Database::new(DatabaseConfig::default());
    copy.extend(&shapes()?)?;
    copy.from_bytes(&bytes)?;
    log::info!("Snapshot of {} bytes restored: {:?}", bytes.len(), copy.read_entity(shape));

    watcher.unsubscribe();
    Ok(())
}
