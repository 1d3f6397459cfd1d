//! Write-log coalescing
//!
//! Shrinks redo/undo logs without changing what they do when applied:
//! - consecutive updates on one entity merge into a single update
//! - updates following an insert of the same entity fold into the insert
//! - an insert immediately followed by a delete of that entity cancels out
//!
//! Adjacent undoable transactions sharing a coalesce key can be merged into
//! one undo step with [`coalesce_transactions`].

use crate::op::WriteOp;
use crate::transaction::TransactionResult;
use void_ecs::ComponentUpdate;

enum Absorbed {
    Merged,
    Cancelled,
    Kept,
}

fn absorb(last: &mut WriteOp, next: &WriteOp) -> Absorbed {
    match (last, next) {
        (
            WriteOp::Update { entity, values },
            WriteOp::Update { entity: next_entity, values: next_values },
        ) if entity == next_entity => {
            values.extend(next_values.iter().map(|(k, v)| (k.clone(), v.clone())));
            Absorbed::Merged
        }
        (
            WriteOp::Insert { entity, values },
            WriteOp::Update { entity: next_entity, values: next_values },
        ) if entity == next_entity => {
            for (name, change) in next_values {
                match change {
                    ComponentUpdate::Set(value) => {
                        values.insert(name.clone(), value.clone());
                    }
                    ComponentUpdate::Remove => {
                        values.remove(name);
                    }
                }
            }
            Absorbed::Merged
        }
        (WriteOp::Insert { entity, .. }, WriteOp::Delete { entity: next_entity }) if entity == next_entity => {
            Absorbed::Cancelled
        }
        _ => Absorbed::Kept,
    }
}

/// Coalesce a sequence of write operations
pub fn coalesce_write_operations(operations: Vec<WriteOp>) -> Vec<WriteOp> {
    if operations.len() <= 1 {
        return operations;
    }

    let mut result: Vec<WriteOp> = Vec::with_capacity(operations.len());
    for op in operations {
        let outcome = match result.last_mut() {
            Some(last) => absorb(last, &op),
            None => Absorbed::Kept,
        };
        match outcome {
            Absorbed::Merged => {}
            Absorbed::Cancelled => {
                result.pop();
            }
            Absorbed::Kept => result.push(op),
        }
    }
    result
}

/// Whether `current` may merge into `previous` on an undo stack.
///
/// Both must be undoable with equal coalesce keys; a missing key never
/// coalesces.
pub fn should_coalesce<A, B>(previous: &TransactionResult<A>, current: &TransactionResult<B>) -> bool {
    match (&previous.undoable, &current.undoable) {
        (Some(prev), Some(cur)) => match (&prev.coalesce, &cur.coalesce) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

/// Merge two adjacent results into one undo step.
///
/// `current` is treated as applied after `previous`: its redo runs last and
/// its undo runs first.
pub fn coalesce_transactions<T>(previous: TransactionResult<T>, current: TransactionResult<T>) -> TransactionResult<T> {
    let mut redo = previous.redo;
    redo.extend(current.redo);
    let mut undo = current.undo;
    undo.extend(previous.undo);

    let mut changed_entities = previous.changed_entities;
    changed_entities.extend(current.changed_entities);
    let mut changed_components = previous.changed_components;
    changed_components.extend(current.changed_components);
    let mut changed_archetypes = previous.changed_archetypes;
    changed_archetypes.extend(current.changed_archetypes);

    TransactionResult {
        value: current.value,
        transient: current.transient,
        undoable: current.undoable,
        redo: coalesce_write_operations(redo),
        undo: coalesce_write_operations(undo),
        changed_entities,
        changed_components,
        changed_archetypes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Undoable;
    use std::collections::{BTreeMap, BTreeSet};
    use void_ecs::{set_all, values, Entity, EntityUpdate, Value};

    fn update(entity: i64, pairs: &[(&str, i64)]) -> WriteOp {
        WriteOp::Update {
            entity: Entity::new(entity),
            values: set_all(pairs.iter().map(|(k, v)| (*k, *v))),
        }
    }

    fn result(redo: Vec<WriteOp>, undo: Vec<WriteOp>, key: Option<&str>) -> TransactionResult<Value> {
        TransactionResult {
            value: Value::Null,
            transient: false,
            undoable: Some(Undoable { coalesce: key.map(Value::from) }),
            redo,
            undo,
            changed_entities: BTreeMap::new(),
            changed_components: BTreeSet::new(),
            changed_archetypes: BTreeSet::new(),
        }
    }

    #[test]
    fn test_consecutive_updates_merge() {
        let ops = vec![update(1, &[("x", 1)]), update(1, &[("x", 2), ("y", 3)]), update(2, &[("x", 9)])];
        let merged = coalesce_write_operations(ops);
        assert_eq!(merged, vec![update(1, &[("x", 2), ("y", 3)]), update(2, &[("x", 9)])]);
    }

    #[test]
    fn test_updates_fold_into_insert() {
        let mut removal = EntityUpdate::new();
        removal.insert("y".into(), ComponentUpdate::Remove);
        let ops = vec![
            WriteOp::Insert { entity: Entity::new(4), values: values([("x", 1), ("y", 1)]) },
            update(4, &[("x", 5)]),
            WriteOp::Update { entity: Entity::new(4), values: removal },
        ];
        let merged = coalesce_write_operations(ops);
        assert_eq!(
            merged,
            vec![WriteOp::Insert { entity: Entity::new(4), values: values([("x", 5)]) }]
        );
    }

    #[test]
    fn test_updates_on_other_entities_do_not_fold() {
        let insert = WriteOp::Insert { entity: Entity::new(4), values: values([("x", 1)]) };
        let ops = vec![insert.clone(), update(5, &[("x", 5)])];
        assert_eq!(coalesce_write_operations(ops), vec![insert, update(5, &[("x", 5)])]);
    }

    #[test]
    fn test_insert_then_delete_cancels() {
        let ops = vec![
            update(1, &[("x", 1)]),
            WriteOp::Insert { entity: Entity::new(2), values: values([("x", 1)]) },
            WriteOp::Delete { entity: Entity::new(2) },
        ];
        assert_eq!(coalesce_write_operations(ops), vec![update(1, &[("x", 1)])]);
    }

    #[test]
    fn test_should_coalesce_requires_equal_keys() {
        let a = result(vec![], vec![], Some("drag"));
        let b = result(vec![], vec![], Some("drag"));
        let c = result(vec![], vec![], Some("other"));
        let none = result(vec![], vec![], None);
        let mut not_undoable = result(vec![], vec![], Some("drag"));
        not_undoable.undoable = None;

        assert!(should_coalesce(&a, &b));
        assert!(!should_coalesce(&a, &c));
        assert!(!should_coalesce(&none, &none));
        assert!(!should_coalesce(&a, &not_undoable));
    }

    #[test]
    fn test_coalesce_transactions_orders_logs() {
        let previous = result(vec![update(1, &[("x", 1)])], vec![update(1, &[("x", 0)])], Some("k"));
        let current = result(vec![update(1, &[("x", 2)])], vec![update(1, &[("x", 1)])], Some("k"));
        let combined = coalesce_transactions(previous, current);

        assert_eq!(combined.redo, vec![update(1, &[("x", 2)])]);
        // undo of current runs first, so the oldest value wins
        assert_eq!(combined.undo, vec![update(1, &[("x", 0)])]);
    }
}
