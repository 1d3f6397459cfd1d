//! Write operations - the serializable transaction IR
//!
//! Every mutation a transaction performs is recorded as a [`WriteOp`]. Redo
//! logs replay a transaction forward; undo logs restore the state it started
//! from. Both are plain data and can be shipped elsewhere for replication.

use serde::{Deserialize, Serialize};
use void_ecs::{Entity, EntityUpdate, EntityValues, Store, StoreError};

/// A single recorded mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Create an entity from a full row (without `id`).
    ///
    /// `entity` is the id the insert produced when recorded. Replays land on
    /// the same id as long as the free lists are in the recorded state.
    Insert { entity: Entity, values: EntityValues },
    /// Partial update; `Remove` drops a component
    Update { entity: Entity, values: EntityUpdate },
    /// Delete an entity
    Delete { entity: Entity },
}

impl WriteOp {
    /// The entity this operation targets
    pub fn entity(&self) -> Entity {
        match self {
            Self::Insert { entity, .. } | Self::Update { entity, .. } | Self::Delete { entity } => *entity,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// Apply directly to a store, bypassing any tracking
    pub fn apply(&self, store: &mut Store) -> Result<(), StoreError> {
        match self {
            Self::Insert { entity, values } => {
                let created = store.insert_values(values)?;
                if created != *entity {
                    log::warn!("Insert recorded for {} recreated {}", entity, created);
                }
            }
            Self::Update { entity, values } => store.update(*entity, values)?,
            Self::Delete { entity } => {
                if !store.delete(*entity) {
                    return Err(StoreError::EntityNotFound(*entity));
                }
            }
        }
        Ok(())
    }
}

/// Apply operations in order, stopping at the first failure
pub fn apply_operations(store: &mut Store, operations: &[WriteOp]) -> Result<(), StoreError> {
    for operation in operations {
        operation.apply(store)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_ecs::{set_all, values, ComponentDescriptor, Value};

    #[test]
    fn test_apply_operations_in_order() {
        let mut store = Store::new();
        store.register_component("x", ComponentDescriptor::new(0));

        let ops = vec![
            WriteOp::Insert { entity: Entity::new(0), values: values([("x", 1)]) },
            WriteOp::Update { entity: Entity::new(0), values: set_all([("x", 2)]) },
            WriteOp::Insert { entity: Entity::new(1), values: values([("x", 3)]) },
            WriteOp::Delete { entity: Entity::new(1) },
        ];
        apply_operations(&mut store, &ops).unwrap();

        assert_eq!(store.get(Entity::new(0), "x"), Some(&Value::Int(2)));
        assert!(!store.contains(Entity::new(1)));
    }

    #[test]
    fn test_delete_missing_entity_fails() {
        let mut store = Store::new();
        let op = WriteOp::Delete { entity: Entity::new(7) };
        assert_eq!(op.apply(&mut store), Err(StoreError::EntityNotFound(Entity::new(7))));
    }

    #[test]
    fn test_ops_serialize() {
        let op = WriteOp::Update { entity: Entity::new(3), values: set_all([("x", 1)]) };
        let json = serde_json::to_string(&op).expect("Failed to serialize");
        let back: WriteOp = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, op);
        assert_eq!(back.entity(), Entity::new(3));
    }
}
