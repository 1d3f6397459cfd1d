//! Change notification
//!
//! Results collected while applying one envelope are folded into a single
//! [`Notification`] under the state lock and dispatched after it is
//! released:
//! 1. transaction observers receive every non-empty result
//! 2. component observers are called once per changed component
//! 3. archetype observers are called once per changed archetype
//! 4. entity observers receive a fresh read of their entity (`None` if deleted)

use std::collections::{BTreeMap, BTreeSet};
use void_ecs::{ArchetypeId, Entity, EntityValues, Store};
use void_event::{Listeners, Observers};
use void_ir::TransactionResult;

/// Observer registries owned by one database
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    pub transactions: Listeners<TransactionResult>,
    pub components: Observers<String, ()>,
    pub archetypes: Observers<ArchetypeId, ()>,
    pub entities: Observers<Entity, Option<EntityValues>>,
}

/// Everything observers need to hear about one envelope
#[derive(Debug, Default)]
pub(crate) struct Notification {
    results: Vec<TransactionResult>,
    components: BTreeSet<String>,
    archetypes: BTreeSet<ArchetypeId>,
    entities: BTreeMap<Entity, Option<EntityValues>>,
}

impl Notification {
    /// Merge collected results, reading changed entities from `store`
    pub fn collect(results: Vec<TransactionResult>, store: &Store) -> Self {
        let mut notification = Self::default();
        for result in &results {
            notification.components.extend(result.changed_components.iter().cloned());
            notification.archetypes.extend(result.changed_archetypes.iter().copied());
            for entity in result.changed_entities.keys() {
                notification.entities.entry(*entity).or_insert(None);
            }
        }
        for (entity, values) in notification.entities.iter_mut() {
            *values = store.read(*entity);
        }
        notification.results = results.into_iter().filter(|result| !result.is_empty()).collect();
        notification
    }

    /// A notification covering every known component, archetype and observed entity
    pub fn resync(store: &Store, registry: &ObserverRegistry) -> Self {
        let mut components: BTreeSet<String> = store.components().names().map(str::to_string).collect();
        components.extend(registry.components.keys());
        let mut archetypes: BTreeSet<ArchetypeId> = store.archetypes().iter().map(|a| a.id()).collect();
        archetypes.extend(registry.archetypes.keys());
        let entities: BTreeMap<Entity, Option<EntityValues>> = registry
            .entities
            .keys()
            .into_iter()
            .map(|entity| (entity, store.read(entity)))
            .collect();

        let result = TransactionResult {
            value: void_ecs::Value::Null,
            transient: false,
            undoable: None,
            redo: Vec::new(),
            undo: Vec::new(),
            changed_entities: entities.clone(),
            changed_components: components.clone(),
            changed_archetypes: archetypes.clone(),
        };
        Self {
            results: vec![result],
            components,
            archetypes,
            entities,
        }
    }

    /// Fold another notification into this one, keeping the newest entity values
    pub fn absorb(&mut self, other: Notification) {
        self.results.extend(other.results);
        self.components.extend(other.components);
        self.archetypes.extend(other.archetypes);
        self.entities.extend(other.entities);
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.archetypes.is_empty() && self.entities.is_empty()
    }

    /// Call observers. Must not run under the database lock.
    pub fn dispatch(self, registry: &ObserverRegistry) {
        if self.is_empty() {
            return;
        }
        for result in &self.results {
            registry.transactions.notify(&(), result);
        }
        for component in &self.components {
            registry.components.notify(component, &());
        }
        for archetype in &self.archetypes {
            registry.archetypes.notify(archetype, &());
        }
        for (entity, values) in &self.entities {
            registry.entities.notify(entity, values);
        }
    }
}
