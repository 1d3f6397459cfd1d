//! Transactions - tracked, atomic mutation of a store
//!
//! A [`TransactionalStore`] runs a transaction function against a
//! [`Transaction`], a short-lived wrapper that records every write into redo
//! and undo logs and collects the changed entities, components and
//! archetypes. If the function fails, the undo log is replayed against the
//! store before the error is returned, so no partial state is observable.
//!
//! The wrapper borrows the store for exactly one execution; nothing derived
//! from it can outlive the transaction.

use crate::coalesce::coalesce_write_operations;
use crate::error::{Result, TransactionError};
use crate::op::WriteOp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use void_ecs::{
    ArchetypeId, ComponentUpdate, Entity, EntityUpdate, EntityValues, SelectOptions, Store,
    StoreError, Value, ID, TRANSIENT,
};

/// Identifier shared by every envelope of one logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Monotonic source of [`TransactionId`]s, owned by one database
#[derive(Debug)]
pub struct TransactionIdGenerator {
    next: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next_id(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure future ids are issued after `id`
    pub fn advance_past(&self, id: TransactionId) {
        self.next.fetch_max(id.0 + 1, Ordering::Relaxed);
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a transaction as an undo step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Undoable {
    /// Adjacent steps with equal keys merge into one
    #[serde(default)]
    pub coalesce: Option<Value>,
}

impl Undoable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coalesce(key: impl Into<Value>) -> Self {
        Self { coalesce: Some(key.into()) }
    }
}

/// Per-execution options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// `None` lets writes to transient resources decide
    #[serde(default)]
    pub transient: Option<bool>,
    #[serde(default)]
    pub undoable: Option<Undoable>,
}

impl TransactionOptions {
    pub fn transient() -> Self {
        Self { transient: Some(true), undoable: None }
    }

    pub fn committed() -> Self {
        Self { transient: Some(false), undoable: None }
    }
}

/// Outcome of a successful execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult<T = Value> {
    /// Value returned by the transaction function
    pub value: T,
    pub transient: bool,
    pub undoable: Option<Undoable>,
    /// Forward operations, in apply order
    pub redo: Vec<WriteOp>,
    /// Inverse operations, already in apply order
    pub undo: Vec<WriteOp>,
    /// Changed entities with their values after the transaction (`None` if deleted)
    pub changed_entities: BTreeMap<Entity, Option<EntityValues>>,
    pub changed_components: BTreeSet<String>,
    pub changed_archetypes: BTreeSet<ArchetypeId>,
}

impl<T> TransactionResult<T> {
    /// True when nothing observable changed
    pub fn is_empty(&self) -> bool {
        self.changed_entities.is_empty() && self.changed_components.is_empty() && self.changed_archetypes.is_empty()
    }

    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> TransactionResult<U> {
        TransactionResult {
            value: f(self.value),
            transient: self.transient,
            undoable: self.undoable,
            redo: self.redo,
            undo: self.undo,
            changed_entities: self.changed_entities,
            changed_components: self.changed_components,
            changed_archetypes: self.changed_archetypes,
        }
    }
}

/// Everything a transaction recorded
#[derive(Debug, Default)]
struct TransactionLog {
    redo: Vec<WriteOp>,
    /// In call order; reversed on completion
    undo: Vec<WriteOp>,
    changed_entities: BTreeSet<Entity>,
    changed_components: BTreeSet<String>,
    changed_archetypes: BTreeSet<ArchetypeId>,
    undoable: Option<Undoable>,
    wrote_transient_resource: bool,
}

/// Store wrapper handed to a transaction function
pub struct Transaction<'a> {
    store: &'a mut Store,
    log: TransactionLog,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a mut Store, undoable: Option<Undoable>) -> Self {
        Self {
            store,
            log: TransactionLog { undoable, ..TransactionLog::default() },
        }
    }

    // ---- reads ----

    /// Read-only view of the underlying store
    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn read(&self, entity: Entity) -> Option<EntityValues> {
        self.store.read(entity)
    }

    pub fn get(&self, entity: Entity, component: &str) -> Option<&Value> {
        self.store.get(entity, component)
    }

    pub fn resource(&self, name: &str) -> Option<&Value> {
        self.store.resource(name)
    }

    pub fn archetype_id(&self, name: &str) -> Option<ArchetypeId> {
        self.store.archetype_id(name)
    }

    pub fn select<S: AsRef<str>>(&self, include: &[S], options: &SelectOptions) -> Vec<Entity> {
        self.store.select(include, options)
    }

    /// Mark this transaction as an undo step
    pub fn set_undoable(&mut self, undoable: Undoable) {
        self.log.undoable = Some(undoable);
    }

    // ---- tracked writes ----

    /// Get or create an archetype. Archetypes are structural and never rolled back.
    pub fn ensure_archetype<I, S>(&mut self, names: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.store.ensure_archetype(names)?)
    }

    /// Insert into an existing archetype
    pub fn insert(&mut self, archetype: ArchetypeId, values: &EntityValues) -> Result<Entity> {
        let entity = self.store.insert(archetype, values)?;
        let mut row = self.store.read(entity).ok_or(StoreError::EntityNotFound(entity))?;
        row.remove(ID);

        self.log.changed_entities.insert(entity);
        self.log.changed_archetypes.insert(archetype);
        self.log.changed_components.insert(ID.to_string());
        self.log.changed_components.extend(row.keys().cloned());
        self.log.redo.push(WriteOp::Insert { entity, values: row });
        self.log.undo.push(WriteOp::Delete { entity });
        Ok(entity)
    }

    /// Insert into the archetype formed by `id` plus the keys of `values`
    pub fn insert_values(&mut self, values: &EntityValues) -> Result<Entity> {
        let names: Vec<&str> = std::iter::once(ID).chain(values.keys().map(String::as_str)).collect();
        let archetype = self.store.ensure_archetype(names)?;
        self.insert(archetype, values)
    }

    /// Apply a partial update, recording only the keys that actually change
    pub fn update(&mut self, entity: Entity, update: &EntityUpdate) -> Result<()> {
        let before = self.store.locate(entity).ok_or(StoreError::EntityNotFound(entity))?;
        // reserved even when the write would not change anything
        if let Some(reserved) = update.keys().find(|k| *k == ID || *k == TRANSIENT) {
            return Err(StoreError::ReservedComponent(reserved.clone()).into());
        }

        let mut replaced = EntityUpdate::new();
        let mut changed = EntityUpdate::new();
        for (name, change) in update {
            let old = self.store.get(entity, name);
            let differs = match (change, old) {
                (ComponentUpdate::Set(new), Some(old)) => new != old,
                (ComponentUpdate::Set(_), None) => true,
                (ComponentUpdate::Remove, Some(_)) => true,
                (ComponentUpdate::Remove, None) => false,
            };
            if differs {
                let prior = old.cloned().map_or(ComponentUpdate::Remove, ComponentUpdate::Set);
                replaced.insert(name.clone(), prior);
                changed.insert(name.clone(), change.clone());
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        self.store.update(entity, &changed)?;
        let after = self.store.locate(entity).ok_or(StoreError::EntityNotFound(entity))?;

        self.log.changed_entities.insert(entity);
        self.log.changed_archetypes.insert(before.archetype);
        self.log.changed_archetypes.insert(after.archetype);
        self.log.changed_components.extend(changed.keys().cloned());
        if let Some((_, entry)) = self.store.resource_for_entity(entity) {
            if entry.descriptor.transient {
                self.log.wrote_transient_resource = true;
            }
        }
        self.record_update(entity, changed, replaced);
        Ok(())
    }

    /// Combine with the previous log entries when they update the same entity
    fn record_update(&mut self, entity: Entity, changed: EntityUpdate, replaced: EntityUpdate) {
        if let (
            Some(WriteOp::Update { entity: redo_entity, values: redo }),
            Some(WriteOp::Update { entity: undo_entity, values: undo }),
        ) = (self.log.redo.last_mut(), self.log.undo.last_mut())
        {
            if *redo_entity == entity && *undo_entity == entity {
                redo.extend(changed);
                // earlier prior values win
                for (name, prior) in replaced {
                    undo.entry(name).or_insert(prior);
                }
                return;
            }
        }
        self.log.redo.push(WriteOp::Update { entity, values: changed });
        self.log.undo.push(WriteOp::Update { entity, values: replaced });
    }

    /// Delete an entity. Resource entities cannot be deleted.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        if let Some((name, _)) = self.store.resource_for_entity(entity) {
            return Err(TransactionError::ResourceDelete(name.to_string()));
        }
        let location = self.store.locate(entity).ok_or(StoreError::EntityNotFound(entity))?;
        let mut row = self.store.read(entity).ok_or(StoreError::EntityNotFound(entity))?;
        row.remove(ID);
        self.store.delete(entity);

        self.log.changed_entities.insert(entity);
        self.log.changed_archetypes.insert(location.archetype);
        self.log.changed_components.insert(ID.to_string());
        self.log.changed_components.extend(row.keys().cloned());
        self.log.redo.push(WriteOp::Delete { entity });
        self.log.undo.push(WriteOp::Insert { entity, values: row });
        Ok(())
    }

    /// Write a resource through its backing entity
    pub fn set_resource(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let entity = self
            .store
            .resource_entry(name)
            .map(|entry| entry.entity)
            .ok_or_else(|| StoreError::UnknownResource(name.to_string()))?;
        let mut update = EntityUpdate::new();
        update.insert(name.to_string(), ComponentUpdate::Set(value.into()));
        self.update(entity, &update)
    }

    /// Apply recorded operations through the tracked write paths
    pub fn apply_operations(&mut self, operations: &[WriteOp]) -> Result<()> {
        for operation in operations {
            match operation {
                WriteOp::Insert { entity, values } => {
                    let created = self.insert_values(values)?;
                    if created != *entity {
                        log::warn!("Insert recorded for {} recreated {}", entity, created);
                    }
                }
                WriteOp::Update { entity, values } => self.update(*entity, values)?,
                WriteOp::Delete { entity } => self.delete(*entity)?,
            }
        }
        Ok(())
    }

    fn into_log(self) -> TransactionLog {
        self.log
    }
}

/// A store that can only be mutated through transactions
#[derive(Debug, Default)]
pub struct TransactionalStore {
    store: Store,
}

impl TransactionalStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Untracked access for registration and snapshot loading
    #[inline]
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn into_inner(self) -> Store {
        self.store
    }

    /// Run `f` as one transaction.
    ///
    /// On error every recorded write is undone, most recent first, and the
    /// error is returned unchanged.
    pub fn execute<T, F>(&mut self, options: TransactionOptions, f: F) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut transaction = Transaction::new(&mut self.store, options.undoable);
        let outcome = f(&mut transaction);
        let log = transaction.into_log();

        let value = match outcome {
            Ok(value) => value,
            Err(error) => {
                self.rollback(log.undo);
                return Err(error);
            }
        };

        let mut undo = log.undo;
        undo.reverse();
        let changed_entities = log
            .changed_entities
            .into_iter()
            .map(|entity| (entity, self.store.read(entity)))
            .collect();

        Ok(TransactionResult {
            value,
            transient: options.transient.unwrap_or(log.wrote_transient_resource),
            undoable: log.undoable,
            redo: coalesce_write_operations(log.redo),
            undo: coalesce_write_operations(undo),
            changed_entities,
            changed_components: log.changed_components,
            changed_archetypes: log.changed_archetypes,
        })
    }

    /// Apply undo operations (call order) most recent first
    fn rollback(&mut self, undo: Vec<WriteOp>) {
        log::debug!("Rolling back {} operations", undo.len());
        for op in undo.iter().rev() {
            if let Err(error) = op.apply(&mut self.store) {
                log::error!("Rollback of {:?} failed: {}", op, error);
            }
        }
    }
}
