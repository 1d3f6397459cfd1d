//! Database - the observed, reconciling store
//!
//! [`Database`] is a cheap handle; clones share one store. All mutation goes
//! through the reconciler under a single lock, and observers are always
//! called after that lock is released, so a callback may freely read from
//! or transact against the database.
//!
//! Transaction functions run while the lock is held and must not call back
//! into the database.

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::extensions::Extensions;
use crate::observed::{Notification, ObserverRegistry};
use crate::plugin::TransactionFn;
use crate::reconcile::{Reconciler, TransactionEnvelope};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use void_ecs::{
    ArchetypeId, Entity, EntityValues, SelectOptions, Store, StoreData, StoreError, Value,
};
use void_event::{Callback, Observe, Subscription};
use void_ir::{
    Transaction, TransactionId, TransactionIdGenerator, TransactionOptions, TransactionResult,
    TransactionalStore, WriteOp,
};

/// Wall clock in milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(1)
}

/// Serializable database snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseData {
    /// Committed state only
    pub store: StoreData,
    /// Transient envelopes replayed after loading
    pub pending: Vec<TransactionEnvelope>,
}

pub(crate) struct DatabaseState {
    pub store: TransactionalStore,
    pub reconciler: Reconciler,
    pub transactions: BTreeMap<String, TransactionFn>,
}

pub(crate) struct Inner {
    pub config: DatabaseConfig,
    pub state: Mutex<DatabaseState>,
    pub observers: ObserverRegistry,
    pub extensions: Mutex<Extensions>,
    pub ids: TransactionIdGenerator,
    pub clock: Clock,
}

/// Shared handle to a database
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<Inner>,
}

/// Non-owning handle, used by observables the database itself may hold
#[derive(Clone)]
pub struct WeakDatabase {
    inner: Weak<Inner>,
}

impl WeakDatabase {
    pub fn upgrade(&self) -> Option<Database> {
        self.inner.upgrade().map(|inner| Database { inner })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Database")
            .field("entities", &state.store.store().entity_count())
            .field("transactions", &state.transactions.keys().collect::<Vec<_>>())
            .field("pending", &state.reconciler.len())
            .finish()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_clock(config, system_clock)
    }

    /// Create a database with an injected wall clock
    pub fn with_clock(config: DatabaseConfig, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        let store = Store::with_capacity(config.entity_capacity);
        log::debug!("Creating database (entity capacity {})", config.entity_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(DatabaseState {
                    store: TransactionalStore::new(store),
                    reconciler: Reconciler::new(),
                    transactions: BTreeMap::new(),
                }),
                observers: ObserverRegistry::default(),
                extensions: Mutex::new(Extensions::default()),
                ids: TransactionIdGenerator::new(),
                clock: Arc::new(clock),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakDatabase {
        WeakDatabase { inner: Arc::downgrade(&self.inner) }
    }

    /// Timestamp for the next envelope; never zero
    pub(crate) fn now(&self) -> i64 {
        (self.inner.clock)().max(1)
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.inner.ids.next_id()
    }

    // ---- reads ----

    /// Read the store, pending transients included
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(self.inner.state.lock().store.store())
    }

    pub fn read_entity(&self, entity: Entity) -> Option<EntityValues> {
        self.read(|store| store.read(entity))
    }

    /// Read an entity only if its archetype is `min` or a superset of it
    pub fn read_entity_with_min(&self, entity: Entity, min: ArchetypeId) -> Option<EntityValues> {
        self.read(|store| store.read_with_min(entity, min))
    }

    pub fn resource(&self, name: &str) -> Option<Value> {
        self.read(|store| store.resource(name).cloned())
    }

    pub fn archetype_id(&self, name: &str) -> Option<ArchetypeId> {
        self.read(|store| store.archetype_id(name))
    }

    pub fn select<S: AsRef<str>>(&self, include: &[S], options: &SelectOptions) -> Vec<Entity> {
        self.read(|store| store.select(include, options))
    }

    /// Names of the registered transactions
    pub fn transaction_names(&self) -> Vec<String> {
        self.inner.state.lock().transactions.keys().cloned().collect()
    }

    pub fn pending_transactions(&self) -> Vec<TransactionEnvelope> {
        self.inner.state.lock().reconciler.pending()
    }

    // ---- writes ----

    /// Run `f` directly as an observed transaction
    pub fn execute<T, F>(&self, options: TransactionOptions, f: F) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> void_ir::Result<T>,
    {
        let (outcome, notification) = {
            let mut state = self.inner.state.lock();
            let DatabaseState { store, reconciler, .. } = &mut *state;
            let mut sink = Vec::new();
            let outcome = reconciler.execute(store, options, None, &mut sink, f);
            (outcome, Notification::collect(sink, store.store()))
        };
        notification.dispatch(&self.inner.observers);
        outcome
    }

    /// Apply recorded operations as a committed, non-undoable transaction
    pub fn apply_operations(&self, operations: &[WriteOp]) -> Result<TransactionResult> {
        let result = self.execute(TransactionOptions::committed(), |t| t.apply_operations(operations))?;
        Ok(result.map_value(|_| Value::Null))
    }

    /// Apply one envelope and notify observers
    pub fn apply_envelope(&self, envelope: &TransactionEnvelope) -> Result<Option<Value>> {
        if self.inner.config.trace_envelopes {
            log::trace!(
                "Applying envelope {} '{}' at {}",
                envelope.id.raw(),
                envelope.name,
                envelope.time
            );
        }
        let (outcome, notification) = {
            let mut state = self.inner.state.lock();
            let DatabaseState { store, reconciler, transactions } = &mut *state;
            let mut sink = Vec::new();
            let outcome = reconciler.apply(store, transactions, envelope, &mut sink);
            (outcome, Notification::collect(sink, store.store()))
        };
        notification.dispatch(&self.inner.observers);
        outcome
    }

    /// Drop the pending transient state of one call
    pub fn cancel_transaction(&self, id: TransactionId) {
        let notification = {
            let mut state = self.inner.state.lock();
            let DatabaseState { store, reconciler, .. } = &mut *state;
            let mut sink = Vec::new();
            reconciler.cancel(store, id, &mut sink);
            Notification::collect(sink, store.store())
        };
        notification.dispatch(&self.inner.observers);
    }

    // ---- snapshots ----

    /// Snapshot the committed state plus the pending envelopes
    pub fn to_data(&self) -> DatabaseData {
        let mut state = self.inner.state.lock();
        let DatabaseState { store, reconciler, .. } = &mut *state;
        let snapshot = reconciler.suspend(store, |store| store.store().to_data());
        DatabaseData {
            store: snapshot,
            pending: reconciler.pending(),
        }
    }

    /// Replace the whole state with a snapshot.
    ///
    /// Observers see one notification covering every component, archetype
    /// and observed entity.
    pub fn from_data(&self, data: DatabaseData) -> Result<()> {
        let last_id = data.pending.iter().map(|envelope| envelope.id).max();
        let notification = {
            let mut state = self.inner.state.lock();
            let DatabaseState { store, reconciler, transactions } = &mut *state;
            store.store_mut().from_data(data.store)?;
            let mut notification = Notification::resync(store.store(), &self.inner.observers);

            let mut sink = Vec::new();
            reconciler.restore(store, transactions, data.pending, &mut sink);
            notification.absorb(Notification::collect(sink, store.store()));
            notification
        };
        if let Some(id) = last_id {
            self.inner.ids.advance_past(id);
        }
        log::debug!("Database restored from snapshot");
        notification.dispatch(&self.inner.observers);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.to_data())?)
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<()> {
        let data: DatabaseData = bincode::deserialize(bytes)?;
        self.from_data(data)
    }

    // ---- observation ----

    /// Every non-empty transaction result
    pub fn observe_transactions(&self) -> Observe<TransactionResult> {
        self.inner.observers.transactions.observe(())
    }

    /// Called whenever a transaction changes `name`
    pub fn observe_component(&self, name: impl Into<String>) -> Observe<()> {
        self.inner.observers.components.observe(name.into())
    }

    /// Called whenever a transaction touches `archetype`
    pub fn observe_archetype(&self, archetype: ArchetypeId) -> Observe<()> {
        self.inner.observers.archetypes.observe(archetype)
    }

    /// Current values of `entity`, replayed on subscribe.
    ///
    /// With `min`, the entity reads as `None` while its archetype does not
    /// hold every component of `min`.
    pub fn observe_entity(&self, entity: Entity, min: Option<ArchetypeId>) -> Observe<Option<EntityValues>> {
        let weak = self.downgrade();
        let entities = self.inner.observers.entities.clone();
        let read = Arc::new(move || -> Option<EntityValues> {
            let db = weak.upgrade()?;
            match min {
                Some(min) => db.read_entity_with_min(entity, min),
                None => db.read_entity(entity),
            }
        });

        Observe::new(move |callback: Callback<Option<EntityValues>>| {
            let forward = callback.clone();
            let reread = read.clone();
            let subscription = entities.subscribe(
                entity,
                Arc::new(move |values: &Option<EntityValues>| match (min, values) {
                    (Some(_), Some(_)) => forward(&reread()),
                    _ => forward(values),
                }),
            );
            callback(&read());
            subscription
        })
    }

    /// Value of a resource, replayed on subscribe
    pub fn observe_resource(&self, name: &str) -> Result<Observe<Value>> {
        let entity = self
            .read(|store| store.resource_entry(name).map(|entry| entry.entity))
            .ok_or_else(|| StoreError::UnknownResource(name.to_string()))?;
        let field = name.to_string();
        Ok(self
            .observe_entity(entity, None)
            .map(move |values| {
                values
                    .as_ref()
                    .and_then(|values| values.get(&field))
                    .cloned()
                    .unwrap_or_default()
            })
            .distinct())
    }

    /// Result of a selection, replayed on subscribe and re-evaluated when
    /// any component it depends on changes
    pub fn observe_select<I, S>(&self, include: I, options: SelectOptions) -> Observe<Vec<Entity>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let include: Vec<String> = include.into_iter().map(Into::into).collect();
        let mut watched: BTreeSet<String> = include.iter().cloned().collect();
        watched.extend(options.referenced_components().map(str::to_string));
        let triggers = Observe::merge(watched.into_iter().map(|name| self.observe_component(name)).collect());

        let weak = self.downgrade();
        let select = Arc::new(move || -> Vec<Entity> {
            weak.upgrade()
                .map(|db| db.select(&include, &options))
                .unwrap_or_default()
        });

        Observe::new(move |callback: Callback<Vec<Entity>>| {
            let forward = callback.clone();
            let reselect = select.clone();
            let subscription: Subscription = triggers.subscribe(move |_| forward(&reselect()));
            callback(&select());
            subscription
        })
        .distinct()
    }
}
