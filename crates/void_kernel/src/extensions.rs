//! Extending a database with plugins, and running what they contribute

use crate::database::Database;
use crate::error::{DatabaseError, Result};
use crate::plugin::{same_fn, ActionFn, Plugin, SystemDeclaration, SystemFn};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use void_ecs::{StoreError, SystemDeclarations, SystemOrder, SystemOrderCache, Value};
use void_event::Observe;

/// Everything plugins added beyond the store
#[derive(Default)]
pub(crate) struct Extensions {
    extended: BTreeSet<crate::plugin::PluginId>,
    actions: BTreeMap<String, ActionFn>,
    services: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
    computed: BTreeMap<String, Observe<Value>>,
    systems: BTreeMap<String, SystemDeclaration>,
    schedules: SystemDeclarations,
    /// `None` while running or when the factory returned nothing
    runnables: BTreeMap<String, Option<SystemFn>>,
    order_cache: SystemOrderCache,
}

fn conflict(kind: &'static str, key: &str) -> DatabaseError {
    DatabaseError::PluginConflict { kind, key: key.to_string() }
}

impl Database {
    /// Add a plugin's declarations.
    ///
    /// Extending with a plugin whose members were all added before does
    /// nothing. Conflicts and archetypes naming unknown components are
    /// reported before anything is registered. Services, computed values and systems are only created for
    /// names not already present.
    pub fn extend(&self, plugin: &Plugin) -> Result<()> {
        let decl = plugin.declarations();
        {
            let ext = self.inner.extensions.lock();
            if plugin.members().is_subset(&ext.extended) {
                log::debug!("Plugin {} already extended", plugin.id().raw());
                return Ok(());
            }
            for (name, action) in &decl.actions {
                if ext.actions.get(name).is_some_and(|existing| !same_fn(existing, action)) {
                    return Err(conflict("action", name));
                }
            }
            for (name, system) in &decl.systems {
                let clashes = ext.systems.get(name).is_some_and(|existing| {
                    !same_fn(&existing.create, &system.create) || existing.schedule != system.schedule
                });
                if clashes {
                    return Err(conflict("system", name));
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            for (name, transaction) in &decl.transactions {
                if state.transactions.get(name).is_some_and(|existing| !same_fn(existing, transaction)) {
                    return Err(conflict("transaction", name));
                }
            }
            // checked up front so a failing plugin registers nothing
            for components in decl.archetypes.values() {
                let unknown = components.iter().find(|name| {
                    !decl.components.contains_key(*name)
                        && !decl.resources.contains_key(*name)
                        && !state.store.store().components().contains(name)
                });
                if let Some(name) = unknown {
                    return Err(StoreError::UnknownComponent(name.clone()).into());
                }
            }
            let crate::database::DatabaseState { store, reconciler, transactions } = &mut *state;
            reconciler.suspend(store, |store| -> Result<()> {
                let store = store.store_mut();
                for (name, descriptor) in &decl.components {
                    store.register_component(name.clone(), descriptor.clone());
                }
                for (name, descriptor) in &decl.resources {
                    store.register_resource(name.clone(), descriptor.clone())?;
                }
                for (name, components) in &decl.archetypes {
                    store.register_archetype(name.clone(), components)?;
                }
                Ok(())
            })?;
            for (name, transaction) in &decl.transactions {
                transactions.insert(name.clone(), transaction.clone());
            }
        }

        let (services, computed, systems) = {
            let mut ext = self.inner.extensions.lock();
            for (name, action) in &decl.actions {
                ext.actions.insert(name.clone(), action.clone());
            }
            let services: Vec<_> = decl
                .services
                .iter()
                .filter(|(name, _)| !ext.services.contains_key(*name))
                .map(|(name, factory)| (name.clone(), factory.clone()))
                .collect();
            let computed: Vec<_> = decl
                .computed
                .iter()
                .filter(|(name, _)| !ext.computed.contains_key(*name))
                .map(|(name, factory)| (name.clone(), factory.clone()))
                .collect();
            let systems: Vec<_> = decl
                .systems
                .iter()
                .filter(|(name, _)| !ext.systems.contains_key(*name))
                .map(|(name, system)| (name.clone(), system.clone()))
                .collect();
            (services, computed, systems)
        };

        // factories may read the database, so they run without locks held
        for (name, factory) in services {
            let instance = factory(self);
            self.inner.extensions.lock().services.entry(name).or_insert(instance);
        }
        for (name, factory) in computed {
            let observe = factory(self);
            self.inner.extensions.lock().computed.entry(name).or_insert(observe);
        }
        let created: Vec<_> = systems
            .into_iter()
            .map(|(name, system)| {
                let runnable = (system.create)(self);
                (name, system, runnable)
            })
            .collect();

        let mut ext = self.inner.extensions.lock();
        if !created.is_empty() {
            ext.order_cache.invalidate();
        }
        for (name, system, runnable) in created {
            if ext.systems.contains_key(&name) {
                continue;
            }
            ext.schedules.insert(name.clone(), system.schedule.clone());
            ext.systems.insert(name.clone(), system);
            ext.runnables.insert(name, runnable);
        }
        ext.extended.extend(plugin.members().iter().copied());
        log::debug!(
            "Extended database with plugin {} ({} transactions, {} systems)",
            plugin.id().raw(),
            decl.transactions.len(),
            decl.systems.len()
        );
        Ok(())
    }

    /// Run a named action
    pub fn action(&self, name: &str, args: impl Into<Value>) -> Result<Value> {
        let action = self
            .inner
            .extensions
            .lock()
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownAction(name.to_string()))?;
        action(self, args.into())
    }

    /// A service instance, if one of type `T` is registered under `name`
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let service = self
            .inner
            .extensions
            .lock()
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownService(name.to_string()))?;
        service
            .downcast::<T>()
            .map_err(|_| DatabaseError::UnknownService(name.to_string()))
    }

    pub fn computed(&self, name: &str) -> Result<Observe<Value>> {
        self.inner
            .extensions
            .lock()
            .computed
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownComputed(name.to_string()))
    }

    /// Tiers of system names, recomputed only when systems were added
    pub fn system_order(&self) -> Result<SystemOrder> {
        let mut ext = self.inner.extensions.lock();
        let Extensions { schedules, order_cache, .. } = &mut *ext;
        Ok(order_cache.order(schedules)?.clone())
    }

    /// Run every system once, tier by tier
    pub fn run_systems(&self) -> Result<()> {
        for tier in self.system_order()? {
            for name in tier {
                let taken = self
                    .inner
                    .extensions
                    .lock()
                    .runnables
                    .get_mut(&name)
                    .and_then(Option::take);
                let Some(mut system) = taken else {
                    continue;
                };
                let outcome = system();
                self.inner.extensions.lock().runnables.insert(name.clone(), Some(system));
                if let Err(error) = outcome {
                    log::warn!("System '{}' failed: {}", name, error);
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}
