//! Plugins - composable bundles of declarations
//!
//! A plugin declares components, resources, named archetypes, transactions,
//! systems, actions, services and computed values. Plugins are combined by
//! key: the same key may appear in several plugins only if the declarations
//! are identical (equal descriptors, or the very same function).
//!
//! Every plugin gets a [`PluginId`] when built. A database remembers the ids
//! it was extended with, so extending twice with the same plugin is a no-op.

use crate::database::Database;
use crate::error::{DatabaseError, Result};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use void_ecs::{ComponentDescriptor, ResourceDescriptor, SystemSchedule, Value};
use void_event::Observe;
use void_ir::Transaction;

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a built plugin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl PluginId {
    fn next() -> Self {
        Self(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A named transaction body
pub type TransactionFn =
    Arc<dyn Fn(&mut Transaction<'_>, &Value) -> void_ir::Result<Value> + Send + Sync>;

/// Runs directly against the database, outside the envelope protocol
pub type ActionFn = Arc<dyn Fn(&Database, Value) -> Result<Value> + Send + Sync>;

/// Creates a shared service instance
pub type ServiceFactory = Arc<dyn Fn(&Database) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Creates a derived observable value
pub type ComputedFactory = Arc<dyn Fn(&Database) -> Observe<Value> + Send + Sync>;

/// A runnable system instance
pub type SystemFn = Box<dyn FnMut() -> Result<()> + Send>;

/// Instantiates a system; `None` declares a schedule slot with nothing to run
pub type SystemFactory = Arc<dyn Fn(&Database) -> Option<SystemFn> + Send + Sync>;

/// A system's factory and ordering constraints
#[derive(Clone)]
pub struct SystemDeclaration {
    pub create: SystemFactory,
    pub schedule: SystemSchedule,
}

impl SystemDeclaration {
    fn same_as(&self, other: &SystemDeclaration) -> bool {
        same_fn(&self.create, &other.create) && self.schedule == other.schedule
    }
}

/// Function identity, ignoring vtable pointers
pub(crate) fn same_fn<F: ?Sized>(a: &Arc<F>, b: &Arc<F>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Everything a plugin contributes
#[derive(Clone, Default)]
pub struct PluginDeclarations {
    pub components: BTreeMap<String, ComponentDescriptor>,
    pub resources: BTreeMap<String, ResourceDescriptor>,
    /// Named archetypes; `id` is implied
    pub archetypes: BTreeMap<String, Vec<String>>,
    pub transactions: BTreeMap<String, TransactionFn>,
    pub systems: BTreeMap<String, SystemDeclaration>,
    pub actions: BTreeMap<String, ActionFn>,
    pub services: BTreeMap<String, ServiceFactory>,
    pub computed: BTreeMap<String, ComputedFactory>,
}

fn declare<V>(
    map: &mut BTreeMap<String, V>,
    kind: &'static str,
    key: &str,
    value: &V,
    same: impl Fn(&V, &V) -> bool,
) -> Result<()>
where
    V: Clone,
{
    match map.get(key) {
        Some(existing) if same(existing, value) => Ok(()),
        Some(_) => Err(DatabaseError::PluginConflict { kind, key: key.to_string() }),
        None => {
            map.insert(key.to_string(), value.clone());
            Ok(())
        }
    }
}

fn declare_all<V: Clone>(
    target: &mut BTreeMap<String, V>,
    source: &BTreeMap<String, V>,
    kind: &'static str,
    same: impl Fn(&V, &V) -> bool,
) -> Result<()> {
    for (key, value) in source {
        declare(target, kind, key, value, &same)?;
    }
    Ok(())
}

fn sorted(names: &[String]) -> Vec<&str> {
    let mut names: Vec<&str> = names.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();
    names
}

impl PluginDeclarations {
    /// Merge `other` into `self`, failing on the first conflicting key
    pub fn merge(&mut self, other: &PluginDeclarations) -> Result<()> {
        declare_all(&mut self.components, &other.components, "component", |a, b| a == b)?;
        declare_all(&mut self.resources, &other.resources, "resource", |a, b| a == b)?;
        declare_all(&mut self.archetypes, &other.archetypes, "archetype", |a, b| {
            sorted(a) == sorted(b)
        })?;
        declare_all(&mut self.transactions, &other.transactions, "transaction", same_fn)?;
        declare_all(&mut self.systems, &other.systems, "system", SystemDeclaration::same_as)?;
        declare_all(&mut self.actions, &other.actions, "action", same_fn)?;
        declare_all(&mut self.services, &other.services, "service", same_fn)?;
        declare_all(&mut self.computed, &other.computed, "computed", same_fn)?;
        Ok(())
    }
}

impl fmt::Debug for PluginDeclarations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDeclarations")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("archetypes", &self.archetypes)
            .field("transactions", &self.transactions.keys().collect::<Vec<_>>())
            .field("systems", &self.systems.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A built plugin. Clones share the same identity.
#[derive(Clone, Debug)]
pub struct Plugin {
    id: PluginId,
    members: BTreeSet<PluginId>,
    declarations: Arc<PluginDeclarations>,
}

impl Plugin {
    pub fn builder() -> PluginBuilder {
        PluginBuilder::new()
    }

    #[inline]
    pub fn id(&self) -> PluginId {
        self.id
    }

    /// This plugin's id plus the ids of every plugin it absorbed
    pub fn members(&self) -> &BTreeSet<PluginId> {
        &self.members
    }

    pub fn declarations(&self) -> &PluginDeclarations {
        &self.declarations
    }
}

/// Combine several plugins into one
pub fn combine_plugins(plugins: &[Plugin]) -> Result<Plugin> {
    plugins
        .iter()
        .fold(Plugin::builder(), |builder, plugin| builder.depends_on(plugin))
        .build()
}

/// Builder for [`Plugin`].
///
/// Declaration methods chain; the first conflict is reported by
/// [`PluginBuilder::build`].
#[derive(Default)]
pub struct PluginBuilder {
    members: BTreeSet<PluginId>,
    declarations: PluginDeclarations,
    error: Option<DatabaseError>,
}

impl PluginBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, f: impl FnOnce(&mut PluginDeclarations) -> Result<()>) -> Self {
        if self.error.is_none() {
            if let Err(error) = f(&mut self.declarations) {
                self.error = Some(error);
            }
        }
        self
    }

    /// Absorb another plugin's declarations
    pub fn depends_on(mut self, plugin: &Plugin) -> Self {
        self.members.extend(plugin.members.iter().copied());
        self.with(|decl| decl.merge(&plugin.declarations))
    }

    pub fn component(self, name: impl Into<String>, descriptor: ComponentDescriptor) -> Self {
        let name = name.into();
        self.with(|decl| declare(&mut decl.components, "component", &name, &descriptor, |a, b| a == b))
    }

    pub fn resource(self, name: impl Into<String>, descriptor: ResourceDescriptor) -> Self {
        let name = name.into();
        self.with(|decl| declare(&mut decl.resources, "resource", &name, &descriptor, |a, b| a == b))
    }

    pub fn archetype<I, S>(self, name: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        self.with(|decl| {
            declare(&mut decl.archetypes, "archetype", &name, &components, |a, b| {
                sorted(a) == sorted(b)
            })
        })
    }

    pub fn transaction<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Transaction<'_>, &Value) -> void_ir::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let body: TransactionFn = Arc::new(body);
        self.with(|decl| declare(&mut decl.transactions, "transaction", &name, &body, same_fn))
    }

    pub fn system<F>(self, name: impl Into<String>, schedule: SystemSchedule, create: F) -> Self
    where
        F: Fn(&Database) -> Option<SystemFn> + Send + Sync + 'static,
    {
        let name = name.into();
        let system = SystemDeclaration { create: Arc::new(create), schedule };
        self.with(|decl| declare(&mut decl.systems, "system", &name, &system, SystemDeclaration::same_as))
    }

    pub fn action<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Database, Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let body: ActionFn = Arc::new(body);
        self.with(|decl| declare(&mut decl.actions, "action", &name, &body, same_fn))
    }

    pub fn service<T, F>(self, name: impl Into<String>, create: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Database) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: ServiceFactory = Arc::new(move |db: &Database| -> Arc<dyn Any + Send + Sync> {
            Arc::new(create(db))
        });
        self.with(|decl| declare(&mut decl.services, "service", &name, &factory, same_fn))
    }

    pub fn computed<F>(self, name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&Database) -> Observe<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: ComputedFactory = Arc::new(create);
        self.with(|decl| declare(&mut decl.computed, "computed", &name, &factory, same_fn))
    }

    pub fn build(self) -> Result<Plugin> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let id = PluginId::next();
        let mut members = self.members;
        members.insert(id);
        Ok(Plugin {
            id,
            members,
            declarations: Arc::new(self.declarations),
        })
    }
}
