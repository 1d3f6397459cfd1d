//! Components - Named, dynamically declared component types
//!
//! Storage treats a component as an opaque descriptor: a default value used
//! when a row is appended without that component, and whether it is the
//! reserved identity (`id`) component.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the identity component present in every archetype
pub const ID: &str = "id";

/// Name of the reserved marker component for transient entities
pub const TRANSIENT: &str = "transient";

/// Full component values of an entity, keyed by component name
pub type EntityValues = BTreeMap<String, Value>;

/// Partial update of an entity, keyed by component name
pub type EntityUpdate = BTreeMap<String, ComponentUpdate>;

/// One component change inside an [`EntityUpdate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentUpdate {
    /// Write a value, adding the component if the entity lacks it
    Set(Value),
    /// Remove the component from the entity
    Remove,
}

impl ComponentUpdate {
    /// The written value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Set(v) => Some(v),
            Self::Remove => None,
        }
    }

    #[inline]
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove)
    }
}

impl From<Value> for ComponentUpdate {
    fn from(value: Value) -> Self {
        Self::Set(value)
    }
}

/// Build an [`EntityUpdate`] that sets every given component
pub fn set_all<K, V, I>(values: I) -> EntityUpdate
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    values
        .into_iter()
        .map(|(k, v)| (k.into(), ComponentUpdate::Set(v.into())))
        .collect()
}

/// Build [`EntityValues`] from name/value pairs
pub fn values<K, V, I>(pairs: I) -> EntityValues
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Describes a component to the store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Value used when a row is appended without this component
    pub default: Value,
    /// Whether this is the identity component
    #[serde(default)]
    pub is_identity: bool,
}

impl ComponentDescriptor {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            is_identity: false,
        }
    }

    /// Descriptor of the reserved `id` component
    pub fn identity() -> Self {
        Self {
            default: Value::Int(0),
            is_identity: true,
        }
    }
}

/// Describes a resource: a singleton value backed by one entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub default: Value,
    /// Writes to a transient resource make the transaction transient
    #[serde(default)]
    pub transient: bool,
}

impl ResourceDescriptor {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            transient: false,
        }
    }

    pub fn transient(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            transient: true,
        }
    }
}

/// Registry of component descriptors by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRegistry {
    descriptors: BTreeMap<String, ComponentDescriptor>,
}

impl ComponentRegistry {
    /// Create a registry holding the reserved components
    pub fn new() -> Self {
        let mut descriptors = BTreeMap::new();
        descriptors.insert(ID.to_string(), ComponentDescriptor::identity());
        descriptors.insert(TRANSIENT.to_string(), ComponentDescriptor::new(false));
        Self { descriptors }
    }

    /// Register (or replace) a component
    pub fn register(&mut self, name: impl Into<String>, descriptor: ComponentDescriptor) {
        self.descriptors.insert(name.into(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.descriptors.get(name)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Registered component names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentDescriptor)> {
        self.descriptors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_components_registered() {
        let registry = ComponentRegistry::new();
        assert!(registry.get(ID).map(|d| d.is_identity).unwrap_or(false));
        assert_eq!(registry.get(TRANSIENT).map(|d| d.default.clone()), Some(Value::Bool(false)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_dynamic() {
        let mut registry = ComponentRegistry::new();
        registry.register("health", ComponentDescriptor::new(100));
        assert!(registry.contains("health"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["health", "id", "transient"]);
    }

    #[test]
    fn test_update_helpers() {
        let update = set_all([("x", 1), ("y", 2)]);
        assert_eq!(update.get("x"), Some(&ComponentUpdate::Set(Value::Int(1))));
        assert!(!update["y"].is_remove());
        assert!(ComponentUpdate::Remove.value().is_none());
    }
}
