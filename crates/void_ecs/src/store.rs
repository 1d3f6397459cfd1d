//! Store - Core entity storage
//!
//! Owns the component registry, the archetype arena and both entity location
//! tables. Updates that change an entity's exact component set migrate the
//! entity to the matching (possibly new) archetype.
//!
//! Resources are singleton values modeled as ordinary persistent entities
//! living in a dedicated `[id, <resource>]` archetype.

use crate::archetype::{Archetype, ArchetypeData, ArchetypeId, Archetypes};
use crate::component::{
    values, ComponentDescriptor, ComponentRegistry, ComponentUpdate, EntityUpdate, EntityValues,
    ResourceDescriptor, ID, TRANSIENT,
};
use crate::entity::{Entity, EntityLocation, EntityLocations};
use crate::error::{Result, StoreError};
use crate::query::{self, SelectOptions};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered resource and its backing entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub entity: Entity,
    pub descriptor: ResourceDescriptor,
}

/// Serializable snapshot of a [`Store`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    pub components: ComponentRegistry,
    pub resources: BTreeMap<String, ResourceEntry>,
    pub named_archetypes: BTreeMap<String, ArchetypeId>,
    pub locations: EntityLocations,
    /// Archetypes in id order
    pub archetypes: Vec<ArchetypeData>,
}

/// The core archetype store
#[derive(Debug, Default)]
pub struct Store {
    components: ComponentRegistry,
    archetypes: Archetypes,
    locations: EntityLocations,
    resources: BTreeMap<String, ResourceEntry>,
    named_archetypes: BTreeMap<String, ArchetypeId>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with room for `capacity` entities per range
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            locations: EntityLocations::with_capacity(capacity),
            ..Self::default()
        }
    }

    // ---- registration ----

    /// Register (or replace) a component
    pub fn register_component(&mut self, name: impl Into<String>, descriptor: ComponentDescriptor) {
        self.components.register(name, descriptor);
    }

    #[inline]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Register a resource, creating its backing entity on first use.
    ///
    /// Registering an existing resource only replaces its descriptor; the
    /// backing entity and current value are kept.
    ///
    /// The backing entity is the first row of the `[id, name]` archetype. If
    /// an ordinary entity with exactly that component set already exists,
    /// it is adopted as the resource instead of creating a new one.
    pub fn register_resource(
        &mut self,
        name: impl Into<String>,
        descriptor: ResourceDescriptor,
    ) -> Result<Entity> {
        let name = name.into();
        if let Some(entry) = self.resources.get_mut(&name) {
            entry.descriptor = descriptor;
            return Ok(entry.entity);
        }

        self.components
            .register(name.clone(), ComponentDescriptor::new(descriptor.default.clone()));
        let archetype_id = self.ensure_archetype([ID, name.as_str()])?;
        let archetype = self
            .archetypes
            .get_mut(archetype_id)
            .ok_or(StoreError::ArchetypeNotFound(archetype_id))?;
        let entity = match archetype.entity_at(0) {
            Some(existing) => existing,
            None => archetype.insert(
                &values([(name.clone(), descriptor.default.clone())]),
                &self.components,
                &mut self.locations,
            ),
        };
        log::debug!("Registered resource '{}' on entity {}", name, entity);
        self.resources.insert(name, ResourceEntry { entity, descriptor });
        Ok(entity)
    }

    /// Register a named archetype. `id` is implied.
    pub fn register_archetype<I, S>(&mut self, name: impl Into<String>, components: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = components.into_iter().map(|s| s.as_ref().to_string()).collect();
        names.push(ID.to_string());
        let id = self.ensure_archetype(&names)?;
        self.named_archetypes.insert(name.into(), id);
        Ok(id)
    }

    /// Id of a named archetype
    pub fn archetype_id(&self, name: &str) -> Option<ArchetypeId> {
        self.named_archetypes.get(name).copied()
    }

    pub fn named_archetypes(&self) -> &BTreeMap<String, ArchetypeId> {
        &self.named_archetypes
    }

    /// Get or create the archetype for an exact component set.
    ///
    /// Every name must be a registered component and the set must contain `id`.
    pub fn ensure_archetype<I, S>(&mut self, names: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        if let Some(unknown) = names.iter().find(|n| !self.components.contains(n.as_ref())) {
            return Err(StoreError::UnknownComponent(unknown.as_ref().to_string()));
        }
        self.archetypes.ensure(names)
    }

    #[inline]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    #[inline]
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    // ---- resources ----

    pub fn resource_entry(&self, name: &str) -> Option<&ResourceEntry> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = (&str, &ResourceEntry)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Current value of a resource
    pub fn resource(&self, name: &str) -> Option<&Value> {
        let entry = self.resources.get(name)?;
        self.get(entry.entity, name)
    }

    /// Resource whose backing entity is `entity`, if any
    pub fn resource_for_entity(&self, entity: Entity) -> Option<(&str, &ResourceEntry)> {
        self.resources
            .iter()
            .find(|(_, entry)| entry.entity == entity)
            .map(|(k, v)| (k.as_str(), v))
    }

    // ---- entities ----

    /// Insert a row into an existing archetype
    pub fn insert(&mut self, archetype: ArchetypeId, values: &EntityValues) -> Result<Entity> {
        let target = self
            .archetypes
            .get_mut(archetype)
            .ok_or(StoreError::ArchetypeNotFound(archetype))?;
        Ok(target.insert(values, &self.components, &mut self.locations))
    }

    /// Insert into the archetype formed by `id` plus the keys of `values`
    pub fn insert_values(&mut self, values: &EntityValues) -> Result<Entity> {
        let names = std::iter::once(ID).chain(values.keys().map(String::as_str));
        let archetype = self.ensure_archetype(names.collect::<Vec<_>>())?;
        self.insert(archetype, values)
    }

    #[inline]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.locate(entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.locate(entity).is_some()
    }

    /// All component values of an entity
    pub fn read(&self, entity: Entity) -> Option<EntityValues> {
        let location = self.locate(entity)?;
        self.archetypes.get(location.archetype)?.read(location.row)
    }

    /// Read an entity only if its archetype is `min` or a superset of it
    pub fn read_with_min(&self, entity: Entity, min: ArchetypeId) -> Option<EntityValues> {
        let location = self.locate(entity)?;
        if !self.archetype_satisfies(location.archetype, min) {
            return None;
        }
        self.archetypes.get(location.archetype)?.read(location.row)
    }

    /// True if `archetype` is `min` or holds all of its components
    pub fn archetype_satisfies(&self, archetype: ArchetypeId, min: ArchetypeId) -> bool {
        if archetype == min {
            return true;
        }
        match (self.archetypes.get(archetype), self.archetypes.get(min)) {
            (Some(a), Some(m)) => a.is_superset_of(m),
            _ => false,
        }
    }

    /// Read a single component
    pub fn get(&self, entity: Entity, component: &str) -> Option<&Value> {
        let location = self.locate(entity)?;
        self.archetypes.get(location.archetype)?.get(location.row, component)
    }

    /// Apply a partial update, migrating the entity when its component set changes
    pub fn update(&mut self, entity: Entity, update: &EntityUpdate) -> Result<()> {
        let location = self
            .locations
            .locate(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        if let Some(reserved) = update.keys().find(|k| *k == ID || *k == TRANSIENT) {
            return Err(StoreError::ReservedComponent(reserved.clone()));
        }

        let current = self
            .archetypes
            .get(location.archetype)
            .ok_or(StoreError::ArchetypeNotFound(location.archetype))?;
        let mut adds: Vec<&String> = Vec::new();
        let mut removes: Vec<&String> = Vec::new();
        for (name, change) in update {
            match change {
                ComponentUpdate::Remove if current.has_component(name) => removes.push(name),
                ComponentUpdate::Set(_) if !current.has_component(name) => adds.push(name),
                _ => {}
            }
        }
        let sets = update
            .iter()
            .filter_map(|(name, change)| change.value().map(|v| (name, v)));

        if adds.is_empty() && removes.is_empty() {
            let archetype = self
                .archetypes
                .get_mut(location.archetype)
                .ok_or(StoreError::ArchetypeNotFound(location.archetype))?;
            archetype.update(location.row, sets);
            return Ok(());
        }

        let mut names: Vec<String> = current
            .components()
            .iter()
            .filter(|c| !removes.contains(c))
            .cloned()
            .collect();
        names.extend(adds.iter().map(|s| (*s).clone()));
        let mut row = current
            .read(location.row)
            .ok_or(StoreError::EntityNotFound(entity))?;
        let destination = self.ensure_archetype(&names)?;

        for name in &removes {
            row.remove(name.as_str());
        }
        for (name, value) in sets {
            row.insert(name.clone(), value.clone());
        }

        self.archetypes
            .get_mut(location.archetype)
            .ok_or(StoreError::ArchetypeNotFound(location.archetype))?
            .delete_row(location.row, &mut self.locations);
        let new_row = self
            .archetypes
            .get_mut(destination)
            .ok_or(StoreError::ArchetypeNotFound(destination))?
            .push_row(&row, &self.components);
        self.locations
            .update(entity, EntityLocation::new(destination, new_row));
        Ok(())
    }

    /// Delete an entity and recycle its id. No-op if it does not exist.
    pub fn delete(&mut self, entity: Entity) -> bool {
        let Some(location) = self.locations.locate(entity) else {
            return false;
        };
        if let Some(archetype) = self.archetypes.get_mut(location.archetype) {
            archetype.delete_row(location.row, &mut self.locations);
        }
        self.locations.delete(entity)
    }

    /// Number of live entities (resources included)
    pub fn entity_count(&self) -> usize {
        self.locations.len()
    }

    /// Release unused column capacity in every archetype
    pub fn compact(&mut self) {
        for archetype in self.archetypes.iter_mut() {
            archetype.compact();
        }
    }

    // ---- queries ----

    /// Archetypes holding all of `include` and none of `exclude`
    pub fn query_archetypes<S: AsRef<str>>(&self, include: &[S], exclude: &[String]) -> Vec<ArchetypeId> {
        query::query_archetypes(&self.archetypes, include, exclude)
            .into_iter()
            .map(Archetype::id)
            .collect()
    }

    /// Entities holding all of `include`, refined by `options`
    pub fn select<S: AsRef<str>>(&self, include: &[S], options: &SelectOptions) -> Vec<Entity> {
        query::select(&self.archetypes, include, options)
    }

    // ---- snapshots ----

    pub fn to_data(&self) -> StoreData {
        StoreData {
            components: self.components.clone(),
            resources: self.resources.clone(),
            named_archetypes: self.named_archetypes.clone(),
            locations: self.locations.clone(),
            archetypes: self.archetypes.iter().map(Archetype::to_data).collect(),
        }
    }

    /// Replace the whole store with a snapshot.
    ///
    /// Archetypes are rebuilt in saved order so archetype ids are preserved.
    /// On error the store is left untouched.
    pub fn from_data(&mut self, data: StoreData) -> Result<()> {
        let mut archetypes = Archetypes::new();
        for (index, archetype) in data.archetypes.into_iter().enumerate() {
            let id = ArchetypeId::new(index as u32);
            archetypes.push_restored(Archetype::from_data(id, archetype)?)?;
        }
        for (name, entry) in &data.resources {
            let location = data.locations.locate(entry.entity).ok_or_else(|| {
                StoreError::CorruptSnapshot(format!("resource '{}' has no entity", name))
            })?;
            if archetypes.get(location.archetype).is_none() {
                return Err(StoreError::CorruptSnapshot(format!(
                    "resource '{}' points at missing archetype {}",
                    name, location.archetype.0
                )));
            }
        }

        self.components = data.components;
        self.archetypes = archetypes;
        self.locations = data.locations;
        self.resources = data.resources;
        self.named_archetypes = data.named_archetypes;
        log::debug!(
            "Loaded store snapshot: {} archetypes, {} entities",
            self.archetypes.len(),
            self.locations.len()
        );
        Ok(())
    }
}
