//! Archetype - Columnar tables for one exact component set
//!
//! Entities with identical component sets are stored together. Rows are kept
//! dense: deleting a row moves the last row into the hole and repoints the
//! moved entity in the location table.

use crate::column::{Column, ValueColumn};
use crate::component::{ComponentRegistry, EntityValues, ID, TRANSIENT};
use crate::entity::{Entity, EntityLocation, EntityLocations};
use crate::error::{Result, StoreError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for an archetype
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// Create a new archetype ID
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Serializable contents of one archetype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeData {
    pub components: Vec<String>,
    /// One value list per component, in `components` order
    pub columns: Vec<Vec<Value>>,
}

/// Canonical signature for a component set: sorted and deduplicated
pub fn signature<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut signature: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
    signature.sort();
    signature.dedup();
    signature
}

/// An archetype stores entities with the same component set
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    /// Component names (sorted)
    components: Vec<String>,
    /// Component name -> column index
    column_indices: BTreeMap<String, usize>,
    columns: Vec<Box<dyn Column>>,
    rows: usize,
}

impl Archetype {
    /// Create an empty archetype. `components` must be a canonical signature.
    pub fn new(id: ArchetypeId, components: Vec<String>) -> Self {
        let columns = components
            .iter()
            .map(|_| Box::new(ValueColumn::new()) as Box<dyn Column>)
            .collect();
        Self::with_columns(id, components, columns, 0)
    }

    fn with_columns(
        id: ArchetypeId,
        components: Vec<String>,
        columns: Vec<Box<dyn Column>>,
        rows: usize,
    ) -> Self {
        let column_indices = components
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            id,
            components,
            column_indices,
            columns,
            rows,
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Component names, sorted
    #[inline]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    #[inline]
    pub fn has_component(&self, name: &str) -> bool {
        self.column_indices.contains_key(name)
    }

    /// True if this archetype holds every component of `other`
    pub fn is_superset_of(&self, other: &Archetype) -> bool {
        other.components.iter().all(|c| self.has_component(c))
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&dyn Column> {
        self.column_indices
            .get(name)
            .map(|&idx| self.columns[idx].as_ref())
    }

    /// Read one component at a row
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name)?.get(row)
    }

    /// Entity stored at a row
    pub fn entity_at(&self, row: usize) -> Option<Entity> {
        self.get(row, ID)?.as_int().map(Entity)
    }

    /// Entities in row order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.rows).filter_map(move |row| self.entity_at(row))
    }

    /// Append a row, returning its index.
    ///
    /// Components missing from `values` take the registry default; values
    /// for components outside this archetype are ignored. The `id` column is
    /// copied as given, so callers moving an existing entity keep its id.
    pub fn push_row(&mut self, values: &EntityValues, registry: &ComponentRegistry) -> usize {
        let row = self.rows;
        for (name, column) in self.components.iter().zip(self.columns.iter_mut()) {
            let value = values
                .get(name)
                .cloned()
                .or_else(|| registry.get(name).map(|d| d.default.clone()))
                .unwrap_or_default();
            column.push(value);
        }
        self.rows += 1;
        row
    }

    /// Append a row and allocate its entity.
    ///
    /// Any supplied `id` is replaced by the newly allocated one. A row whose
    /// `transient` marker is `true` gets a transient id.
    pub fn insert(
        &mut self,
        values: &EntityValues,
        registry: &ComponentRegistry,
        locations: &mut EntityLocations,
    ) -> Entity {
        let row = self.push_row(values, registry);
        let transient = self.get(row, TRANSIENT).and_then(Value::as_bool) == Some(true);
        let entity = locations.create(EntityLocation::new(self.id, row), transient);
        if let Some(&idx) = self.column_indices.get(ID) {
            self.columns[idx].set(row, entity.into());
        }
        entity
    }

    /// Remove a row by swapping the last row into it.
    ///
    /// Returns the entity that moved into `row`, after repointing it.
    pub fn delete_row(&mut self, row: usize, locations: &mut EntityLocations) -> Option<Entity> {
        if row >= self.rows {
            return None;
        }
        let last_row = self.rows - 1;
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.rows -= 1;

        if row == last_row {
            return None;
        }
        let moved = self.entity_at(row)?;
        locations.update(moved, EntityLocation::new(self.id, row));
        Some(moved)
    }

    /// Read every component of a row
    pub fn read(&self, row: usize) -> Option<EntityValues> {
        if row >= self.rows {
            return None;
        }
        let mut values = EntityValues::new();
        for (name, column) in self.components.iter().zip(self.columns.iter()) {
            values.insert(name.clone(), column.get(row)?.clone());
        }
        Some(values)
    }

    /// Overwrite the given components of a row in place
    pub fn update<'a, I>(&mut self, row: usize, values: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        for (name, value) in values {
            if let Some(&idx) = self.column_indices.get(name.as_str()) {
                self.columns[idx].set(row, value.clone());
            }
        }
    }

    pub fn compact(&mut self) {
        for column in &mut self.columns {
            column.compact();
        }
    }

    pub fn to_data(&self) -> ArchetypeData {
        ArchetypeData {
            components: self.components.clone(),
            columns: self.columns.iter().map(|c| c.to_values()).collect(),
        }
    }

    /// Rebuild an archetype from snapshot data
    pub fn from_data(id: ArchetypeId, data: ArchetypeData) -> Result<Self> {
        if data.components.len() != data.columns.len() {
            return Err(StoreError::CorruptSnapshot(format!(
                "archetype {} has {} components but {} columns",
                id.0,
                data.components.len(),
                data.columns.len()
            )));
        }
        if signature(&data.components) != data.components {
            return Err(StoreError::CorruptSnapshot(format!(
                "archetype {} components are not canonical",
                id.0
            )));
        }
        let rows = data.columns.first().map_or(0, Vec::len);
        if data.columns.iter().any(|c| c.len() != rows) {
            return Err(StoreError::CorruptSnapshot(format!(
                "archetype {} has ragged columns",
                id.0
            )));
        }
        let columns = data
            .columns
            .into_iter()
            .map(|values| Box::new(ValueColumn::from_values(values)) as Box<dyn Column>)
            .collect();
        Ok(Self::with_columns(id, data.components, columns, rows))
    }
}

/// Arena of archetypes with signature-based deduplication
#[derive(Debug, Default)]
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    signature_map: BTreeMap<Vec<String>, ArchetypeId>,
}

impl Archetypes {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    /// Get or create the archetype for a component set (any order).
    ///
    /// The set must contain `id`.
    pub fn ensure<I, S>(&mut self, names: I) -> Result<ArchetypeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let signature = signature(names);
        if let Some(&id) = self.signature_map.get(&signature) {
            return Ok(id);
        }
        if !signature.iter().any(|c| c == ID) {
            return Err(StoreError::MissingIdComponent);
        }

        let id = ArchetypeId::new(self.archetypes.len() as u32);
        log::debug!("Creating archetype {} with components {:?}", id.0, signature);
        self.archetypes.push(Archetype::new(id, signature.clone()));
        self.signature_map.insert(signature, id);
        Ok(id)
    }

    /// Look up an existing archetype by component set
    pub fn find<I, S>(&self, names: I) -> Option<ArchetypeId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.signature_map.get(&signature(names)).copied()
    }

    /// Append a restored archetype; ids must arrive densely in order
    pub(crate) fn push_restored(&mut self, archetype: Archetype) -> Result<()> {
        if archetype.id().index() != self.archetypes.len() {
            return Err(StoreError::CorruptSnapshot(format!(
                "archetype id {} out of order",
                archetype.id().0
            )));
        }
        self.signature_map
            .insert(archetype.components().to_vec(), archetype.id());
        self.archetypes.push(archetype);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.archetypes.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{values, ComponentDescriptor};

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register("x", ComponentDescriptor::new(0));
        registry.register("y", ComponentDescriptor::new(0));
        registry
    }

    #[test]
    fn test_archetypes_dedup_by_set() {
        let mut archetypes = Archetypes::new();
        let a = archetypes.ensure(["id", "x", "y"]).unwrap();
        let b = archetypes.ensure(vec!["y".to_string(), "id".into(), "x".into(), "x".into()]).unwrap();
        let c = archetypes.ensure(["id", "x"]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(archetypes.len(), 2);
        assert_eq!(archetypes.find(["x", "id"]), Some(c));
    }

    #[test]
    fn test_archetype_requires_id() {
        let mut archetypes = Archetypes::new();
        assert_eq!(archetypes.ensure(["x"]), Err(StoreError::MissingIdComponent));
        assert!(archetypes.is_empty());
    }

    #[test]
    fn test_insert_fills_defaults_and_id() {
        let registry = registry();
        let mut locations = EntityLocations::new();
        let mut archetype = Archetype::new(ArchetypeId::new(0), signature(["id", "x", "y"]));

        let e = archetype.insert(&values([("x", 5)]), &registry, &mut locations);
        let row = archetype.read(0).unwrap();
        assert_eq!(row["id"], Value::Int(e.0));
        assert_eq!(row["x"], Value::Int(5));
        assert_eq!(row["y"], Value::Int(0));
        assert_eq!(locations.locate(e), Some(EntityLocation::new(ArchetypeId::new(0), 0)));
    }

    #[test]
    fn test_delete_row_compacts() {
        let registry = registry();
        let mut locations = EntityLocations::new();
        let mut archetype = Archetype::new(ArchetypeId::new(0), signature(["id", "x"]));
        let a = archetype.insert(&values([("x", 1)]), &registry, &mut locations);
        let _b = archetype.insert(&values([("x", 2)]), &registry, &mut locations);
        let c = archetype.insert(&values([("x", 3)]), &registry, &mut locations);

        let row = locations.locate(a).unwrap().row;
        let moved = archetype.delete_row(row, &mut locations);
        locations.delete(a);

        assert_eq!(moved, Some(c));
        assert_eq!(archetype.len(), 2);
        let location = locations.locate(c).unwrap();
        assert_eq!(location.row, 0);
        assert_eq!(archetype.get(location.row, "x"), Some(&Value::Int(3)));
        assert_eq!(archetype.delete_row(10, &mut locations), None);
    }

    #[test]
    fn test_transient_marker_allocates_negative_ids() {
        let registry = registry();
        let mut locations = EntityLocations::new();
        let mut archetype = Archetype::new(ArchetypeId::new(0), signature(["id", "transient", "x"]));
        let e = archetype.insert(&values([("transient", true)]), &registry, &mut locations);
        assert!(e.is_transient());
        let p = archetype.insert(&values([("x", 1)]), &registry, &mut locations);
        assert!(p.is_persistent());
    }

    #[test]
    fn test_data_restore() {
        let registry = registry();
        let mut locations = EntityLocations::new();
        let mut archetype = Archetype::new(ArchetypeId::new(3), signature(["id", "x"]));
        archetype.insert(&values([("x", 7)]), &registry, &mut locations);

        let restored = Archetype::from_data(ArchetypeId::new(3), archetype.to_data()).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.read(0), archetype.read(0));

        let mut ragged = archetype.to_data();
        ragged.columns[0].push(Value::Null);
        assert!(Archetype::from_data(ArchetypeId::new(3), ragged).is_err());
    }
}
