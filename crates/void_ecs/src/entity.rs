//! Entity - Signed identifiers and their location tables
//!
//! Non-negative entities are persistent, negative entities are transient
//! (provisional state such as drag previews). Each range has its own
//! [`EntityLocationTable`] so the two can never collide.

use crate::archetype::ArchetypeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub i64);

impl Entity {
    /// Create from a raw id
    #[inline]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Build the entity for a table slot
    #[inline]
    pub const fn from_index(index: usize, transient: bool) -> Self {
        if transient {
            Self(-(index as i64) - 1)
        } else {
            Self(index as i64)
        }
    }

    /// Raw id
    #[inline]
    pub const fn id(&self) -> i64 {
        self.0
    }

    /// Slot index within the owning location table
    #[inline]
    pub const fn index(&self) -> usize {
        if self.0 < 0 {
            (-(self.0 + 1)) as usize
        } else {
            self.0 as usize
        }
    }

    #[inline]
    pub const fn is_transient(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_persistent(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Entity> for crate::Value {
    fn from(entity: Entity) -> Self {
        crate::Value::Int(entity.0)
    }
}

/// Where an entity lives: archetype plus row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

impl EntityLocation {
    #[inline]
    pub const fn new(archetype: ArchetypeId, row: usize) -> Self {
        Self { archetype, row }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
enum Slot {
    Occupied(EntityLocation),
    /// Free slot; links to the next free slot (stack order)
    Free { next: Option<usize> },
}

/// Maps slot indices to locations and recycles freed slots.
///
/// Freed slots form an intrusive stack: the most recently deleted index is
/// handed out first, which keeps ids compact and makes rollbacks recreate
/// the ids they removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityLocationTable {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    live: usize,
}

impl EntityLocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            live: 0,
        }
    }

    /// Allocate a slot for `location`, returning its index
    pub fn create(&mut self, location: EntityLocation) -> usize {
        self.live += 1;
        if let Some(index) = self.free_head {
            if let Slot::Free { next } = self.slots[index] {
                self.free_head = next;
            }
            self.slots[index] = Slot::Occupied(location);
            index
        } else {
            self.slots.push(Slot::Occupied(location));
            self.slots.len() - 1
        }
    }

    /// Release a slot. Returns false if it was not occupied.
    pub fn delete(&mut self, index: usize) -> bool {
        match self.slots.get(index) {
            Some(Slot::Occupied(_)) => {
                self.slots[index] = Slot::Free {
                    next: self.free_head,
                };
                self.free_head = Some(index);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn locate(&self, index: usize) -> Option<EntityLocation> {
        match self.slots.get(index) {
            Some(Slot::Occupied(location)) => Some(*location),
            _ => None,
        }
    }

    /// Repoint an occupied slot. Returns false if it was not occupied.
    pub fn update(&mut self, index: usize, location: EntityLocation) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Occupied(_)) => {
                *slot = Slot::Occupied(location);
                true
            }
            _ => false,
        }
    }

    /// Number of live entries
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated
    #[inline]
    pub fn capacity_used(&self) -> usize {
        self.slots.len()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }
}

/// The persistent and transient location tables of one store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityLocations {
    persistent: EntityLocationTable,
    transient: EntityLocationTable,
}

impl EntityLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            persistent: EntityLocationTable::with_capacity(capacity),
            transient: EntityLocationTable::with_capacity(capacity),
        }
    }

    #[inline]
    fn table(&self, entity: Entity) -> &EntityLocationTable {
        if entity.is_transient() {
            &self.transient
        } else {
            &self.persistent
        }
    }

    #[inline]
    fn table_mut(&mut self, entity: Entity) -> &mut EntityLocationTable {
        if entity.is_transient() {
            &mut self.transient
        } else {
            &mut self.persistent
        }
    }

    /// Allocate a new entity in the range selected by `transient`
    pub fn create(&mut self, location: EntityLocation, transient: bool) -> Entity {
        let table = if transient {
            &mut self.transient
        } else {
            &mut self.persistent
        };
        Entity::from_index(table.create(location), transient)
    }

    #[inline]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        self.table(entity).locate(entity.index())
    }

    pub fn update(&mut self, entity: Entity, location: EntityLocation) -> bool {
        self.table_mut(entity).update(entity.index(), location)
    }

    pub fn delete(&mut self, entity: Entity) -> bool {
        self.table_mut(entity).delete(entity.index())
    }

    /// Total live entities across both ranges
    pub fn len(&self) -> usize {
        self.persistent.len() + self.transient.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn persistent(&self) -> &EntityLocationTable {
        &self.persistent
    }

    pub fn transient(&self) -> &EntityLocationTable {
        &self.transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(archetype: u32, row: usize) -> EntityLocation {
        EntityLocation::new(ArchetypeId::new(archetype), row)
    }

    #[test]
    fn test_entity_sign() {
        let persistent = Entity::from_index(3, false);
        let transient = Entity::from_index(3, true);
        assert_eq!(persistent.id(), 3);
        assert_eq!(transient.id(), -4);
        assert!(transient.is_transient());
        assert_eq!(transient.index(), 3);
        assert_eq!(Entity::from_index(0, true).id(), -1);
    }

    #[test]
    fn test_free_list_is_a_stack() {
        let mut table = EntityLocationTable::new();
        let a = table.create(loc(0, 0));
        let b = table.create(loc(0, 1));
        let c = table.create(loc(0, 2));
        assert_eq!((a, b, c), (0, 1, 2));

        assert!(table.delete(a));
        assert!(table.delete(c));
        assert!(!table.delete(c));

        // Most recently deleted first
        assert_eq!(table.create(loc(1, 0)), c);
        assert_eq!(table.create(loc(1, 1)), a);
        assert_eq!(table.create(loc(1, 2)), 3);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_locate_and_update() {
        let mut table = EntityLocationTable::new();
        let index = table.create(loc(2, 5));
        assert_eq!(table.locate(index), Some(loc(2, 5)));
        assert!(table.update(index, loc(3, 0)));
        assert_eq!(table.locate(index), Some(loc(3, 0)));
        assert_eq!(table.locate(99), None);

        table.delete(index);
        assert_eq!(table.locate(index), None);
        assert!(!table.update(index, loc(3, 0)));
    }

    #[test]
    fn test_ranges_do_not_collide() {
        let mut locations = EntityLocations::new();
        let p = locations.create(loc(0, 0), false);
        let t = locations.create(loc(1, 0), true);
        assert_eq!(p, Entity(0));
        assert_eq!(t, Entity(-1));
        assert_eq!(locations.locate(p), Some(loc(0, 0)));
        assert_eq!(locations.locate(t), Some(loc(1, 0)));

        locations.delete(t);
        assert_eq!(locations.locate(t), None);
        assert_eq!(locations.locate(p), Some(loc(0, 0)));
        assert_eq!(locations.len(), 1);
    }
}
