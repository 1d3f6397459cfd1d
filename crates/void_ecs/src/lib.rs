//! # void_ecs - Archetype-based entity store
//!
//! Storage core of the engine:
//! - Dynamic, named components described at runtime
//! - Archetype tables keyed by exact component set
//! - Persistent and transient entity ranges with id recycling
//! - Resources as singleton entities
//! - Constraint-based system ordering
//!
//! ## Example
//!
//! ```
//! use void_ecs::prelude::*;
//!
//! let mut store = Store::new();
//! store.register_component("position", ComponentDescriptor::new(0));
//! store.register_component("velocity", ComponentDescriptor::new(0));
//!
//! let entity = store
//!     .insert_values(&values([("position", 1), ("velocity", 2)]))
//!     .unwrap();
//!
//! store.update(entity, &set_all([("position", 3)])).unwrap();
//! assert_eq!(store.get(entity, "position"), Some(&Value::Int(3)));
//!
//! let moving = store.select(&["velocity"], &SelectOptions::new());
//! assert_eq!(moving, vec![entity]);
//! ```

pub mod archetype;
pub mod column;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod store;
pub mod system;
pub mod value;

pub use archetype::{Archetype, ArchetypeData, ArchetypeId, Archetypes};
pub use column::{Column, ValueColumn};
pub use component::{
    set_all, values, ComponentDescriptor, ComponentRegistry, ComponentUpdate, EntityUpdate,
    EntityValues, ResourceDescriptor, ID, TRANSIENT,
};
pub use entity::{Entity, EntityLocation, EntityLocationTable, EntityLocations};
pub use error::{Result, StoreError};
pub use query::{Order, SelectOptions};
pub use store::{ResourceEntry, Store, StoreData};
pub use system::{calculate_system_order, SystemDeclarations, SystemOrder, SystemOrderCache, SystemSchedule};
pub use value::Value;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::archetype::ArchetypeId;
    pub use crate::component::{
        set_all, values, ComponentDescriptor, ComponentUpdate, EntityUpdate, EntityValues,
        ResourceDescriptor,
    };
    pub use crate::entity::Entity;
    pub use crate::error::StoreError;
    pub use crate::query::{Order, SelectOptions};
    pub use crate::store::Store;
    pub use crate::system::SystemSchedule;
    pub use crate::value::Value;
}
