//! Storage error types

use crate::archetype::ArchetypeId;
use crate::entity::Entity;
use thiserror::Error;

/// Errors raised by the core store
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    EntityNotFound(Entity),

    #[error("id is required")]
    MissingIdComponent,

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Component '{0}' is reserved and cannot be written directly")]
    ReservedComponent(String),

    #[error("Archetype not found: {0:?}")]
    ArchetypeNotFound(ArchetypeId),

    #[error("Unknown archetype: {0}")]
    UnknownArchetype(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Circular dependency detected in system scheduling at '{0}'")]
    SystemCycle(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
