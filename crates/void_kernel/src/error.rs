//! Error types for the database kernel

use thiserror::Error;
use void_ecs::StoreError;
use void_ir::TransactionError;

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Service missing or of a different type
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown computed value: {0}")]
    UnknownComputed(String),

    /// Two plugins declare the same key differently
    #[error("Conflicting {kind} '{key}' between plugins")]
    PluginConflict { kind: &'static str, key: String },

    /// An argument provider failed
    #[error("Argument provider failed: {0}")]
    Provider(String),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

impl DatabaseError {
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider(reason.into())
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
