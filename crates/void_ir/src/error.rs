//! Transaction errors

use thiserror::Error;
use void_ecs::StoreError;

/// Errors raised while executing a transaction
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransactionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("resource '{0}' cannot be deleted")]
    ResourceDelete(String),

    /// Failure raised by the transaction function itself
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl TransactionError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
