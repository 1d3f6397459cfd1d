//! # Void IR - Transactional write log
//!
//! Every mutation of the store goes through a transaction that records what
//! it did. The recorded operations are the IR of the engine: they drive
//! rollback, undo/redo and replication.
//!
//! ## Architecture
//!
//! ```text
//! transaction fn ──► Transaction (tracked writes) ──► Store
//!                          │
//!                          └──► TransactionResult { redo, undo, changed sets }
//! ```
//!
//! ## Key Concepts
//!
//! - **WriteOp**: insert, update or delete of one entity
//! - **Transaction**: short-lived store wrapper that logs every write
//! - **TransactionResult**: redo/undo logs plus changed entities, components and archetypes
//! - **Coalescing**: shrinking logs and merging adjacent undo steps

pub mod coalesce;
pub mod error;
pub mod op;
pub mod transaction;

pub use coalesce::{coalesce_transactions, coalesce_write_operations, should_coalesce};
pub use error::{Result, TransactionError};
pub use op::{apply_operations, WriteOp};
pub use transaction::{
    Transaction, TransactionId, TransactionIdGenerator, TransactionOptions, TransactionResult,
    TransactionalStore, Undoable,
};
