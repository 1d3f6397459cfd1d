//! # Void Kernel
//!
//! The kernel turns the transactional store into an application database:
//! - Named transactions invoked through envelopes (transient, commit, cancel)
//! - Fine-grained change notification per component, archetype and entity
//! - Plugins contributing schema, transactions, systems, actions, services
//!   and computed values
//! - System scheduling and execution
//! - Snapshots and an undo/redo service
//!
//! ## Architecture
//!
//! ```text
//! transact / transact_with ──► envelopes ──► Reconciler ──► TransactionalStore
//!                                                 │
//!                                                 ▼
//!                                   Notification (after unlock)
//!                                                 │
//!                     ┌───────────────┬───────────┴─────┬──────────────┐
//!                     ▼               ▼                 ▼              ▼
//!               transactions     components        archetypes      entities
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Atomic transactions** - a failing transaction leaves no trace
//! 2. **Silent no-ops** - nothing changed, nobody is called
//! 3. **Provisional on top** - transient state is always replayed above committed state
//! 4. **Callbacks outside locks** - observers may call back into the database
//!
//! ## Example
//!
//! ```
//! use void_kernel::prelude::*;
//!
//! let counter = Plugin::builder()
//!     .resource("count", ResourceDescriptor::new(0))
//!     .transaction("add", |t, args| {
//!         let count = t.resource("count").and_then(Value::as_int).unwrap_or(0);
//!         let next = count + args.as_int().unwrap_or(1);
//!         t.set_resource("count", next)?;
//!         Ok(Value::Int(next))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let db = Database::new(DatabaseConfig::default());
//! db.extend(&counter).unwrap();
//! assert_eq!(db.transact("add", 2).unwrap(), Value::Int(2));
//! assert_eq!(db.resource("count"), Some(Value::Int(2)));
//! ```

pub mod config;
pub mod database;
pub mod error;
mod extensions;
pub mod invoke;
mod observed;
pub mod plugin;
pub mod reconcile;
pub mod undo_redo;

pub use config::DatabaseConfig;
pub use database::{Clock, Database, DatabaseData, WeakDatabase};
pub use error::{DatabaseError, Result};
pub use invoke::{ArgsProvider, ArgsStep};
pub use plugin::{
    combine_plugins, ActionFn, ComputedFactory, Plugin, PluginBuilder, PluginDeclarations,
    PluginId, ServiceFactory, SystemDeclaration, SystemFactory, SystemFn, TransactionFn,
};
pub use reconcile::{Reconciler, TransactionEnvelope};
pub use undo_redo::{UndoRedoService, UNDO_REDO_SERVICE};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::database::Database;
    pub use crate::error::DatabaseError;
    pub use crate::invoke::{ArgsProvider, ArgsStep};
    pub use crate::plugin::{Plugin, SystemFn};
    pub use crate::undo_redo::UndoRedoService;
    pub use void_ecs::prelude::*;
    pub use void_event::{Observe, Subscription};
    pub use void_ir::{Transaction, TransactionError, TransactionOptions, TransactionResult, Undoable};
}
