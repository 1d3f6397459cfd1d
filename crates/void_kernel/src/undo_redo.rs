//! Undo/redo stack fed by committed, undoable transactions

use crate::database::{Database, WeakDatabase};
use crate::error::Result;
use crate::plugin::Plugin;
use parking_lot::Mutex;
use std::sync::Arc;
use void_event::{Observe, State, Subscription};
use void_ir::{coalesce_transactions, should_coalesce, TransactionResult};

/// Name the service is registered under by [`UndoRedoService::plugin`]
pub const UNDO_REDO_SERVICE: &str = "undo_redo";

#[derive(Default)]
struct UndoStack {
    entries: Vec<TransactionResult>,
    /// Entries before this index can be undone, the rest redone
    index: usize,
    limit: Option<usize>,
}

impl UndoStack {
    fn push(&mut self, result: TransactionResult) {
        self.entries.truncate(self.index);
        let merged = match self.entries.pop() {
            Some(top) if should_coalesce(&top, &result) => coalesce_transactions(top, result),
            Some(top) => {
                self.entries.push(top);
                result
            }
            None => result,
        };
        self.entries.push(merged);
        if let Some(limit) = self.limit {
            let excess = self.entries.len().saturating_sub(limit);
            self.entries.drain(..excess);
        }
        self.index = self.entries.len();
    }
}

/// Records committed undoable transactions and replays their logs
pub struct UndoRedoService {
    db: WeakDatabase,
    stack: Arc<Mutex<UndoStack>>,
    undo_enabled: State<bool>,
    redo_enabled: State<bool>,
    subscription: Mutex<Option<Subscription>>,
}

impl UndoRedoService {
    pub fn new(db: &Database) -> Self {
        let stack = Arc::new(Mutex::new(UndoStack {
            limit: db.config().undo_limit,
            ..UndoStack::default()
        }));
        let undo_enabled = State::new(false);
        let redo_enabled = State::new(false);

        let recorder = stack.clone();
        let (can_undo, can_redo) = (undo_enabled.clone(), redo_enabled.clone());
        let subscription = db.observe_transactions().subscribe(move |result: &TransactionResult| {
            if result.transient || result.undoable.is_none() {
                return;
            }
            let (undo, redo) = {
                let mut stack = recorder.lock();
                stack.push(result.clone());
                (stack.index > 0, stack.index < stack.entries.len())
            };
            can_undo.set(undo);
            can_redo.set(redo);
        });

        Self {
            db: db.downgrade(),
            stack,
            undo_enabled,
            redo_enabled,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    /// A plugin registering the service under [`UNDO_REDO_SERVICE`]
    pub fn plugin() -> Result<Plugin> {
        Plugin::builder().service(UNDO_REDO_SERVICE, UndoRedoService::new).build()
    }

    /// Undo the most recent step; `false` if there is nothing to undo
    pub fn undo(&self) -> Result<bool> {
        let operations = {
            let stack = self.stack.lock();
            match stack.index.checked_sub(1).and_then(|i| stack.entries.get(i)) {
                Some(entry) => entry.undo.clone(),
                None => return Ok(false),
            }
        };
        let Some(db) = self.db.upgrade() else {
            return Ok(false);
        };
        db.apply_operations(&operations)?;
        self.stack.lock().index -= 1;
        self.refresh();
        Ok(true)
    }

    /// Redo the most recently undone step; `false` if there is nothing to redo
    pub fn redo(&self) -> Result<bool> {
        let operations = {
            let stack = self.stack.lock();
            match stack.entries.get(stack.index) {
                Some(entry) => entry.redo.clone(),
                None => return Ok(false),
            }
        };
        let Some(db) = self.db.upgrade() else {
            return Ok(false);
        };
        db.apply_operations(&operations)?;
        self.stack.lock().index += 1;
        self.refresh();
        Ok(true)
    }

    fn refresh(&self) {
        let (undo, redo) = {
            let stack = self.stack.lock();
            (stack.index > 0, stack.index < stack.entries.len())
        };
        self.undo_enabled.set(undo);
        self.redo_enabled.set(redo);
    }

    pub fn undo_enabled(&self) -> Observe<bool> {
        self.undo_enabled.observe()
    }

    pub fn redo_enabled(&self) -> Observe<bool> {
        self.redo_enabled.observe()
    }

    /// Number of steps that can currently be undone
    pub fn index(&self) -> usize {
        self.stack.lock().index
    }

    pub fn len(&self) -> usize {
        self.stack.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().entries.is_empty()
    }

    /// Stop recording new transactions
    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }
}
