//! Reconciler - transient, commit and cancel envelopes
//!
//! Every call of a named transaction is delivered as one or more
//! [`TransactionEnvelope`]s sharing a [`TransactionId`]:
//!
//! ```text
//! time < 0   transient   provisional; replaces any pending entry with the same id
//! time > 0   commit      executed once for good; the pending entry is dropped
//! time == 0  cancel      the pending entry is dropped
//! ```
//!
//! Pending transients stay applied on top of the committed state. Whenever
//! the pending set changes, all of them are rolled back newest first and
//! replayed in `(|time|, id, name)` order, so committed writes always land
//! underneath the provisional ones.

use crate::error::{DatabaseError, Result};
use crate::plugin::TransactionFn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use void_ecs::Value;
use void_ir::{TransactionId, TransactionOptions, TransactionResult, TransactionalStore, WriteOp};

/// One application of a named transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub id: TransactionId,
    pub name: String,
    pub args: Value,
    /// Negative for transient, positive for commit, zero for cancel
    pub time: i64,
}

impl TransactionEnvelope {
    pub fn transient(id: TransactionId, name: impl Into<String>, args: Value, time: i64) -> Self {
        Self { id, name: name.into(), args, time: -time.abs().max(1) }
    }

    pub fn commit(id: TransactionId, name: impl Into<String>, args: Value, time: i64) -> Self {
        Self { id, name: name.into(), args, time: time.abs().max(1) }
    }

    pub fn cancel(id: TransactionId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), args: Value::Null, time: 0 }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.time < 0
    }

    #[inline]
    pub fn is_commit(&self) -> bool {
        self.time > 0
    }

    #[inline]
    pub fn is_cancel(&self) -> bool {
        self.time == 0
    }
}

struct PendingEntry {
    envelope: TransactionEnvelope,
    transaction: TransactionFn,
    /// Outcome of the last replay; `None` if it changed nothing or failed
    result: Option<TransactionResult>,
}

impl PendingEntry {
    fn order(&self, other: &PendingEntry) -> Ordering {
        let a = &self.envelope;
        let b = &other.envelope;
        a.time
            .unsigned_abs()
            .cmp(&b.time.unsigned_abs())
            .then(a.id.cmp(&b.id))
            .then_with(|| a.name.cmp(&b.name))
    }
}

/// Copy of a result with its value dropped
pub(crate) fn erase_value<T>(result: &TransactionResult<T>) -> TransactionResult {
    TransactionResult {
        value: Value::Null,
        transient: result.transient,
        undoable: result.undoable.clone(),
        redo: result.redo.clone(),
        undo: result.undo.clone(),
        changed_entities: result.changed_entities.clone(),
        changed_components: result.changed_components.clone(),
        changed_archetypes: result.changed_archetypes.clone(),
    }
}

fn lookup(transactions: &BTreeMap<String, TransactionFn>, name: &str) -> Result<TransactionFn> {
    transactions
        .get(name)
        .cloned()
        .ok_or_else(|| DatabaseError::UnknownTransaction(name.to_string()))
}

/// Undo one recorded transaction as a transient write
fn rollback(store: &mut TransactionalStore, undo: &[WriteOp], sink: &mut Vec<TransactionResult>) {
    match store.execute(TransactionOptions::transient(), |t| t.apply_operations(undo)) {
        Ok(result) => sink.push(result.map_value(|_| Value::Null)),
        Err(error) => log::error!("Rollback of pending transaction failed: {}", error),
    }
}

/// Pending transient entries of one database
#[derive(Default)]
pub struct Reconciler {
    pending: Vec<PendingEntry>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.pending.iter().any(|entry| entry.envelope.id == id)
    }

    /// Pending envelopes in replay order
    pub fn pending(&self) -> Vec<TransactionEnvelope> {
        self.pending.iter().map(|entry| entry.envelope.clone()).collect()
    }

    /// Apply an envelope.
    ///
    /// Returns the value produced by the envelope's own transaction, or
    /// `None` for a cancel. Every result produced along the way, rollbacks
    /// and replays included, is pushed to `sink`.
    pub fn apply(
        &mut self,
        store: &mut TransactionalStore,
        transactions: &BTreeMap<String, TransactionFn>,
        envelope: &TransactionEnvelope,
        sink: &mut Vec<TransactionResult>,
    ) -> Result<Option<Value>> {
        match envelope.time.cmp(&0) {
            Ordering::Less => {
                let transaction = lookup(transactions, &envelope.name)?;
                self.apply_transient(store, envelope.clone(), transaction, sink).map(Some)
            }
            Ordering::Greater => {
                let transaction = lookup(transactions, &envelope.name)?;
                let result = self.execute(store, TransactionOptions::committed(), Some(envelope.id), sink, |t| {
                    transaction(t, &envelope.args)
                })?;
                Ok(Some(result.value))
            }
            Ordering::Equal => {
                self.cancel(store, envelope.id, sink);
                Ok(None)
            }
        }
    }

    fn apply_transient(
        &mut self,
        store: &mut TransactionalStore,
        envelope: TransactionEnvelope,
        transaction: TransactionFn,
        sink: &mut Vec<TransactionResult>,
    ) -> Result<Value> {
        let id = envelope.id;
        self.rollback_all(store, sink);
        self.pending.retain(|entry| entry.envelope.id != id);

        let entry = PendingEntry { envelope, transaction, result: None };
        let position = self
            .pending
            .iter()
            .position(|existing| existing.order(&entry) == Ordering::Greater)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, entry);

        self.replay(store, sink, Some(id)).map(Option::unwrap_or_default)
    }

    /// Drop the pending entry for `id`, if any
    pub fn cancel(&mut self, store: &mut TransactionalStore, id: TransactionId, sink: &mut Vec<TransactionResult>) {
        if !self.contains(id) {
            return;
        }
        self.rollback_all(store, sink);
        self.pending.retain(|entry| entry.envelope.id != id);
        // a replay failure of another entry is only logged
        let _ = self.replay(store, sink, None);
    }

    /// Run `f` as a transaction underneath the pending entries.
    ///
    /// The pending entry for `supersedes`, if any, is dropped first.
    pub fn execute<T, F>(
        &mut self,
        store: &mut TransactionalStore,
        options: TransactionOptions,
        supersedes: Option<TransactionId>,
        sink: &mut Vec<TransactionResult>,
        f: F,
    ) -> Result<TransactionResult<T>>
    where
        F: FnOnce(&mut void_ir::Transaction<'_>) -> void_ir::Result<T>,
    {
        self.rollback_all(store, sink);
        if let Some(id) = supersedes {
            self.pending.retain(|entry| entry.envelope.id != id);
        }
        let outcome = store.execute(options, f);
        if let Ok(result) = &outcome {
            sink.push(erase_value(result));
        }
        let _ = self.replay(store, sink, None);
        Ok(outcome?)
    }

    /// Run `f` with every pending entry rolled back, then replay them
    pub fn suspend<R>(&mut self, store: &mut TransactionalStore, f: impl FnOnce(&mut TransactionalStore) -> R) -> R {
        let mut discarded = Vec::new();
        self.rollback_all(store, &mut discarded);
        let value = f(store);
        let _ = self.replay(store, &mut discarded, None);
        value
    }

    /// Replace the pending set without rolling anything back, then replay it.
    ///
    /// Used after loading a snapshot; envelopes naming unknown transactions
    /// are dropped.
    pub fn restore(
        &mut self,
        store: &mut TransactionalStore,
        transactions: &BTreeMap<String, TransactionFn>,
        envelopes: Vec<TransactionEnvelope>,
        sink: &mut Vec<TransactionResult>,
    ) {
        self.pending.clear();
        for envelope in envelopes {
            if !envelope.is_transient() {
                log::warn!("Dropping non-transient pending envelope '{}'", envelope.name);
                continue;
            }
            match transactions.get(&envelope.name) {
                Some(transaction) => self.pending.push(PendingEntry {
                    envelope,
                    transaction: transaction.clone(),
                    result: None,
                }),
                None => log::warn!("Dropping pending envelope for unknown transaction '{}'", envelope.name),
            }
        }
        self.pending.sort_by(PendingEntry::order);
        let _ = self.replay(store, sink, None);
    }

    fn rollback_all(&mut self, store: &mut TransactionalStore, sink: &mut Vec<TransactionResult>) {
        for entry in self.pending.iter_mut().rev() {
            if let Some(result) = entry.result.take() {
                rollback(store, &result.undo, sink);
            }
        }
    }

    /// Replay every pending entry in order.
    ///
    /// If `target` fails it is removed and its error returned; other
    /// failures are logged and leave the entry without a result.
    fn replay(
        &mut self,
        store: &mut TransactionalStore,
        sink: &mut Vec<TransactionResult>,
        target: Option<TransactionId>,
    ) -> Result<Option<Value>> {
        let mut value = None;
        let mut failure = None;

        for entry in &mut self.pending {
            let transaction = entry.transaction.clone();
            let args = &entry.envelope.args;
            match store.execute(TransactionOptions::transient(), |t| transaction(t, args)) {
                Ok(result) => {
                    if Some(entry.envelope.id) == target {
                        value = Some(result.value.clone());
                    }
                    entry.result = if result.redo.is_empty() && result.undo.is_empty() {
                        None
                    } else {
                        sink.push(erase_value(&result));
                        Some(result)
                    };
                }
                Err(error) => {
                    entry.result = None;
                    if Some(entry.envelope.id) == target {
                        failure = Some(error);
                    } else {
                        log::warn!("Replay of pending '{}' failed: {}", entry.envelope.name, error);
                    }
                }
            }
        }

        if let Some(error) = failure {
            if let Some(id) = target {
                self.pending.retain(|entry| entry.envelope.id != id);
            }
            return Err(error.into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use void_ecs::{ResourceDescriptor, Store};
    use void_ir::TransactionError;

    fn setup() -> (TransactionalStore, BTreeMap<String, TransactionFn>) {
        let mut store = Store::new();
        store.register_resource("value", ResourceDescriptor::new(0)).unwrap();
        store.register_resource("log", ResourceDescriptor::new(Value::Array(vec![]))).unwrap();

        let mut transactions: BTreeMap<String, TransactionFn> = BTreeMap::new();
        transactions.insert(
            "set".into(),
            Arc::new(|t: &mut void_ir::Transaction<'_>, args: &Value| -> void_ir::Result<Value> {
                t.set_resource("value", args.clone())?;
                Ok(args.clone())
            }),
        );
        transactions.insert(
            "append".into(),
            Arc::new(|t: &mut void_ir::Transaction<'_>, args: &Value| -> void_ir::Result<Value> {
                let mut log = t.resource("log").and_then(Value::as_array).map(<[Value]>::to_vec).unwrap_or_default();
                log.push(args.clone());
                t.set_resource("log", Value::Array(log))?;
                Ok(Value::Null)
            }),
        );
        transactions.insert(
            "fail_on_negative".into(),
            Arc::new(|t: &mut void_ir::Transaction<'_>, args: &Value| -> void_ir::Result<Value> {
                t.set_resource("value", args.clone())?;
                if args.as_int().unwrap_or(0) < 0 {
                    return Err(TransactionError::aborted("negative"));
                }
                Ok(Value::Null)
            }),
        );
        (TransactionalStore::new(store), transactions)
    }

    fn id(raw: u64) -> TransactionId {
        TransactionId::from_raw(raw)
    }

    #[test]
    fn test_transient_replaces_previous() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let mut sink = Vec::new();

        for v in [10, 11, 12] {
            let env = TransactionEnvelope::transient(id(1), "set", Value::Int(v), 100);
            reconciler.apply(&mut store, &transactions, &env, &mut sink).unwrap();
            assert_eq!(store.store().resource("value"), Some(&Value::Int(v)));
        }
        assert_eq!(reconciler.len(), 1);

        let env = TransactionEnvelope::commit(id(1), "set", Value::Int(12), 100);
        let value = reconciler.apply(&mut store, &transactions, &env, &mut sink).unwrap();
        assert_eq!(value, Some(Value::Int(12)));
        assert!(reconciler.is_empty());
        assert_eq!(store.store().resource("value"), Some(&Value::Int(12)));
    }

    #[test]
    fn test_cancel_restores_committed_state() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let mut sink = Vec::new();

        let env = TransactionEnvelope::transient(id(1), "set", Value::Int(5), 10);
        reconciler.apply(&mut store, &transactions, &env, &mut sink).unwrap();
        reconciler.apply(&mut store, &transactions, &TransactionEnvelope::cancel(id(1), "set"), &mut sink).unwrap();

        assert!(reconciler.is_empty());
        assert_eq!(store.store().resource("value"), Some(&Value::Int(0)));

        // cancelling an unknown id is a no-op
        sink.clear();
        reconciler.apply(&mut store, &transactions, &TransactionEnvelope::cancel(id(9), "set"), &mut sink).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_commit_lands_under_pending_transients() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let mut sink = Vec::new();

        let pending = TransactionEnvelope::transient(id(1), "append", Value::from("preview"), 10);
        reconciler.apply(&mut store, &transactions, &pending, &mut sink).unwrap();
        let commit = TransactionEnvelope::commit(id(2), "append", Value::from("saved"), 20);
        reconciler.apply(&mut store, &transactions, &commit, &mut sink).unwrap();

        assert_eq!(
            store.store().resource("log"),
            Some(&Value::Array(vec![Value::from("saved"), Value::from("preview")]))
        );

        reconciler.cancel(&mut store, id(1), &mut sink);
        assert_eq!(store.store().resource("log"), Some(&Value::Array(vec![Value::from("saved")])));
    }

    #[test]
    fn test_pending_entries_replay_in_time_order() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let mut sink = Vec::new();

        let late = TransactionEnvelope::transient(id(1), "append", Value::from("late"), 50);
        let early = TransactionEnvelope::transient(id(2), "append", Value::from("early"), 20);
        reconciler.apply(&mut store, &transactions, &late, &mut sink).unwrap();
        reconciler.apply(&mut store, &transactions, &early, &mut sink).unwrap();

        assert_eq!(
            store.store().resource("log"),
            Some(&Value::Array(vec![Value::from("early"), Value::from("late")]))
        );
        assert_eq!(reconciler.pending().iter().map(|e| e.id.raw()).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_failed_transient_is_removed() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let mut sink = Vec::new();

        let ok = TransactionEnvelope::transient(id(1), "fail_on_negative", Value::Int(3), 10);
        reconciler.apply(&mut store, &transactions, &ok, &mut sink).unwrap();
        let bad = TransactionEnvelope::transient(id(1), "fail_on_negative", Value::Int(-1), 10);
        let error = reconciler.apply(&mut store, &transactions, &bad, &mut sink).unwrap_err();

        assert!(matches!(error, DatabaseError::Transaction(TransactionError::Aborted(_))));
        assert!(reconciler.is_empty());
        assert_eq!(store.store().resource("value"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_unknown_transaction() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let env = TransactionEnvelope::commit(id(1), "missing", Value::Null, 1);
        let error = reconciler.apply(&mut store, &transactions, &env, &mut Vec::new()).unwrap_err();
        assert!(matches!(error, DatabaseError::UnknownTransaction(name) if name == "missing"));
    }

    #[test]
    fn test_suspend_hides_pending_state() {
        let (mut store, transactions) = setup();
        let mut reconciler = Reconciler::new();
        let env = TransactionEnvelope::transient(id(1), "set", Value::Int(7), 10);
        reconciler.apply(&mut store, &transactions, &env, &mut Vec::new()).unwrap();

        let seen = reconciler.suspend(&mut store, |s| s.store().resource("value").cloned());
        assert_eq!(seen, Some(Value::Int(0)));
        assert_eq!(store.store().resource("value"), Some(&Value::Int(7)));
    }
}
