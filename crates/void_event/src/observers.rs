//! Keyed observer registries
//!
//! Callbacks are stored per key. Notification snapshots the callbacks under
//! the lock and invokes them after releasing it.

use crate::observe::{Callback, Observe, Subscription};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Subscriber ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

struct Registry<K, T> {
    next_subscriber_id: u64,
    handlers: BTreeMap<K, Vec<(SubscriberId, Callback<T>)>>,
}

/// Callbacks grouped by key
pub struct Observers<K, T> {
    inner: Arc<Mutex<Registry<K, T>>>,
}

/// Observers without a key
pub type Listeners<T> = Observers<(), T>;

impl<K, T> Clone for Observers<K, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K, T> Default for Observers<K, T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_subscriber_id: 1,
                handlers: BTreeMap::new(),
            })),
        }
    }
}

impl<K, T> Observers<K, T>
where
    K: Ord + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `key`
    pub fn subscribe(&self, key: K, callback: Callback<T>) -> Subscription {
        let id = {
            let mut registry = self.inner.lock();
            let id = SubscriberId(registry.next_subscriber_id);
            registry.next_subscriber_id += 1;
            registry.handlers.entry(key.clone()).or_default().push((id, callback));
            id
        };
        log::trace!("Subscriber {:?} registered", id);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut registry = inner.lock();
                if let Some(handlers) = registry.handlers.get_mut(&key) {
                    handlers.retain(|(sub_id, _)| *sub_id != id);
                    if handlers.is_empty() {
                        registry.handlers.remove(&key);
                    }
                    log::trace!("Subscriber {:?} removed", id);
                }
            }
        })
    }

    /// Observable of the values notified under `key`; nothing is replayed
    pub fn observe(&self, key: K) -> Observe<T> {
        let observers = self.clone();
        Observe::new(move |callback| observers.subscribe(key.clone(), callback))
    }

    /// Snapshot of the callbacks registered under `key`
    pub fn callbacks(&self, key: &K) -> Vec<Callback<T>> {
        self.inner
            .lock()
            .handlers
            .get(key)
            .map(|handlers| handlers.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    /// Call every callback under `key`
    pub fn notify(&self, key: &K, value: &T) {
        for callback in self.callbacks(key) {
            callback(value);
        }
    }

    /// Keys with at least one subscriber
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().handlers.keys().cloned().collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().handlers.contains_key(key)
    }

    /// Total number of callbacks
    pub fn len(&self) -> usize {
        self.inner.lock().handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_notify_by_key() {
        let observers: Observers<String, i32> = Observers::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let subscription = observers.subscribe(
            "position".to_string(),
            Arc::new(move |v: &i32| {
                counter_clone.fetch_add(*v as u32, Ordering::SeqCst);
            }),
        );

        observers.notify(&"position".to_string(), &2);
        observers.notify(&"velocity".to_string(), &5);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(observers.keys(), vec!["position".to_string()]);

        subscription.unsubscribe();
        assert!(observers.is_empty());
        observers.notify(&"position".to_string(), &2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_notify() {
        let observers: Listeners<()> = Listeners::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let subscription = observers.subscribe(
            (),
            Arc::new(move |_: &()| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = slot_clone.lock().take() {
                    subscription.unsubscribe();
                }
            }),
        );
        *slot.lock() = Some(subscription);

        observers.notify(&(), &());
        observers.notify(&(), &());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn test_unsubscribe_keeps_other_subscribers() {
        let observers: Observers<u32, ()> = Observers::new();
        let first = observers.subscribe(7, Arc::new(|_: &()| {}));
        let second = observers.subscribe(7, Arc::new(|_: &()| {}));
        assert_eq!(observers.len(), 2);

        first.unsubscribe();
        assert_eq!(observers.len(), 1);
        assert!(observers.contains(&7));

        second.unsubscribe();
        assert!(!observers.contains(&7));
    }
}
