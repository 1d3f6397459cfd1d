//! Observable state cell

use crate::observe::{Callback, Observe};
use crate::observers::Listeners;
use parking_lot::Mutex;
use std::sync::Arc;

/// A value whose changes are pushed to subscribers.
///
/// Subscribing replays the current value.
pub struct State<T> {
    value: Arc<Mutex<T>>,
    listeners: Listeners<T>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> State<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Store a new value, notifying only if it differs
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.lock();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.listeners.notify(&(), &value);
        true
    }

    /// Replace the value through a closure
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = {
            let current = self.value.lock();
            f(&*current)
        };
        self.set(next)
    }

    pub fn observe(&self) -> Observe<T> {
        let state = self.clone();
        Observe::new(move |callback: Callback<T>| {
            let subscription = state.listeners.subscribe((), callback.clone());
            callback(&state.get());
            subscription
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_replays_and_skips_duplicates() {
        let state = State::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = state.observe().subscribe(move |v: &bool| sink.lock().push(*v));

        assert!(state.set(true));
        assert!(!state.set(true));
        assert!(state.update(|v| !v));
        subscription.unsubscribe();

        assert_eq!(*seen.lock(), vec![false, true, false]);
        assert_eq!(state.observe().current(), Some(false));
    }
}
