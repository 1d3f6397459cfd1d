//! The `Observe` primitive
//!
//! An [`Observe<T>`] is a subscribe function: give it a callback and it
//! pushes values into it until the returned [`Subscription`] is cancelled.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Shared value callback
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by a subscribe call.
///
/// Dropping the handle does not cancel the subscription; call
/// [`Subscription::unsubscribe`].
#[must_use = "a subscription stays active until `unsubscribe` is called"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// A subscription with nothing to cancel
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Combine several subscriptions into one
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Stop receiving values
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type SubscribeFn<T> = dyn Fn(Callback<T>) -> Subscription + Send + Sync;

/// A push-based observable value
pub struct Observe<T> {
    subscribe: Arc<SubscribeFn<T>>,
}

impl<T> Clone for Observe<T> {
    fn clone(&self) -> Self {
        Self { subscribe: self.subscribe.clone() }
    }
}

impl<T> fmt::Debug for Observe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observe")
    }
}

impl<T: Send + Sync + 'static> Observe<T> {
    /// Build from a raw subscribe function
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Callback<T>) -> Subscription + Send + Sync + 'static,
    {
        Self { subscribe: Arc::new(subscribe) }
    }

    /// Replays `value` to every subscriber and never changes
    pub fn constant(value: T) -> Self {
        let value = Arc::new(value);
        Self::new(move |callback| {
            callback(&value);
            Subscription::empty()
        })
    }

    /// Never emits
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        (self.subscribe)(Arc::new(callback))
    }

    pub fn subscribe_callback(&self, callback: Callback<T>) -> Subscription {
        (self.subscribe)(callback)
    }

    /// Value replayed synchronously on subscribe, if any
    pub fn current(&self) -> Option<T>
    where
        T: Clone,
    {
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        let subscription = self.subscribe(move |value: &T| {
            let mut sink = sink.lock();
            if sink.is_none() {
                *sink = Some(value.clone());
            }
        });
        subscription.unsubscribe();
        let value = slot.lock().take();
        value
    }

    pub fn map<U, F>(&self, f: F) -> Observe<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observe::new(move |callback: Callback<U>| {
            let f = f.clone();
            source.subscribe(move |value| callback(&f(value)))
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Observe<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observe::new(move |callback: Callback<T>| {
            let predicate = predicate.clone();
            source.subscribe(move |value| {
                if predicate(value) {
                    callback(value);
                }
            })
        })
    }

    /// Skip values equal to the last one delivered to the same subscriber
    pub fn distinct(&self) -> Observe<T>
    where
        T: Clone + PartialEq,
    {
        let source = self.clone();
        Observe::new(move |callback: Callback<T>| {
            let last: Mutex<Option<T>> = Mutex::new(None);
            source.subscribe(move |value| {
                {
                    let mut last = last.lock();
                    if last.as_ref() == Some(value) {
                        return;
                    }
                    *last = Some(value.clone());
                }
                callback(value);
            })
        })
    }

    /// Values from all sources, in emission order
    pub fn merge(sources: Vec<Observe<T>>) -> Observe<T> {
        Observe::new(move |callback: Callback<T>| {
            let subscriptions = sources
                .iter()
                .map(|source| source.subscribe_callback(callback.clone()))
                .collect();
            Subscription::all(subscriptions)
        })
    }
}
