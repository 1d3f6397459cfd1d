//! # void_event - Push-based observation
//!
//! Every notification in the engine is delivered through [`Observe`]:
//! - Subscribing replays the current value when one is known
//! - Future values are pushed to the callback
//! - Subscriptions are cancelled explicitly through [`Subscription`]
//! - Observables compose with `map`, `filter`, `distinct` and `merge`
//!
//! [`Observers`] is the keyed registry behind component, archetype and
//! entity observers; [`State`] is a single observable value.
//!
//! Callbacks are always invoked with no internal lock held, so a callback
//! may freely subscribe, unsubscribe or publish.

pub mod observe;
pub mod observers;
pub mod state;

pub use observe::{Callback, Observe, Subscription};
pub use observers::{Listeners, Observers, SubscriberId};
pub use state::State;

/// Prelude
pub mod prelude {
    pub use crate::{Callback, Listeners, Observe, Observers, State, SubscriberId, Subscription};
}
