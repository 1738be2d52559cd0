//! Synchronous in-process publish/subscribe bus
//!
//! Delivery is ordered by subscription registration and happens on the
//! publisher's thread. Handler errors are logged and swallowed so one bad
//! subscriber cannot starve the rest.

use crate::{Event, EventBusError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Event handler callback. Returning an error marks the delivery as failed
/// for this subscriber only; remaining subscribers still receive the event.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), EventBusError> + Send + Sync>;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BusSubscription {
    id: SubscriptionId,
    pattern: String,
    handler: EventHandler,
}

/// In-process event bus.
pub struct EventBus {
    subscriptions: Mutex<Vec<BusSubscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler to events matching `pattern`.
    ///
    /// Patterns are exact event names (`plugin.loaded`) or a prefix glob
    /// ending in `.*` (`plugin.*`).
    pub fn subscribe(&self, pattern: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pattern = pattern.into();
        debug!(pattern = %pattern, "registering bus subscription");

        self.subscriptions.lock().push(BusSubscription {
            id,
            pattern,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Publish an event to every matching subscriber, in registration order.
    ///
    /// Returns the number of handlers invoked. Handler errors are logged and
    /// do not prevent delivery to the remaining subscribers.
    pub fn publish(&self, event: &Event) -> usize {
        // Snapshot under the lock so handlers can subscribe/unsubscribe
        // without deadlocking. Subscribers added mid-publish do not see
        // the in-flight event.
        let matching: Vec<(SubscriptionId, EventHandler)> = {
            let subs = self.subscriptions.lock();
            subs.iter()
                .filter(|s| pattern_matches(&s.pattern, &event.event_type))
                .map(|s| (s.id, s.handler.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in matching {
            if let Err(e) = handler(event) {
                warn!(
                    event_type = %event.event_type,
                    subscription = id.0,
                    error = %e,
                    "event handler failed"
                );
            }
            delivered += 1;
        }
        delivered
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact match, or prefix glob when the pattern ends in `.*`.
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
    } else {
        pattern == event_type
    }
}
