//! Plugin event hooks
//!
//! Subscribe/publish keyed by `(plugin id, event pattern)`, layered over the
//! shared event bus. Plugins receive host-originated events (lifecycle
//! transitions) and events other plugins publish.

use events_bus::{Event, EventBus, EventHandler, SubscriptionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-plugin view over the event bus.
pub struct EventHookManager {
    bus: Arc<EventBus>,
    // (plugin id, pattern) -> bus subscription
    subscriptions: Mutex<HashMap<(String, String), SubscriptionId>>,
}

impl EventHookManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a plugin's handler to events matching `pattern`. One handler
    /// per `(plugin, pattern)` pair; re-subscribing replaces the previous one.
    pub fn subscribe(&self, plugin_id: &str, pattern: &str, handler: EventHandler) {
        let key = (plugin_id.to_string(), pattern.to_string());
        let id = self.bus.subscribe(pattern, handler);
        debug!(plugin_id, pattern, "plugin subscribed to events");

        let mut subscriptions = self.subscriptions.lock();
        if let Some(previous) = subscriptions.insert(key, id) {
            self.bus.unsubscribe(previous);
        }
    }

    /// Publish an event to every matching subscriber. Delivery order and
    /// failure isolation follow the bus semantics.
    pub fn publish(&self, event: &Event) -> usize {
        self.bus.publish(event)
    }

    /// Remove one subscription. Returns false if it did not exist.
    pub fn unsubscribe(&self, plugin_id: &str, pattern: &str) -> bool {
        let key = (plugin_id.to_string(), pattern.to_string());
        match self.subscriptions.lock().remove(&key) {
            Some(id) => self.bus.unsubscribe(id),
            None => false,
        }
    }

    /// Remove every subscription a plugin holds. Returns the count removed.
    pub fn unsubscribe_all(&self, plugin_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let keys: Vec<(String, String)> = subscriptions
            .keys()
            .filter(|(id, _)| id == plugin_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(id) = subscriptions.remove(key) {
                self.bus.unsubscribe(id);
            }
        }
        keys.len()
    }

    /// Patterns a plugin is currently subscribed to, sorted.
    pub fn subscriptions(&self, plugin_id: &str) -> Vec<String> {
        let subscriptions = self.subscriptions.lock();
        let mut patterns: Vec<String> = subscriptions
            .keys()
            .filter(|(id, _)| id == plugin_id)
            .map(|(_, pattern)| pattern.clone())
            .collect();
        patterns.sort();
        patterns
    }
}
