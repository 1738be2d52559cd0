//! Plugin lifecycle management
//!
//! Drives plugins through `Registered -> Loaded -> Started -> Stopped ->
//! Unloaded`, invoking the plugin's optional hook before each transition and
//! publishing an event after it. Operations are all-or-nothing: an illegal
//! transition performs no hook call and no state mutation, and a hook
//! failure leaves the plugin in its prior state.

use crate::error::{PluginHostError, Result};
use crate::registry::PluginRegistry;
use crate::security::SecurityManager;
use dashmap::DashMap;
use events_bus::{Event, EventBus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Plugin lifecycle state. `Unloaded` is terminal; reusing an id requires a
/// fresh `Registered` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Registered,
    Loaded,
    Started,
    Stopped,
    Unloaded,
}

impl PluginState {
    /// Legal transitions: the happy path, plus `Loaded -> Unloaded` for a
    /// plugin that was never started.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        matches!(
            (self, next),
            (Self::Registered, Self::Loaded)
                | (Self::Loaded, Self::Started)
                | (Self::Started, Self::Stopped)
                | (Self::Stopped, Self::Unloaded)
                | (Self::Loaded, Self::Unloaded)
        )
    }

    /// Event published on the bus when this state is entered.
    pub fn event_name(self) -> Option<&'static str> {
        match self {
            Self::Registered => None,
            Self::Loaded => Some("plugin.loaded"),
            Self::Started => Some("plugin.started"),
            Self::Stopped => Some("plugin.stopped"),
            Self::Unloaded => Some("plugin.unloaded"),
        }
    }

    fn hook_name(self) -> &'static str {
        match self {
            Self::Registered => "none",
            Self::Loaded => "on_load",
            Self::Started => "on_start",
            Self::Stopped => "on_stop",
            Self::Unloaded => "on_unload",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "REGISTERED",
            Self::Loaded => "LOADED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Unloaded => "UNLOADED",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle state machine over the registry.
pub struct LifecycleManager {
    registry: Arc<PluginRegistry>,
    security: Arc<SecurityManager>,
    bus: Arc<EventBus>,
    // One guard per plugin id: validate, hook, and transition must run as a
    // unit, or two concurrent callers can both pass validation and the loser
    // fails only after its hook already ran.
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<PluginRegistry>,
        security: Arc<SecurityManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            security,
            bus,
            guards: DashMap::new(),
        }
    }

    fn guard(&self, plugin_id: &str) -> Arc<Mutex<()>> {
        self.guards
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// `Registered -> Loaded`, invoking `on_load`.
    pub async fn load_plugin(&self, plugin_id: &str) -> Result<()> {
        self.advance(plugin_id, PluginState::Loaded).await
    }

    /// `Loaded -> Started`, invoking `on_start`.
    pub async fn start_plugin(&self, plugin_id: &str) -> Result<()> {
        self.advance(plugin_id, PluginState::Started).await
    }

    /// `Started -> Stopped`, invoking `on_stop`.
    pub async fn stop_plugin(&self, plugin_id: &str) -> Result<()> {
        self.advance(plugin_id, PluginState::Stopped).await
    }

    /// `Stopped|Loaded -> Unloaded`, invoking `on_unload`, then removes the
    /// registry entry and the plugin's security records. Terminal.
    pub async fn unload_plugin(&self, plugin_id: &str) -> Result<()> {
        self.advance(plugin_id, PluginState::Unloaded).await?;
        self.registry.unregister(plugin_id).await?;
        self.security.remove_plugin(plugin_id)?;
        self.guards.remove(plugin_id);
        info!(plugin_id, "plugin unloaded");
        Ok(())
    }

    async fn advance(&self, plugin_id: &str, target: PluginState) -> Result<()> {
        let guard = self.guard(plugin_id);
        let _held = guard.lock().await;

        let (proxy, current) = self.registry.get_with_state(plugin_id).await?;
        if !current.can_transition_to(target) {
            return Err(PluginHostError::InvalidStateTransition {
                plugin: plugin_id.to_string(),
                from: current,
                to: target,
            });
        }

        // Hook first: on failure the transition does not happen and the
        // plugin keeps its prior state, so the caller can retry or unload.
        let instance = proxy.instance();
        let hook_result = match target {
            PluginState::Loaded => instance.on_load().await,
            PluginState::Started => instance.on_start().await,
            PluginState::Stopped => instance.on_stop().await,
            PluginState::Unloaded => instance.on_unload().await,
            PluginState::Registered => Ok(()),
        };
        hook_result.map_err(|source| PluginHostError::Lifecycle {
            plugin: plugin_id.to_string(),
            hook: target.hook_name().to_string(),
            source,
        })?;

        self.registry.transition(plugin_id, current, target).await?;
        info!(plugin_id, state = %target, "lifecycle transition");

        if let Some(event_name) = target.event_name() {
            self.bus
                .publish(&Event::new(event_name, json!({ "pluginId": plugin_id })));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use PluginState::*;
        assert!(Registered.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Unloaded));
        assert!(Loaded.can_transition_to(Unloaded));
    }

    #[test]
    fn test_illegal_transitions() {
        use PluginState::*;
        assert!(!Registered.can_transition_to(Started));
        assert!(!Registered.can_transition_to(Unloaded));
        assert!(!Started.can_transition_to(Unloaded));
        assert!(!Stopped.can_transition_to(Started));
        // Unloaded is terminal
        for next in [Registered, Loaded, Started, Stopped, Unloaded] {
            assert!(!Unloaded.can_transition_to(next));
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(PluginState::Loaded.event_name(), Some("plugin.loaded"));
        assert_eq!(PluginState::Unloaded.event_name(), Some("plugin.unloaded"));
        assert_eq!(PluginState::Registered.event_name(), None);
    }
}
