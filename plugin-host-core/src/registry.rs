//! In-memory plugin registry
//!
//! Single source of truth for loaded plugin instances, their metadata, and
//! lifecycle state. Other components reference plugins by id only. All
//! operations take one `RwLock`, so callers never observe a partially
//! updated registry. The registry stores and hands out only proxy-wrapped
//! references; the raw instance never leaves the loader.

use crate::error::{PluginHostError, Result};
use crate::isolation::SecureProxy;
use crate::lifecycle::PluginState;
use crate::manifest::PluginMetadata;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

struct RegistryEntry {
    proxy: Arc<SecureProxy>,
    metadata: PluginMetadata,
    state: PluginState,
}

/// Thread-safe registry of plugin instances.
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin at `Registered`. Fails if the id already exists;
    /// an unloaded id must be re-registered as a fresh entry.
    pub async fn register(
        &self,
        plugin_id: &str,
        proxy: Arc<SecureProxy>,
        metadata: PluginMetadata,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(plugin_id) {
            return Err(PluginHostError::AlreadyRegistered(plugin_id.to_string()));
        }
        debug!(plugin_id, "registering plugin instance");
        entries.insert(
            plugin_id.to_string(),
            RegistryEntry {
                proxy,
                metadata,
                state: PluginState::Registered,
            },
        );
        Ok(())
    }

    pub async fn unregister(&self, plugin_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .remove(plugin_id)
            .map(|_| debug!(plugin_id, "unregistered plugin instance"))
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    /// Proxy-wrapped handle for a registered plugin.
    pub async fn get(&self, plugin_id: &str) -> Result<Arc<SecureProxy>> {
        let entries = self.entries.read().await;
        entries
            .get(plugin_id)
            .map(|e| e.proxy.clone())
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    /// Handle and current state in one atomic read.
    pub async fn get_with_state(&self, plugin_id: &str) -> Result<(Arc<SecureProxy>, PluginState)> {
        let entries = self.entries.read().await;
        entries
            .get(plugin_id)
            .map(|e| (e.proxy.clone(), e.state))
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.entries.read().await.contains_key(plugin_id)
    }

    /// Snapshot of registered plugin ids.
    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Snapshot of every plugin's lifecycle state.
    pub async fn states(&self) -> HashMap<String, PluginState> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state))
            .collect()
    }

    pub async fn metadata(&self, plugin_id: &str) -> Result<PluginMetadata> {
        let entries = self.entries.read().await;
        entries
            .get(plugin_id)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    pub async fn get_state(&self, plugin_id: &str) -> Result<PluginState> {
        let entries = self.entries.read().await;
        entries
            .get(plugin_id)
            .map(|e| e.state)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))
    }

    pub async fn set_state(&self, plugin_id: &str, state: PluginState) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        entry.state = state;
        Ok(())
    }

    /// Compare-and-set state change: succeeds only if the plugin is still in
    /// `from`, keeping per-plugin transitions atomic across hook execution.
    pub async fn transition(
        &self,
        plugin_id: &str,
        from: PluginState,
        to: PluginState,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        if entry.state != from {
            return Err(PluginHostError::InvalidStateTransition {
                plugin: plugin_id.to_string(),
                from: entry.state,
                to,
            });
        }
        debug!(plugin_id, %from, %to, "state transition");
        entry.state = to;
        Ok(())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
