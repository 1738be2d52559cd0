//! The plugin entry-point contract
//!
//! Plugins are ordinary Rust types implementing [`Plugin`], constructed
//! through a registered [`PluginConstructor`] with `(plugin_id, config)`.
//! All lifecycle hooks are optional (default to no-ops); hook and action
//! errors are plugin-author-facing `anyhow` results, wrapped into typed
//! host errors at the runtime boundary.

use crate::manifest::Permission;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Contract every plugin instance fulfils.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The id this instance was constructed with.
    fn plugin_id(&self) -> &str;

    /// Invoked before the plugin enters `Loaded`.
    async fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked before the plugin enters `Started`.
    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked before the plugin enters `Stopped`.
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked before the plugin is unloaded and its records destroyed.
    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Explicit action -> permission map consulted by the isolation proxy.
    ///
    /// Actions absent from the map require no permission. The mapping is
    /// declared, never inferred from names.
    fn action_permissions(&self) -> HashMap<String, Permission> {
        HashMap::new()
    }

    /// Execute a named action. This is the only call path into plugin
    /// behavior; external callers reach it through the secure proxy.
    async fn handle_action(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Constructor parameters handed to a plugin at instantiation.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    pub parameters: HashMap<String, serde_json::Value>,
}

impl PluginConfig {
    pub fn new(parameters: HashMap<String, serde_json::Value>) -> Self {
        Self { parameters }
    }
}

/// Factory producing a plugin instance for `(plugin_id, config)`.
///
/// Hosts register one constructor per manifest entry point
/// (`entryModule::entryClass`); this is the compile-time replacement for
/// reflection-based dynamic loading.
pub type PluginConstructor =
    Arc<dyn Fn(String, PluginConfig) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;
