//! Plugin loader
//!
//! Resolves a manifest's entry point against the host's compile-time factory
//! registry, instantiates the plugin, and registers the proxy-wrapped
//! instance with the registry. Registration happens only after successful
//! instantiation, so a failed load never leaves a partial entry behind.

use crate::error::{PluginHostError, Result};
use crate::isolation::{IsolationManager, SecureProxy};
use crate::manifest::PluginMetadata;
use crate::plugin::{Plugin, PluginConfig, PluginConstructor};
use crate::registry::PluginRegistry;
use crate::security::SecurityManager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Instantiates plugins from registered entry-point factories.
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    security: Arc<SecurityManager>,
    isolation: Arc<IsolationManager>,
    factories: RwLock<HashMap<String, PluginConstructor>>,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<PluginRegistry>,
        security: Arc<SecurityManager>,
        isolation: Arc<IsolationManager>,
    ) -> Self {
        Self {
            registry,
            security,
            isolation,
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register the constructor for a manifest entry point. This replaces
    /// reflection-based class loading: a manifest's `entryModule` and
    /// `entryClass` resolve to a factory the host compiled in.
    pub fn register_factory(
        &self,
        entry_module: &str,
        entry_class: &str,
        constructor: PluginConstructor,
    ) {
        let key = factory_key(entry_module, entry_class);
        debug!(entry_point = %key, "registering plugin factory");
        self.factories.write().insert(key, constructor);
    }

    /// Instantiate and register the plugin described by `metadata`.
    ///
    /// Idempotent with respect to the registry: loading an id that is
    /// already registered returns the existing handle.
    pub async fn load(
        &self,
        metadata: &PluginMetadata,
        config: PluginConfig,
        trusted: bool,
    ) -> Result<Arc<SecureProxy>> {
        let plugin_id = metadata.id();
        if let Ok(existing) = self.registry.get(plugin_id).await {
            debug!(plugin_id, "plugin already registered, returning existing instance");
            return Ok(existing);
        }

        let key = factory_key(&metadata.manifest.entry_module, &metadata.manifest.entry_class);
        let constructor = self
            .factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| PluginHostError::Load {
                plugin: plugin_id.to_string(),
                reason: format!("no factory registered for entry point `{key}`"),
            })?;

        let instance = constructor(plugin_id.to_string(), config).map_err(|e| {
            PluginHostError::Load {
                plugin: plugin_id.to_string(),
                reason: format!("constructor failed: {e}"),
            }
        })?;
        let instance: Arc<dyn Plugin> = Arc::from(instance);

        self.security
            .register_plugin(plugin_id, metadata.manifest.permission_set(), trusted);
        let proxy = self.isolation.secure_proxy(plugin_id, instance);

        match self
            .registry
            .register(plugin_id, proxy.clone(), metadata.clone())
            .await
        {
            Ok(()) => {
                info!(plugin_id, entry_point = %key, "plugin instantiated and registered");
                Ok(proxy)
            }
            // Lost a registration race: hand back the winner's instance.
            Err(PluginHostError::AlreadyRegistered(_)) => self.registry.get(plugin_id).await,
            Err(e) => Err(e),
        }
    }
}

fn factory_key(entry_module: &str, entry_class: &str) -> String {
    format!("{entry_module}::{entry_class}")
}
