//! Plugin system facade
//!
//! Orchestrates Discovery -> Loader -> Lifecycle -> Security/Isolation and
//! is the single external surface of the runtime. Constructed explicitly
//! from a [`PluginHostConfig`]; there is no process-wide singleton.

use crate::api::ApiRouter;
use crate::config::PluginHostConfig;
use crate::discovery::{PluginDiscovery, ScanReport};
use crate::error::{PluginHostError, Result};
use crate::hooks::EventHookManager;
use crate::isolation::{IsolationManager, SecureProxy};
use crate::lifecycle::{LifecycleManager, PluginState};
use crate::loader::PluginLoader;
use crate::plugin::{PluginConfig, PluginConstructor};
use crate::registry::PluginRegistry;
use crate::security::SecurityManager;
use events_bus::EventBus;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a batch operation: per-id failures never abort the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: HashMap<String, String>,
}

impl BatchReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The plugin runtime's external surface.
pub struct PluginSystem {
    config: PluginHostConfig,
    bus: Arc<EventBus>,
    registry: Arc<PluginRegistry>,
    discovery: PluginDiscovery,
    security: Arc<SecurityManager>,
    isolation: Arc<IsolationManager>,
    loader: PluginLoader,
    lifecycle: LifecycleManager,
    router: ApiRouter,
    hooks: EventHookManager,
}

impl PluginSystem {
    pub fn new(config: PluginHostConfig) -> Self {
        Self::with_bus(config, Arc::new(EventBus::new()))
    }

    /// Build the system on a bus the host shares with other components.
    pub fn with_bus(config: PluginHostConfig, bus: Arc<EventBus>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let security = Arc::new(SecurityManager::new(config.sandbox_root.clone()));
        let isolation = Arc::new(IsolationManager::new(security.clone()));
        let loader = PluginLoader::new(registry.clone(), security.clone(), isolation.clone());
        let lifecycle = LifecycleManager::new(registry.clone(), security.clone(), bus.clone());
        let hooks = EventHookManager::new(bus.clone());

        Self {
            config,
            bus,
            registry,
            discovery: PluginDiscovery::new(),
            security,
            isolation,
            loader,
            lifecycle,
            router: ApiRouter::new(),
            hooks,
        }
    }

    /// Register the constructor for a manifest entry point
    /// (`entryModule::entryClass`).
    pub fn register_factory(
        &self,
        entry_module: &str,
        entry_class: &str,
        constructor: PluginConstructor,
    ) {
        self.loader.register_factory(entry_module, entry_class, constructor);
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Scan the configured plugin directories.
    pub async fn discover_plugins(&self) -> Result<ScanReport> {
        self.discovery.scan(&self.config.plugin_directories).await
    }

    /// `plugin id -> changed?` using the checksums captured at scan time.
    /// A plugin whose directory can no longer be checksummed counts as changed.
    pub async fn check_for_updates(&self) -> HashMap<String, bool> {
        let mut updates = HashMap::new();
        for plugin_id in self.discovery.ids().await {
            let changed = match self.discovery.has_plugin_changed(&plugin_id).await {
                Ok(changed) => changed,
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "update check failed");
                    true
                }
            };
            updates.insert(plugin_id, changed);
        }
        updates
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load one discovered plugin: instantiate, register, and run `on_load`.
    /// Returns the cached instance if the id is already registered.
    pub async fn load_plugin(&self, plugin_id: &str) -> Result<Arc<SecureProxy>> {
        if self.registry.contains(plugin_id).await {
            return self.registry.get(plugin_id).await;
        }

        let metadata = self
            .discovery
            .metadata(plugin_id)
            .await
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        let parameters = self
            .config
            .plugin_parameters
            .get(plugin_id)
            .cloned()
            .unwrap_or_default();
        let trusted = self.config.trusted_plugins.contains(plugin_id);

        let proxy = self
            .loader
            .load(&metadata, PluginConfig::new(parameters), trusted)
            .await?;
        self.lifecycle.load_plugin(plugin_id).await?;
        Ok(proxy)
    }

    /// Load every discovered plugin, dependencies before dependents.
    /// Failures are collected per id; plugins in a dependency cycle are
    /// reported failed and not loaded.
    pub async fn load_all_plugins(&self) -> BatchReport {
        let graph = self.discovery.dependency_graph().await;
        let order = dependency_order(&graph);

        let mut report = BatchReport::default();
        if !order.cyclic.is_empty() {
            warn!(
                cyclic = ?order.cyclic,
                blocked = ?order.blocked,
                "dependency cycle detected"
            );
            let reason = PluginHostError::DependencyCycle(order.cyclic.clone()).to_string();
            for plugin_id in order.cyclic {
                report.failed.insert(plugin_id, reason.clone());
            }
            for plugin_id in order.blocked {
                report
                    .failed
                    .insert(plugin_id, format!("blocked by upstream cycle: {reason}"));
            }
        }

        for plugin_id in order.ordered {
            match self.load_plugin(&plugin_id).await {
                Ok(_) => report.succeeded.push(plugin_id),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "plugin failed to load");
                    report.failed.insert(plugin_id, e.to_string());
                }
            }
        }
        report
    }

    /// Load every discovered plugin advertising `capability`.
    pub async fn load_plugins_with_capability(&self, capability: &str) -> BatchReport {
        let mut report = BatchReport::default();
        for plugin_id in self.discovery.plugins_by_capability(capability).await {
            match self.load_plugin(&plugin_id).await {
                Ok(_) => report.succeeded.push(plugin_id),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "plugin failed to load");
                    report.failed.insert(plugin_id, e.to_string());
                }
            }
        }
        report
    }

    /// Unload then load again from the plugin's discovered path.
    pub async fn reload_plugin(&self, plugin_id: &str) -> Result<Arc<SecureProxy>> {
        let metadata = self
            .discovery
            .metadata(plugin_id)
            .await
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;

        if self.registry.contains(plugin_id).await {
            let state = self.registry.get_state(plugin_id).await?;
            if state == PluginState::Started {
                self.lifecycle.stop_plugin(plugin_id).await?;
            }
            if state == PluginState::Registered {
                // Never made it past registration; drop the entry directly.
                self.registry.unregister(plugin_id).await?;
                self.security.remove_plugin(plugin_id)?;
            } else {
                self.unload_plugin(plugin_id).await?;
            }
        }

        info!(plugin_id, path = %metadata.source_path.display(), "reloading plugin");
        self.load_plugin(plugin_id).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn start_plugin(&self, plugin_id: &str) -> Result<()> {
        self.lifecycle.start_plugin(plugin_id).await
    }

    pub async fn stop_plugin(&self, plugin_id: &str) -> Result<()> {
        self.lifecycle.stop_plugin(plugin_id).await
    }

    /// Unload a plugin and drop everything registered on its behalf:
    /// API endpoints, event subscriptions, sandbox, permissions.
    pub async fn unload_plugin(&self, plugin_id: &str) -> Result<()> {
        self.lifecycle.unload_plugin(plugin_id).await?;
        self.router.unregister_plugin(plugin_id);
        self.hooks.unsubscribe_all(plugin_id);
        Ok(())
    }

    pub async fn plugin_state(&self, plugin_id: &str) -> Result<PluginState> {
        self.registry.get_state(plugin_id).await
    }

    /// Snapshot of every registered plugin's state.
    pub async fn plugin_states(&self) -> HashMap<String, PluginState> {
        self.registry.states().await
    }

    /// Unload every registered plugin, tolerating and logging individual
    /// failures. Every plugin receives an unload attempt.
    pub async fn shutdown(&self) -> BatchReport {
        let mut plugin_ids = self.registry.list().await;
        plugin_ids.sort();

        let mut report = BatchReport::default();
        for plugin_id in plugin_ids {
            match self.shutdown_plugin(&plugin_id).await {
                Ok(()) => report.succeeded.push(plugin_id),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, error = %e, "plugin failed to unload during shutdown");
                    report.failed.insert(plugin_id, e.to_string());
                }
            }
        }
        info!(
            unloaded = report.succeeded.len(),
            failed = report.failed.len(),
            "plugin system shut down"
        );
        report
    }

    async fn shutdown_plugin(&self, plugin_id: &str) -> Result<()> {
        match self.registry.get_state(plugin_id).await? {
            PluginState::Started => {
                self.lifecycle.stop_plugin(plugin_id).await?;
                self.unload_plugin(plugin_id).await
            }
            PluginState::Loaded | PluginState::Stopped => self.unload_plugin(plugin_id).await,
            PluginState::Registered => {
                // Registered but never loaded; nothing to unload.
                self.registry.unregister(plugin_id).await?;
                self.security.remove_plugin(plugin_id)
            }
            PluginState::Unloaded => Ok(()),
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Invoke a plugin action through the isolation proxy, inside the
    /// plugin's sandbox. The sandbox is created on first execution.
    pub async fn execute_plugin_action(
        &self,
        plugin_id: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let proxy = self.registry.get(plugin_id).await?;
        if self.security.sandbox(plugin_id).is_none() {
            self.security.create_sandbox(plugin_id)?;
        }
        self.security
            .execute_in_sandbox(plugin_id, |_sandbox| async move {
                proxy.invoke(action, payload).await
            })
            .await
    }

    /// Call a plugin-registered API endpoint.
    pub fn call_api(
        &self,
        plugin_id: &str,
        name: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.router.call(plugin_id, name, args)
    }

    // =========================================================================
    // Component access for host wiring
    // =========================================================================

    pub fn api(&self) -> &ApiRouter {
        &self.router
    }

    pub fn events(&self) -> &EventHookManager {
        &self.hooks
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn isolation(&self) -> &Arc<IsolationManager> {
        &self.isolation
    }

    pub fn discovery(&self) -> &PluginDiscovery {
        &self.discovery
    }

    pub fn config(&self) -> &PluginHostConfig {
        &self.config
    }
}

/// Result of resolving the declared dependency graph.
#[derive(Debug, Default)]
struct DependencyOrder {
    /// Loadable ids, dependencies before dependents.
    ordered: Vec<String>,
    /// Ids that lie on a dependency cycle.
    cyclic: Vec<String>,
    /// Ids outside any cycle whose dependency chain reaches one.
    blocked: Vec<String>,
}

/// Kahn's algorithm over the declared dependency graph. Dependencies on
/// undiscovered plugins are ignored for ordering; the load attempt itself
/// decides whether that matters.
fn dependency_order(graph: &HashMap<String, Vec<String>>) -> DependencyOrder {
    let mut indegree: HashMap<&str, usize> = graph.keys().map(|id| (id.as_str(), 0)).collect();
    let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();

    for (plugin_id, deps) in graph {
        for dep in deps {
            if graph.contains_key(dep) {
                if let Some(count) = indegree.get_mut(plugin_id.as_str()) {
                    *count += 1;
                }
                dependents_of
                    .entry(dep.as_str())
                    .or_default()
                    .push(plugin_id.as_str());
            }
        }
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort_unstable();

    let mut order = DependencyOrder::default();
    let mut cursor = 0;
    while cursor < ready.len() {
        let current = match ready.get(cursor) {
            Some(id) => *id,
            None => break,
        };
        cursor += 1;
        order.ordered.push(current.to_string());

        if let Some(dependents) = dependents_of.get(current) {
            for dependent in dependents {
                if let Some(count) = indegree.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }
    }

    // Residual nodes either sit on a cycle or merely depend on one; only the
    // former are reported as cycle members.
    let residual: HashSet<&str> = indegree
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(id, _)| *id)
        .collect();
    for node in &residual {
        if on_cycle(node, graph, &residual) {
            order.cyclic.push(node.to_string());
        } else {
            order.blocked.push(node.to_string());
        }
    }
    order.cyclic.sort_unstable();
    order.blocked.sort_unstable();
    order
}

/// True if `start` can reach itself along dependency edges within the
/// residual node set.
fn on_cycle(start: &str, graph: &HashMap<String, Vec<String>>, residual: &HashSet<&str>) -> bool {
    let mut stack: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    if let Some(deps) = graph.get(start) {
        stack.extend(deps.iter().map(String::as_str).filter(|d| residual.contains(d)));
    }
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(deps) = graph.get(node) {
            stack.extend(deps.iter().map(String::as_str).filter(|d| residual.contains(d)));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(id, deps)| {
                (
                    id.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_dependency_order_puts_dependencies_first() {
        let g = graph(&[("app", &["lib", "util"]), ("lib", &["util"]), ("util", &[])]);
        let order = dependency_order(&g);
        assert!(order.cyclic.is_empty());
        assert!(order.blocked.is_empty());

        let position = |id: &str| order.ordered.iter().position(|x| x == id).unwrap();
        assert!(position("util") < position("lib"));
        assert!(position("lib") < position("app"));
    }

    #[test]
    fn test_dependency_cycle_is_isolated() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("standalone", &[])]);
        let order = dependency_order(&g);
        assert_eq!(order.ordered, vec!["standalone"]);
        assert_eq!(order.cyclic, vec!["a", "b"]);
        assert!(order.blocked.is_empty());
    }

    #[test]
    fn test_cycle_dependents_are_blocked_not_cyclic() {
        let g = graph(&[
            ("a", &["b"]),
            ("b", &["a"]),
            ("consumer", &["a"]),
            ("indirect", &["consumer"]),
        ]);
        let order = dependency_order(&g);
        assert!(order.ordered.is_empty());
        assert_eq!(order.cyclic, vec!["a", "b"]);
        assert_eq!(order.blocked, vec!["consumer", "indirect"]);
    }

    #[test]
    fn test_undiscovered_dependencies_are_ignored_for_ordering() {
        let g = graph(&[("app", &["not-installed"])]);
        let order = dependency_order(&g);
        assert_eq!(order.ordered, vec!["app"]);
        assert!(order.cyclic.is_empty());
        assert!(order.blocked.is_empty());
    }
}
