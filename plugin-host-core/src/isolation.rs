//! Plugin isolation: secure proxies and restricted namespaces
//!
//! Every reference to a plugin that leaves the loader is wrapped in a
//! [`SecureProxy`], so permission checks cannot be bypassed by holding a
//! direct instance. Namespace restriction is defense-in-depth, not a hard
//! boundary; the [`IsolationBackend`] seam exists so a process- or
//! WASM-level executor can replace it without changing callers.

use crate::error::{PluginHostError, Result};
use crate::plugin::Plugin;
use crate::security::SecurityManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Built-in operations withheld from isolated namespaces: file, process,
/// and code-execution primitives.
pub const DENIED_OPERATIONS: &[&str] = &[
    "fs.open",
    "fs.write",
    "fs.remove",
    "process.spawn",
    "process.exec",
    "code.eval",
    "code.compile",
    "module.import",
];

/// Restricted execution context for one plugin.
#[derive(Debug, Clone)]
pub struct IsolatedNamespace {
    name: String,
    denied_operations: HashSet<String>,
}

impl IsolatedNamespace {
    pub fn restricted(plugin_id: &str) -> Self {
        Self {
            name: format!("plugin_{plugin_id}"),
            denied_operations: DENIED_OPERATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_operation_allowed(&self, operation: &str) -> bool {
        !self.denied_operations.contains(operation)
    }

    pub fn assert_operation_allowed(&self, plugin_id: &str, operation: &str) -> Result<()> {
        if self.is_operation_allowed(operation) {
            Ok(())
        } else {
            warn!(plugin_id, operation, "namespace denied operation");
            Err(PluginHostError::Permission {
                plugin: plugin_id.to_string(),
                permission: operation.to_string(),
            })
        }
    }
}

/// Strategy for building restricted execution contexts.
pub trait IsolationBackend: Send + Sync {
    fn create_namespace(&self, plugin_id: &str) -> IsolatedNamespace;
}

/// Default backend: namespace restriction by withholding unsafe built-ins.
pub struct NamespaceIsolation;

impl IsolationBackend for NamespaceIsolation {
    fn create_namespace(&self, plugin_id: &str) -> IsolatedNamespace {
        IsolatedNamespace::restricted(plugin_id)
    }
}

/// Permission-checking wrapper around a plugin instance.
///
/// The raw instance lives only here and in the loader; the registry and all
/// external callers see this proxy.
pub struct SecureProxy {
    plugin_id: String,
    inner: Arc<dyn Plugin>,
    security: Arc<SecurityManager>,
}

impl SecureProxy {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Invoke a plugin action, checking the plugin-declared permission for
    /// that action first. Denial raises `Permission` and never reaches the
    /// plugin.
    pub async fn invoke(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if let Some(required) = self.inner.action_permissions().get(action) {
            if !self.security.has_permission(&self.plugin_id, required) {
                warn!(
                    plugin_id = %self.plugin_id,
                    action,
                    permission = %required,
                    "action denied by permission check"
                );
                return Err(PluginHostError::Permission {
                    plugin: self.plugin_id.clone(),
                    permission: required.key().to_string(),
                });
            }
        }

        debug!(plugin_id = %self.plugin_id, action, "invoking plugin action");
        self.inner
            .handle_action(action, payload)
            .await
            .map_err(|source| PluginHostError::Execution {
                plugin: self.plugin_id.clone(),
                action: action.to_string(),
                source,
            })
    }

    /// The unwrapped instance, for lifecycle hook dispatch only.
    pub(crate) fn instance(&self) -> &Arc<dyn Plugin> {
        &self.inner
    }
}

/// Builds proxies and namespaces; depends on the security manager for
/// permission decisions.
pub struct IsolationManager {
    security: Arc<SecurityManager>,
    backend: Box<dyn IsolationBackend>,
}

impl IsolationManager {
    pub fn new(security: Arc<SecurityManager>) -> Self {
        Self::with_backend(security, Box::new(NamespaceIsolation))
    }

    pub fn with_backend(security: Arc<SecurityManager>, backend: Box<dyn IsolationBackend>) -> Self {
        Self { security, backend }
    }

    pub fn secure_proxy(&self, plugin_id: &str, instance: Arc<dyn Plugin>) -> Arc<SecureProxy> {
        Arc::new(SecureProxy {
            plugin_id: plugin_id.to_string(),
            inner: instance,
            security: self.security.clone(),
        })
    }

    pub fn isolated_namespace(&self, plugin_id: &str) -> IsolatedNamespace {
        self.backend.create_namespace(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Permission;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn plugin_id(&self) -> &str {
            "echo"
        }

        fn action_permissions(&self) -> HashMap<String, Permission> {
            HashMap::from([("write".to_string(), Permission::FileWrite)])
        }

        async fn handle_action(
            &self,
            action: &str,
            payload: serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"action": action, "payload": payload}))
        }
    }

    fn isolation() -> (IsolationManager, Arc<SecurityManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let security = Arc::new(SecurityManager::new(dir.path().to_path_buf()));
        (IsolationManager::new(security.clone()), security, dir)
    }

    #[tokio::test]
    async fn test_proxy_denies_undeclared_permission() {
        let (isolation, security, _dir) = isolation();
        security.register_plugin("echo", HashSet::new(), false);
        let proxy = isolation.secure_proxy("echo", Arc::new(EchoPlugin));

        let denied = proxy.invoke("write", json!({})).await;
        assert!(matches!(denied, Err(PluginHostError::Permission { .. })));

        // Actions without a declared permission pass straight through
        let result = proxy.invoke("read", json!({"k": 1})).await.unwrap();
        assert_eq!(result["action"], "read");
    }

    #[tokio::test]
    async fn test_proxy_forwards_once_granted() {
        let (isolation, security, _dir) = isolation();
        security.register_plugin("echo", HashSet::new(), false);
        security.grant_permission("echo", Permission::FileWrite).unwrap();

        let proxy = isolation.secure_proxy("echo", Arc::new(EchoPlugin));
        let result = proxy.invoke("write", json!({"path": "a"})).await.unwrap();
        assert_eq!(result["payload"]["path"], "a");
    }

    #[test]
    fn test_namespace_restrictions() {
        let (isolation, _security, _dir) = isolation();
        let ns = isolation.isolated_namespace("p1");
        assert_eq!(ns.name(), "plugin_p1");
        assert!(!ns.is_operation_allowed("code.eval"));
        assert!(!ns.is_operation_allowed("process.spawn"));
        assert!(ns.is_operation_allowed("string.format"));
        assert!(ns.assert_operation_allowed("p1", "fs.open").is_err());
    }
}
