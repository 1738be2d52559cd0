//! Plugin security and permission management
//!
//! Owns per-plugin permission sets, trust flags, and sandbox handles.
//! Permission checks are advisory unless every call path into plugin code
//! is routed through `execute_in_sandbox` / the isolation proxy, which is
//! exactly how the facade routes them.

use crate::error::{PluginHostError, Result};
use crate::manifest::Permission;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Isolated working context allocated per plugin. One sandbox per plugin,
/// created on first execution and destroyed explicitly; never reused across
/// plugins.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub plugin_id: String,
    pub directory: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SecurityRecord {
    permissions: HashSet<Permission>,
    trusted: bool,
}

/// Security manager for plugin permissions and sandboxes.
pub struct SecurityManager {
    records: DashMap<String, SecurityRecord>,
    sandboxes: DashMap<String, Sandbox>,
    sandbox_root: PathBuf,
}

impl SecurityManager {
    pub fn new(sandbox_root: PathBuf) -> Self {
        Self {
            records: DashMap::new(),
            sandboxes: DashMap::new(),
            sandbox_root,
        }
    }

    /// Register a plugin's declared permissions and trust flag.
    pub fn register_plugin(
        &self,
        plugin_id: &str,
        declared: HashSet<Permission>,
        trusted: bool,
    ) {
        if trusted {
            info!(plugin_id, "registering trusted plugin");
        } else {
            debug!(plugin_id, permissions = declared.len(), "registering plugin permissions");
        }
        self.records.insert(
            plugin_id.to_string(),
            SecurityRecord {
                permissions: declared,
                trusted,
            },
        );
    }

    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.records.contains_key(plugin_id)
    }

    pub fn is_trusted(&self, plugin_id: &str) -> bool {
        self.records
            .get(plugin_id)
            .map(|r| r.trusted)
            .unwrap_or(false)
    }

    /// A trusted plugin holds every permission unconditionally; otherwise the
    /// answer reflects exactly the declared/granted/revoked set.
    pub fn has_permission(&self, plugin_id: &str, permission: &Permission) -> bool {
        match self.records.get(plugin_id) {
            Some(record) => record.trusted || record.permissions.contains(permission),
            None => false,
        }
    }

    pub fn grant_permission(&self, plugin_id: &str, permission: Permission) -> Result<()> {
        let mut record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        info!(plugin_id, permission = %permission, "granting permission");
        record.permissions.insert(permission);
        Ok(())
    }

    pub fn revoke_permission(&self, plugin_id: &str, permission: &Permission) -> Result<()> {
        let mut record = self
            .records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        info!(plugin_id, permission = %permission, "revoking permission");
        record.permissions.remove(permission);
        Ok(())
    }

    /// Current effective permission set (empty for unknown plugins).
    pub fn permissions(&self, plugin_id: &str) -> HashSet<Permission> {
        self.records
            .get(plugin_id)
            .map(|r| r.permissions.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Sandboxes
    // =========================================================================

    /// Allocate the plugin's sandbox directory. Returns the existing sandbox
    /// if one was already created.
    pub fn create_sandbox(&self, plugin_id: &str) -> Result<Sandbox> {
        if let Some(existing) = self.sandboxes.get(plugin_id) {
            return Ok(existing.clone());
        }

        let directory = self.sandbox_root.join(format!("plugin_{plugin_id}"));
        std::fs::create_dir_all(&directory).map_err(|e| PluginHostError::SandboxCreation {
            plugin: plugin_id.to_string(),
            reason: e.to_string(),
        })?;

        let sandbox = Sandbox {
            plugin_id: plugin_id.to_string(),
            directory,
            created_at: Utc::now(),
        };
        info!(plugin_id, directory = %sandbox.directory.display(), "sandbox created");
        self.sandboxes.insert(plugin_id.to_string(), sandbox.clone());
        Ok(sandbox)
    }

    pub fn sandbox(&self, plugin_id: &str) -> Option<Sandbox> {
        self.sandboxes.get(plugin_id).map(|s| s.clone())
    }

    /// Remove the sandbox directory and forget the handle. A plugin without
    /// a sandbox is not an error here; destruction is idempotent.
    pub fn destroy_sandbox(&self, plugin_id: &str) -> Result<()> {
        let Some((_, sandbox)) = self.sandboxes.remove(plugin_id) else {
            debug!(plugin_id, "no sandbox to destroy");
            return Ok(());
        };

        if sandbox.directory.exists() {
            std::fs::remove_dir_all(&sandbox.directory)?;
        }
        info!(plugin_id, "sandbox destroyed");
        Ok(())
    }

    /// Single choke point through which sandboxed plugin work executes.
    /// Fails if no sandbox exists; otherwise delegates to `f` and returns
    /// its result unchanged.
    pub async fn execute_in_sandbox<F, Fut, R>(&self, plugin_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(Sandbox) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let sandbox = self
            .sandbox(plugin_id)
            .ok_or_else(|| PluginHostError::SandboxMissing(plugin_id.to_string()))?;
        f(sandbox).await
    }

    /// Tear down everything the manager holds for a plugin.
    pub fn remove_plugin(&self, plugin_id: &str) -> Result<()> {
        if let Err(e) = self.destroy_sandbox(plugin_id) {
            warn!(plugin_id, error = %e, "sandbox teardown failed");
            return Err(e);
        }
        self.records.remove(plugin_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (SecurityManager, TempDir) {
        let dir = TempDir::new().unwrap();
        (SecurityManager::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn test_trusted_plugin_holds_every_permission() {
        let (security, _dir) = manager();
        security.register_plugin("p1", HashSet::new(), true);

        for permission in [
            Permission::FileWrite,
            Permission::System,
            Permission::Custom("anything.at.all".to_string()),
        ] {
            assert!(security.has_permission("p1", &permission));
        }
    }

    #[tokio::test]
    async fn test_grant_then_revoke_restores_answer() {
        let (security, _dir) = manager();
        security.register_plugin("p1", HashSet::from([Permission::FileRead]), false);

        assert!(security.has_permission("p1", &Permission::FileRead));
        assert!(!security.has_permission("p1", &Permission::Network));

        security.grant_permission("p1", Permission::Network).unwrap();
        assert!(security.has_permission("p1", &Permission::Network));

        security.revoke_permission("p1", &Permission::Network).unwrap();
        assert!(!security.has_permission("p1", &Permission::Network));
    }

    #[tokio::test]
    async fn test_unknown_plugin_has_no_permissions() {
        let (security, _dir) = manager();
        assert!(!security.has_permission("ghost", &Permission::FileRead));
        assert!(security.grant_permission("ghost", Permission::FileRead).is_err());
    }

    #[tokio::test]
    async fn test_execute_in_sandbox_requires_sandbox() {
        let (security, _dir) = manager();
        security.register_plugin("p1", HashSet::new(), false);

        let denied = security
            .execute_in_sandbox("p1", |_sandbox| async { Ok(42) })
            .await;
        assert!(matches!(denied, Err(PluginHostError::SandboxMissing(_))));

        let sandbox = security.create_sandbox("p1").unwrap();
        assert!(sandbox.directory.exists());

        let result = security
            .execute_in_sandbox("p1", |sb| async move {
                assert_eq!(sb.plugin_id, "p1");
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_sandbox_destroy_removes_directory() {
        let (security, _dir) = manager();
        let sandbox = security.create_sandbox("p1").unwrap();
        // Creating again returns the same handle
        assert_eq!(security.create_sandbox("p1").unwrap().directory, sandbox.directory);

        security.destroy_sandbox("p1").unwrap();
        assert!(!sandbox.directory.exists());
        assert!(security.sandbox("p1").is_none());

        // Idempotent
        security.destroy_sandbox("p1").unwrap();
    }
}
