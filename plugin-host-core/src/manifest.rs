//! Plugin manifests and derived metadata
//!
//! A manifest is the declarative JSON description of a plugin: identity,
//! entry point, capabilities, permissions, and dependencies. Manifests are
//! immutable once parsed and re-parsed on every discovery pass.

use crate::error::{PluginHostError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Security-relevant grant checked before a plugin action is allowed.
///
/// Built-in kinds cover the common cases; the set is open, so unknown keys
/// round-trip through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Permission {
    FileRead,
    FileWrite,
    Network,
    ApiAccess,
    UserData,
    System,
    Custom(String),
}

impl Permission {
    pub fn from_key(key: &str) -> Self {
        match key {
            "file.read" => Self::FileRead,
            "file.write" => Self::FileWrite,
            "network" => Self::Network,
            "api.access" => Self::ApiAccess,
            "user.data" => Self::UserData,
            "system" => Self::System,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::FileRead => "file.read",
            Self::FileWrite => "file.write",
            Self::Network => "network",
            Self::ApiAccess => "api.access",
            Self::UserData => "user.data",
            Self::System => "system",
            Self::Custom(key) => key,
        }
    }
}

impl From<String> for Permission {
    fn from(key: String) -> Self {
        Self::from_key(&key)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.key().to_string()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Parsed plugin manifest (`manifest.json` / `plugin.json` / `*.manifest.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Globally unique plugin identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Semver version string
    pub version: String,
    /// Short description
    pub description: String,
    /// Module containing the entry class
    pub entry_module: String,
    /// Entry class constructed as `(plugin_id, config)`
    pub entry_class: String,
    /// Advertised capabilities, used for capability-based selection
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Declared permission keys
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Plugin id -> version constraint
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

impl PluginManifest {
    /// Validate the required fields beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("id", &self.id),
            ("name", &self.name),
            ("version", &self.version),
            ("description", &self.description),
            ("entryModule", &self.entry_module),
            ("entryClass", &self.entry_class),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PluginHostError::Configuration {
                    plugin: self.id.clone(),
                    reason: format!("required manifest field `{field}` is empty"),
                });
            }
        }

        if !version_is_sane(&self.version) {
            return Err(PluginHostError::Configuration {
                plugin: self.id.clone(),
                reason: format!("version `{}` is not a semver string", self.version),
            });
        }

        Ok(())
    }

    /// Declared permissions as a typed set.
    pub fn permission_set(&self) -> HashSet<Permission> {
        self.permissions
            .iter()
            .map(|key| Permission::from_key(key))
            .collect()
    }
}

/// Manifest plus the fields Discovery derives from the plugin directory.
///
/// Owned by Discovery, ephemeral: rebuilt wholesale on every scan, never
/// mutated in place. Copied into the registry at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub manifest: PluginManifest,
    /// Directory the manifest was discovered in
    pub source_path: PathBuf,
    /// Hex SHA-256 over the plugin directory contents
    pub checksum: String,
    pub discovered_at: DateTime<Utc>,
}

impl PluginMetadata {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// Minimal semver shape check: at least `major.minor` with numeric segments.
fn version_is_sane(version: &str) -> bool {
    let mut parts = version.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        return false;
    };
    // Patch may carry a pre-release suffix; only the leading segments must parse.
    major.parse::<u64>().is_ok() && minor.parse::<u64>().is_ok()
}
