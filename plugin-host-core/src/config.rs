//! Host configuration for the plugin system
//!
//! The plugin system is constructed explicitly from a `PluginHostConfig`
//! (dependency injection, no process-wide singleton). Hosts usually build
//! the config in code; `from_file` loads the same shape from JSON.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginHostConfig {
    /// Root directories scanned for plugin subdirectories
    pub plugin_directories: Vec<PathBuf>,
    /// Directory sandboxes are allocated under
    pub sandbox_root: PathBuf,
    /// Plugin ids exempted from permission checks
    pub trusted_plugins: HashSet<String>,
    /// Per-plugin constructor parameters, keyed by plugin id
    pub plugin_parameters: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            plugin_directories: vec![PathBuf::from("plugins")],
            sandbox_root: std::env::temp_dir().join("plughost-sandboxes"),
            trusted_plugins: HashSet::new(),
            plugin_parameters: HashMap::new(),
        }
    }
}

impl PluginHostConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_plugin_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.plugin_directories.push(directory.into());
        self
    }

    pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = root.into();
        self
    }

    pub fn with_trusted_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.trusted_plugins.insert(plugin_id.into());
        self
    }
}
