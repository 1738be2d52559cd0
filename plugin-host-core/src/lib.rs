//! Plugin runtime core for the PlugHost Engine
//!
//! A secure, embeddable plugin host providing:
//! - Directory-based plugin discovery with manifest validation and
//!   SHA-256 change detection
//! - A five-state lifecycle (registered, loaded, started, stopped,
//!   unloaded) with hooks and lifecycle events on the shared bus
//! - Capability/permission security with per-plugin sandboxes
//! - Isolation proxies that gate every plugin invocation
//! - An inter-plugin API router and event hook layer
//!
//! # Security Model
//!
//! - Permissions come from the plugin's manifest; the host can grant or
//!   revoke more at runtime, and trusted plugins bypass permission checks
//! - Plugin instances are only reachable through [`SecureProxy`], which
//!   checks the declared permission for each action before dispatch
//! - Each plugin executes inside a dedicated sandbox directory that is
//!   destroyed on unload
//!
//! # Example
//!
//! ```no_run
//! use plugin_host_core::{PluginHostConfig, PluginSystem};
//! use std::sync::Arc;
//!
//! # async fn run() -> plugin_host_core::Result<()> {
//! let config = PluginHostConfig::default().with_plugin_directory("extra-plugins");
//! let system = PluginSystem::new(config);
//!
//! system.register_factory("hello", "HelloPlugin", Arc::new(|id, config| {
//!     Ok(Box::new(hello::HelloPlugin::new(id, config)) as Box<dyn plugin_host_core::Plugin>)
//! }));
//!
//! system.discover_plugins().await?;
//! let report = system.load_all_plugins().await;
//! for plugin_id in &report.succeeded {
//!     system.start_plugin(plugin_id).await?;
//! }
//! # Ok(())
//! # }
//! # mod hello {
//! #     pub struct HelloPlugin;
//! #     impl HelloPlugin {
//! #         pub fn new(_id: String, _config: plugin_host_core::PluginConfig) -> Self { Self }
//! #     }
//! #     #[async_trait::async_trait]
//! #     impl plugin_host_core::Plugin for HelloPlugin {
//! #         fn plugin_id(&self) -> &str { "hello" }
//! #         async fn handle_action(&self, _action: &str, payload: serde_json::Value)
//! #             -> anyhow::Result<serde_json::Value> { Ok(payload) }
//! #     }
//! # }
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod hooks;
pub mod isolation;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod security;
pub mod system;

pub use api::{ApiHandler, ApiRouter, EndpointDoc};
pub use config::PluginHostConfig;
pub use discovery::{ManifestConflict, PluginDiscovery, ScanReport, SkippedManifest};
pub use error::{PluginHostError, Result};
pub use hooks::EventHookManager;
pub use isolation::{IsolatedNamespace, IsolationBackend, IsolationManager, SecureProxy};
pub use lifecycle::{LifecycleManager, PluginState};
pub use loader::PluginLoader;
pub use manifest::{Permission, PluginManifest, PluginMetadata};
pub use plugin::{Plugin, PluginConfig, PluginConstructor};
pub use registry::PluginRegistry;
pub use security::{Sandbox, SecurityManager};
pub use system::{BatchReport, PluginSystem};
