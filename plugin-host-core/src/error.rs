//! Plugin host error types
//!
//! One typed error per failure class in the runtime. Discovery-time manifest
//! errors are recovered locally by the scanner (logged and reported, never
//! raised); everything else surfaces to the caller. Permission and sandbox
//! errors are always surfaced.

use crate::lifecycle::PluginState;
use thiserror::Error;

/// Main plugin host error type
#[derive(Error, Debug)]
pub enum PluginHostError {
    /// Plugin not found in the registry or discovery index
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// A plugin with this id is already registered
    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// Bad or missing manifest fields
    #[error("Plugin configuration error for {plugin}: {reason}")]
    Configuration { plugin: String, reason: String },

    /// Entry-point resolution or instantiation failure
    #[error("Plugin loading failed for {plugin}: {reason}")]
    Load { plugin: String, reason: String },

    /// The requested lifecycle operation is not legal from the current state
    #[error("Invalid state transition for {plugin}: {from} -> {to}")]
    InvalidStateTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    /// A plugin lifecycle hook returned an error; the plugin keeps its prior state
    #[error("Lifecycle hook {hook} failed for {plugin}: {source}")]
    Lifecycle {
        plugin: String,
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    /// A capability check at the isolation proxy denied the call
    #[error("Permission denied for {plugin}: {permission}")]
    Permission { plugin: String, permission: String },

    /// Sandbox directory could not be allocated
    #[error("Sandbox creation failed for {plugin}: {reason}")]
    SandboxCreation { plugin: String, reason: String },

    /// Sandboxed execution was requested before a sandbox existed
    #[error("No sandbox exists for plugin: {0}")]
    SandboxMissing(String),

    /// No endpoint registered under the requested key
    #[error("API endpoint not found: {0}")]
    EndpointNotFound(String),

    /// A plugin action or API handler returned an error
    #[error("Plugin execution failed for {plugin}.{action}: {source}")]
    Execution {
        plugin: String,
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// The declared dependency graph contains a cycle
    #[error("Dependency cycle involving plugins: {0:?}")]
    DependencyCycle(Vec<String>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event bus error
    #[error("Event bus error: {0}")]
    Bus(#[from] events_bus::EventBusError),
}

/// Plugin host result type
pub type Result<T> = std::result::Result<T, PluginHostError>;

impl PluginHostError {
    /// Security-relevant errors must never be swallowed by batch operations.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::Permission { .. } | Self::SandboxCreation { .. } | Self::SandboxMissing(_)
        )
    }
}
