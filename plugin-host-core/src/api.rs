//! Inter-plugin API router
//!
//! Namespaced, versioned registry of callable endpoints plugins expose to
//! each other and to the host. Endpoints are keyed `"{plugin_id}.{name}"`;
//! re-registering an existing key overwrites the endpoint and is logged.

use crate::error::{PluginHostError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Endpoint handler. Receives positional JSON arguments.
pub type ApiHandler =
    Arc<dyn Fn(Vec<serde_json::Value>) -> anyhow::Result<serde_json::Value> + Send + Sync>;

struct ApiEndpoint {
    doc: EndpointDoc,
    handler: ApiHandler,
}

/// Self-describing endpoint documentation, exposed via [`ApiRouter::documentation`].
#[derive(Debug, Clone, Serialize)]
pub struct EndpointDoc {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub param_schema: Option<serde_json::Value>,
    pub return_schema: Option<serde_json::Value>,
}

/// Registry and dispatcher for plugin API endpoints.
pub struct ApiRouter {
    endpoints: RwLock<HashMap<String, ApiEndpoint>>,
}

impl ApiRouter {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_endpoint(
        &self,
        plugin_id: &str,
        name: &str,
        handler: ApiHandler,
        version: &str,
        description: &str,
        param_schema: Option<serde_json::Value>,
        return_schema: Option<serde_json::Value>,
    ) {
        let key = endpoint_key(plugin_id, name);
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&key) {
            warn!(endpoint = %key, "overwriting existing API endpoint");
        } else {
            debug!(endpoint = %key, version, "registering API endpoint");
        }
        endpoints.insert(
            key,
            ApiEndpoint {
                doc: EndpointDoc {
                    plugin_id: plugin_id.to_string(),
                    name: name.to_string(),
                    version: version.to_string(),
                    description: description.to_string(),
                    param_schema,
                    return_schema,
                },
                handler,
            },
        );
    }

    /// Invoke an endpoint. Fails with `EndpointNotFound` for unknown keys;
    /// handler errors surface as `Execution`.
    pub fn call(
        &self,
        plugin_id: &str,
        name: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let key = endpoint_key(plugin_id, name);
        let handler = {
            let endpoints = self.endpoints.read();
            endpoints
                .get(&key)
                .map(|e| e.handler.clone())
                .ok_or(PluginHostError::EndpointNotFound(key))?
        };
        handler(args).map_err(|source| PluginHostError::Execution {
            plugin: plugin_id.to_string(),
            action: name.to_string(),
            source,
        })
    }

    /// Remove an endpoint. Returns false if the key was unknown.
    pub fn unregister_endpoint(&self, plugin_id: &str, name: &str) -> bool {
        self.endpoints
            .write()
            .remove(&endpoint_key(plugin_id, name))
            .is_some()
    }

    /// Remove every endpoint a plugin registered. Returns the count removed.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|_, e| e.doc.plugin_id != plugin_id);
        before - endpoints.len()
    }

    /// Endpoint documentation, optionally filtered by owning plugin.
    pub fn documentation(&self, plugin_id: Option<&str>) -> Vec<EndpointDoc> {
        let endpoints = self.endpoints.read();
        let mut docs: Vec<EndpointDoc> = endpoints
            .values()
            .filter(|e| plugin_id.is_none_or(|id| e.doc.plugin_id == id))
            .map(|e| e.doc.clone())
            .collect();
        docs.sort_by(|a, b| (&a.plugin_id, &a.name).cmp(&(&b.plugin_id, &b.name)));
        docs
    }
}

impl Default for ApiRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoint_key(plugin_id: &str, name: &str) -> String {
    format!("{plugin_id}.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sum_handler() -> ApiHandler {
        Arc::new(|args| {
            let total: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(json!(total))
        })
    }

    #[test]
    fn test_register_and_call() {
        let router = ApiRouter::new();
        router.register_endpoint("math", "sum", sum_handler(), "1.0.0", "adds numbers", None, None);

        let result = router.call("math", "sum", vec![json!(2), json!(3)]).unwrap();
        assert_eq!(result, json!(5));
    }

    #[test]
    fn test_unknown_endpoint() {
        let router = ApiRouter::new();
        let result = router.call("nobody", "nothing", vec![]);
        assert!(matches!(result, Err(PluginHostError::EndpointNotFound(_))));
    }

    #[test]
    fn test_duplicate_registration_overwrites() {
        let router = ApiRouter::new();
        router.register_endpoint("p", "fn", Arc::new(|_| Ok(json!("old"))), "1.0.0", "", None, None);
        router.register_endpoint("p", "fn", Arc::new(|_| Ok(json!("new"))), "2.0.0", "", None, None);

        assert_eq!(router.call("p", "fn", vec![]).unwrap(), json!("new"));
        let docs = router.documentation(Some("p"));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.first().unwrap().version, "2.0.0");
    }

    #[test]
    fn test_handler_error_surfaces() {
        let router = ApiRouter::new();
        router.register_endpoint(
            "p",
            "bad",
            Arc::new(|_| anyhow::bail!("handler broke")),
            "1.0.0",
            "",
            None,
            None,
        );
        let result = router.call("p", "bad", vec![]);
        assert!(matches!(result, Err(PluginHostError::Execution { .. })));
    }

    #[test]
    fn test_documentation_filtering_and_unregister() {
        let router = ApiRouter::new();
        router.register_endpoint("a", "one", sum_handler(), "1.0.0", "", None, None);
        router.register_endpoint("a", "two", sum_handler(), "1.0.0", "", None, None);
        router.register_endpoint("b", "one", sum_handler(), "1.0.0", "", None, None);

        assert_eq!(router.documentation(None).len(), 3);
        assert_eq!(router.documentation(Some("a")).len(), 2);

        assert!(router.unregister_endpoint("a", "one"));
        assert!(!router.unregister_endpoint("a", "one"));
        assert_eq!(router.unregister_plugin("a"), 1);
        assert_eq!(router.documentation(Some("a")).len(), 0);
    }
}
