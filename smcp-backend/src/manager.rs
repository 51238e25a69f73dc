//! Backend manager: startup fan-out, the aggregated catalog and routing

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use smcp_audit::{AuditActor, AuditEvent, AuditEventType, AuditLevel, AuditLogger, AuditResource, AuditResult};
use smcp_config::AggregatorConfig;
use smcp_protocol::{AggregatorError, AggregatorResult};

use crate::catalog::{qualified_name, AggregatedTool, ToolSummary, NAMESPACE_SEPARATOR};
use crate::client::{BackendClient, ClientTimeouts};

/// Per-backend entry in the stats report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub name: String,
    pub running: bool,
    pub tools: usize,
}

/// Aggregate view over all registered backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorStats {
    #[serde(rename = "totalServers")]
    pub total_servers: usize,

    #[serde(rename = "runningServers")]
    pub running_servers: usize,

    #[serde(rename = "totalTools")]
    pub total_tools: usize,

    pub servers: Vec<ServerStats>,
}

/// Owner of the backend set and the aggregated catalog.
///
/// The catalog is rebuilt as a fresh map and swapped in one assignment, so
/// readers never observe a partially refreshed state.
pub struct BackendManager {
    clients: RwLock<HashMap<String, Arc<BackendClient>>>,
    catalog: RwLock<Arc<HashMap<String, AggregatedTool>>>,
    audit: Arc<AuditLogger>,
    timeouts: ClientTimeouts,
}

impl BackendManager {
    /// Create an empty manager
    pub fn new(audit: Arc<AuditLogger>, timeouts: ClientTimeouts) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            catalog: RwLock::new(Arc::new(HashMap::new())),
            audit,
            timeouts,
        }
    }

    /// Load a config file and register every enabled backend
    pub async fn load_config_file(&self, path: impl AsRef<Path>) -> AggregatorResult<usize> {
        let config = AggregatorConfig::from_file(path)
            .map_err(|e| AggregatorError::configuration(e.to_string()))?;
        Ok(self.register(&config).await)
    }

    /// Register enabled backends from a parsed config, replacing any
    /// previous registration. Returns the number of registered backends.
    pub async fn register(&self, config: &AggregatorConfig) -> usize {
        let mut clients = HashMap::new();
        for (name, backend) in config.enabled_backends() {
            clients.insert(
                name.clone(),
                Arc::new(BackendClient::new(name.clone(), backend.clone(), self.timeouts)),
            );
        }
        let count = clients.len();
        *self.clients.write().await = clients;
        count
    }

    /// Start all registered backends in parallel, then build the catalog.
    ///
    /// A backend failing to start is contained: it is logged and audited,
    /// its tools stay absent from the catalog, and the rest keep going.
    pub async fn start_all(&self) {
        let clients: Vec<Arc<BackendClient>> =
            self.clients.read().await.values().cloned().collect();

        let results = join_all(clients.iter().map(|client| async move {
            (client.name().to_string(), client.start().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::error!(backend = %name, error = %e, "backend failed to start");
                self.audit
                    .log(
                        AuditEvent::new(
                            AuditEventType::System,
                            AuditLevel::Error,
                            AuditActor::system(),
                            "backend_startup",
                            AuditResult::Failure,
                        )
                        .with_resource(AuditResource::server(&name))
                        .with_error(e.to_string(), Some(e.code().to_string())),
                    )
                    .await;
            }
        }

        self.refresh_tools().await;
    }

    /// Stop every backend in parallel and clear the catalog
    pub async fn stop_all(&self) {
        let clients: Vec<Arc<BackendClient>> =
            self.clients.read().await.values().cloned().collect();
        join_all(clients.iter().map(|client| client.stop())).await;
        *self.catalog.write().await = Arc::new(HashMap::new());
    }

    /// Re-query every live backend and swap in a freshly built catalog
    pub async fn refresh_tools(&self) {
        let clients: Vec<Arc<BackendClient>> =
            self.clients.read().await.values().cloned().collect();

        let listings = join_all(clients.iter().map(|client| async move {
            if !client.is_running().await {
                return None;
            }
            Some((client.name().to_string(), client.list_tools().await))
        }))
        .await;

        let mut catalog = HashMap::new();
        for entry in listings.into_iter().flatten() {
            let (backend, listing) = entry;
            match listing {
                Ok(listing) => {
                    for tool in listing.tools {
                        let qualified = qualified_name(&backend, &tool.name);
                        catalog.insert(
                            qualified.clone(),
                            AggregatedTool {
                                qualified_name: qualified,
                                description: tool.description,
                                backend: backend.clone(),
                                raw_name: tool.name,
                                input_schema: tool.input_schema,
                            },
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(backend = %backend, error = %e, "tool listing failed");
                    self.audit
                        .log(
                            AuditEvent::new(
                                AuditEventType::System,
                                AuditLevel::Error,
                                AuditActor::system(),
                                "tool_refresh",
                                AuditResult::Failure,
                            )
                            .with_resource(AuditResource::server(&backend))
                            .with_error(e.to_string(), Some(e.code().to_string())),
                        )
                        .await;
                }
            }
        }

        let total = catalog.len();
        *self.catalog.write().await = Arc::new(catalog);
        tracing::info!(tools = total, "catalog refreshed");
    }

    /// Cheap snapshot of the current catalog
    pub async fn catalog_snapshot(&self) -> Arc<HashMap<String, AggregatedTool>> {
        Arc::clone(&*self.catalog.read().await)
    }

    /// Lightweight descriptors for `tools/list`, sorted for stable output
    pub async fn list_tools(&self) -> Vec<ToolSummary> {
        let catalog = self.catalog_snapshot().await;
        let mut summaries: Vec<ToolSummary> = catalog
            .values()
            .map(|tool| ToolSummary {
                name: tool.qualified_name.clone(),
                description: tool.description.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Full descriptors including backend, raw name and input schema
    pub async fn list_tools_full(&self) -> Vec<AggregatedTool> {
        let catalog = self.catalog_snapshot().await;
        let mut tools: Vec<AggregatedTool> = catalog.values().cloned().collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }

    /// Route a qualified tool call to its backend.
    ///
    /// The prefix before the first `.` names the backend; the suffix is
    /// passed verbatim as the backend's tool name.
    pub async fn execute_tool(
        &self,
        qualified: &str,
        arguments: Option<Value>,
    ) -> AggregatorResult<Value> {
        let Some((backend, raw_name)) = qualified.split_once(NAMESPACE_SEPARATOR) else {
            return Err(AggregatorError::validation(format!(
                "Invalid tool name: {} (expected <server>.<tool>)",
                qualified
            )));
        };
        if backend.is_empty() || raw_name.is_empty() {
            return Err(AggregatorError::validation(format!(
                "Invalid tool name: {} (expected <server>.<tool>)",
                qualified
            )));
        }

        let client = {
            let clients = self.clients.read().await;
            clients.get(backend).cloned()
        };
        let Some(client) = client else {
            return Err(AggregatorError::ServerNotFound {
                backend: backend.to_string(),
            });
        };
        if !client.is_running().await {
            return Err(AggregatorError::BackendUnavailable {
                backend: backend.to_string(),
            });
        }

        client.call_tool(raw_name, arguments).await
    }

    /// Aggregate counters for `list_servers` and `health_check`
    pub async fn get_stats(&self) -> AggregatorStats {
        let catalog = self.catalog_snapshot().await;
        let mut per_backend: HashMap<&str, usize> = HashMap::new();
        for tool in catalog.values() {
            *per_backend.entry(tool.backend.as_str()).or_default() += 1;
        }

        let clients = self.clients.read().await;
        let mut servers = Vec::with_capacity(clients.len());
        let mut running = 0;
        for (name, client) in clients.iter() {
            let is_running = client.is_running().await;
            if is_running {
                running += 1;
            }
            servers.push(ServerStats {
                name: name.clone(),
                running: is_running,
                tools: per_backend.get(name.as_str()).copied().unwrap_or(0),
            });
        }
        servers.sort_by(|a, b| a.name.cmp(&b.name));

        AggregatorStats {
            total_servers: clients.len(),
            running_servers: running,
            total_tools: catalog.len(),
            servers,
        }
    }

    /// Look up a backend client by name
    pub async fn client(&self, backend: &str) -> Option<Arc<BackendClient>> {
        self.clients.read().await.get(backend).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{broken_backend_config, fake_backend_config};
    use serde_json::json;
    use smcp_audit::AuditQuery;
    use std::time::Duration;

    async fn manager_with(backends: Vec<(&str, smcp_config::BackendConfig)>) -> BackendManager {
        let audit = Arc::new(AuditLogger::in_memory(AuditLevel::Info).await);
        let manager = BackendManager::new(
            audit,
            ClientTimeouts {
                startup: Duration::from_secs(5),
                request: Duration::from_secs(5),
            },
        );
        let config = AggregatorConfig {
            mcp_servers: backends
                .into_iter()
                .map(|(name, backend)| (name.to_string(), backend))
                .collect(),
        };
        manager.register(&config).await;
        manager
    }

    #[tokio::test]
    async fn test_start_all_builds_namespaced_catalog() {
        let manager = manager_with(vec![("echo", fake_backend_config())]).await;
        manager.start_all().await;

        let tools = manager.list_tools().await;
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo.say", "echo.shout"]);

        let full = manager.list_tools_full().await;
        assert_eq!(full[0].backend, "echo");
        assert_eq!(full[0].raw_name, "say");

        manager.stop_all().await;
        assert!(manager.list_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_backend_is_contained_and_audited() {
        let audit = Arc::new(AuditLogger::in_memory(AuditLevel::Info).await);
        let manager = BackendManager::new(
            Arc::clone(&audit),
            ClientTimeouts {
                startup: Duration::from_secs(5),
                request: Duration::from_secs(5),
            },
        );
        let config = AggregatorConfig {
            mcp_servers: HashMap::from([
                ("good".to_string(), fake_backend_config()),
                ("bad".to_string(), broken_backend_config()),
            ]),
        };
        manager.register(&config).await;
        manager.start_all().await;

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_servers, 2);
        assert_eq!(stats.running_servers, 1);
        assert_eq!(stats.total_tools, 2);

        // The failure left an audit trail
        let events = audit
            .query(&AuditQuery {
                action: Some("backend_startup".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource.as_ref().unwrap().id, "bad");

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_execute_tool_routes_by_prefix() {
        let manager = manager_with(vec![("echo", fake_backend_config())]).await;
        manager.start_all().await;

        let result = manager
            .execute_tool("echo.say", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_execute_tool_rejects_bad_names() {
        let manager = manager_with(vec![]).await;

        let err = manager.execute_tool("noseparator", None).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = manager.execute_tool(".say", None).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = manager.execute_tool("xyz.anything", None).await.unwrap_err();
        assert_eq!(err.code(), "MCP_SERVER_ERROR");
        assert_eq!(err.to_string(), "MCP server not found: xyz");
    }

    #[tokio::test]
    async fn test_execute_tool_on_stopped_backend_is_unavailable() {
        let manager = manager_with(vec![("echo", fake_backend_config())]).await;
        manager.start_all().await;
        manager.stop_all().await;

        let err = manager.execute_tool("echo.say", None).await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_UNAVAILABLE");
    }
}
