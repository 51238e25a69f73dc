//! Internal tool adapters
//!
//! These tools live inside the aggregator process and are listed next to
//! the aggregated backend catalog. They read state from the manager, the
//! rate limiter and the audit logger but never mutate backend processes,
//! and they go through the same `tools/call` pipeline as everything else.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smcp_audit::{AuditLogger, AuditQuery};
use smcp_backend::{BackendManager, ToolSummary};
use smcp_protocol::{AggregatorError, AggregatorResult};
use smcp_security::RateLimiter;

use crate::search::{search_catalog, SearchField, SearchMode, SearchOptions};
use crate::validation::{validate_or_throw, ParameterSpec};

const DEFAULT_SEARCH_LIMIT: usize = 50;
const DEFAULT_PARALLEL_CONCURRENCY: usize = 10;
const DEFAULT_PARALLEL_TIMEOUT_MS: u64 = 30_000;

/// Descriptor for one internal tool
pub struct InternalToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSpec>,
}

/// One entry of an `execute_parallel` batch
#[derive(Debug, Clone, Deserialize)]
struct ParallelRequest {
    #[serde(default)]
    id: Option<Value>,

    #[serde(rename = "toolName")]
    tool_name: String,

    #[serde(default)]
    arguments: Option<Value>,
}

/// Outcome of one `execute_parallel` entry
#[derive(Debug, Clone, Serialize)]
struct ParallelItemResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,

    #[serde(rename = "toolName")]
    tool_name: String,

    success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(rename = "executionTime")]
    execution_time_ms: u64,
}

/// Registry and executor for the in-process tools
pub struct InternalTools {
    manager: Arc<BackendManager>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLogger>,
    started_at: Instant,
    specs: Vec<InternalToolSpec>,
}

impl InternalTools {
    pub fn new(
        manager: Arc<BackendManager>,
        limiter: Arc<RateLimiter>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            manager,
            limiter,
            audit,
            started_at: Instant::now(),
            specs: build_specs(),
        }
    }

    /// Name/description pairs for `tools/list`
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.specs
            .iter()
            .map(|spec| ToolSummary {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
            })
            .collect()
    }

    /// Whether a tool name names an internal adapter
    pub fn is_internal(&self, name: &str) -> bool {
        self.specs.iter().any(|spec| spec.name == name)
    }

    /// Validate arguments against the tool's schema and run it
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let spec = self
            .specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| AggregatorError::ToolNotFound {
                name: name.to_string(),
            })?;
        validate_or_throw(args, &spec.parameters)?;

        match name {
            "search_tools" => self.search_tools(args).await,
            "advanced_search" => self.advanced_search(args).await,
            "list_servers" => self.list_servers().await,
            "health_check" => self.health_check(args).await,
            "query_audit_logs" => self.query_audit_logs(args).await,
            "get_audit_stats" => self.get_audit_stats(args).await,
            "get_rate_limit_stats" => self.get_rate_limit_stats().await,
            "execute_parallel" => self.execute_parallel(args).await,
            _ => Err(AggregatorError::ToolNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn search_tools(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let options = parse_search_options(args)?;
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        let tools = self.manager.list_tools_full().await;
        let (total, hits) = search_catalog(&tools, query, &options);

        Ok(json!({
            "total": total,
            "limit": options.limit,
            "offset": options.offset,
            "tools": hits,
        }))
    }

    async fn advanced_search(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let options = parse_search_options(args)?;
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        let server = args.get("serverName").and_then(Value::as_str);

        let mut tools = self.manager.list_tools_full().await;
        if let Some(server) = server {
            tools.retain(|tool| tool.backend == server);
        }
        let (total, hits) = search_catalog(&tools, query, &options);

        Ok(json!({
            "total": total,
            "limit": options.limit,
            "offset": options.offset,
            "tools": hits,
        }))
    }

    async fn list_servers(&self) -> AggregatorResult<Value> {
        let stats = self.manager.get_stats().await;
        serde_json::to_value(stats)
            .map_err(|e| AggregatorError::tool_execution("list_servers", e.to_string()))
    }

    async fn health_check(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let detailed = args.get("detailed").and_then(Value::as_bool).unwrap_or(false);
        let stats = self.manager.get_stats().await;
        let audit_sink_ok = self.audit.file_sink_active();

        let status = if stats.total_servers > 0 && stats.running_servers == 0 {
            "unhealthy"
        } else if stats.running_servers < stats.total_servers || !audit_sink_ok {
            "degraded"
        } else {
            "healthy"
        };

        let mut body = json!({
            "status": status,
            "uptimeSeconds": self.started_at.elapsed().as_secs(),
            "servers": {"total": stats.total_servers, "running": stats.running_servers},
            "tools": stats.total_tools,
            "memory": {"rssBytes": process_memory_bytes()},
            "checks": {
                "backends": if stats.running_servers == stats.total_servers { "ok" } else { "failing" },
                "auditFileSink": if audit_sink_ok { "ok" } else { "degraded" },
            },
        });

        if detailed {
            body["serverDetails"] = serde_json::to_value(&stats.servers)
                .map_err(|e| AggregatorError::tool_execution("health_check", e.to_string()))?;
            body["audit"] = serde_json::to_value(self.audit.get_stats(None).await)
                .map_err(|e| AggregatorError::tool_execution("health_check", e.to_string()))?;
            body["rateLimits"] = serde_json::to_value(self.limiter.get_stats().await)
                .map_err(|e| AggregatorError::tool_execution("health_check", e.to_string()))?;
        }

        Ok(body)
    }

    async fn query_audit_logs(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let query: AuditQuery = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| AggregatorError::validation(format!("Invalid audit query: {}", e)))?;
        let events = self.audit.query(&query).await;
        let total = events.len();
        let events = serde_json::to_value(events)
            .map_err(|e| AggregatorError::tool_execution("query_audit_logs", e.to_string()))?;
        Ok(json!({"total": total, "events": events}))
    }

    async fn get_audit_stats(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let window = args.get("timeWindowMs").and_then(Value::as_u64);
        let stats = self.audit.get_stats(window).await;
        serde_json::to_value(stats)
            .map_err(|e| AggregatorError::tool_execution("get_audit_stats", e.to_string()))
    }

    async fn get_rate_limit_stats(&self) -> AggregatorResult<Value> {
        let stats = self.limiter.get_stats().await;
        serde_json::to_value(stats)
            .map_err(|e| AggregatorError::tool_execution("get_rate_limit_stats", e.to_string()))
    }

    async fn execute_parallel(&self, args: &Map<String, Value>) -> AggregatorResult<Value> {
        let requests: Vec<ParallelRequest> = args
            .get("requests")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                AggregatorError::validation(format!(
                    "Parameter requests items must be {{id?, toolName, arguments?}}: {}",
                    e
                ))
            })?
            .unwrap_or_default();

        let max_concurrency = args
            .get("maxConcurrency")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_PARALLEL_CONCURRENCY)
            .max(1);
        let timeout_ms = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_PARALLEL_TIMEOUT_MS);
        let continue_on_error = args
            .get("continueOnError")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let total = requests.len();
        let mut results: Vec<ParallelItemResult> = Vec::with_capacity(total);

        if continue_on_error {
            // Batched fan-out; a failing item never aborts siblings in flight
            for chunk in requests.chunks(max_concurrency) {
                let outcomes =
                    join_all(chunk.iter().map(|request| self.run_one(request, timeout_ms))).await;
                results.extend(outcomes);
            }
        } else {
            // Sequential so nothing past the first failure is ever scheduled
            for request in &requests {
                let outcome = self.run_one(request, timeout_ms).await;
                let failed = !outcome.success;
                results.push(outcome);
                if failed {
                    break;
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Ok(json!({
            "results": results,
            "stats": {
                "total": total,
                "executed": results.len(),
                "succeeded": succeeded,
                "failed": failed,
            },
        }))
    }

    async fn run_one(&self, request: &ParallelRequest, timeout_ms: u64) -> ParallelItemResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.manager
                .execute_tool(&request.tool_name, request.arguments.clone()),
        )
        .await;

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(result)) => ParallelItemResult {
                id: request.id.clone(),
                tool_name: request.tool_name.clone(),
                success: true,
                result: Some(result),
                error: None,
                execution_time_ms,
            },
            Ok(Err(e)) => ParallelItemResult {
                id: request.id.clone(),
                tool_name: request.tool_name.clone(),
                success: false,
                result: None,
                error: Some(e.to_string()),
                execution_time_ms,
            },
            Err(_) => ParallelItemResult {
                id: request.id.clone(),
                tool_name: request.tool_name.clone(),
                success: false,
                result: None,
                error: Some(format!("Request timed out after {}ms", timeout_ms)),
                execution_time_ms,
            },
        }
    }
}

fn parse_search_options(args: &Map<String, Value>) -> AggregatorResult<SearchOptions> {
    let mode = match args.get("mode") {
        Some(value) => serde_json::from_value::<SearchMode>(value.clone()).map_err(|_| {
            AggregatorError::validation(
                "Parameter mode must be one of: partial, prefix, exact, fuzzy",
            )
        })?,
        None => SearchMode::default(),
    };

    let fields = match args.get("searchFields").and_then(Value::as_array) {
        Some(raw) if !raw.is_empty() => {
            let mut fields = Vec::new();
            for entry in raw {
                let field = serde_json::from_value::<SearchField>(entry.clone()).map_err(|_| {
                    AggregatorError::validation(
                        "Parameter searchFields entries must be one of: name, description",
                    )
                })?;
                fields.push(field);
            }
            fields
        }
        _ => vec![SearchField::Name, SearchField::Description],
    };

    Ok(SearchOptions {
        mode,
        case_sensitive: args
            .get("caseSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        fields,
        limit: args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT),
        offset: args
            .get("offset")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(0),
    })
}

fn search_parameter_specs() -> Vec<ParameterSpec> {
    let mut limit = ParameterSpec::number("limit").with_default(json!(DEFAULT_SEARCH_LIMIT));
    limit.minimum = Some(1.0);
    let mut offset = ParameterSpec::number("offset").with_default(json!(0));
    offset.minimum = Some(0.0);
    vec![
        ParameterSpec::string("query"),
        ParameterSpec::string("mode")
            .with_enum(vec![
                json!("partial"),
                json!("prefix"),
                json!("exact"),
                json!("fuzzy"),
            ])
            .with_default(json!("partial")),
        ParameterSpec::boolean("caseSensitive"),
        ParameterSpec::array("searchFields"),
        limit,
        offset,
    ]
}

fn build_specs() -> Vec<InternalToolSpec> {
    let mut audit_limit = ParameterSpec::number("limit").with_default(json!(100));
    audit_limit.minimum = Some(1.0);
    let mut audit_offset = ParameterSpec::number("offset").with_default(json!(0));
    audit_offset.minimum = Some(0.0);

    let mut parallel_requests = ParameterSpec::array("requests").required();
    parallel_requests.min_length = Some(1);
    let mut parallel_concurrency =
        ParameterSpec::number("maxConcurrency").with_default(json!(DEFAULT_PARALLEL_CONCURRENCY));
    parallel_concurrency.minimum = Some(1.0);
    let mut parallel_timeout =
        ParameterSpec::number("timeout").with_default(json!(DEFAULT_PARALLEL_TIMEOUT_MS));
    parallel_timeout.minimum = Some(1.0);

    vec![
        InternalToolSpec {
            name: "search_tools",
            description: "Search the aggregated tool catalog by name and description",
            parameters: search_parameter_specs(),
        },
        InternalToolSpec {
            name: "advanced_search",
            description: "Search the catalog restricted to a single MCP server",
            parameters: {
                let mut params = search_parameter_specs();
                params.push(ParameterSpec::string("serverName"));
                params
            },
        },
        InternalToolSpec {
            name: "list_servers",
            description: "List configured MCP servers with running state and tool counts",
            parameters: vec![],
        },
        InternalToolSpec {
            name: "health_check",
            description: "Report aggregator health, backend counts and memory usage",
            parameters: vec![ParameterSpec::boolean("detailed")],
        },
        InternalToolSpec {
            name: "query_audit_logs",
            description: "Query recent audit events from the in-memory buffer",
            parameters: vec![
                ParameterSpec::string("startDate"),
                ParameterSpec::string("endDate"),
                ParameterSpec::string("type").with_enum(vec![
                    json!("authentication"),
                    json!("authorization"),
                    json!("tool_execution"),
                    json!("rate_limit"),
                    json!("configuration"),
                    json!("system"),
                ]),
                ParameterSpec::string("level").with_enum(vec![
                    json!("info"),
                    json!("warn"),
                    json!("error"),
                    json!("critical"),
                ]),
                ParameterSpec::string("actorId"),
                ParameterSpec::string("action"),
                ParameterSpec::string("result")
                    .with_enum(vec![json!("success"), json!("failure")]),
                audit_limit,
                audit_offset,
            ],
        },
        InternalToolSpec {
            name: "get_audit_stats",
            description: "Aggregate audit event counts by type, level and result",
            parameters: vec![{
                let mut window = ParameterSpec::number("timeWindowMs");
                window.minimum = Some(1.0);
                window
            }],
        },
        InternalToolSpec {
            name: "get_rate_limit_stats",
            description: "Report active rate-limit buckets and tier configuration",
            parameters: vec![],
        },
        InternalToolSpec {
            name: "execute_parallel",
            description: "Execute a batch of tool calls with bounded concurrency",
            parameters: vec![
                parallel_requests,
                parallel_concurrency,
                parallel_timeout,
                ParameterSpec::boolean("continueOnError").with_default(json!(true)),
            ],
        },
    ]
}

fn process_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|process| process.memory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smcp_audit::AuditLevel;
    use smcp_backend::ClientTimeouts;

    async fn internal_tools() -> InternalTools {
        let audit = Arc::new(AuditLogger::in_memory(AuditLevel::Info).await);
        let manager = Arc::new(BackendManager::new(
            Arc::clone(&audit),
            ClientTimeouts::default(),
        ));
        let limiter = Arc::new(RateLimiter::new());
        InternalTools::new(manager, limiter, audit)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_registry_contains_required_tools() {
        let tools = internal_tools().await;
        let names: Vec<String> = tools.summaries().into_iter().map(|t| t.name).collect();
        for required in [
            "search_tools",
            "advanced_search",
            "list_servers",
            "health_check",
            "query_audit_logs",
            "get_audit_stats",
            "get_rate_limit_stats",
            "execute_parallel",
        ] {
            assert!(names.contains(&required.to_string()), "missing {}", required);
            assert!(tools.is_internal(required));
        }
        assert!(!tools.is_internal("echo.say"));
    }

    #[tokio::test]
    async fn test_unknown_parameter_is_rejected() {
        let tools = internal_tools().await;
        let err = tools
            .execute("list_servers", &args(json!({"bogus": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_search_tools_empty_catalog() {
        let tools = internal_tools().await;
        let result = tools
            .execute("search_tools", &args(json!({"query": "anything"})))
            .await
            .unwrap();
        assert_eq!(result["total"], 0);
    }

    #[tokio::test]
    async fn test_search_tools_rejects_bad_mode() {
        let tools = internal_tools().await;
        let err = tools
            .execute("search_tools", &args(json!({"mode": "telepathic"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_health_check_without_backends_is_healthy() {
        let tools = internal_tools().await;
        let result = tools.execute("health_check", &args(json!({}))).await.unwrap();
        // No backends configured and no file sink requested in tests
        assert_eq!(result["servers"]["total"], 0);
        assert!(result["status"].is_string());

        let detailed = tools
            .execute("health_check", &args(json!({"detailed": true})))
            .await
            .unwrap();
        assert!(detailed.get("serverDetails").is_some());
        assert!(detailed.get("rateLimits").is_some());
    }

    #[tokio::test]
    async fn test_execute_parallel_stops_after_first_failure() {
        let tools = internal_tools().await;
        let result = tools
            .execute(
                "execute_parallel",
                &args(json!({
                    "requests": [
                        {"id": 1, "toolName": "xyz.anything"},
                        {"id": 2, "toolName": "xyz.other"}
                    ],
                    "continueOnError": false
                })),
            )
            .await
            .unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["success"], false);
        assert_eq!(results[0]["toolName"], "xyz.anything");
        assert!(results[0]["error"]
            .as_str()
            .unwrap()
            .contains("MCP server not found"));
        assert_eq!(result["stats"]["total"], 2);
        assert_eq!(result["stats"]["executed"], 1);
    }

    #[tokio::test]
    async fn test_execute_parallel_continue_on_error_runs_all() {
        let tools = internal_tools().await;
        let result = tools
            .execute(
                "execute_parallel",
                &args(json!({
                    "requests": [
                        {"toolName": "xyz.a"},
                        {"toolName": "xyz.b"},
                        {"toolName": "xyz.c"}
                    ],
                    "maxConcurrency": 2
                })),
            )
            .await
            .unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(result["stats"]["failed"], 3);
    }

    #[tokio::test]
    async fn test_execute_parallel_requires_requests() {
        let tools = internal_tools().await;
        let err = tools
            .execute("execute_parallel", &args(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err
            .details()["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e == "Required parameter missing: requests"));
    }

    #[tokio::test]
    async fn test_rate_limit_stats_shape() {
        let tools = internal_tools().await;
        let result = tools
            .execute("get_rate_limit_stats", &args(json!({})))
            .await
            .unwrap();
        assert!(result["tiers"].get("default").is_some());
        assert_eq!(result["activeBuckets"], 0);
    }
}
