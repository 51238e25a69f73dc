//! Frontend MCP dispatcher
//!
//! A compliant MCP server over stdin/stdout: line-delimited JSON-RPC in,
//! single-line responses out, diagnostics strictly on stderr. Every
//! `tools/call` runs the same pipeline: shape check, authentication, rate
//! limit, authorization, then internal or routed dispatch, with an audit
//! record for each outcome.

use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;

use smcp_audit::{
    AuditActor, AuditEvent, AuditEventType, AuditLevel, AuditLogger, AuditResource, AuditResult,
};
use smcp_backend::BackendManager;
use smcp_protocol::{
    AggregatorError, AggregatorResult, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolsCallParams, ToolsCallResult,
    MCP_PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use smcp_security::{AuthContext, AuthManager, RateLimiter};

use crate::tools::InternalTools;

/// Environment variable carrying the caller's API key when the client
/// cannot attach one to individual requests
pub const API_KEY_ENV: &str = "MCP_API_KEY";

/// Frontend dispatcher over a line-delimited JSON-RPC channel
pub struct Dispatcher {
    manager: Arc<BackendManager>,
    limiter: Arc<RateLimiter>,
    auth: Arc<AuthManager>,
    audit: Arc<AuditLogger>,
    internal: InternalTools,
    initialized: RwLock<bool>,
    config_path: PathBuf,
}

impl Dispatcher {
    /// Wire up the dispatcher with its process-wide collaborators.
    /// Everything is injected; the dispatcher owns no global state.
    pub fn new(
        manager: Arc<BackendManager>,
        limiter: Arc<RateLimiter>,
        auth: Arc<AuthManager>,
        audit: Arc<AuditLogger>,
        config_path: PathBuf,
    ) -> Self {
        let internal = InternalTools::new(
            Arc::clone(&manager),
            Arc::clone(&limiter),
            Arc::clone(&audit),
        );
        Self {
            manager,
            limiter,
            auth,
            audit,
            internal,
            initialized: RwLock::new(false),
            config_path,
        }
    }

    /// Serve MCP over the process stdio
    pub async fn run_stdio(&self) -> AggregatorResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Serve MCP over arbitrary reader/writer pairs.
    ///
    /// Returns when the reader reaches EOF (client shutdown) or the writer
    /// fails (fatal: we can no longer talk to the client).
    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> AggregatorResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::info!("client closed stdin, shutting down");
                    self.shutdown().await;
                    return Ok(());
                }
                Ok(_) => {
                    let Some(response) = self.handle_line(line.trim()).await else {
                        continue;
                    };
                    let serialized = serde_json::to_string(&response).map_err(|e| {
                        AggregatorError::configuration(format!(
                            "failed to serialize response: {}",
                            e
                        ))
                    })?;
                    if let Err(e) = write_response(&mut writer, &serialized).await {
                        tracing::error!(error = %e, "stdout write failed, shutting down");
                        self.shutdown().await;
                        return Err(AggregatorError::configuration(format!(
                            "stdout write failed: {}",
                            e
                        )));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed, shutting down");
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Stop all backends and record the shutdown
    pub async fn shutdown(&self) {
        self.manager.stop_all().await;
        self.audit
            .log(AuditEvent::new(
                AuditEventType::System,
                AuditLevel::Info,
                AuditActor::system(),
                "shutdown",
                AuditResult::Success,
            ))
            .await;
    }

    /// Process one inbound line; `None` means nothing is written back
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        if line.is_empty() {
            return None;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    JsonRpcError::parse_error(e.to_string()),
                    Some(json!(0)),
                ));
            }
        };

        if request.is_notification() {
            tracing::debug!(method = %request.method, "ignoring notification");
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id).await,
            "tools/list" => self.handle_tools_list(id).await,
            "tools/call" => self.handle_tools_call(request.params, id).await,
            "ping" => JsonRpcResponse::success(json!({"status": "ok"}), id),
            other => JsonRpcResponse::error(JsonRpcError::method_not_found(other), id),
        };
        Some(response)
    }

    async fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        {
            let mut initialized = self.initialized.write().await;
            if !*initialized {
                match self.manager.load_config_file(&self.config_path).await {
                    Ok(count) => {
                        tracing::info!(backends = count, config = %self.config_path.display(), "configuration loaded");
                    }
                    Err(e) => {
                        self.audit
                            .log(
                                AuditEvent::new(
                                    AuditEventType::Configuration,
                                    AuditLevel::Error,
                                    AuditActor::system(),
                                    "config_load",
                                    AuditResult::Failure,
                                )
                                .with_error(e.to_string(), Some(e.code().to_string())),
                            )
                            .await;
                        return JsonRpcResponse::error(e.to_json_rpc_error(), id);
                    }
                }
                self.manager.start_all().await;
                *initialized = true;
                self.audit
                    .log(AuditEvent::new(
                        AuditEventType::System,
                        AuditLevel::Info,
                        AuditActor::system(),
                        "startup",
                        AuditResult::Success,
                    ))
                    .await;
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(e) => JsonRpcResponse::error(
                AggregatorError::configuration(e.to_string()).to_json_rpc_error(),
                id,
            ),
        }
    }

    async fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        if !*self.initialized.read().await {
            return JsonRpcResponse::error(JsonRpcError::not_initialized(), id);
        }

        let mut tools = self.internal.summaries();
        tools.extend(self.manager.list_tools().await);
        JsonRpcResponse::success(json!({"tools": tools}), id)
    }

    async fn handle_tools_call(&self, params: Option<Value>, id: Option<Value>) -> JsonRpcResponse {
        if !*self.initialized.read().await {
            return JsonRpcResponse::error(JsonRpcError::not_initialized(), id);
        }

        let started = Instant::now();

        // Shape and name check
        let call: ToolsCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(call)) => call,
            _ => {
                let err = AggregatorError::validation("Required parameter missing: name");
                return JsonRpcResponse::error(err.to_json_rpc_error(), id);
            }
        };
        if call.name.trim().is_empty() {
            let err = AggregatorError::validation("Required parameter missing: name");
            return JsonRpcResponse::error(err.to_json_rpc_error(), id);
        }

        // Authentication builds the context the rate limiter keys on
        let api_key = call
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        let context = match self.auth.validate(api_key.as_deref()).await {
            Ok(context) => context,
            Err(e) => {
                self.audit
                    .log(
                        AuditEvent::new(
                            AuditEventType::Authentication,
                            AuditLevel::Warn,
                            AuditActor::api_key("unknown"),
                            "tools/call",
                            AuditResult::Failure,
                        )
                        .with_resource(AuditResource::tool(&call.name))
                        .with_error(e.to_string(), Some(e.code().to_string())),
                    )
                    .await;
                return JsonRpcResponse::error(e.to_json_rpc_error(), id);
            }
        };

        // Rate limit
        let tier = if context.authenticated {
            "authenticated"
        } else {
            "default"
        };
        let decision = self.limiter.check_limit(&context.api_key_id, tier, 1.0).await;
        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
            self.audit
                .log(
                    AuditEvent::new(
                        AuditEventType::RateLimit,
                        AuditLevel::Warn,
                        AuditActor::api_key(&context.api_key_id),
                        "tools/call",
                        AuditResult::Failure,
                    )
                    .with_resource(AuditResource::tool(&call.name))
                    .with_details(json!({"tier": tier, "retryAfter": retry_after_secs})),
                )
                .await;
            let err = AggregatorError::RateLimitExceeded { retry_after_secs };
            return JsonRpcResponse::error(err.to_json_rpc_error(), id);
        }

        // Authorization
        if self.auth.is_enabled() {
            if let Err(e) = context.require_permission(&format!("tools:{}", call.name)) {
                self.audit
                    .log(
                        AuditEvent::new(
                            AuditEventType::Authorization,
                            AuditLevel::Warn,
                            AuditActor::api_key(&context.api_key_id),
                            "tools/call",
                            AuditResult::Failure,
                        )
                        .with_resource(AuditResource::tool(&call.name))
                        .with_error(e.to_string(), Some(e.code().to_string())),
                    )
                    .await;
                return JsonRpcResponse::error(e.to_json_rpc_error(), id);
            }
        }

        // Internal adapter or routed backend dispatch
        let result = self.dispatch_tool(&call).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.audit_tool_outcome(&context, &call, &result, duration_ms)
            .await;

        match result {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(e) => JsonRpcResponse::error(e.to_json_rpc_error(), id),
        }
    }

    async fn dispatch_tool(&self, call: &ToolsCallParams) -> AggregatorResult<Value> {
        if self.internal.is_internal(&call.name) {
            let args: Map<String, Value> = match &call.arguments {
                None => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(AggregatorError::validation(
                        "Parameter arguments must be a object",
                    ))
                }
            };
            let result = self.internal.execute(&call.name, &args).await?;
            serde_json::to_value(ToolsCallResult::text(&result))
                .map_err(|e| AggregatorError::tool_execution(&call.name, e.to_string()))
        } else {
            self.manager
                .execute_tool(&call.name, call.arguments.clone())
                .await
        }
    }

    async fn audit_tool_outcome(
        &self,
        context: &AuthContext,
        call: &ToolsCallParams,
        result: &AggregatorResult<Value>,
        duration_ms: u64,
    ) {
        let parameters = call.arguments.clone().unwrap_or_else(|| json!({}));
        let event = match result {
            Ok(_) => AuditEvent::new(
                AuditEventType::ToolExecution,
                AuditLevel::Info,
                AuditActor::api_key(&context.api_key_id),
                "tools/call",
                AuditResult::Success,
            ),
            Err(e) => AuditEvent::new(
                AuditEventType::ToolExecution,
                AuditLevel::Error,
                AuditActor::api_key(&context.api_key_id),
                "tools/call",
                AuditResult::Failure,
            )
            .with_error(e.to_string(), Some(e.code().to_string())),
        };
        self.audit
            .log(
                event
                    .with_resource(AuditResource::tool(&call.name))
                    .with_details(json!({"parameters": parameters}))
                    .with_duration(duration_ms),
            )
            .await;
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
