//! Backend MCP client
//!
//! One [`BackendClient`] exclusively owns one child process and is the only
//! speaker of the MCP wire protocol with it. A dedicated reader task drains
//! the child's stdout line by line and completes waiters through the pending
//! table; writers share the child's stdin behind an async mutex, so neither
//! side can block the other.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use smcp_config::{expand_env_map, BackendConfig};
use smcp_protocol::{
    AggregatorError, AggregatorResult, JsonRpcRequest, JsonRpcResponse, ToolsListResult,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_STARTUP_TIMEOUT_SECS, MCP_PROTOCOL_VERSION, SERVER_NAME,
    SERVER_VERSION,
};

/// Grace period between closing stdin and sending an OS kill
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Timeouts governing one backend connection
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    /// Covers spawn plus the `initialize` handshake
    pub startup: Duration,

    /// Applies to each request after startup
    pub request: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Connection lifecycle. `Terminated` is absorbing: a dead backend needs a
/// new client instance, never a restart of this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Starting,
    Ready,
    Stopping,
    Terminated,
}

/// One in-flight request waiting for its correlated response
struct PendingRequest {
    method: String,
    started: Instant,
    sender: oneshot::Sender<AggregatorResult<Value>>,
}

/// State shared between the client handle and its reader task
struct ClientShared {
    name: String,
    state: Mutex<ClientState>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl ClientShared {
    /// Route one inbound line from the child's stdout
    async fn handle_line(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(backend = %self.name, error = %e, "skipping unparseable backend line");
                return;
            }
        };

        // Backend-initiated requests and notifications are not supported
        if value.get("method").is_some() {
            tracing::debug!(backend = %self.name, "discarding backend-initiated message");
            return;
        }

        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(backend = %self.name, error = %e, "skipping malformed backend response");
                return;
            }
        };

        let Some(id) = response.numeric_id() else {
            tracing::debug!(backend = %self.name, "discarding response without numeric id");
            return;
        };

        let entry = self.pending.lock().await.remove(&id);
        match entry {
            Some(pending) => {
                tracing::debug!(
                    backend = %self.name,
                    method = %pending.method,
                    duration_ms = pending.started.elapsed().as_millis() as u64,
                    "completed backend request"
                );
                let outcome = match response.error {
                    Some(error) => Err(AggregatorError::ToolExecution {
                        tool: pending.method,
                        reason: error.message,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                // The waiter may already have timed out; that is fine
                let _ = pending.sender.send(outcome);
            }
            None => {
                tracing::debug!(backend = %self.name, id, "discarding response for unknown or expired id");
            }
        }
    }

    /// Enter the terminal state and cancel every outstanding waiter
    async fn terminate(&self) {
        *self.state.lock().await = ClientState::Terminated;
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, p)| p).collect()
        };
        for waiter in drained {
            let _ = waiter.sender.send(Err(AggregatorError::ClientStopped {
                backend: self.name.clone(),
            }));
        }
    }
}

/// Client for one backend MCP server child process
pub struct BackendClient {
    shared: Arc<ClientShared>,
    config: BackendConfig,
    timeouts: ClientTimeouts,
    next_id: AtomicU64,
    stdin: Mutex<Option<BufWriter<ChildStdin>>>,
    child: Mutex<Option<Child>>,
}

impl BackendClient {
    /// Create an unstarted client for the given backend
    pub fn new(name: impl Into<String>, config: BackendConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                name: name.into(),
                state: Mutex::new(ClientState::Unstarted),
                pending: Mutex::new(HashMap::new()),
            }),
            config,
            timeouts,
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(None),
            child: Mutex::new(None),
        }
    }

    /// Backend name, used as the namespace prefix
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ClientState {
        *self.shared.state.lock().await
    }

    /// True iff the process is up and the `initialize` handshake completed
    pub async fn is_running(&self) -> bool {
        matches!(*self.shared.state.lock().await, ClientState::Ready)
    }

    /// Number of requests currently awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Spawn the child process and complete the `initialize` handshake
    pub async fn start(&self) -> AggregatorResult<()> {
        {
            let mut state = self.shared.state.lock().await;
            if *state != ClientState::Unstarted {
                return Err(AggregatorError::BackendStartup {
                    backend: self.shared.name.clone(),
                    reason: format!("cannot start from state {:?}", *state),
                });
            }
            *state = ClientState::Starting;
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(expand_env_map(&self.config.env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.shared.terminate().await;
                return Err(AggregatorError::BackendStartup {
                    backend: self.shared.name.clone(),
                    reason: format!("failed to spawn '{}': {}", self.config.command, e),
                });
            }
        };

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                self.shared.terminate().await;
                return Err(AggregatorError::BackendStartup {
                    backend: self.shared.name.clone(),
                    reason: "failed to capture child stdio".to_string(),
                });
            }
        };

        *self.stdin.lock().await = Some(BufWriter::new(stdin));
        *self.child.lock().await = Some(child);
        self.spawn_reader(stdout);
        self.spawn_stderr_drain(stderr);

        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
            "capabilities": {}
        });
        match self
            .request_with_timeout("initialize", Some(params), self.timeouts.startup)
            .await
        {
            Ok(_) => {
                *self.shared.state.lock().await = ClientState::Ready;
                tracing::info!(backend = %self.shared.name, "backend initialized");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.stop().await;
                Err(AggregatorError::BackendStartup {
                    backend: self.shared.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Stop the backend. Idempotent; outstanding requests are cancelled.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if *state == ClientState::Terminated {
                return;
            }
            *state = ClientState::Stopping;
        }

        // Closing stdin asks a well-behaved backend to exit
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(backend = %self.shared.name, %status, "backend exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(backend = %self.shared.name, error = %e, "failed to await backend exit");
                }
                Err(_) => {
                    tracing::warn!(backend = %self.shared.name, "backend ignored shutdown, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(backend = %self.shared.name, error = %e, "failed to kill backend");
                    }
                }
            }
        }

        self.shared.terminate().await;
    }

    /// Fetch the backend's tool list
    pub async fn list_tools(&self) -> AggregatorResult<ToolsListResult> {
        let result = self.send_request("tools/list", Some(json!({}))).await?;
        serde_json::from_value(result).map_err(|e| {
            AggregatorError::tool_execution("tools/list", format!("malformed tool list: {}", e))
        })
    }

    /// Invoke a tool by its raw (unqualified) name, returning the backend's
    /// result verbatim
    pub async fn call_tool(&self, raw_name: &str, arguments: Option<Value>) -> AggregatorResult<Value> {
        let mut params = json!({"name": raw_name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.send_request("tools/call", Some(params))
            .await
            .map_err(|e| match e {
                AggregatorError::ToolExecution { reason, .. } => AggregatorError::ToolExecution {
                    tool: raw_name.to_string(),
                    reason,
                },
                other => other,
            })
    }

    /// Probe connection health
    pub async fn ping(&self) -> AggregatorResult<Value> {
        self.send_request("ping", None).await
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> AggregatorResult<Value> {
        self.request_with_timeout(method, params, self.timeouts.request)
            .await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> AggregatorResult<Value> {
        {
            let state = self.shared.state.lock().await;
            if !matches!(*state, ClientState::Ready | ClientState::Starting) {
                return Err(AggregatorError::BackendUnavailable {
                    backend: self.shared.name.clone(),
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        self.shared.pending.lock().await.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                started: Instant::now(),
                sender,
            },
        );

        let request = JsonRpcRequest::numbered(method, params, id);
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                self.shared.pending.lock().await.remove(&id);
                return Err(AggregatorError::tool_execution(
                    method,
                    format!("failed to serialize request: {}", e),
                ));
            }
        };

        {
            let mut stdin = self.stdin.lock().await;
            let Some(writer) = stdin.as_mut() else {
                self.shared.pending.lock().await.remove(&id);
                return Err(AggregatorError::ClientStopped {
                    backend: self.shared.name.clone(),
                });
            };
            if let Err(e) = write_line(writer, &line).await {
                drop(stdin);
                tracing::warn!(backend = %self.shared.name, error = %e, "backend stdin write failed");
                self.shared.terminate().await;
                return Err(AggregatorError::ClientStopped {
                    backend: self.shared.name.clone(),
                });
            }
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AggregatorError::ClientStopped {
                backend: self.shared.name.clone(),
            }),
            Err(_) => {
                // Late responses for this id are discarded by the reader
                self.shared.pending.lock().await.remove(&id);
                Err(AggregatorError::BackendTimeout {
                    backend: self.shared.name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    fn spawn_reader(&self, stdout: ChildStdout) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            shared.handle_line(line).await;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(backend = %shared.name, "backend closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(backend = %shared.name, error = %e, "backend stdout read failed");
                        break;
                    }
                }
            }
            shared.terminate().await;
        });
    }

    fn spawn_stderr_drain(&self, stderr: ChildStderr) {
        let name = self.shared.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                eprintln!("[{}] {}", name, line);
            }
        });
    }
}

async fn write_line(writer: &mut BufWriter<ChildStdin>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
