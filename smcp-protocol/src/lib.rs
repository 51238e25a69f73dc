//! Wire protocol for the search-mcp aggregator.
//!
//! Both sides of the aggregator speak line-delimited JSON-RPC 2.0: the
//! frontend serves an MCP client over stdin/stdout, and each backend child
//! process is driven as an MCP server over its own stdio pair. This crate
//! holds the framing types shared by both directions, the MCP method
//! payloads the aggregator actually uses (`initialize`, `tools/list`,
//! `tools/call`, `ping`), and the typed error taxonomy every failure is
//! funnelled through before it reaches a client.

pub mod error;
pub mod jsonrpc;
pub mod messages;

pub use error::{AggregatorError, AggregatorResult};
pub use jsonrpc::{JsonRpcError, JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
pub use messages::{
    ClientInfo, InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, Tool,
    ToolContent, ToolsCallParams, ToolsCallResult, ToolsCapability, ToolsListResult,
};

/// MCP protocol version spoken on both the frontend and backend channels.
pub const MCP_PROTOCOL_VERSION: &str = "1.0.0";

/// Server identity reported to clients during `initialize`.
pub const SERVER_NAME: &str = "search-mcp";

/// Server version reported to clients during `initialize`.
pub const SERVER_VERSION: &str = "1.0.0";

/// Default timeout for a single backend request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default timeout for spawning and initializing a backend.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
