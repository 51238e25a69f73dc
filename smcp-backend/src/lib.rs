//! Backend side of the search-mcp aggregator.
//!
//! A [`BackendClient`] owns one child MCP server process and multiplexes
//! line-delimited JSON-RPC over its stdio: one writer, one reader task, and
//! a pending-request table correlating responses by id. The
//! [`BackendManager`] fans out across all configured backends, folds their
//! tools into one namespaced catalog (`<backend>.<tool>`) and routes calls
//! back to the right child.

pub mod catalog;
pub mod client;
pub mod manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{qualified_name, AggregatedTool, ToolSummary, NAMESPACE_SEPARATOR};
pub use client::{BackendClient, ClientState, ClientTimeouts};
pub use manager::{AggregatorStats, BackendManager, ServerStats};
