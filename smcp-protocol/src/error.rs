//! Typed error taxonomy for aggregator operations
//!
//! Every failure that can leave the dispatcher is one of these variants.
//! Each carries a stable string code and a structured details map; the
//! JSON-RPC code is derived from the HTTP-equivalent status so clients can
//! pattern-match on `data.code` without parsing messages.

use serde_json::{json, Value};
use thiserror::Error;

use crate::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// Result type for aggregator operations
pub type AggregatorResult<T> = Result<T, AggregatorError>;

/// Typed error for every failure class in the aggregator
#[derive(Error, Debug, Clone)]
pub enum AggregatorError {
    /// Unknown qualified tool name
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// Tool exists but is disabled by configuration
    #[error("Tool disabled: {name}")]
    ToolDisabled { name: String },

    /// Backend returned an error or the wire failed mid-call
    #[error("Tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// Parameter or request-shape check failed
    #[error("{message}")]
    Validation { message: String, errors: Vec<String> },

    /// Per-request timeout expired
    #[error("Request to MCP server timed out: {backend}")]
    BackendTimeout { backend: String, timeout_secs: u64 },

    /// Missing, invalid, expired or disabled API key
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Permission check failed
    #[error("Authorization denied: {reason}")]
    Authorization { reason: String },

    /// Token bucket empty
    #[error("Rate limit exceeded. Retry after {retry_after_secs} seconds.")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Config load/parse/validate failed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No backend registered under the requested prefix
    #[error("MCP server not found: {backend}")]
    ServerNotFound { backend: String },

    /// Backend registered but not running or unreachable
    #[error("MCP server not running: {backend}")]
    BackendUnavailable { backend: String },

    /// Backend failed to spawn or to complete initialize
    #[error("MCP server failed to start: {backend}: {reason}")]
    BackendStartup { backend: String, reason: String },

    /// Backend client was stopped while the request was in flight
    #[error("MCP client stopped: {backend}")]
    ClientStopped { backend: String },
}

impl AggregatorError {
    /// Stable string code carried in the JSON-RPC `data.code` field
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::ToolDisabled { .. } => "TOOL_DISABLED",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::BackendTimeout { .. } => "BACKEND_TIMEOUT",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::ServerNotFound { .. } => "MCP_SERVER_ERROR",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::BackendStartup { .. } => "MCP_SERVER_ERROR",
            Self::ClientStopped { .. } => "CLIENT_STOPPED",
        }
    }

    /// HTTP-equivalent status for this failure class
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ToolNotFound { .. } => 404,
            Self::ToolDisabled { .. } => 403,
            Self::ToolExecution { .. } => 500,
            Self::Validation { .. } => 400,
            Self::BackendTimeout { .. } => 408,
            Self::Authentication { .. } => 401,
            Self::Authorization { .. } => 403,
            Self::RateLimitExceeded { .. } => 429,
            Self::Configuration { .. } => 500,
            Self::ServerNotFound { .. } => 502,
            Self::BackendUnavailable { .. } => 502,
            Self::BackendStartup { .. } => 502,
            Self::ClientStopped { .. } => 502,
        }
    }

    /// Structured details carried in the JSON-RPC `data.details` field
    pub fn details(&self) -> Value {
        match self {
            Self::ToolNotFound { name } | Self::ToolDisabled { name } => json!({"tool": name}),
            Self::ToolExecution { tool, reason } => json!({"tool": tool, "reason": reason}),
            Self::Validation { errors, .. } => json!({"errors": errors}),
            Self::BackendTimeout { backend, timeout_secs } => {
                json!({"server": backend, "timeoutSeconds": timeout_secs})
            }
            Self::Authentication { reason } | Self::Authorization { reason } => {
                json!({"reason": reason})
            }
            Self::RateLimitExceeded { retry_after_secs } => json!({"retryAfter": retry_after_secs}),
            Self::Configuration { message } => json!({"message": message}),
            Self::ServerNotFound { backend }
            | Self::BackendUnavailable { backend }
            | Self::ClientStopped { backend } => json!({"server": backend}),
            Self::BackendStartup { backend, reason } => {
                json!({"server": backend, "reason": reason})
            }
        }
    }

    /// Shape this error as a JSON-RPC error object.
    ///
    /// 400 maps to invalid-params, 404 to method-not-found, everything else
    /// to the generic server error code.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        let code = match self.http_status() {
            400 => JsonRpcErrorCode::InvalidParams as i32,
            404 => JsonRpcErrorCode::MethodNotFound as i32,
            _ => JsonRpcErrorCode::ServerError as i32,
        };
        JsonRpcError::new(
            code,
            self.to_string(),
            Some(json!({"code": self.code(), "details": self.details()})),
        )
    }

    /// Create a validation error with a single message
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            errors: vec![message.clone()],
            message,
        }
    }

    /// Create a validation error from a list of per-parameter failures
    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self::Validation {
            message: format!("Parameter validation failed: {}", errors.join("; ")),
            errors,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a tool execution error
    pub fn tool_execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_to_json_rpc_code_mapping() {
        let validation = AggregatorError::validation("Required parameter missing: name");
        assert_eq!(validation.to_json_rpc_error().code, -32602);

        let not_found = AggregatorError::ToolNotFound {
            name: "echo.say".to_string(),
        };
        assert_eq!(not_found.to_json_rpc_error().code, -32601);

        let unavailable = AggregatorError::ServerNotFound {
            backend: "xyz".to_string(),
        };
        assert_eq!(unavailable.to_json_rpc_error().code, -32000);
    }

    #[test]
    fn test_data_carries_code_and_details() {
        let err = AggregatorError::RateLimitExceeded { retry_after_secs: 3 };
        let rpc = err.to_json_rpc_error();
        let data = rpc.data.unwrap();
        assert_eq!(data["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(data["details"]["retryAfter"], 3);
        assert_eq!(rpc.message, "Rate limit exceeded. Retry after 3 seconds.");
    }

    #[test]
    fn test_unknown_backend_message_is_deterministic() {
        let err = AggregatorError::ServerNotFound {
            backend: "xyz".to_string(),
        };
        assert_eq!(err.to_string(), "MCP server not found: xyz");
        assert_eq!(err.code(), "MCP_SERVER_ERROR");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn test_validation_errors_list() {
        let err = AggregatorError::validation_errors(vec![
            "Required parameter missing: query".to_string(),
            "Unknown parameter: bogus".to_string(),
        ]);
        let details = err.details();
        assert_eq!(details["errors"].as_array().unwrap().len(), 2);
    }
}
