//! JSON-RPC 2.0 message framing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name to call
    pub method: String,

    /// Method parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Request ID for correlation (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a request with a numeric id, as used on backend connections
    pub fn numbered(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self::new(method, params, Some(Value::from(id)))
    }

    /// Create a notification (no id, no response expected)
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::new(method, params, None)
    }

    /// Check if this is a notification
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Successful result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Request ID for correlation
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(result: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(error: JsonRpcError, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Check if this response carries an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the response id as a u64 if it is numeric
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a parse error (unparseable inbound line)
    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(
            JsonRpcErrorCode::ParseError as i32,
            "Parse error",
            Some(Value::String(details.into())),
        )
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound as i32,
            "Method not found",
            Some(Value::String(format!("Method '{}' not found", method))),
        )
    }

    /// Create a server-not-initialized error
    pub fn not_initialized() -> Self {
        Self::new(
            JsonRpcErrorCode::ServerNotInitialized as i32,
            "Server not initialized",
            None,
        )
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Standard JSON-RPC 2.0 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum JsonRpcErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,

    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,

    /// The method does not exist / is not available
    MethodNotFound = -32601,

    /// Invalid method parameter(s)
    InvalidParams = -32602,

    /// Internal JSON-RPC error
    InternalError = -32603,

    /// Application-defined server error
    ServerError = -32000,

    /// Server has not completed `initialize`
    ServerNotInitialized = -32002,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = JsonRpcRequest::numbered("tools/call", Some(json!({"name": "echo.say"})), 7);

        let serialized = serde_json::to_string(&request).unwrap();
        let deserialized: JsonRpcRequest = serde_json::from_str(&serialized).unwrap();

        assert_eq!(request, deserialized);
        assert_eq!(deserialized.id, Some(json!(7)));
        assert!(!deserialized.is_notification());
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcRequest::notification("initialized", None);
        assert!(notification.is_notification());

        let serialized = serde_json::to_string(&notification).unwrap();
        assert!(!serialized.contains("\"id\""));
    }

    #[test]
    fn test_response_success_and_error() {
        let ok = JsonRpcResponse::success(json!({"status": "ok"}), Some(json!(1)));
        assert!(!ok.is_error());
        assert_eq!(ok.numeric_id(), Some(1));

        let err = JsonRpcResponse::error(JsonRpcError::method_not_found("nope"), Some(json!(2)));
        assert!(err.is_error());
        assert_eq!(err.error.unwrap().code, JsonRpcErrorCode::MethodNotFound as i32);
    }

    #[test]
    fn test_response_preserves_string_ids() {
        let line = r#"{"jsonrpc":"2.0","result":{},"id":"abc"}"#;
        let response: JsonRpcResponse = serde_json::from_str(line).unwrap();
        assert_eq!(response.id, Some(json!("abc")));
        assert_eq!(response.numeric_id(), None);
    }
}
