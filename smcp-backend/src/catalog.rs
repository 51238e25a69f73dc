//! Aggregated tool catalog types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between backend name and raw tool name.
/// Backend names cannot contain it, so the first occurrence always splits
/// a qualified name unambiguously.
pub const NAMESPACE_SEPARATOR: char = '.';

/// A backend tool under its aggregator-wide qualified name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTool {
    /// `<backend>.<rawName>`, unique across the catalog
    #[serde(rename = "qualifiedName")]
    pub qualified_name: String,

    /// Description as reported by the backend
    pub description: String,

    /// Owning backend name
    pub backend: String,

    /// Tool name as the backend knows it
    #[serde(rename = "rawName")]
    pub raw_name: String,

    /// Opaque input schema, when the backend provides one
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Lightweight descriptor for `tools/list`: name and description only,
/// keeping schema bytes out of the client's context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// Build the qualified name for a backend's tool
pub fn qualified_name(backend: &str, raw_name: &str) -> String {
    format!("{}{}{}", backend, NAMESPACE_SEPARATOR, raw_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualified_name_format() {
        assert_eq!(qualified_name("echo", "say"), "echo.say");
        // Dots in the raw name stay verbatim after the first separator
        assert_eq!(qualified_name("fs", "file.read"), "fs.file.read");
    }

    #[test]
    fn test_wire_shape_uses_camel_case() {
        let tool = AggregatedTool {
            qualified_name: "echo.say".to_string(),
            description: "Echo text".to_string(),
            backend: "echo".to_string(),
            raw_name: "say".to_string(),
            input_schema: Some(json!({"type": "object"})),
        };
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["qualifiedName"], "echo.say");
        assert_eq!(value["rawName"], "say");
        assert!(value.get("inputSchema").is_some());
    }
}
