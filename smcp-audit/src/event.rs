//! Audit event types and secret redaction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replacement text for redacted values
pub const REDACTED: &str = "***REDACTED***";

/// Key substrings whose values are never persisted
const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "apikey", "api_key"];

/// Audit event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Authentication,
    Authorization,
    ToolExecution,
    RateLimit,
    Configuration,
    System,
}

/// Audit severity levels, ordered info < warn < error < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
    Critical,
}

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

/// Who performed the audited action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: String,

    #[serde(rename = "type")]
    pub actor_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AuditActor {
    /// An API-key-identified caller
    pub fn api_key(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: "api_key".to_string(),
            name: None,
        }
    }

    /// The aggregator process itself
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            actor_type: "system".to_string(),
            name: None,
        }
    }
}

/// What the audited action touched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResource {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AuditResource {
    /// A tool identified by its qualified name
    pub fn tool(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resource_type: "tool".to_string(),
            id: name.clone(),
            name: Some(name),
        }
    }

    /// A backend server
    pub fn server(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resource_type: "server".to_string(),
            id: name.clone(),
            name: Some(name),
        }
    }
}

/// Error information attached to failure events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditError {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One structured, redacted audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonically-unique id, assigned by the logger
    pub id: u64,

    /// RFC-3339 creation time
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub event_type: AuditEventType,

    pub level: AuditLevel,

    pub actor: AuditActor,

    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<AuditResource>,

    pub result: AuditResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AuditEvent {
    /// Create a new event; id 0 is replaced by the logger on acceptance
    pub fn new(
        event_type: AuditEventType,
        level: AuditLevel,
        actor: AuditActor,
        action: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            event_type,
            level,
            actor,
            action: action.into(),
            resource: None,
            result,
            details: None,
            duration: None,
            error: None,
            metadata: None,
        }
    }

    pub fn with_resource(mut self, resource: AuditResource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>, code: Option<String>) -> Self {
        self.error = Some(AuditError {
            message: message.into(),
            code,
            stack: None,
        });
        self
    }
}

fn is_sensitive_key(key: &str, config_change: bool) -> bool {
    let lower = key.to_lowercase();
    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    config_change && (key == "oldValue" || key == "newValue")
}

/// Redact sensitive values in a details map.
///
/// The scan covers the top-level map and one nested level of objects.
/// `config_change` additionally redacts `oldValue`/`newValue`, since
/// configuration values may themselves hold credentials.
pub fn redact_details(details: &mut Value, config_change: bool) {
    let Some(map) = details.as_object_mut() else {
        return;
    };
    for (key, value) in map.iter_mut() {
        if is_sensitive_key(key, config_change) {
            *value = Value::String(REDACTED.to_string());
        } else if let Some(nested) = value.as_object_mut() {
            for (nested_key, nested_value) in nested.iter_mut() {
                if is_sensitive_key(nested_key, config_change) {
                    *nested_value = Value::String(REDACTED.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering() {
        assert!(AuditLevel::Info < AuditLevel::Warn);
        assert!(AuditLevel::Warn < AuditLevel::Error);
        assert!(AuditLevel::Error < AuditLevel::Critical);
    }

    #[test]
    fn test_redacts_sensitive_keys_case_insensitively() {
        let mut details = json!({
            "apiKey": "SECRET",
            "Password": "hunter2",
            "q": "ok"
        });
        redact_details(&mut details, false);

        assert_eq!(details["apiKey"], REDACTED);
        assert_eq!(details["Password"], REDACTED);
        assert_eq!(details["q"], "ok");
    }

    #[test]
    fn test_redacts_one_nested_level() {
        let mut details = json!({
            "parameters": {"accessToken": "abc", "text": "hi"},
            "deep": {"inner": {"secret": "kept-as-is"}}
        });
        redact_details(&mut details, false);

        assert_eq!(details["parameters"]["accessToken"], REDACTED);
        assert_eq!(details["parameters"]["text"], "hi");
        // Two levels down is out of scan range
        assert_eq!(details["deep"]["inner"]["secret"], "kept-as-is");
    }

    #[test]
    fn test_config_change_redacts_old_and_new_values() {
        let mut details = json!({"oldValue": "a", "newValue": "b", "field": "timeout"});
        redact_details(&mut details, true);
        assert_eq!(details["oldValue"], REDACTED);
        assert_eq!(details["newValue"], REDACTED);
        assert_eq!(details["field"], "timeout");

        let mut untouched = json!({"oldValue": "a"});
        redact_details(&mut untouched, false);
        assert_eq!(untouched["oldValue"], "a");
    }

    #[test]
    fn test_event_wire_shape() {
        let event = AuditEvent::new(
            AuditEventType::ToolExecution,
            AuditLevel::Info,
            AuditActor::api_key("key-1"),
            "tools/call",
            AuditResult::Success,
        )
        .with_resource(AuditResource::tool("echo.say"))
        .with_duration(12);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_execution");
        assert_eq!(value["level"], "info");
        assert_eq!(value["result"], "success");
        assert_eq!(value["actor"]["type"], "api_key");
        assert_eq!(value["resource"]["type"], "tool");
        assert_eq!(value["duration"], 12);
        assert!(value.get("error").is_none());
    }
}
