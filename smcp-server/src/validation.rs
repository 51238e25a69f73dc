//! Parameter validation for tool invocations
//!
//! A small JSON-Schema-like constraint language applied to tool parameters
//! before dispatch. Validation is strict: parameters not declared in the
//! schema are rejected rather than ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use smcp_protocol::{AggregatorError, AggregatorResult};

/// Supported parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// Constraint set for one parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParameterType,

    #[serde(default)]
    pub required: bool,

    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// String length or array item-count lower bound
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// String length or array item-count upper bound
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    /// Create a parameter of the given type
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            enum_values: None,
            pattern: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Boolean)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Object)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Validate a parameter map against a schema, collecting every failure
pub fn validate_parameters(args: &Map<String, Value>, specs: &[ParameterSpec]) -> Vec<String> {
    let mut errors = Vec::new();

    for spec in specs {
        match args.get(&spec.name) {
            None => {
                if spec.required {
                    errors.push(format!("Required parameter missing: {}", spec.name));
                }
            }
            Some(value) => validate_value(&mut errors, spec, value),
        }
    }

    // Strict mode: anything not declared is an error
    for key in args.keys() {
        if !specs.iter().any(|spec| &spec.name == key) {
            errors.push(format!("Unknown parameter: {}", key));
        }
    }

    errors
}

/// Validate and wrap failures into a single `ValidationError`
pub fn validate_or_throw(args: &Map<String, Value>, specs: &[ParameterSpec]) -> AggregatorResult<()> {
    let errors = validate_parameters(args, specs);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregatorError::validation_errors(errors))
    }
}

fn validate_value(errors: &mut Vec<String>, spec: &ParameterSpec, value: &Value) {
    match spec.param_type {
        ParameterType::String => {
            let Some(text) = value.as_str() else {
                errors.push(type_mismatch(spec));
                return;
            };
            if let Some(allowed) = &spec.enum_values {
                if !allowed.contains(value) {
                    errors.push(format!(
                        "Parameter {} must be one of: {}",
                        spec.name,
                        render_enum(allowed)
                    ));
                }
            }
            if let Some(pattern) = &spec.pattern {
                match regex::Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(text) {
                            errors.push(format!(
                                "Parameter {} does not match pattern {}",
                                spec.name, pattern
                            ));
                        }
                    }
                    Err(e) => {
                        errors.push(format!("Invalid pattern for parameter {}: {}", spec.name, e));
                    }
                }
            }
            let length = text.chars().count();
            if let Some(min) = spec.min_length {
                if length < min {
                    errors.push(format!(
                        "Parameter {} must be at least {} characters",
                        spec.name, min
                    ));
                }
            }
            if let Some(max) = spec.max_length {
                if length > max {
                    errors.push(format!(
                        "Parameter {} must be at most {} characters",
                        spec.name, max
                    ));
                }
            }
        }
        ParameterType::Number => {
            let Some(number) = value.as_f64() else {
                errors.push(type_mismatch(spec));
                return;
            };
            if number.is_nan() {
                errors.push(format!("Parameter {} must not be NaN", spec.name));
                return;
            }
            if let Some(allowed) = &spec.enum_values {
                if !allowed.contains(value) {
                    errors.push(format!(
                        "Parameter {} must be one of: {}",
                        spec.name,
                        render_enum(allowed)
                    ));
                }
            }
            if let Some(minimum) = spec.minimum {
                if number < minimum {
                    errors.push(format!("Parameter {} must be >= {}", spec.name, minimum));
                }
            }
            if let Some(maximum) = spec.maximum {
                if number > maximum {
                    errors.push(format!("Parameter {} must be <= {}", spec.name, maximum));
                }
            }
        }
        ParameterType::Boolean => {
            if !value.is_boolean() {
                errors.push(type_mismatch(spec));
            }
        }
        ParameterType::Object => {
            if !value.is_object() {
                errors.push(type_mismatch(spec));
            }
        }
        ParameterType::Array => {
            let Some(items) = value.as_array() else {
                errors.push(type_mismatch(spec));
                return;
            };
            if let Some(min) = spec.min_length {
                if items.len() < min {
                    errors.push(format!(
                        "Parameter {} must have at least {} items",
                        spec.name, min
                    ));
                }
            }
            if let Some(max) = spec.max_length {
                if items.len() > max {
                    errors.push(format!(
                        "Parameter {} must have at most {} items",
                        spec.name, max
                    ));
                }
            }
        }
    }
}

fn type_mismatch(spec: &ParameterSpec) -> String {
    format!("Parameter {} must be a {}", spec.name, spec.param_type)
}

fn render_enum(allowed: &[Value]) -> String {
    allowed
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_required_and_unknown_parameters() {
        let specs = vec![ParameterSpec::string("query").required()];

        let errors = validate_parameters(&args(json!({})), &specs);
        assert_eq!(errors, vec!["Required parameter missing: query"]);

        let errors = validate_parameters(&args(json!({"query": "x", "bogus": 1})), &specs);
        assert_eq!(errors, vec!["Unknown parameter: bogus"]);
    }

    #[test]
    fn test_missing_optional_is_skipped() {
        let specs = vec![ParameterSpec::number("limit")];
        assert!(validate_parameters(&args(json!({})), &specs).is_empty());
    }

    #[test]
    fn test_type_mismatches_name_expected_type() {
        let specs = vec![
            ParameterSpec::string("s"),
            ParameterSpec::number("n"),
            ParameterSpec::boolean("b"),
            ParameterSpec::object("o"),
            ParameterSpec::array("a"),
        ];
        let errors = validate_parameters(
            &args(json!({"s": 1, "n": "x", "b": 0, "o": [], "a": {}})),
            &specs,
        );
        assert!(errors.contains(&"Parameter s must be a string".to_string()));
        assert!(errors.contains(&"Parameter n must be a number".to_string()));
        assert!(errors.contains(&"Parameter b must be a boolean".to_string()));
        assert!(errors.contains(&"Parameter o must be a object".to_string()));
        assert!(errors.contains(&"Parameter a must be a array".to_string()));
    }

    #[test]
    fn test_string_constraints() {
        let mut spec = ParameterSpec::string("mode").with_enum(vec![json!("fast"), json!("slow")]);
        spec.min_length = Some(3);
        spec.max_length = Some(8);
        let specs = vec![spec];

        assert!(validate_parameters(&args(json!({"mode": "fast"})), &specs).is_empty());

        let errors = validate_parameters(&args(json!({"mode": "medium"})), &specs);
        assert_eq!(errors, vec!["Parameter mode must be one of: fast, slow"]);
    }

    #[test]
    fn test_pattern_and_invalid_pattern_are_distinct() {
        let mut spec = ParameterSpec::string("id");
        spec.pattern = Some("^[a-z]+$".to_string());
        let errors = validate_parameters(&args(json!({"id": "ABC"})), &[spec]);
        assert_eq!(errors, vec!["Parameter id does not match pattern ^[a-z]+$"]);

        let mut broken = ParameterSpec::string("id");
        broken.pattern = Some("[unclosed".to_string());
        let errors = validate_parameters(&args(json!({"id": "abc"})), &[broken]);
        assert!(errors[0].starts_with("Invalid pattern for parameter id:"));
    }

    #[test]
    fn test_number_bounds() {
        let mut spec = ParameterSpec::number("limit");
        spec.minimum = Some(1.0);
        spec.maximum = Some(100.0);
        let specs = vec![spec];

        assert!(validate_parameters(&args(json!({"limit": 50})), &specs).is_empty());
        assert_eq!(
            validate_parameters(&args(json!({"limit": 0})), &specs),
            vec!["Parameter limit must be >= 1"]
        );
        assert_eq!(
            validate_parameters(&args(json!({"limit": 1000})), &specs),
            vec!["Parameter limit must be <= 100"]
        );
    }

    #[test]
    fn test_array_item_count_bounds() {
        let mut spec = ParameterSpec::array("requests").required();
        spec.min_length = Some(1);
        spec.max_length = Some(2);
        let specs = vec![spec];

        assert_eq!(
            validate_parameters(&args(json!({"requests": []})), &specs),
            vec!["Parameter requests must have at least 1 items"]
        );
        assert_eq!(
            validate_parameters(&args(json!({"requests": [1, 2, 3]})), &specs),
            vec!["Parameter requests must have at most 2 items"]
        );
    }

    #[test]
    fn test_object_rejects_array_and_null() {
        let specs = vec![ParameterSpec::object("arguments")];
        assert!(!validate_parameters(&args(json!({"arguments": []})), &specs).is_empty());
        assert!(!validate_parameters(&args(json!({"arguments": null})), &specs).is_empty());
        assert!(validate_parameters(&args(json!({"arguments": {}})), &specs).is_empty());
    }

    #[test]
    fn test_validate_or_throw_wraps_all_errors() {
        let specs = vec![ParameterSpec::string("query").required()];
        let err = validate_or_throw(&args(json!({"other": 1})), &specs).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        let details = err.details();
        assert_eq!(details["errors"].as_array().unwrap().len(), 2);
    }
}
