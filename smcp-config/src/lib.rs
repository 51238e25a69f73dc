//! Configuration loading for the search-mcp aggregator.
//!
//! The config file shape is a superset of the `mcpServers` block common MCP
//! clients use, so a user can paste the same JSON they already have. Unknown
//! fields are ignored; the only aggregator-specific field is `enabled`.

pub mod error;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG_PATH";

/// Default config file location relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "./config/mcp-servers.json";

/// Configuration for one backend MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Command to execute
    pub command: String,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables merged over the inherited environment.
    /// Values may reference the aggregator's environment as `${VAR}`.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Whether this backend participates in aggregation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Top-level aggregator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Backend servers keyed by name; the name becomes the namespace prefix
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, BackendConfig>,
}

impl AggregatorConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural rules on backend entries
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, backend) in &self.mcp_servers {
            if name.is_empty() {
                return Err(ConfigError::validation("backend name must not be empty"));
            }
            if name.contains('.') {
                return Err(ConfigError::validation(format!(
                    "backend name '{}' must not contain '.'",
                    name
                )));
            }
            if backend.command.trim().is_empty() {
                return Err(ConfigError::validation(format!(
                    "backend '{}' has an empty command",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Enabled backends only, in arbitrary order
    pub fn enabled_backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.mcp_servers.iter().filter(|(_, b)| b.enabled)
    }
}

/// Resolve the config file path: explicit argument, then `MCP_CONFIG_PATH`,
/// then the default location.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Expand `${VAR}` references in a config value against the aggregator's
/// environment. References to unset variables are preserved literally so a
/// shared config file stays usable across machines.
pub fn expand_env_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(expanded) => result.push_str(&expanded),
                    Err(_) => {
                        tracing::debug!(variable = name, "config references unset variable");
                        result.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference, keep the remainder as-is
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Expand every value in a backend's env map
pub fn expand_env_map(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| (k.clone(), expand_env_value(v)))
        .collect()
}
