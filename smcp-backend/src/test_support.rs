//! Shared fixtures for backend tests

use smcp_config::BackendConfig;

/// Scripted MCP backend answering initialize, tools/list and one tools/call
/// in request-id order, then holding stdin open until it is closed.
pub(crate) const FAKE_BACKEND_SCRIPT: &str = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","result":{"protocolVersion":"1.0.0","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1.0.0"}},"id":1}'; read line; printf '%s\n' '{"jsonrpc":"2.0","result":{"tools":[{"name":"say","description":"Echo text"},{"name":"shout","description":"Echo loudly"}]},"id":2}'; read line; printf '%s\n' '{"jsonrpc":"2.0","result":{"content":[{"type":"text","text":"hi"}]},"id":3}'; cat >/dev/null"#;

/// Backend config running the scripted backend through `sh`
pub(crate) fn fake_backend_config() -> BackendConfig {
    BackendConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), FAKE_BACKEND_SCRIPT.to_string()],
        env: Default::default(),
        enabled: true,
    }
}

/// Scripted backend answering initialize then a single ping
pub(crate) const FAKE_PING_SCRIPT: &str = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","result":{"protocolVersion":"1.0.0","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1.0.0"}},"id":1}'; read line; printf '%s\n' '{"jsonrpc":"2.0","result":{"status":"ok"},"id":2}'; cat >/dev/null"#;

/// Backend config for the ping-answering scripted backend
pub(crate) fn ping_backend_config() -> BackendConfig {
    BackendConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), FAKE_PING_SCRIPT.to_string()],
        env: Default::default(),
        enabled: true,
    }
}

/// Backend config whose command does not exist
pub(crate) fn broken_backend_config() -> BackendConfig {
    BackendConfig {
        command: "definitely-not-a-real-command-xyz".to_string(),
        args: vec![],
        env: Default::default(),
        enabled: true,
    }
}
