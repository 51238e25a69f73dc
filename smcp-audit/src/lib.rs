//! Structured audit logging for the search-mcp aggregator.
//!
//! Every security-relevant outcome (tool executions, authorization denials,
//! rate-limit hits, configuration and system events) becomes one
//! [`AuditEvent`]: a redacted, levelled record written to an in-memory ring
//! buffer and an append-only JSON-lines file. The ring buffer backs the
//! `query_audit_logs` / `get_audit_stats` internal tools; the file is the
//! durable trail.

pub mod event;
pub mod logger;

pub use event::{
    redact_details, AuditActor, AuditError, AuditEvent, AuditEventType, AuditLevel, AuditResource,
    AuditResult, REDACTED,
};
pub use logger::{
    resolve_audit_log_path, AuditConfig, AuditLogger, AuditQuery, AuditStats, AUDIT_LOG_FILE_ENV,
    DEFAULT_AUDIT_LOG_PATH,
};
