//! Audit logger with ring buffer and file sink

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::event::{redact_details, AuditEvent, AuditEventType, AuditLevel, AuditResult};

/// Environment variable overriding the audit log file location
pub const AUDIT_LOG_FILE_ENV: &str = "AUDIT_LOG_FILE";

/// Default audit log file location
pub const DEFAULT_AUDIT_LOG_PATH: &str = "./logs/audit.log";

/// Maximum number of events retained in memory
const RING_CAPACITY: usize = 10_000;

/// Audit logger configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Minimum level an event must have to be accepted
    pub min_level: AuditLevel,

    /// In-memory retention window in days
    pub retention_days: i64,

    /// File sink path; `None` disables the file sink
    pub file_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            min_level: AuditLevel::Info,
            retention_days: 90,
            file_path: Some(resolve_audit_log_path()),
        }
    }
}

/// Resolve the audit log path from `AUDIT_LOG_FILE` or the default
pub fn resolve_audit_log_path() -> PathBuf {
    match std::env::var(AUDIT_LOG_FILE_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_AUDIT_LOG_PATH),
    }
}

/// Filter for querying the in-memory ring buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(rename = "startDate", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(rename = "endDate", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<AuditEventType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<AuditLevel>,

    #[serde(rename = "actorId", skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,

    #[serde(default = "default_query_limit")]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,
}

fn default_query_limit() -> usize {
    100
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            event_type: None,
            level: None,
            actor_id: None,
            action: None,
            result: None,
            limit: default_query_limit(),
            offset: 0,
        }
    }
}

/// Aggregated statistics over retained events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    #[serde(rename = "totalEvents")]
    pub total_events: u64,

    #[serde(rename = "byType")]
    pub by_type: HashMap<String, u64>,

    #[serde(rename = "byLevel")]
    pub by_level: HashMap<String, u64>,

    #[serde(rename = "byResult")]
    pub by_result: HashMap<String, u64>,

    #[serde(rename = "averageDurationMs", skip_serializing_if = "Option::is_none")]
    pub average_duration_ms: Option<f64>,
}

/// Process-wide audit logger.
///
/// Accepted events go to an in-memory ring buffer and, when configured, an
/// append-only JSON-lines file. File failures degrade to diagnostic logging
/// and never fail the caller that produced the event.
pub struct AuditLogger {
    config: AuditConfig,
    next_id: AtomicU64,
    ring: Mutex<VecDeque<AuditEvent>>,
    file: Option<Mutex<tokio::fs::File>>,
}

impl AuditLogger {
    /// Create a logger, opening the file sink if one is configured.
    ///
    /// A file that cannot be opened disables the sink rather than failing
    /// aggregator startup.
    pub async fn new(config: AuditConfig) -> Self {
        let file = match &config.file_path {
            Some(path) => match open_append(path).await {
                Ok(file) => Some(Mutex::new(file)),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "audit file sink unavailable");
                    None
                }
            },
            None => None,
        };

        Self {
            config,
            next_id: AtomicU64::new(1),
            ring: Mutex::new(VecDeque::with_capacity(1024)),
            file,
        }
    }

    /// In-memory-only logger for tests and tooling commands
    pub async fn in_memory(min_level: AuditLevel) -> Self {
        Self::new(AuditConfig {
            min_level,
            retention_days: 90,
            file_path: None,
        })
        .await
    }

    /// Whether the file sink is active
    pub fn file_sink_active(&self) -> bool {
        self.file.is_some()
    }

    /// Record an event: filter by level, redact, buffer and append to file
    pub async fn log(&self, mut event: AuditEvent) {
        if event.level < self.config.min_level {
            return;
        }

        event.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(details) = event.details.as_mut() {
            redact_details(details, event.event_type == AuditEventType::Configuration);
        }

        {
            let mut ring = self.ring.lock().await;
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        if let Some(file) = &self.file {
            match serde_json::to_string(&event) {
                Ok(mut line) => {
                    line.push('\n');
                    let mut file = file.lock().await;
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        tracing::error!(error = %e, "failed to append audit event");
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize audit event"),
            }
        }
    }

    /// Query retained events in insertion order
    pub async fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let ring = self.ring.lock().await;
        ring.iter()
            .filter(|event| Self::matches(event, query))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect()
    }

    fn matches(event: &AuditEvent, query: &AuditQuery) -> bool {
        if let Some(start) = query.start_date {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = query.end_date {
            if event.timestamp > end {
                return false;
            }
        }
        if let Some(event_type) = query.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(level) = query.level {
            if event.level != level {
                return false;
            }
        }
        if let Some(actor_id) = &query.actor_id {
            if &event.actor.id != actor_id {
                return false;
            }
        }
        if let Some(action) = &query.action {
            if &event.action != action {
                return false;
            }
        }
        if let Some(result) = query.result {
            if event.result != result {
                return false;
            }
        }
        true
    }

    /// Aggregate counts by type, level and result over an optional window
    pub async fn get_stats(&self, time_window_ms: Option<u64>) -> AuditStats {
        let cutoff = time_window_ms
            .map(|ms| Utc::now() - ChronoDuration::milliseconds(ms as i64));

        let ring = self.ring.lock().await;
        let mut stats = AuditStats {
            total_events: 0,
            by_type: HashMap::new(),
            by_level: HashMap::new(),
            by_result: HashMap::new(),
            average_duration_ms: None,
        };
        let mut duration_sum: u64 = 0;
        let mut duration_count: u64 = 0;

        for event in ring.iter() {
            if let Some(cutoff) = cutoff {
                if event.timestamp < cutoff {
                    continue;
                }
            }
            stats.total_events += 1;
            *stats.by_type.entry(tag(&event.event_type)).or_default() += 1;
            *stats.by_level.entry(tag(&event.level)).or_default() += 1;
            *stats.by_result.entry(tag(&event.result)).or_default() += 1;
            if let Some(duration) = event.duration {
                duration_sum += duration;
                duration_count += 1;
            }
        }

        if duration_count > 0 {
            stats.average_duration_ms = Some(duration_sum as f64 / duration_count as f64);
        }
        stats
    }

    /// Discard ring-buffer events older than the retention window.
    /// The file sink is untouched; rotation is an operator concern.
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days);
        let mut ring = self.ring.lock().await;
        let before = ring.len();
        ring.retain(|event| event.timestamp >= cutoff);
        before - ring.len()
    }
}

/// Serialize a unit-ish serde enum to its wire tag
fn tag<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
