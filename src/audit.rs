/// Audit logging for firewall mutations
///
/// Every write the CLI attempts against the provider (rule additions and
/// deletions, declarative applies, template changes, resets) is appended to a
/// JSON-lines log in the state directory, successful or not.
use crate::core::firewall::Direction;
use crate::core::reconciler::ReconcileReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AllowSsh,
    AllowHttps,
    AllowMosh,
    BlockHttp,
    AddRule,
    DeleteRule,
    Reconcile,
    ApplyTemplate,
    ResetFirewall,
    CreateTemplate,
    UpdateTemplate,
    DeleteTemplate,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Server number or IP, absent for account-level template operations
    #[serde(default)]
    pub server: Option<String>,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        server: Option<&str>,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            server: server.map(str::to_string),
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the log in the user's state directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Uses an explicit log file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event as one JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.log_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first. Unparseable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Structured details of a rule-adding operation.
pub fn report_details(report: &ReconcileReport) -> serde_json::Value {
    serde_json::json!({
        "direction": report.direction,
        "added": report.added.iter().map(|r| &r.name).collect::<Vec<_>>(),
        "skipped": report.skipped.iter().map(|r| &r.name).collect::<Vec<_>>(),
    })
}

/// Details of a single-direction operation without a report.
pub fn direction_details(direction: Direction, extra: serde_json::Value) -> serde_json::Value {
    let mut details = serde_json::json!({ "direction": direction });
    if let (Some(map), serde_json::Value::Object(extra)) = (details.as_object_mut(), extra) {
        map.extend(extra);
    }
    details
}

/// Records an operation in the default log; failures to write are only logged.
pub async fn log_operation(
    event_type: EventType,
    server: Option<&str>,
    details: serde_json::Value,
    error: Option<String>,
) {
    match AuditLog::new() {
        Ok(audit) => {
            let event = AuditEvent::new(event_type, server, error.is_none(), details, error);
            if let Err(e) = audit.log(&event).await {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::debug!("Audit log unavailable: {}", e),
    }
}
