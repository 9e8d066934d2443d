//! Security audit trail for oibox
//! Structured JSON-lines events for every rejected request, enforced
//! ceiling, forced kill and degraded control, correlated by session id.
use crate::config::types::{EngineError, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of security events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    // Lifecycle
    ExecutionStart,
    ExecutionEnd,

    // Rejected input
    CommandInjectionAttempt,
    PathTraversalAttempt,

    // Ceilings
    WallTimeLimitViolation,
    CpuTimeLimitViolation,
    MemoryLimitViolation,
    FileSizeLimitViolation,
    OutputLimitViolation,
    CompileTimeout,
    LimitOverrideAdjusted,

    // Control and cleanup
    ControlDegraded,
    ForcedKill,
    CleanupFailure,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::CommandInjectionAttempt
            | SecurityEventType::PathTraversalAttempt => SecuritySeverity::Critical,
            SecurityEventType::ControlDegraded | SecurityEventType::CleanupFailure => {
                SecuritySeverity::High
            }
            SecurityEventType::WallTimeLimitViolation
            | SecurityEventType::CpuTimeLimitViolation
            | SecurityEventType::MemoryLimitViolation
            | SecurityEventType::FileSizeLimitViolation
            | SecurityEventType::OutputLimitViolation
            | SecurityEventType::CompileTimeout
            | SecurityEventType::ForcedKill => SecuritySeverity::Medium,
            SecurityEventType::ExecutionStart
            | SecurityEventType::ExecutionEnd
            | SecurityEventType::LimitOverrideAdjusted => SecuritySeverity::Low,
        }
    }
}

/// Individual security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub session_id: Option<String>,
    pub command: Option<String>,
    pub file_path: Option<String>,
    pub process_id: u32,
}

impl SecurityEvent {
    /// Create a new security event with default severity
    pub fn new(event_type: SecurityEventType, details: impl Into<String>) -> Self {
        Self {
            severity: event_type.default_severity(),
            event_type,
            timestamp: Utc::now(),
            details: details.into(),
            session_id: None,
            command: None,
            file_path: None,
            process_id: std::process::id(),
        }
    }

    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }
}

/// Append-only JSON-lines audit file
pub struct SecurityLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    pub fn new(audit_path: PathBuf) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| EngineError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    pub fn log_security_event(&self, event: &SecurityEvent) {
        mirror_to_log(event);

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match self.audit_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write to audit log: {}", e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit file"),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn mirror_to_log(event: &SecurityEvent) {
    let session = event.session_id.as_deref().unwrap_or("-");
    match event.severity {
        SecuritySeverity::Critical => {
            error!("SECURITY CRITICAL [{}]: {:?} - {}", session, event.event_type, event.details)
        }
        SecuritySeverity::High => {
            error!("SECURITY HIGH [{}]: {:?} - {}", session, event.event_type, event.details)
        }
        SecuritySeverity::Medium => {
            warn!("SECURITY MEDIUM [{}]: {:?} - {}", session, event.event_type, event.details)
        }
        SecuritySeverity::Low => {
            info!("SECURITY LOW [{}]: {:?} - {}", session, event.event_type, event.details)
        }
    }
}

/// Global audit logger; written once at startup, append-only afterwards
static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Initialize the global audit logger.
///
/// Failure to open the file is not fatal: events keep flowing to the `log`
/// facade. A second call is a no-op.
pub fn init_security_logger(audit_path: PathBuf) {
    if let Some(existing) = SECURITY_LOGGER.get() {
        log::debug!(
            "Audit logger already initialized at {}",
            existing.audit_path().display()
        );
        return;
    }

    match SecurityLogger::new(audit_path.clone()) {
        Ok(logger) => {
            if SECURITY_LOGGER.set(logger).is_ok() {
                info!("Audit log at {}", audit_path.display());
            }
        }
        Err(e) => warn!("Audit log unavailable, using log output only: {}", e),
    }
}

pub fn log_security_event(event: SecurityEvent) {
    match SECURITY_LOGGER.get() {
        Some(logger) => logger.log_security_event(&event),
        None => mirror_to_log(&event),
    }
}

/// Convenience functions for common security events
pub mod events {
    use super::*;

    pub fn command_injection_event(
        command: &str,
        reason: &str,
        session: Option<&str>,
    ) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::CommandInjectionAttempt,
            format!("Blocked command ({}): {}", reason, command),
        )
        .with_command(command)
        .with_session(session)
    }

    pub fn path_traversal_event(path: &str, session: Option<&str>) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::PathTraversalAttempt,
            format!("Blocked path outside managed root: {}", path),
        )
        .with_file_path(path)
        .with_session(session)
    }

    pub fn command_injection_attempt(command: &str, reason: &str, session: Option<&str>) {
        log_security_event(command_injection_event(command, reason, session));
    }

    pub fn path_traversal_attempt(path: &str, session: Option<&str>) {
        log_security_event(path_traversal_event(path, session));
    }

    pub fn limit_violation(
        event_type: SecurityEventType,
        details: String,
        binary: &Path,
        session: Option<&str>,
    ) {
        log_security_event(
            SecurityEvent::new(event_type, details)
                .with_file_path(binary.display().to_string())
                .with_session(session),
        );
    }

    pub fn forced_kill(pid: u32, reason: &str, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::ForcedKill,
                format!("Sent SIGKILL to pid {} ({})", pid, reason),
            )
            .with_session(session),
        );
    }

    pub fn compile_timeout(timeout_ms: u64, source: &Path, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::CompileTimeout,
                format!("Compiler exceeded {}ms budget", timeout_ms),
            )
            .with_file_path(source.display().to_string())
            .with_session(session),
        );
    }

    pub fn override_adjusted(note: &str, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::LimitOverrideAdjusted, note).with_session(session),
        );
    }

    pub fn control_degraded(reason: &str, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::ControlDegraded,
                format!("Kernel limits not applied: {}", reason),
            )
            .with_session(session),
        );
    }

    pub fn cleanup_failure(path: &Path, err: &std::io::Error) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::CleanupFailure,
                format!("Failed to remove {}: {}", path.display(), err),
            )
            .with_file_path(path.display().to_string()),
        );
    }

    pub fn execution_start(binary: &Path, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::ExecutionStart, "Execution started")
                .with_file_path(binary.display().to_string())
                .with_session(session),
        );
    }

    pub fn execution_end(binary: &Path, outcome: &str, elapsed_ms: u64, session: Option<&str>) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::ExecutionEnd,
                format!("Execution finished: {} in {}ms", outcome, elapsed_ms),
            )
            .with_file_path(binary.display().to_string())
            .with_session(session),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity() {
        assert_eq!(
            SecurityEventType::PathTraversalAttempt.default_severity(),
            SecuritySeverity::Critical
        );
        assert_eq!(
            SecurityEventType::ControlDegraded.default_severity(),
            SecuritySeverity::High
        );
        assert_eq!(
            SecurityEventType::ExecutionEnd.default_severity(),
            SecuritySeverity::Low
        );
    }

    #[test]
    fn test_logger_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let logger = SecurityLogger::new(path.clone()).unwrap();

        logger.log_security_event(
            &SecurityEvent::new(SecurityEventType::ForcedKill, "killed")
                .with_session(Some("abc"))
                .with_command("./prog"),
        );
        logger.log_security_event(&SecurityEvent::new(
            SecurityEventType::ExecutionEnd,
            "done",
        ));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "ForcedKill");
        assert_eq!(first["session_id"], "abc");
        assert_eq!(first["command"], "./prog");
        assert_eq!(first["severity"], "Medium");
    }

    #[test]
    fn test_events_without_global_logger_do_not_panic() {
        events::path_traversal_attempt("../../etc/passwd", None);
        events::control_degraded("unsupported platform", Some("session"));
    }
}
