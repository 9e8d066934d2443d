//! Core types and structures for the oibox engine
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Effective resource ceilings for a single run.
///
/// Every field is strictly positive once it has been produced by
/// [`crate::kernel::rlimits::ResourceLimiter::effective_limits`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Time ceiling in milliseconds (CPU and wall clock)
    pub time_ms: u64,
    /// Address-space ceiling in bytes
    pub memory_bytes: u64,
    /// Captured stdout ceiling in bytes
    pub output_bytes: u64,
}

impl ResourceLimits {
    /// CPU ceiling in whole seconds, rounded up, never below one second.
    pub fn cpu_seconds(&self) -> u64 {
        ((self.time_ms + 999) / 1000).max(1)
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }
}

/// Per-request override of the process-wide defaults. Omitted fields fall
/// back to the configured default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverride {
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub output_limit_bytes: Option<u64>,
}

/// Whether kernel-level ceilings were attached to the spawned process.
///
/// On `Unsupported` only the wall-clock timeout and the output cap are
/// enforced, and callers must be told so.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LimitEnforcement {
    Applied { controls: Vec<String> },
    Unsupported { reason: String },
}

impl LimitEnforcement {
    pub fn is_applied(&self) -> bool {
        matches!(self, LimitEnforcement::Applied { .. })
    }
}

/// How an execution concluded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Exit code 0
    Ok,
    /// Non-zero exit or fatal signal not attributable to a ceiling
    NonZeroExit,
    /// Wall-clock or CPU-time ceiling exceeded
    Timeout,
    /// Memory or file-size ceiling triggered inside the child
    ResourceExceeded,
    /// The engine could not run the program (I/O or missing tool)
    InternalError,
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::InternalError
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::NonZeroExit => write!(f, "non_zero_exit"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::ResourceExceeded => write!(f, "resource_exceeded"),
            Outcome::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputIntegrity {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
    #[serde(rename = "read_error")]
    ReadError,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

impl Default for OutputIntegrity {
    fn default() -> Self {
        OutputIntegrity::Complete
    }
}

/// Failure taxonomy surfaced inside result records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SecurityViolation,
    CompileFailure,
    ExecutionTimeout,
    ResourceExceeded,
    RuntimeFailure,
    IoFailure,
    ToolUnavailable,
    InvalidName,
    Config,
}

/// Result of a compiler invocation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    /// Produced binary; present only on success
    pub artifact: Option<PathBuf>,
    /// Source file written for this compile
    pub source_path: Option<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    /// Compiler exit code, -1 when the compiler never exited on its own
    pub exit_code: i32,
    pub elapsed_ms: u64,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

/// Result of running a compiled binary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub outcome: Outcome,
    /// Captured stdout; `None` when discarded (timeout) or never produced
    pub stdout: Option<String>,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub cpu_ms: u64,
    /// Peak resident memory in KiB, 0 when unavailable
    pub memory_kb: u64,
    /// Exit code; negated signal number for signal deaths, -1 for timeouts
    pub exit_code: i32,
    pub signal: Option<i32>,
    /// Host PID of the child, for post-call process table checks
    pub pid: Option<u32>,
    pub output_integrity: OutputIntegrity,
    pub limits: ResourceLimits,
    pub enforcement: LimitEnforcement,
    /// Notes about overrides that were clamped or ignored
    pub adjustments: Vec<String>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

impl ExecutionResult {
    /// Record for a run the engine could not carry out.
    pub fn engine_failure(limits: ResourceLimits, err: &EngineError) -> Self {
        Self {
            success: false,
            outcome: Outcome::InternalError,
            stdout: None,
            stderr: String::new(),
            elapsed_ms: 0,
            cpu_ms: 0,
            memory_kb: 0,
            exit_code: -1,
            signal: None,
            pid: None,
            output_integrity: OutputIntegrity::Complete,
            limits,
            enforcement: LimitEnforcement::Unsupported {
                reason: "process was not started".to_string(),
            },
            adjustments: Vec::new(),
            failure: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }
}

/// One positional line mismatch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDifference {
    /// 1-based line number
    pub line: usize,
    pub actual: String,
    pub expected: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "match")]
    pub matched: bool,
    pub differences: Vec<LineDifference>,
    pub actual_line_count: usize,
    pub expected_line_count: usize,
}

/// Result of a scripted debugger session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DebugResult {
    pub success: bool,
    pub transcript: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    /// Kernel ceilings on the debugger and its inferior; `None` when the
    /// debugger never started
    pub enforcement: Option<LimitEnforcement>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

/// Custom error types for oibox
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::SecurityViolation(_) => FailureKind::SecurityViolation,
            EngineError::InvalidName(_) => FailureKind::InvalidName,
            EngineError::Io(_) => FailureKind::IoFailure,
            EngineError::ToolUnavailable(_) => FailureKind::ToolUnavailable,
            EngineError::Config(_) => FailureKind::Config,
        }
    }

    /// Map a spawn failure to the taxonomy: a missing program is a missing
    /// tool, anything else is an I/O failure.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::ToolUnavailable(format!("{}: {}", program, err))
        } else {
            EngineError::Io(std::io::Error::new(
                err.kind(),
                format!("failed to start {}: {}", program, err),
            ))
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type alias for oibox operations
pub type Result<T> = std::result::Result<T, EngineError>;
