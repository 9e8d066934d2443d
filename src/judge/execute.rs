use crate::config::types::{
    EngineError, ExecutionResult, FailureKind, LimitEnforcement, LimitOverride, Outcome,
    OutputIntegrity, ResourceLimits, Result,
};
use crate::core::session::RequestContext;
use crate::judge::toolchain::SAFE_PATH;
use crate::kernel::process::{isolate_group, ProcessGuard, WaitOutcome};
use crate::kernel::rlimits::ResourceLimiter;
use crate::observability::audit::{events, SecurityEventType};
use crate::safety::path_guard::{PathGuard, TempCategory};
use crate::utils::output::{truncate_output, CollectedStream, StreamCollector};
use crate::verdict::classifier::{Termination, VerdictCause, VerdictClassifier};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const REAP_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs compiled binaries under the resource limiter
pub struct Executor {
    guard: PathGuard,
    limiter: ResourceLimiter,
}

/// Files materialized for one run
struct RunFiles {
    input: PathBuf,
    output: PathBuf,
}

impl Executor {
    pub fn new(guard: PathGuard, limiter: ResourceLimiter) -> Self {
        Self { guard, limiter }
    }

    pub fn limiter(&self) -> &ResourceLimiter {
        &self.limiter
    }

    /// Run `binary` with `input` on stdin.
    ///
    /// `Err` only when the binary fails validation; nothing is spawned in
    /// that case. The child is dead and reaped whenever this returns.
    pub fn run(
        &self,
        ctx: &RequestContext,
        binary: &Path,
        input: &str,
        request: &LimitOverride,
    ) -> Result<ExecutionResult> {
        let session = Some(ctx.session_id());
        let binary = self.guard.validate_artifact(binary, session)?;

        let effective = self.limiter.effective_limits(request);
        for note in &effective.adjustments {
            events::override_adjusted(note, session);
        }
        let limits = effective.limits;

        let mut result = match self.run_validated(ctx, &binary, input, &limits) {
            Ok(result) => result,
            Err(e) => {
                log::error!("[{}] run of {} failed: {}", ctx.session_id(), binary.display(), e);
                ExecutionResult::engine_failure(limits, &e)
            }
        };
        result.adjustments = effective.adjustments;

        events::execution_end(
            &binary,
            &result.outcome.to_string(),
            result.elapsed_ms,
            session,
        );
        Ok(result)
    }

    fn prepare_files(&self, input: &str) -> Result<RunFiles> {
        let input_path = self
            .guard
            .secure_temp_path(TempCategory::Inputs)?
            .with_extension("in");
        self.guard.write_new(&input_path, input.as_bytes())?;

        let output_path = self
            .guard
            .secure_temp_path(TempCategory::Outputs)?
            .with_extension("out");
        self.guard.write_new(&output_path, b"")?;

        Ok(RunFiles {
            input: input_path,
            output: output_path,
        })
    }

    fn run_validated(
        &self,
        ctx: &RequestContext,
        binary: &Path,
        input: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult> {
        let session = Some(ctx.session_id());
        let files = self.prepare_files(input)?;
        let workdir = self.guard.category_dir(TempCategory::Execute);

        let stdin = File::open(&files.input)?;
        let stdout = OpenOptions::new().write(true).open(&files.output)?;

        let mut cmd = Command::new(binary);
        cmd.current_dir(&workdir)
            .env_clear()
            .env("PATH", SAFE_PATH)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped());
        isolate_group(&mut cmd);

        let enforcement = self.limiter.apply(&mut cmd, limits);
        if let LimitEnforcement::Unsupported { reason } = &enforcement {
            events::control_degraded(reason, session);
        }

        events::execution_start(binary, session);
        let start = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| EngineError::from_spawn(&binary.display().to_string(), e))?;
        let mut process = ProcessGuard::new(child);
        let pid = process.pid();

        let stderr_limit = usize::try_from(limits.output_bytes).unwrap_or(usize::MAX);
        let stderr = process
            .child_mut()
            .stderr
            .take()
            .map(|s| StreamCollector::spawn(s, stderr_limit));

        let deadline = self.limiter.wall_deadline(limits);
        let termination = match process.wait_with_deadline(deadline)? {
            WaitOutcome::Exited(evidence) => Termination::Exited(evidence),
            WaitOutcome::DeadlineExceeded => {
                let report = process.kill_and_reap(REAP_TIMEOUT);
                log::warn!(
                    "[{}] pid {} exceeded {:?}, killed: {:?}",
                    ctx.session_id(),
                    pid,
                    deadline,
                    report
                );
                events::forced_kill(pid, "wall-clock deadline", session);
                Termination::WallClockKill
            }
        };
        let observed_ms = start.elapsed().as_millis() as u64;
        drop(process);

        let stderr = stderr
            .map(|c| c.finish(DRAIN_TIMEOUT))
            .unwrap_or_else(CollectedStream::empty)
            .lossy_marked();

        let verdict = VerdictClassifier::classify(&termination, observed_ms, &stderr, limits);
        let (memory_kb, cpu_ms) = match &termination {
            Termination::Exited(evidence) => (evidence.memory_kb, evidence.cpu_ms),
            Termination::WallClockKill => (0, 0),
        };
        self.audit_verdict(verdict.cause, binary, limits, session);

        let (stdout, output_integrity) = if verdict.outcome == Outcome::Timeout {
            // Partial output of a killed run is discarded
            (None, OutputIntegrity::Complete)
        } else {
            self.read_output(&files.output, limits, binary, session)
        };

        let failure = match verdict.outcome {
            Outcome::Ok => None,
            Outcome::NonZeroExit => Some(FailureKind::RuntimeFailure),
            Outcome::Timeout => Some(FailureKind::ExecutionTimeout),
            Outcome::ResourceExceeded => Some(FailureKind::ResourceExceeded),
            Outcome::InternalError => Some(FailureKind::IoFailure),
        };
        let message = match verdict.cause {
            VerdictCause::NormalExit => None,
            VerdictCause::NonzeroExit => {
                Some(format!("Program exited with code {}", verdict.exit_code))
            }
            VerdictCause::WallTimeLimit => Some(format!(
                "Time limit exceeded ({}ms wall clock)",
                limits.time_ms
            )),
            VerdictCause::CpuTimeLimit => {
                Some(format!("Time limit exceeded ({}ms CPU)", limits.time_ms))
            }
            VerdictCause::AllocationFailure => Some(format!(
                "Memory limit exceeded ({} MB)",
                limits.memory_mb()
            )),
            VerdictCause::FileSizeLimit => Some("File size limit exceeded".to_string()),
            VerdictCause::FatalSignal => Some(format!(
                "Program terminated by signal {}",
                verdict.signal.unwrap_or(0)
            )),
        };

        Ok(ExecutionResult {
            success: verdict.outcome == Outcome::Ok,
            outcome: verdict.outcome,
            stdout,
            stderr: if verdict.outcome == Outcome::Timeout {
                String::new()
            } else {
                stderr
            },
            elapsed_ms: verdict.reported_elapsed_ms.unwrap_or(observed_ms),
            cpu_ms,
            memory_kb,
            exit_code: verdict.exit_code,
            signal: verdict.signal,
            pid: Some(pid),
            output_integrity,
            limits: *limits,
            enforcement,
            adjustments: Vec::new(),
            failure,
            message,
        })
    }

    /// Read at most one byte past the ceiling, then truncate. A read
    /// failure loses stdout but never fails the run.
    fn read_output(
        &self,
        path: &Path,
        limits: &ResourceLimits,
        binary: &Path,
        session: Option<&str>,
    ) -> (Option<String>, OutputIntegrity) {
        let mut raw = Vec::new();
        let read = File::open(path).and_then(|f| {
            f.take(limits.output_bytes.saturating_add(1))
                .read_to_end(&mut raw)
        });
        if let Err(e) = read {
            log::warn!("Failed to read output {}: {}", path.display(), e);
            return (None, OutputIntegrity::ReadError);
        }

        let (text, truncated) = truncate_output(&raw, limits.output_bytes);
        if truncated {
            events::limit_violation(
                SecurityEventType::OutputLimitViolation,
                format!("stdout exceeded {} bytes, truncated", limits.output_bytes),
                binary,
                session,
            );
            (Some(text), OutputIntegrity::TruncatedByLimit)
        } else {
            (Some(text), OutputIntegrity::Complete)
        }
    }

    fn audit_verdict(
        &self,
        cause: VerdictCause,
        binary: &Path,
        limits: &ResourceLimits,
        session: Option<&str>,
    ) {
        let (event_type, details) = match cause {
            VerdictCause::WallTimeLimit => (
                SecurityEventType::WallTimeLimitViolation,
                format!("wall clock exceeded {}ms", limits.time_ms),
            ),
            VerdictCause::CpuTimeLimit => (
                SecurityEventType::CpuTimeLimitViolation,
                format!("CPU time exceeded {}s", limits.cpu_seconds()),
            ),
            VerdictCause::AllocationFailure => (
                SecurityEventType::MemoryLimitViolation,
                format!("allocation failed under {} byte ceiling", limits.memory_bytes),
            ),
            VerdictCause::FileSizeLimit => (
                SecurityEventType::FileSizeLimitViolation,
                format!(
                    "file size ceiling of {} bytes reached",
                    self.limiter.file_size_bytes()
                ),
            ),
            _ => return,
        };
        events::limit_violation(event_type, details, binary, session);
    }
}
