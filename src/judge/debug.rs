use crate::config::loader::DebuggerConfig;
use crate::config::types::{
    DebugResult, EngineError, FailureKind, LimitEnforcement, OutputIntegrity, ResourceLimits,
    Result,
};
use crate::core::session::RequestContext;
use crate::judge::toolchain::{run_tool, tool_command, ToolchainAdapter};
use crate::kernel::rlimits::ResourceLimiter;
use crate::observability::audit::events;
use crate::safety::path_guard::{PathGuard, TempCategory};
use crate::safety::workspace::TempFileGuard;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Break at entry, run, then dump the stack, registers and a bounded
/// instruction window.
pub const DEFAULT_SCRIPT: &str = "set pagination off
break main
run
backtrace
info registers
x/10i $pc
quit
";

/// Prepended to every script so `run` arguments never reach a shell
const SCRIPT_PREAMBLE: &str = "set startup-with-shell off\n";

/// Runs binaries under a batch-mode debugger
pub struct Debugger {
    guard: PathGuard,
    config: DebuggerConfig,
    toolchain: Arc<dyn ToolchainAdapter>,
    limiter: ResourceLimiter,
}

impl Debugger {
    pub fn new(
        guard: PathGuard,
        config: DebuggerConfig,
        toolchain: Arc<dyn ToolchainAdapter>,
        limiter: ResourceLimiter,
    ) -> Self {
        Self {
            guard,
            config,
            toolchain,
            limiter,
        }
    }

    /// Ceilings for the debugger process. The inferior inherits them, so
    /// the address space is the execution ceiling plus debugger headroom.
    pub fn session_limits(&self) -> ResourceLimits {
        let headroom = self.config.memory_headroom_mb.saturating_mul(MIB);
        ResourceLimits {
            time_ms: self.config.timeout_ms,
            memory_bytes: self.limiter.defaults().memory_bytes.saturating_add(headroom),
            output_bytes: self.config.transcript_limit_bytes,
        }
    }

    /// `Err` only when the binary or the script fails validation; nothing
    /// is spawned in that case. Debugger failures, timeouts and a missing
    /// debugger come back as `success=false`.
    pub fn debug(
        &self,
        ctx: &RequestContext,
        binary: &Path,
        script: Option<&str>,
    ) -> Result<DebugResult> {
        let session = Some(ctx.session_id());
        let binary = self.guard.validate_artifact(binary, session)?;
        let script = script.unwrap_or(DEFAULT_SCRIPT);
        self.guard.validate_debug_script(script, session)?;

        // Held until return so the script is removed on every path
        let script_file = match self.write_script(script) {
            Ok(file) => file,
            Err(e) => return Ok(failed(&e, None)),
        };

        let program = self.toolchain.debugger();
        let args = self.toolchain.debug_args(script_file.path(), &binary);
        let mut cmd = tool_command(
            program,
            &args,
            &self.guard.category_dir(TempCategory::Execute),
        );
        let enforcement = self.limiter.apply(&mut cmd, &self.session_limits());
        if let LimitEnforcement::Unsupported { reason } = &enforcement {
            events::control_degraded(reason, session);
        }
        let timeout = Duration::from_millis(self.config.timeout_ms);

        log::info!(
            "[{}] debugging {} with {}",
            ctx.session_id(),
            binary.display(),
            program
        );

        let run = match run_tool(cmd, program, timeout, self.config.transcript_limit_bytes) {
            Ok(run) => run,
            Err(e) => return Ok(failed(&e, Some(enforcement))),
        };
        if run.stdout.integrity == OutputIntegrity::TruncatedByLimit {
            log::warn!(
                "[{}] transcript truncated: kept {} of {} bytes",
                ctx.session_id(),
                run.stdout.data.len(),
                run.stdout.total_bytes
            );
        }

        let mut result = DebugResult {
            success: false,
            transcript: run.stdout.lossy_marked(),
            stderr: run.stderr.lossy_marked(),
            exit_code: run.exit_code(),
            elapsed_ms: run.elapsed_ms,
            enforcement: Some(enforcement),
            failure: None,
            message: None,
        };

        if run.timed_out() {
            events::forced_kill(run.pid, "debugger timeout", session);
            result.failure = Some(FailureKind::ExecutionTimeout);
            result.message = Some(format!(
                "Debugger timed out after {}s",
                self.config.timeout_ms as f64 / 1000.0
            ));
        } else if result.exit_code != 0 {
            result.failure = Some(FailureKind::RuntimeFailure);
            result.message = Some(format!("Debugger exited with code {}", result.exit_code));
        } else {
            result.success = true;
        }

        Ok(result)
    }

    fn write_script(&self, script: &str) -> Result<TempFileGuard> {
        let path = self
            .guard
            .secure_temp_path(TempCategory::Debug)?
            .with_extension("gdb");
        let mut text = String::from(SCRIPT_PREAMBLE);
        text.push_str(script);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.guard.write_new(&path, text.as_bytes())?;
        Ok(TempFileGuard::new(path))
    }
}

fn failed(err: &EngineError, enforcement: Option<LimitEnforcement>) -> DebugResult {
    log::warn!("debug session failed: {}", err);
    DebugResult {
        success: false,
        transcript: String::new(),
        stderr: String::new(),
        exit_code: -1,
        elapsed_ms: 0,
        enforcement,
        failure: Some(err.kind()),
        message: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{CompilationConfig, ExecutionConfig};
    use crate::core::session::OperationKind;
    use crate::judge::toolchain::GnuToolchain;
    use std::path::PathBuf;

    fn debugger_with(config: DebuggerConfig) -> (tempfile::TempDir, Debugger) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let toolchain = Arc::new(GnuToolchain::new(&CompilationConfig::default(), &config));
        let limiter = ResourceLimiter::new(ExecutionConfig::default());
        (dir, Debugger::new(guard, config, toolchain, limiter))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(OperationKind::Debug, serde_json::json!({}))
    }

    fn fake_binary(debugger: &Debugger) -> PathBuf {
        let binary = debugger
            .guard
            .secure_temp_path(TempCategory::Execute)
            .unwrap();
        debugger.guard.write_new(&binary, b"not really a binary").unwrap();
        binary
    }

    fn debug_dir_entries(debugger: &Debugger) -> usize {
        std::fs::read_dir(debugger.guard.category_dir(TempCategory::Debug))
            .unwrap()
            .count()
    }

    /// Stand-in debugger: a shell script that echoes its arguments and the
    /// script passed with `-x`.
    #[cfg(unix)]
    fn fixture_debugger(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-gdb");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_default_script_shape() {
        let lines: Vec<&str> = DEFAULT_SCRIPT.lines().collect();
        assert_eq!(lines.first(), Some(&"set pagination off"));
        assert!(lines.contains(&"backtrace"));
        assert_eq!(lines.last(), Some(&"quit"));
    }

    #[test]
    fn test_binary_outside_root_rejected() {
        let (_dir, debugger) = debugger_with(DebuggerConfig::default());
        let err = debugger
            .debug(&ctx(), Path::new("/bin/ls"), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::SecurityViolation(_)));
    }

    #[test]
    fn test_shell_escape_script_rejected_before_spawn() {
        let (_dir, debugger) = debugger_with(DebuggerConfig {
            gdb_path: "oibox-no-such-gdb".to_string(),
            ..DebuggerConfig::default()
        });
        let binary = fake_binary(&debugger);

        for script in ["shell id", "break main\nrun\npython import os", "!id"] {
            let err = debugger.debug(&ctx(), &binary, Some(script)).unwrap_err();
            assert!(matches!(err, EngineError::SecurityViolation(_)), "{}", script);
        }
        assert_eq!(debug_dir_entries(&debugger), 0);
    }

    #[test]
    fn test_session_limits_add_headroom() {
        let (_dir, debugger) = debugger_with(DebuggerConfig {
            timeout_ms: 2_500,
            memory_headroom_mb: 100,
            ..DebuggerConfig::default()
        });
        let limits = debugger.session_limits();
        assert_eq!(limits.time_ms, 2_500);
        assert_eq!(limits.cpu_seconds(), 3);
        assert_eq!(limits.memory_bytes, (256 + 100) * MIB);
    }

    #[test]
    fn test_missing_debugger_is_failure_and_script_removed() {
        let (_dir, debugger) = debugger_with(DebuggerConfig {
            gdb_path: "oibox-no-such-gdb".to_string(),
            ..DebuggerConfig::default()
        });
        let binary = fake_binary(&debugger);

        let result = debugger.debug(&ctx(), &binary, Some("info files")).unwrap();
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::ToolUnavailable));
        assert_eq!(debug_dir_entries(&debugger), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_transcript_captures_batch_session() {
        let dir = tempfile::tempdir().unwrap();
        let gdb = fixture_debugger(dir.path(), "echo \"argv: $*\"\ncat \"$4\"");
        let (_root, debugger) = debugger_with(DebuggerConfig {
            gdb_path: gdb,
            ..DebuggerConfig::default()
        });
        let binary = fake_binary(&debugger);

        let result = debugger.debug(&ctx(), &binary, None).unwrap();
        assert!(result.success, "{:?}", result);
        assert_eq!(result.exit_code, 0);
        assert!(result.failure.is_none());
        assert!(result.enforcement.as_ref().unwrap().is_applied());

        let first = result.transcript.lines().next().unwrap();
        assert!(first.starts_with("argv: -nx --batch -x "));
        assert!(first.ends_with(&binary.to_string_lossy().to_string()));
        assert!(result.transcript.contains("set startup-with-shell off\nset pagination off"));
        assert!(result.transcript.contains("backtrace\n"));
        assert_eq!(debug_dir_entries(&debugger), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_debugger_timeout_maps_to_execution_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let gdb = fixture_debugger(dir.path(), "exec sleep 30");
        let (_root, debugger) = debugger_with(DebuggerConfig {
            gdb_path: gdb,
            timeout_ms: 300,
            ..DebuggerConfig::default()
        });
        let binary = fake_binary(&debugger);

        let result = debugger.debug(&ctx(), &binary, Some("run")).unwrap();
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::ExecutionTimeout));
        assert_eq!(result.exit_code, -1);
        assert!(result.elapsed_ms < 10_000);
        assert_eq!(debug_dir_entries(&debugger), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_debugger_nonzero_exit_is_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gdb = fixture_debugger(dir.path(), "echo 'No symbol table' 1>&2; exit 1");
        let (_root, debugger) = debugger_with(DebuggerConfig {
            gdb_path: gdb,
            ..DebuggerConfig::default()
        });
        let binary = fake_binary(&debugger);

        let result = debugger.debug(&ctx(), &binary, Some("bt")).unwrap();
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::RuntimeFailure));
        assert_eq!(result.stderr, "No symbol table\n");
    }
}
