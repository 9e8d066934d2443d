use crate::config::loader::{CompilationConfig, DebuggerConfig};
use crate::config::types::{EngineError, Result};
use crate::kernel::process::{isolate_group, ExitEvidence, ProcessGuard, WaitOutcome};
use crate::utils::output::{CollectedStream, StreamCollector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// PATH handed to every child; the host PATH is never inherited.
pub const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const REAP_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Toolchain adapter contract: fixed argument vectors, never shell strings.
pub trait ToolchainAdapter: Send + Sync {
    fn compiler(&self) -> &str;
    fn compile_args(&self, source: &Path, output: &Path) -> Vec<String>;
    fn debugger(&self) -> &str;
    fn debug_args(&self, script: &Path, binary: &Path) -> Vec<String>;
}

/// g++ and gdb as configured
#[derive(Debug, Clone)]
pub struct GnuToolchain {
    compilation: CompilationConfig,
    gdb_path: String,
}

impl GnuToolchain {
    pub fn new(compilation: &CompilationConfig, debugger: &DebuggerConfig) -> Self {
        Self {
            compilation: compilation.clone(),
            gdb_path: debugger.gdb_path.clone(),
        }
    }
}

impl ToolchainAdapter for GnuToolchain {
    fn compiler(&self) -> &str {
        &self.compilation.compiler_path
    }

    fn compile_args(&self, source: &Path, output: &Path) -> Vec<String> {
        vec![
            source.to_string_lossy().to_string(),
            format!("-std={}", self.compilation.cpp_standard),
            self.compilation.optimization_level.clone(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            "-Wall".to_string(),
            "-Wextra".to_string(),
            "-Werror".to_string(),
        ]
    }

    fn debugger(&self) -> &str {
        &self.gdb_path
    }

    fn debug_args(&self, script: &Path, binary: &Path) -> Vec<String> {
        vec![
            "-nx".to_string(),
            "--batch".to_string(),
            "-x".to_string(),
            script.to_string_lossy().to_string(),
            binary.to_string_lossy().to_string(),
        ]
    }
}

/// Result of running a trusted tool under a timeout
#[derive(Debug)]
pub struct ToolRun {
    pub pid: u32,
    /// `None` when the tool was killed at the deadline
    pub evidence: Option<ExitEvidence>,
    pub stdout: CollectedStream,
    pub stderr: CollectedStream,
    pub elapsed_ms: u64,
}

impl ToolRun {
    pub fn timed_out(&self) -> bool {
        self.evidence.is_none()
    }

    /// Exit code, or -1 when the tool did not exit on its own
    pub fn exit_code(&self) -> i32 {
        self.evidence
            .as_ref()
            .and_then(|e| e.exit_code)
            .unwrap_or(-1)
    }
}

/// Build a command with a cleared environment
pub fn tool_command(program: &str, args: &[String], workdir: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(workdir)
        .env_clear()
        .env("PATH", SAFE_PATH)
        .env("LANG", "C");
    cmd
}

/// Spawn `cmd` in its own process group with null stdin, collect both
/// streams up to `output_limit` bytes each, and kill the group at `timeout`.
pub fn run_tool(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
    output_limit: u64,
) -> Result<ToolRun> {
    let limit = usize::try_from(output_limit).unwrap_or(usize::MAX);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_group(&mut cmd);

    let start = Instant::now();
    let child = cmd
        .spawn()
        .map_err(|e| EngineError::from_spawn(program, e))?;
    let mut guard = ProcessGuard::new(child);
    let pid = guard.pid();

    let stdout = guard
        .child_mut()
        .stdout
        .take()
        .map(|s| StreamCollector::spawn(s, limit));
    let stderr = guard
        .child_mut()
        .stderr
        .take()
        .map(|s| StreamCollector::spawn(s, limit));

    let evidence = match guard.wait_with_deadline(timeout)? {
        WaitOutcome::Exited(evidence) => Some(evidence),
        WaitOutcome::DeadlineExceeded => {
            let report = guard.kill_and_reap(REAP_TIMEOUT);
            log::warn!("{} (pid {}) killed after {:?}: {:?}", program, pid, timeout, report);
            None
        }
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;
    // Sweeps the group so no straggler keeps the pipes open
    drop(guard);

    Ok(ToolRun {
        pid,
        evidence,
        stdout: stdout
            .map(|c| c.finish(DRAIN_TIMEOUT))
            .unwrap_or_else(CollectedStream::empty),
        stderr: stderr
            .map(|c| c.finish(DRAIN_TIMEOUT))
            .unwrap_or_else(CollectedStream::empty),
        elapsed_ms,
    })
}

/// Availability of an external tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProbe {
    pub program: String,
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Run `<program> --version` and report the first line
pub fn probe_tool(program: &str) -> ToolProbe {
    let workdir = std::env::temp_dir();
    let cmd = tool_command(program, &["--version".to_string()], &workdir);

    match run_tool(cmd, program, Duration::from_secs(10), 64 * 1024) {
        Ok(run) if run.exit_code() == 0 => ToolProbe {
            program: program.to_string(),
            available: true,
            version: run.stdout.lossy().lines().next().map(str::to_string),
            error: None,
        },
        Ok(run) => ToolProbe {
            program: program.to_string(),
            available: false,
            version: None,
            error: Some(format!("--version exited with {}", run.exit_code())),
        },
        Err(e) => ToolProbe {
            program: program.to_string(),
            available: false,
            version: None,
            error: Some(e.to_string()),
        },
    }
}
