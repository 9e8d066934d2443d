use crate::config::loader::CompilationConfig;
use crate::config::types::{CompileResult, EngineError, FailureKind, Result};
use crate::core::session::RequestContext;
use crate::judge::toolchain::{run_tool, tool_command, ToolchainAdapter};
use crate::observability::audit::events;
use crate::safety::path_guard::{
    sanitize_filename, CommandKind, PathGuard, SafeName, TempCategory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Logical name used when the caller supplies none
const DEFAULT_NAME: &str = "program";

/// Turns source text into a binary under the managed tree
pub struct Compiler {
    guard: PathGuard,
    config: CompilationConfig,
    toolchain: Arc<dyn ToolchainAdapter>,
}

impl Compiler {
    pub fn new(
        guard: PathGuard,
        config: CompilationConfig,
        toolchain: Arc<dyn ToolchainAdapter>,
    ) -> Self {
        Self {
            guard,
            config,
            toolchain,
        }
    }

    /// Compile `source`.
    ///
    /// `Err` only for an unusable name; every other failure, including a
    /// missing compiler, comes back inside the result.
    pub fn compile(
        &self,
        ctx: &RequestContext,
        source: &str,
        name: Option<&str>,
    ) -> Result<CompileResult> {
        let safe = sanitize_filename(name.unwrap_or(DEFAULT_NAME))?;

        let (source_path, artifact_path) = match self.prepare(&safe, source) {
            Ok(paths) => paths,
            Err(e) => return Ok(failed(None, &e)),
        };

        let program = self.toolchain.compiler();
        if !self
            .guard
            .validate_command(program, CommandKind::SingleBinary, Some(ctx.session_id()))
        {
            return Err(EngineError::SecurityViolation(format!(
                "refusing compiler command {:?}",
                program
            )));
        }

        let args = self.toolchain.compile_args(&source_path, &artifact_path);
        let cmd = tool_command(
            program,
            &args,
            &self.guard.category_dir(TempCategory::Sources),
        );
        let timeout = Duration::from_millis(self.config.timeout_ms);

        log::info!(
            "[{}] compiling {} ({} bytes)",
            ctx.session_id(),
            source_path.display(),
            source.len()
        );

        let run = match run_tool(cmd, program, timeout, self.config.diagnostics_limit_bytes) {
            Ok(run) => run,
            Err(e) => return Ok(failed(Some(source_path), &e)),
        };

        let mut result = CompileResult {
            success: false,
            artifact: None,
            source_path: Some(source_path.clone()),
            stdout: run.stdout.lossy_marked(),
            stderr: run.stderr.lossy_marked(),
            exit_code: run.exit_code(),
            elapsed_ms: run.elapsed_ms,
            failure: Some(FailureKind::CompileFailure),
            message: None,
        };

        if run.timed_out() {
            events::compile_timeout(self.config.timeout_ms, &source_path, Some(ctx.session_id()));
            remove_partial(&artifact_path);
            result.message = Some(format!(
                "Compilation timed out after {}s",
                self.config.timeout_ms as f64 / 1000.0
            ));
            return Ok(result);
        }

        if result.exit_code != 0 {
            remove_partial(&artifact_path);
            result.message = Some(format!(
                "Compilation failed with exit code {}",
                result.exit_code
            ));
            return Ok(result);
        }

        if !is_executable(&artifact_path) {
            result.failure = Some(FailureKind::IoFailure);
            result.message = Some(format!(
                "compiler reported success but {} is not an executable file",
                artifact_path.display()
            ));
            return Ok(result);
        }

        log::info!(
            "[{}] compiled {} in {}ms",
            ctx.session_id(),
            artifact_path.display(),
            result.elapsed_ms
        );
        result.success = true;
        result.artifact = Some(artifact_path);
        result.failure = None;
        result.message = Some("Compilation successful".to_string());
        Ok(result)
    }

    fn prepare(&self, safe: &SafeName, source: &str) -> Result<(PathBuf, PathBuf)> {
        let source_path = self
            .guard
            .secure_named_path(TempCategory::Sources, safe, Some("cpp"))?;
        let artifact_path = self
            .guard
            .secure_named_path(TempCategory::Execute, safe, None)?;
        self.guard.write_new(&source_path, source.as_bytes())?;
        Ok((source_path, artifact_path))
    }
}

fn failed(source_path: Option<PathBuf>, err: &EngineError) -> CompileResult {
    log::warn!("compile failed before the compiler ran: {}", err);
    CompileResult {
        success: false,
        artifact: None,
        source_path,
        stdout: String::new(),
        stderr: String::new(),
        exit_code: -1,
        elapsed_ms: 0,
        failure: Some(err.kind()),
        message: Some(err.to_string()),
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove partial artifact {}: {}", path.display(), e);
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::DebuggerConfig;
    use crate::core::session::OperationKind;
    use crate::judge::toolchain::GnuToolchain;

    fn compiler_with(config: CompilationConfig) -> (tempfile::TempDir, Compiler) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let toolchain = Arc::new(GnuToolchain::new(&config, &DebuggerConfig::default()));
        (dir, Compiler::new(guard, config, toolchain))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(OperationKind::Compile, serde_json::json!({}))
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let (_dir, compiler) = compiler_with(CompilationConfig::default());
        let err = compiler.compile(&ctx(), "int main(){}", Some("../..")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidName(_)));
    }

    #[test]
    fn test_missing_compiler_is_tool_unavailable() {
        let config = CompilationConfig {
            compiler_path: "oibox-no-such-compiler".to_string(),
            ..CompilationConfig::default()
        };
        let (_dir, compiler) = compiler_with(config);
        let result = compiler.compile(&ctx(), "int main(){}", Some("x")).unwrap();

        assert!(!result.success);
        assert!(result.artifact.is_none());
        assert_eq!(result.failure, Some(FailureKind::ToolUnavailable));
        assert!(result.source_path.unwrap().exists());
    }

    #[test]
    fn test_shell_compiler_command_refused() {
        let (_dir, compiler) = compiler_with(CompilationConfig {
            compiler_path: "g++; id".to_string(),
            ..CompilationConfig::default()
        });
        let err = compiler.compile(&ctx(), "int main(){}", Some("x")).unwrap_err();
        assert!(matches!(err, EngineError::SecurityViolation(_)));
    }

    #[test]
    fn test_source_lands_under_sources() {
        let (dir, compiler) = compiler_with(CompilationConfig {
            compiler_path: "oibox-no-such-compiler".to_string(),
            ..CompilationConfig::default()
        });
        let result = compiler
            .compile(&ctx(), "int main(){}", Some("../../etc/passwd"))
            .unwrap();
        let source = result.source_path.unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(source.starts_with(root.join("sources")));
        assert!(source
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("etc_passwd-"));
    }
}
