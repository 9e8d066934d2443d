use crate::config::loader::EngineConfig;
use crate::config::types::{
    CompileResult, ComparisonResult, DebugResult, ExecutionResult, LimitOverride, Result,
};
use crate::config::validator::validate_config;
use crate::core::session::{OperationKind, RequestContext};
use crate::core::types::{Operation, Response};
use crate::judge::compare::{compare, CompareOptions};
use crate::judge::compile::Compiler;
use crate::judge::debug::Debugger;
use crate::judge::execute::Executor;
use crate::judge::pipeline::{JudgePipeline, JudgeReport, JudgeRequest};
use crate::judge::toolchain::{probe_tool, GnuToolchain, ToolProbe, ToolchainAdapter};
use crate::kernel::rlimits::ResourceLimiter;
use crate::observability::audit::init_security_logger;
use crate::safety::path_guard::{PathGuard, TempCategory};
use crate::safety::workspace::{TempFileGuard, TempTree};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of probing the external toolchain and the managed root
#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub compiler: ToolProbe,
    pub debugger: ToolProbe,
    pub temp_root: PathBuf,
    pub temp_root_writable: bool,
}

impl DependencyReport {
    pub fn all_available(&self) -> bool {
        self.compiler.available && self.debugger.available && self.temp_root_writable
    }
}

/// Process-wide engine. Holds only immutable configuration, so one instance
/// serves any number of concurrent requests.
pub struct Engine {
    config: EngineConfig,
    guard: PathGuard,
    toolchain: Arc<dyn ToolchainAdapter>,
    compiler: Compiler,
    executor: Executor,
    debugger: Debugger,
}

impl Engine {
    /// Validate `config`, prepare the managed tree and open the audit log.
    pub fn new(config: EngineConfig) -> Result<Self> {
        validate_config(&config)?;

        let guard = PathGuard::new(config.temp_root())?;
        TempTree::new(&guard).ensure_layout()?;
        init_security_logger(config.audit_log_path());

        let toolchain: Arc<dyn ToolchainAdapter> =
            Arc::new(GnuToolchain::new(&config.compilation, &config.debugger));

        let compiler = Compiler::new(
            guard.clone(),
            config.compilation.clone(),
            Arc::clone(&toolchain),
        );
        let limiter = ResourceLimiter::new(config.execution.clone());
        let executor = Executor::new(guard.clone(), limiter.clone());
        let debugger = Debugger::new(
            guard.clone(),
            config.debugger.clone(),
            Arc::clone(&toolchain),
            limiter,
        );

        log::info!("Engine ready, managed root {}", guard.root().display());

        Ok(Self {
            config,
            guard,
            toolchain,
            compiler,
            executor,
            debugger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn compile(&self, source: &str, name: Option<&str>) -> Result<CompileResult> {
        let ctx = RequestContext::new(
            OperationKind::Compile,
            json!({ "source_bytes": source.len(), "name": name }),
        );
        self.compiler.compile(&ctx, source, name)
    }

    pub fn run(
        &self,
        binary: &Path,
        input: &str,
        limits: &LimitOverride,
    ) -> Result<ExecutionResult> {
        let ctx = RequestContext::new(
            OperationKind::Run,
            json!({ "binary": binary, "input_bytes": input.len(), "limits": limits }),
        );
        self.executor.run(&ctx, binary, input, limits)
    }

    pub fn compare(
        &self,
        actual: &str,
        expected: &str,
        options: &CompareOptions,
    ) -> ComparisonResult {
        compare(actual, expected, options)
    }

    pub fn debug(&self, binary: &Path, script: Option<&str>) -> Result<DebugResult> {
        let ctx = RequestContext::new(
            OperationKind::Debug,
            json!({ "binary": binary, "script_bytes": script.map(str::len) }),
        );
        self.debugger.debug(&ctx, binary, script)
    }

    pub fn judge(&self, request: &JudgeRequest) -> Result<JudgeReport> {
        let ctx = RequestContext::new(
            OperationKind::Judge,
            json!({ "source_bytes": request.source.len(), "cases": request.cases.len() }),
        );
        self.pipeline().judge(&ctx, request)
    }

    /// Single entry point for protocol layers. Never fails: requests the
    /// engine refuses come back as [`Response::Rejected`].
    pub fn handle(&self, operation: Operation) -> Response {
        let ctx = RequestContext::new(operation.kind(), operation.summary());
        log::info!(
            "[{}] {} started {}",
            ctx.session_id(),
            ctx.operation(),
            ctx.arguments()
        );

        let result = match &operation {
            Operation::Compile { source, name } => self
                .compiler
                .compile(&ctx, source, name.as_deref())
                .map(Response::Compiled),
            Operation::Run {
                binary,
                input,
                limits,
            } => self
                .executor
                .run(&ctx, binary, input, limits)
                .map(Response::Executed),
            Operation::Compare {
                actual,
                expected,
                options,
            } => Ok(Response::Compared(compare(actual, expected, options))),
            Operation::Debug { binary, script } => self
                .debugger
                .debug(&ctx, binary, script.as_deref())
                .map(Response::Debugged),
            Operation::Judge(request) => self.pipeline().judge(&ctx, request).map(Response::Judged),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[{}] {} rejected: {}", ctx.session_id(), ctx.operation(), e);
                Response::rejected(&e)
            }
        };

        log::info!(
            "[{}] {} finished in {}ms",
            ctx.session_id(),
            ctx.operation(),
            ctx.elapsed_ms()
        );
        response
    }

    /// Remove managed files older than `max_age`, or the configured
    /// retention when `None`.
    pub fn cleanup(&self, max_age: Option<Duration>) -> Result<usize> {
        let max_age =
            max_age.unwrap_or_else(|| Duration::from_secs(self.config.workspace.retention_secs));
        let removed = TempTree::new(&self.guard).prune_older_than(max_age)?;
        log::info!(
            "Removed {} managed files older than {}s",
            removed,
            max_age.as_secs()
        );
        Ok(removed)
    }

    pub fn check_deps(&self) -> DependencyReport {
        DependencyReport {
            compiler: probe_tool(self.toolchain.compiler()),
            debugger: probe_tool(self.toolchain.debugger()),
            temp_root: self.guard.root().to_path_buf(),
            temp_root_writable: self.probe_writable(),
        }
    }

    fn probe_writable(&self) -> bool {
        let probe = self
            .guard
            .secure_temp_path(TempCategory::Outputs)
            .and_then(|path| {
                self.guard.write_new(&path, b"")?;
                Ok(TempFileGuard::new(path))
            });
        match probe {
            Ok(_guard) => true,
            Err(e) => {
                log::warn!("Managed root is not writable: {}", e);
                false
            }
        }
    }

    fn pipeline(&self) -> JudgePipeline<'_> {
        JudgePipeline::new(&self.guard, &self.compiler, &self.executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::WorkspaceConfig;
    use crate::config::types::FailureKind;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workspace: WorkspaceConfig {
                temp_dir: Some(dir.path().to_path_buf()),
                ..WorkspaceConfig::default()
            },
            ..EngineConfig::default()
        };
        let engine = Engine::new(config).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_new_creates_layout() {
        let (_dir, engine) = engine();
        for category in TempCategory::ALL {
            assert!(engine.root().join(category.dir_name()).is_dir());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.execution.max_time_ms = 0;
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_handle_compare() {
        let (_dir, engine) = engine();
        let response = engine.handle(Operation::Compare {
            actual: "3 5\n".to_string(),
            expected: "3  5".to_string(),
            options: CompareOptions::default(),
        });
        match response {
            Response::Compared(result) => assert!(result.matched),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_handle_rejects_foreign_binary() {
        let (_dir, engine) = engine();
        let response = engine.handle(Operation::Run {
            binary: PathBuf::from("/bin/sh"),
            input: String::new(),
            limits: LimitOverride::default(),
        });
        match response {
            Response::Rejected { kind, .. } => assert_eq!(kind, FailureKind::SecurityViolation),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_handle_rejects_bad_name() {
        let (_dir, engine) = engine();
        let response = engine.handle(Operation::Compile {
            source: "int main(){}".to_string(),
            name: Some("../../..".to_string()),
        });
        assert!(response.is_rejected());
    }

    #[test]
    fn test_cleanup_keeps_fresh_files() {
        let (_dir, engine) = engine();
        let path = engine
            .guard
            .secure_temp_path(TempCategory::Inputs)
            .unwrap();
        engine.guard.write_new(&path, b"1 2\n").unwrap();

        assert_eq!(engine.cleanup(Some(Duration::from_secs(3600))).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_root_is_writable() {
        let (_dir, engine) = engine();
        assert!(engine.probe_writable());
    }
}
