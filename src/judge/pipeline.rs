use crate::config::types::{
    CompileResult, ComparisonResult, ExecutionResult, LimitOverride, Result,
};
use crate::core::session::RequestContext;
use crate::judge::compare::{compare, CompareOptions};
use crate::judge::compile::Compiler;
use crate::judge::execute::Executor;
use crate::safety::path_guard::{PathGuard, TempCategory};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    /// Expected stdout; without one a case passes on a clean run
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: LimitOverride,
    #[serde(default)]
    pub compare: CompareOptions,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub execution: ExecutionResult,
    pub comparison: Option<ComparisonResult>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.execution.success && self.comparison.as_ref().map_or(true, |c| c.matched)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeReport {
    pub compile: CompileResult,
    pub cases: Vec<CaseReport>,
    pub passed: usize,
    pub total: usize,
}

/// Compile once, then run and check every case against the same binary
pub struct JudgePipeline<'a> {
    guard: &'a PathGuard,
    compiler: &'a Compiler,
    executor: &'a Executor,
}

impl<'a> JudgePipeline<'a> {
    pub fn new(guard: &'a PathGuard, compiler: &'a Compiler, executor: &'a Executor) -> Self {
        Self {
            guard,
            compiler,
            executor,
        }
    }

    pub fn judge(&self, ctx: &RequestContext, request: &JudgeRequest) -> Result<JudgeReport> {
        let compile = self
            .compiler
            .compile(ctx, &request.source, request.name.as_deref())?;
        let total = request.cases.len();

        let artifact = match (&compile.artifact, compile.success) {
            (Some(artifact), true) => artifact.clone(),
            _ => {
                log::info!(
                    "[{}] judge stopped at compile: {}",
                    ctx.session_id(),
                    compile.message.as_deref().unwrap_or("compile failed")
                );
                return Ok(JudgeReport {
                    compile,
                    cases: Vec::new(),
                    passed: 0,
                    total,
                });
            }
        };

        let mut cases = Vec::with_capacity(total);
        for (index, case) in request.cases.iter().enumerate() {
            let execution = self
                .executor
                .run(ctx, &artifact, &case.input, &request.limits)?;

            let comparison = match (&case.expected, &execution.stdout) {
                (Some(expected), Some(actual)) => {
                    self.keep_expected(index, expected);
                    Some(compare(actual, expected, &request.compare))
                }
                _ => None,
            };

            let report = CaseReport {
                index,
                execution,
                comparison,
            };
            log::debug!(
                "[{}] case {} {}",
                ctx.session_id(),
                index,
                if report.passed() { "passed" } else { "failed" }
            );
            cases.push(report);
        }

        let passed = cases.iter().filter(|c| c.passed()).count();
        log::info!(
            "[{}] judge finished: {}/{} cases passed",
            ctx.session_id(),
            passed,
            total
        );

        Ok(JudgeReport {
            compile,
            cases,
            passed,
            total,
        })
    }

    /// Expected text is kept under tests/ next to the run's input and output
    fn keep_expected(&self, index: usize, expected: &str) {
        let written = self
            .guard
            .secure_temp_path(TempCategory::Tests)
            .map(|p| p.with_extension(format!("case{}.expected", index)))
            .and_then(|p| self.guard.write_new(&p, expected.as_bytes()));
        if let Err(e) = written {
            log::warn!("Failed to keep expected output for case {}: {}", index, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{CompilationConfig, DebuggerConfig, ExecutionConfig};
    use crate::config::types::{FailureKind, Outcome, OutputIntegrity, ResourceLimits};
    use crate::core::session::OperationKind;
    use crate::judge::toolchain::GnuToolchain;
    use crate::kernel::rlimits::ResourceLimiter;
    use std::sync::Arc;

    fn execution(success: bool) -> ExecutionResult {
        ExecutionResult {
            success,
            outcome: if success { Outcome::Ok } else { Outcome::NonZeroExit },
            stdout: Some(String::new()),
            stderr: String::new(),
            elapsed_ms: 1,
            cpu_ms: 0,
            memory_kb: 0,
            exit_code: if success { 0 } else { 1 },
            signal: None,
            pid: None,
            output_integrity: OutputIntegrity::Complete,
            limits: ResourceLimits {
                time_ms: 1000,
                memory_bytes: 256 * 1024 * 1024,
                output_bytes: 1024,
            },
            enforcement: crate::config::types::LimitEnforcement::Applied {
                controls: Vec::new(),
            },
            adjustments: Vec::new(),
            failure: None,
            message: None,
        }
    }

    #[test]
    fn test_case_pass_rules() {
        let clean = CaseReport {
            index: 0,
            execution: execution(true),
            comparison: None,
        };
        assert!(clean.passed());

        let crashed = CaseReport {
            index: 1,
            execution: execution(false),
            comparison: None,
        };
        assert!(!crashed.passed());

        let wrong = CaseReport {
            index: 2,
            execution: execution(true),
            comparison: Some(compare("1", "2", &CompareOptions::default())),
        };
        assert!(!wrong.passed());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: JudgeRequest =
            serde_json::from_str(r#"{"source": "int main(){}", "cases": [{"input": "1"}]}"#)
                .unwrap();
        assert_eq!(request.cases.len(), 1);
        assert!(request.cases[0].expected.is_none());
        assert!(request.compare.ignore_whitespace);
        assert!(request.limits.time_limit_ms.is_none());
    }

    #[test]
    fn test_compile_failure_stops_before_cases() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let compilation = CompilationConfig {
            compiler_path: "oibox-no-such-compiler".to_string(),
            ..CompilationConfig::default()
        };
        let toolchain = Arc::new(GnuToolchain::new(&compilation, &DebuggerConfig::default()));
        let compiler = Compiler::new(guard.clone(), compilation, toolchain);
        let executor = Executor::new(
            guard.clone(),
            ResourceLimiter::new(ExecutionConfig::default()),
        );

        let request = JudgeRequest {
            source: "int main(){}".to_string(),
            cases: vec![TestCase::default(), TestCase::default()],
            ..JudgeRequest::default()
        };
        let ctx = RequestContext::new(OperationKind::Judge, serde_json::json!({}));
        let report = JudgePipeline::new(&guard, &compiler, &executor)
            .judge(&ctx, &request)
            .unwrap();

        assert!(!report.compile.success);
        assert_eq!(report.compile.failure, Some(FailureKind::ToolUnavailable));
        assert!(report.cases.is_empty());
        assert_eq!(report.passed, 0);
        assert_eq!(report.total, 2);
    }
}
