use crate::config::types::{
    CompileResult, ComparisonResult, DebugResult, EngineError, ExecutionResult, FailureKind,
    LimitOverride,
};
use crate::core::session::OperationKind;
use crate::judge::compare::CompareOptions;
use crate::judge::pipeline::{JudgeReport, JudgeRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

/// One engine request. The set is closed; [`crate::core::engine::Engine::handle`]
/// matches it exhaustively.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Compile {
        source: String,
        #[serde(default)]
        name: Option<String>,
    },
    Run {
        binary: PathBuf,
        #[serde(default)]
        input: String,
        #[serde(default)]
        limits: LimitOverride,
    },
    Compare {
        actual: String,
        expected: String,
        #[serde(default)]
        options: CompareOptions,
    },
    Debug {
        binary: PathBuf,
        #[serde(default)]
        script: Option<String>,
    },
    Judge(JudgeRequest),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Compile { .. } => OperationKind::Compile,
            Operation::Run { .. } => OperationKind::Run,
            Operation::Compare { .. } => OperationKind::Compare,
            Operation::Debug { .. } => OperationKind::Debug,
            Operation::Judge(_) => OperationKind::Judge,
        }
    }

    /// Argument summary for correlation records. Payloads appear as byte
    /// counts only.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Operation::Compile { source, name } => json!({
                "source_bytes": source.len(),
                "name": name,
            }),
            Operation::Run {
                binary,
                input,
                limits,
            } => json!({
                "binary": binary,
                "input_bytes": input.len(),
                "limits": limits,
            }),
            Operation::Compare {
                actual,
                expected,
                options,
            } => json!({
                "actual_bytes": actual.len(),
                "expected_bytes": expected.len(),
                "options": options,
            }),
            Operation::Debug { binary, script } => json!({
                "binary": binary,
                "script_bytes": script.as_ref().map(|s| s.len()),
            }),
            Operation::Judge(request) => json!({
                "source_bytes": request.source.len(),
                "name": request.name,
                "cases": request.cases.len(),
                "limits": request.limits,
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum Response {
    Compiled(CompileResult),
    Executed(ExecutionResult),
    Compared(ComparisonResult),
    Debugged(DebugResult),
    Judged(JudgeReport),
    /// Request refused before any process was spawned
    Rejected { kind: FailureKind, message: String },
}

impl Response {
    pub fn rejected(err: &EngineError) -> Self {
        Response::Rejected {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Response::Rejected { .. })
    }
}
