use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Compile,
    Run,
    Compare,
    Debug,
    Judge,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Compile => "compile",
            OperationKind::Run => "run",
            OperationKind::Compare => "compare",
            OperationKind::Debug => "debug",
            OperationKind::Judge => "judge",
        };
        f.write_str(name)
    }
}

/// Per-request correlation record. Passed by reference through every stage
/// and dropped when the request completes; nothing keeps it afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct RequestContext {
    session_id: String,
    started_at: DateTime<Utc>,
    operation: OperationKind,
    /// Argument summary; sizes only, never payload text
    arguments: serde_json::Value,
}

impl RequestContext {
    pub fn new(operation: OperationKind, arguments: serde_json::Value) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            operation,
            arguments,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn arguments(&self) -> &serde_json::Value {
        &self.arguments
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_distinct() {
        let a = RequestContext::new(OperationKind::Run, serde_json::json!({}));
        let b = RequestContext::new(OperationKind::Run, serde_json::json!({}));
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(a.operation(), OperationKind::Run);
    }

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(OperationKind::Compile.to_string(), "compile");
        assert_eq!(OperationKind::Judge.to_string(), "judge");
    }
}
