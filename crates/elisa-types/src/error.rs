//! Error taxonomy shared across the workspace.
//!
//! Library crates return these; the transport maps them onto HTTP status
//! codes, and in-flight failures surface as exactly one `error` event on the
//! session stream. Structured exceptions never cross the service boundary.

use serde::{Deserialize, Serialize};

/// One structured validation failure, addressed by JSON-ish path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecIssue {
    /// Dotted path into the spec, e.g. "nugget.goal".
    pub path: String,
    /// What is wrong with the value there.
    pub message: String,
}

impl SpecIssue {
    /// Build an issue for `path`.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl std::fmt::Display for SpecIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors surfaced by the orchestrator core.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The spec failed validation. Surfaced at start, never during a run.
    #[error("invalid nugget spec ({} issue(s))", .0.len())]
    InvalidSpec(Vec<SpecIssue>),

    /// A concurrent caller already won the start race.
    #[error("session already started")]
    AlreadyStarted,

    /// The supplied workspace path failed policy checks.
    #[error("workspace path rejected: {0}")]
    WorkspacePathRejected(String),

    /// No session with the given id.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The external planner failed.
    #[error("planner failed: {0}")]
    PlannerFailed(String),

    /// The planner returned a cyclic task graph.
    #[error("circular dependency detected involving task '{0}'")]
    CycleDetected(String),

    /// A task failed after retries and gate resolution.
    #[error("task failed terminally: {0}")]
    TaskFailedTerminal(String),

    /// Firmware compilation failed during deploy.
    #[error("Compilation failed: {0}")]
    CompilationFailed(String),

    /// The effective token budget was exhausted.
    #[error("token budget exceeded")]
    BudgetExceeded,

    /// The session was cancelled.
    #[error("build cancelled")]
    Cancelled,

    /// A transient failure the scheduler retries internally.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl OrchestratorError {
    /// Whether the session can continue after this error.
    pub fn recoverable(&self) -> bool {
        matches!(self, OrchestratorError::Transient(_))
    }
}
