//! The closed event union carried on a session's stream.
//!
//! Every event is a JSON object tagged by `type`. The core never attaches
//! timestamps; the transport adds them when relaying downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentProfile;
use crate::task::Task;

/// Well-known gate kinds. Spec-configured gates use their configured name.
pub mod gate_kind {
    /// A task exhausted its retries.
    pub const RETRIES_EXHAUSTED: &str = "retries_exhausted";
    /// The effective token budget was exceeded.
    pub const BUDGET_WARNING: &str = "budget_warning";
}

/// Aggregate counts behind a health summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthBreakdown {
    /// Behavioral tests that passed.
    pub tests_passed: usize,
    /// Behavioral tests that failed.
    pub tests_failed: usize,
    /// Tasks that completed.
    pub tasks_completed: usize,
    /// Tasks that failed terminally.
    pub tasks_failed: usize,
}

/// One event on the session stream.
///
/// The union is closed: the transport can rely on `type` never carrying an
/// unknown tag within one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    /// The planner was invoked.
    PlanningStarted,
    /// The planner returned a task DAG and agent roster.
    PlanReady {
        /// Planned tasks in planner order.
        tasks: Vec<Task>,
        /// Named agents.
        agents: Vec<AgentProfile>,
        /// Planner's own explanation of the plan.
        explanation: String,
    },
    /// A task was dispatched to its agent.
    TaskStarted {
        /// Task id.
        task_id: String,
        /// Assigned agent name.
        agent_name: String,
    },
    /// Streaming output from an agent turn.
    AgentOutput {
        /// Task id.
        task_id: String,
        /// Output chunk.
        content: String,
    },
    /// Token consumption for one agent.
    TokenUsage {
        /// Agent name.
        agent_name: String,
        /// Prompt tokens consumed.
        input_tokens: u64,
        /// Completion tokens consumed.
        output_tokens: u64,
        /// Cost attributed to this usage.
        cost_usd: f64,
    },
    /// A commit landed in the session workspace.
    CommitCreated {
        /// Commit sha.
        sha: String,
        /// Agent that authored the commit.
        agent_name: String,
        /// Task the commit belongs to.
        task_id: String,
    },
    /// A task finished successfully.
    TaskCompleted {
        /// Task id.
        task_id: String,
    },
    /// One behavioral test finished.
    TestResult {
        /// Test name.
        test_name: String,
        /// Whether it passed.
        passed: bool,
        /// Runner detail output.
        details: String,
    },
    /// Coverage percentage changed.
    CoverageUpdate {
        /// New coverage percentage.
        percentage: f64,
    },
    /// The deploy phase began.
    DeployStarted {
        /// Deploy target, e.g. "web".
        target: String,
    },
    /// The deploy phase finished.
    DeployComplete,
    /// A single health check reported.
    SystemHealthUpdate {
        /// Component checked.
        component: String,
        /// Check outcome, e.g. "ok".
        status: String,
        /// Optional detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Aggregated session health.
    SystemHealthSummary {
        /// Score in [0, 100].
        health_score: f64,
        /// Letter grade A-F.
        grade: String,
        /// Counts behind the score.
        breakdown: HealthBreakdown,
    },
    /// The session paused on a human gate.
    HumanGate {
        /// Gate kind; see [`gate_kind`].
        kind: String,
        /// Human-readable context for the approver.
        context: String,
    },
    /// An agent asked a mid-task question.
    TaskQuestion {
        /// Task the question belongs to.
        task_id: String,
        /// Question shown to the user.
        prompt: String,
        /// JSON schema of the expected answers object.
        schema: Value,
    },
    /// Something went wrong.
    Error {
        /// Human-readable message.
        message: String,
        /// Whether the session continues afterwards.
        recoverable: bool,
    },
    /// Final event of a successful session.
    SessionComplete,
}

impl BuildEvent {
    /// Task id this event concerns, when it concerns exactly one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            BuildEvent::TaskStarted { task_id, .. }
            | BuildEvent::AgentOutput { task_id, .. }
            | BuildEvent::CommitCreated { task_id, .. }
            | BuildEvent::TaskCompleted { task_id }
            | BuildEvent::TaskQuestion { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_on_type() {
        let json = serde_json::to_value(&BuildEvent::TaskCompleted { task_id: "t1".into() }).unwrap();
        assert_eq!(json["type"], "task_completed");
        assert_eq!(json["task_id"], "t1");
    }

    #[test]
    fn error_event_round_trips() {
        let event = BuildEvent::Error { message: "Build stopped by user".into(), recoverable: false };
        let json = serde_json::to_string(&event).unwrap();
        let back: BuildEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn session_complete_is_bare() {
        let json = serde_json::to_value(&BuildEvent::SessionComplete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "session_complete"}));
    }
}
