//! Planned tasks and session phases.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies or a free worker.
    Pending,
    /// Currently driven by an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed terminally (retries and gate both exhausted).
    Failed,
    /// Superseded by a revision task.
    Revising,
    /// Cannot run because a dependency failed.
    Blocked,
}

/// A single unit of work assigned to one agent.
///
/// Tasks come out of the planner and are never mutated structurally after
/// that point: a rejected task gains a freshly inserted *revision* successor
/// rather than being edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable task id.
    pub id: String,
    /// Short human name.
    pub name: String,
    /// What the assigned agent should do.
    pub description: String,
    /// Lifecycle state.
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    /// Name of the assigned agent.
    pub agent: String,
    /// Ordered acceptance criteria.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Output summary from the last attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Attempts consumed so far.
    #[serde(default)]
    pub retries: u32,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    /// Id for the `n`-th revision of this task.
    pub fn revision_id(&self, n: u32) -> String {
        format!("{}-revision-{}", self.id, n)
    }

    /// Whether this task is a revision of another.
    pub fn is_revision(&self) -> bool {
        self.id.contains("-revision-")
    }
}

/// Phase of one build session. Sessions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionPhase {
    /// Created, not yet started.
    Idle = 0,
    /// Waiting for the planner.
    Planning = 1,
    /// Running the task DAG.
    Executing = 2,
    /// Running behavioral tests.
    Testing = 3,
    /// Deploying the built artifact.
    Deploying = 4,
    /// Terminal.
    Done = 5,
}

impl SessionPhase {
    /// Wire name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Planning => "planning",
            SessionPhase::Executing => "executing",
            SessionPhase::Testing => "testing",
            SessionPhase::Deploying => "deploying",
            SessionPhase::Done => "done",
        }
    }

    /// Decode from the atomic-cell representation.
    pub fn from_u8(raw: u8) -> Option<SessionPhase> {
        match raw {
            0 => Some(SessionPhase::Idle),
            1 => Some(SessionPhase::Planning),
            2 => Some(SessionPhase::Executing),
            3 => Some(SessionPhase::Testing),
            4 => Some(SessionPhase::Deploying),
            5 => Some(SessionPhase::Done),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_ids_chain() {
        let task = Task {
            id: "build-ui".into(),
            name: "Build UI".into(),
            description: "Build the UI".into(),
            status: TaskStatus::Pending,
            agent: "builder".into(),
            acceptance_criteria: vec![],
            dependencies: vec![],
            summary: None,
            retries: 0,
        };
        assert_eq!(task.revision_id(1), "build-ui-revision-1");
        assert!(!task.is_revision());
    }

    #[test]
    fn phase_round_trips_through_u8() {
        for phase in [
            SessionPhase::Idle,
            SessionPhase::Planning,
            SessionPhase::Executing,
            SessionPhase::Testing,
            SessionPhase::Deploying,
            SessionPhase::Done,
        ] {
            assert_eq!(SessionPhase::from_u8(phase as u8), Some(phase));
        }
        assert_eq!(SessionPhase::from_u8(9), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Revising).unwrap(), r#""revising""#);
    }
}
