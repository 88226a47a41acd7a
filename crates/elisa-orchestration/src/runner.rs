//! Collaborator interfaces consumed by the orchestrator.
//!
//! The planner, agent runner, git, test, and hardware services are external
//! to the core. They are injected into the orchestrator as trait objects so
//! tests can substitute deterministic fakes, and so the core never reaches
//! for a module-level singleton.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use elisa_types::{AgentProfile, NuggetSpec, Task};

use crate::gate::InteractionSlot;
use crate::events::EventStream;

/// Plan returned by the external planner.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Planned tasks in planner order.
    pub tasks: Vec<Task>,
    /// Named agents the tasks reference.
    pub agents: Vec<AgentProfile>,
    /// Planner's explanation of the plan.
    pub explanation: String,
}

/// External planner: turns a spec into a task DAG and agent roster.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a plan for the spec.
    async fn plan(&self, spec: &NuggetSpec) -> Result<Plan>;
}

/// One task execution request handed to the agent runner.
#[derive(Debug, Clone)]
pub struct TaskRunRequest {
    /// Task id.
    pub task_id: String,
    /// Assigned agent name.
    pub agent_name: String,
    /// Role-specific system prompt.
    pub system_prompt: String,
    /// Layered user prompt.
    pub user_prompt: String,
    /// Turn cap for this attempt.
    pub max_turns: u32,
}

/// What the agent runner reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunOutcome {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Output summary; failure context on unsuccessful attempts.
    pub summary: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens consumed.
    pub output_tokens: u64,
    /// Cost attributed to the attempt.
    pub cost_usd: f64,
}

/// Errors an [`AgentSink::ask`] call can produce.
#[derive(Debug, thiserror::Error)]
pub enum QuestionError {
    /// Another gate or question is already pending for the session.
    #[error("another interaction is already pending")]
    SlotOccupied,
    /// No answer arrived within the configured window.
    #[error("question timeout")]
    Timeout,
    /// The session was cancelled while waiting.
    #[error("cancelled while waiting for an answer")]
    Cancelled,
}

/// Handle the agent runner uses to stream output and ask mid-task questions.
///
/// Created by the orchestrator per attempt; everything funnels into the
/// session's single event stream.
pub struct AgentSink {
    task_id: String,
    events: EventStream,
    slot: InteractionSlot,
    cancel: CancellationToken,
    question_timeout: std::time::Duration,
}

impl AgentSink {
    pub(crate) fn new(
        task_id: String,
        events: EventStream,
        slot: InteractionSlot,
        cancel: CancellationToken,
        question_timeout: std::time::Duration,
    ) -> Self {
        Self { task_id, events, slot, cancel, question_timeout }
    }

    /// Stream an output chunk for the current task.
    pub async fn output(&self, content: impl Into<String>) {
        self.events
            .emit(elisa_types::BuildEvent::AgentOutput {
                task_id: self.task_id.clone(),
                content: content.into(),
            })
            .await;
    }

    /// Ask the user a question and wait for the answers object.
    ///
    /// Emits a `task_question` event and holds the attempt until the answer
    /// arrives, the window elapses, or the session is cancelled. The answers
    /// object is returned so the runner can inject it into the next agent
    /// turn as a `<user_input name="answers">` block.
    pub async fn ask(&self, prompt: impl Into<String>, schema: Value) -> Result<Value, QuestionError> {
        let prompt = prompt.into();
        let rx = self
            .slot
            .open_question(self.task_id.clone())
            .map_err(|_| QuestionError::SlotOccupied)?;

        self.events
            .emit(elisa_types::BuildEvent::TaskQuestion {
                task_id: self.task_id.clone(),
                prompt,
                schema,
            })
            .await;

        tokio::select! {
            answer = rx => answer.map_err(|_| QuestionError::Cancelled),
            _ = tokio::time::sleep(self.question_timeout) => {
                self.slot.abandon_question(&self.task_id);
                Err(QuestionError::Timeout)
            }
            _ = self.cancel.cancelled() => {
                self.slot.abandon_question(&self.task_id);
                Err(QuestionError::Cancelled)
            }
        }
    }
}

/// Executes one task attempt. Opaque to the core.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one attempt. Must observe `cancel` at its own suspension points
    /// and propagate it into the underlying model request.
    async fn run_task(
        &self,
        request: TaskRunRequest,
        sink: &AgentSink,
        cancel: &CancellationToken,
    ) -> Result<TaskRunOutcome>;
}

/// A commit recorded in the session workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit sha.
    pub sha: String,
    /// Commit message.
    pub message: String,
    /// Agent that authored the commit.
    pub agent_name: String,
    /// Task the commit belongs to.
    pub task_id: String,
}

/// Narrow git interface the core drives.
#[async_trait]
pub trait GitService: Send + Sync {
    /// Initialize version control in the workspace. Idempotent.
    async fn init(&self, workspace: &Path) -> Result<()>;

    /// Commit everything changed since the last commit.
    ///
    /// Returns `None` when the workspace is unchanged.
    async fn commit_all(
        &self,
        workspace: &Path,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitRecord>>;
}

/// One behavioral test outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// Test name.
    pub test_name: String,
    /// Whether it passed.
    pub passed: bool,
    /// Runner detail output.
    pub details: String,
}

/// Aggregated test report exposed through the orchestrator snapshot getter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestReport {
    /// Individual case results.
    pub cases: Vec<TestCaseResult>,
    /// Coverage percentage when the runner measures it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

/// Narrow test-runner interface the core drives during the testing phase.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Whether behavioral tests exist for this spec/workspace.
    async fn has_tests(&self, workspace: &Path, spec: &NuggetSpec) -> bool;

    /// Run the behavioral tests.
    async fn run_tests(&self, workspace: &Path, spec: &NuggetSpec) -> Result<TestReport>;
}

/// Hardware deploy failure modes.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Firmware compilation failed; surfaced as `Compilation failed: ...`.
    #[error("{0}")]
    Compilation(String),
    /// Device communication failed.
    #[error("{0}")]
    Device(String),
}

/// Narrow hardware interface driven only for hardware deploy targets.
#[async_trait]
pub trait HardwareService: Send + Sync {
    /// Compile the firmware in the workspace.
    async fn compile(&self, workspace: &Path) -> Result<(), HardwareError>;

    /// Flash the compiled firmware to the device.
    async fn flash(&self, workspace: &Path) -> Result<(), HardwareError>;
}
