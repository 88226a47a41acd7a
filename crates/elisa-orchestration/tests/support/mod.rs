//! Deterministic collaborator fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use elisa_orchestration::{
    AgentRunner, AgentSink, Collaborators, CommitRecord, GitService, HardwareError,
    HardwareService, Plan, Planner, TaskRunOutcome, TaskRunRequest, TestReport, TestRunner,
};
use elisa_types::{AgentProfile, AgentRole, BuildEvent, NuggetSpec, Task, TaskStatus};

pub fn task(id: &str, deps: &[&str]) -> Task {
    Task {
        id: id.into(),
        name: format!("Task {id}"),
        description: format!("Work on {id}"),
        status: TaskStatus::Pending,
        agent: "amy".into(),
        acceptance_criteria: vec!["it works".into()],
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        summary: None,
        retries: 0,
    }
}

pub fn builder_agent(name: &str) -> AgentProfile {
    AgentProfile {
        name: name.into(),
        role: AgentRole::Builder,
        persona: "friendly".into(),
        allowed_paths: None,
        restricted_paths: None,
    }
}

pub fn minimal_spec() -> NuggetSpec {
    serde_json::from_str(r#"{"nugget": {"goal": "todo app", "type": "software"}, "workflow": {}}"#)
        .unwrap()
}

/// Planner returning a fixed plan.
pub struct StaticPlanner(pub Plan);

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _spec: &NuggetSpec) -> Result<Plan> {
        Ok(self.0.clone())
    }
}

/// Planner that always errors.
pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(&self, _spec: &NuggetSpec) -> Result<Plan> {
        anyhow::bail!("planner unavailable")
    }
}

/// Agent runner following a per-task script of attempt outcomes.
///
/// Unscripted tasks (revision tasks included) succeed.
pub struct ScriptedRunner {
    script: Mutex<HashMap<String, VecDeque<bool>>>,
    tokens_per_attempt: (u64, u64),
}

impl ScriptedRunner {
    pub fn new(script: &[(&str, &[bool])]) -> Self {
        let script = script
            .iter()
            .map(|(id, attempts)| (id.to_string(), attempts.iter().copied().collect()))
            .collect();
        Self { script: Mutex::new(script), tokens_per_attempt: (120, 80) }
    }

    pub fn always_succeeding() -> Self {
        Self::new(&[])
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_per_attempt = (input, output);
        self
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run_task(
        &self,
        request: TaskRunRequest,
        _sink: &AgentSink,
        _cancel: &CancellationToken,
    ) -> Result<TaskRunOutcome> {
        let success = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.task_id)
            .and_then(|attempts| attempts.pop_front())
            .unwrap_or(true);
        let (input_tokens, output_tokens) = self.tokens_per_attempt;
        Ok(TaskRunOutcome {
            success,
            summary: if success {
                format!("finished {}", request.task_id)
            } else {
                format!("could not finish {}", request.task_id)
            },
            input_tokens,
            output_tokens,
            cost_usd: 0.001,
        })
    }
}

/// Runner that parks until cancellation arrives.
pub struct HangingRunner;

#[async_trait]
impl AgentRunner for HangingRunner {
    async fn run_task(
        &self,
        _request: TaskRunRequest,
        _sink: &AgentSink,
        cancel: &CancellationToken,
    ) -> Result<TaskRunOutcome> {
        cancel.cancelled().await;
        anyhow::bail!("model request aborted")
    }
}

/// Git fake that never observes changes; `commit_all` returns `None`.
pub struct QuietGit;

#[async_trait]
impl GitService for QuietGit {
    async fn init(&self, _workspace: &Path) -> Result<()> {
        Ok(())
    }

    async fn commit_all(
        &self,
        _workspace: &Path,
        _message: &str,
        _agent_name: &str,
        _task_id: &str,
    ) -> Result<Option<CommitRecord>> {
        Ok(None)
    }
}

/// Git fake producing a commit per task completion.
pub struct CountingGit {
    counter: AtomicU64,
}

impl CountingGit {
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }
}

#[async_trait]
impl GitService for CountingGit {
    async fn init(&self, _workspace: &Path) -> Result<()> {
        Ok(())
    }

    async fn commit_all(
        &self,
        _workspace: &Path,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitRecord>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CommitRecord {
            sha: format!("{n:07x}abc"),
            message: message.to_string(),
            agent_name: agent_name.to_string(),
            task_id: task_id.to_string(),
        }))
    }
}

/// Test runner with no behavioral tests.
pub struct NoTests;

#[async_trait]
impl TestRunner for NoTests {
    async fn has_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> bool {
        false
    }

    async fn run_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> Result<TestReport> {
        Ok(TestReport::default())
    }
}

/// Test runner returning a fixed report.
pub struct ScriptedTests(pub TestReport);

#[async_trait]
impl TestRunner for ScriptedTests {
    async fn has_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> bool {
        true
    }

    async fn run_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> Result<TestReport> {
        Ok(self.0.clone())
    }
}

/// Hardware service that always succeeds.
pub struct NoHardware;

#[async_trait]
impl HardwareService for NoHardware {
    async fn compile(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn flash(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// Hardware service whose compile step fails.
pub struct BrokenCompiler;

#[async_trait]
impl HardwareService for BrokenCompiler {
    async fn compile(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Err(HardwareError::Compilation("main.ino:12: expected ';'".into()))
    }

    async fn flash(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Ok(())
    }
}

//─────────────────────────────
//  Event stream helpers
//─────────────────────────────

pub fn event_type(event: &BuildEvent) -> &'static str {
    match event {
        BuildEvent::PlanningStarted => "planning_started",
        BuildEvent::PlanReady { .. } => "plan_ready",
        BuildEvent::TaskStarted { .. } => "task_started",
        BuildEvent::AgentOutput { .. } => "agent_output",
        BuildEvent::TokenUsage { .. } => "token_usage",
        BuildEvent::CommitCreated { .. } => "commit_created",
        BuildEvent::TaskCompleted { .. } => "task_completed",
        BuildEvent::TestResult { .. } => "test_result",
        BuildEvent::CoverageUpdate { .. } => "coverage_update",
        BuildEvent::DeployStarted { .. } => "deploy_started",
        BuildEvent::DeployComplete => "deploy_complete",
        BuildEvent::SystemHealthUpdate { .. } => "system_health_update",
        BuildEvent::SystemHealthSummary { .. } => "system_health_summary",
        BuildEvent::HumanGate { .. } => "human_gate",
        BuildEvent::TaskQuestion { .. } => "task_question",
        BuildEvent::Error { .. } => "error",
        BuildEvent::SessionComplete => "session_complete",
    }
}

/// Collect events until a terminal one (`session_complete` or a
/// non-recoverable `error`) arrives.
pub async fn collect_until_terminal(rx: &mut mpsc::Receiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv()).await
    {
        let terminal = matches!(
            &event,
            BuildEvent::SessionComplete | BuildEvent::Error { recoverable: false, .. }
        );
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

/// Index of the first event matching the predicate.
pub fn index_of<F: Fn(&BuildEvent) -> bool>(events: &[BuildEvent], pred: F) -> Option<usize> {
    events.iter().position(pred)
}

pub fn index_of_task_started(events: &[BuildEvent], id: &str) -> usize {
    index_of(events, |e| matches!(e, BuildEvent::TaskStarted { task_id, .. } if task_id == id))
        .unwrap_or_else(|| panic!("no task_started for {id}"))
}

pub fn index_of_task_completed(events: &[BuildEvent], id: &str) -> usize {
    index_of(events, |e| matches!(e, BuildEvent::TaskCompleted { task_id } if task_id == id))
        .unwrap_or_else(|| panic!("no task_completed for {id}"))
}

/// Collaborator bundle with sensible fakes everywhere.
pub fn collaborators(planner: Arc<dyn Planner>, runner: Arc<dyn AgentRunner>) -> Collaborators {
    Collaborators {
        planner,
        agent_runner: runner,
        git: Arc::new(QuietGit),
        tests: Arc::new(NoTests),
        hardware: Arc::new(NoHardware),
    }
}
