#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **elisa-orchestration** – Session orchestration core for the elisa build
//! orchestrator.
//!
//! This crate owns the hardest-engineering part of the system: the session
//! state machine, the DAG scheduler with its retry/revision loop, the human
//! gate and mid-task question protocols, the token budget with reservations,
//! and the single ordered event stream.
//!
//! ## Architecture
//!
//! - **Orchestrator**: session-scoped coordinator that owns all mutable run
//!   state and drives planning → executing → testing → deploying → done
//! - **TaskGraph**: dependency validation, cycle detection, ready set
//! - **TokenBudget**: actual + reserved accounting with a one-shot 80% warning
//! - **InteractionSlot**: the single pending gate/question per session
//! - **EventStream**: one bounded FIFO channel per session, one consumer
//! - **SessionStore**: in-memory registry keyed by opaque id
//!
//! External collaborators (planner, agent runner, git, tests, hardware) are
//! injected as trait objects; see [`runner`].
//!
//! ## Concurrency model
//!
//! Within a session every state mutation goes through the coordinator task.
//! Workers run agent attempts concurrently up to the session's parallelism
//! bound and communicate results back through the join set; they never touch
//! the task list themselves. Cancellation is cooperative: a
//! `CancellationToken` is observed at every suspension point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use elisa_prompt::{assemble, PromptContext, DEFAULT_MAX_TURNS};
use elisa_types::{
    gate_kind, AgentProfile, BuildEvent, DeployTarget, GateTrigger, NuggetSpec, OrchestratorError,
    SessionPhase, Task, TaskStatus,
};

pub mod budget;
pub mod dag;
pub mod events;
pub mod gate;
pub mod health;
pub mod phase;
pub mod runner;
pub mod store;

pub use budget::{TokenBudget, DEFAULT_MAX_BUDGET, DEFAULT_RESERVED_PER_TASK};
pub use dag::{next_revision_id, GraphError, TaskGraph};
pub use events::{EventStream, EVENT_CHANNEL_CAPACITY};
pub use gate::{GateResponse, InteractionSlot, SlotError};
pub use phase::PhaseCell;
pub use runner::{
    AgentRunner, AgentSink, CommitRecord, GitService, HardwareError, HardwareService, Plan,
    Planner, QuestionError, TaskRunOutcome, TaskRunRequest, TestCaseResult, TestReport, TestRunner,
};
pub use store::{SessionSnapshot, SessionStore, StoreConfig};

/// Attempts per task before the retries-exhausted gate opens.
pub const MAX_RETRIES: u32 = 3;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent tasks per session. Independent sessions are unbounded.
    pub max_parallel_tasks: usize,
    /// Session token budget.
    pub max_budget: u64,
    /// Wall-clock cap per agent attempt.
    pub attempt_timeout: Duration,
    /// How long a human gate waits before the safe default applies.
    pub gate_timeout: Duration,
    /// How long a mid-task question waits before the attempt fails.
    pub question_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 1,
            max_budget: DEFAULT_MAX_BUDGET,
            attempt_timeout: Duration::from_secs(600),
            gate_timeout: Duration::from_secs(24 * 60 * 60),
            question_timeout: Duration::from_secs(300),
        }
    }
}

/// External collaborators injected into every orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    /// Produces the task DAG and agent roster.
    pub planner: Arc<dyn Planner>,
    /// Executes individual task attempts.
    pub agent_runner: Arc<dyn AgentRunner>,
    /// Version control in the session workspace.
    pub git: Arc<dyn GitService>,
    /// Behavioral test execution.
    pub tests: Arc<dyn TestRunner>,
    /// Firmware compile/flash for hardware targets.
    pub hardware: Arc<dyn HardwareService>,
}

/// Mutable run state, owned by the coordinator.
struct RunState {
    tasks: IndexMap<String, Task>,
    agents: HashMap<String, AgentProfile>,
    summaries: HashMap<String, String>,
    commits: Vec<CommitRecord>,
    test_report: Option<TestReport>,
    planned_total: usize,
    midpoint_fired: bool,
}

/// What a worker reports back for one task.
enum WorkerOutcome {
    Completed { summary: String },
    RetriesExhausted { last_summary: String },
    Cancelled,
}

/// One live build session's orchestrator.
pub struct Orchestrator {
    session_id: String,
    spec: NuggetSpec,
    phase: Arc<PhaseCell>,
    config: OrchestratorConfig,
    collaborators: Collaborators,
    state: Mutex<RunState>,
    budget: Mutex<TokenBudget>,
    budget_gate_acknowledged: AtomicBool,
    events: EventStream,
    slot: InteractionSlot,
    cancel: CancellationToken,
    workspace: PathBuf,
    user_workspace: bool,
}

impl Orchestrator {
    /// Create an orchestrator for a validated spec.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        spec: NuggetSpec,
        phase: Arc<PhaseCell>,
        config: OrchestratorConfig,
        collaborators: Collaborators,
        events: EventStream,
        cancel: CancellationToken,
        workspace: PathBuf,
        user_workspace: bool,
    ) -> Arc<Self> {
        let max_budget = config.max_budget;
        Arc::new(Self {
            session_id,
            spec,
            phase,
            config,
            collaborators,
            state: Mutex::new(RunState {
                tasks: IndexMap::new(),
                agents: HashMap::new(),
                summaries: HashMap::new(),
                commits: Vec::new(),
                test_report: None,
                planned_total: 0,
                midpoint_fired: false,
            }),
            budget: Mutex::new(TokenBudget::new(max_budget)),
            budget_gate_acknowledged: AtomicBool::new(false),
            events,
            slot: InteractionSlot::new(),
            cancel,
            workspace,
            user_workspace,
        })
    }

    //─────────────────────────────
    //  Public surface
    //─────────────────────────────

    /// Session id this orchestrator serves.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current task list snapshot.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().expect("state lock poisoned").tasks.values().cloned().collect()
    }

    /// Current agent roster snapshot.
    pub fn agents(&self) -> Vec<AgentProfile> {
        self.state.lock().expect("state lock poisoned").agents.values().cloned().collect()
    }

    /// Accumulated commit log snapshot.
    pub fn git_log(&self) -> Vec<CommitRecord> {
        self.state.lock().expect("state lock poisoned").commits.clone()
    }

    /// Test report snapshot, once the testing phase ran.
    pub fn test_report(&self) -> Option<TestReport> {
        self.state.lock().expect("state lock poisoned").test_report.clone()
    }

    /// The session workspace on disk.
    pub fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    /// Whether the user supplied the workspace path at start.
    pub fn user_workspace(&self) -> bool {
        self.user_workspace
    }

    /// Deliver a human-gate response.
    pub fn respond_to_gate(&self, approved: bool, feedback: Option<String>) -> Result<(), SlotError> {
        self.slot.respond_gate(GateResponse { approved, feedback })
    }

    /// Deliver mid-task question answers.
    pub fn respond_to_question(&self, task_id: &str, answers: serde_json::Value) -> Result<(), SlotError> {
        self.slot.respond_question(task_id, answers)
    }

    /// Cooperatively cancel the session. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(session_id = %self.session_id, "session cancel requested");
            self.cancel.cancel();
        }
        self.slot.cancel_pending();
    }

    //─────────────────────────────
    //  Run loop
    //─────────────────────────────

    /// Drive the session to its terminal state.
    ///
    /// Exactly one terminal event is emitted: `session_complete` on success,
    /// a non-recoverable `error` otherwise.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn run(self: Arc<Self>) {
        let result = self.clone().run_inner().await;
        match result {
            Ok(()) => {
                self.events.emit(BuildEvent::SessionComplete).await;
                info!("session completed");
            }
            Err(OrchestratorError::Cancelled) => {
                self.events
                    .emit(BuildEvent::Error {
                        message: "Build stopped by user".to_string(),
                        recoverable: false,
                    })
                    .await;
                info!("session cancelled");
            }
            Err(err) => {
                self.events
                    .emit(BuildEvent::Error { message: err.to_string(), recoverable: false })
                    .await;
                error!(error = %err, "session failed");
            }
        }
        self.slot.cancel_pending();
        self.phase.advance(SessionPhase::Done);
    }

    async fn run_inner(self: Arc<Self>) -> Result<(), OrchestratorError> {
        // Planning
        self.events.emit(BuildEvent::PlanningStarted).await;
        let plan = self
            .collaborators
            .planner
            .plan(&self.spec)
            .await
            .map_err(|e| OrchestratorError::PlannerFailed(e.to_string()))?;
        self.check_cancelled()?;

        let graph = self.install_plan(&plan)?;
        self.events
            .emit(BuildEvent::PlanReady {
                tasks: plan.tasks.clone(),
                agents: plan.agents.clone(),
                explanation: plan.explanation.clone(),
            })
            .await;

        self.collaborators
            .git
            .init(&self.workspace)
            .await
            .map_err(|e| OrchestratorError::Transient(e.to_string()))?;

        // Executing
        self.phase.advance(SessionPhase::Executing);
        self.clone().execute_tasks(graph).await?;
        self.check_cancelled()?;

        // Testing
        let behavioral_tests =
            self.collaborators.tests.has_tests(&self.workspace, &self.spec).await;
        if self.spec.workflow.testing_enabled || behavioral_tests {
            self.phase.advance(SessionPhase::Testing);
            self.run_testing_phase().await;
            self.check_cancelled()?;
        }

        // Configured pre-deploy gates
        self.fire_configured_gates(GateTrigger::BeforeDeploy).await?;

        // Deploying
        self.phase.advance(SessionPhase::Deploying);
        let target = self.spec.deploy_target();
        self.events.emit(BuildEvent::DeployStarted { target: target.as_str().to_string() }).await;
        if target == DeployTarget::Esp32 {
            self.collaborators.hardware.compile(&self.workspace).await.map_err(|e| match e {
                HardwareError::Compilation(msg) => OrchestratorError::CompilationFailed(msg),
                HardwareError::Device(msg) => OrchestratorError::Transient(msg),
            })?;
            self.check_cancelled()?;
            self.collaborators
                .hardware
                .flash(&self.workspace)
                .await
                .map_err(|e| OrchestratorError::Transient(e.to_string()))?;
        }
        self.events.emit(BuildEvent::DeployComplete).await;

        Ok(())
    }

    /// Install the plan into run state and validate the graph shape.
    fn install_plan(&self, plan: &Plan) -> Result<TaskGraph, OrchestratorError> {
        if plan.tasks.len() > elisa_types::MAX_PLANNED_TASKS {
            return Err(OrchestratorError::PlannerFailed(format!(
                "planner produced {} tasks, cap is {}",
                plan.tasks.len(),
                elisa_types::MAX_PLANNED_TASKS
            )));
        }
        let mut state = self.state.lock().expect("state lock poisoned");
        state.tasks = plan.tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
        state.agents = plan.agents.iter().map(|a| (a.name.clone(), a.clone())).collect();
        state.planned_total = plan.tasks.len();

        let graph = TaskGraph::from_tasks(&state.tasks).map_err(|e| match e {
            GraphError::Cycle(task) => OrchestratorError::CycleDetected(task),
            other => OrchestratorError::PlannerFailed(other.to_string()),
        })?;
        if let Some(task) = graph.find_cycle() {
            return Err(OrchestratorError::CycleDetected(task));
        }
        debug!(tasks = state.planned_total, agents = state.agents.len(), "plan installed");
        Ok(graph)
    }

    //─────────────────────────────
    //  Scheduler
    //─────────────────────────────

    async fn execute_tasks(self: Arc<Self>, mut graph: TaskGraph) -> Result<(), OrchestratorError> {
        let parallelism = self
            .spec
            .workflow
            .max_parallel_tasks
            .unwrap_or(self.config.max_parallel_tasks)
            .max(1);
        let mut workers: JoinSet<(String, WorkerOutcome)> = JoinSet::new();

        loop {
            if self.cancel.is_cancelled() {
                // Workers observe the token themselves; wait for them to
                // wind down and release their reservations.
                while workers.join_next().await.is_some() {
                    self.budget.lock().expect("budget lock poisoned").release(DEFAULT_RESERVED_PER_TASK);
                }
                return Err(OrchestratorError::Cancelled);
            }

            // Dispatch up to the parallelism bound.
            while workers.len() < parallelism && !self.slot.is_pending() {
                self.check_budget_gate().await?;
                let Some(task_id) = self.next_ready(&graph) else { break };
                self.clone().dispatch(&mut workers, task_id);
            }

            if workers.is_empty() {
                let quiescent = {
                    let state = self.state.lock().expect("state lock poisoned");
                    graph.is_quiescent(&state.tasks)
                };
                if quiescent {
                    break;
                }
                // A pending interaction is holding dispatch; let it resolve.
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }

            let joined = tokio::select! {
                joined = workers.join_next() => joined,
                _ = self.cancel.cancelled() => continue,
            };
            let Some(joined) = joined else { continue };
            self.budget.lock().expect("budget lock poisoned").release(DEFAULT_RESERVED_PER_TASK);
            let (task_id, outcome) = match joined {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(error = %join_error, "worker panicked");
                    continue;
                }
            };

            match outcome {
                WorkerOutcome::Completed { summary } => {
                    self.finish_task(&task_id, summary);
                    self.fire_midpoint_gates(&mut graph).await?;
                }
                WorkerOutcome::RetriesExhausted { last_summary } => {
                    self.resolve_failed_task(&task_id, last_summary, &mut graph).await?;
                }
                WorkerOutcome::Cancelled => {
                    // Next loop iteration drains remaining workers.
                }
            }
        }

        Ok(())
    }

    fn next_ready(&self, graph: &TaskGraph) -> Option<String> {
        let state = self.state.lock().expect("state lock poisoned");
        graph.ready_ids(&state.tasks).into_iter().next()
    }

    /// Mark a task running, reserve budget, and spawn its worker.
    fn dispatch(self: Arc<Self>, workers: &mut JoinSet<(String, WorkerOutcome)>, task_id: String) {
        let (task, agent, tasks_snapshot, summaries_snapshot) = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let task = state.tasks.get_mut(&task_id).expect("dispatched task exists");
            task.status = TaskStatus::Running;
            let task = task.clone();
            let agent = state
                .agents
                .get(&task.agent)
                .cloned()
                .unwrap_or_else(|| AgentProfile {
                    name: task.agent.clone(),
                    role: elisa_types::AgentRole::Builder,
                    persona: String::new(),
                    allowed_paths: None,
                    restricted_paths: None,
                });
            let tasks_snapshot: Vec<Task> = state.tasks.values().cloned().collect();
            let summaries_snapshot = state.summaries.clone();
            (task, agent, tasks_snapshot, summaries_snapshot)
        };
        self.budget.lock().expect("budget lock poisoned").reserve(DEFAULT_RESERVED_PER_TASK);

        let orchestrator = self.clone();
        workers.spawn(async move {
            let outcome =
                orchestrator.run_worker(task.clone(), agent, tasks_snapshot, summaries_snapshot).await;
            (task.id, outcome)
        });
    }

    /// One worker: the retry loop around agent attempts for one task.
    #[instrument(skip_all, fields(task_id = %task.id, agent = %agent.name))]
    async fn run_worker(
        self: Arc<Self>,
        task: Task,
        agent: AgentProfile,
        tasks_snapshot: Vec<Task>,
        summaries_snapshot: HashMap<String, String>,
    ) -> WorkerOutcome {
        self.events
            .emit(BuildEvent::TaskStarted {
                task_id: task.id.clone(),
                agent_name: agent.name.clone(),
            })
            .await;

        let mut failure_context: Option<String> = None;
        for attempt in 1..=MAX_RETRIES {
            if self.cancel.is_cancelled() {
                return WorkerOutcome::Cancelled;
            }

            let prompt = assemble(&PromptContext {
                task: &task,
                agent: &agent,
                spec: &self.spec,
                tasks: &tasks_snapshot,
                summaries: &summaries_snapshot,
                workspace: Some(self.workspace.as_path()),
                failure_context: failure_context.as_deref(),
                answers: None,
            });
            let request = TaskRunRequest {
                task_id: task.id.clone(),
                agent_name: agent.name.clone(),
                system_prompt: prompt.system_prompt,
                user_prompt: prompt.user_prompt,
                max_turns: self.spec.workflow.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            };
            let question_timeout = self
                .spec
                .workflow
                .question_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.question_timeout);
            let sink = AgentSink::new(
                task.id.clone(),
                self.events.clone(),
                self.slot.clone(),
                self.cancel.clone(),
                question_timeout,
            );

            let attempt_result = tokio::time::timeout(
                self.config.attempt_timeout,
                self.collaborators.agent_runner.run_task(request, &sink, &self.cancel),
            )
            .await;

            let outcome = match attempt_result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    if self.cancel.is_cancelled() {
                        return WorkerOutcome::Cancelled;
                    }
                    let summary = match e.downcast_ref::<QuestionError>() {
                        Some(QuestionError::Timeout) => "question timeout".to_string(),
                        _ => e.to_string(),
                    };
                    TaskRunOutcome {
                        success: false,
                        summary,
                        input_tokens: 0,
                        output_tokens: 0,
                        cost_usd: 0.0,
                    }
                }
                Err(_) => TaskRunOutcome {
                    success: false,
                    summary: format!("attempt timed out after {:?}", self.config.attempt_timeout),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_usd: 0.0,
                },
            };

            self.record_usage(&agent.name, &outcome).await;

            if outcome.success {
                self.commit_task_work(&task, &agent, &outcome).await;
                self.events.emit(BuildEvent::TaskCompleted { task_id: task.id.clone() }).await;
                return WorkerOutcome::Completed { summary: outcome.summary };
            }

            warn!(attempt, summary = %outcome.summary, "task attempt failed");
            failure_context = Some(outcome.summary);
        }

        WorkerOutcome::RetriesExhausted {
            last_summary: failure_context.unwrap_or_else(|| "no failure detail".to_string()),
        }
    }

    async fn record_usage(&self, agent_name: &str, outcome: &TaskRunOutcome) {
        let warn_80 = {
            let mut budget = self.budget.lock().expect("budget lock poisoned");
            budget.record(agent_name, outcome.input_tokens, outcome.output_tokens, outcome.cost_usd);
            budget.crossed_80_percent()
        };
        if outcome.input_tokens > 0 || outcome.output_tokens > 0 {
            self.events
                .emit(BuildEvent::TokenUsage {
                    agent_name: agent_name.to_string(),
                    input_tokens: outcome.input_tokens,
                    output_tokens: outcome.output_tokens,
                    cost_usd: outcome.cost_usd,
                })
                .await;
        }
        if warn_80 {
            self.events
                .emit(BuildEvent::Error {
                    message: "Token budget is 80% consumed".to_string(),
                    recoverable: true,
                })
                .await;
        }
    }

    async fn commit_task_work(&self, task: &Task, agent: &AgentProfile, outcome: &TaskRunOutcome) {
        let message = format!("{}: {}", task.id, first_line(&outcome.summary));
        match self
            .collaborators
            .git
            .commit_all(&self.workspace, &message, &agent.name, &task.id)
            .await
        {
            Ok(Some(record)) => {
                self.events
                    .emit(BuildEvent::CommitCreated {
                        sha: record.sha.clone(),
                        agent_name: record.agent_name.clone(),
                        task_id: record.task_id.clone(),
                    })
                    .await;
                self.state.lock().expect("state lock poisoned").commits.push(record);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "commit failed"),
        }
    }

    fn finish_task(&self, task_id: &str, summary: String) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.summary = Some(summary.clone());
        }
        state.summaries.insert(task_id.to_string(), summary);
    }

    //─────────────────────────────
    //  Gates
    //─────────────────────────────

    /// Open a gate, suspend dispatch, and wait for the response.
    ///
    /// A gate timeout resolves to approval, the safe default. Cancellation
    /// while waiting surfaces as `Cancelled`.
    async fn fire_gate(&self, kind: &str, context: String) -> Result<GateResponse, OrchestratorError> {
        // Wait for any in-flight question to resolve; the slot never holds
        // more than one interaction.
        let rx = loop {
            match self.slot.open_gate() {
                Ok(rx) => break rx,
                Err(SlotError::Occupied) => {
                    self.check_cancelled()?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(_) => unreachable!("open_gate only fails with Occupied"),
            }
        };

        self.events
            .emit(BuildEvent::HumanGate { kind: kind.to_string(), context })
            .await;
        info!(kind, "human gate awaiting response");

        tokio::select! {
            response = rx => response.map_err(|_| OrchestratorError::Cancelled),
            _ = tokio::time::sleep(self.config.gate_timeout) => {
                self.slot.cancel_pending();
                warn!(kind, "gate timed out; defaulting to approval");
                Ok(GateResponse { approved: true, feedback: None })
            }
            _ = self.cancel.cancelled() => {
                self.slot.cancel_pending();
                Err(OrchestratorError::Cancelled)
            }
        }
    }

    /// Budget check before dispatch; opens a `budget_warning` gate once the
    /// effective budget is exceeded.
    async fn check_budget_gate(&self) -> Result<(), OrchestratorError> {
        let (exceeded, effective, max) = {
            let budget = self.budget.lock().expect("budget lock poisoned");
            (budget.exceeded(), budget.effective(), budget.max_budget())
        };
        if !exceeded || self.budget_gate_acknowledged.load(Ordering::SeqCst) {
            return Ok(());
        }
        let response = self
            .fire_gate(
                gate_kind::BUDGET_WARNING,
                format!("Effective token usage {effective} has reached the budget of {max}."),
            )
            .await?;
        if response.approved {
            self.budget_gate_acknowledged.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(OrchestratorError::BudgetExceeded)
        }
    }

    /// A task exhausted its retries: gate, then fail or spawn a revision.
    async fn resolve_failed_task(
        &self,
        task_id: &str,
        last_summary: String,
        graph: &mut TaskGraph,
    ) -> Result<(), OrchestratorError> {
        let task_name = {
            let state = self.state.lock().expect("state lock poisoned");
            state.tasks.get(task_id).map(|t| t.name.clone()).unwrap_or_else(|| task_id.to_string())
        };
        let response = self
            .fire_gate(
                gate_kind::RETRIES_EXHAUSTED,
                format!(
                    "Task '{task_name}' failed {MAX_RETRIES} attempts. Last failure: {last_summary}"
                ),
            )
            .await?;

        match response {
            GateResponse { approved: false, feedback: Some(feedback) } if !feedback.is_empty() => {
                self.insert_revision(task_id, &feedback, graph);
            }
            _ => {
                let mut state = self.state.lock().expect("state lock poisoned");
                if let Some(task) = state.tasks.get_mut(task_id) {
                    task.status = TaskStatus::Failed;
                    task.summary = Some(last_summary);
                }
                graph.propagate_blocked(&mut state.tasks);
                info!(task_id, "task marked failed after gate approval");
            }
        }
        Ok(())
    }

    /// Insert a revision successor for a rejected task and rewire its
    /// dependents onto the revision.
    fn insert_revision(&self, failed_id: &str, feedback: &str, graph: &mut TaskGraph) {
        let mut state = self.state.lock().expect("state lock poisoned");

        let revision_id = next_revision_id(failed_id, &state.tasks);
        let (name, agent, criteria) = match state.tasks.get_mut(failed_id) {
            Some(failed) => {
                failed.status = TaskStatus::Revising;
                (failed.name.clone(), failed.agent.clone(), failed.acceptance_criteria.clone())
            }
            None => return,
        };

        for task in state.tasks.values_mut() {
            if task.dependencies.iter().any(|d| d == failed_id)
                && !task.dependencies.contains(&revision_id)
            {
                task.dependencies.push(revision_id.clone());
            }
        }

        let revision = Task {
            id: revision_id.clone(),
            name: format!("Revise: {name}"),
            description: format!("Revise the work from '{name}' based on feedback: {feedback}"),
            status: TaskStatus::Pending,
            agent,
            acceptance_criteria: criteria,
            dependencies: vec![failed_id.to_string()],
            summary: None,
            retries: 0,
        };
        state.tasks.insert(revision_id.clone(), revision);

        match TaskGraph::from_tasks(&state.tasks) {
            Ok(rebuilt) => *graph = rebuilt,
            Err(e) => warn!(error = %e, "revision graph rebuild failed"),
        }
        info!(failed_id, revision_id = %revision_id, "revision task inserted");
    }

    /// Fire spec-configured midpoint gates once half the planned tasks
    /// have completed.
    async fn fire_midpoint_gates(&self, graph: &mut TaskGraph) -> Result<(), OrchestratorError> {
        let due = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let completed =
                state.tasks.values().filter(|t| t.status == TaskStatus::Completed).count();
            let midpoint = state.planned_total.div_ceil(2);
            if state.midpoint_fired || state.planned_total == 0 || completed < midpoint {
                false
            } else {
                state.midpoint_fired = true;
                true
            }
        };
        if !due {
            return Ok(());
        }
        self.fire_trigger_gates(GateTrigger::TaskMidpoint, graph).await
    }

    async fn fire_configured_gates(&self, trigger: GateTrigger) -> Result<(), OrchestratorError> {
        // Outside the executing phase there is no graph to extend; rejection
        // feedback at this point has no failed task to revise, so a rebuilt
        // graph is unnecessary.
        let gates: Vec<String> = self
            .spec
            .workflow
            .human_gates
            .iter()
            .filter(|g| g.trigger == trigger)
            .map(|g| g.name.clone())
            .collect();
        for gate in gates {
            let response = self
                .fire_gate(&gate, format!("Workflow gate '{gate}' is awaiting your approval."))
                .await?;
            if !response.approved {
                debug!(gate = %gate, "configured gate rejected; continuing");
            }
            self.check_cancelled()?;
        }
        Ok(())
    }

    async fn fire_trigger_gates(
        &self,
        trigger: GateTrigger,
        graph: &mut TaskGraph,
    ) -> Result<(), OrchestratorError> {
        let gates: Vec<String> = self
            .spec
            .workflow
            .human_gates
            .iter()
            .filter(|g| g.trigger == trigger)
            .map(|g| g.name.clone())
            .collect();
        for gate in gates {
            let response = self
                .fire_gate(&gate, format!("Workflow gate '{gate}' is awaiting your approval."))
                .await?;
            if let GateResponse { approved: false, feedback: Some(feedback) } = response {
                if !feedback.is_empty() {
                    // Revision of the most recently completed task.
                    let last_completed = {
                        let state = self.state.lock().expect("state lock poisoned");
                        state
                            .tasks
                            .values()
                            .rev()
                            .find(|t| t.status == TaskStatus::Completed)
                            .map(|t| t.id.clone())
                    };
                    if let Some(task_id) = last_completed {
                        self.insert_revision(&task_id, &feedback, graph);
                    }
                }
            }
            self.check_cancelled()?;
        }
        Ok(())
    }

    //─────────────────────────────
    //  Testing phase
    //─────────────────────────────

    async fn run_testing_phase(&self) {
        let report = match self.collaborators.tests.run_tests(&self.workspace, &self.spec).await {
            Ok(report) => report,
            Err(e) => {
                self.events
                    .emit(BuildEvent::Error {
                        message: format!("test run failed: {e}"),
                        recoverable: true,
                    })
                    .await;
                return;
            }
        };

        for case in &report.cases {
            self.events
                .emit(BuildEvent::TestResult {
                    test_name: case.test_name.clone(),
                    passed: case.passed,
                    details: case.details.clone(),
                })
                .await;
        }
        if let Some(coverage) = report.coverage {
            self.events.emit(BuildEvent::CoverageUpdate { percentage: coverage }).await;
        }

        let summary = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.test_report = Some(report.clone());
            health::summarize(&state.tasks, &report)
        };
        self.events
            .emit(BuildEvent::SystemHealthUpdate {
                component: "tests".to_string(),
                status: if summary.breakdown.tests_failed == 0 { "ok" } else { "degraded" }
                    .to_string(),
                detail: Some(format!(
                    "{} passed, {} failed",
                    summary.breakdown.tests_passed, summary.breakdown.tests_failed
                )),
            })
            .await;
        self.events
            .emit(BuildEvent::SystemHealthSummary {
                health_score: summary.health_score,
                grade: summary.grade,
                breakdown: summary.breakdown,
            })
            .await;
    }

    fn check_cancelled(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}
