//! Dry-run collaborators for local development.
//!
//! The real planner and agent runner live behind the runtime's agent API
//! and are wired in by the deployment. When the service starts without that
//! backend it falls back to these: a planner that derives one build task per
//! requirement and a runner that simulates successful work. Sessions stream
//! the full event protocol end to end without touching a model.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use elisa_orchestration::{
    AgentRunner, AgentSink, Collaborators, CommitRecord, GitService, HardwareError,
    HardwareService, Plan, Planner, TaskRunOutcome, TaskRunRequest, TestReport, TestRunner,
};
use elisa_types::{AgentProfile, AgentRole, NuggetSpec, Task, TaskStatus};

/// Planner that derives a linear task list from the spec.
pub struct DryRunPlanner;

#[async_trait]
impl Planner for DryRunPlanner {
    async fn plan(&self, spec: &NuggetSpec) -> Result<Plan> {
        let mut tasks = vec![Task {
            id: "build-core".to_string(),
            name: "Build the core".to_string(),
            description: format!("Build: {}", spec.goal_or_default()),
            status: TaskStatus::Pending,
            agent: "builder-1".to_string(),
            acceptance_criteria: vec!["The goal is achieved".to_string()],
            dependencies: vec![],
            summary: None,
            retries: 0,
        }];
        for (i, requirement) in spec.requirements.iter().enumerate() {
            tasks.push(Task {
                id: format!("requirement-{}", i + 1),
                name: format!("Requirement {}", i + 1),
                description: requirement.description.clone(),
                status: TaskStatus::Pending,
                agent: "builder-1".to_string(),
                acceptance_criteria: vec![requirement.description.clone()],
                dependencies: vec!["build-core".to_string()],
                summary: None,
                retries: 0,
            });
        }
        Ok(Plan {
            tasks,
            agents: vec![AgentProfile {
                name: "builder-1".to_string(),
                role: AgentRole::Builder,
                persona: "a careful builder".to_string(),
                allowed_paths: None,
                restricted_paths: None,
            }],
            explanation: "Dry-run plan derived directly from the spec.".to_string(),
        })
    }
}

/// Runner that narrates and succeeds without calling a model.
pub struct DryRunRunner;

#[async_trait]
impl AgentRunner for DryRunRunner {
    async fn run_task(
        &self,
        request: TaskRunRequest,
        sink: &AgentSink,
        _cancel: &CancellationToken,
    ) -> Result<TaskRunOutcome> {
        sink.output(format!("[dry-run] working on {}", request.task_id)).await;
        Ok(TaskRunOutcome {
            success: true,
            summary: format!("dry-run completion of {}", request.task_id),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        })
    }
}

/// Git stand-in producing synthetic shas.
pub struct DryRunGit {
    counter: AtomicU64,
}

impl DryRunGit {
    /// New counter-backed git stand-in.
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(1) }
    }
}

impl Default for DryRunGit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitService for DryRunGit {
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
            sha: format!("{n:040x}"),
            message: message.to_string(),
            agent_name: agent_name.to_string(),
            task_id: task_id.to_string(),
        }))
    }
}

/// Test runner with nothing to run.
pub struct DryRunTests;

#[async_trait]
impl TestRunner for DryRunTests {
    async fn has_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> bool {
        false
    }

    async fn run_tests(&self, _workspace: &Path, _spec: &NuggetSpec) -> Result<TestReport> {
        Ok(TestReport::default())
    }
}

/// Hardware stand-in that always succeeds.
pub struct DryRunHardware;

#[async_trait]
impl HardwareService for DryRunHardware {
    async fn compile(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn flash(&self, _workspace: &Path) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// The full dry-run collaborator bundle.
pub fn collaborators() -> Collaborators {
    Collaborators {
        planner: Arc::new(DryRunPlanner),
        agent_runner: Arc::new(DryRunRunner),
        git: Arc::new(DryRunGit::new()),
        tests: Arc::new(DryRunTests),
        hardware: Arc::new(DryRunHardware),
    }
}
