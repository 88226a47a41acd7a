//! In-memory session registry.
//!
//! Sessions are process-local: the store maps opaque ids to live sessions,
//! owns the start race, schedules cleanup after terminal states, and routes
//! gate/question responses to the right orchestrator. Collaborators are
//! injected once at store construction; every session shares them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use elisa_types::{
    AgentProfile, BuildEvent, NuggetSpec, OrchestratorError, SessionPhase, Task,
};
use elisa_workspace::{create_session_workspace, remove_created_workspace, validate_workspace_path, write_artifacts};

use crate::gate::SlotError;
use crate::phase::PhaseCell;
use crate::{Collaborators, EventStream, Orchestrator, OrchestratorConfig};

/// Store-level configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Per-orchestrator tuning.
    pub orchestrator: OrchestratorConfig,
    /// Grace period between a terminal state and session removal. Exports
    /// must happen within this window.
    pub cleanup_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { orchestrator: OrchestratorConfig::default(), cleanup_grace: Duration::from_secs(300) }
    }
}

/// One registered session.
struct SessionEntry {
    id: String,
    created_at: DateTime<Utc>,
    phase: Arc<PhaseCell>,
    cancel: CancellationToken,
    orchestrator: std::sync::Mutex<Option<Arc<Orchestrator>>>,
}

/// Read-only session snapshot returned to the transport.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Opaque session id.
    pub session_id: String,
    /// Current phase.
    pub state: SessionPhase,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Planned tasks, empty before planning.
    pub tasks: Vec<Task>,
    /// Planned agents, empty before planning.
    pub agents: Vec<AgentProfile>,
}

/// Registry of live sessions.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<SessionEntry>>>,
    collaborators: Collaborators,
    config: StoreConfig,
}

impl SessionStore {
    /// Create a store with injected collaborators.
    pub fn new(collaborators: Collaborators, config: StoreConfig) -> Arc<Self> {
        Arc::new(Self { sessions: Arc::new(DashMap::new()), collaborators, config })
    }

    /// Register a fresh idle session and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            created_at: Utc::now(),
            phase: Arc::new(PhaseCell::new()),
            cancel: CancellationToken::new(),
            orchestrator: std::sync::Mutex::new(None),
        });
        self.sessions.insert(id.clone(), entry);
        info!(session_id = %id, "session created");
        id
    }

    /// Start a session: the only idle→planning transition.
    ///
    /// Exactly one concurrent caller wins the compare-and-swap; the rest get
    /// `AlreadyStarted`. Validation failures rewind the phase to idle so a
    /// corrected spec can retry. Returns the event receiver the transport
    /// consumes for the session's lifetime.
    pub fn start(
        &self,
        session_id: &str,
        spec: NuggetSpec,
        workspace_path: Option<String>,
    ) -> Result<mpsc::Receiver<BuildEvent>, OrchestratorError> {
        let entry = self.get(session_id)?;

        entry.phase.try_begin_planning()?;

        // Everything below runs with the planning claim held; any failure
        // must rewind to idle before surfacing.
        let started = self.start_claimed(&entry, spec, workspace_path);
        if started.is_err() {
            entry.phase.reset_to_idle();
        }
        started
    }

    fn start_claimed(
        &self,
        entry: &Arc<SessionEntry>,
        spec: NuggetSpec,
        workspace_path: Option<String>,
    ) -> Result<mpsc::Receiver<BuildEvent>, OrchestratorError> {
        let spec = elisa_spec::validate(spec).map_err(OrchestratorError::InvalidSpec)?;

        let (workspace, user_workspace) = match workspace_path {
            Some(raw) => (validate_workspace_path(&raw)?, true),
            None => {
                let workspace = create_session_workspace(&entry.id)
                    .map_err(|e| OrchestratorError::Transient(e.to_string()))?;
                (workspace, false)
            }
        };

        if user_workspace {
            write_artifacts(&workspace, &entry.id, &spec, true)
                .map_err(|e| OrchestratorError::WorkspacePathRejected(e.to_string()))?;
        }

        let (events, rx) = EventStream::channel();
        let orchestrator = Orchestrator::new(
            entry.id.clone(),
            spec,
            entry.phase.clone(),
            self.config.orchestrator.clone(),
            self.collaborators.clone(),
            events,
            entry.cancel.clone(),
            workspace,
            user_workspace,
        );
        *entry.orchestrator.lock().expect("entry lock poisoned") = Some(orchestrator.clone());

        let store = self.clone();
        let session_id = entry.id.clone();
        tokio::spawn(async move {
            orchestrator.run().await;
            store.schedule_cleanup(session_id);
        });

        info!(session_id = %entry.id, "session started");
        Ok(rx)
    }

    /// Cancel and close a session. Idempotent.
    pub fn stop(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let entry = self.get(session_id)?;
        if let Some(orchestrator) = entry.orchestrator.lock().expect("entry lock poisoned").clone() {
            orchestrator.cancel();
        } else {
            // Never started; close it directly.
            entry.phase.advance(SessionPhase::Done);
            self.schedule_cleanup(session_id.to_string());
        }
        Ok(())
    }

    /// Deliver a gate response.
    pub fn respond_to_gate(
        &self,
        session_id: &str,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let orchestrator = self.orchestrator(session_id)?;
        orchestrator.respond_to_gate(approved, feedback).map_err(slot_to_error)
    }

    /// Deliver question answers.
    pub fn respond_to_question(
        &self,
        session_id: &str,
        task_id: &str,
        answers: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let orchestrator = self.orchestrator(session_id)?;
        orchestrator.respond_to_question(task_id, answers).map_err(slot_to_error)
    }

    /// Session snapshot for the transport.
    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, OrchestratorError> {
        let entry = self.get(session_id)?;
        let orchestrator = entry.orchestrator.lock().expect("entry lock poisoned").clone();
        let (tasks, agents) = match &orchestrator {
            Some(orchestrator) => (orchestrator.tasks(), orchestrator.agents()),
            None => (Vec::new(), Vec::new()),
        };
        Ok(SessionSnapshot {
            session_id: entry.id.clone(),
            state: entry.phase.load(),
            created_at: entry.created_at,
            tasks,
            agents,
        })
    }

    /// The live orchestrator for a session, if it has started.
    pub fn orchestrator(&self, session_id: &str) -> Result<Arc<Orchestrator>, OrchestratorError> {
        let entry = self.get(session_id)?;
        let orchestrator = entry
            .orchestrator
            .lock()
            .expect("entry lock poisoned")
            .clone();
        orchestrator.ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))
    }

    /// Whether a session id is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    fn get(&self, session_id: &str) -> Result<Arc<SessionEntry>, OrchestratorError> {
        self.sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))
    }

    /// Remove the session (and any orchestrator-created workspace) after the
    /// grace period.
    fn schedule_cleanup(&self, session_id: String) {
        let store = self.clone();
        let grace = self.config.cleanup_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            store.remove(&session_id);
        });
    }

    /// Remove a session immediately. Safe to call twice.
    pub fn remove(&self, session_id: &str) {
        let Some((_, entry)) = self.sessions.remove(session_id) else { return };
        if let Some(orchestrator) = entry.orchestrator.lock().expect("entry lock poisoned").take() {
            if !orchestrator.user_workspace() {
                remove_created_workspace(orchestrator.workspace());
            }
        }
        debug!(session_id, "session removed");
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn slot_to_error(err: SlotError) -> OrchestratorError {
    match err {
        SlotError::Occupied => OrchestratorError::Transient(err.to_string()),
        SlotError::NoPendingGate | SlotError::NoPendingQuestion(_) => {
            warn!(error = %err, "interaction response with nothing pending");
            OrchestratorError::Transient(err.to_string())
        }
    }
}
