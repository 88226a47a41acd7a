#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **elisa-types** – Shared primitive data structures for the elisa build
//! orchestrator.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, transport, or storage.

//─────────────────────────────
//  Size caps
//─────────────────────────────

/// Maximum allowed length of a nugget goal.
pub const MAX_GOAL_LEN: usize = 2_000;

/// Maximum allowed length of a nugget description.
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Maximum allowed length of a user-supplied workspace path.
pub const MAX_WORKSPACE_PATH_LEN: usize = 500;

/// Maximum number of requirements accepted in one spec.
pub const MAX_REQUIREMENTS: usize = 100;

/// Maximum number of tasks accepted from the planner.
pub const MAX_PLANNED_TASKS: usize = 200;

//─────────────────────────────
//  Modules
//─────────────────────────────

/// NuggetSpec and its nested configuration types.
pub mod spec;
/// Planned tasks and their lifecycle states.
pub mod task;
/// Agent profiles and roles.
pub mod agent;
/// The closed event union carried on the session stream.
pub mod event;
/// Error taxonomy shared across the workspace.
pub mod error;

pub use agent::{AgentProfile, AgentRole};
pub use error::{OrchestratorError, SpecIssue};
pub use event::{BuildEvent, HealthBreakdown, gate_kind};
pub use spec::{
    DeployTarget, Device, GateConfig, GateTrigger, Nugget, NuggetSpec, Portal, Requirement, Rule,
    RuleTrigger, Skill, SkillKind, StylePrefs, WorkflowPolicy,
};
pub use task::{SessionPhase, Task, TaskStatus};
