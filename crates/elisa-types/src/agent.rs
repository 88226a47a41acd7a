//! Agent profiles produced by the planner.

use serde::{Deserialize, Serialize};

/// Role an agent plays in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Writes code.
    Builder,
    /// Exercises behavior.
    Tester,
    /// Reviews changes.
    Reviewer,
    /// Planner-defined role; prompted like a builder.
    Custom,
}

impl AgentRole {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Builder => "builder",
            AgentRole::Tester => "tester",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Custom => "custom",
        }
    }
}

/// A named role instance with a persona and path policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique agent name within the session.
    pub name: String,
    /// Role; selects the prompt module.
    pub role: AgentRole,
    /// Persona text interpolated into the system prompt.
    #[serde(default)]
    pub persona: String,
    /// Paths the agent may write, overriding defaults when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<Vec<String>>,
    /// Paths the agent must not touch, overriding defaults when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_paths: Option<Vec<String>>,
}

impl AgentProfile {
    /// Allowed paths joined for prompt interpolation.
    pub fn allowed_paths_display(&self) -> String {
        match &self.allowed_paths {
            Some(paths) if !paths.is_empty() => paths.join(", "),
            _ => "src/".to_string(),
        }
    }

    /// Restricted paths joined for prompt interpolation.
    pub fn restricted_paths_display(&self) -> String {
        match &self.restricted_paths {
            Some(paths) if !paths.is_empty() => paths.join(", "),
            _ => ".git/, .elisa/".to_string(),
        }
    }
}
