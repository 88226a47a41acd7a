//! The NuggetSpec: a declarative description of what to build.
//!
//! A spec arrives from the transport as JSON, passes through validation
//! (`elisa-spec`) and is then treated as canonical for the remainder of the
//! session. Every field except the nugget itself is optional so that a
//! minimal `{"nugget": {"goal": "..."}}` spec is accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level build specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuggetSpec {
    /// What to build.
    pub nugget: Nugget,
    /// Typed requirements, rendered into builder prompts.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Optional style preferences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StylePrefs>,
    /// Detailed skills injected into user prompts.
    #[serde(default)]
    pub skills: Vec<Skill>,
    /// Validation rules enforced during and after tasks.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// External input portals available to agents.
    #[serde(default)]
    pub portals: Vec<Portal>,
    /// Hardware devices available to the build.
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Workflow policy: testing, gates, parallelism, timeouts.
    #[serde(default)]
    pub workflow: WorkflowPolicy,
}

/// The core description of the thing being built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Nugget {
    /// The build goal, e.g. "todo app".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Nugget category, e.g. "software".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Longer free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single typed requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Requirement category, e.g. "feature", "constraint".
    #[serde(rename = "type")]
    pub kind: String,
    /// What is required.
    pub description: String,
}

/// Style preferences, including the legacy colors/theme/tone trio.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StylePrefs {
    /// Visual style description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual: Option<String>,
    /// Personality the built artifact should have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    /// Legacy color list.
    #[serde(default)]
    pub colors: Vec<String>,
    /// Legacy theme name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Legacy tone description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// Skill category determines which user-prompt section a skill lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    /// Feature-building knowledge.
    Feature,
    /// Styling knowledge.
    Style,
}

/// A detailed skill passed through to agents as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Short skill name.
    pub name: String,
    /// Which prompt section the skill belongs in.
    pub kind: SkillKind,
    /// Full skill body. Wrapped in `<kid_skill>` tags in user prompts only.
    pub detail: String,
    /// Agent roles this skill applies to; empty means all.
    #[serde(default)]
    pub agent_roles: Vec<String>,
}

/// When a validation rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTrigger {
    /// Rule applies during every agent turn.
    #[default]
    Always,
    /// Rule is checked when a task completes.
    OnTaskComplete,
}

/// A validation rule passed through to agents as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Short rule name.
    pub name: String,
    /// Full rule body. Wrapped in `<kid_rule>` tags in user prompts only.
    pub detail: String,
    /// When the rule fires.
    #[serde(default)]
    pub trigger: RuleTrigger,
}

/// An external input portal agents may read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    /// Portal name; rendered as `<user_input name="portal:NAME">`.
    pub name: String,
    /// What the portal provides.
    #[serde(default)]
    pub description: String,
    /// Optional JSON schema of the portal payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A hardware device available to the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device name, e.g. "led-strip".
    pub name: String,
    /// Hardware model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Wiring or usage notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// How a configured human gate decides when to fire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTrigger {
    /// Fire once half of the planned tasks have completed.
    #[default]
    TaskMidpoint,
    /// Fire before the deploy phase begins.
    BeforeDeploy,
}

/// A spec-configured human gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Gate name; becomes the `kind` of the emitted `human_gate` event.
    pub name: String,
    /// Firing policy.
    #[serde(default)]
    pub trigger: GateTrigger,
}

/// Workflow policy knobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    /// Run the testing phase even when no behavioral tests exist.
    #[serde(default)]
    pub testing_enabled: bool,
    /// Configured human gates.
    #[serde(default)]
    pub human_gates: Vec<GateConfig>,
    /// Per-session task parallelism bound; defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_tasks: Option<usize>,
    /// Seconds to wait for a mid-task question answer before failing the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_timeout_secs: Option<u64>,
    /// Seconds to wait for a gate response before the safe default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_timeout_secs: Option<u64>,
    /// Maximum agent turns per task attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

/// Deployment target resolved from the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    /// Browser deployment; no hardware commands are ever invoked.
    Web,
    /// Microcontroller deployment driven through the hardware service.
    Esp32,
}

impl DeployTarget {
    /// Wire name of the target as it appears in `deploy_started` events.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployTarget::Web => "web",
            DeployTarget::Esp32 => "esp32",
        }
    }
}

impl NuggetSpec {
    /// Resolve the deployment target. Specs that declare devices deploy to
    /// hardware; everything else deploys to the web.
    pub fn deploy_target(&self) -> DeployTarget {
        if self.devices.is_empty() {
            DeployTarget::Web
        } else {
            DeployTarget::Esp32
        }
    }

    /// Goal with the prompt-facing default applied.
    pub fn goal_or_default(&self) -> &str {
        self.nugget.goal.as_deref().unwrap_or("Not specified")
    }

    /// Nugget type with the prompt-facing default applied.
    pub fn kind_or_default(&self) -> &str {
        self.nugget.kind.as_deref().unwrap_or("software")
    }

    /// Description with the prompt-facing default applied.
    pub fn description_or_default(&self) -> &str {
        self.nugget.description.as_deref().unwrap_or("Not specified")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_spec_deserializes() {
        let spec: NuggetSpec =
            serde_json::from_str(r#"{"nugget": {"goal": "todo app", "type": "software"}, "workflow": {}}"#)
                .unwrap();
        assert_eq!(spec.nugget.goal.as_deref(), Some("todo app"));
        assert_eq!(spec.kind_or_default(), "software");
        assert!(spec.requirements.is_empty());
        assert_eq!(spec.deploy_target(), DeployTarget::Web);
    }

    #[test]
    fn devices_select_hardware_target() {
        let spec: NuggetSpec = serde_json::from_str(
            r#"{"nugget": {"goal": "blinky"}, "devices": [{"name": "led"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.deploy_target(), DeployTarget::Esp32);
    }

    #[test]
    fn missing_fields_use_prompt_defaults() {
        let spec: NuggetSpec = serde_json::from_str(r#"{"nugget": {}}"#).unwrap();
        assert_eq!(spec.goal_or_default(), "Not specified");
        assert_eq!(spec.kind_or_default(), "software");
        assert_eq!(spec.description_or_default(), "Not specified");
    }

    #[test]
    fn gate_trigger_defaults_to_midpoint() {
        let gate: GateConfig = serde_json::from_str(r#"{"name": "design-review"}"#).unwrap();
        assert_eq!(gate.trigger, GateTrigger::TaskMidpoint);
    }
}
