#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **elisa-spec** – NuggetSpec validation and normalization.
//!
//! Turns an incoming spec into either a canonical spec the orchestrator can
//! trust for the rest of the session, or a complete list of structured
//! `{path, message}` issues. Validation collects every problem rather than
//! stopping at the first so the caller can fix a spec in one round trip.

use tracing::debug;

use elisa_types::{
    NuggetSpec, SpecIssue, MAX_DESCRIPTION_LEN, MAX_GOAL_LEN, MAX_REQUIREMENTS,
};

/// Maximum length of any single requirement description.
pub const MAX_REQUIREMENT_LEN: usize = 2_000;

/// Maximum length of a skill or rule body.
pub const MAX_DETAIL_LEN: usize = 20_000;

/// Maximum number of configured human gates.
pub const MAX_HUMAN_GATES: usize = 10;

/// Validate and normalize a spec.
///
/// On success the returned spec is canonical: string fields are trimmed and
/// empty optionals collapsed to `None`. On failure every detected issue is
/// returned; the spec is unusable and the session must stay idle.
pub fn validate(mut spec: NuggetSpec) -> Result<NuggetSpec, Vec<SpecIssue>> {
    let mut issues = Vec::new();

    normalize(&mut spec);

    if let Some(goal) = &spec.nugget.goal {
        if goal.len() > MAX_GOAL_LEN {
            issues.push(SpecIssue::new(
                "nugget.goal",
                format!("goal exceeds {} characters", MAX_GOAL_LEN),
            ));
        }
    }

    if let Some(description) = &spec.nugget.description {
        if description.len() > MAX_DESCRIPTION_LEN {
            issues.push(SpecIssue::new(
                "nugget.description",
                format!("description exceeds {} characters", MAX_DESCRIPTION_LEN),
            ));
        }
    }

    if spec.requirements.len() > MAX_REQUIREMENTS {
        issues.push(SpecIssue::new(
            "requirements",
            format!("more than {} requirements", MAX_REQUIREMENTS),
        ));
    }

    for (i, requirement) in spec.requirements.iter().enumerate() {
        if requirement.description.is_empty() {
            issues.push(SpecIssue::new(
                format!("requirements[{}].description", i),
                "requirement description cannot be empty",
            ));
        } else if requirement.description.len() > MAX_REQUIREMENT_LEN {
            issues.push(SpecIssue::new(
                format!("requirements[{}].description", i),
                format!("requirement exceeds {} characters", MAX_REQUIREMENT_LEN),
            ));
        }
        if requirement.kind.is_empty() {
            issues.push(SpecIssue::new(
                format!("requirements[{}].type", i),
                "requirement type cannot be empty",
            ));
        }
    }

    for (i, skill) in spec.skills.iter().enumerate() {
        if skill.name.is_empty() {
            issues.push(SpecIssue::new(format!("skills[{}].name", i), "skill name cannot be empty"));
        }
        if skill.detail.len() > MAX_DETAIL_LEN {
            issues.push(SpecIssue::new(
                format!("skills[{}].detail", i),
                format!("skill detail exceeds {} characters", MAX_DETAIL_LEN),
            ));
        }
    }

    for (i, rule) in spec.rules.iter().enumerate() {
        if rule.name.is_empty() {
            issues.push(SpecIssue::new(format!("rules[{}].name", i), "rule name cannot be empty"));
        }
        if rule.detail.len() > MAX_DETAIL_LEN {
            issues.push(SpecIssue::new(
                format!("rules[{}].detail", i),
                format!("rule detail exceeds {} characters", MAX_DETAIL_LEN),
            ));
        }
    }

    for (i, portal) in spec.portals.iter().enumerate() {
        if portal.name.is_empty() {
            issues.push(SpecIssue::new(format!("portals[{}].name", i), "portal name cannot be empty"));
        } else if !portal
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            issues.push(SpecIssue::new(
                format!("portals[{}].name", i),
                "portal name may only contain alphanumerics, '-' and '_'",
            ));
        }
    }

    for (i, device) in spec.devices.iter().enumerate() {
        if device.name.is_empty() {
            issues.push(SpecIssue::new(format!("devices[{}].name", i), "device name cannot be empty"));
        }
    }

    if spec.workflow.human_gates.len() > MAX_HUMAN_GATES {
        issues.push(SpecIssue::new(
            "workflow.human_gates",
            format!("more than {} human gates", MAX_HUMAN_GATES),
        ));
    }
    for (i, gate) in spec.workflow.human_gates.iter().enumerate() {
        if gate.name.is_empty() {
            issues.push(SpecIssue::new(
                format!("workflow.human_gates[{}].name", i),
                "gate name cannot be empty",
            ));
        }
    }

    if let Some(parallelism) = spec.workflow.max_parallel_tasks {
        if parallelism == 0 {
            issues.push(SpecIssue::new(
                "workflow.max_parallel_tasks",
                "parallelism must be at least 1",
            ));
        }
    }

    if issues.is_empty() {
        debug!(
            requirements = spec.requirements.len(),
            skills = spec.skills.len(),
            "spec validated"
        );
        Ok(spec)
    } else {
        debug!(issues = issues.len(), "spec rejected");
        Err(issues)
    }
}

/// Trim whitespace and collapse empty optional strings.
fn normalize(spec: &mut NuggetSpec) {
    spec.nugget.goal = take_trimmed(spec.nugget.goal.take());
    spec.nugget.kind = take_trimmed(spec.nugget.kind.take());
    spec.nugget.description = take_trimmed(spec.nugget.description.take());

    for requirement in &mut spec.requirements {
        requirement.kind = requirement.kind.trim().to_string();
        requirement.description = requirement.description.trim().to_string();
    }
    for skill in &mut spec.skills {
        skill.name = skill.name.trim().to_string();
    }
    for rule in &mut spec.rules {
        rule.name = rule.name.trim().to_string();
    }
    for portal in &mut spec.portals {
        portal.name = portal.name.trim().to_string();
    }
    for device in &mut spec.devices {
        device.name = device.name.trim().to_string();
    }
    for gate in &mut spec.workflow.human_gates {
        gate.name = gate.name.trim().to_string();
    }

    if let Some(style) = &mut spec.style {
        style.visual = take_trimmed(style.visual.take());
        style.personality = take_trimmed(style.personality.take());
        style.theme = take_trimmed(style.theme.take());
        style.tone = take_trimmed(style.tone.take());
    }
}

fn take_trimmed(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> NuggetSpec {
        serde_json::from_str(r#"{"nugget": {"goal": "todo app", "type": "software"}, "workflow": {}}"#)
            .unwrap()
    }

    #[test]
    fn minimal_spec_passes() {
        assert!(validate(minimal()).is_ok());
    }

    #[test]
    fn oversized_goal_is_rejected_with_path() {
        let mut spec = minimal();
        spec.nugget.goal = Some("x".repeat(MAX_GOAL_LEN + 1));
        let issues = validate(spec).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "nugget.goal");
    }

    #[test]
    fn goal_at_cap_passes() {
        let mut spec = minimal();
        spec.nugget.goal = Some("x".repeat(MAX_GOAL_LEN));
        assert!(validate(spec).is_ok());
    }

    #[test]
    fn all_issues_are_collected() {
        let spec: NuggetSpec = serde_json::from_str(
            r#"{
                "nugget": {"goal": "ok"},
                "requirements": [{"type": "", "description": ""}],
                "portals": [{"name": "bad name!"}]
            }"#,
        )
        .unwrap();
        let issues = validate(spec).unwrap_err();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"requirements[0].description"));
        assert!(paths.contains(&"requirements[0].type"));
        assert!(paths.contains(&"portals[0].name"));
    }

    #[test]
    fn normalization_trims_and_collapses() {
        let spec: NuggetSpec =
            serde_json::from_str(r#"{"nugget": {"goal": "  todo app  ", "description": "   "}}"#)
                .unwrap();
        let canonical = validate(spec).unwrap();
        assert_eq!(canonical.nugget.goal.as_deref(), Some("todo app"));
        assert!(canonical.nugget.description.is_none());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let spec: NuggetSpec = serde_json::from_str(
            r#"{"nugget": {"goal": "x"}, "workflow": {"max_parallel_tasks": 0}}"#,
        )
        .unwrap();
        let issues = validate(spec).unwrap_err();
        assert_eq!(issues[0].path, "workflow.max_parallel_tasks");
    }
}
