//! Prompt assembly for one task run.
//!
//! The assembler turns a [`PromptContext`] into `{system_prompt, user_prompt}`.
//! The system prompt is template substitution with mandatory sanitization of
//! every interpolated value; the user prompt is a fixed sequence of layered
//! sections, each omitted when empty. Skill, rule, and user-input wrapper
//! tags appear only in the user prompt.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use elisa_types::{AgentProfile, NuggetSpec, RuleTrigger, SkillKind, Task};

use crate::digest::{has_source_files, structural_digest, tracked_files};
use crate::roles::PromptModule;
use crate::sanitize::sanitize;

/// Word cap applied to each predecessor summary individually.
pub const MAX_SUMMARY_WORDS: usize = 500;

/// Word cap applied to all predecessor summaries combined.
pub const MAX_COMBINED_SUMMARY_WORDS: usize = 2_000;

/// Placeholder appended when the combined cap truncates the predecessor list.
pub const OMITTED_PLACEHOLDER: &str = "(remaining predecessor summaries omitted for brevity)";

/// Default turn cap when the workflow does not set one.
pub const DEFAULT_MAX_TURNS: u32 = 20;

/// Everything needed to assemble prompts for one task attempt.
///
/// Rebuilt for every attempt so predecessor summaries always reflect the
/// latest task outputs.
pub struct PromptContext<'a> {
    /// The task being run.
    pub task: &'a Task,
    /// The agent assigned to it.
    pub agent: &'a AgentProfile,
    /// The canonical spec.
    pub spec: &'a NuggetSpec,
    /// All planned tasks, for dependency traversal and naming.
    pub tasks: &'a [Task],
    /// Output summaries of completed tasks, keyed by task id.
    pub summaries: &'a HashMap<String, String>,
    /// Session workspace, when one exists on disk.
    pub workspace: Option<&'a Path>,
    /// Summary of the previous failed attempt, injected on retries.
    pub failure_context: Option<&'a str>,
    /// Answers to a pending mid-task question, injected on the next turn.
    pub answers: Option<&'a Value>,
}

/// Assembled prompts for one task run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPrompt {
    /// Role-specific system prompt with sanitized placeholders.
    pub system_prompt: String,
    /// Layered user prompt.
    pub user_prompt: String,
}

/// Assemble the system and user prompt for a task attempt.
pub fn assemble(ctx: &PromptContext<'_>) -> TaskPrompt {
    let module = PromptModule::for_role(ctx.agent.role);
    let prompt = TaskPrompt {
        system_prompt: build_system_prompt(ctx, module),
        user_prompt: build_user_prompt(ctx, module),
    };
    debug!(
        task_id = %ctx.task.id,
        agent = %ctx.agent.name,
        system_len = prompt.system_prompt.len(),
        user_len = prompt.user_prompt.len(),
        "prompts assembled"
    );
    prompt
}

//─────────────────────────────
//  System prompt
//─────────────────────────────

fn build_system_prompt(ctx: &PromptContext<'_>, module: PromptModule) -> String {
    let max_turns = ctx.spec.workflow.max_turns.unwrap_or(DEFAULT_MAX_TURNS);
    let slots: &[(&str, String)] = &[
        ("agent_name", sanitize(&ctx.agent.name)),
        ("nugget_goal", sanitize(ctx.spec.goal_or_default())),
        ("nugget_type", sanitize(ctx.spec.kind_or_default())),
        ("nugget_description", sanitize(ctx.spec.description_or_default())),
        ("persona", sanitize(&ctx.agent.persona)),
        ("allowed_paths", sanitize(&ctx.agent.allowed_paths_display())),
        ("restricted_paths", sanitize(&ctx.agent.restricted_paths_display())),
        ("task_id", sanitize(&ctx.task.id)),
        ("max_turns", max_turns.to_string()),
    ];

    let mut prompt = module.system_template().to_string();
    for (name, value) in slots {
        prompt = prompt.replace(&format!("{{{{{name}}}}}"), value);
    }
    prompt
}

//─────────────────────────────
//  User prompt
//─────────────────────────────

fn build_user_prompt(ctx: &PromptContext<'_>, module: PromptModule) -> String {
    let mut sections: Vec<String> = Vec::new();

    // Task header
    sections.push(format!("# Task: {}\n{}", ctx.task.name, ctx.task.description));

    if !ctx.task.acceptance_criteria.is_empty() {
        let criteria = ctx
            .task
            .acceptance_criteria
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Acceptance Criteria:\n{criteria}"));
    }

    sections.push(format!(
        "Nugget Context:\nGoal: {}\nDescription: {}",
        ctx.spec.goal_or_default(),
        ctx.spec.description_or_default()
    ));

    if let Some(style) = style_section(ctx.spec) {
        sections.push(style);
    }

    if !ctx.spec.requirements.is_empty() {
        let requirements = ctx
            .spec
            .requirements
            .iter()
            .map(|r| format!("- [{}] {}", r.kind, r.description))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Requirements:\n{requirements}"));
    }

    sections.push(deployment_section(ctx.spec));

    let custom = custom_instruction_sections(ctx, module);
    if !custom.is_empty() {
        sections.push("## Kid's Custom Instructions".to_string());
        sections.extend(custom);
    }

    if !ctx.spec.portals.is_empty() {
        let portals = ctx
            .spec
            .portals
            .iter()
            .map(|p| {
                let mut block = format!("<user_input name=\"portal:{}\">\n{}", p.name, p.description);
                if let Some(schema) = &p.schema {
                    block.push('\n');
                    block.push_str(&schema.to_string());
                }
                block.push_str("\n</user_input>");
                block
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Available Portals:\n{portals}"));
    }

    if let Some(workspace) = ctx.workspace {
        sections.extend(workspace_sections(workspace));
    }

    if let Some(predecessors) = predecessor_section(ctx) {
        sections.push(predecessors);
    }

    if let Some(failure) = ctx.failure_context {
        sections.push(format!(
            "Previous Attempt Failed:\nThe last attempt at this task did not succeed. \
             What happened:\n{failure}\nFix the problem and complete the task."
        ));
    }

    if let Some(answers) = ctx.answers {
        sections.push(format!("<user_input name=\"answers\">\n{answers}\n</user_input>"));
    }

    sections.push(format!("Instructions:\n{}", module.instructions()));

    sections.join("\n\n")
}

fn style_section(spec: &NuggetSpec) -> Option<String> {
    let style = spec.style.as_ref()?;
    let mut lines = Vec::new();
    if let Some(visual) = &style.visual {
        lines.push(format!("Visual: {visual}"));
    }
    if let Some(personality) = &style.personality {
        lines.push(format!("Personality: {personality}"));
    }
    if !style.colors.is_empty() {
        lines.push(format!("Colors: {}", style.colors.join(", ")));
    }
    if let Some(theme) = &style.theme {
        lines.push(format!("Theme: {theme}"));
    }
    if let Some(tone) = &style.tone {
        lines.push(format!("Tone: {tone}"));
    }
    if lines.is_empty() {
        None
    } else {
        Some(format!("Style Preferences:\n{}", lines.join("\n")))
    }
}

fn deployment_section(spec: &NuggetSpec) -> String {
    let target = spec.deploy_target();
    let mut section = format!("Deployment Target: {}", target.as_str());
    if !spec.devices.is_empty() {
        section.push_str("\nDevices:");
        for device in &spec.devices {
            section.push_str(&format!("\n- {}", device.name));
            if let Some(model) = &device.model {
                section.push_str(&format!(" ({model})"));
            }
            if let Some(notes) = &device.notes {
                section.push_str(&format!(": {notes}"));
            }
        }
    }
    section
}

fn custom_instruction_sections(ctx: &PromptContext<'_>, module: PromptModule) -> Vec<String> {
    let mut sections = Vec::new();

    let applies = |roles: &[String]| {
        roles.is_empty()
            || roles.iter().any(|r| r == ctx.agent.role.as_str() || r == &ctx.agent.name)
    };

    let feature_skills: Vec<String> = ctx
        .spec
        .skills
        .iter()
        .filter(|s| s.kind == SkillKind::Feature && applies(&s.agent_roles))
        .map(|s| format!("<kid_skill name=\"{}\">\n{}\n</kid_skill>", s.name, s.detail))
        .collect();
    if !feature_skills.is_empty() {
        sections.push(format!("Detailed Feature Skills:\n{}", feature_skills.join("\n")));
    }

    let style_skills: Vec<String> = ctx
        .spec
        .skills
        .iter()
        .filter(|s| s.kind == SkillKind::Style && applies(&s.agent_roles))
        .map(|s| format!("<kid_skill name=\"{}\">\n{}\n</kid_skill>", s.name, s.detail))
        .collect();
    if !style_skills.is_empty() {
        sections.push(format!("Detailed Style Skills:\n{}", style_skills.join("\n")));
    }

    let rules: Vec<String> = ctx
        .spec
        .rules
        .iter()
        .filter(|r| match r.trigger {
            RuleTrigger::Always => true,
            RuleTrigger::OnTaskComplete => module == PromptModule::Builder,
        })
        .map(|r| format!("<kid_rule name=\"{}\">\n{}\n</kid_rule>", r.name, r.detail))
        .collect();
    if !rules.is_empty() {
        sections.push(format!("Validation Rules:\n{}", rules.join("\n")));
    }

    sections
}

//─────────────────────────────
//  Predecessor summaries
//─────────────────────────────

fn predecessor_section(ctx: &PromptContext<'_>) -> Option<String> {
    let ordered = ordered_predecessors(ctx.task, ctx.tasks);
    let by_id: HashMap<&str, &Task> = ctx.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut entries = Vec::new();
    let mut total_words = 0usize;
    let mut truncated = false;

    for id in &ordered {
        let summary = match ctx.summaries.get(id) {
            Some(summary) => summary,
            None => continue,
        };
        let capped = cap_words(summary, MAX_SUMMARY_WORDS);
        let words = word_count(&capped);
        if total_words + words > MAX_COMBINED_SUMMARY_WORDS {
            truncated = true;
            break;
        }
        total_words += words;
        let name = by_id.get(id.as_str()).map(|t| t.name.as_str()).unwrap_or(id.as_str());
        entries.push(format!("- {name} ({id}): {capped}"));
    }

    if truncated {
        entries.push(format!("- {OMITTED_PLACEHOLDER}"));
    }
    if entries.is_empty() {
        return None;
    }
    Some(format!("WHAT HAPPENED BEFORE YOU:\n{}", entries.join("\n")))
}

/// Direct dependencies in declared order, then transitive ones breadth-first.
fn ordered_predecessors(task: &Task, tasks: &[Task]) -> Vec<String> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut ordered = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for dep in &task.dependencies {
        if seen.insert(dep.as_str()) {
            ordered.push(dep.clone());
            queue.push_back(dep.as_str());
        }
    }
    while let Some(id) = queue.pop_front() {
        let Some(dep_task) = by_id.get(id) else { continue };
        for dep in &dep_task.dependencies {
            if seen.insert(dep.as_str()) {
                ordered.push(dep.clone());
                queue.push_back(dep.as_str());
            }
        }
    }
    ordered
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

fn cap_words(s: &str, cap: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= cap {
        return s.trim().to_string();
    }
    let mut capped = words[..cap].join(" ");
    capped.push('…');
    capped
}

//─────────────────────────────
//  Safety checks
//─────────────────────────────

/// Wrapper tags that must never appear in a system prompt.
pub fn system_prompt_is_clean(system_prompt: &str) -> bool {
    !system_prompt.contains("<kid_skill")
        && !system_prompt.contains("<kid_rule")
        && !system_prompt.contains("<user_input")
        && !system_prompt.contains("Kid's Custom Instructions")
}

/// File manifest section for the user prompt, plus digest when source exists.
pub fn workspace_sections(workspace: &Path) -> Vec<String> {
    let files = tracked_files(workspace);
    if files.is_empty() {
        return vec!["The workspace is empty.".to_string()];
    }
    let mut sections = vec![format!("FILES ALREADY IN WORKSPACE:\n{}", files.join("\n"))];
    if has_source_files(&files) {
        if let Some(digest) = structural_digest(workspace, &files) {
            sections.push(format!("Workspace Structure:\n{digest}"));
        }
    }
    sections
}
