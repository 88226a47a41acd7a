#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **elisa-prompt** – Per-task prompt assembly for the elisa build
//! orchestrator.
//!
//! Builds `{system_prompt, user_prompt}` pairs for each task attempt. The
//! system prompt is a role-specific template with sanitized placeholder
//! substitution; the user prompt layers task, context, skill, rule, portal,
//! and predecessor sections in a fixed order. Kid-supplied values can never
//! inject structure into the system prompt: everything interpolated there is
//! stripped of markdown headers, code fences, and markup first.

pub mod assembler;
pub mod digest;
pub mod roles;
pub mod sanitize;

pub use assembler::{
    assemble, system_prompt_is_clean, workspace_sections, PromptContext, TaskPrompt,
    DEFAULT_MAX_TURNS, MAX_COMBINED_SUMMARY_WORDS, MAX_SUMMARY_WORDS, OMITTED_PLACEHOLDER,
};
pub use roles::PromptModule;
pub use sanitize::sanitize;
