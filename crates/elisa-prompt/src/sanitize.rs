//! Placeholder sanitization for system prompts.
//!
//! Every value interpolated into a system prompt passes through [`sanitize`]
//! first. Kid-supplied strings must not be able to smuggle markdown structure
//! or markup into the prompt: headers of level two and deeper, code fences,
//! and HTML tags are stripped. A single leading `#` is preserved.

use std::sync::OnceLock;

use regex::Regex;

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Two or more hashes at the start of a line, with any trailing spaces.
    PATTERN.get_or_init(|| Regex::new(r"(?m)^[ \t]*#{2,}[ \t]*").unwrap())
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"```[a-zA-Z0-9_-]*").unwrap())
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap())
}

/// Strip markdown headers of level >= 2, code fences, and HTML tags, then trim.
///
/// Stripping runs to a fixpoint so that nested constructions such as
/// `"## ##x"` cannot survive a single pass.
pub fn sanitize(value: &str) -> String {
    let mut out = value.to_string();
    loop {
        let pass = header_pattern().replace_all(&out, "");
        let pass = fence_pattern().replace_all(&pass, "");
        let pass = tag_pattern().replace_all(&pass, "").to_string();
        if pass == out {
            break;
        }
        out = pass;
    }
    out.trim().to_string()
}
