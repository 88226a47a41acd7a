//! Workspace file manifest and structural digest.
//!
//! The manifest tells an agent which files already exist so it extends
//! instead of recreating them. The digest lists top-level symbols per source
//! file and is only produced once the workspace actually contains source.

use std::fs;
use std::path::Path;

/// Directories never listed in manifests or digests.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", ".elisa", "target"];

/// Maximum files included in a structural digest.
const MAX_DIGEST_FILES: usize = 30;

/// Maximum symbols listed per file.
const MAX_SYMBOLS_PER_FILE: usize = 10;

/// Extensions that count as source for the structural digest.
const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "py", "rs", "html", "css", "ino"];

/// Relative paths of all tracked files under `workspace`, sorted.
pub fn tracked_files(workspace: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect(workspace, workspace, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            collect(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// Whether any tracked file is source code.
pub fn has_source_files(files: &[String]) -> bool {
    files.iter().any(|f| is_source(f))
}

fn is_source(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Succinct top-level-symbol digest of the workspace's source files.
///
/// Returns `None` when no source files exist yet.
pub fn structural_digest(workspace: &Path, files: &[String]) -> Option<String> {
    let source_files: Vec<&String> = files.iter().filter(|f| is_source(f)).collect();
    if source_files.is_empty() {
        return None;
    }

    let mut digest = String::new();
    for file in source_files.iter().take(MAX_DIGEST_FILES) {
        let contents = match fs::read_to_string(workspace.join(file.as_str())) {
            Ok(contents) => contents,
            Err(_) => continue,
        };
        let symbols: Vec<&str> = contents
            .lines()
            .map(str::trim_start)
            .filter(|line| is_symbol_line(line))
            .take(MAX_SYMBOLS_PER_FILE)
            .collect();
        if symbols.is_empty() {
            continue;
        }
        digest.push_str(file);
        digest.push('\n');
        for symbol in symbols {
            digest.push_str("  ");
            digest.push_str(symbol.trim_end_matches('{').trim_end());
            digest.push('\n');
        }
    }

    if digest.is_empty() {
        None
    } else {
        Some(digest)
    }
}

fn is_symbol_line(line: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "fn ",
        "pub fn ",
        "struct ",
        "pub struct ",
        "enum ",
        "pub enum ",
        "function ",
        "export function ",
        "export default ",
        "export const ",
        "class ",
        "export class ",
        "def ",
        "async def ",
    ];
    PREFIXES.iter().any(|p| line.starts_with(p))
}
