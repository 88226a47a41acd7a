//! Workspace ZIP export.
//!
//! Packs the session workspace into an in-memory ZIP archive for download.
//! Version-control internals, dependency caches, and orchestrator logs are
//! excluded. Orchestrator-created workspaces must live inside the OS temp
//! dir; anything else is refused so the endpoint cannot be used to read
//! arbitrary directories.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::policy::is_within_temp;

/// Path prefixes excluded from exports.
const EXCLUDED_PREFIXES: &[&str] = &[".git/", "node_modules/", ".elisa/logs/"];

/// Errors produced by [`export_zip`].
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// An orchestrator-created workspace escaped the OS temp dir.
    #[error("workspace is outside the OS temp directory")]
    OutsideTemp,
    /// The workspace does not exist.
    #[error("workspace not found")]
    NotFound,
    /// Underlying I/O failure.
    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
    /// ZIP encoding failure.
    #[error("zip failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Build a ZIP archive of the workspace.
///
/// `user_supplied` relaxes the temp-dir containment check, since the user
/// explicitly chose that directory at start.
pub fn export_zip(workspace: &Path, user_supplied: bool) -> Result<Vec<u8>, ExportError> {
    if !user_supplied && !is_within_temp(workspace) {
        return Err(ExportError::OutsideTemp);
    }
    if !workspace.is_dir() {
        return Err(ExportError::NotFound);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::new();
    collect_files(workspace, workspace, &mut entries)?;
    entries.sort();

    let mut buffer = Vec::new();
    for relative in &entries {
        writer.start_file(relative.as_str(), options)?;
        let mut file = File::open(workspace.join(relative))?;
        buffer.clear();
        file.read_to_end(&mut buffer)?;
        writer.write_all(&buffer)?;
    }

    let cursor = writer.finish()?;
    debug!(files = entries.len(), bytes = cursor.get_ref().len(), "workspace exported");
    Ok(cursor.into_inner())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let dir_prefix = format!("{relative}/");
        if EXCLUDED_PREFIXES.iter().any(|p| relative.starts_with(p) || dir_prefix.starts_with(p)) {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            out.push(relative);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_workspace() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "elisa-export-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn export_excludes_git_and_logs() {
        let dir = temp_workspace();
        fs::write(dir.join("index.html"), "<html></html>").unwrap();
        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::write(dir.join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(dir.join(".elisa/logs")).unwrap();
        fs::write(dir.join(".elisa/logs/run.log"), "log").unwrap();
        fs::create_dir_all(dir.join(".elisa")).unwrap();
        fs::write(dir.join(".elisa/state.json"), "{}").unwrap();
        fs::create_dir_all(dir.join("node_modules/pkg")).unwrap();
        fs::write(dir.join("node_modules/pkg/index.js"), "x").unwrap();

        let bytes = export_zip(&dir, false).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();

        assert!(names.contains(&"index.html".to_string()));
        assert!(names.contains(&".elisa/state.json".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".git/")));
        assert!(!names.iter().any(|n| n.starts_with("node_modules/")));
        assert!(!names.iter().any(|n| n.starts_with(".elisa/logs/")));

        fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn non_user_workspaces_outside_temp_are_refused() {
        let result = export_zip(Path::new("/etc"), false);
        assert!(matches!(result, Err(ExportError::OutsideTemp)));
    }

    #[test]
    fn missing_workspace_reports_not_found() {
        let dir = std::env::temp_dir().join("elisa-export-missing");
        let result = export_zip(&dir, false);
        assert!(matches!(result, Err(ExportError::NotFound)));
    }
}
