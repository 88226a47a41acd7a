//! Artifact persistence for user-supplied workspaces.
//!
//! When the caller provides a workspace path, the canonical spec is broken
//! out into JSON artifacts at the workspace root so that external tooling
//! can inspect what the session was asked to build.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use elisa_types::NuggetSpec;

/// Metadata written to `workspace.json`.
#[derive(Debug, Serialize)]
struct WorkspaceManifest<'a> {
    session_id: &'a str,
    workspace_path: String,
    user_supplied: bool,
    deploy_target: &'a str,
}

/// Write the spec artifacts into the workspace root.
///
/// Files written: `nugget.json`, `workspace.json`, `skills.json`,
/// `rules.json`, `portals.json` - all canonical 2-space JSON.
pub fn write_artifacts(
    workspace: &Path,
    session_id: &str,
    spec: &NuggetSpec,
    user_supplied: bool,
) -> std::io::Result<()> {
    fs::create_dir_all(workspace)?;

    write_json(workspace, "nugget.json", spec)?;
    write_json(
        workspace,
        "workspace.json",
        &WorkspaceManifest {
            session_id,
            workspace_path: workspace.to_string_lossy().to_string(),
            user_supplied,
            deploy_target: spec.deploy_target().as_str(),
        },
    )?;
    write_json(workspace, "skills.json", &spec.skills)?;
    write_json(workspace, "rules.json", &spec.rules)?;
    write_json(workspace, "portals.json", &spec.portals)?;

    debug!(workspace = %workspace.display(), "spec artifacts written");
    Ok(())
}

fn write_json<T: Serialize>(workspace: &Path, name: &str, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    fs::write(workspace.join(name), json + "\n")
}

/// Remove a workspace directory the orchestrator created.
///
/// No-op when the directory never existed or was already removed; never
/// called for user-supplied workspaces.
pub fn remove_created_workspace(workspace: &Path) {
    if !workspace.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(workspace) {
        warn!(workspace = %workspace.display(), error = %e, "workspace cleanup failed");
    } else {
        debug!(workspace = %workspace.display(), "workspace removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec() -> NuggetSpec {
        serde_json::from_str(
            r#"{
                "nugget": {"goal": "todo app", "type": "software"},
                "skills": [{"name": "lists", "kind": "feature", "detail": "use ul"}],
                "portals": [{"name": "weather"}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn artifacts_land_in_workspace_root() {
        let dir = tempdir().unwrap();
        write_artifacts(dir.path(), "sess-1", &spec(), true).unwrap();

        for name in ["nugget.json", "workspace.json", "skills.json", "rules.json", "portals.json"] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }

        let nugget = fs::read_to_string(dir.path().join("nugget.json")).unwrap();
        assert!(nugget.contains("todo app"));
        // Canonical 2-space indent.
        assert!(nugget.contains("\n  \"nugget\""));
    }

    #[test]
    fn cleanup_is_idempotent_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("never-created");
        remove_created_workspace(&workspace);
        remove_created_workspace(&workspace);

        let created = dir.path().join("created");
        fs::create_dir_all(&created).unwrap();
        fs::write(created.join("file.txt"), "x").unwrap();
        remove_created_workspace(&created);
        assert!(!created.exists());
        remove_created_workspace(&created);
    }
}
