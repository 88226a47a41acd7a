//! Workspace path policy.
//!
//! User-selected workspace paths are validated before any file is touched.
//! System roots and sensitive home subdirectories are blocked, UNC forms and
//! null bytes rejected, and `..` segments refused after normalization. The
//! OS temp directory is always allowed. Setting `ELISA_WORKSPACE_ROOT`
//! switches the policy to a strict allow-root: everything outside it is
//! rejected.

use std::env;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use elisa_types::{OrchestratorError, MAX_WORKSPACE_PATH_LEN};

/// Environment variable that, when set, becomes the only allowed root.
pub const WORKSPACE_ROOT_ENV: &str = "ELISA_WORKSPACE_ROOT";

#[cfg(unix)]
const BLOCKED_ROOTS: &[&str] = &[
    "/bin", "/sbin", "/usr", "/etc", "/var", "/boot", "/lib", "/lib64", "/proc", "/sys", "/dev",
    "/root",
];

#[cfg(windows)]
const BLOCKED_ROOTS: &[&str] = &[
    "c:\\windows",
    "c:\\program files",
    "c:\\program files (x86)",
    "c:\\programdata",
];

/// Home subdirectories that are never acceptable workspaces.
const BLOCKED_HOME_SUBDIRS: &[&str] = &[".ssh", ".aws", ".gnupg", ".config/gcloud"];

/// Validate a user-supplied workspace path and return its normalized form.
pub fn validate_workspace_path(raw: &str) -> Result<PathBuf, OrchestratorError> {
    let rejected = |reason: &str| Err(OrchestratorError::WorkspacePathRejected(reason.to_string()));

    if raw.is_empty() {
        return rejected("path is empty");
    }
    if raw.len() > MAX_WORKSPACE_PATH_LEN {
        return rejected("path exceeds 500 characters");
    }
    if raw.contains('\0') {
        return rejected("path contains a null byte");
    }
    if raw.starts_with("\\\\") {
        return rejected("UNC paths are not allowed");
    }

    let normalized = normalize(Path::new(raw))?;

    // Strict allow-root mode.
    if let Ok(root) = env::var(WORKSPACE_ROOT_ENV) {
        let root = normalize(Path::new(&root))?;
        if !normalized.starts_with(&root) {
            return rejected("path is outside the configured workspace root");
        }
        debug!(path = %normalized.display(), "workspace path allowed by configured root");
        return Ok(normalized);
    }

    // Temp is always fine.
    if is_within_temp(&normalized) {
        return Ok(normalized);
    }

    let candidate = comparable(&normalized);
    for blocked in BLOCKED_ROOTS {
        if candidate.starts_with(blocked) {
            return rejected("path is under a blocked system directory");
        }
    }

    if let Some(home) = home_dir() {
        for subdir in BLOCKED_HOME_SUBDIRS {
            let blocked = comparable(&home.join(subdir));
            if candidate.starts_with(&blocked) {
                return rejected("path is under a protected home directory");
            }
        }
    }

    debug!(path = %normalized.display(), "workspace path accepted");
    Ok(normalized)
}

/// Whether a path sits inside the OS temp directory.
pub fn is_within_temp(path: &Path) -> bool {
    let temp = match normalize(&env::temp_dir()) {
        Ok(temp) => temp,
        Err(_) => return false,
    };
    match normalize(path) {
        Ok(normalized) => normalized.starts_with(&temp),
        Err(_) => false,
    }
}

/// Lexically normalize a path, rejecting any `..` segment.
fn normalize(path: &Path) -> Result<PathBuf, OrchestratorError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(OrchestratorError::WorkspacePathRejected(
                    "path contains '..' segments".to_string(),
                ))
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(windows)]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(unix)]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        env::var("HOME").ok().map(PathBuf::from)
    }
    #[cfg(windows)]
    {
        env::var("USERPROFILE").ok().map(PathBuf::from)
    }
}
