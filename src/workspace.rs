//! Workspace layout discovery: the four-candidate precedence search from
//! spec §6, plus auto-creation of the expected children.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const WORKSPACE_NAME: &str = "wharfctl";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no workspace directory found: tried override, ./{name}, $HOME/.config/{name}, /etc/{name}")]
    NotFound { name: String },
    #[error("failed to create directory {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// First existing of: explicit override, `./<name>`, `$HOME/.config/<name>`,
/// `/etc/<name>`. Absence of all four is a fatal error.
pub fn discover(override_path: Option<&Path>) -> Result<PathBuf, WorkspaceError> {
    if let Some(path) = override_path {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
    }

    let candidates = [
        PathBuf::from(format!("./{}", WORKSPACE_NAME)),
        dirs_config_dir().map(|d| d.join(WORKSPACE_NAME)).unwrap_or_default(),
        PathBuf::from(format!("/etc/{}", WORKSPACE_NAME)),
    ];

    for candidate in candidates {
        if !candidate.as_os_str().is_empty() && candidate.is_dir() {
            return Ok(candidate);
        }
    }

    Err(WorkspaceError::NotFound {
        name: WORKSPACE_NAME.to_string(),
    })
}

fn dirs_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
}

/// Create the expected children under `root` if they are missing.
pub fn ensure_layout(root: &Path) -> Result<(), WorkspaceError> {
    for child in ["apps", "state", "caddy"] {
        let dir = root.join(child);
        std::fs::create_dir_all(&dir).map_err(|source| WorkspaceError::Create {
            path: dir.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = discover(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn missing_override_falls_through_and_can_fail() {
        let missing = PathBuf::from("/does/not/exist/hopefully");
        // With no real candidates present in this sandbox, discovery is
        // expected to fail (absence of all four is fatal per spec).
        let result = discover(Some(&missing));
        // Either it falls through to a real candidate on this machine, or
        // it reports NotFound — both are acceptable, but it must not panic.
        let _ = result;
    }

    #[test]
    fn ensure_layout_creates_children() {
        let dir = tempfile::tempdir().unwrap();
        ensure_layout(dir.path()).unwrap();
        assert!(dir.path().join("apps").is_dir());
        assert!(dir.path().join("state").is_dir());
        assert!(dir.path().join("caddy").is_dir());
    }
}
