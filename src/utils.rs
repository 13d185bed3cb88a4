//! Small filesystem helpers shared across the workspace, store, and
//! proxy-controller modules.

use std::path::Path;

use anyhow::{Context, Result};

/// Creates `path` (and its parents) if it doesn't already exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}
