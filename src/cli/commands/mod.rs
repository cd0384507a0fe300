//! Command implementations. Each `execute` returns the process exit
//! code; errors propagate to the top-level handler in `main`.

pub mod dashboard;
pub mod portfolio;
pub mod preview;
pub mod rollback;
pub mod sync;
pub mod validate;

use std::path::{Path, PathBuf};

use crate::config::ProjectConfig;
use crate::error::Result;

/// Resolve the project root: explicit `--project-dir`, else walk up
/// from the current directory.
pub fn resolve_project_root(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => {
            let cwd = std::env::current_dir()?;
            ProjectConfig::discover_root(&cwd)
        }
    }
}
