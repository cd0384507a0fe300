//! `bmsync rollback`: restore the latest pre-sync snapshot.

use std::path::Path;

use crate::cli::RollbackArgs;
use crate::engine::rollback::{preview_rollback, rollback_last};
use crate::error::Result;
use crate::store::StateStore;

/// Preview or execute a rollback.
///
/// # Errors
///
/// Store errors; a missing snapshot is an error for the execute path
/// and a plain message for preview.
pub fn execute(args: &RollbackArgs, json: bool, project_root: &Path) -> Result<i32> {
    let store = StateStore::open_project(project_root)?;

    if args.preview {
        let preview = preview_rollback(&store);
        if json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        } else if !preview.available {
            println!("No pre-sync backups available.");
        } else {
            println!(
                "Would restore snapshot from {}:",
                preview.backup_time.as_deref().unwrap_or("unknown time")
            );
            for file in &preview.files {
                let diff = file
                    .story_diff
                    .map(|d| format!(" (story delta {d:+})"))
                    .unwrap_or_default();
                println!(
                    "  {}  {} -> {} bytes{diff}",
                    file.name, file.current_size, file.backup_size
                );
            }
        }
        return Ok(0);
    }

    let summary = rollback_last(&store)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Restored {} file(s) from {}",
            summary.restored_files.len(),
            summary
                .backup_used
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string())
        );
    }
    Ok(0)
}
