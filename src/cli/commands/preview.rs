//! `bmsync preview`: show what a sync would do, including hash
//! transitions, without applying or reporting.

use std::path::Path;
use std::sync::Arc;

use crate::engine::{SyncEngine, SyncOptions};
use crate::error::Result;
use crate::tracker::{TrackerCli, tracker_binary};

/// Print the planned operations for a project.
///
/// # Errors
///
/// Config, discovery, and store errors.
pub fn execute(json: bool, project_root: &Path) -> Result<i32> {
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let tracker = Arc::new(TrackerCli::new(tracker_binary()));
    let engine = SyncEngine::new(project_root, options, tracker)?;
    let plan = engine.plan()?;

    if json {
        let body = serde_json::json!({
            "summary": plan.summary,
            "baseline": plan.baseline,
            "operations": plan.operations,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(0);
    }

    if plan.baseline {
        println!("First run: no previous index, everything below is new.");
    }
    if plan.operations.is_empty() {
        println!("Nothing to sync.");
        return Ok(0);
    }

    println!(
        "{} operation(s) planned ({} create, {} update):",
        plan.summary.total, plan.summary.create, plan.summary.update
    );
    for op in &plan.operations {
        let title = op.title.as_deref().unwrap_or("-");
        println!("  {} {:<6} {}  [{}]", op.action, op.content_type, op.content_key, title);
        if let Some(state) = &op.mapped_state {
            println!("        state -> {state}");
        }
        match (&op.previous_hash, &op.current_hash) {
            (Some(prev), Some(cur)) if prev != cur => {
                println!("        hash  {} -> {}", &prev[..12.min(prev.len())], &cur[..12.min(cur.len())]);
            }
            _ => {}
        }
        if let Some(labels) = &op.labels {
            println!("        labels {labels:?}");
        }
    }
    Ok(0)
}
