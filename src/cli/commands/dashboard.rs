//! `bmsync dashboard`: one-screen summary of the project's sync
//! state, registry, and conflict metrics.

use std::path::Path;

use crate::conflict::metrics::EffectivenessTracker;
use crate::config::ProjectConfig;
use crate::error::Result;
use crate::model::ContentIndex;
use crate::numbering::NumberRegistry;
use crate::store::{StateFile, StateStore};

/// Print the dashboard.
///
/// # Errors
///
/// Store errors.
pub fn execute(json: bool, project_root: &Path) -> Result<i32> {
    let config = ProjectConfig::load(project_root)?;
    let store = StateStore::open_project(project_root)?;

    let index: ContentIndex = store.read_doc(StateFile::ContentIndex)?;
    let sync_state = store.sync_state()?;
    let conflicts = store.pending_conflicts()?;
    let registry = NumberRegistry::new(
        store.clone(),
        config.numbering.epic_base,
        config.numbering.epic_block_size,
    );
    let registry_stats = registry.stats()?;
    let metrics = EffectivenessTracker::new(store.clone()).report()?;

    if json {
        let body = serde_json::json!({
            "project": config.project.name,
            "epics": index.epics.len(),
            "stories": index.stories.len(),
            "last_sync": sync_state.last_sync,
            "recent_operations": sync_state.operations.iter().rev().take(5).collect::<Vec<_>>(),
            "pending_conflicts": conflicts.len(),
            "registry": registry_stats,
            "resolution_metrics": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(0);
    }

    println!("Project: {}", config.project.name);
    println!(
        "Content: {} epic(s), {} story(ies)",
        index.epics.len(),
        index.stories.len()
    );
    match sync_state.last_sync {
        Some(at) => println!("Last sync: {}", at.to_rfc3339()),
        None => println!("Last sync: never"),
    }
    if let Some(record) = sync_state.operations.last() {
        println!("Last operation: {} ({})", record.operation, record.result);
    }
    println!(
        "Numbering: {} epic range(s), {} assignment(s), {} renumber(s)",
        registry_stats.epic_count, registry_stats.story_count, registry_stats.renumber_count
    );
    println!("Pending conflicts: {}", conflicts.len());
    for conflict in conflicts.iter().take(5) {
        println!(
            "  {}  local={} remote={}",
            conflict.content_key, conflict.local_state, conflict.remote_state
        );
    }
    if metrics.total_resolutions > 0 {
        println!(
            "Resolutions: {} total, {:.0}% auto success, {:.0}s saved",
            metrics.total_resolutions,
            metrics.auto_success_rate * 100.0,
            metrics.time_saved_seconds
        );
    }
    Ok(0)
}
