//! `bmsync sync`: plan, report, and apply.

use std::path::Path;
use std::sync::Arc;

use crate::cli::SyncArgs;
use crate::discovery::ContentDiscovery;
use crate::engine::{CancelToken, SyncEngine, SyncOptions};
use crate::error::Result;
use crate::tracker::{TrackerCli, tracker_binary};

/// Run a sync for one project. Exit code 0 when nothing failed,
/// 2 when apply had failures and rolled back.
///
/// # Errors
///
/// Config, discovery, and store errors.
pub fn execute(args: &SyncArgs, json: bool, project_root: &Path) -> Result<i32> {
    let options = SyncOptions {
        dry_run: args.dry_run,
        create_only: args.create_only,
        update_only: args.update_only,
        force_refresh: args.force_refresh,
        detect_conflicts: args.detect_conflicts,
    };
    let tracker = Arc::new(TrackerCli::new(tracker_binary()));
    let engine = SyncEngine::new(project_root, options, tracker)?;

    let plan = engine.plan()?;
    let cancel = CancelToken::new();

    let outcome = if args.dry_run || plan.operations.is_empty() {
        None
    } else {
        Some(engine.apply(&plan, &cancel, None)?)
    };

    let conflicts = if args.detect_conflicts {
        let discovery = ContentDiscovery::new(engine.config().docs_bmad());
        let index = discovery.discover_all(None)?;
        engine.detect_and_record_conflicts(&index)?
    } else {
        Vec::new()
    };

    let failed = outcome.as_ref().map_or(0, |o| o.failed);

    if json {
        let body = serde_json::json!({
            "summary": plan.summary,
            "report": plan.report_path,
            "dry_run": args.dry_run,
            "applied": outcome.as_ref().map_or(0, |o| o.applied),
            "failed": failed,
            "rolled_back": outcome.as_ref().is_some_and(|o| o.rolled_back),
            "conflicts": conflicts,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "Planned {} operation(s): {} create, {} update",
            plan.summary.total, plan.summary.create, plan.summary.update
        );
        for op in &plan.operations {
            println!("  {} {} {}", op.action, op.content_type, op.content_key);
        }
        println!("Report: {}", plan.report_path.display());
        if args.dry_run {
            println!("Dry run: nothing applied.");
        } else if let Some(outcome) = &outcome {
            for message in &outcome.messages {
                println!("  {message}");
            }
            println!(
                "Applied {} operation(s), {} failed{}",
                outcome.applied,
                outcome.failed,
                if outcome.rolled_back {
                    " (state rolled back)"
                } else {
                    ""
                }
            );
        }
        if !conflicts.is_empty() {
            println!("Conflicts detected: {}", conflicts.join(", "));
        }
    }

    Ok(if failed > 0 { 2 } else { 0 })
}
