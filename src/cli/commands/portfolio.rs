//! `bmsync portfolio`: init, register, list, sync, monitor,
//! schedule.

use std::time::Duration;

use crate::cli::{MonitorArgs, PortfolioCommands, PortfolioSyncArgs, ScheduleArgs};
use crate::config::portfolio::PortfolioConfig;
use crate::engine::CancelToken;
use crate::error::Result;
use crate::portfolio::analytics::PortfolioAnalytics;
use crate::portfolio::schedule::{install_schedule, remove_schedule};
use crate::portfolio::{ExecutorOptions, PortfolioExecutor, PortfolioSyncResult};

/// Dispatch a portfolio subcommand.
///
/// # Errors
///
/// Config and executor errors.
pub fn execute(command: &PortfolioCommands, json: bool) -> Result<i32> {
    match command {
        PortfolioCommands::Init => init(json),
        PortfolioCommands::Register { path, name } => register(path, name.as_deref(), json),
        PortfolioCommands::List => list(json),
        PortfolioCommands::Sync(args) => sync(args, json),
        PortfolioCommands::Monitor(args) => monitor(args, json),
        PortfolioCommands::Schedule(args) => schedule(args, json),
    }
}

fn init(json: bool) -> Result<i32> {
    let config = PortfolioConfig::load_or_init(None)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "config": config.path(), "projects": config.list_projects(false).len() })
        );
    } else {
        println!("Portfolio config: {}", config.path().display());
    }
    Ok(0)
}

fn register(path: &std::path::Path, name: Option<&str>, json: bool) -> Result<i32> {
    let mut config = PortfolioConfig::load_or_init(None)?;
    let key = config.register_project(path, name)?;
    if json {
        println!("{}", serde_json::json!({ "registered": key }));
    } else {
        println!("Registered '{key}' -> {}", path.display());
    }
    Ok(0)
}

fn list(json: bool) -> Result<i32> {
    let config = PortfolioConfig::load_or_init(None)?;
    let projects = config.list_projects(false);
    if json {
        let body: Vec<_> = projects
            .iter()
            .map(|(key, p)| {
                serde_json::json!({
                    "key": key,
                    "name": p.name,
                    "path": p.path,
                    "enabled": p.enabled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if projects.is_empty() {
        println!("No projects registered. Use: bmsync portfolio register <path>");
    } else {
        for (key, project) in &projects {
            let flag = if project.enabled { " " } else { "(disabled) " };
            println!("{key:<20} {flag}{}", project.path);
        }
    }
    Ok(0)
}

fn sync(args: &PortfolioSyncArgs, json: bool) -> Result<i32> {
    let config = PortfolioConfig::load_or_init(None)?;
    let executor = PortfolioExecutor::new(
        config,
        ExecutorOptions {
            max_workers: args.workers,
            dry_run: args.dry_run,
            detect_conflicts: args.detect_conflicts,
            project_timeout: args.timeout.map(Duration::from_secs),
        },
    );

    let cancel = CancelToken::new();
    let result = if args.projects.is_empty() {
        executor.sync_all(&cancel)?
    } else {
        executor.sync_selected(&args.projects, &cancel)?
    };

    print_result(&result, json)?;
    Ok(i32::from(result.failed_projects > 0))
}

fn print_result(result: &PortfolioSyncResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!(
        "Projects: {}/{} successful",
        result.successful_projects, result.total_projects
    );
    println!(
        "Operations: {} applied, {} failed, {} conflict(s)",
        result.total_applied, result.total_failed, result.total_conflicts
    );
    println!("Duration: {:.2}s", result.duration_seconds);
    for project in &result.project_results {
        let mark = if project.success { "ok " } else { "FAIL" };
        println!(
            "  [{mark}] {:<20} {}/{} applied ({:.2}s)",
            project.project_key,
            project.operations_applied,
            project.operations_planned,
            project.duration_seconds
        );
        if let Some(error) = &project.error_message {
            println!("         {error}");
        }
    }
    Ok(())
}

fn monitor(args: &MonitorArgs, json: bool) -> Result<i32> {
    let config = PortfolioConfig::load_or_init(None)?;

    if args.analytics {
        let analytics = PortfolioAnalytics::new(config);
        let metrics = analytics.aggregate_metrics(args.days)?;
        let trends = analytics.analyze_trends(args.days)?;
        if json {
            let body = serde_json::json!({
                "metrics": metrics,
                "trends": trends,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        } else {
            println!(
                "Portfolio health: {}/100 over the last {} day(s)",
                metrics.portfolio_health_score, metrics.period_days
            );
            println!(
                "Syncs: {} ({:.2}/day), {} operation(s), avg {:.2}s, error rate {:.2}%",
                metrics.total_syncs,
                trends.avg_daily_syncs,
                metrics.total_operations,
                metrics.avg_sync_duration,
                metrics.error_rate
            );
            for project in &metrics.projects {
                if let Some(error) = &project.error {
                    println!("  {:<20} unreadable: {error}", project.project_key);
                    continue;
                }
                println!(
                    "  {:<20} syncs={} ops={} errors={} conflicts={} avg={:.2}s",
                    project.project_key,
                    project.syncs,
                    project.operations,
                    project.errors,
                    project.conflicts,
                    project.avg_duration_seconds
                );
            }
        }
        return Ok(0);
    }

    let executor = PortfolioExecutor::new(config, ExecutorOptions::default());
    let rows = executor.monitor();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No projects registered.");
    } else {
        for row in &rows {
            println!(
                "{:<20} last_sync={} conflicts={}{}",
                row.project_key,
                row.last_sync.as_deref().unwrap_or("never"),
                row.pending_conflicts,
                if row.enabled { "" } else { " (disabled)" }
            );
        }
    }
    Ok(0)
}

fn schedule(args: &ScheduleArgs, json: bool) -> Result<i32> {
    if args.remove {
        let removed = remove_schedule()?;
        if json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else if removed {
            println!("Schedule removed.");
        } else {
            println!("No managed schedule present.");
        }
        return Ok(0);
    }

    let mut config = PortfolioConfig::load_or_init(None)?;
    for key in &args.projects {
        config.set_schedule(key, &args.cron)?;
    }
    install_schedule(&args.cron, &args.projects, args.workers)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "installed": args.cron, "projects": args.projects })
        );
    } else {
        println!("Scheduled portfolio sync: {}", args.cron);
    }
    Ok(0)
}
