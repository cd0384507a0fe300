//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Bidirectional sync between BMAD content and a remote tracker.
#[derive(Debug, Parser)]
#[command(name = "bmsync", version, about)]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet logging (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Project root (defaults to walking up from the current
    /// directory until a `.sync/` directory is found)
    #[arg(long, global = true, env = "BMAD_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Plan and apply sync operations for the current project
    Sync(SyncArgs),
    /// Show planned operations without writing anything
    Preview,
    /// Validate content structure and configuration offline
    Validate,
    /// Restore the most recent pre-sync state snapshot
    Rollback(RollbackArgs),
    /// Summarize sync state, registry, and conflict metrics
    Dashboard,
    /// Manage and sync many projects at once
    Portfolio {
        #[command(subcommand)]
        command: PortfolioCommands,
    },
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Plan only; apply nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Only create missing tracker issues
    #[arg(long, conflicts_with = "update_only")]
    pub create_only: bool,

    /// Only update existing tracker issues
    #[arg(long)]
    pub update_only: bool,

    /// Ignore the previous content index and re-plan from scratch
    #[arg(long)]
    pub force_refresh: bool,

    /// Compare tracker state after apply and queue conflicts
    #[arg(long)]
    pub detect_conflicts: bool,
}

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Show what would be restored without restoring it
    #[arg(long)]
    pub preview: bool,
}

#[derive(Debug, Subcommand)]
pub enum PortfolioCommands {
    /// Create the portfolio config if it does not exist
    Init,
    /// Register a project directory in the portfolio
    Register {
        /// Project root containing `.sync/config/sync_config.yaml`
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered projects
    List,
    /// Sync projects in parallel
    Sync(PortfolioSyncArgs),
    /// Show per-project sync status
    Monitor(MonitorArgs),
    /// Install, update, or remove the cron schedule
    Schedule(ScheduleArgs),
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Aggregate metrics, trends, and a health score over the window
    #[arg(long)]
    pub analytics: bool,

    /// History window in days for analytics
    #[arg(long, default_value_t = crate::portfolio::analytics::DEFAULT_WINDOW_DAYS)]
    pub days: i64,
}

#[derive(Debug, Args)]
pub struct PortfolioSyncArgs {
    /// Specific project keys (default: all enabled)
    #[arg(long, num_args = 1..)]
    pub projects: Vec<String>,

    /// Parallel workers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Plan only; apply nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Queue conflicts found after apply
    #[arg(long)]
    pub detect_conflicts: bool,

    /// Per-project timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Cron expression (e.g. "0 */6 * * *")
    #[arg(long, default_value = "0 */6 * * *")]
    pub cron: String,

    /// Restrict the scheduled sync to specific project keys
    #[arg(long, num_args = 1..)]
    pub projects: Vec<String>,

    /// Workers for the scheduled run
    #[arg(long)]
    pub workers: Option<usize>,

    /// Remove the managed schedule instead of installing one
    #[arg(long)]
    pub remove: bool,
}
