//! Portfolio executor: run the per-project pipeline across many
//! projects with bounded parallelism.
//!
//! One project is the unit of parallelism; inside a project every
//! operation applies strictly in order. Workers pull projects from a
//! shared queue until it drains or the cancellation token trips; a
//! cancelled executor starts no new projects and lets in-flight ones
//! finish at their next operation boundary.

pub mod analytics;
pub mod schedule;

use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::portfolio::{PortfolioConfig, ProjectEntry};
use crate::engine::{CancelToken, SyncEngine, SyncOptions};
use crate::error::Result;
use crate::store::StateStore;
use crate::tracker::TrackerCli;
use crate::util::progress::{create_progress_bar, should_show_progress};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub max_workers: usize,
    pub dry_run: bool,
    pub detect_conflicts: bool,
    /// Per-project wall-clock budget, enforced at operation
    /// boundaries.
    pub project_timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            dry_run: false,
            detect_conflicts: false,
            project_timeout: None,
        }
    }
}

/// Result of one project's run.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSyncResult {
    pub project_key: String,
    pub project_name: String,
    pub project_path: String,
    pub success: bool,
    pub operations_planned: usize,
    pub operations_applied: usize,
    pub operations_failed: usize,
    pub conflicts: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: String,
}

/// Aggregate result across the portfolio.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioSyncResult {
    pub total_projects: usize,
    pub successful_projects: usize,
    pub failed_projects: usize,
    pub total_operations: usize,
    pub total_applied: usize,
    pub total_failed: usize,
    pub total_conflicts: usize,
    pub duration_seconds: f64,
    pub cancelled: bool,
    pub project_results: Vec<ProjectSyncResult>,
}

impl PortfolioSyncResult {
    fn aggregate(mut results: Vec<ProjectSyncResult>, started: Instant, cancelled: bool) -> Self {
        results.sort_by(|a, b| a.project_key.cmp(&b.project_key));
        Self {
            total_projects: results.len(),
            successful_projects: results.iter().filter(|r| r.success).count(),
            failed_projects: results.iter().filter(|r| !r.success).count(),
            total_operations: results.iter().map(|r| r.operations_planned).sum(),
            total_applied: results.iter().map(|r| r.operations_applied).sum(),
            total_failed: results.iter().map(|r| r.operations_failed).sum(),
            total_conflicts: results.iter().map(|r| r.conflicts).sum(),
            duration_seconds: started.elapsed().as_secs_f64(),
            cancelled,
            project_results: results,
        }
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    completed: usize,
    in_progress: Vec<String>,
}

/// Progress snapshot for callers polling the tracker.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub remaining: usize,
    pub percent: f64,
}

/// Thread-safe progress counters with start/complete events.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                total,
                ..ProgressState::default()
            }),
        }
    }

    pub fn start_project(&self, project_key: &str) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.in_progress.push(project_key.to_string());
        info!(
            project = project_key,
            position = state.completed + 1,
            total = state.total,
            "project starting"
        );
    }

    pub fn complete_project(&self, project_key: &str, success: bool) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.in_progress.retain(|p| p != project_key);
        state.completed += 1;
        info!(
            project = project_key,
            completed = state.completed,
            total = state.total,
            success,
            "project completed"
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().expect("lock poisoned");
        ProgressSnapshot {
            total: state.total,
            completed: state.completed,
            in_progress: state.in_progress.len(),
            remaining: state.total - state.completed,
            percent: if state.total == 0 {
                0.0
            } else {
                state.completed as f64 / state.total as f64 * 100.0
            },
        }
    }
}

/// Row of the portfolio monitor view.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectMonitorRow {
    pub project_key: String,
    pub name: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    pub pending_conflicts: usize,
}

/// Runs the per-project pipeline over the portfolio.
pub struct PortfolioExecutor {
    config: PortfolioConfig,
    options: ExecutorOptions,
}

impl PortfolioExecutor {
    #[must_use]
    pub const fn new(config: PortfolioConfig, options: ExecutorOptions) -> Self {
        Self { config, options }
    }

    /// Sync every enabled project.
    ///
    /// # Errors
    ///
    /// Never fails as a whole: per-project failures land in the
    /// aggregate.
    pub fn sync_all(&self, cancel: &CancelToken) -> Result<PortfolioSyncResult> {
        let projects = self.config.list_projects(true);
        Ok(self.run_projects(projects, cancel))
    }

    /// Sync an explicit selection of project keys.
    ///
    /// # Errors
    ///
    /// See [`PortfolioExecutor::sync_all`].
    pub fn sync_selected(
        &self,
        keys: &[String],
        cancel: &CancelToken,
    ) -> Result<PortfolioSyncResult> {
        let projects: Vec<(String, ProjectEntry)> = self
            .config
            .list_projects(false)
            .into_iter()
            .filter(|(key, _)| keys.iter().any(|k| k == key))
            .collect();
        if projects.is_empty() {
            warn!(?keys, "no matching projects in portfolio");
        }
        Ok(self.run_projects(projects, cancel))
    }

    fn run_projects(
        &self,
        projects: Vec<(String, ProjectEntry)>,
        cancel: &CancelToken,
    ) -> PortfolioSyncResult {
        let started = Instant::now();
        if projects.is_empty() {
            return PortfolioSyncResult::aggregate(Vec::new(), started, cancel.is_cancelled());
        }

        info!(count = projects.len(), "starting portfolio sync");
        let progress = Arc::new(ProgressTracker::new(projects.len()));
        let bar = create_progress_bar(
            projects.len() as u64,
            "Syncing projects",
            should_show_progress(),
        );
        let queue: Arc<Mutex<VecDeque<(String, ProjectEntry)>>> =
            Arc::new(Mutex::new(projects.into_iter().collect()));
        let results: Arc<Mutex<Vec<ProjectSyncResult>>> = Arc::new(Mutex::new(Vec::new()));

        let worker_count = self
            .options
            .max_workers
            .clamp(1, queue.lock().expect("lock poisoned").len());

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let queue = Arc::clone(&queue);
                let results = Arc::clone(&results);
                let progress = Arc::clone(&progress);
                let cancel = cancel.clone();
                let options = self.options.clone();
                let bar = bar.clone();
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let job = queue.lock().expect("lock poisoned").pop_front();
                        let Some((key, entry)) = job else {
                            break;
                        };
                        progress.start_project(&key);
                        let result = sync_one_project(&key, &entry, &options, &cancel);
                        progress.complete_project(&key, result.success);
                        bar.inc(1);
                        results.lock().expect("lock poisoned").push(result);
                    }
                });
            }
        });

        bar.finish_and_clear();
        let results = Arc::try_unwrap(results)
            .map(|m| m.into_inner().expect("lock poisoned"))
            .unwrap_or_default();
        let aggregate = PortfolioSyncResult::aggregate(results, started, cancel.is_cancelled());
        info!(
            successful = aggregate.successful_projects,
            failed = aggregate.failed_projects,
            applied = aggregate.total_applied,
            "portfolio sync complete"
        );
        aggregate
    }

    /// Read-only status of every registered project.
    #[must_use]
    pub fn monitor(&self) -> Vec<ProjectMonitorRow> {
        self.config
            .list_projects(false)
            .into_iter()
            .map(|(key, entry)| {
                let (last_sync, pending) = read_project_status(Path::new(&entry.path));
                ProjectMonitorRow {
                    project_key: key,
                    name: entry.name,
                    enabled: entry.enabled,
                    last_sync,
                    pending_conflicts: pending,
                }
            })
            .collect()
    }
}

fn read_project_status(project_root: &Path) -> (Option<String>, usize) {
    let Ok(store) = StateStore::open_project(project_root) else {
        return (None, 0);
    };
    let last_sync = store
        .sync_state()
        .ok()
        .and_then(|s| s.last_sync)
        .map(|t| t.to_rfc3339());
    let pending = store.pending_conflicts().map(|c| c.len()).unwrap_or(0);
    (last_sync, pending)
}

/// Run one project's pipeline; every failure becomes a per-project
/// result rather than an executor error.
fn sync_one_project(
    project_key: &str,
    entry: &ProjectEntry,
    options: &ExecutorOptions,
    cancel: &CancelToken,
) -> ProjectSyncResult {
    let started = Instant::now();
    let project_root = PathBuf::from(&entry.path);
    let mut result = ProjectSyncResult {
        project_key: project_key.to_string(),
        project_name: entry.name.clone(),
        project_path: entry.path.clone(),
        success: false,
        operations_planned: 0,
        operations_applied: 0,
        operations_failed: 0,
        conflicts: 0,
        duration_seconds: 0.0,
        error_message: None,
        timestamp: Utc::now().to_rfc3339(),
    };

    let sync_options = SyncOptions {
        dry_run: options.dry_run,
        detect_conflicts: options.detect_conflicts,
        ..SyncOptions::default()
    };
    let tracker = Arc::new(TrackerCli::new(crate::tracker::tracker_binary()));
    let deadline = options.project_timeout.map(|t| Instant::now() + t);

    match SyncEngine::new(&project_root, sync_options, tracker)
        .and_then(|engine| engine.run(cancel, deadline))
    {
        Ok(run) => {
            result.operations_planned = run.operations_planned;
            result.operations_applied = run.operations_applied;
            result.operations_failed = run.operations_failed;
            result.conflicts = run.conflicts;
            result.success = run.operations_failed == 0;
            if run.rolled_back {
                result.error_message =
                    Some("apply failed; state restored from pre-sync snapshot".to_string());
            }
        }
        Err(e) => {
            warn!(project = project_key, error = %e, "project sync failed");
            result.error_message = Some(e.to_string());
        }
    }

    result.duration_seconds = started.elapsed().as_secs_f64();
    result
}
