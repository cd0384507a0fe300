//! Portfolio analytics: aggregate sync metrics, trend analysis, and
//! a portfolio health score.
//!
//! Metrics come from each registered project's persisted sync state:
//! `sync_apply` records inside the window contribute sync counts,
//! applied-operation totals, and durations; the bounded errors queue
//! contributes the error rate; the pending conflict queue is sampled
//! as-is. Projects whose state cannot be read are carried in the
//! report with an error string instead of silently dropping out of
//! the aggregate.
//!
//! The health score starts at 100 and loses points for the error
//! rate, for enabled projects with no sync inside the window, and
//! for projects carrying pending conflicts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::path::Path;

use crate::config::portfolio::PortfolioConfig;
use crate::error::Result;
use crate::store::StateStore;

/// Default analysis window.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Per-project rollup over the analysis window.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectWindowMetrics {
    pub project_key: String,
    pub name: String,
    pub path: String,
    /// Applied sync runs inside the window.
    pub syncs: usize,
    /// Operations applied by those runs.
    pub operations: u64,
    /// Recorded failures inside the window.
    pub errors: usize,
    /// Pending conflicts right now.
    pub conflicts: usize,
    /// Mean duration of applied sync runs, seconds.
    pub avg_duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Set when the project's state could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate metrics across the portfolio.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub generated: DateTime<Utc>,
    pub period_days: i64,
    pub total_projects: usize,
    pub total_syncs: usize,
    pub total_operations: u64,
    pub total_duration_seconds: f64,
    pub avg_sync_duration: f64,
    /// Recorded failures as a percentage of operations.
    pub error_rate: f64,
    /// 0-100, see [`health_score`].
    pub portfolio_health_score: u8,
    pub projects: Vec<ProjectWindowMetrics>,
}

/// One project's row in the trend report.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectActivity {
    pub name: String,
    pub syncs: usize,
    pub operations: u64,
    pub errors: usize,
}

/// Trend analysis over the window.
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub period_days: i64,
    pub total_activity: usize,
    pub avg_daily_syncs: f64,
    pub avg_sync_duration: f64,
    pub error_rate: f64,
    pub total_operations: u64,
    pub project_activity: Vec<ProjectActivity>,
}

/// Portfolio health, 0-100: the error rate costs its percentage
/// points, an enabled project with no sync inside the window costs
/// 10, and a project with pending conflicts costs 2.
#[must_use]
pub fn health_score(error_rate: f64, stale_projects: usize, conflicted_projects: usize) -> u8 {
    let score = 100.0
        - error_rate
        - 10.0 * stale_projects as f64
        - 2.0 * conflicted_projects as f64;
    score.clamp(0.0, 100.0).round() as u8
}

/// Analytics engine over the registered portfolio.
pub struct PortfolioAnalytics {
    config: PortfolioConfig,
}

impl PortfolioAnalytics {
    #[must_use]
    pub const fn new(config: PortfolioConfig) -> Self {
        Self { config }
    }

    /// Rollup for a single project over the window.
    #[must_use]
    pub fn collect_project_metrics(
        project_key: &str,
        name: &str,
        project_root: &Path,
        window_days: i64,
    ) -> ProjectWindowMetrics {
        let mut metrics = ProjectWindowMetrics {
            project_key: project_key.to_string(),
            name: name.to_string(),
            path: project_root.to_string_lossy().to_string(),
            syncs: 0,
            operations: 0,
            errors: 0,
            conflicts: 0,
            avg_duration_seconds: 0.0,
            last_sync: None,
            error: None,
        };

        let state = StateStore::open_project(project_root)
            .and_then(|store| Ok((store.sync_state()?, store.pending_conflicts()?)));
        let (sync_state, conflicts) = match state {
            Ok(parts) => parts,
            Err(e) => {
                metrics.error = Some(e.to_string());
                return metrics;
            }
        };

        let cutoff = Utc::now() - ChronoDuration::days(window_days);
        let mut total_duration = 0.0;
        for record in &sync_state.operations {
            if record.timestamp < cutoff {
                continue;
            }
            if record.operation == "sync_apply" && record.result == "success" {
                metrics.syncs += 1;
                metrics.operations += record
                    .details
                    .get("applied")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0);
                total_duration += record
                    .details
                    .get("duration_seconds")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0);
            }
        }
        metrics.errors = sync_state
            .errors
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .count();
        if metrics.syncs > 0 {
            metrics.avg_duration_seconds = total_duration / metrics.syncs as f64;
        }
        metrics.conflicts = conflicts.len();
        metrics.last_sync = sync_state.last_sync;
        metrics
    }

    /// Aggregate metrics across enabled projects.
    ///
    /// # Errors
    ///
    /// Never fails as a whole: unreadable projects are reported with
    /// their error string and excluded from the totals.
    pub fn aggregate_metrics(&self, window_days: i64) -> Result<PortfolioMetrics> {
        let projects = self.config.list_projects(true);

        let mut rows = Vec::new();
        let mut total_syncs = 0usize;
        let mut total_operations = 0u64;
        let mut total_duration = 0.0f64;
        let mut total_errors = 0usize;
        let mut stale = 0usize;
        let mut conflicted = 0usize;

        for (key, entry) in &projects {
            let row = Self::collect_project_metrics(
                key,
                &entry.name,
                Path::new(&entry.path),
                window_days,
            );
            if row.error.is_none() {
                total_syncs += row.syncs;
                total_operations += row.operations;
                total_duration += row.avg_duration_seconds * row.syncs as f64;
                total_errors += row.errors;
                if row.syncs == 0 {
                    stale += 1;
                }
                if row.conflicts > 0 {
                    conflicted += 1;
                }
            }
            rows.push(row);
        }

        let avg_sync_duration = if total_syncs > 0 {
            total_duration / total_syncs as f64
        } else {
            0.0
        };
        let error_rate = if total_operations > 0 {
            total_errors as f64 / total_operations as f64 * 100.0
        } else {
            0.0
        };

        Ok(PortfolioMetrics {
            generated: Utc::now(),
            period_days: window_days,
            total_projects: projects.len(),
            total_syncs,
            total_operations,
            total_duration_seconds: total_duration,
            avg_sync_duration,
            error_rate,
            portfolio_health_score: health_score(error_rate, stale, conflicted),
            projects: rows,
        })
    }

    /// Trend view derived from the aggregate.
    ///
    /// # Errors
    ///
    /// See [`PortfolioAnalytics::aggregate_metrics`].
    pub fn analyze_trends(&self, window_days: i64) -> Result<TrendReport> {
        let metrics = self.aggregate_metrics(window_days)?;
        Ok(TrendReport {
            period_days: window_days,
            total_activity: metrics.total_syncs,
            avg_daily_syncs: if window_days > 0 {
                metrics.total_syncs as f64 / window_days as f64
            } else {
                0.0
            },
            avg_sync_duration: metrics.avg_sync_duration,
            error_rate: metrics.error_rate,
            total_operations: metrics.total_operations,
            project_activity: metrics
                .projects
                .iter()
                .filter(|p| p.error.is_none())
                .map(|p| ProjectActivity {
                    name: p.name.clone(),
                    syncs: p.syncs,
                    operations: p.operations,
                    errors: p.errors,
                })
                .collect(),
        })
    }
}
