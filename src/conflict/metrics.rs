//! Resolution effectiveness tracking.
//!
//! Every applied resolution appends one entry to
//! `metrics/resolution_effectiveness.json`. Reports expose the auto
//! success rate, override rate, and estimated time saved (a manual
//! resolution is assumed to cost [`MANUAL_BASELINE_SECONDS`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::store::{StateFile, StateStore};

/// Assumed manual resolution cost for time-saved accounting.
pub const MANUAL_BASELINE_SECONDS: f64 = 180.0;

/// One recorded resolution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub timestamp: DateTime<Utc>,
    pub conflict_id: String,
    pub content_key: String,
    pub auto: bool,
    pub confidence: f64,
    pub strategy: String,
    pub time_seconds: f64,
    pub overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfaction: Option<u8>,
}

/// `metrics/resolution_effectiveness.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsDoc {
    #[serde(default)]
    pub entries: Vec<MetricEntry>,
}

/// Aggregated effectiveness report.
#[derive(Debug, Clone, Serialize)]
pub struct EffectivenessReport {
    pub total_resolutions: usize,
    pub auto_resolutions: usize,
    pub manual_resolutions: usize,
    pub auto_success_rate: f64,
    pub override_count: usize,
    pub override_rate: f64,
    pub avg_confidence: f64,
    pub time_saved_seconds: f64,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Per-strategy breakdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub count: usize,
    pub avg_confidence: f64,
    pub override_count: usize,
}

/// Effectiveness tracker bound to one project's state store.
#[derive(Debug, Clone)]
pub struct EffectivenessTracker {
    store: StateStore,
}

impl EffectivenessTracker {
    #[must_use]
    pub const fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Append one resolution event.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn record(&self, entry: MetricEntry) -> Result<()> {
        self.store
            .mutate_doc(StateFile::Metrics, |doc: &mut MetricsDoc| {
                doc.entries.push(entry);
                Ok(())
            })
    }

    /// Attach a 1-5 satisfaction score to a recorded resolution.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn record_satisfaction(&self, conflict_id: &str, score: u8) -> Result<bool> {
        self.store
            .mutate_doc(StateFile::Metrics, |doc: &mut MetricsDoc| {
                for entry in doc.entries.iter_mut().rev() {
                    if entry.conflict_id == conflict_id {
                        entry.satisfaction = Some(score.clamp(1, 5));
                        return Ok(true);
                    }
                }
                Ok(false)
            })
    }

    /// Aggregate report over all recorded entries.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn report(&self) -> Result<EffectivenessReport> {
        let doc: MetricsDoc = self.store.read_doc(StateFile::Metrics)?;
        let total = doc.entries.len();
        let auto = doc.entries.iter().filter(|e| e.auto).count();
        let overridden = doc.entries.iter().filter(|e| e.overridden).count();
        let auto_not_overridden = doc
            .entries
            .iter()
            .filter(|e| e.auto && !e.overridden)
            .count();

        let avg_confidence = if total == 0 {
            0.0
        } else {
            doc.entries.iter().map(|e| e.confidence).sum::<f64>() / total as f64
        };
        let time_saved = doc
            .entries
            .iter()
            .filter(|e| e.auto)
            .map(|e| (MANUAL_BASELINE_SECONDS - e.time_seconds).max(0.0))
            .sum();

        Ok(EffectivenessReport {
            total_resolutions: total,
            auto_resolutions: auto,
            manual_resolutions: total - auto,
            auto_success_rate: if auto == 0 {
                0.0
            } else {
                auto_not_overridden as f64 / auto as f64
            },
            override_count: overridden,
            override_rate: if total == 0 {
                0.0
            } else {
                overridden as f64 / total as f64
            },
            avg_confidence,
            time_saved_seconds: time_saved,
            period_start: doc.entries.iter().map(|e| e.timestamp).min(),
            period_end: doc.entries.iter().map(|e| e.timestamp).max(),
        })
    }

    /// Breakdown by strategy name.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn by_strategy(&self) -> Result<BTreeMap<String, StrategyStats>> {
        let doc: MetricsDoc = self.store.read_doc(StateFile::Metrics)?;
        let mut out: BTreeMap<String, StrategyStats> = BTreeMap::new();
        for entry in &doc.entries {
            let stats = out.entry(entry.strategy.clone()).or_default();
            stats.count += 1;
            stats.avg_confidence += entry.confidence;
            if entry.overridden {
                stats.override_count += 1;
            }
        }
        for stats in out.values_mut() {
            if stats.count > 0 {
                stats.avg_confidence /= stats.count as f64;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (TempDir, EffectivenessTracker) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join(".sync")).unwrap();
        (temp, EffectivenessTracker::new(store))
    }

    fn entry(id: &str, auto: bool, overridden: bool, confidence: f64) -> MetricEntry {
        MetricEntry {
            timestamp: Utc::now(),
            conflict_id: id.to_string(),
            content_key: "1-1-setup".to_string(),
            auto,
            confidence,
            strategy: "keep-remote".to_string(),
            time_seconds: if auto { 5.0 } else { 200.0 },
            overridden,
            satisfaction: None,
        }
    }

    #[test]
    fn test_report_rates() {
        let (_t, tracker) = tracker();
        tracker.record(entry("c-1", true, false, 0.9)).unwrap();
        tracker.record(entry("c-2", true, true, 0.8)).unwrap();
        tracker.record(entry("c-3", false, false, 1.0)).unwrap();

        let report = tracker.report().unwrap();
        assert_eq!(report.total_resolutions, 3);
        assert_eq!(report.auto_resolutions, 2);
        assert_eq!(report.manual_resolutions, 1);
        assert!((report.auto_success_rate - 0.5).abs() < f64::EPSILON);
        assert!((report.override_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.avg_confidence - 0.9).abs() < 1e-9);
        // Two auto entries at 5s each save (180-5)*2 seconds.
        assert!((report.time_saved_seconds - 350.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_report() {
        let (_t, tracker) = tracker();
        let report = tracker.report().unwrap();
        assert_eq!(report.total_resolutions, 0);
        assert!(report.period_start.is_none());
    }

    #[test]
    fn test_strategy_breakdown() {
        let (_t, tracker) = tracker();
        tracker.record(entry("c-1", true, false, 0.8)).unwrap();
        tracker.record(entry("c-2", true, true, 0.6)).unwrap();

        let by_strategy = tracker.by_strategy().unwrap();
        let stats = by_strategy.get("keep-remote").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.override_count, 1);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_satisfaction_attached() {
        let (_t, tracker) = tracker();
        tracker.record(entry("c-1", true, false, 0.8)).unwrap();
        assert!(tracker.record_satisfaction("c-1", 9).unwrap());
        assert!(!tracker.record_satisfaction("c-404", 3).unwrap());
    }
}
