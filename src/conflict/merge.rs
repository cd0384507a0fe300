//! Three-way merge for state conflicts with ancestor detection.
//!
//! The ancestor is the most recent historic state for the content key
//! that equals neither current side; with no such entry the oldest
//! recorded state is used, and with no history at all the merge falls
//! back to a recent-wins recommendation. Both sides are expressed in
//! the local vocabulary (the caller maps the remote state first).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ResolutionStrategy, StateChange};
use crate::util::time::compact_timestamp;

/// A conflict augmented with its common ancestor.
#[derive(Debug, Clone, Serialize)]
pub struct ThreeWayConflict {
    pub conflict_id: String,
    pub content_key: String,
    pub local_state: String,
    /// Remote state mapped into the local vocabulary.
    pub remote_state: String,
    pub ancestor_state: Option<String>,
    pub local_updated: DateTime<Utc>,
    pub remote_updated: DateTime<Utc>,
    pub ancestor_updated: Option<DateTime<Utc>>,
}

/// Recommendation produced by the merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRecommendation {
    pub strategy: ResolutionStrategy,
    pub confidence: f64,
    pub rationale: String,
}

/// Find the common ancestor in the state history (oldest→newest).
///
/// Scans backwards for the last state that matches neither side; when
/// every entry matches one of the sides, the oldest entry stands in.
#[must_use]
pub fn find_common_ancestor<'a>(
    local_state: &str,
    remote_state: &str,
    history: &'a [StateChange],
) -> Option<&'a StateChange> {
    let mut sorted: Vec<&StateChange> = history.iter().collect();
    sorted.sort_by_key(|c| c.timestamp);

    sorted
        .iter()
        .rev()
        .find(|entry| entry.to_state != local_state && entry.to_state != remote_state)
        .copied()
        .or_else(|| sorted.first().copied())
}

/// Build a three-way conflict for a key from its state history.
#[must_use]
pub fn create_three_way_conflict(
    content_key: &str,
    local_state: &str,
    remote_state: &str,
    local_updated: DateTime<Utc>,
    remote_updated: DateTime<Utc>,
    history: &[StateChange],
) -> ThreeWayConflict {
    let ancestor = find_common_ancestor(local_state, remote_state, history);
    ThreeWayConflict {
        conflict_id: format!("3way-{content_key}-{}", compact_timestamp(Utc::now())),
        content_key: content_key.to_string(),
        local_state: local_state.to_string(),
        remote_state: remote_state.to_string(),
        ancestor_state: ancestor.map(|a| a.to_state.clone()),
        local_updated,
        remote_updated,
        ancestor_updated: ancestor.map(|a| a.timestamp),
    }
}

/// Recommend a resolution for a three-way conflict.
///
/// - local == ancestor → only the remote side moved → keep-remote, 0.9
/// - remote == ancestor → only the local side moved → keep-local, 0.9
/// - both moved → the newer side, 0.7
/// - no ancestor → recent-wins, 0.5
#[must_use]
pub fn recommend(conflict: &ThreeWayConflict) -> MergeRecommendation {
    let Some(ancestor) = &conflict.ancestor_state else {
        return MergeRecommendation {
            strategy: ResolutionStrategy::RecentWins,
            confidence: 0.5,
            rationale: "no common ancestor available".to_string(),
        };
    };

    if &conflict.local_state == ancestor {
        return MergeRecommendation {
            strategy: ResolutionStrategy::KeepRemote,
            confidence: 0.9,
            rationale: "local unchanged since ancestor".to_string(),
        };
    }
    if &conflict.remote_state == ancestor {
        return MergeRecommendation {
            strategy: ResolutionStrategy::KeepLocal,
            confidence: 0.9,
            rationale: "remote unchanged since ancestor".to_string(),
        };
    }

    if conflict.local_updated > conflict.remote_updated {
        MergeRecommendation {
            strategy: ResolutionStrategy::KeepLocal,
            confidence: 0.7,
            rationale: "both sides changed; local is more recent".to_string(),
        }
    } else {
        MergeRecommendation {
            strategy: ResolutionStrategy::KeepRemote,
            confidence: 0.7,
            rationale: "both sides changed; remote is more recent".to_string(),
        }
    }
}

/// The state a merge resolves to under a chosen strategy.
#[must_use]
pub fn merged_state(conflict: &ThreeWayConflict, strategy: ResolutionStrategy) -> String {
    match strategy {
        ResolutionStrategy::KeepLocal | ResolutionStrategy::ManualFieldLevel => {
            conflict.local_state.clone()
        }
        ResolutionStrategy::KeepRemote => conflict.remote_state.clone(),
        ResolutionStrategy::RecentWins => {
            if conflict.local_updated > conflict.remote_updated {
                conflict.local_state.clone()
            } else {
                conflict.remote_state.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeSource, ContentType};
    use chrono::Duration;

    fn change(to: &str, minutes_ago: i64) -> StateChange {
        StateChange {
            content_key: "1-1-setup".to_string(),
            from_state: "backlog".to_string(),
            to_state: to.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            source: ChangeSource::Local,
            operation: "sync".to_string(),
            user: None,
            content_type: ContentType::Story,
        }
    }

    #[test]
    fn test_ancestor_is_last_nonmatching_state() {
        let history = vec![change("drafted", 300), change("ready-for-dev", 200), change("review", 100)];
        let ancestor = find_common_ancestor("review", "done", &history).unwrap();
        assert_eq!(ancestor.to_state, "ready-for-dev");
    }

    #[test]
    fn test_ancestor_falls_back_to_oldest() {
        let history = vec![change("review", 200), change("done", 100)];
        let ancestor = find_common_ancestor("review", "done", &history).unwrap();
        assert_eq!(ancestor.to_state, "review");
    }

    #[test]
    fn test_no_history_no_ancestor() {
        assert!(find_common_ancestor("a", "b", &[]).is_none());
    }

    #[test]
    fn test_remote_unchanged_keeps_local() {
        // Ancestor ready-for-dev, local moved to review, remote still
        // at ready-for-dev.
        let history = vec![change("ready-for-dev", 200)];
        let conflict = create_three_way_conflict(
            "1-1-setup",
            "review",
            "ready-for-dev",
            Utc::now(),
            Utc::now() - Duration::hours(1),
            &history,
        );
        assert_eq!(conflict.ancestor_state.as_deref(), Some("ready-for-dev"));

        let rec = recommend(&conflict);
        assert_eq!(rec.strategy, ResolutionStrategy::KeepLocal);
        assert!((rec.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(merged_state(&conflict, rec.strategy), "review");
    }

    #[test]
    fn test_local_unchanged_keeps_remote() {
        let history = vec![change("in-progress", 200)];
        let conflict = create_three_way_conflict(
            "1-1-setup",
            "in-progress",
            "done",
            Utc::now() - Duration::hours(2),
            Utc::now(),
            &history,
        );
        let rec = recommend(&conflict);
        assert_eq!(rec.strategy, ResolutionStrategy::KeepRemote);
        assert!((rec.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_both_changed_newer_side_wins() {
        let history = vec![change("drafted", 500)];
        let conflict = create_three_way_conflict(
            "1-1-setup",
            "review",
            "done",
            Utc::now(),
            Utc::now() - Duration::hours(1),
            &history,
        );
        let rec = recommend(&conflict);
        assert_eq!(rec.strategy, ResolutionStrategy::KeepLocal);
        assert!((rec.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_ancestor_recommends_recent_wins() {
        let conflict = create_three_way_conflict(
            "1-1-setup",
            "review",
            "done",
            Utc::now() - Duration::hours(1),
            Utc::now(),
            &[],
        );
        let rec = recommend(&conflict);
        assert_eq!(rec.strategy, ResolutionStrategy::RecentWins);
        assert!((rec.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged_state(&conflict, rec.strategy), "done");
    }
}
