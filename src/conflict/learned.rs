//! Learned resolution suggester.
//!
//! A frequency model trained from the resolution history: it counts
//! which strategy settled each (local, remote) state pair, with a
//! token-level fallback over the states and content key for pairs it
//! has never seen. The suggester is an optional collaborator: with
//! fewer than [`MIN_SAMPLES`] historical resolutions it stays
//! inactive and the pipeline falls through to the built-in patterns.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{ResolutionRecord, ResolutionStrategy, StateConflict};

/// Minimum history size before the model activates.
pub const MIN_SAMPLES: usize = 10;

/// Features extracted from a conflict for prediction.
#[derive(Debug, Clone)]
pub struct ConflictFeatures {
    pub local_state: String,
    pub remote_state: String,
    pub content_key: String,
    pub time_delta_seconds: f64,
    pub local_is_newer: bool,
    pub whitespace_equivalent: bool,
    pub case_equivalent: bool,
}

impl ConflictFeatures {
    #[must_use]
    pub fn from_conflict(conflict: &StateConflict) -> Self {
        Self::from_parts(
            &conflict.local_state,
            &conflict.remote_state,
            &conflict.content_key,
            conflict.local_updated,
            conflict.remote_updated,
        )
    }

    #[must_use]
    pub fn from_parts(
        local_state: &str,
        remote_state: &str,
        content_key: &str,
        local_updated: DateTime<Utc>,
        remote_updated: DateTime<Utc>,
    ) -> Self {
        let delta = (local_updated - remote_updated).num_seconds().abs() as f64;
        Self {
            local_state: local_state.to_string(),
            remote_state: remote_state.to_string(),
            content_key: content_key.to_string(),
            time_delta_seconds: delta,
            local_is_newer: local_updated > remote_updated,
            whitespace_equivalent: local_state.trim() == remote_state.trim(),
            case_equivalent: local_state.to_lowercase() == remote_state.to_lowercase(),
        }
    }

    fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for text in [&self.local_state, &self.remote_state, &self.content_key] {
            tokens.extend(
                text.to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string),
            );
        }
        tokens
    }
}

/// A strategy suggestion with confidence and rationale.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub strategy: ResolutionStrategy,
    pub confidence: f64,
    pub explanation: String,
}

/// Interface for pluggable suggesters.
pub trait Suggester {
    fn predict(&self, features: &ConflictFeatures) -> Option<Suggestion>;
}

type StrategyCounts = BTreeMap<ResolutionStrategy, usize>;

/// Frequency model over the resolution history.
#[derive(Debug, Clone, Default)]
pub struct HistorySuggester {
    /// (local, remote) state pair → strategy counts
    pair_counts: BTreeMap<(String, String), StrategyCounts>,
    /// token → strategy counts
    token_counts: BTreeMap<String, StrategyCounts>,
    trained_on: usize,
}

impl HistorySuggester {
    /// Train from the resolution history. Returns `None` below the
    /// activation threshold.
    #[must_use]
    pub fn train(history: &[ResolutionRecord]) -> Option<Self> {
        if history.len() < MIN_SAMPLES {
            return None;
        }

        let mut model = Self {
            trained_on: history.len(),
            ..Self::default()
        };
        for record in history {
            let pair = (
                record.before_states.local.clone(),
                record.before_states.remote.clone(),
            );
            *model
                .pair_counts
                .entry(pair)
                .or_default()
                .entry(record.strategy)
                .or_default() += 1;

            let features = ConflictFeatures::from_parts(
                &record.before_states.local,
                &record.before_states.remote,
                &record.content_key,
                record.resolved_at,
                record.resolved_at,
            );
            for token in features.tokens() {
                *model
                    .token_counts
                    .entry(token)
                    .or_default()
                    .entry(record.strategy)
                    .or_default() += 1;
            }
        }
        Some(model)
    }

    /// Number of records the model was trained on.
    #[must_use]
    pub const fn trained_on(&self) -> usize {
        self.trained_on
    }

    fn majority(counts: &StrategyCounts) -> Option<(ResolutionStrategy, f64)> {
        let total: usize = counts.values().sum();
        if total == 0 {
            return None;
        }
        counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(strategy, count)| (*strategy, *count as f64 / total as f64))
    }
}

impl Suggester for HistorySuggester {
    fn predict(&self, features: &ConflictFeatures) -> Option<Suggestion> {
        let pair = (features.local_state.clone(), features.remote_state.clone());

        if let Some(counts) = self.pair_counts.get(&pair) {
            let samples: usize = counts.values().sum();
            if samples >= 3 {
                let (strategy, confidence) = Self::majority(counts)?;
                return Some(Suggestion {
                    strategy,
                    confidence,
                    explanation: format!(
                        "'{} / {}' was resolved with {strategy} in {:.0}% of {samples} past cases",
                        features.local_state,
                        features.remote_state,
                        confidence * 100.0
                    ),
                });
            }
        }

        // Unseen pair: vote over shared tokens, dampened since the
        // evidence is indirect.
        let mut votes: StrategyCounts = BTreeMap::new();
        for token in features.tokens() {
            if let Some(counts) = self.token_counts.get(&token) {
                for (strategy, count) in counts {
                    *votes.entry(*strategy).or_default() += count;
                }
            }
        }
        let (strategy, raw_confidence) = Self::majority(&votes)?;
        let confidence = raw_confidence * 0.8;
        Some(Suggestion {
            strategy,
            confidence,
            explanation: format!(
                "token-level match over {} past resolutions suggests {strategy}",
                self.trained_on
            ),
        })
    }
}
