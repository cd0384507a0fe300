//! Conflict resolution engine.
//!
//! Resolution strategies: keep-local, keep-remote, recent-wins, and
//! manual field-level selection. The automated pipeline tries, in
//! order: custom rules, the learned suggester, then the built-in
//! patterns; the first source whose confidence meets the threshold
//! (default 0.85) wins, and anything below it is deferred to manual
//! resolution.
//!
//! Applying a resolution is a single accounting step: the state
//! change is logged, the conflict leaves the pending queue, exactly
//! one record is appended to the resolution history, and the
//! effectiveness metrics grow by one entry.

pub mod learned;
pub mod merge;
pub mod metrics;
pub mod rules;

use chrono::Utc;
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};
use crate::mapper::{MapContext, StateMapper};
use crate::model::{
    BeforeStates, ChangeSource, ContentType, ResolutionRecord, ResolutionStrategy, StateChange,
    StateConflict,
};
use crate::store::StateStore;
use crate::util::time::compact_timestamp;
use learned::{ConflictFeatures, HistorySuggester, Suggester};
use merge::{MergeRecommendation, ThreeWayConflict};
use metrics::{EffectivenessTracker, MetricEntry};
use rules::{ConflictFacts, RulesEngine};
use tracing::{debug, info};

/// Default auto-resolution confidence threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// The settled state for a conflict, before it is applied.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub conflict_id: String,
    pub content_key: String,
    pub strategy: ResolutionStrategy,
    /// Resolved state in the local vocabulary.
    pub resolved_state: String,
    pub confidence: f64,
    pub auto: bool,
    pub resolved_by: String,
}

/// Conflict resolution engine for one project.
#[derive(Debug)]
pub struct ConflictResolver {
    store: StateStore,
    mapper: StateMapper,
    rules: RulesEngine,
    suggester: Option<HistorySuggester>,
    metrics: EffectivenessTracker,
    threshold: f64,
}

impl ConflictResolver {
    /// Build a resolver, training the learned suggester from the
    /// stored resolution history.
    ///
    /// # Errors
    ///
    /// Store errors while reading the history.
    pub fn new(store: StateStore, mapper: StateMapper, rules: RulesEngine) -> Result<Self> {
        let history = store.resolution_history()?;
        let suggester = HistorySuggester::train(&history);
        if let Some(model) = &suggester {
            debug!(samples = model.trained_on(), "learned suggester active");
        }
        let metrics = EffectivenessTracker::new(store.clone());
        Ok(Self {
            store,
            mapper,
            rules,
            suggester,
            metrics,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub const fn metrics(&self) -> &EffectivenessTracker {
        &self.metrics
    }

    fn remote_as_local(&self, conflict: &StateConflict, ctx: MapContext) -> Result<String> {
        self.mapper
            .remote_to_local(&conflict.remote_state, ContentType::Story, ctx)
    }

    fn resolved_state_for(
        &self,
        conflict: &StateConflict,
        strategy: ResolutionStrategy,
        ctx: MapContext,
    ) -> Result<String> {
        Ok(match strategy {
            ResolutionStrategy::KeepLocal | ResolutionStrategy::ManualFieldLevel => {
                conflict.local_state.clone()
            }
            ResolutionStrategy::KeepRemote => self.remote_as_local(conflict, ctx)?,
            ResolutionStrategy::RecentWins => {
                if conflict.local_updated > conflict.remote_updated {
                    conflict.local_state.clone()
                } else {
                    self.remote_as_local(conflict, ctx)?
                }
            }
        })
    }

    /// Resolve with an explicitly chosen strategy (user-driven).
    ///
    /// # Errors
    ///
    /// Mapping errors under strict mode.
    pub fn resolve_with(
        &self,
        conflict: &StateConflict,
        strategy: ResolutionStrategy,
        ctx: MapContext,
    ) -> Result<ResolutionOutcome> {
        let confidence = match strategy {
            ResolutionStrategy::RecentWins => 0.8,
            _ => 1.0,
        };
        Ok(ResolutionOutcome {
            conflict_id: conflict.conflict_id.clone(),
            content_key: conflict.content_key.clone(),
            strategy,
            resolved_state: self.resolved_state_for(conflict, strategy, ctx)?,
            confidence,
            auto: false,
            resolved_by: "user".to_string(),
        })
    }

    /// Manual field-level resolution: the caller maps each field to
    /// the side that should win. Remote values are mapped into the
    /// local vocabulary on the fly.
    ///
    /// # Errors
    ///
    /// `Config` for unknown field/side names; mapping errors.
    pub fn resolve_manual(
        &self,
        conflict: &StateConflict,
        fields: &BTreeMap<String, String>,
        ctx: MapContext,
    ) -> Result<ResolutionOutcome> {
        let mut resolved_state = conflict.local_state.clone();
        for (field, side) in fields {
            match (field.as_str(), side.as_str()) {
                ("state", "local") => resolved_state = conflict.local_state.clone(),
                ("state", "remote") => resolved_state = self.remote_as_local(conflict, ctx)?,
                ("state", other) => {
                    return Err(SyncError::Config(format!(
                        "unknown side '{other}' for field 'state'"
                    )));
                }
                (other, _) => {
                    return Err(SyncError::Config(format!(
                        "unknown conflict field: {other}"
                    )));
                }
            }
        }
        Ok(ResolutionOutcome {
            conflict_id: conflict.conflict_id.clone(),
            content_key: conflict.content_key.clone(),
            strategy: ResolutionStrategy::ManualFieldLevel,
            resolved_state,
            confidence: 1.0,
            auto: false,
            resolved_by: "user".to_string(),
        })
    }

    fn facts(&self, conflict: &StateConflict, ctx: MapContext) -> Result<ConflictFacts> {
        let remote_as_local = self.remote_as_local(conflict, ctx)?;
        let diff_type = if conflict.local_state.trim() == remote_as_local.trim() {
            Some("whitespace_only".to_string())
        } else if conflict.local_state.to_lowercase() == remote_as_local.to_lowercase() {
            Some("case_only".to_string())
        } else {
            None
        };
        let age_hours = (Utc::now() - conflict.local_updated).num_seconds() as f64 / 3600.0;
        Ok(ConflictFacts {
            content_key: conflict.content_key.clone(),
            local_state: conflict.local_state.clone(),
            remote_state: conflict.remote_state.clone(),
            local_age_hours: Some(age_hours),
            diff_type,
        })
    }

    /// Built-in pattern fallback from the mapper config.
    fn check_patterns(
        &self,
        conflict: &StateConflict,
        ctx: MapContext,
    ) -> Result<Option<(ResolutionStrategy, f64)>> {
        let remote_as_local = self.remote_as_local(conflict, ctx)?;
        for rule in &self.mapper.config().auto_resolution.rules {
            let matched = match rule.pattern.as_str() {
                "whitespace_only" => conflict.local_state.trim() == remote_as_local.trim(),
                "case_only" => {
                    conflict.local_state.to_lowercase() == remote_as_local.to_lowercase()
                }
                "remote_done_vs_local_review" => {
                    remote_as_local == "done" && conflict.local_state == "review"
                }
                _ => false,
            };
            if matched {
                if let Ok(strategy) = rule.action.parse::<ResolutionStrategy>() {
                    return Ok(Some((strategy, rule.confidence)));
                }
            }
        }
        Ok(None)
    }

    /// Automated resolution pipeline: custom rules, then the learned
    /// suggester, then built-in patterns. Returns `None` when nothing
    /// meets the confidence threshold.
    ///
    /// # Errors
    ///
    /// Mapping errors under strict mode.
    pub fn auto_resolve(
        &self,
        conflict: &StateConflict,
        ctx: MapContext,
    ) -> Result<Option<ResolutionOutcome>> {
        let facts = self.facts(conflict, ctx)?;

        let matched_rule = self
            .rules
            .find_matching(&facts)
            .filter(|r| r.confidence >= self.threshold)
            .and_then(|r| r.strategy().map(|strategy| (r.name.clone(), strategy, r.confidence)));

        let (strategy, confidence) = if let Some((name, strategy, confidence)) = matched_rule {
            info!(rule = %name, key = %conflict.content_key, "custom rule matched");
            (strategy, confidence)
        } else if let Some(suggestion) = self
            .suggester
            .as_ref()
            .and_then(|s| s.predict(&ConflictFeatures::from_conflict(conflict)))
            .filter(|s| s.confidence >= self.threshold)
        {
            info!(
                strategy = %suggestion.strategy,
                key = %conflict.content_key,
                "learned suggestion accepted"
            );
            (suggestion.strategy, suggestion.confidence)
        } else if let Some((strategy, confidence)) = self
            .check_patterns(conflict, ctx)?
            .filter(|(_, c)| *c >= self.threshold)
        {
            (strategy, confidence)
        } else {
            return Ok(None);
        };

        Ok(Some(ResolutionOutcome {
            conflict_id: conflict.conflict_id.clone(),
            content_key: conflict.content_key.clone(),
            strategy,
            resolved_state: self.resolved_state_for(conflict, strategy, ctx)?,
            confidence,
            auto: true,
            resolved_by: "system".to_string(),
        }))
    }

    /// Fallible wrapper used by batch flows.
    ///
    /// # Errors
    ///
    /// `ConflictUnresolvable` when no source met the threshold.
    pub fn auto_resolve_or_defer(
        &self,
        conflict: &StateConflict,
        ctx: MapContext,
    ) -> Result<ResolutionOutcome> {
        self.auto_resolve(conflict, ctx)?
            .ok_or_else(|| SyncError::ConflictUnresolvable {
                conflict_id: conflict.conflict_id.clone(),
            })
    }

    /// Apply a resolution: log the transition, dequeue the conflict,
    /// append to the resolution history, and record metrics.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn apply_resolution(
        &self,
        outcome: &ResolutionOutcome,
        conflict: &StateConflict,
        time_seconds: f64,
    ) -> Result<ResolutionRecord> {
        self.store.log_state_change(
            StateChange {
                content_key: outcome.content_key.clone(),
                from_state: conflict.local_state.clone(),
                to_state: outcome.resolved_state.clone(),
                timestamp: Utc::now(),
                source: ChangeSource::ConflictResolution,
                operation: format!("resolve_{}", outcome.strategy),
                user: Some(outcome.resolved_by.clone()),
                content_type: ContentType::Story,
            },
            self.mapper.retention_days(),
        )?;

        self.store.remove_conflict(&conflict.conflict_id)?;

        let record = ResolutionRecord {
            resolution_id: format!(
                "r-{}-{}",
                conflict.conflict_id,
                compact_timestamp(Utc::now())
            ),
            conflict_id: conflict.conflict_id.clone(),
            content_key: outcome.content_key.clone(),
            strategy: outcome.strategy,
            before_states: BeforeStates {
                local: conflict.local_state.clone(),
                remote: conflict.remote_state.clone(),
            },
            after_state: outcome.resolved_state.clone(),
            resolved_at: Utc::now(),
            resolved_by: outcome.resolved_by.clone(),
            auto: outcome.auto,
            confidence: outcome.confidence,
        };
        self.store.append_resolution(record.clone())?;

        self.metrics.record(MetricEntry {
            timestamp: Utc::now(),
            conflict_id: conflict.conflict_id.clone(),
            content_key: outcome.content_key.clone(),
            auto: outcome.auto,
            confidence: outcome.confidence,
            strategy: outcome.strategy.as_str().to_string(),
            time_seconds,
            overridden: false,
            satisfaction: None,
        })?;

        info!(
            key = %outcome.content_key,
            from = %conflict.local_state,
            to = %outcome.resolved_state,
            strategy = %outcome.strategy,
            "resolution applied"
        );
        Ok(record)
    }

    /// Build a three-way view of a conflict from the state history
    /// and recommend a resolution.
    ///
    /// # Errors
    ///
    /// Store and mapping errors.
    pub fn three_way(
        &self,
        conflict: &StateConflict,
        ctx: MapContext,
    ) -> Result<(ThreeWayConflict, MergeRecommendation)> {
        let remote_as_local = self.remote_as_local(conflict, ctx)?;
        let history = self.store.state_history(&conflict.content_key)?;
        let three_way = merge::create_three_way_conflict(
            &conflict.content_key,
            &conflict.local_state,
            &remote_as_local,
            conflict.local_updated,
            conflict.remote_updated,
            &history,
        );
        let recommendation = merge::recommend(&three_way);
        Ok((three_way, recommendation))
    }
}
