//! Bidirectional state vocabulary mapping between local and remote
//! workflows.
//!
//! The mapping is configuration-driven: a base YAML document
//! (`state_mapping.yaml`) optionally deep-merged with a local overlay
//! (`state_mapping.local.yaml`), where overlay keys replace base keys
//! at the same path. In strict mode unknown states are errors;
//! otherwise they fall back to the safe backlog state with a warning.
//!
//! Context-aware mapping resolves the `Todo` ambiguity for stories:
//! `Todo` means `ready-for-dev` when the story's context file exists,
//! `drafted` otherwise. The rule list is open for new conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::model::{ContentType, StateConflict};
use crate::util::time::compact_timestamp;

/// Default mapping document written when none exists.
pub const DEFAULT_MAPPING_YAML: &str = r#"story_states:
  local_to_remote:
    backlog: Backlog
    drafted: Todo
    ready-for-dev: Todo
    in-progress: In Progress
    review: In Review
    done: Done
    wont-do: Canceled
  remote_to_local:
    Backlog: backlog
    Todo: drafted
    In Progress: in-progress
    In Review: review
    Done: done
    Canceled: wont-do

epic_states:
  local_to_remote:
    backlog: Backlog
    drafted: Todo
    ready-for-dev: Todo
    in-progress: In Progress
    review: In Review
    done: Done
  remote_to_local:
    Backlog: backlog
    Todo: ready-for-dev
    In Progress: in-progress
    In Review: review
    Done: done

valid_transitions:
  backlog: [drafted, wont-do]
  drafted: [ready-for-dev, backlog, wont-do]
  ready-for-dev: [in-progress, drafted, wont-do]
  in-progress: [review, ready-for-dev, wont-do]
  review: [done, in-progress, wont-do]
  done: [in-progress]
  wont-do: [backlog]

context_aware_mapping:
  todo_to_local:
    - condition: story_context_file_exists
      result: ready-for-dev
    - condition: default
      result: drafted

validation:
  strict_mode: false

history:
  retention_days: 90

auto_resolution:
  rules:
    - pattern: whitespace_only
      action: keep-local
      confidence: 0.95
    - pattern: case_only
      action: keep-local
      confidence: 0.90
    - pattern: remote_done_vs_local_review
      action: keep-remote
      confidence: 0.85
"#;

/// One direction pair for a content type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePair {
    #[serde(default)]
    pub local_to_remote: BTreeMap<String, String>,
    #[serde(default)]
    pub remote_to_local: BTreeMap<String, String>,
}

/// Condition of a context-aware mapping rule. The enum is the
/// extension point for new context flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCondition {
    StoryContextFileExists,
    Default,
}

/// One context-aware mapping rule, evaluated in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRule {
    pub condition: ContextCondition,
    pub result: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextAwareMapping {
    #[serde(default)]
    pub todo_to_local: Vec<ContextRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default)]
    pub strict_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_retention")]
    pub retention_days: i64,
}

const fn default_retention() -> i64 {
    90
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            retention_days: default_retention(),
        }
    }
}

/// Built-in auto-resolution pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub action: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoResolutionSection {
    #[serde(default)]
    pub rules: Vec<PatternRule>,
}

/// The full mapping configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    #[serde(default)]
    pub story_states: StatePair,
    #[serde(default)]
    pub epic_states: StatePair,
    #[serde(default)]
    pub valid_transitions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub context_aware_mapping: ContextAwareMapping,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub auto_resolution: AutoResolutionSection,
}

impl MapperConfig {
    /// Built-in defaults (the same document `init` writes).
    ///
    /// # Panics
    ///
    /// Never: the default document is a compile-time constant that
    /// always parses.
    #[must_use]
    pub fn builtin() -> Self {
        serde_yaml::from_str(DEFAULT_MAPPING_YAML).expect("default mapping parses")
    }
}

/// Context hints for ambiguous remote→local mappings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapContext {
    pub has_context_file: bool,
}

/// Configured bidirectional mapper + transition validator.
#[derive(Debug, Clone)]
pub struct StateMapper {
    config: MapperConfig,
}

impl StateMapper {
    #[must_use]
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    /// Load the mapping config from `config_dir`, merging the local
    /// overlay when present.
    ///
    /// # Errors
    ///
    /// `Config` when the base file is missing or either file is
    /// invalid YAML.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let base_path = config_dir.join("state_mapping.yaml");
        if !base_path.exists() {
            return Err(SyncError::Config(format!(
                "state mapping configuration not found: {}",
                base_path.display()
            )));
        }
        let base: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&base_path)?)?;

        let overlay_path = config_dir.join("state_mapping.local.yaml");
        let merged = if overlay_path.exists() {
            let overlay: serde_yaml::Value =
                serde_yaml::from_str(&std::fs::read_to_string(&overlay_path)?)?;
            deep_merge(base, overlay)
        } else {
            base
        };

        let config: MapperConfig = serde_yaml::from_value(merged)?;
        Ok(Self::new(config))
    }

    /// Load the config, writing the default document first when the
    /// base file does not exist.
    ///
    /// # Errors
    ///
    /// See [`StateMapper::load`], plus write errors for the scaffold.
    pub fn load_or_init(config_dir: &Path) -> Result<Self> {
        let base_path = config_dir.join("state_mapping.yaml");
        if !base_path.exists() {
            std::fs::create_dir_all(config_dir)?;
            std::fs::write(&base_path, DEFAULT_MAPPING_YAML)?;
        }
        Self::load(config_dir)
    }

    #[must_use]
    pub const fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn pair(&self, content_type: ContentType) -> &StatePair {
        match content_type {
            ContentType::Epic => &self.config.epic_states,
            // Sprint-status entries carry story vocabulary.
            ContentType::Story | ContentType::SprintStatus => &self.config.story_states,
        }
    }

    /// Map a local state to the remote vocabulary.
    ///
    /// # Errors
    ///
    /// `UnknownState` for unmapped input under strict mode.
    pub fn local_to_remote(&self, state: &str, content_type: ContentType) -> Result<String> {
        if state.trim().is_empty() {
            return Ok("Backlog".to_string());
        }
        match self.pair(content_type).local_to_remote.get(state.trim()) {
            Some(remote) => Ok(remote.clone()),
            None if self.config.validation.strict_mode => Err(SyncError::UnknownState {
                direction: "local".to_string(),
                state: state.to_string(),
            }),
            None => {
                warn!(state, "unknown local state, defaulting to 'Backlog'");
                Ok("Backlog".to_string())
            }
        }
    }

    /// Map a remote state to the local vocabulary, applying
    /// context-aware disambiguation for story `Todo`.
    ///
    /// # Errors
    ///
    /// `UnknownState` for unmapped input under strict mode.
    pub fn remote_to_local(
        &self,
        state: &str,
        content_type: ContentType,
        ctx: MapContext,
    ) -> Result<String> {
        if state.trim().is_empty() {
            return Ok("backlog".to_string());
        }
        let state = state.trim();
        let mapped = match self.pair(content_type).remote_to_local.get(state) {
            Some(local) => local.clone(),
            None if self.config.validation.strict_mode => {
                return Err(SyncError::UnknownState {
                    direction: "remote".to_string(),
                    state: state.to_string(),
                });
            }
            None => {
                warn!(state, "unknown remote state, defaulting to 'backlog'");
                return Ok("backlog".to_string());
            }
        };

        if state == "Todo" && content_type == ContentType::Story {
            for rule in &self.config.context_aware_mapping.todo_to_local {
                match rule.condition {
                    ContextCondition::StoryContextFileExists if ctx.has_context_file => {
                        return Ok(rule.result.clone());
                    }
                    ContextCondition::Default => return Ok(rule.result.clone()),
                    ContextCondition::StoryContextFileExists => {}
                }
            }
        }

        Ok(mapped)
    }

    /// Remote states the mapping can produce for a content type,
    /// used for payload validation.
    #[must_use]
    pub fn allowed_remote_states(&self, content_type: ContentType) -> Vec<String> {
        let mut states: Vec<String> =
            self.pair(content_type).local_to_remote.values().cloned().collect();
        states.sort();
        states.dedup();
        states
    }

    /// Check a transition against the permitted graph.
    /// Returns `(ok, reason)`; the reason lists valid targets on
    /// rejection.
    #[must_use]
    pub fn validate_transition(&self, from: &str, to: &str) -> (bool, String) {
        let allowed = self.config.valid_transitions.get(from);
        match allowed {
            Some(targets) if targets.iter().any(|t| t == to) => (true, String::new()),
            Some(targets) => (
                false,
                format!(
                    "invalid transition: {from} -> {to}; valid transitions from '{from}': {}",
                    targets.join(", ")
                ),
            ),
            None => (false, format!("no transitions defined from '{from}'")),
        }
    }

    /// Fallible variant of [`StateMapper::validate_transition`].
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the edge is not in the graph.
    pub fn validate_transition_or_err(&self, from: &str, to: &str) -> Result<()> {
        let (ok, reason) = self.validate_transition(from, to);
        if ok {
            Ok(())
        } else {
            Err(SyncError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason,
            })
        }
    }

    /// State-history retention window.
    #[must_use]
    pub const fn retention_days(&self) -> i64 {
        self.config.history.retention_days
    }

    /// Detect a state conflict for one content key.
    ///
    /// A conflict is raised iff the local state differs from the
    /// mapped remote state **and** both sides changed after
    /// `last_sync`. Without a last sync stamp nothing is raised: the
    /// first sync establishes the baseline.
    ///
    /// # Errors
    ///
    /// Propagates strict-mode mapping errors.
    pub fn detect_conflict(
        &self,
        content_key: &str,
        local_state: &str,
        local_updated: DateTime<Utc>,
        remote_state: &str,
        remote_updated: DateTime<Utc>,
        last_sync: Option<DateTime<Utc>>,
        ctx: MapContext,
    ) -> Result<Option<StateConflict>> {
        let remote_as_local = self.remote_to_local(remote_state, ContentType::Story, ctx)?;
        if local_state == remote_as_local {
            return Ok(None);
        }

        let Some(last_sync) = last_sync else {
            return Ok(None);
        };
        if local_updated <= last_sync || remote_updated <= last_sync {
            return Ok(None);
        }

        let now = Utc::now();
        Ok(Some(StateConflict {
            conflict_id: format!("c-{content_key}-{}", compact_timestamp(now)),
            content_key: content_key.to_string(),
            conflict_type: "state_mismatch".to_string(),
            local_state: local_state.to_string(),
            local_updated,
            remote_state: remote_state.to_string(),
            remote_updated,
            detected_at: now,
            resolved: false,
        }))
    }
}

/// Deep-merge two YAML values: overlay mappings merge recursively,
/// any other overlay value replaces the base value.
#[must_use]
pub fn deep_merge(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(mut base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            serde_yaml::Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}
