//! Custom conflict-resolution rules, YAML-defined.
//!
//! Rules are evaluated in priority order (highest first); the first
//! enabled rule whose conditions all hold wins. Condition values are
//! either a scalar (equality) or an operator mapping with
//! `equals`, `less_than`, `greater_than`, `contains`, or `regex`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::ResolutionStrategy;

/// Default rules document written when none exists.
pub const DEFAULT_RULES_YAML: &str = r#"rules:
  - id: done-state-priority
    name: Done State Priority
    priority: 90
    description: Remote "Done" wins over a local review
    conditions:
      remote_state: Done
      local_state: review
    action: keep-remote
    confidence: 0.95
    enabled: true

  - id: whitespace-local-wins
    name: Whitespace Differences
    priority: 85
    description: If only whitespace differs, local is the source of truth
    conditions:
      diff_type: whitespace_only
    action: keep-local
    confidence: 0.95
    enabled: true

  - id: epic-key-pattern
    name: Epic Key Pattern
    priority: 80
    description: Epics are managed locally
    conditions:
      content_key:
        regex: '^epic-\d+$'
    action: keep-local
    confidence: 0.90
    enabled: true

  - id: recent-local-wins
    name: Recent Local Changes
    priority: 70
    description: A local change in the last hour is intentional
    conditions:
      local_age_hours:
        less_than: 1
    action: keep-local
    confidence: 0.80
    enabled: true
"#;

/// Facts a rule can condition on.
#[derive(Debug, Clone, Default)]
pub struct ConflictFacts {
    pub content_key: String,
    pub local_state: String,
    pub remote_state: String,
    /// Hours since the local side last changed.
    pub local_age_hours: Option<f64>,
    /// `whitespace_only` / `case_only` when the states are
    /// equivalent up to formatting.
    pub diff_type: Option<String>,
}

/// One custom rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, serde_yaml::Value>,
    pub action: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_priority() -> i32 {
    50
}

const fn default_confidence() -> f64 {
    0.8
}

const fn default_enabled() -> bool {
    true
}

impl ResolutionRule {
    /// The rule's action parsed into a strategy, if recognisable.
    #[must_use]
    pub fn strategy(&self) -> Option<ResolutionStrategy> {
        self.action.parse().ok()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesDoc {
    #[serde(default)]
    rules: Vec<ResolutionRule>,
}

/// Loaded, priority-sorted rule set.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<ResolutionRule>,
    rules_file: PathBuf,
}

impl RulesEngine {
    /// Load rules from `rules_file`, scaffolding the default file
    /// when it does not exist. Unreadable rules degrade to an empty
    /// set with a warning.
    ///
    /// # Errors
    ///
    /// I/O errors from scaffolding the default file.
    pub fn load(rules_file: &Path) -> Result<Self> {
        if !rules_file.exists() {
            if let Some(parent) = rules_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(rules_file, DEFAULT_RULES_YAML)?;
        }

        let mut rules = match std::fs::read_to_string(rules_file) {
            Ok(raw) => match serde_yaml::from_str::<RulesDoc>(&raw) {
                Ok(doc) => doc.rules,
                Err(e) => {
                    warn!(path = %rules_file.display(), error = %e, "invalid rules file, ignoring");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(path = %rules_file.display(), error = %e, "unreadable rules file, ignoring");
                Vec::new()
            }
        };
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        debug!(count = rules.len(), "loaded custom resolution rules");

        Ok(Self {
            rules,
            rules_file: rules_file.to_path_buf(),
        })
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[ResolutionRule] {
        &self.rules
    }

    /// First enabled rule whose conditions all match.
    #[must_use]
    pub fn find_matching(&self, facts: &ConflictFacts) -> Option<&ResolutionRule> {
        self.rules
            .iter()
            .find(|rule| rule.enabled && Self::evaluate(rule, facts))
    }

    /// Evaluate one rule against the facts.
    #[must_use]
    pub fn evaluate(rule: &ResolutionRule, facts: &ConflictFacts) -> bool {
        rule.conditions
            .iter()
            .all(|(field, expected)| match_condition(field, expected, facts))
    }

    /// Count matches of a rule over a set of sample facts
    /// (rule testing support).
    #[must_use]
    pub fn test_rule(rule: &ResolutionRule, samples: &[ConflictFacts]) -> (usize, usize) {
        let matches = samples.iter().filter(|f| Self::evaluate(rule, f)).count();
        (matches, samples.len() - matches)
    }

    /// Persist the current rule set back to disk.
    ///
    /// # Errors
    ///
    /// Serialisation or write errors.
    pub fn save(&self) -> Result<()> {
        let doc = RulesDoc {
            rules: self.rules.clone(),
        };
        std::fs::write(&self.rules_file, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }

    /// Flip a rule's enabled flag; returns whether the id was found.
    pub fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        for rule in &mut self.rules {
            if rule.id == rule_id {
                rule.enabled = enabled;
                return true;
            }
        }
        false
    }
}

fn fact_value(field: &str, facts: &ConflictFacts) -> Option<serde_yaml::Value> {
    match field {
        "content_key" => Some(serde_yaml::Value::String(facts.content_key.clone())),
        "local_state" => Some(serde_yaml::Value::String(facts.local_state.clone())),
        "remote_state" => Some(serde_yaml::Value::String(facts.remote_state.clone())),
        "local_age_hours" => facts
            .local_age_hours
            .map(|v| serde_yaml::Value::Number(serde_yaml::Number::from(v))),
        "diff_type" => facts
            .diff_type
            .clone()
            .map(serde_yaml::Value::String),
        _ => None,
    }
}

fn match_condition(field: &str, expected: &serde_yaml::Value, facts: &ConflictFacts) -> bool {
    let actual = fact_value(field, facts);

    if let serde_yaml::Value::Mapping(ops) = expected {
        for (op, operand) in ops {
            let Some(op) = op.as_str() else {
                return false;
            };
            let holds = match op {
                "equals" => actual.as_ref() == Some(operand),
                "less_than" => match (as_f64(actual.as_ref()), as_f64(Some(operand))) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
                "greater_than" => match (as_f64(actual.as_ref()), as_f64(Some(operand))) {
                    (Some(a), Some(b)) => a > b,
                    _ => false,
                },
                "contains" => match (&actual, operand.as_str()) {
                    (Some(serde_yaml::Value::String(s)), Some(needle)) => s.contains(needle),
                    _ => false,
                },
                "regex" => match (&actual, operand.as_str()) {
                    (Some(serde_yaml::Value::String(s)), Some(pattern)) => {
                        Regex::new(pattern).is_ok_and(|re| re.is_match(s))
                    }
                    _ => false,
                },
                _ => false,
            };
            if !holds {
                return false;
            }
        }
        return true;
    }

    actual.as_ref() == Some(expected)
}

fn as_f64(value: Option<&serde_yaml::Value>) -> Option<f64> {
    value.and_then(serde_yaml::Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (TempDir, RulesEngine) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom_rules.yaml");
        let engine = RulesEngine::load(&path).unwrap();
        (temp, engine)
    }

    #[test]
    fn test_default_rules_scaffolded_and_sorted() {
        let (_t, engine) = engine();
        assert!(!engine.rules().is_empty());
        let priorities: Vec<i32> = engine.rules().iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by_key(|p| std::cmp::Reverse(*p));
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_done_vs_review_matches() {
        let (_t, engine) = engine();
        let facts = ConflictFacts {
            content_key: "1-2-flow".to_string(),
            local_state: "review".to_string(),
            remote_state: "Done".to_string(),
            local_age_hours: Some(5.0),
            diff_type: None,
        };
        let rule = engine.find_matching(&facts).unwrap();
        assert_eq!(rule.id, "done-state-priority");
        assert_eq!(rule.strategy(), Some(ResolutionStrategy::KeepRemote));
    }

    #[test]
    fn test_priority_order_decides() {
        let (_t, engine) = engine();
        // Matches both the epic pattern (80) and recent-local (70);
        // the higher priority rule must win.
        let facts = ConflictFacts {
            content_key: "epic-3".to_string(),
            local_state: "in-progress".to_string(),
            remote_state: "Backlog".to_string(),
            local_age_hours: Some(0.2),
            diff_type: None,
        };
        assert_eq!(engine.find_matching(&facts).unwrap().id, "epic-key-pattern");
    }

    #[test]
    fn test_numeric_operator() {
        let (_t, engine) = engine();
        let mut facts = ConflictFacts {
            content_key: "1-2-flow".to_string(),
            local_state: "drafted".to_string(),
            remote_state: "Backlog".to_string(),
            local_age_hours: Some(0.5),
            diff_type: None,
        };
        assert_eq!(engine.find_matching(&facts).unwrap().id, "recent-local-wins");

        facts.local_age_hours = Some(3.0);
        assert!(engine.find_matching(&facts).is_none());
    }

    #[test]
    fn test_disabled_rule_skipped() {
        let (_t, mut engine) = engine();
        assert!(engine.set_enabled("done-state-priority", false));
        let facts = ConflictFacts {
            content_key: "1-2-flow".to_string(),
            local_state: "review".to_string(),
            remote_state: "Done".to_string(),
            local_age_hours: Some(5.0),
            diff_type: None,
        };
        assert!(engine.find_matching(&facts).is_none());
    }

    #[test]
    fn test_contains_and_regex_operators() {
        let rule = ResolutionRule {
            id: "x".to_string(),
            name: "x".to_string(),
            priority: 50,
            description: String::new(),
            conditions: [
                (
                    "content_key".to_string(),
                    serde_yaml::from_str("{ contains: 'auth' }").unwrap(),
                ),
                (
                    "local_state".to_string(),
                    serde_yaml::from_str("{ regex: '^in-' }").unwrap(),
                ),
            ]
            .into_iter()
            .collect(),
            action: "keep-local".to_string(),
            confidence: 0.8,
            enabled: true,
        };

        let hit = ConflictFacts {
            content_key: "2-1-auth-flow".to_string(),
            local_state: "in-progress".to_string(),
            ..ConflictFacts::default()
        };
        assert!(RulesEngine::evaluate(&rule, &hit));

        let miss = ConflictFacts {
            content_key: "2-1-other".to_string(),
            local_state: "in-progress".to_string(),
            ..ConflictFacts::default()
        };
        assert!(!RulesEngine::evaluate(&rule, &miss));
    }

    #[test]
    fn test_rule_testing_counts() {
        let (_t, engine) = engine();
        let rule = engine.rules().iter().find(|r| r.id == "epic-key-pattern").unwrap();
        let samples = vec![
            ConflictFacts {
                content_key: "epic-1".to_string(),
                ..ConflictFacts::default()
            },
            ConflictFacts {
                content_key: "1-1-x".to_string(),
                ..ConflictFacts::default()
            },
        ];
        assert_eq!(RulesEngine::test_rule(rule, &samples), (1, 1));
    }
}
