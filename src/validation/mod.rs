//! Offline structural validation for BMAD content and tracker
//! payloads.
//!
//! Content checks are regex-level: they confirm required sections
//! exist without fully parsing, so `validate` can run against broken
//! trees. Payload checks guard tracker calls (title/team non-empty,
//! state in the mapped set).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::scan::ContentScanner;

static STORY_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+-\d+-[a-z0-9-]+\.md$").expect("valid regex"));
static SPRINT_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*\d+-\d+-[a-z0-9-]+:\s*(backlog|drafted|ready-for-dev|in-progress|review|done|wont-do)\b")
        .expect("valid regex")
});

const STORY_SECTIONS: &[(&str, &str)] = &[
    (r"(?im)^#\s+Story\s+\d+\.\d+:", "story header"),
    (
        r"(?im)^Status:\s*(backlog|drafted|ready-for-dev|in-progress|review|done|wont-do)\b",
        "status line",
    ),
    (r"(?im)^##\s+Acceptance Criteria", "acceptance criteria section"),
];

const EPIC_SECTIONS: &[(&str, &str)] = &[(r"(?im)^#\s*Epic\s+\d+\b", "epic header")];

/// Validation findings per artefact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub sprint_status: Vec<String>,
    pub epics: BTreeMap<String, Vec<String>>,
    pub stories: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    /// Total number of findings.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.sprint_status.len()
            + self.epics.values().map(Vec::len).sum::<usize>()
            + self.stories.values().map(Vec::len).sum::<usize>()
    }
}

fn check_sections(text: &str, sections: &[(&str, &str)]) -> Vec<String> {
    sections
        .iter()
        .filter_map(|(pattern, label)| {
            let re = Regex::new(pattern).expect("valid regex");
            if re.is_match(text) {
                None
            } else {
                Some(format!("missing {label}"))
            }
        })
        .collect()
}

/// Validate the sprint-status file structure.
#[must_use]
pub fn validate_sprint_status(path: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return vec![format!("missing file: {}", path.display())];
    };
    let mut errors = Vec::new();
    if !text.contains("development_status:") {
        errors.push("missing 'development_status:' section".to_string());
    }
    if !SPRINT_ENTRY.is_match(&text) {
        errors.push("no story status entries found".to_string());
    }
    errors
}

/// Validate one story markdown file.
#[must_use]
pub fn validate_story_file(path: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return vec![format!("missing file: {}", path.display())];
    };
    check_sections(&text, STORY_SECTIONS)
}

/// Validate one epic markdown file.
#[must_use]
pub fn validate_epic_file(path: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return vec![format!("missing file: {}", path.display())];
    };
    check_sections(&text, EPIC_SECTIONS)
}

/// Validate every artefact under a content root.
#[must_use]
pub fn validate_all(docs_bmad: &Path) -> ValidationReport {
    let mut report = ValidationReport {
        ok: true,
        ..ValidationReport::default()
    };

    report.sprint_status = validate_sprint_status(&docs_bmad.join("sprint-status.yaml"));

    let scanner = ContentScanner::new(docs_bmad);
    if let Ok(epics) = scanner.find_epic_files() {
        for path in epics {
            if path.file_name().is_some_and(|n| n == "epics.md") {
                continue;
            }
            let errors = validate_epic_file(&path);
            if !errors.is_empty() {
                report.epics.insert(path.to_string_lossy().to_string(), errors);
            }
        }
    }
    if let Ok(stories) = scanner.find_story_files() {
        for path in stories {
            let name_ok = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| STORY_FILENAME.is_match(n));
            if !name_ok {
                continue;
            }
            let errors = validate_story_file(&path);
            if !errors.is_empty() {
                report.stories.insert(path.to_string_lossy().to_string(), errors);
            }
        }
    }

    report.ok = report.error_count() == 0;
    report
}

/// Validate an issue-create payload against the mapped state set.
#[must_use]
pub fn validate_create_payload(
    title: &str,
    team: &str,
    state: Option<&str>,
    allowed_states: &[String],
) -> Vec<String> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push("missing or empty: title".to_string());
    }
    if team.trim().is_empty() {
        errors.push("missing or empty: team".to_string());
    }
    if let Some(state) = state {
        if !allowed_states.iter().any(|s| s == state) {
            errors.push(format!("invalid state: {state}"));
        }
    }
    errors
}

/// Validate an issue-update payload against the mapped state set.
#[must_use]
pub fn validate_update_payload(state: Option<&str>, allowed_states: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(state) = state {
        if !allowed_states.iter().any(|s| s == state) {
            errors.push(format!("invalid state: {state}"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_valid_story_passes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("1-1-setup.md");
        fs::write(
            &path,
            "# Story 1.1: Setup\nStatus: drafted\n\n## Acceptance Criteria\n1. x\n",
        )
        .unwrap();
        assert!(validate_story_file(&path).is_empty());
    }

    #[test]
    fn test_story_missing_sections_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("1-1-setup.md");
        fs::write(&path, "# Story 1.1: Setup\n").unwrap();
        let errors = validate_story_file(&path);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("status line")));
        assert!(errors.iter().any(|e| e.contains("acceptance criteria")));
    }

    #[test]
    fn test_sprint_status_checks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sprint-status.yaml");
        fs::write(&path, "development_status:\n  1-1-setup: done\n").unwrap();
        assert!(validate_sprint_status(&path).is_empty());

        fs::write(&path, "something_else: true\n").unwrap();
        let errors = validate_sprint_status(&path);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validate_all_aggregates() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("stories")).unwrap();
        fs::write(
            root.join("sprint-status.yaml"),
            "development_status:\n  1-1-setup: drafted\n",
        )
        .unwrap();
        fs::write(root.join("epic-1.md"), "# Epic 1: Good\n").unwrap();
        fs::write(root.join("stories").join("1-1-setup.md"), "broken\n").unwrap();

        let report = validate_all(root);
        assert!(!report.ok);
        assert!(report.sprint_status.is_empty());
        assert!(report.epics.is_empty());
        assert_eq!(report.stories.len(), 1);
    }

    #[test]
    fn test_create_payload_rules() {
        let allowed = vec!["Todo".to_string(), "Done".to_string()];
        assert!(validate_create_payload("T", "RAE", None, &allowed).is_empty());
        assert_eq!(validate_create_payload(" ", "", None, &allowed).len(), 2);
        assert_eq!(
            validate_create_payload("T", "RAE", Some("Bogus"), &allowed),
            vec!["invalid state: Bogus"]
        );
    }

    #[test]
    fn test_update_payload_rules() {
        let allowed = vec!["Todo".to_string()];
        assert!(validate_update_payload(None, &allowed).is_empty());
        assert!(validate_update_payload(Some("Todo"), &allowed).is_empty());
        assert!(!validate_update_payload(Some("Done"), &allowed).is_empty());
    }
}
