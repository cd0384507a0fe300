//! Parsers for BMAD content files.
//!
//! Story grammar:
//! - Header `# Story <epic>.<story>: <title>`
//! - `Status: <token>` line
//! - `## Acceptance Criteria` section with numbered or bulleted items
//! - optional `## Tasks / Subtasks` checklist
//!
//! Epic grammar:
//! - `# Epic <n>: <title>` (or `# Epic <n>` without a colon)

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::model::StoryStatus;

static STORY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s*Story\s+(\d+)\.(\d+):\s*(.+)$").expect("valid regex"));
static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Status:\s*([A-Za-z\-']+)\s*$").expect("valid regex"));
static AC_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^##\s*Acceptance Criteria\s*$").expect("valid regex"));
static TASKS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^##\s*Tasks\s*/\s*Subtasks\s*$").expect("valid regex"));
static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^##\s+").expect("valid regex"));
static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s+(.+)$").expect("valid regex"));
static BULLET_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-*]\s+(.+)$").expect("valid regex"));
static EPIC_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#\s*Epic\s+(\d+)[^:\n]*:\s*(.+)$").expect("valid regex"));
static EPIC_HEADER_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#\s*Epic\s+(\d+)\b\s*(.*)$").expect("valid regex"));

/// Parsed story metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStory {
    pub epic_number: u32,
    pub story_number: u32,
    pub title: String,
    pub status: StoryStatus,
    pub acceptance_criteria: Vec<String>,
    pub tasks: Vec<String>,
}

/// Parsed epic metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEpic {
    pub epic_number: u32,
    pub title: String,
}

/// Parse a story file's content.
///
/// # Errors
///
/// `Parse` when the header does not match `# Story N.M: Title`.
pub fn parse_story_content(content: &str, path: &Path) -> Result<ParsedStory> {
    let header = STORY_HEADER.captures(content).ok_or_else(|| SyncError::Parse {
        path: path.to_path_buf(),
        reason: "could not parse story header '# Story N.M: Title'".to_string(),
    })?;

    let epic_number: u32 = header[1].parse().map_err(|_| SyncError::Parse {
        path: path.to_path_buf(),
        reason: format!("epic number out of range: {}", &header[1]),
    })?;
    let story_number: u32 = header[2].parse().map_err(|_| SyncError::Parse {
        path: path.to_path_buf(),
        reason: format!("story number out of range: {}", &header[2]),
    })?;
    let title = header[3].trim().to_string();

    let status = STATUS_LINE
        .captures(content)
        .map_or(StoryStatus::Drafted, |c| {
            c[1].parse().unwrap_or(StoryStatus::Drafted)
        });

    Ok(ParsedStory {
        epic_number,
        story_number,
        title,
        status,
        acceptance_criteria: section_items(content, &AC_HEADER),
        tasks: section_items(content, &TASKS_HEADER),
    })
}

/// Parse a story file from disk.
///
/// # Errors
///
/// `Parse` for a missing file or unparseable header.
pub fn parse_story_file(path: &Path) -> Result<ParsedStory> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::Parse {
        path: path.to_path_buf(),
        reason: format!("cannot read story file: {e}"),
    })?;
    parse_story_content(&content, path)
}

/// Collect list items from the section following `header` up to the
/// next `##` heading.
fn section_items(content: &str, header: &Regex) -> Vec<String> {
    let Some(m) = header.find(content) else {
        return Vec::new();
    };
    let rest = &content[m.end()..];
    let body = SECTION_HEADER
        .find(rest)
        .map_or(rest, |next| &rest[..next.start()]);

    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            NUMBERED_ITEM
                .captures(line)
                .or_else(|| BULLET_ITEM.captures(line))
                .map(|c| c[1].trim().to_string())
        })
        .collect()
}

/// Extract epic number and title from epic file content.
///
/// Matches `# Epic 2: Title` and `# Epic 2 Technical Context: Title`;
/// falls back to a bare `# Epic 2` header, in which case `fallback`
/// (usually the file stem) titles the epic.
#[must_use]
pub fn parse_epic_content(content: &str, fallback: &str) -> Option<ParsedEpic> {
    if let Some(caps) = EPIC_HEADER.captures(content) {
        let epic_number: u32 = caps[1].parse().ok()?;
        return Some(ParsedEpic {
            epic_number,
            title: caps[2].trim().to_string(),
        });
    }
    if let Some(caps) = EPIC_HEADER_BARE.captures(content) {
        let epic_number: u32 = caps[1].parse().ok()?;
        let tail = caps[2].trim();
        return Some(ParsedEpic {
            epic_number,
            title: if tail.is_empty() {
                fallback.to_string()
            } else {
                tail.to_string()
            },
        });
    }
    None
}

/// Raw sprint-status document.
#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SprintStatusDoc {
    #[serde(default)]
    development_status: BTreeMap<String, String>,
}

/// Parse the `development_status:` mapping of a sprint-status file.
/// A missing file yields an empty map; an unreadable one is an error.
///
/// # Errors
///
/// `Parse` when the YAML does not deserialize.
pub fn parse_sprint_status(path: &Path) -> Result<BTreeMap<String, StoryStatus>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let doc: SprintStatusDoc = serde_yaml::from_str(&raw).map_err(|e| SyncError::Parse {
        path: path.to_path_buf(),
        reason: format!("invalid sprint-status YAML: {e}"),
    })?;
    Ok(doc
        .development_status
        .into_iter()
        .map(|(k, v)| (k, v.parse().unwrap_or_default()))
        .collect())
}
