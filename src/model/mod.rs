//! Core data types for `bmad-sync`.
//!
//! This module defines the fundamental types used throughout the
//! pipeline:
//! - `StoryStatus` - local workflow states
//! - `ContentType` / `OpAction` / `ChangeReason` - operation vocabulary
//! - `SyncOperation` - a planned create/update against the tracker
//! - `ContentIndex` and its entries - the persisted discovery index
//! - `StateChange` / `StateConflict` / `ResolutionRecord` - history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Local workflow status of a story (the `Status:` line and
/// sprint-status values).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    #[default]
    Backlog,
    Drafted,
    ReadyForDev,
    InProgress,
    Review,
    Done,
    WontDo,
    #[serde(untagged)]
    Custom(String),
}

impl StoryStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Backlog => "backlog",
            Self::Drafted => "drafted",
            Self::ReadyForDev => "ready-for-dev",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::WontDo => "wont-do",
            Self::Custom(value) => value,
        }
    }

    /// Done or explicitly abandoned; both close out an epic slot.
    #[must_use]
    pub fn is_done_like(&self) -> bool {
        match self {
            Self::Done | Self::WontDo => true,
            Self::Custom(value) => {
                matches!(value.as_str(), "wontdo" | "won't-do")
            }
            _ => false,
        }
    }

    /// The story has moved past backlog.
    #[must_use]
    pub const fn is_progressed(&self) -> bool {
        matches!(
            self,
            Self::Drafted | Self::ReadyForDev | Self::InProgress | Self::Review | Self::Done
        )
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "backlog" => Self::Backlog,
            "drafted" => Self::Drafted,
            "ready-for-dev" => Self::ReadyForDev,
            "in-progress" | "in_progress" => Self::InProgress,
            "review" => Self::Review,
            "done" => Self::Done,
            "wont-do" | "wontdo" | "won't-do" => Self::WontDo,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Kind of local artefact behind a content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Epic,
    Story,
    SprintStatus,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::SprintStatus => "sprint-status",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Planned action against the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpAction {
    Create,
    Update,
}

impl fmt::Display for OpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Why the operation was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    Added,
    Modified,
}

/// One planned unit of change for a single content key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub action: OpAction,
    pub content_key: String,
    pub content_type: ContentType,
    pub reason: ChangeReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    /// Tracker issue id when already registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// Remote state mapped from the local status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapped_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Label intents ("Contexted" / "No Context").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// One epic in the content index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicEntry {
    pub file: String,
    pub hash: String,
    pub title: String,
    pub epic_number: u32,
}

/// One story in the content index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryEntry {
    pub file: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StoryStatus>,
    /// mtime of the story file, used for conflict-window checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Diff of story keys between two index generations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl IndexChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Normalised index of all discovered content, persisted as
/// `content_index.json` and used as the diff baseline for the next
/// run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentIndex {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub epics: BTreeMap<String, EpicEntry>,
    #[serde(default)]
    pub stories: BTreeMap<String, StoryEntry>,
    #[serde(default)]
    pub changes: IndexChanges,
}

/// Which side produced a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Local,
    Remote,
    ConflictResolution,
}

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub content_key: String,
    pub from_state: String,
    pub to_state: String,
    pub timestamp: DateTime<Utc>,
    pub source: ChangeSource,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub content_type: ContentType,
}

/// A detected divergence between local and remote state for one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConflict {
    pub conflict_id: String,
    pub content_key: String,
    /// `state_mismatch` for the detector in this crate; open for
    /// future detectors.
    pub conflict_type: String,
    pub local_state: String,
    pub local_updated: DateTime<Utc>,
    pub remote_state: String,
    pub remote_updated: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

/// Strategy used to settle a conflict.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    KeepLocal,
    KeepRemote,
    RecentWins,
    ManualFieldLevel,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep-local",
            Self::KeepRemote => "keep-remote",
            Self::RecentWins => "recent-wins",
            Self::ManualFieldLevel => "manual-field-level",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep-local" | "keep_local" => Ok(Self::KeepLocal),
            "keep-remote" | "keep_remote" => Ok(Self::KeepRemote),
            "recent-wins" | "recent_wins" => Ok(Self::RecentWins),
            "manual-field-level" | "manual" => Ok(Self::ManualFieldLevel),
            other => Err(crate::error::SyncError::Config(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// States on both sides before a resolution was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeforeStates {
    pub local: String,
    pub remote: String,
}

/// One applied resolution, appended to `resolution_history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub resolution_id: String,
    pub conflict_id: String,
    pub content_key: String,
    pub strategy: ResolutionStrategy,
    pub before_states: BeforeStates,
    pub after_state: String,
    pub resolved_at: DateTime<Utc>,
    pub resolved_by: String,
    pub auto: bool,
    pub confidence: f64,
}
