//! Error types and handling for `bmad-sync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Structured variants for the error kinds the pipeline produces,
//!   with `Other` for wrapped anyhow errors at the edges
//! - Recovery hints for user-facing errors
//! - Structured JSON output for automation consumers

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `bmad-sync` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Configuration ===
    /// Configuration file missing, unreadable, or schema-invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sync workspace not initialized (no `.sync/` directory).
    #[error("Sync not initialized: no .sync directory found")]
    NotInitialized,

    // === Scanning / parsing ===
    /// Content root directory does not exist.
    #[error("Content root does not exist: {path}")]
    MissingRoot { path: PathBuf },

    /// A content file could not be parsed.
    #[error("Parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    // === State store ===
    /// Advisory lock could not be acquired within the bounded wait.
    #[error("Could not lock state file {path} within {waited_ms}ms; another sync may be running")]
    Locked { path: PathBuf, waited_ms: u64 },

    /// State file exists but does not parse as JSON.
    #[error("Corrupted state file: {path} ({reason}); recovery: check backups in {backup_dir}")]
    Corrupted {
        path: PathBuf,
        reason: String,
        backup_dir: PathBuf,
    },

    /// Atomic write failed.
    #[error("Failed to write state file {path}: {reason}")]
    StateWrite { path: PathBuf, reason: String },

    // === Tracker CLI ===
    /// Transient tracker failure (rate limit, timeout, network),
    /// retried up to the configured bound before surfacing.
    #[error("Tracker transient failure: {message}")]
    TrackerTransient { message: String },

    /// Permanent tracker failure (bad arguments, auth, not found).
    #[error("Tracker error: {message}")]
    TrackerPermanent { message: String },

    /// Tracker binary missing or not runnable.
    #[error("Tracker CLI not available: {message}")]
    TrackerUnavailable { message: String },

    // === Mapping / validation ===
    /// Unknown state encountered under strict mapping mode.
    #[error("Unknown {direction} state under strict mode: '{state}'")]
    UnknownState { direction: String, state: String },

    /// A state transition outside the permitted graph.
    #[error("Invalid transition: {from} -> {to} ({reason})")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// A tracker payload failed validation.
    #[error("Invalid payload for {content_key}: {reasons:?}")]
    InvalidPayload {
        content_key: String,
        reasons: Vec<String>,
    },

    // === Conflicts / numbering ===
    /// No automatic strategy met the confidence threshold.
    #[error("Conflict {conflict_id} could not be auto-resolved; manual resolution required")]
    ConflictUnresolvable { conflict_id: String },

    /// Epic range overlap or exhausted story slots.
    #[error("Numbering error: {0}")]
    Numbering(String),

    // === Apply / portfolio ===
    /// One or more operations failed during apply; state was rolled
    /// back to the pre-sync snapshot.
    #[error("Apply failed ({failed} of {total} operations); state restored from snapshot")]
    ApplyFailed {
        failed: usize,
        total: usize,
        messages: Vec<String>,
    },

    /// Project run was cancelled before completion.
    #[error("Cancelled before completion")]
    Cancelled,

    // === I/O & serde passthrough ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::NotInitialized
                | Self::MissingRoot { .. }
                | Self::TrackerUnavailable { .. }
                | Self::InvalidTransition { .. }
                | Self::InvalidPayload { .. }
                | Self::ConflictUnresolvable { .. }
                | Self::Locked { .. }
        )
    }

    /// Whether a tracker call that produced this error may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TrackerTransient { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run from a project root containing .sync/, or create it"),
            Self::Locked { .. } => Some("Wait for the other sync process to finish and retry"),
            Self::Corrupted { .. } => Some("Restore the file from the backups directory"),
            Self::TrackerUnavailable { .. } => {
                Some("Install the tracker CLI and ensure it is on PATH")
            }
            Self::ConflictUnresolvable { .. } => {
                Some("Resolve the conflict manually, then re-run sync")
            }
            Self::MissingRoot { .. } => Some("Check project.docs_bmad in sync_config.yaml"),
            _ => None,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ApplyFailed { .. } => 2,
            _ => 1,
        }
    }

    /// Machine-readable error code for JSON output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::NotInitialized => "config",
            Self::MissingRoot { .. } | Self::Parse { .. } => "parse",
            Self::Locked { .. } | Self::Corrupted { .. } | Self::StateWrite { .. } => "state",
            Self::TrackerTransient { .. } => "tracker_transient",
            Self::TrackerPermanent { .. } | Self::TrackerUnavailable { .. } => "tracker",
            Self::UnknownState { .. } => "mapping",
            Self::InvalidTransition { .. } | Self::InvalidPayload { .. } => "validation",
            Self::ConflictUnresolvable { .. } => "conflict",
            Self::Numbering(_) => "numbering",
            Self::ApplyFailed { .. } => "apply",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Json(_) | Self::Yaml(_) => "serde",
            Self::Other(_) => "other",
        }
    }

    /// Structured JSON representation for stderr in `--json` mode.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(hint) = self.suggestion() {
            obj["suggestion"] = serde_json::Value::String(hint.to_string());
        }
        if let Self::ApplyFailed { messages, .. } = self {
            obj["details"] = serde_json::json!(messages);
        }
        obj
    }
}

/// Result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Numbering("epic 2 range overlaps epic 1".to_string());
        assert_eq!(
            err.to_string(),
            "Numbering error: epic 2 range overlaps epic 1"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            SyncError::TrackerTransient {
                message: "rate limit".into()
            }
            .is_transient()
        );
        assert!(
            !SyncError::TrackerPermanent {
                message: "bad team".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_suggestion() {
        assert_eq!(
            SyncError::NotInitialized.suggestion(),
            Some("Run from a project root containing .sync/, or create it")
        );
        assert!(SyncError::Config("x".into()).suggestion().is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::NotInitialized.exit_code(), 1);
        let apply = SyncError::ApplyFailed {
            failed: 1,
            total: 3,
            messages: vec![],
        };
        assert_eq!(apply.exit_code(), 2);
    }

    #[test]
    fn test_json_shape() {
        let err = SyncError::Locked {
            path: PathBuf::from("/tmp/x.json"),
            waited_ms: 5000,
        };
        let json = err.to_json();
        assert_eq!(json["error"], "state");
        assert!(json["suggestion"].as_str().is_some());
    }
}
