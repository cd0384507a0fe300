//! Rollback: restore the most recent pre-sync snapshot over the
//! live state files.

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SyncError};
use crate::model::ContentIndex;
use crate::store::{StateFile, StateStore};

/// What a rollback would restore.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackPreview {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_time: Option<String>,
    pub files: Vec<FileRestoreInfo>,
}

/// Per-file restore details.
#[derive(Debug, Clone, Serialize)]
pub struct FileRestoreInfo {
    pub name: String,
    pub backup_size: u64,
    pub current_size: u64,
    /// Story-count delta (backup − current) for the content index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_diff: Option<i64>,
}

/// Result of an executed rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackSummary {
    pub success: bool,
    pub restored_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_used: Option<PathBuf>,
    pub timestamp: String,
}

fn snapshot_time(snapshot_dir: &Path) -> Option<String> {
    let stamp = snapshot_dir
        .file_name()?
        .to_str()?
        .strip_prefix("pre-sync-")?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn story_count(path: &Path) -> Option<usize> {
    let raw = std::fs::read_to_string(path).ok()?;
    let index: ContentIndex = serde_json::from_str(&raw).ok()?;
    Some(index.stories.len())
}

/// Describe what the latest snapshot would restore.
#[must_use]
pub fn preview_rollback(store: &StateStore) -> RollbackPreview {
    let Some(snapshot) = store.latest_snapshot() else {
        return RollbackPreview {
            available: false,
            backup_path: None,
            backup_time: None,
            files: Vec::new(),
        };
    };

    let mut files = Vec::new();
    for file in StateFile::snapshot_set() {
        let live = store.path(file);
        let name = live
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let backed = snapshot.join(&name);
        if !backed.exists() {
            continue;
        }
        let backup_size = std::fs::metadata(&backed).map(|m| m.len()).unwrap_or(0);
        let current_size = std::fs::metadata(&live).map(|m| m.len()).unwrap_or(0);
        let story_diff = if file == StateFile::ContentIndex {
            match (story_count(&backed), story_count(&live)) {
                (Some(backup), Some(current)) => Some(backup as i64 - current as i64),
                _ => None,
            }
        } else {
            None
        };
        files.push(FileRestoreInfo {
            name,
            backup_size,
            current_size,
            story_diff,
        });
    }

    RollbackPreview {
        available: true,
        backup_time: snapshot_time(&snapshot),
        backup_path: Some(snapshot),
        files,
    }
}

/// Restore the latest `pre-sync-*` snapshot and log the operation.
///
/// # Errors
///
/// `Config` when no snapshot exists; store/I-O errors otherwise.
pub fn rollback_last(store: &StateStore) -> Result<RollbackSummary> {
    let Some(snapshot) = store.latest_snapshot() else {
        return Err(SyncError::Config(
            "no pre-sync backups available to roll back to".to_string(),
        ));
    };

    let restored = store.restore_snapshot(&snapshot)?;
    // Restored files must stay byte-identical to the snapshot, so
    // the operation is logged rather than written into sync_state.
    info!(
        snapshot = %snapshot.display(),
        files = restored.len(),
        "rollback restored pre-sync snapshot"
    );

    Ok(RollbackSummary {
        success: true,
        restored_files: restored,
        backup_used: Some(snapshot),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join(".sync")).unwrap();
        (temp, store)
    }

    #[test]
    fn test_preview_without_backups() {
        let (_t, store) = store();
        let preview = preview_rollback(&store);
        assert!(!preview.available);
        assert!(preview.files.is_empty());
    }

    #[test]
    fn test_rollback_without_backups_errors() {
        let (_t, store) = store();
        assert!(rollback_last(&store).is_err());
    }

    #[test]
    fn test_rollback_restores_bytes() {
        let (_t, store) = store();
        store
            .record_operation("seed", true, serde_json::Value::Null)
            .unwrap();
        let before = std::fs::read(store.path(StateFile::SyncState)).unwrap();
        store.snapshot_state().unwrap();

        store
            .record_operation("drift", false, serde_json::Value::Null)
            .unwrap();

        let summary = rollback_last(&store).unwrap();
        assert!(summary.success);
        assert!(
            summary
                .restored_files
                .contains(&"sync_state.json".to_string())
        );
        let after = std::fs::read(store.path(StateFile::SyncState)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_preview_reports_story_diff() {
        let (_t, store) = store();
        let index: ContentIndex = serde_json::from_str(
            r#"{"stories": {"1-1-a": {"file": "a.md", "hash": "x"}}}"#,
        )
        .unwrap();
        store.write_doc(StateFile::ContentIndex, &index).unwrap();
        store.snapshot_state().unwrap();

        let empty = ContentIndex::default();
        store.write_doc(StateFile::ContentIndex, &empty).unwrap();

        let preview = preview_rollback(&store);
        assert!(preview.available);
        let info = preview
            .files
            .iter()
            .find(|f| f.name == "content_index.json")
            .unwrap();
        assert_eq!(info.story_diff, Some(1));
    }
}
