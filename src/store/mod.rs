//! Durable, crash-safe persistence for sync state.
//!
//! Every document is a separate JSON file under `.sync/state/` (with
//! conflicts and metrics in sibling directories). Writes go through
//! write-to-temp → fsync → rename; readers and writers of a file
//! serialise on an advisory lock held on a `.lock` companion with a
//! bounded 5 s wait. Before each write the current file is copied
//! into the backup directory under a timestamped name; backups older
//! than 30 days are pruned.
//!
//! # Layout
//!
//! ```text
//! .sync/
//!   state/content_index.json      state/sync_state.json
//!   state/number_registry.json    state/state_history.json
//!   state/resolution_history.json state/hierarchy.json
//!   state/sync_report.json
//!   conflicts/pending.json
//!   metrics/resolution_effectiveness.json
//!   backups/<stem>_<ts>.json      backups/pre-sync-<ts>/
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::model::{ResolutionRecord, StateChange, StateConflict};
use crate::util::time::backup_timestamp;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(100);
const BACKUP_RETENTION_DAYS: i64 = 30;
const MAX_OPERATIONS: usize = 100;
const MAX_ERRORS: usize = 50;

/// The state documents the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFile {
    ContentIndex,
    SyncState,
    NumberRegistry,
    StateHistory,
    ResolutionHistory,
    Hierarchy,
    Conflicts,
    Metrics,
    SyncReport,
}

impl StateFile {
    /// Path relative to the sync root.
    #[must_use]
    pub const fn rel_path(self) -> &'static str {
        match self {
            Self::ContentIndex => "state/content_index.json",
            Self::SyncState => "state/sync_state.json",
            Self::NumberRegistry => "state/number_registry.json",
            Self::StateHistory => "state/state_history.json",
            Self::ResolutionHistory => "state/resolution_history.json",
            Self::Hierarchy => "state/hierarchy.json",
            Self::Conflicts => "conflicts/pending.json",
            Self::Metrics => "metrics/resolution_effectiveness.json",
            Self::SyncReport => "state/sync_report.json",
        }
    }

    /// Files captured by a pre-apply snapshot.
    #[must_use]
    pub const fn snapshot_set() -> [Self; 6] {
        [
            Self::ContentIndex,
            Self::SyncState,
            Self::NumberRegistry,
            Self::StateHistory,
            Self::ResolutionHistory,
            Self::Hierarchy,
        ]
    }
}

/// One entry in the bounded operations/errors queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub result: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// `sync_state.json`: last-sync stamp and bounded history queues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operations: Vec<OperationRecord>,
    #[serde(default)]
    pub errors: Vec<OperationRecord>,
}

/// `state_history.json`: per-key transition log.
pub type StateHistoryDoc = BTreeMap<String, Vec<StateChange>>;

/// RAII advisory lock on a state file's `.lock` companion.
struct FileLockGuard {
    file: File,
    lock_path: PathBuf,
}

impl FileLockGuard {
    fn acquire(target: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&lock_path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self { file, lock_path });
                }
                Err(_) if started.elapsed() < timeout => {
                    std::thread::sleep(LOCK_POLL);
                }
                Err(_) => {
                    return Err(SyncError::Locked {
                        path: target.to_path_buf(),
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".lock");
    target.with_file_name(name)
}

/// Lock-protected JSON document store under a project's `.sync/`
/// directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    sync_root: PathBuf,
    backup_dir: PathBuf,
}

impl StateStore {
    /// Open (and lay out) the store under `sync_root` (`.sync/`).
    ///
    /// # Errors
    ///
    /// I/O errors from directory creation.
    pub fn open(sync_root: impl Into<PathBuf>) -> Result<Self> {
        let sync_root = sync_root.into();
        let state_dir = sync_root.join("state");
        let backup_dir = sync_root.join("backups");
        fs::create_dir_all(&state_dir)?;
        fs::create_dir_all(&backup_dir)?;
        fs::create_dir_all(sync_root.join("conflicts"))?;
        fs::create_dir_all(sync_root.join("metrics"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&state_dir, fs::Permissions::from_mode(0o700));
        }

        Ok(Self {
            sync_root,
            backup_dir,
        })
    }

    /// Open the store for the project rooted at `project_root`.
    ///
    /// # Errors
    ///
    /// See [`StateStore::open`].
    pub fn open_project(project_root: &Path) -> Result<Self> {
        Self::open(project_root.join(".sync"))
    }

    /// Absolute path for a state document.
    #[must_use]
    pub fn path(&self, file: StateFile) -> PathBuf {
        self.sync_root.join(file.rel_path())
    }

    /// Backup directory path.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    // ---- generic primitives ----

    /// Read a document under its lock, substituting `T::default()`
    /// when the file does not exist yet.
    ///
    /// # Errors
    ///
    /// `Locked` on lock timeout, `Corrupted` on parse failure.
    pub fn read_doc<T>(&self, file: StateFile) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(file);
        let _guard = FileLockGuard::acquire(&path, LOCK_TIMEOUT)?;
        self.read_doc_unlocked(&path)
    }

    fn read_doc_unlocked<T>(&self, path: &Path) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| SyncError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
            backup_dir: self.backup_dir.clone(),
        })
    }

    /// Read-modify-write a document atomically under its lock, with a
    /// timestamped backup of the previous content.
    ///
    /// # Errors
    ///
    /// `Locked` on lock timeout, `Corrupted` on parse failure,
    /// `StateWrite` on write failure, plus whatever `f` returns.
    pub fn mutate_doc<T, R>(
        &self,
        file: StateFile,
        f: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let path = self.path(file);
        let _guard = FileLockGuard::acquire(&path, LOCK_TIMEOUT)?;

        self.backup_file(&path)?;
        let mut doc: T = self.read_doc_unlocked(&path)?;
        let result = f(&mut doc)?;
        self.write_atomic(&path, &doc)?;
        Ok(result)
    }

    /// Replace a document wholesale (atomic, locked, backed up).
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn write_doc<T>(&self, file: StateFile, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let path = self.path(file);
        let _guard = FileLockGuard::acquire(&path, LOCK_TIMEOUT)?;
        self.backup_file(&path)?;
        self.write_atomic(&path, value)
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let parent = path.parent().ok_or_else(|| SyncError::StateWrite {
            path: path.to_path_buf(),
            reason: "no parent directory".to_string(),
        })?;
        fs::create_dir_all(parent)?;

        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            let body = serde_json::to_string_pretty(value)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            file.write_all(body.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SyncError::StateWrite {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })
    }

    fn backup_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string());
        let name = format!("{stem}_{}.json", backup_timestamp(Utc::now()));
        fs::copy(path, self.backup_dir.join(name))?;
        self.prune_backups();
        Ok(())
    }

    fn prune_backups(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(BACKUP_RETENTION_DAYS);
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let too_old = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .is_ok_and(|mtime| mtime < cutoff);
            if too_old {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune backup");
                }
            }
        }
    }

    // ---- content index ----

    /// Update a single story entry in the content index without
    /// rewriting the rest of the document's content (the write is
    /// still atomic at file level).
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn update_content_index_entry(
        &self,
        story_key: &str,
        entry: crate::model::StoryEntry,
    ) -> Result<()> {
        self.mutate_doc(
            StateFile::ContentIndex,
            |index: &mut crate::model::ContentIndex| {
                index.stories.insert(story_key.to_string(), entry);
                Ok(())
            },
        )
    }

    // ---- sync state ----

    /// Current sync state.
    ///
    /// # Errors
    ///
    /// See [`StateStore::read_doc`].
    pub fn sync_state(&self) -> Result<SyncState> {
        self.read_doc(StateFile::SyncState)
    }

    /// Record an operation outcome, stamp `last_sync`, and evict the
    /// oldest entries beyond the queue bounds (operations ≤100,
    /// errors ≤50).
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn record_operation(
        &self,
        operation: &str,
        success: bool,
        details: serde_json::Value,
    ) -> Result<()> {
        self.mutate_doc(StateFile::SyncState, |state: &mut SyncState| {
            let record = OperationRecord {
                timestamp: Utc::now(),
                operation: operation.to_string(),
                result: if success { "success" } else { "failure" }.to_string(),
                details,
            };
            state.last_sync = Some(record.timestamp);
            state.operations.push(record.clone());
            if state.operations.len() > MAX_OPERATIONS {
                let excess = state.operations.len() - MAX_OPERATIONS;
                state.operations.drain(..excess);
            }
            if !success {
                state.errors.push(record);
                if state.errors.len() > MAX_ERRORS {
                    let excess = state.errors.len() - MAX_ERRORS;
                    state.errors.drain(..excess);
                }
            }
            Ok(())
        })
    }

    // ---- state history ----

    /// Append a state change and prune entries older than
    /// `retention_days`.
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn log_state_change(&self, change: StateChange, retention_days: i64) -> Result<()> {
        self.mutate_doc(StateFile::StateHistory, |history: &mut StateHistoryDoc| {
            history
                .entry(change.content_key.clone())
                .or_default()
                .push(change);

            let cutoff = Utc::now() - ChronoDuration::days(retention_days);
            history.retain(|_, changes| {
                changes.retain(|c| c.timestamp >= cutoff);
                !changes.is_empty()
            });
            Ok(())
        })
    }

    /// Transition history for one content key, oldest first.
    ///
    /// # Errors
    ///
    /// See [`StateStore::read_doc`].
    pub fn state_history(&self, content_key: &str) -> Result<Vec<StateChange>> {
        let doc: StateHistoryDoc = self.read_doc(StateFile::StateHistory)?;
        Ok(doc.get(content_key).cloned().unwrap_or_default())
    }

    // ---- conflict queue / resolution history ----

    /// Append a detected conflict to the pending queue.
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn append_conflict(&self, conflict: StateConflict) -> Result<()> {
        self.mutate_doc(StateFile::Conflicts, |queue: &mut Vec<StateConflict>| {
            queue.push(conflict);
            Ok(())
        })
    }

    /// All unresolved conflicts, oldest first.
    ///
    /// # Errors
    ///
    /// See [`StateStore::read_doc`].
    pub fn pending_conflicts(&self) -> Result<Vec<StateConflict>> {
        self.read_doc(StateFile::Conflicts)
    }

    /// Remove a conflict from the queue; returns whether it existed.
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn remove_conflict(&self, conflict_id: &str) -> Result<bool> {
        self.mutate_doc(StateFile::Conflicts, |queue: &mut Vec<StateConflict>| {
            let before = queue.len();
            queue.retain(|c| c.conflict_id != conflict_id);
            Ok(queue.len() != before)
        })
    }

    /// Append a resolution record.
    ///
    /// # Errors
    ///
    /// See [`StateStore::mutate_doc`].
    pub fn append_resolution(&self, record: ResolutionRecord) -> Result<()> {
        self.mutate_doc(
            StateFile::ResolutionHistory,
            |history: &mut Vec<ResolutionRecord>| {
                history.push(record);
                Ok(())
            },
        )
    }

    /// Full resolution history, oldest first.
    ///
    /// # Errors
    ///
    /// See [`StateStore::read_doc`].
    pub fn resolution_history(&self) -> Result<Vec<ResolutionRecord>> {
        self.read_doc(StateFile::ResolutionHistory)
    }

    // ---- snapshots ----

    /// Copy the snapshot file set into `backups/pre-sync-<ts>/`.
    ///
    /// # Errors
    ///
    /// I/O errors from directory creation or copies.
    pub fn snapshot_state(&self) -> Result<PathBuf> {
        let stamp = crate::util::time::compact_timestamp(Utc::now());
        let snapshot_dir = self.backup_dir.join(format!("pre-sync-{stamp}"));
        fs::create_dir_all(&snapshot_dir)?;
        for file in StateFile::snapshot_set() {
            let src = self.path(file);
            if src.exists() {
                let name = src.file_name().expect("state files have names");
                fs::copy(&src, snapshot_dir.join(name))?;
            }
        }
        debug!(dir = %snapshot_dir.display(), "state snapshot created");
        Ok(snapshot_dir)
    }

    /// Restore a snapshot directory over the live state files.
    /// Files absent from the snapshot but present live are removed,
    /// so the state set matches the snapshot bit-for-bit.
    ///
    /// # Errors
    ///
    /// I/O errors from the copies/removals.
    pub fn restore_snapshot(&self, snapshot_dir: &Path) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for file in StateFile::snapshot_set() {
            let dst = self.path(file);
            let name = dst.file_name().expect("state files have names");
            let src = snapshot_dir.join(name);
            if src.exists() {
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&src, &dst)?;
                restored.push(name.to_string_lossy().to_string());
            } else if dst.exists() {
                fs::remove_file(&dst)?;
            }
        }
        Ok(restored)
    }

    /// Most recent `pre-sync-*` snapshot directory, if any.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.backup_dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("pre-sync-"))
            })
            .collect();
        candidates.sort();
        candidates.pop()
    }
}
