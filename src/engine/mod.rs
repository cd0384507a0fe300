//! The per-project sync engine: planning, reporting, transactional
//! application, and post-apply conflict detection.
//!
//! Planning diffs the discovered content against the previous index
//! and emits `create`/`update` operations (epics first, so a story's
//! renumbering can use its epic's tracker number). A structured sync
//! report is written atomically before anything is applied. Apply
//! snapshots the state files, walks the operations strictly in
//! order, and restores the snapshot when any operation fails.

pub mod renumber;
pub mod rollback;

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::discovery::ContentDiscovery;
use crate::error::{Result, SyncError};
use crate::hierarchy::HierarchyMap;
use crate::mapper::{MapContext, StateMapper};
use crate::model::{
    ChangeReason, ChangeSource, ContentIndex, ContentType, OpAction, StateChange, StoryStatus,
    SyncOperation,
};
use crate::numbering::NumberRegistry;
use crate::scan::parser;
use crate::store::{StateFile, StateStore};
use crate::tracker::{CreatePayload, TrackerCli, UpdatePayload, extract_issue_ids};
use crate::util::progress::{create_progress_bar, should_show_progress};
use crate::util::time::parse_timestamp;
use crate::validation::{validate_create_payload, validate_update_payload};
use renumber::RenumberEngine;

const EPIC_TITLE_PREFIX: &str = "\u{1F4E6} EPIC: ";
const STORY_TITLE_PREFIX: &str = "\u{1F4CB} STORY: ";

/// Flags controlling a sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub create_only: bool,
    pub update_only: bool,
    pub force_refresh: bool,
    pub detect_conflicts: bool,
}

/// Cooperative cancellation token shared between the executor and
/// engines. Cancelling prevents new operations from starting; a
/// running tracker invocation completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Operation counts in a plan or report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub total: usize,
}

/// The structured sync report written before application.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub timestamp: chrono::DateTime<Utc>,
    pub summary: PlanSummary,
    pub operations: Vec<SyncOperation>,
}

/// A computed plan plus the context apply needs.
#[derive(Debug)]
pub struct SyncPlan {
    pub operations: Vec<SyncOperation>,
    pub summary: PlanSummary,
    pub report_path: PathBuf,
    pub current_index: ContentIndex,
    /// No previous index existed (first run).
    pub baseline: bool,
    /// Status transitions observed for modified stories, logged to
    /// the state history once apply succeeds.
    transitions: Vec<StateChange>,
}

/// Outcome of applying a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub failed: usize,
    pub messages: Vec<String>,
    pub rolled_back: bool,
    pub cancelled: bool,
}

/// Aggregate result of one full sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunResult {
    pub operations_planned: usize,
    pub operations_applied: usize,
    pub operations_failed: usize,
    pub conflicts: usize,
    pub report_path: PathBuf,
    pub rolled_back: bool,
    pub cancelled: bool,
    pub summary: PlanSummary,
}

/// Sync status of one content key relative to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusKind {
    InSync,
    LocalAhead,
    RemoteAhead,
    Conflict,
    Unknown,
}

/// Per-project sync engine.
pub struct SyncEngine {
    config: ProjectConfig,
    store: StateStore,
    mapper: StateMapper,
    registry: NumberRegistry,
    hierarchy: HierarchyMap,
    tracker: Arc<TrackerCli>,
    options: SyncOptions,
}

impl SyncEngine {
    /// Build an engine for the project at `project_root`.
    ///
    /// # Errors
    ///
    /// Config, store, and mapper loading errors.
    pub fn new(
        project_root: &Path,
        options: SyncOptions,
        tracker: Arc<TrackerCli>,
    ) -> Result<Self> {
        let config = ProjectConfig::load(project_root)?;
        let store = StateStore::open_project(project_root)?;
        let mapper = StateMapper::load_or_init(&project_root.join(".sync").join("config"))?;
        let registry = NumberRegistry::new(
            store.clone(),
            config.numbering.epic_base,
            config.numbering.epic_block_size,
        );
        let hierarchy = HierarchyMap::new(store.clone());
        Ok(Self {
            config,
            store,
            mapper,
            registry,
            hierarchy,
            tracker,
            options,
        })
    }

    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub const fn mapper(&self) -> &StateMapper {
        &self.mapper
    }

    /// Registered tracker id for a content key (hierarchy first,
    /// then the number registry incl. renumber history).
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn issue_id_for(&self, content_key: &str) -> Result<Option<String>> {
        if let Some(id) = self.hierarchy.tracker_id(content_key)? {
            return Ok(Some(id));
        }
        self.registry.issue_key(content_key)
    }

    fn register_issue(&self, content_key: &str, issue_id: &str) -> Result<()> {
        if content_key.starts_with("epic-") {
            self.hierarchy.register_epic(content_key, issue_id)?;
        } else {
            self.hierarchy.register_story(content_key, issue_id, None)?;
        }
        self.registry.register_issue_key(content_key, issue_id)
    }

    fn previous_index(&self) -> Result<Option<ContentIndex>> {
        if self.options.force_refresh {
            return Ok(None);
        }
        let index: ContentIndex = self.store.read_doc(StateFile::ContentIndex)?;
        if index.last_scan.is_none() && index.stories.is_empty() && index.epics.is_empty() {
            Ok(None)
        } else {
            Ok(Some(index))
        }
    }

    // ---- planning ----

    /// Discover content, build operations, and write the sync report.
    ///
    /// # Errors
    ///
    /// Discovery, mapping, and store errors.
    pub fn plan(&self) -> Result<SyncPlan> {
        let previous = self.previous_index()?;
        let discovery = ContentDiscovery::new(self.config.docs_bmad());
        let current = discovery.discover_all(previous.as_ref())?;

        let sprint_status =
            parser::parse_sprint_status(&self.config.docs_bmad().join("sprint-status.yaml"))
                .unwrap_or_default();

        let mut operations = Vec::new();
        let mut transitions = Vec::new();

        // Epics first: story renumbering keys off the epic's tracker
        // number.
        for (key, entry) in &current.epics {
            let reason = match previous.as_ref().and_then(|p| p.epics.get(key)) {
                None => ChangeReason::Added,
                Some(prev) if prev.hash != entry.hash => ChangeReason::Modified,
                Some(_) => continue,
            };
            let issue_id = self.issue_id_for(key)?;
            if self.skip_for_flags(issue_id.as_deref()) {
                continue;
            }

            let epic_state = self.aggregate_epic_state(key, &sprint_status);
            let mapped_state = match &epic_state {
                Some(state) => Some(self.mapper.local_to_remote(state, ContentType::Epic)?),
                None => None,
            };
            let labels = if sprint_status
                .get(key)
                .is_some_and(|s| s.as_str() == "contexted")
            {
                vec!["Contexted".to_string()]
            } else {
                vec!["No Context".to_string()]
            };

            operations.push(SyncOperation {
                action: if issue_id.is_some() {
                    OpAction::Update
                } else {
                    OpAction::Create
                },
                content_key: key.clone(),
                content_type: ContentType::Epic,
                reason,
                title: Some(entry.title.clone()),
                previous_hash: previous
                    .as_ref()
                    .and_then(|p| p.epics.get(key))
                    .map(|e| e.hash.clone()),
                current_hash: Some(entry.hash.clone()),
                issue_id,
                mapped_state,
                project: self.config.tracker_project(),
                team: self.config.team(),
                labels: Some(labels),
            });
        }

        for (key, entry) in &current.stories {
            let prev_entry = previous.as_ref().and_then(|p| p.stories.get(key));
            let reason = match prev_entry {
                None => ChangeReason::Added,
                Some(prev) if prev.hash != entry.hash => ChangeReason::Modified,
                Some(_) => continue,
            };
            let issue_id = self.issue_id_for(key)?;
            if self.skip_for_flags(issue_id.as_deref()) {
                continue;
            }

            let status = entry.status.clone().unwrap_or_default();
            let labels = match status {
                StoryStatus::ReadyForDev => Some(vec!["Contexted".to_string()]),
                StoryStatus::Drafted => Some(vec!["No Context".to_string()]),
                _ => None,
            };
            let mapped_state = self
                .mapper
                .local_to_remote(status.as_str(), ContentType::Story)?;

            if let Some(prev) = prev_entry {
                let old_status = prev.status.clone().unwrap_or_default();
                if old_status != status {
                    transitions.push(StateChange {
                        content_key: key.clone(),
                        from_state: old_status.as_str().to_string(),
                        to_state: status.as_str().to_string(),
                        timestamp: Utc::now(),
                        source: ChangeSource::Local,
                        operation: "sync".to_string(),
                        user: None,
                        content_type: ContentType::Story,
                    });
                }
            }

            operations.push(SyncOperation {
                action: if issue_id.is_some() {
                    OpAction::Update
                } else {
                    OpAction::Create
                },
                content_key: key.clone(),
                content_type: ContentType::Story,
                reason,
                title: entry.title.clone(),
                previous_hash: prev_entry.map(|e| e.hash.clone()),
                current_hash: Some(entry.hash.clone()),
                issue_id,
                mapped_state: Some(mapped_state),
                project: self.config.tracker_project(),
                team: self.config.team(),
                labels,
            });
        }

        let summary = PlanSummary {
            create: operations
                .iter()
                .filter(|o| o.action == OpAction::Create)
                .count(),
            update: operations
                .iter()
                .filter(|o| o.action == OpAction::Update)
                .count(),
            total: operations.len(),
        };

        let report = SyncReport {
            timestamp: Utc::now(),
            summary,
            operations: operations.clone(),
        };
        self.store.write_doc(StateFile::SyncReport, &report)?;
        let report_path = self.store.path(StateFile::SyncReport);
        info!(path = %report_path.display(), total = summary.total, "sync report written");

        Ok(SyncPlan {
            operations,
            summary,
            report_path,
            baseline: previous.is_none(),
            current_index: current,
            transitions,
        })
    }

    const fn skip_for_flags(&self, issue_id: Option<&str>) -> bool {
        (self.options.create_only && issue_id.is_some())
            || (self.options.update_only && issue_id.is_none())
    }

    /// Aggregate an epic's local state from its stories' sprint
    /// status plus the retrospective entry.
    #[must_use]
    pub fn aggregate_epic_state(
        &self,
        epic_key: &str,
        sprint_status: &std::collections::BTreeMap<String, StoryStatus>,
    ) -> Option<String> {
        if sprint_status.is_empty() {
            return None;
        }
        let epic_num = epic_key.strip_prefix("epic-")?;

        let story_statuses: Vec<&StoryStatus> = sprint_status
            .iter()
            .filter(|(k, _)| {
                k.starts_with(&format!("{epic_num}-")) && k.matches('-').count() >= 2
            })
            .map(|(_, v)| v)
            .collect();

        let retro_completed = sprint_status
            .get(&format!("epic-{epic_num}-retrospective"))
            .is_some_and(|s| s.as_str() == "completed");
        if retro_completed {
            return Some("done".to_string());
        }

        let any = !story_statuses.is_empty();
        let all_ready = any && story_statuses.iter().all(|s| **s == StoryStatus::ReadyForDev);
        if all_ready {
            return Some("ready-for-dev".to_string());
        }

        let all_done = any && story_statuses.iter().all(|s| s.is_done_like());
        if all_done {
            return Some("review".to_string());
        }

        let any_in_progress = story_statuses.iter().any(|s| **s == StoryStatus::InProgress);
        let any_review = story_statuses.iter().any(|s| **s == StoryStatus::Review);
        let any_done_like = story_statuses.iter().any(|s| s.is_done_like());
        if any_in_progress || any_review || (any_done_like && !all_done) {
            return Some("in-progress".to_string());
        }

        if sprint_status
            .get(epic_key)
            .is_some_and(|s| *s == StoryStatus::Backlog)
            && story_statuses.iter().any(|s| s.is_progressed())
        {
            warn!(epic = epic_key, "epic marked backlog but stories have progressed");
        }
        Some("backlog".to_string())
    }

    // ---- application ----

    /// Apply planned operations in order, with snapshot/rollback.
    ///
    /// Any failure continues to subsequent operations but triggers a
    /// snapshot restore at the end; cancellation and the optional
    /// deadline take effect between operations.
    ///
    /// # Errors
    ///
    /// Store errors around the snapshot itself; per-operation
    /// failures are reported through the outcome, not as `Err`.
    pub fn apply(
        &self,
        plan: &SyncPlan,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        if self.options.dry_run {
            outcome.messages.push("dry_run: no operations applied".to_string());
            return Ok(outcome);
        }

        let started = Instant::now();
        let snapshot = self.store.snapshot_state()?;
        let total = plan.operations.len();
        let progress =
            create_progress_bar(total as u64, "Applying operations", should_show_progress());

        for (i, op) in plan.operations.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                outcome.messages.push(format!(
                    "cancelled before operation {}/{total}",
                    i + 1
                ));
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                outcome.cancelled = true;
                outcome
                    .messages
                    .push(format!("deadline reached before operation {}/{total}", i + 1));
                break;
            }

            info!(
                step = i + 1,
                total,
                key = %op.content_key,
                action = %op.action,
                "applying operation"
            );
            let result = match op.action {
                OpAction::Create => self.apply_create(op),
                OpAction::Update => self.apply_update(op),
            };
            match result {
                Ok(message) => {
                    outcome.applied += 1;
                    outcome.messages.push(message);
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome
                        .messages
                        .push(format!("error for {}: {e}", op.content_key));
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        if outcome.failed > 0 {
            // State files must end up byte-identical to the snapshot;
            // the failure itself lives in the sync report and the
            // returned messages.
            self.store.restore_snapshot(&snapshot)?;
            outcome.rolled_back = true;
            outcome
                .messages
                .push("rollback: restored state from pre-sync backup due to failures".to_string());
            return Ok(outcome);
        }

        for change in &plan.transitions {
            self.store
                .log_state_change(change.clone(), self.mapper.retention_days())?;
        }

        if !outcome.cancelled {
            // Renumbering may have renamed files; the persisted index
            // must reflect the post-apply tree.
            let discovery = ContentDiscovery::new(self.config.docs_bmad());
            let refreshed = discovery.discover_all(None)?;
            self.store.write_doc(StateFile::ContentIndex, &refreshed)?;
        }

        self.store.record_operation(
            "sync_apply",
            true,
            serde_json::json!({
                "applied": outcome.applied,
                "cancelled": outcome.cancelled,
                "duration_seconds": started.elapsed().as_secs_f64(),
            }),
        )?;
        Ok(outcome)
    }

    fn apply_create(&self, op: &SyncOperation) -> Result<String> {
        let prefix = match op.content_type {
            ContentType::Epic => EPIC_TITLE_PREFIX,
            ContentType::Story | ContentType::SprintStatus => STORY_TITLE_PREFIX,
        };
        let title = format!(
            "{prefix}{}",
            op.title.clone().unwrap_or_else(|| op.content_key.clone())
        );

        let team = op.team.clone().unwrap_or_default();
        let allowed = self.mapper.allowed_remote_states(op.content_type);
        let problems = validate_create_payload(&title, &team, None, &allowed);
        if !problems.is_empty() {
            return Err(SyncError::InvalidPayload {
                content_key: op.content_key.clone(),
                reasons: problems,
            });
        }

        let payload = CreatePayload {
            title,
            team,
            description: None,
            priority: None,
            project: op.project.clone(),
            labels: op.labels.clone().unwrap_or_default(),
        };
        if op.content_type == ContentType::Epic {
            if let Some(epic_number) = op
                .content_key
                .strip_prefix("epic-")
                .and_then(|n| n.parse::<u32>().ok())
            {
                self.registry.reserve_epic(epic_number)?;
            }
        }

        let result = self.tracker.issue_create(&payload)?;
        let (key, uuid) = extract_issue_ids(&result);
        let issue_id = key
            .clone()
            .or_else(|| uuid.clone())
            .ok_or_else(|| SyncError::TrackerPermanent {
                message: format!(
                    "create response for {} contained no issue id",
                    op.content_key
                ),
            })?;

        // Register under the pre-rename key first so a failed
        // renumber still leaves the mapping recoverable.
        self.register_issue(&op.content_key, &issue_id)?;

        if let Some(state) = &op.mapped_state {
            let problems = validate_update_payload(Some(state), &allowed);
            if !problems.is_empty() {
                return Err(SyncError::InvalidPayload {
                    content_key: op.content_key.clone(),
                    reasons: problems,
                });
            }
            let update = UpdatePayload {
                state: Some(state.clone()),
                ..UpdatePayload::default()
            };
            // Prefer the human key; some CLI versions only accept the
            // UUID, so fall back before giving up on the state write.
            let state_applied = key
                .as_ref()
                .and_then(|k| self.tracker.issue_update(k, &update).ok())
                .or_else(|| {
                    uuid.as_ref()
                        .and_then(|u| self.tracker.issue_update(u, &update).ok())
                });
            if state_applied.is_none() {
                debug!(key = %op.content_key, state, "post-create state update not applied");
            }
        }

        let renumber = RenumberEngine::new(
            self.config.docs_bmad(),
            self.registry.clone(),
            self.hierarchy.clone(),
        );
        let team_prefix = &self.config.linear.team_prefix;
        match op.content_type {
            ContentType::Epic => {
                renumber.renumber_epic_after_create(&op.content_key, &issue_id, team_prefix)?;
            }
            ContentType::Story | ContentType::SprintStatus => {
                renumber.renumber_story_after_create(&op.content_key, &issue_id, team_prefix)?;
            }
        }

        Ok(format!(
            "created {} {issue_id} for {}",
            op.content_type, op.content_key
        ))
    }

    fn apply_update(&self, op: &SyncOperation) -> Result<String> {
        let Some(issue_id) = &op.issue_id else {
            return Ok(format!(
                "planned update, missing issue_id: {}",
                op.content_key
            ));
        };

        let allowed = self.mapper.allowed_remote_states(op.content_type);
        let problems = validate_update_payload(op.mapped_state.as_deref(), &allowed);
        if !problems.is_empty() {
            return Err(SyncError::InvalidPayload {
                content_key: op.content_key.clone(),
                reasons: problems,
            });
        }

        let mut payload = UpdatePayload {
            state: op.mapped_state.clone(),
            ..UpdatePayload::default()
        };
        if let Some(labels) = &op.labels {
            let add: Vec<String> = labels.iter().filter(|l| !l.is_empty()).cloned().collect();
            let mut remove = Vec::new();
            // "Contexted" and "No Context" are mutually exclusive.
            if add.iter().any(|l| l == "Contexted") {
                remove.push("No Context".to_string());
            }
            if add.iter().any(|l| l == "No Context") {
                remove.push("Contexted".to_string());
            }
            payload.add_labels = add;
            payload.remove_labels = remove;
        }

        self.tracker.issue_update(issue_id, &payload)?;
        self.register_issue(&op.content_key, issue_id)?;
        Ok(format!("updated {issue_id} for {}", op.content_key))
    }

    // ---- conflict detection ----

    fn map_context_for(&self, story_file: &str) -> MapContext {
        let path = Path::new(story_file);
        let has_context_file = path
            .file_stem()
            .map(|stem| {
                path.with_file_name(format!("{}-context.md", stem.to_string_lossy()))
                    .exists()
            })
            .unwrap_or(false);
        MapContext { has_context_file }
    }

    /// Compare every registered story against the tracker and queue
    /// detected conflicts. Returns the conflicted content keys.
    ///
    /// # Errors
    ///
    /// Store errors; individual tracker fetch failures are skipped.
    pub fn detect_and_record_conflicts(&self, index: &ContentIndex) -> Result<Vec<String>> {
        let last_sync = self.store.sync_state()?.last_sync;
        if last_sync.is_none() {
            return Ok(Vec::new());
        }

        let mut conflicted = Vec::new();
        for (key, entry) in &index.stories {
            let Some(issue_id) = self.issue_id_for(key)? else {
                continue;
            };
            let Ok(issue) = self.tracker.issue_get(&issue_id) else {
                continue;
            };

            let remote_state = issue
                .get("state")
                .map(|s| {
                    s.as_str().map_or_else(
                        || {
                            s.get("name")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .to_string()
                        },
                        ToString::to_string,
                    )
                })
                .unwrap_or_default();
            let remote_updated_raw = issue
                .get("updatedAt")
                .or_else(|| issue.get("updated_at"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();

            let (Some(local_state), Some(local_updated)) =
                (entry.status.as_ref(), entry.last_modified)
            else {
                continue;
            };
            if remote_state.is_empty() || remote_updated_raw.is_empty() {
                continue;
            }
            let Ok(remote_updated) = parse_timestamp(remote_updated_raw, "updatedAt") else {
                continue;
            };

            let ctx = self.map_context_for(&entry.file);
            if let Some(conflict) = self.mapper.detect_conflict(
                key,
                local_state.as_str(),
                local_updated,
                &remote_state,
                remote_updated,
                last_sync,
                ctx,
            )? {
                self.store.append_conflict(conflict)?;
                conflicted.push(key.clone());
            }
        }
        Ok(conflicted)
    }

    /// Classify one story's sync status against the tracker.
    ///
    /// # Errors
    ///
    /// Store errors; tracker failures degrade to `Unknown`.
    pub fn sync_status(&self, content_key: &str, index: &ContentIndex) -> Result<SyncStatusKind> {
        let Some(entry) = index.stories.get(content_key) else {
            return Ok(SyncStatusKind::Unknown);
        };
        let Some(local_state) = entry.status.as_ref() else {
            return Ok(SyncStatusKind::Unknown);
        };

        let Some(issue_id) = self.issue_id_for(content_key)? else {
            return Ok(SyncStatusKind::LocalAhead);
        };
        let Ok(issue) = self.tracker.issue_get(&issue_id) else {
            return Ok(SyncStatusKind::Unknown);
        };

        let remote_state = issue
            .get("state")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let ctx = self.map_context_for(&entry.file);
        let remote_as_local =
            self.mapper
                .remote_to_local(remote_state, ContentType::Story, ctx)?;
        if local_state.as_str() == remote_as_local {
            return Ok(SyncStatusKind::InSync);
        }

        let last_sync = self.store.sync_state()?.last_sync;
        let remote_updated = issue
            .get("updatedAt")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| parse_timestamp(s, "updatedAt").ok());
        if let (Some(last), Some(local), Some(remote)) =
            (last_sync, entry.last_modified, remote_updated)
        {
            if local > last && remote > last {
                return Ok(SyncStatusKind::Conflict);
            }
            if local > last {
                return Ok(SyncStatusKind::LocalAhead);
            }
            if remote > last {
                return Ok(SyncStatusKind::RemoteAhead);
            }
        }
        Ok(SyncStatusKind::LocalAhead)
    }

    // ---- orchestration ----

    /// Run the full pipeline: plan, apply (unless dry-run), then the
    /// optional conflict detection pass.
    ///
    /// # Errors
    ///
    /// Planning/store errors; apply failures surface in the result.
    pub fn run(&self, cancel: &CancelToken, deadline: Option<Instant>) -> Result<SyncRunResult> {
        let plan = self.plan()?;

        let outcome = if self.options.dry_run || plan.operations.is_empty() {
            ApplyOutcome::default()
        } else {
            self.apply(&plan, cancel, deadline)?
        };

        let conflicts = if self.options.detect_conflicts {
            let discovery = ContentDiscovery::new(self.config.docs_bmad());
            let index = discovery.discover_all(None)?;
            self.detect_and_record_conflicts(&index)?
        } else {
            Vec::new()
        };

        Ok(SyncRunResult {
            operations_planned: plan.summary.total,
            operations_applied: outcome.applied,
            operations_failed: outcome.failed,
            conflicts: conflicts.len(),
            report_path: plan.report_path,
            rolled_back: outcome.rolled_back,
            cancelled: outcome.cancelled,
            summary: plan.summary,
        })
    }
}
