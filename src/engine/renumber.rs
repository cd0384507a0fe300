//! Post-create renumbering: after the tracker assigns an issue id,
//! local artefacts are renamed to mirror it.
//!
//! For an epic `epic-1` created as `RAE-360`:
//! - `epic-1-context.md` → `epic-360-context.md`
//! - a `**Linear Epic:** RAE-360` marker lands after the
//!   `**Epic ID:**` line (or at the top)
//!
//! For a story `1-1-setup` created as `RAE-361`:
//! - `1-1-setup.md` → `360-361-setup.md` (epic part from the epic's
//!   tracker number when known)
//! - a `**Linear Issue:** RAE-361` marker lands after the `Status:`
//!   line
//! - cross-references (`1.1`, `1-1`, `Story 1.1`) are rewritten in
//!   every markdown file under the docs root
//! - the sprint-status key is renamed
//!
//! Every rename is recorded in the registry's renumbering history so
//! old keys stay resolvable.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::hierarchy::HierarchyMap;
use crate::model::ContentType;
use crate::numbering::{NumberRegistry, RenumberMapping};

/// Renumbering engine for one project's docs tree.
#[derive(Debug)]
pub struct RenumberEngine {
    docs_bmad: PathBuf,
    registry: NumberRegistry,
    hierarchy: HierarchyMap,
}

impl RenumberEngine {
    #[must_use]
    pub const fn new(
        docs_bmad: PathBuf,
        registry: NumberRegistry,
        hierarchy: HierarchyMap,
    ) -> Self {
        Self {
            docs_bmad,
            registry,
            hierarchy,
        }
    }

    /// Strip the team prefix from a tracker id (`RAE-360` → `360`).
    #[must_use]
    pub fn numeric_id(tracker_id: &str, team_prefix: &str) -> String {
        tracker_id
            .strip_prefix(&format!("{team_prefix}-"))
            .unwrap_or(tracker_id)
            .to_string()
    }

    /// Insert the tracker-id marker into a BMAD file.
    ///
    /// Epics get `**Linear Epic:** <id>` after the `**Epic ID:**`
    /// line; stories get `**Linear Issue:** <id>` after the `Status:`
    /// line. Without an anchor the marker goes to the top. Inserting
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// I/O errors reading or writing the file.
    pub fn add_tracker_marker(
        path: &Path,
        tracker_id: &str,
        content_type: ContentType,
    ) -> Result<()> {
        if !path.exists() {
            warn!(path = %path.display(), "file missing, marker not added");
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;

        let (marker_prefix, anchor): (&str, fn(&str) -> bool) = match content_type {
            ContentType::Epic => ("**Linear Epic:**", |line| line.contains("**Epic ID:**")),
            ContentType::Story | ContentType::SprintStatus => ("**Linear Issue:**", |line| {
                line.contains("Status:") || line.contains("**Status:**")
            }),
        };
        if content.contains(marker_prefix) {
            return Ok(());
        }
        let marker = format!("{marker_prefix} {tracker_id}");

        let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
        let anchor_idx = lines.iter().position(|line| anchor(line));
        match anchor_idx {
            Some(idx) => lines.insert(idx + 1, marker),
            None => {
                lines.insert(0, String::new());
                lines.insert(0, marker);
            }
        }
        let mut updated = lines.join("\n");
        if content.ends_with('\n') {
            updated.push('\n');
        }
        std::fs::write(path, updated)?;
        Ok(())
    }

    /// Rewrite cross-references to a renumbered story in every
    /// markdown file under the docs root. Returns `(path, changes)`
    /// per touched file.
    ///
    /// # Errors
    ///
    /// Never fails outright; unreadable files are skipped with a
    /// warning.
    pub fn update_cross_references(
        &self,
        mapping: &RenumberMapping,
    ) -> Result<Vec<(PathBuf, usize)>> {
        let replacements = [
            (
                format!("Story {}.{}", mapping.old_epic, mapping.old_story),
                format!("Story {}.{}", mapping.new_epic, mapping.new_story),
            ),
            (
                format!("{}.{}", mapping.old_epic, mapping.old_story),
                format!("{}.{}", mapping.new_epic, mapping.new_story),
            ),
            (
                format!("{}-{}", mapping.old_epic, mapping.old_story),
                format!("{}-{}", mapping.new_epic, mapping.new_story),
            ),
        ];

        let mut updated = Vec::new();
        for path in markdown_files(&self.docs_bmad) {
            let Ok(content) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "skipping unreadable file during reference update");
                continue;
            };
            let mut next = content.clone();
            let mut changes = 0;
            for (old, new) in &replacements {
                if next.contains(old.as_str()) {
                    next = next.replace(old.as_str(), new);
                    changes += 1;
                }
            }
            if changes > 0 && next != content {
                std::fs::write(&path, &next)?;
                updated.push((path, changes));
            }
        }
        Ok(updated)
    }

    /// Rename a story key in the sprint-status
    /// `development_status:` mapping. Returns whether a rename
    /// happened.
    ///
    /// # Errors
    ///
    /// I/O and YAML errors.
    pub fn rename_sprint_status_key(&self, old_key: &str, new_key: &str) -> Result<bool> {
        let path = self.docs_bmad.join("sprint-status.yaml");
        if !path.exists() {
            return Ok(false);
        }
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
        let Some(statuses) = doc
            .get_mut("development_status")
            .and_then(serde_yaml::Value::as_mapping_mut)
        else {
            return Ok(false);
        };

        let old = serde_yaml::Value::String(old_key.to_string());
        let Some(value) = statuses.remove(&old) else {
            return Ok(false);
        };
        statuses.insert(serde_yaml::Value::String(new_key.to_string()), value);
        std::fs::write(&path, serde_yaml::to_string(&doc)?)?;
        info!(old_key, new_key, "sprint-status key renamed");
        Ok(true)
    }

    /// Renumber an epic after creation. Returns the new content key
    /// when the epic's context file was found and renamed.
    ///
    /// # Errors
    ///
    /// I/O, YAML, and store errors.
    pub fn renumber_epic_after_create(
        &self,
        old_key: &str,
        tracker_id: &str,
        team_prefix: &str,
    ) -> Result<Option<String>> {
        let numeric = Self::numeric_id(tracker_id, team_prefix);
        let new_key = format!("epic-{numeric}");
        if new_key == old_key {
            return Ok(None);
        }

        let old_file = self.docs_bmad.join(format!("{old_key}-context.md"));
        let new_file = self.docs_bmad.join(format!("{new_key}-context.md"));
        if !old_file.exists() {
            warn!(path = %old_file.display(), "epic context file missing, renumber skipped");
            return Ok(None);
        }

        std::fs::rename(&old_file, &new_file)?;
        info!(from = %old_file.display(), to = %new_file.display(), "epic renamed");
        Self::add_tracker_marker(&new_file, tracker_id, ContentType::Epic)?;

        let old_epic: u32 = old_key.trim_start_matches("epic-").parse().unwrap_or(0);
        let new_epic: u32 = numeric.parse().unwrap_or(0);
        let mapping = RenumberMapping {
            old_key: old_key.to_string(),
            new_key: new_key.clone(),
            old_epic,
            old_story: 0,
            new_epic,
            new_story: 0,
            tracker_issue_id: Some(tracker_id.to_string()),
            reason: "post_create".to_string(),
            timestamp: Utc::now(),
        };
        self.update_cross_references(&mapping)?;
        self.registry.renumber(mapping)?;
        self.hierarchy.rename_key(old_key, &new_key)?;
        self.hierarchy.register_epic(&new_key, tracker_id)?;

        Ok(Some(new_key))
    }

    /// Renumber a story after creation. The epic part of the new key
    /// comes from the parent epic's tracker number when registered,
    /// else the old epic number is kept.
    ///
    /// # Errors
    ///
    /// I/O, YAML, and store errors.
    pub fn renumber_story_after_create(
        &self,
        old_key: &str,
        tracker_id: &str,
        team_prefix: &str,
    ) -> Result<Option<String>> {
        let numeric = Self::numeric_id(tracker_id, team_prefix);

        let mut parts = old_key.splitn(3, '-');
        let (Some(old_epic_str), Some(old_story_str)) = (parts.next(), parts.next()) else {
            warn!(old_key, "invalid story key format, renumber skipped");
            return Ok(None);
        };
        let slug = parts.next().unwrap_or("");

        // The epic may itself have been renumbered this run; the
        // registry resolves its old key through the renumber history.
        let epic_key = format!("epic-{old_epic_str}");
        let epic_id = match self.hierarchy.tracker_id(&epic_key)? {
            Some(id) => Some(id),
            None => self.registry.issue_key(&epic_key)?,
        };
        let epic_numeric = epic_id
            .map_or_else(|| old_epic_str.to_string(), |id| Self::numeric_id(&id, team_prefix));

        let mut new_key = format!("{epic_numeric}-{numeric}");
        if !slug.is_empty() {
            new_key.push('-');
            new_key.push_str(slug);
        }
        if new_key == old_key {
            return Ok(None);
        }

        let old_file = self.docs_bmad.join("stories").join(format!("{old_key}.md"));
        let new_file = self.docs_bmad.join("stories").join(format!("{new_key}.md"));
        if !old_file.exists() {
            warn!(path = %old_file.display(), "story file missing, renumber skipped");
            return Ok(None);
        }

        std::fs::rename(&old_file, &new_file)?;
        info!(from = %old_file.display(), to = %new_file.display(), "story renamed");
        Self::add_tracker_marker(&new_file, tracker_id, ContentType::Story)?;

        let mapping = RenumberMapping {
            old_key: old_key.to_string(),
            new_key: new_key.clone(),
            old_epic: old_epic_str.parse().unwrap_or(0),
            old_story: old_story_str.parse().unwrap_or(0),
            new_epic: epic_numeric.parse().unwrap_or(0),
            new_story: numeric.parse().unwrap_or(0),
            tracker_issue_id: Some(tracker_id.to_string()),
            reason: "post_create".to_string(),
            timestamp: Utc::now(),
        };
        self.update_cross_references(&mapping)?;
        self.registry.renumber(mapping)?;
        self.hierarchy.rename_key(old_key, &new_key)?;
        self.hierarchy
            .register_story(&new_key, tracker_id, Some(&format!("epic-{epic_numeric}")))?;
        self.rename_sprint_status_key(old_key, &new_key)?;

        Ok(Some(new_key))
    }
}

fn markdown_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "md") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}
