//! Content discovery: builds the normalised index and the diff
//! against the previous generation.
//!
//! Malformed files are skipped with a warning; a missing content root
//! is fatal. On the baseline run (no previous index) the diff is
//! empty: the first sync establishes state without reporting every
//! file as added.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::model::{ContentIndex, EpicEntry, IndexChanges, StoryEntry};
use crate::scan::{ContentScanner, parser};
use crate::util::hash::content_hash;

/// Discovery orchestrator for one content root.
#[derive(Debug, Clone)]
pub struct ContentDiscovery {
    root: PathBuf,
}

impl ContentDiscovery {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build the current index and attach the diff against
    /// `previous`.
    ///
    /// # Errors
    ///
    /// `MissingRoot` when the content root does not exist; individual
    /// file failures degrade to warnings.
    pub fn discover_all(&self, previous: Option<&ContentIndex>) -> Result<ContentIndex> {
        let mut index = self.build_current_index()?;
        index.changes = previous.map_or_else(IndexChanges::default, |prev| {
            diff_story_keys(prev, &index)
        });
        Ok(index)
    }

    fn build_current_index(&self) -> Result<ContentIndex> {
        let scanner = ContentScanner::new(&self.root);
        let epic_files = scanner.find_epic_files()?;
        let story_files = scanner.find_story_files()?;

        let mut index = ContentIndex {
            last_scan: Some(Utc::now()),
            ..ContentIndex::default()
        };

        for path in epic_files {
            // The master index file lists every epic; extracting
            // entities from it would duplicate the per-epic files.
            if path.file_name().is_some_and(|n| n == "epics.md") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "skipping unreadable epic file");
                continue;
            };
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(parsed) = parser::parse_epic_content(&text, &stem) else {
                warn!(path = %path.display(), "skipping epic file without parseable header");
                continue;
            };
            let key = format!("epic-{}", parsed.epic_number);
            index.epics.insert(
                key,
                EpicEntry {
                    file: path.to_string_lossy().to_string(),
                    hash: content_hash(&text),
                    title: parsed.title,
                    epic_number: parsed.epic_number,
                },
            );
        }

        for path in story_files {
            let key = story_key_for(&path);
            let Ok(text) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "skipping unreadable story file");
                continue;
            };
            let entry = match parser::parse_story_content(&text, &path) {
                Ok(parsed) => StoryEntry {
                    file: path.to_string_lossy().to_string(),
                    hash: content_hash(&text),
                    title: Some(parsed.title),
                    epic: Some(parsed.epic_number),
                    story: Some(parsed.story_number),
                    status: Some(parsed.status),
                    last_modified: file_mtime(&path),
                },
                Err(e) => {
                    // Keep the file in the index so hash-level change
                    // detection still works for it.
                    warn!(path = %path.display(), error = %e, "story metadata parse failed");
                    StoryEntry {
                        file: path.to_string_lossy().to_string(),
                        hash: content_hash(&text),
                        title: None,
                        epic: None,
                        story: None,
                        status: None,
                        last_modified: file_mtime(&path),
                    }
                }
            };
            index.stories.insert(key, entry);
        }

        Ok(index)
    }
}

/// Content key for a story file: the file stem
/// (`1-1-setup.md` → `1-1-setup`).
#[must_use]
pub fn story_key_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Partition story keys of two index generations into added,
/// modified (hash differs), and deleted.
#[must_use]
pub fn diff_story_keys(previous: &ContentIndex, current: &ContentIndex) -> IndexChanges {
    let mut changes = IndexChanges::default();

    for (key, entry) in &current.stories {
        match previous.stories.get(key) {
            None => changes.added.push(key.clone()),
            Some(prev) if prev.hash != entry.hash => changes.modified.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in previous.stories.keys() {
        if !current.stories.contains_key(key) {
            changes.deleted.push(key.clone());
        }
    }

    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    changes
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryStatus;
    use std::fs;
    use tempfile::TempDir;

    fn write_story(root: &Path, name: &str, epic: u32, story: u32, status: &str) {
        let dir = root.join("stories");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(name),
            format!("# Story {epic}.{story}: Title {story}\nStatus: {status}\n\n## Acceptance Criteria\n1. works\n"),
        )
        .unwrap();
    }

    fn write_epic(root: &Path, n: u32, title: &str) {
        fs::write(
            root.join(format!("epic-{n}.md")),
            format!("# Epic {n}: {title}\n\n## Overview\ntext\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_baseline_run_has_empty_changes() {
        let temp = TempDir::new().unwrap();
        write_epic(temp.path(), 1, "Bootstrap");
        write_story(temp.path(), "1-1-setup.md", 1, 1, "drafted");

        let discovery = ContentDiscovery::new(temp.path());
        let index = discovery.discover_all(None).unwrap();
        assert!(index.changes.is_empty());
        assert_eq!(index.epics.len(), 1);
        assert_eq!(index.stories.len(), 1);
    }

    #[test]
    fn test_story_metadata_extracted() {
        let temp = TempDir::new().unwrap();
        write_story(temp.path(), "2-3-codec.md", 2, 3, "in-progress");

        let discovery = ContentDiscovery::new(temp.path());
        let index = discovery.discover_all(None).unwrap();
        let entry = index.stories.get("2-3-codec").unwrap();
        assert_eq!(entry.epic, Some(2));
        assert_eq!(entry.story, Some(3));
        assert_eq!(entry.status, Some(StoryStatus::InProgress));
        assert!(entry.last_modified.is_some());
    }

    #[test]
    fn test_diff_partitions_all_keys() {
        let temp = TempDir::new().unwrap();
        write_story(temp.path(), "1-1-keep.md", 1, 1, "drafted");
        write_story(temp.path(), "1-2-edit.md", 1, 2, "drafted");
        write_story(temp.path(), "1-3-gone.md", 1, 3, "drafted");

        let discovery = ContentDiscovery::new(temp.path());
        let previous = discovery.discover_all(None).unwrap();

        fs::remove_file(temp.path().join("stories").join("1-3-gone.md")).unwrap();
        write_story(temp.path(), "1-2-edit.md", 1, 2, "ready-for-dev");
        write_story(temp.path(), "1-4-new.md", 1, 4, "drafted");

        let current = discovery.discover_all(Some(&previous)).unwrap();
        assert_eq!(current.changes.added, vec!["1-4-new"]);
        assert_eq!(current.changes.modified, vec!["1-2-edit"]);
        assert_eq!(current.changes.deleted, vec!["1-3-gone"]);
    }

    #[test]
    fn test_unchanged_story_not_reported() {
        let temp = TempDir::new().unwrap();
        write_story(temp.path(), "1-1-same.md", 1, 1, "drafted");

        let discovery = ContentDiscovery::new(temp.path());
        let previous = discovery.discover_all(None).unwrap();
        let current = discovery.discover_all(Some(&previous)).unwrap();
        assert!(current.changes.is_empty());
    }

    #[test]
    fn test_epics_md_skipped_for_entities() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("epics.md"),
            "# Epic 1: Master Listing\n# Epic 2: Also Here\n",
        )
        .unwrap();
        write_epic(temp.path(), 1, "Bootstrap");

        let discovery = ContentDiscovery::new(temp.path());
        let index = discovery.discover_all(None).unwrap();
        assert_eq!(index.epics.len(), 1);
        assert_eq!(index.epics.get("epic-1").unwrap().title, "Bootstrap");
    }

    #[test]
    fn test_malformed_story_still_indexed_by_hash() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("stories");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("9-9-broken.md"), "no header here\n").unwrap();

        let discovery = ContentDiscovery::new(temp.path());
        let index = discovery.discover_all(None).unwrap();
        let entry = index.stories.get("9-9-broken").unwrap();
        assert!(entry.title.is_none());
        assert_eq!(entry.hash.len(), 64);
    }
}
