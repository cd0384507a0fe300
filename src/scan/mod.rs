//! File discovery for BMAD content trees.
//!
//! Glob patterns, in order:
//! - Epics:  `epics.md`, `epic-*.md`, `epic-*/index.md`, `epics/*.md`,
//!   `epics/*/index.md`
//! - Stories: `stories/*.md`, `stories/*/*.md`, keeping names that
//!   match `^\d+-\d+-[a-z0-9-]+\.md$` and excluding `*-context.md`
//!   companions.

pub mod parser;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

static STORY_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+-\d+-[a-z0-9-]+\.md$").expect("valid regex"));

/// Finds epic and story files under a content root.
#[derive(Debug, Clone)]
pub struct ContentScanner {
    root: PathBuf,
}

impl ContentScanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.exists() {
            Ok(())
        } else {
            Err(SyncError::MissingRoot {
                path: self.root.clone(),
            })
        }
    }

    /// Epic file paths under the root, de-duplicated, pattern order
    /// preserved.
    ///
    /// # Errors
    ///
    /// `MissingRoot` when the content root does not exist.
    pub fn find_epic_files(&self) -> Result<Vec<PathBuf>> {
        self.ensure_root()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();

        let mut push = |path: PathBuf| {
            if path.is_file() && seen.insert(path.clone()) {
                out.push(path);
            }
        };

        push(self.root.join("epics.md"));

        for path in files_in(&self.root) {
            if matches_prefix_md(&path, "epic-") {
                push(path);
            }
        }
        for dir in dirs_in(&self.root) {
            if dir_name_starts_with(&dir, "epic-") {
                push(dir.join("index.md"));
            }
        }
        let epics_dir = self.root.join("epics");
        for path in files_in(&epics_dir) {
            if path.extension().is_some_and(|e| e == "md") {
                push(path);
            }
        }
        for dir in dirs_in(&epics_dir) {
            push(dir.join("index.md"));
        }

        Ok(out)
    }

    /// Story file paths under `stories/` (one nested level supported),
    /// sorted, restricted to the canonical filename pattern.
    ///
    /// # Errors
    ///
    /// `MissingRoot` when the content root does not exist.
    pub fn find_story_files(&self) -> Result<Vec<PathBuf>> {
        self.ensure_root()?;
        let stories_dir = self.root.join("stories");
        let mut candidates: Vec<PathBuf> = files_in(&stories_dir);
        for dir in dirs_in(&stories_dir) {
            candidates.extend(files_in(&dir));
        }

        let mut result: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        STORY_FILENAME.is_match(name) && !name.ends_with("-context.md")
                    })
            })
            .collect();
        result.sort();
        result.dedup();
        Ok(result)
    }

    /// Path to the sprint-status file, whether or not it exists.
    #[must_use]
    pub fn sprint_status_path(&self) -> PathBuf {
        self.root.join("sprint-status.yaml")
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn dirs_in(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn matches_prefix_md(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".md"))
}

fn dir_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(prefix))
}
