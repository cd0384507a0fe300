//! Epic/story hierarchy tracking and tracker-id mappings.
//!
//! The hierarchy document is the authoritative local→tracker id map.
//! Parent relationships are explicit where given and otherwise
//! derived from the leading number of the story key
//! (`3-2-slug` → `epic-3`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::store::{StateFile, StateStore};

/// Tracker-id mappings split by entity kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerMappings {
    #[serde(default)]
    pub epics: BTreeMap<String, String>,
    #[serde(default)]
    pub stories: BTreeMap<String, String>,
}

/// `hierarchy.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyDoc {
    pub version: String,
    /// child story key → parent epic key
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    /// parent epic key → child story keys
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tracker_mappings: TrackerMappings,
}

impl Default for HierarchyDoc {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            relationships: BTreeMap::new(),
            children: BTreeMap::new(),
            tracker_mappings: TrackerMappings::default(),
        }
    }
}

/// Derive the parent epic key from a story key's leading number.
#[must_use]
pub fn derive_parent_key(story_key: &str) -> Option<String> {
    let leading = story_key.split('-').next()?;
    let epic: u32 = leading.parse().ok()?;
    Some(format!("epic-{epic}"))
}

/// Hierarchy map bound to one project's state store.
#[derive(Debug, Clone)]
pub struct HierarchyMap {
    store: StateStore,
}

impl HierarchyMap {
    #[must_use]
    pub const fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Register an epic's tracker id.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn register_epic(&self, epic_key: &str, tracker_id: &str) -> Result<()> {
        self.store
            .mutate_doc(StateFile::Hierarchy, |doc: &mut HierarchyDoc| {
                doc.tracker_mappings
                    .epics
                    .insert(epic_key.to_string(), tracker_id.to_string());
                doc.children.entry(epic_key.to_string()).or_default();
                Ok(())
            })
    }

    /// Register a story's tracker id and parent relation. An explicit
    /// parent wins; otherwise it is derived from the story key.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn register_story(
        &self,
        story_key: &str,
        tracker_id: &str,
        parent_epic_key: Option<&str>,
    ) -> Result<()> {
        let parent = parent_epic_key
            .map(ToString::to_string)
            .or_else(|| derive_parent_key(story_key));

        self.store
            .mutate_doc(StateFile::Hierarchy, |doc: &mut HierarchyDoc| {
                doc.tracker_mappings
                    .stories
                    .insert(story_key.to_string(), tracker_id.to_string());

                if let Some(parent) = parent {
                    doc.relationships
                        .insert(story_key.to_string(), parent.clone());
                    let children = doc.children.entry(parent).or_default();
                    if !children.iter().any(|c| c == story_key) {
                        children.push(story_key.to_string());
                    }
                }
                Ok(())
            })
    }

    /// Tracker id for an epic or story key.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn tracker_id(&self, key: &str) -> Result<Option<String>> {
        let doc: HierarchyDoc = self.store.read_doc(StateFile::Hierarchy)?;
        Ok(doc
            .tracker_mappings
            .epics
            .get(key)
            .or_else(|| doc.tracker_mappings.stories.get(key))
            .cloned())
    }

    /// Parent epic key for a story.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn parent_epic(&self, story_key: &str) -> Result<Option<String>> {
        let doc: HierarchyDoc = self.store.read_doc(StateFile::Hierarchy)?;
        Ok(doc.relationships.get(story_key).cloned())
    }

    /// Child story keys of an epic.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn children(&self, epic_key: &str) -> Result<Vec<String>> {
        let doc: HierarchyDoc = self.store.read_doc(StateFile::Hierarchy)?;
        Ok(doc.children.get(epic_key).cloned().unwrap_or_default())
    }

    /// Move a key (and its relations) to a new name after
    /// renumbering.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn rename_key(&self, old_key: &str, new_key: &str) -> Result<()> {
        self.store
            .mutate_doc(StateFile::Hierarchy, |doc: &mut HierarchyDoc| {
                if let Some(id) = doc.tracker_mappings.epics.remove(old_key) {
                    doc.tracker_mappings.epics.insert(new_key.to_string(), id);
                }
                if let Some(id) = doc.tracker_mappings.stories.remove(old_key) {
                    doc.tracker_mappings.stories.insert(new_key.to_string(), id);
                }
                if let Some(parent) = doc.relationships.remove(old_key) {
                    doc.relationships.insert(new_key.to_string(), parent);
                }
                if let Some(children) = doc.children.remove(old_key) {
                    doc.children.insert(new_key.to_string(), children);
                }
                for children in doc.children.values_mut() {
                    for child in children.iter_mut() {
                        if child == old_key {
                            *child = new_key.to_string();
                        }
                    }
                }
                Ok(())
            })
    }

    /// Check the structural invariant: every story's parent exists
    /// and lists the story exactly once. Returns violation messages.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn validate(&self) -> Result<Vec<String>> {
        let doc: HierarchyDoc = self.store.read_doc(StateFile::Hierarchy)?;
        let mut problems = Vec::new();

        for (story, parent) in &doc.relationships {
            match doc.children.get(parent) {
                None => problems.push(format!("story {story} points at missing parent {parent}")),
                Some(children) => {
                    let count = children.iter().filter(|c| *c == story).count();
                    if count != 1 {
                        problems.push(format!(
                            "story {story} appears {count} times under {parent}"
                        ));
                    }
                }
            }
        }
        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hierarchy() -> (TempDir, HierarchyMap) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join(".sync")).unwrap();
        (temp, HierarchyMap::new(store))
    }

    #[test]
    fn test_derive_parent_key() {
        assert_eq!(derive_parent_key("3-2-slug"), Some("epic-3".to_string()));
        assert_eq!(derive_parent_key("epic-3"), None);
        assert_eq!(derive_parent_key("slug"), None);
    }

    #[test]
    fn test_register_and_lookup() {
        let (_t, h) = hierarchy();
        h.register_epic("epic-1", "RAE-360").unwrap();
        h.register_story("1-1-setup", "RAE-361", None).unwrap();

        assert_eq!(h.tracker_id("epic-1").unwrap().as_deref(), Some("RAE-360"));
        assert_eq!(h.tracker_id("1-1-setup").unwrap().as_deref(), Some("RAE-361"));
        assert_eq!(h.parent_epic("1-1-setup").unwrap().as_deref(), Some("epic-1"));
        assert_eq!(h.children("epic-1").unwrap(), vec!["1-1-setup"]);
    }

    #[test]
    fn test_duplicate_registration_keeps_single_child() {
        let (_t, h) = hierarchy();
        h.register_story("1-1-setup", "RAE-361", None).unwrap();
        h.register_story("1-1-setup", "RAE-361", None).unwrap();
        assert_eq!(h.children("epic-1").unwrap().len(), 1);
        assert!(h.validate().unwrap().is_empty());
    }

    #[test]
    fn test_explicit_parent_wins() {
        let (_t, h) = hierarchy();
        h.register_story("1-1-setup", "RAE-361", Some("epic-9")).unwrap();
        assert_eq!(h.parent_epic("1-1-setup").unwrap().as_deref(), Some("epic-9"));
    }

    #[test]
    fn test_rename_key_moves_relations() {
        let (_t, h) = hierarchy();
        h.register_epic("epic-1", "RAE-360").unwrap();
        h.register_story("1-1-setup", "RAE-361", None).unwrap();
        h.rename_key("1-1-setup", "360-361-setup").unwrap();

        assert!(h.tracker_id("1-1-setup").unwrap().is_none());
        assert_eq!(
            h.tracker_id("360-361-setup").unwrap().as_deref(),
            Some("RAE-361")
        );
        assert_eq!(h.children("epic-1").unwrap(), vec!["360-361-setup"]);
        assert!(h.validate().unwrap().is_empty());
    }
}
