//! Tracker ID numbering: per-epic range reservation and story slot
//! assignment.
//!
//! Epic `n` reserves the contiguous window
//! `[base + (n-1)·block, base + n·block - 1]` (defaults: base 360,
//! block 20). Reservations are checked pairwise for overlap before
//! persisting. Story assignment prefers an explicit slot, falls back
//! to the first free number in the epic's range, and records every
//! observed collision. Renumber operations keep the old key
//! resolvable through the renumbering history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};
use crate::store::{StateFile, StateStore};

/// A contiguous reserved window of tracker numbers for one epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpicRange {
    pub epic_number: u32,
    pub start: i64,
    pub end: i64,
}

impl EpicRange {
    #[must_use]
    pub const fn contains(self, number: i64) -> bool {
        self.start <= number && number <= self.end
    }

    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

/// Persisted epic reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicReservation {
    pub epic_number: u32,
    pub base: i64,
    pub range: [i64; 2],
    pub reserved_count: i64,
    pub reserved_at: DateTime<Utc>,
}

/// Persisted story number assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryAssignment {
    pub tracker_number: i64,
    pub epic_number: u32,
    pub story_number: u32,
    pub assigned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_issue_key: Option<String>,
}

/// A recorded numbering collision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberConflict {
    pub number: i64,
    pub content_key: String,
    /// `already_assigned`, `remote_exists`, or `out_of_range`.
    pub conflict_type: String,
    pub details: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

/// One renumbering operation, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenumberMapping {
    pub old_key: String,
    pub new_key: String,
    pub old_epic: u32,
    pub old_story: u32,
    pub new_epic: u32,
    pub new_story: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_issue_id: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// `number_registry.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDoc {
    pub version: String,
    pub epic_base: i64,
    pub block_size: i64,
    #[serde(default)]
    pub epics: BTreeMap<String, EpicReservation>,
    #[serde(default)]
    pub stories: BTreeMap<String, StoryAssignment>,
    #[serde(default)]
    pub conflicts: Vec<NumberConflict>,
    #[serde(default)]
    pub renumbering_history: Vec<RenumberMapping>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for RegistryDoc {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            epic_base: 360,
            block_size: 20,
            epics: BTreeMap::new(),
            stories: BTreeMap::new(),
            conflicts: Vec::new(),
            renumbering_history: Vec::new(),
            last_updated: None,
        }
    }
}

/// Summary counters for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub epic_count: usize,
    pub story_count: usize,
    pub total_reserved_numbers: i64,
    pub conflict_count: usize,
    pub renumber_count: usize,
}

/// Numbering registry bound to one project's state store.
#[derive(Debug, Clone)]
pub struct NumberRegistry {
    store: StateStore,
    epic_base: i64,
    block_size: i64,
}

impl NumberRegistry {
    #[must_use]
    pub const fn new(store: StateStore, epic_base: i64, block_size: i64) -> Self {
        Self {
            store,
            epic_base,
            block_size,
        }
    }

    /// Deterministic range for an epic number.
    #[must_use]
    pub const fn calculate_epic_range(&self, epic_number: u32) -> EpicRange {
        let base = self.epic_base + (epic_number as i64 - 1) * self.block_size;
        EpicRange {
            epic_number,
            start: base,
            end: base + self.block_size - 1,
        }
    }

    /// Reserve an epic's range, rejecting any overlap with a
    /// different epic's existing reservation.
    ///
    /// # Errors
    ///
    /// `Numbering` on overlap; store errors otherwise.
    pub fn reserve_epic(&self, epic_number: u32) -> Result<EpicRange> {
        let range = self.calculate_epic_range(epic_number);
        self.store
            .mutate_doc(StateFile::NumberRegistry, |doc: &mut RegistryDoc| {
                doc.epic_base = self.epic_base;
                doc.block_size = self.block_size;

                let overlaps: Vec<String> = doc
                    .epics
                    .values()
                    .filter(|r| r.epic_number != epic_number)
                    .filter(|r| {
                        range.overlaps(EpicRange {
                            epic_number: r.epic_number,
                            start: r.range[0],
                            end: r.range[1],
                        })
                    })
                    .map(|r| format!("epic {} ({}-{})", r.epic_number, r.range[0], r.range[1]))
                    .collect();

                if !overlaps.is_empty() {
                    return Err(SyncError::Numbering(format!(
                        "epic {epic_number} range {}-{} conflicts with: {}",
                        range.start,
                        range.end,
                        overlaps.join(", ")
                    )));
                }

                doc.epics.insert(
                    epic_number.to_string(),
                    EpicReservation {
                        epic_number,
                        base: range.start,
                        range: [range.start, range.end],
                        reserved_count: self.block_size,
                        reserved_at: Utc::now(),
                    },
                );
                doc.last_updated = Some(Utc::now());
                Ok(range)
            })
    }

    /// All reserved ranges, sorted by epic number.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn reserved_ranges(&self) -> Result<Vec<EpicRange>> {
        let doc: RegistryDoc = self.store.read_doc(StateFile::NumberRegistry)?;
        let mut ranges: Vec<EpicRange> = doc
            .epics
            .values()
            .map(|r| EpicRange {
                epic_number: r.epic_number,
                start: r.range[0],
                end: r.range[1],
            })
            .collect();
        ranges.sort_by_key(|r| r.epic_number);
        Ok(ranges)
    }

    /// Assign a tracker number to a story with conflict detection.
    ///
    /// `preferred_slot` is the story position within the epic range
    /// (slot 1 → `start + story_offset + 1` style addressing is left
    /// to the caller; here the slot is an absolute number). The
    /// `remote_exists` probe reports whether the tracker already has
    /// an issue at a number; probes are only made for candidates that
    /// pass local checks.
    ///
    /// # Errors
    ///
    /// `Numbering` when the epic range has no free slot.
    pub fn assign_story_number(
        &self,
        content_key: &str,
        epic_number: u32,
        story_number: u32,
        preferred: Option<i64>,
        remote_exists: impl Fn(i64) -> bool,
    ) -> Result<StoryAssignment> {
        let range = self.calculate_epic_range(epic_number);
        self.store
            .mutate_doc(StateFile::NumberRegistry, |doc: &mut RegistryDoc| {
                if let Some(existing) = doc.stories.get(content_key) {
                    return Ok(existing.clone());
                }

                let assigned: Vec<i64> =
                    doc.stories.values().map(|a| a.tracker_number).collect();

                let mut chosen: Option<i64> = None;
                if let Some(preferred) = preferred {
                    if !range.contains(preferred) {
                        doc.conflicts.push(NumberConflict {
                            number: preferred,
                            content_key: content_key.to_string(),
                            conflict_type: "out_of_range".to_string(),
                            details: format!(
                                "preferred number {preferred} outside epic {epic_number} range {}-{}",
                                range.start, range.end
                            ),
                            detected_at: Utc::now(),
                            resolved: false,
                        });
                    } else if assigned.contains(&preferred) {
                        doc.conflicts.push(NumberConflict {
                            number: preferred,
                            content_key: content_key.to_string(),
                            conflict_type: "already_assigned".to_string(),
                            details: format!("preferred number {preferred} already assigned"),
                            detected_at: Utc::now(),
                            resolved: false,
                        });
                    } else if remote_exists(preferred) {
                        doc.conflicts.push(NumberConflict {
                            number: preferred,
                            content_key: content_key.to_string(),
                            conflict_type: "remote_exists".to_string(),
                            details: format!("tracker already has an issue at {preferred}"),
                            detected_at: Utc::now(),
                            resolved: false,
                        });
                    } else {
                        chosen = Some(preferred);
                    }
                }

                if chosen.is_none() {
                    chosen = (range.start..=range.end)
                        .find(|n| !assigned.contains(n) && !remote_exists(*n));
                }

                let Some(number) = chosen else {
                    return Err(SyncError::Numbering(format!(
                        "no available numbers in epic {epic_number} range {}-{}",
                        range.start, range.end
                    )));
                };

                let assignment = StoryAssignment {
                    tracker_number: number,
                    epic_number,
                    story_number,
                    assigned_at: Utc::now(),
                    tracker_issue_key: None,
                };
                doc.stories.insert(content_key.to_string(), assignment.clone());
                doc.last_updated = Some(Utc::now());
                Ok(assignment)
            })
    }

    /// Attach the tracker-issued key to a content key, creating a
    /// bare assignment when none exists (issues created directly by
    /// the tracker outside a reserved slot).
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn register_issue_key(&self, content_key: &str, issue_key: &str) -> Result<()> {
        self.store
            .mutate_doc(StateFile::NumberRegistry, |doc: &mut RegistryDoc| {
                let entry = doc.stories.entry(content_key.to_string()).or_insert_with(|| {
                    StoryAssignment {
                        tracker_number: 0,
                        epic_number: 0,
                        story_number: 0,
                        assigned_at: Utc::now(),
                        tracker_issue_key: None,
                    }
                });
                entry.tracker_issue_key = Some(issue_key.to_string());
                doc.last_updated = Some(Utc::now());
                Ok(())
            })
    }

    /// Tracker issue key for a content key, following the renumber
    /// history when the key was renamed.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn issue_key(&self, content_key: &str) -> Result<Option<String>> {
        let doc: RegistryDoc = self.store.read_doc(StateFile::NumberRegistry)?;
        if let Some(entry) = doc.stories.get(content_key) {
            if entry.tracker_issue_key.is_some() {
                return Ok(entry.tracker_issue_key.clone());
            }
        }
        // Old keys stay resolvable through the renumber history.
        if let Some(mapping) = doc
            .renumbering_history
            .iter()
            .rev()
            .find(|m| m.old_key == content_key)
        {
            if let Some(entry) = doc.stories.get(&mapping.new_key) {
                return Ok(entry.tracker_issue_key.clone());
            }
            return Ok(mapping.tracker_issue_id.clone());
        }
        Ok(None)
    }

    /// Move an assignment to a new key/slot and record the mapping.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn renumber(&self, mapping: RenumberMapping) -> Result<()> {
        self.store
            .mutate_doc(StateFile::NumberRegistry, |doc: &mut RegistryDoc| {
                let prior = doc.stories.remove(&mapping.old_key);
                let number = i64::from(mapping.new_story);
                doc.stories.insert(
                    mapping.new_key.clone(),
                    StoryAssignment {
                        tracker_number: number,
                        epic_number: mapping.new_epic,
                        story_number: mapping.new_story,
                        assigned_at: Utc::now(),
                        tracker_issue_key: mapping
                            .tracker_issue_id
                            .clone()
                            .or_else(|| prior.and_then(|p| p.tracker_issue_key)),
                    },
                );
                doc.renumbering_history.push(mapping);
                doc.last_updated = Some(Utc::now());
                Ok(())
            })
    }

    /// Registry counters.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn stats(&self) -> Result<RegistryStats> {
        let doc: RegistryDoc = self.store.read_doc(StateFile::NumberRegistry)?;
        Ok(RegistryStats {
            epic_count: doc.epics.len(),
            story_count: doc.stories.len(),
            total_reserved_numbers: doc.epics.values().map(|r| r.reserved_count).sum(),
            conflict_count: doc.conflicts.len(),
            renumber_count: doc.renumbering_history.len(),
        })
    }
}
