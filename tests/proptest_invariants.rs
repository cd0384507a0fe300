//! Property tests for the pipeline's core laws: hash stability,
//! diff completeness, numbering non-overlap, and backoff bounds.

use bmad_sync::model::{ContentIndex, StoryEntry};
use bmad_sync::numbering::NumberRegistry;
use bmad_sync::store::StateStore;
use bmad_sync::tracker::TrackerCli;
use bmad_sync::util::hash::{content_hash, normalize_content};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

fn entry(hash: &str) -> StoryEntry {
    StoryEntry {
        file: "x.md".to_string(),
        hash: hash.to_string(),
        title: None,
        epic: None,
        story: None,
        status: None,
        last_modified: None,
    }
}

fn index_from(hashes: &BTreeMap<String, String>) -> ContentIndex {
    ContentIndex {
        stories: hashes.iter().map(|(k, h)| (k.clone(), entry(h))).collect(),
        ..ContentIndex::default()
    }
}

proptest! {
    #[test]
    fn normalize_is_idempotent(content in ".{0,400}") {
        let once = normalize_content(&content);
        prop_assert_eq!(normalize_content(&once), once);
    }

    #[test]
    fn hash_ignores_line_ending_style(lines in proptest::collection::vec("[a-z ]{0,20}", 0..10)) {
        let lf = lines.join("\n");
        let crlf = lines.join("\r\n");
        prop_assert_eq!(content_hash(&lf), content_hash(&crlf));
    }

    #[test]
    fn hash_is_function_of_normalized_bytes(a in ".{0,200}", b in ".{0,200}") {
        let equal_normalized = normalize_content(&a) == normalize_content(&b);
        let equal_hashes = content_hash(&a) == content_hash(&b);
        // Same normal form always means same hash; differing hashes
        // always mean differing normal forms.
        if equal_normalized {
            prop_assert!(equal_hashes);
        }
        if !equal_hashes {
            prop_assert!(!equal_normalized);
        }
    }

    #[test]
    fn diff_partitions_key_union(
        prev in proptest::collection::btree_map("[a-z]{1,6}", "[0-9a-f]{4}", 0..12),
        cur in proptest::collection::btree_map("[a-z]{1,6}", "[0-9a-f]{4}", 0..12),
    ) {
        let previous = index_from(&prev);
        let current = index_from(&cur);
        let changes = bmad_sync::discovery::diff_story_keys(&previous, &current);

        let mut classified = BTreeSet::new();
        for key in changes.added.iter().chain(&changes.modified).chain(&changes.deleted) {
            // No key may be classified twice.
            prop_assert!(classified.insert(key.clone()), "duplicate classification: {key}");
        }

        for key in prev.keys().chain(cur.keys()) {
            let in_prev = prev.contains_key(key);
            let in_cur = cur.contains_key(key);
            let expected = match (in_prev, in_cur) {
                (false, true) => Some("added"),
                (true, false) => Some("deleted"),
                (true, true) if prev[key] != cur[key] => Some("modified"),
                _ => None,
            };
            match expected {
                Some("added") => prop_assert!(changes.added.contains(key)),
                Some("deleted") => prop_assert!(changes.deleted.contains(key)),
                Some("modified") => prop_assert!(changes.modified.contains(key)),
                _ => prop_assert!(!classified.contains(key)),
            }
        }
    }

    #[test]
    fn reserved_epic_ranges_never_overlap(epics in proptest::collection::btree_set(1u32..40, 1..8)) {
        let temp = tempfile::TempDir::new().unwrap();
        let store = StateStore::open(temp.path().join(".sync")).unwrap();
        let registry = NumberRegistry::new(store, 360, 20);

        for epic in &epics {
            registry.reserve_epic(*epic).unwrap();
        }
        let ranges = registry.reserved_ranges().unwrap();
        for a in &ranges {
            for b in &ranges {
                if a.epic_number != b.epic_number {
                    prop_assert!(!a.overlaps(*b), "{a:?} overlaps {b:?}");
                }
            }
        }
    }

    #[test]
    fn backoff_doubles_from_base(base_ms in 1u64..500, attempt in 0u32..8) {
        let cli = TrackerCli::with_settings(
            "linctl",
            3,
            Duration::from_millis(base_ms),
            Duration::from_secs(30),
        );
        let expected = Duration::from_millis(base_ms) * 2u32.pow(attempt);
        prop_assert_eq!(cli.backoff_delay(attempt), expected);
    }
}
