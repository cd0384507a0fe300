//! Conflict detection and automated resolution, driven through the
//! library against the stub tracker.

mod common;

use bmad_sync::conflict::ConflictResolver;
use bmad_sync::conflict::rules::RulesEngine;
use bmad_sync::engine::{CancelToken, SyncEngine, SyncOptions};
use bmad_sync::mapper::{MapContext, StateMapper};
use bmad_sync::model::ResolutionStrategy;
use bmad_sync::store::StateStore;
use bmad_sync::tracker::TrackerCli;
use chrono::{Duration, Utc};
use common::SyncWorkspace;
use std::sync::Arc;

fn engine_for(ws: &SyncWorkspace, options: SyncOptions) -> SyncEngine {
    let tracker = Arc::new(TrackerCli::new(
        ws.stub_path().to_string_lossy().to_string(),
    ));
    SyncEngine::new(&ws.root(), options, tracker).unwrap()
}

#[test]
fn e2e_conflict_detected_and_auto_resolved() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");

    // First apply establishes last_sync and the RAE-360 mapping.
    let engine = engine_for(&ws, SyncOptions::default());
    let run = engine.run(&CancelToken::new(), None).unwrap();
    assert_eq!(run.operations_applied, 1);

    // Locally the story moves to review...
    let story = ws.docs().join("stories").join("1-360-setup.md");
    let body = std::fs::read_to_string(&story)
        .unwrap()
        .replace("Status: drafted", "Status: review");
    std::fs::write(&story, body).unwrap();

    // ...while the tracker reports Done, updated after last_sync.
    let remote_updated = (Utc::now() + Duration::hours(1)).to_rfc3339();
    ws.set_issue_response(&format!(
        r#"{{"key": "RAE-360", "state": "Done", "updatedAt": "{remote_updated}"}}"#
    ));

    let engine = engine_for(&ws, SyncOptions::default());
    let index = bmad_sync::discovery::ContentDiscovery::new(ws.docs())
        .discover_all(None)
        .unwrap();
    let conflicted = engine.detect_and_record_conflicts(&index).unwrap();
    assert_eq!(conflicted, vec!["1-360-setup"]);

    let store = StateStore::open_project(&ws.root()).unwrap();
    let pending = store.pending_conflicts().unwrap();
    assert_eq!(pending.len(), 1);
    let conflict = &pending[0];
    assert_eq!(conflict.local_state, "review");
    assert_eq!(conflict.remote_state, "Done");

    // The done-vs-review rule resolves it remote-side at >= 0.85.
    let mapper = StateMapper::load_or_init(&ws.root().join(".sync/config")).unwrap();
    let rules = RulesEngine::load(&ws.root().join(".sync/config/custom_rules.yaml")).unwrap();
    let resolver = ConflictResolver::new(store.clone(), mapper, rules).unwrap();

    let outcome = resolver
        .auto_resolve(conflict, MapContext::default())
        .unwrap()
        .expect("auto-resolvable");
    assert_eq!(outcome.strategy, ResolutionStrategy::KeepRemote);
    assert_eq!(outcome.resolved_state, "done");

    resolver.apply_resolution(&outcome, conflict, 5.0).unwrap();
    assert!(store.pending_conflicts().unwrap().is_empty());
    let history = store.resolution_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].after_state, "done");
}

#[test]
fn e2e_no_conflict_when_remote_unchanged_since_sync() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");

    let engine = engine_for(&ws, SyncOptions::default());
    engine.run(&CancelToken::new(), None).unwrap();

    // Local change, but the tracker timestamp predates last_sync.
    let story = ws.docs().join("stories").join("1-360-setup.md");
    let body = std::fs::read_to_string(&story)
        .unwrap()
        .replace("Status: drafted", "Status: review");
    std::fs::write(&story, body).unwrap();

    let stale = (Utc::now() - Duration::hours(6)).to_rfc3339();
    ws.set_issue_response(&format!(
        r#"{{"key": "RAE-360", "state": "Done", "updatedAt": "{stale}"}}"#
    ));

    let engine = engine_for(&ws, SyncOptions::default());
    let index = bmad_sync::discovery::ContentDiscovery::new(ws.docs())
        .discover_all(None)
        .unwrap();
    assert!(engine.detect_and_record_conflicts(&index).unwrap().is_empty());
}

#[test]
fn e2e_three_way_merge_prefers_unchanged_side() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "ready-for-dev");

    let store = StateStore::open_project(&ws.root()).unwrap();
    store
        .log_state_change(
            bmad_sync::model::StateChange {
                content_key: "1-1-setup".to_string(),
                from_state: "drafted".to_string(),
                to_state: "ready-for-dev".to_string(),
                timestamp: Utc::now() - Duration::days(1),
                source: bmad_sync::model::ChangeSource::Local,
                operation: "sync".to_string(),
                user: None,
                content_type: bmad_sync::model::ContentType::Story,
            },
            90,
        )
        .unwrap();

    let mapper = StateMapper::load_or_init(&ws.root().join(".sync/config")).unwrap();
    let rules = RulesEngine::load(&ws.root().join(".sync/config/custom_rules.yaml")).unwrap();
    let resolver = ConflictResolver::new(store, mapper, rules).unwrap();

    // Local review vs remote Todo; with the context file present,
    // Todo maps back to ready-for-dev == ancestor, so local wins.
    let conflict = bmad_sync::model::StateConflict {
        conflict_id: "c-test".to_string(),
        content_key: "1-1-setup".to_string(),
        conflict_type: "state_mismatch".to_string(),
        local_state: "review".to_string(),
        local_updated: Utc::now(),
        remote_state: "Todo".to_string(),
        remote_updated: Utc::now() - Duration::hours(1),
        detected_at: Utc::now(),
        resolved: false,
    };
    let (three_way, recommendation) = resolver
        .three_way(
            &conflict,
            MapContext {
                has_context_file: true,
            },
        )
        .unwrap();
    assert_eq!(three_way.ancestor_state.as_deref(), Some("ready-for-dev"));
    assert_eq!(recommendation.strategy, ResolutionStrategy::KeepLocal);
    assert!((recommendation.confidence - 0.9).abs() < f64::EPSILON);
}
