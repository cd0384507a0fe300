//! Apply-mode flows against the stub tracker: the create path with
//! post-create renumbering, idempotency, and state updates.

mod common;

use common::SyncWorkspace;
use predicates::prelude::*;

#[test]
fn e2e_create_path_renumbers_files() {
    let ws = SyncWorkspace::new();
    ws.write_epic_context(1, "Bootstrap");
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");
    ws.write_sprint_status("development_status:\n  1-1-setup: drafted\n");

    ws.bmsync()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("created epic RAE-360 for epic-1"))
        .stdout(predicate::str::contains("created story RAE-361"));

    // Epic renamed and marked.
    assert!(!ws.exists("docs-bmad/epic-1-context.md"));
    let epic = ws.read("docs-bmad/epic-360-context.md");
    assert!(epic.contains("**Epic ID:** epic-1"));
    assert!(epic.contains("**Linear Epic:** RAE-360"));

    // Story renamed, marked, and cross-referenced.
    assert!(!ws.exists("docs-bmad/stories/1-1-setup.md"));
    let story = ws.read("docs-bmad/stories/360-361-setup.md");
    assert!(story.contains("**Linear Issue:** RAE-361"));
    assert!(story.contains("Status: drafted"));

    // Sprint-status key follows the rename.
    let sprint = ws.read("docs-bmad/sprint-status.yaml");
    assert!(sprint.contains("360-361-setup"));
    assert!(!sprint.contains("1-1-setup:"));

    // Index persisted for the next run.
    assert!(ws.exists(".sync/state/content_index.json"));
}

#[test]
fn e2e_second_sync_is_idempotent() {
    let ws = SyncWorkspace::new();
    ws.write_epic_context(1, "Bootstrap");
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");

    ws.bmsync().arg("sync").assert().success();

    ws.bmsync()
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"create\": 0"))
        .stdout(predicate::str::contains("\"update\": 0"));
}

#[test]
fn e2e_status_change_plans_update_with_labels() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");

    ws.bmsync().arg("sync").assert().success();

    // The lone story was created as RAE-360 and renamed to
    // 1-360-setup (no epic registered); flip its status.
    let renamed = std::fs::read_dir(ws.docs().join("stories"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .find(|n| n.ends_with("-setup.md"))
        .unwrap();
    let path = ws.docs().join("stories").join(&renamed);
    let updated = std::fs::read_to_string(&path)
        .unwrap()
        .replace("Status: drafted", "Status: ready-for-dev");
    std::fs::write(&path, updated).unwrap();

    ws.bmsync()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("updated RAE-360"));

    // The update call carried the mapped state and the label swap.
    let calls = ws.tracker_calls();
    let update_call = calls
        .iter()
        .rev()
        .find(|c| c.starts_with("issue update RAE-360"))
        .expect("update call recorded");
    assert!(update_call.contains("--state Todo"));
    assert!(update_call.contains("--add-label Contexted"));
    assert!(update_call.contains("--remove-label No Context"));
}

#[test]
fn e2e_create_sets_mapped_state_after_create() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "in-progress");

    ws.bmsync().arg("sync").assert().success();

    let calls = ws.tracker_calls();
    let created = calls.iter().any(|c| c.starts_with("issue create"));
    assert!(created);
    let state_update = calls
        .iter()
        .find(|c| c.starts_with("issue update RAE-360") && c.contains("--state In Progress"));
    assert!(state_update.is_some(), "post-create state update missing: {calls:?}");
}

#[test]
fn e2e_failed_apply_rolls_back_state() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-good.md", "1.1: Good", "drafted");
    ws.write_story("1-2-broken.md", "1.2: Broken", "drafted");
    ws.fail_tracker_on("STORY: Broken");

    ws.bmsync()
        .arg("sync")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("rollback: restored state"));

    // Snapshot restored: the content index was never persisted and
    // registrations from the successful operation are gone.
    assert!(!ws.exists(".sync/state/content_index.json"));
    assert!(!ws.exists(".sync/state/hierarchy.json"));

    // The report survives for post-mortem.
    assert!(ws.exists(".sync/state/sync_report.json"));
}

#[test]
fn e2e_no_temp_or_lock_litter_after_sync() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");
    ws.bmsync().arg("sync").assert().success();

    let stray: Vec<String> = walkdir::WalkDir::new(ws.root().join(".sync"))
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_string_lossy().to_string())
        .filter(|p| p.ends_with(".tmp") || p.ends_with(".lock"))
        .collect();
    assert!(stray.is_empty(), "temp/lock files left behind: {stray:?}");
}

#[test]
fn e2e_create_only_skips_registered_content() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");
    ws.bmsync().arg("sync").assert().success();

    // Touch the renamed story so a change exists.
    let renamed = std::fs::read_dir(ws.docs().join("stories"))
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "md"))
        .unwrap();
    let body = std::fs::read_to_string(&renamed).unwrap() + "\nMore.\n";
    std::fs::write(&renamed, body).unwrap();

    ws.bmsync()
        .args(["sync", "--create-only", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 0"));
}
