//! Rollback command flows.

mod common;

use common::SyncWorkspace;
use predicates::prelude::*;

#[test]
fn e2e_rollback_without_backups_fails() {
    let ws = SyncWorkspace::new();
    ws.bmsync()
        .arg("rollback")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pre-sync backups"));
}

#[test]
fn e2e_rollback_preview_without_backups() {
    let ws = SyncWorkspace::new();
    ws.bmsync()
        .args(["rollback", "--preview"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No pre-sync backups available."));
}

#[test]
fn e2e_rollback_restores_snapshot_bytes() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-setup.md", "1.1: Setup", "drafted");

    // Successful apply leaves a pre-sync snapshot behind.
    ws.bmsync().arg("sync").assert().success();

    let index_path = ws.root().join(".sync/state/content_index.json");
    assert!(index_path.exists());

    // Preview names the snapshot.
    ws.bmsync()
        .args(["rollback", "--preview"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would restore snapshot"));

    // The snapshot predates the apply, so restoring removes the
    // freshly written index and registrations.
    ws.bmsync()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored"));
    assert!(!index_path.exists());
    assert!(!ws.exists(".sync/state/hierarchy.json"));
}

#[test]
fn e2e_rollback_after_failed_apply_restores_pre_failure_state() {
    let ws = SyncWorkspace::new();
    ws.write_story("1-1-good.md", "1.1: Good", "drafted");

    // First apply succeeds and persists state.
    ws.bmsync().arg("sync").assert().success();
    let good_state = std::fs::read(ws.root().join(".sync/state/sync_state.json")).unwrap();

    // Second apply fails: its own rollback restores the snapshot it
    // took at the start of the run.
    ws.write_story("1-2-bad.md", "1.2: Bad", "drafted");
    ws.fail_tracker_on("STORY: Bad");
    ws.bmsync().arg("sync").assert().code(2);

    let after_failure = std::fs::read(ws.root().join(".sync/state/sync_state.json")).unwrap();
    assert_eq!(good_state, after_failure);

    // An explicit rollback lands on the same snapshot.
    ws.bmsync().arg("rollback").assert().success();
    let after_rollback = std::fs::read(ws.root().join(".sync/state/sync_state.json")).unwrap();
    assert_eq!(good_state, after_rollback);
}
