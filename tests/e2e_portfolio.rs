//! Portfolio flows: register/list, parallel sync aggregation, and
//! per-project failure isolation.

mod common;

use common::{SyncWorkspace, write_stub_tracker};
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn scaffold_second_project(ws: &SyncWorkspace, name: &str) -> std::path::PathBuf {
    let root = ws.dir.path().join(name);
    ws.scaffold_project(&root);
    root
}

fn write_story(root: &Path, file: &str, header: &str) {
    fs::write(
        root.join("docs-bmad").join("stories").join(file),
        format!("# Story {header}\nStatus: drafted\n\n## Acceptance Criteria\n1. works\n"),
    )
    .unwrap();
}

#[test]
fn e2e_portfolio_register_and_list() {
    let ws = SyncWorkspace::new();

    ws.bmsync()
        .args(["portfolio", "register"])
        .arg(ws.root())
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered 'project'"));

    ws.bmsync()
        .args(["portfolio", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("project"));
}

#[test]
fn e2e_portfolio_register_rejects_plain_directory() {
    let ws = SyncWorkspace::new();
    let plain = ws.dir.path().join("plain");
    fs::create_dir_all(&plain).unwrap();

    ws.bmsync()
        .args(["portfolio", "register"])
        .arg(&plain)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a BMAD sync project"));
}

#[test]
fn e2e_portfolio_sync_aggregates_failures() {
    let ws = SyncWorkspace::new();
    write_story(&ws.root(), "1-1-a.md", "1.1: A");
    write_story(&ws.root(), "1-2-b.md", "1.2: B");
    write_story(&ws.root(), "1-3-c.md", "1.3: C");

    let beta = scaffold_second_project(&ws, "beta");
    write_story(&beta, "1-1-x.md", "1.1: X");
    write_story(&beta, "1-2-poison.md", "1.2: Poison");
    // The second tracker call for beta fails permanently.
    ws.fail_tracker_on("STORY: Poison");

    for project in [ws.root(), beta.clone()] {
        ws.bmsync()
            .args(["portfolio", "register"])
            .arg(&project)
            .assert()
            .success();
    }

    let beta_state_before = snapshot_state_files(&beta);

    ws.bmsync()
        .args(["portfolio", "sync", "--workers", "2"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Projects: 1/2 successful"));

    // Project A applied everything and persisted its index.
    assert!(ws.root().join(".sync/state/content_index.json").exists());

    // Project B rolled back: its state file set matches pre-apply.
    let beta_state_after = snapshot_state_files(&beta);
    assert_eq!(beta_state_before, beta_state_after);
}

fn snapshot_state_files(root: &Path) -> Vec<(String, Vec<u8>)> {
    let state_dir = root.join(".sync").join("state");
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(&state_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_file())
                .filter(|e| {
                    // The report is expected to change on every run.
                    e.file_name() != *"sync_report.json"
                })
                .map(|e| {
                    (
                        e.file_name().to_string_lossy().to_string(),
                        fs::read(e.path()).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

#[test]
fn e2e_portfolio_dry_run_exit_zero() {
    let ws = SyncWorkspace::new();
    write_story(&ws.root(), "1-1-a.md", "1.1: A");
    ws.bmsync()
        .args(["portfolio", "register"])
        .arg(ws.root())
        .assert()
        .success();

    ws.bmsync()
        .args(["portfolio", "sync", "--dry-run", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"successful_projects\": 1"))
        .stdout(predicate::str::contains("\"total_applied\": 0"));
}

#[test]
fn e2e_portfolio_monitor_shows_projects() {
    let ws = SyncWorkspace::new();
    ws.bmsync()
        .args(["portfolio", "register"])
        .arg(ws.root())
        .assert()
        .success();

    ws.bmsync()
        .args(["portfolio", "monitor"])
        .assert()
        .success()
        .stdout(predicate::str::contains("last_sync=never"));
}

#[test]
fn e2e_portfolio_monitor_analytics_after_sync() {
    let ws = SyncWorkspace::new();
    write_story(&ws.root(), "1-1-a.md", "1.1: A");
    ws.bmsync()
        .args(["portfolio", "register"])
        .arg(ws.root())
        .assert()
        .success();

    ws.bmsync().args(["portfolio", "sync"]).assert().success();

    // One clean applied sync: full health, one sync, one operation.
    ws.bmsync()
        .args(["portfolio", "monitor", "--analytics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Portfolio health: 100/100"))
        .stdout(predicate::str::contains("Syncs: 1"))
        .stdout(predicate::str::contains("error rate 0.00%"));

    ws.bmsync()
        .args(["portfolio", "monitor", "--analytics", "--days", "7", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"portfolio_health_score\": 100"))
        .stdout(predicate::str::contains("\"total_operations\": 1"))
        .stdout(predicate::str::contains("\"period_days\": 7"));
}

#[test]
fn e2e_portfolio_selected_unknown_key_is_empty() {
    let ws = SyncWorkspace::new();
    ws.bmsync()
        .args(["portfolio", "sync", "--projects", "ghost", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_projects\": 0"));
}

#[test]
fn e2e_isolated_trackers_per_project() {
    // Two projects sharing one stub still count independently; this
    // guards the executor against cross-project state bleed.
    let ws = SyncWorkspace::new();
    write_story(&ws.root(), "1-1-a.md", "1.1: A");
    let beta = scaffold_second_project(&ws, "beta");
    write_story(&beta, "1-1-x.md", "1.1: X");
    write_stub_tracker(&ws.stub_path(), &ws.stub_state_dir());

    for project in [ws.root(), beta.clone()] {
        ws.bmsync()
            .args(["portfolio", "register"])
            .arg(&project)
            .assert()
            .success();
    }

    ws.bmsync()
        .args(["portfolio", "sync", "--workers", "2", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"successful_projects\": 2"))
        .stdout(predicate::str::contains("\"total_applied\": 2"));

    // Both projects hold a registration for their own story.
    assert!(ws.root().join(".sync/state/hierarchy.json").exists());
    assert!(beta.join(".sync/state/hierarchy.json").exists());
}
