#![allow(dead_code)]

//! Shared fixtures: a scaffolded project workspace and a stub
//! tracker CLI the binary talks to instead of a real `linctl`.

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temp directory holding one BMAD project plus a stub tracker.
pub struct SyncWorkspace {
    pub dir: TempDir,
}

impl SyncWorkspace {
    /// Scaffold a project with config, docs tree, and stub tracker.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Self { dir };
        workspace.scaffold_project(&workspace.root());
        write_stub_tracker(&workspace.stub_path(), &workspace.stub_state_dir());
        workspace
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    pub fn docs(&self) -> PathBuf {
        self.root().join("docs-bmad")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join(".sync").join("state")
    }

    pub fn stub_path(&self) -> PathBuf {
        self.dir.path().join("tracker-stub")
    }

    pub fn stub_state_dir(&self) -> PathBuf {
        self.dir.path().join("tracker-state")
    }

    pub fn scaffold_project(&self, root: &Path) {
        fs::create_dir_all(root.join("docs-bmad").join("stories")).unwrap();
        fs::create_dir_all(root.join(".sync").join("config")).unwrap();
        fs::write(
            root.join(".sync").join("config").join("sync_config.yaml"),
            r"project:
  name: demo
linear:
  team_prefix: RAE
  team_name: Engineering
  project_name: Demo
numbering:
  epic_base: 360
  epic_block_size: 20
  story_offset: 0
sync:
  auto_sync: false
  preserve_linear_comments: true
",
        )
        .unwrap();
    }

    pub fn write_story(&self, name: &str, header: &str, status: &str) {
        fs::write(
            self.docs().join("stories").join(name),
            format!(
                "# Story {header}\nStatus: {status}\n\n## Acceptance Criteria\n1. it works\n"
            ),
        )
        .unwrap();
    }

    pub fn write_epic_context(&self, n: u32, title: &str) {
        fs::write(
            self.docs().join(format!("epic-{n}-context.md")),
            format!("# Epic {n}: {title}\n**Epic ID:** epic-{n}\n\n## Overview\ntext\n"),
        )
        .unwrap();
    }

    pub fn write_sprint_status(&self, body: &str) {
        fs::write(self.docs().join("sprint-status.yaml"), body).unwrap();
    }

    /// Make the stub fail permanently when its arguments contain the
    /// given needle.
    pub fn fail_tracker_on(&self, needle: &str) {
        fs::write(self.stub_state_dir().join("fail_on"), needle).unwrap();
    }

    /// Serve `issue get <id>` with this JSON body.
    pub fn set_issue_response(&self, body: &str) {
        fs::write(self.stub_state_dir().join("issue_get.json"), body).unwrap();
    }

    /// Every argv line the stub has received.
    pub fn tracker_calls(&self) -> Vec<String> {
        fs::read_to_string(self.stub_state_dir().join("calls.log"))
            .map(|raw| raw.lines().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// A `bmsync` command wired to this workspace.
    pub fn bmsync(&self) -> Command {
        let mut cmd = Command::cargo_bin("bmsync").expect("binary built");
        cmd.current_dir(self.root())
            .env("BMAD_TRACKER_BIN", self.stub_path())
            .env("BMAD_PROJECT_DIR", self.root())
            .env("BMAD_PORTFOLIO_DIR", self.dir.path().join("portfolio"))
            .env_remove("LINEAR_TEAM")
            .env_remove("LINEAR_PROJECT")
            .env_remove("BMAD_PROJECT_ROOT")
            .env_remove("BMAD_ROOT")
            .env_remove("BMAD_DOCS_BMAD")
            .env_remove("BMAD_STORIES_DIR");
        cmd
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }
}

/// Write a POSIX-shell tracker stub.
///
/// Behaviour:
/// - `--version` prints a version line
/// - `issue create --help` / `issue update --help` advertise label
///   flags
/// - `issue create ...` returns `{"key": "RAE-<n>"}` with `n`
///   counting up from 360
/// - `issue update <id> ...` echoes the id back
/// - `issue get <id>` serves `issue_get.json` when present, else
///   fails
/// - `user me` returns a user id
/// - when `fail_on` exists and the argv contains its content, the
///   call fails permanently
///
/// Every invocation is appended to `calls.log`.
pub fn write_stub_tracker(stub: &Path, state_dir: &Path) {
    fs::create_dir_all(state_dir).unwrap();
    fs::write(state_dir.join("counter"), "359").unwrap();

    let script = format!(
        r#"#!/bin/sh
STATE="{state}"
echo "$@" >> "$STATE/calls.log"

if [ -f "$STATE/fail_on" ]; then
    needle=$(cat "$STATE/fail_on")
    case "$*" in
        *"$needle"*)
            echo "invalid team for request" >&2
            exit 1
            ;;
    esac
fi

case "$1" in
    --version)
        echo "tracker-stub 1.0.0"
        exit 0
        ;;
    user)
        echo '{{"id": "user-1", "name": "Stub User"}}'
        exit 0
        ;;
    team)
        echo '{{"teams": [{{"key": "RAE", "name": "Engineering"}}]}}'
        exit 0
        ;;
    project)
        echo '{{"projects": [{{"id": "proj-1", "name": "Demo"}}]}}'
        exit 0
        ;;
esac

if [ "$1" = "issue" ]; then
    case "$2 $3" in
        "create --help")
            echo "usage: issue create --title --team [--label]"
            exit 0
            ;;
        "update --help")
            echo "usage: issue update <id> [--state --add-label --remove-label]"
            exit 0
            ;;
    esac
    case "$2" in
        create)
            n=$(cat "$STATE/counter")
            n=$((n + 1))
            echo "$n" > "$STATE/counter"
            echo "{{\"key\": \"RAE-$n\", \"id\": \"uuid-$n\"}}"
            exit 0
            ;;
        update)
            echo "{{\"key\": \"$3\"}}"
            exit 0
            ;;
        get)
            if [ -f "$STATE/issue_get.json" ]; then
                cat "$STATE/issue_get.json"
                exit 0
            fi
            echo "issue not found: $3" >&2
            exit 1
            ;;
    esac
fi

echo "unknown command: $@" >&2
exit 1
"#,
        state = state_dir.display()
    );
    fs::write(stub, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(stub, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
