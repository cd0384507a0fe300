//! Subprocess wrapper for the external tracker CLI.
//!
//! The tracker binary (`linctl` by default) is the only component
//! that performs network I/O. The wrapper:
//! - invokes it with argument lists, never a shell
//! - probes installation and authentication lazily, with remediation
//!   hints in the error text
//! - retries transient failures (output matching
//!   `rate limit|timeout|network`, case-insensitive) with exponential
//!   backoff `base · 2^k`, up to `max_retries`
//! - enforces a per-invocation timeout (default 30 s) by polling the
//!   child and killing it on expiry
//! - parses stdout as JSON when possible, else returns
//!   `{"output": <raw>}`
//! - memoises `--help` capability probes and silently disables
//!   unsupported features, with a log

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

static TRANSIENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate limit|timeout|network").expect("valid regex"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Payload for `issue create`.
#[derive(Debug, Clone, Default)]
pub struct CreatePayload {
    pub title: String,
    pub team: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub project: Option<String>,
    pub labels: Vec<String>,
}

/// Payload for `issue update`.
#[derive(Debug, Clone, Default)]
pub struct UpdatePayload {
    pub description: Option<String>,
    pub state: Option<String>,
    pub priority: Option<i64>,
    pub project: Option<String>,
    pub parent_id: Option<String>,
    /// Replace-all label set; used only when the CLI lacks
    /// add/remove-label flags.
    pub set_labels: Option<Vec<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
}

struct CmdOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

/// Wrapper around the external tracker CLI.
#[derive(Debug)]
pub struct TrackerCli {
    binary: String,
    max_retries: u32,
    retry_base: Duration,
    invoke_timeout: Duration,
    version_checked: Mutex<bool>,
    capabilities: Mutex<BTreeMap<&'static str, bool>>,
}

impl TrackerCli {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_settings(binary, 3, Duration::from_secs(1), DEFAULT_TIMEOUT)
    }

    #[must_use]
    pub fn with_settings(
        binary: impl Into<String>,
        max_retries: u32,
        retry_base: Duration,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            max_retries,
            retry_base,
            invoke_timeout,
            version_checked: Mutex::new(false),
            capabilities: Mutex::new(BTreeMap::new()),
        }
    }

    /// Backoff delay before retry attempt `k` (0-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
    }

    fn install_hint(&self) -> String {
        format!(
            "'{bin}' not found in PATH.\nInstall the tracker CLI and ensure '{bin} --version' works.",
            bin = self.binary
        )
    }

    /// Verify the binary is runnable; memoised after first success.
    ///
    /// # Errors
    ///
    /// `TrackerUnavailable` with an installation hint.
    pub fn check_installation(&self) -> Result<String> {
        {
            let checked = self.version_checked.lock().expect("lock poisoned");
            if *checked {
                return Ok(String::new());
            }
        }
        let output = self.run_command(&["--version".to_string()], Duration::from_secs(5))?;
        if output.timed_out {
            return Err(SyncError::TrackerUnavailable {
                message: format!("'{} --version' timed out; check the installation", self.binary),
            });
        }
        if output.code != Some(0) {
            return Err(SyncError::TrackerUnavailable {
                message: self.install_hint(),
            });
        }
        *self.version_checked.lock().expect("lock poisoned") = true;
        Ok(output.stdout.trim().to_string())
    }

    /// Verify tracker authentication via `user me`.
    ///
    /// # Errors
    ///
    /// `TrackerUnavailable` with setup instructions when no
    /// credential source exists, `TrackerPermanent` when the probe
    /// call fails.
    pub fn validate_auth(&self) -> Result<Value> {
        self.check_installation()?;

        let auth_file = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(format!(".{}-auth.json", self.binary)))
            .ok();
        let has_api_key = std::env::var("LINEAR_API_KEY").is_ok();
        let has_auth_file = auth_file.as_ref().is_some_and(|p| p.exists());

        if !has_api_key && !has_auth_file {
            return Err(SyncError::TrackerUnavailable {
                message: format!(
                    "tracker authentication not configured.\n\
                     Options:\n\
                     1. export LINEAR_API_KEY='your-api-key'\n\
                     2. run '{} auth'",
                    self.binary
                ),
            });
        }

        let user = self.exec_with_retries(&["user".to_string(), "me".to_string()], 1)?;
        if user.get("id").and_then(Value::as_str).is_some() {
            Ok(user)
        } else {
            Err(SyncError::TrackerPermanent {
                message: "authentication failed: invalid response from tracker".to_string(),
            })
        }
    }

    /// Execute a tracker command with default retries.
    ///
    /// # Errors
    ///
    /// `TrackerTransient` when transient failures exhaust the retry
    /// budget, `TrackerPermanent` otherwise.
    pub fn exec(&self, args: &[String]) -> Result<Value> {
        self.exec_with_retries(args, self.max_retries)
    }

    fn exec_with_retries(&self, args: &[String], retries: u32) -> Result<Value> {
        let cmd_display = format!("{} {}", self.binary, args.join(" "));

        for attempt in 0..=retries {
            debug!(cmd = %cmd_display, attempt = attempt + 1, "tracker exec");
            let output = self.run_command(args, self.invoke_timeout)?;

            if output.timed_out {
                if attempt < retries {
                    let delay = self.backoff_delay(attempt);
                    warn!(cmd = %cmd_display, ?delay, "tracker timeout, retrying");
                    std::thread::sleep(delay);
                    continue;
                }
                return Err(SyncError::TrackerTransient {
                    message: format!(
                        "command timed out after {}s: {cmd_display}",
                        self.invoke_timeout.as_secs()
                    ),
                });
            }

            if output.code == Some(0) {
                return Ok(serde_json::from_str(&output.stdout).unwrap_or_else(|_| {
                    serde_json::json!({ "output": output.stdout.trim() })
                }));
            }

            let message = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };

            if TRANSIENT.is_match(&message) {
                if attempt < retries {
                    let delay = self.backoff_delay(attempt);
                    warn!(cmd = %cmd_display, error = %message, ?delay, "tracker transient failure, retrying");
                    std::thread::sleep(delay);
                    continue;
                }
                return Err(SyncError::TrackerTransient {
                    message: format!("{cmd_display}: {message}"),
                });
            }

            return Err(SyncError::TrackerPermanent {
                message: format!("{cmd_display}: {message}"),
            });
        }

        unreachable!("retry loop always returns")
    }

    fn run_command(&self, args: &[String], timeout: Duration) -> Result<CmdOutput> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SyncError::TrackerUnavailable {
                message: format!("{}\n({e})", self.install_hint()),
            })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        // Readers on their own threads so a wedged child cannot block
        // the engine past the timeout.
        let out_handle = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = std::io::BufReader::new(stdout).read_to_string(&mut buf);
            buf
        });
        let err_handle = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = std::io::BufReader::new(stderr).read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait()? {
                Some(status) => {
                    return Ok(CmdOutput {
                        code: status.code(),
                        stdout: out_handle.join().unwrap_or_default(),
                        stderr: err_handle.join().unwrap_or_default(),
                        timed_out: false,
                    });
                }
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(CmdOutput {
                        code: None,
                        stdout: out_handle.join().unwrap_or_default(),
                        stderr: err_handle.join().unwrap_or_default(),
                        timed_out: true,
                    });
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    // ---- capability probes ----

    fn capability(&self, key: &'static str, probe_args: &[&str], needle: &[&str]) -> bool {
        {
            let cache = self.capabilities.lock().expect("lock poisoned");
            if let Some(&cached) = cache.get(key) {
                return cached;
            }
        }
        let args: Vec<String> = probe_args.iter().map(ToString::to_string).collect();
        let supported = self
            .run_command(&args, PROBE_TIMEOUT)
            .ok()
            .filter(|o| !o.timed_out)
            .is_some_and(|o| needle.iter().any(|n| o.stdout.contains(n)));
        if !supported {
            debug!(capability = key, "tracker feature unsupported, disabling");
        }
        self.capabilities
            .lock()
            .expect("lock poisoned")
            .insert(key, supported);
        supported
    }

    /// `issue create --label` supported?
    #[must_use]
    pub fn supports_create_labels(&self) -> bool {
        self.capability("create_labels", &["issue", "create", "--help"], &["--label"])
    }

    /// `issue update --add-label/--remove-label` supported?
    #[must_use]
    pub fn supports_update_label_sets(&self) -> bool {
        self.capability(
            "update_label_sets",
            &["issue", "update", "--help"],
            &["--add-label", "--remove-label"],
        )
    }

    /// `issue update --label` (replace-all) supported?
    #[must_use]
    pub fn supports_update_set_labels(&self) -> bool {
        self.capability("update_set_labels", &["issue", "update", "--help"], &["--label"])
    }

    /// `issue update --parent` supported?
    #[must_use]
    pub fn supports_update_parent(&self) -> bool {
        self.capability("update_parent", &["issue", "update", "--help"], &["--parent"])
    }

    // ---- tracker operations ----

    /// Fetch one issue, unwrapping the `{"issue": ...}` envelope some
    /// CLI versions produce.
    ///
    /// # Errors
    ///
    /// Tracker errors after the retry budget.
    pub fn issue_get(&self, issue_id: &str) -> Result<Value> {
        self.check_installation()?;
        let result = self.exec(&[
            "issue".to_string(),
            "get".to_string(),
            issue_id.to_string(),
        ])?;
        Ok(match result {
            Value::Object(mut map) if map.contains_key("issue") => {
                map.remove("issue").unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    /// Create an issue.
    ///
    /// # Errors
    ///
    /// `TrackerPermanent` for a payload missing title/team; tracker
    /// errors otherwise.
    pub fn issue_create(&self, payload: &CreatePayload) -> Result<Value> {
        self.check_installation()?;
        if payload.title.trim().is_empty() {
            return Err(SyncError::TrackerPermanent {
                message: "issue create requires a title".to_string(),
            });
        }
        if payload.team.trim().is_empty() {
            return Err(SyncError::TrackerPermanent {
                message: "issue create requires a team".to_string(),
            });
        }

        let mut args = vec![
            "issue".to_string(),
            "create".to_string(),
            "--title".to_string(),
            payload.title.clone(),
            "--team".to_string(),
            payload.team.clone(),
        ];
        if let Some(description) = &payload.description {
            args.push("--description".to_string());
            args.push(description.clone());
        }
        if let Some(priority) = payload.priority {
            args.push("--priority".to_string());
            args.push(priority.to_string());
        }
        if let Some(project) = &payload.project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        if !payload.labels.is_empty() && self.supports_create_labels() {
            for label in &payload.labels {
                args.push("--label".to_string());
                args.push(label.clone());
            }
        }

        self.exec(&args)
    }

    /// Update an issue. Label changes prefer add/remove semantics;
    /// when the CLI only advertises `--label` the set path is used,
    /// and without either, label intents are skipped.
    ///
    /// # Errors
    ///
    /// Tracker errors after the retry budget.
    pub fn issue_update(&self, issue_id: &str, payload: &UpdatePayload) -> Result<Value> {
        self.check_installation()?;
        let mut args = vec![
            "issue".to_string(),
            "update".to_string(),
            issue_id.to_string(),
        ];
        if let Some(description) = &payload.description {
            args.push("--description".to_string());
            args.push(description.clone());
        }
        if let Some(state) = &payload.state {
            args.push("--state".to_string());
            args.push(state.clone());
        }
        if let Some(priority) = payload.priority {
            args.push("--priority".to_string());
            args.push(priority.to_string());
        }
        if let Some(project) = &payload.project {
            args.push("--project".to_string());
            args.push(project.clone());
        }
        if let Some(parent) = &payload.parent_id {
            if self.supports_update_parent() {
                args.push("--parent".to_string());
                args.push(parent.clone());
            }
        }

        let wants_labels = payload.set_labels.is_some()
            || !payload.add_labels.is_empty()
            || !payload.remove_labels.is_empty();
        if wants_labels {
            if self.supports_update_label_sets() {
                for label in &payload.add_labels {
                    args.push("--add-label".to_string());
                    args.push(label.clone());
                }
                for label in &payload.remove_labels {
                    args.push("--remove-label".to_string());
                    args.push(label.clone());
                }
                if let Some(set) = &payload.set_labels {
                    for label in set {
                        args.push("--add-label".to_string());
                        args.push(label.clone());
                    }
                }
            } else if self.supports_update_set_labels() {
                let set = payload
                    .set_labels
                    .clone()
                    .unwrap_or_else(|| payload.add_labels.clone());
                for label in &set {
                    args.push("--label".to_string());
                    args.push(label.clone());
                }
            } else {
                debug!(issue_id, "label update unsupported by tracker CLI, skipping");
            }
        }

        self.exec(&args)
    }

    /// `team list`, unwrapped to the team array.
    ///
    /// # Errors
    ///
    /// Tracker errors after the retry budget.
    pub fn list_teams(&self) -> Result<Vec<Value>> {
        self.check_installation()?;
        let result = self.exec(&["team".to_string(), "list".to_string()])?;
        Ok(result
            .get("teams")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// `project list --team <team>`, unwrapped to the project array.
    ///
    /// # Errors
    ///
    /// Tracker errors after the retry budget.
    pub fn list_projects(&self, team: &str) -> Result<Vec<Value>> {
        self.check_installation()?;
        let result = self.exec(&[
            "project".to_string(),
            "list".to_string(),
            "--team".to_string(),
            team.to_string(),
        ])?;
        Ok(result
            .get("projects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Whether an issue exists at `<prefix>-<number>`.
    #[must_use]
    pub fn issue_number_exists(&self, team_prefix: &str, number: i64) -> bool {
        self.issue_get(&format!("{team_prefix}-{number}")).is_ok()
    }
}

/// Tracker binary name: `BMAD_TRACKER_BIN` override, else `linctl`.
#[must_use]
pub fn tracker_binary() -> String {
    std::env::var("BMAD_TRACKER_BIN").unwrap_or_else(|_| "linctl".to_string())
}

/// Pull the human key (`RAE-361`) and UUID out of a create response,
/// tolerating the `{"issue": ...}` envelope. The human key is
/// preferred for subsequent calls.
#[must_use]
pub fn extract_issue_ids(result: &Value) -> (Option<String>, Option<String>) {
    let inner = result.get("issue").unwrap_or(result);
    let key = inner
        .get("key")
        .or_else(|| inner.get("identifier"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let uuid = inner
        .get("id")
        .or_else(|| inner.get("uuid"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    (key, uuid)
}
