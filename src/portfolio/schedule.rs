//! Host-scheduler (crontab) entries for automated portfolio syncs.
//!
//! Managed entries sit behind a stable marker comment so install and
//! removal are idempotent: every install first strips previously
//! managed lines, and removal of a schedule that does not exist is a
//! no-op.

use std::io::Write;
use std::process::{Command, Stdio};
use tracing::info;

use crate::error::{Result, SyncError};

/// Marker comment preceding every managed crontab line.
pub const CRON_MARKER: &str = "# bmad-sync portfolio";

const LOG_TARGET: &str = "/tmp/bmad-sync-portfolio.log";

/// Build the managed crontab command line.
#[must_use]
pub fn build_entry(cron_expr: &str, projects: &[String], workers: Option<usize>) -> String {
    let mut cmd = vec!["bmsync".to_string(), "portfolio".to_string(), "sync".to_string()];
    if !projects.is_empty() {
        cmd.push("--projects".to_string());
        cmd.extend(projects.iter().cloned());
    }
    if let Some(workers) = workers {
        cmd.push("--workers".to_string());
        cmd.push(workers.to_string());
    }
    format!("{cron_expr} {} >> {LOG_TARGET} 2>&1", cmd.join(" "))
}

/// Remove managed entries (marker line plus the line after it) from a
/// crontab body, keeping everything else intact.
#[must_use]
pub fn strip_managed_entries(lines: &[String]) -> Vec<String> {
    let mut kept = Vec::new();
    let mut skip_next = false;
    for line in lines {
        if line.trim() == CRON_MARKER {
            skip_next = true;
            continue;
        }
        if skip_next {
            skip_next = false;
            continue;
        }
        kept.push(line.clone());
    }
    kept
}

/// Managed entries currently present in a crontab body.
#[must_use]
pub fn managed_entries(lines: &[String]) -> Vec<String> {
    lines
        .windows(2)
        .filter(|w| w[0].trim() == CRON_MARKER)
        .map(|w| w[1].clone())
        .collect()
}

fn read_crontab() -> Vec<String> {
    Command::new("crontab")
        .arg("-l")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn write_crontab(lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }

    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| SyncError::Config(format!("cannot run crontab: {e}")))?;
    child
        .stdin
        .as_mut()
        .ok_or_else(|| SyncError::Config("crontab stdin unavailable".to_string()))?
        .write_all(body.as_bytes())?;
    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(SyncError::Config("failed to update crontab".to_string()))
    }
}

/// Install (or replace) the managed portfolio schedule.
///
/// # Errors
///
/// `Config` when the crontab cannot be updated.
pub fn install_schedule(
    cron_expr: &str,
    projects: &[String],
    workers: Option<usize>,
) -> Result<()> {
    let existing = read_crontab();
    let mut lines = strip_managed_entries(&existing);
    lines.push(CRON_MARKER.to_string());
    lines.push(build_entry(cron_expr, projects, workers));
    write_crontab(&lines)?;
    info!(cron = cron_expr, "portfolio schedule installed");
    Ok(())
}

/// Remove the managed schedule. Returns whether anything was removed;
/// removing an absent schedule succeeds.
///
/// # Errors
///
/// `Config` when the crontab cannot be updated.
pub fn remove_schedule() -> Result<bool> {
    let existing = read_crontab();
    let stripped = strip_managed_entries(&existing);
    if stripped.len() == existing.len() {
        return Ok(false);
    }
    write_crontab(&stripped)?;
    info!("portfolio schedule removed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_build_entry_shapes() {
        let entry = build_entry("0 */6 * * *", &[], None);
        assert!(entry.starts_with("0 */6 * * * bmsync portfolio sync"));
        assert!(entry.contains(">> /tmp/bmad-sync-portfolio.log 2>&1"));

        let entry = build_entry(
            "15 2 * * *",
            &["alpha".to_string(), "beta".to_string()],
            Some(8),
        );
        assert!(entry.contains("--projects alpha beta"));
        assert!(entry.contains("--workers 8"));
    }

    #[test]
    fn test_strip_keeps_foreign_entries() {
        let body = lines(&[
            "0 1 * * * backup.sh",
            CRON_MARKER,
            "0 */6 * * * bmsync portfolio sync",
            "30 4 * * * other.sh",
        ]);
        let stripped = strip_managed_entries(&body);
        assert_eq!(stripped, lines(&["0 1 * * * backup.sh", "30 4 * * * other.sh"]));
    }

    #[test]
    fn test_strip_is_idempotent() {
        let body = lines(&["0 1 * * * backup.sh"]);
        assert_eq!(strip_managed_entries(&body), body);
        assert_eq!(
            strip_managed_entries(&strip_managed_entries(&body)),
            body
        );
    }

    #[test]
    fn test_managed_entries_found() {
        let body = lines(&[
            CRON_MARKER,
            "0 */6 * * * bmsync portfolio sync",
            "1 2 * * * foreign.sh",
        ]);
        let managed = managed_entries(&body);
        assert_eq!(managed.len(), 1);
        assert!(managed[0].contains("bmsync portfolio sync"));
    }
}
