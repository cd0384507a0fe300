//! `bmsync validate`: offline structural validation.

use std::path::Path;

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::validation::validate_all;

/// Validate configuration and content; exit non-zero on findings.
///
/// # Errors
///
/// I/O errors only; validation findings go to the exit code.
pub fn execute(json: bool, project_root: &Path) -> Result<i32> {
    // Config problems are findings too, not hard failures here.
    let config_error = ProjectConfig::load(project_root).err().map(|e| e.to_string());

    let docs = ProjectConfig::load(project_root).map_or_else(
        |_| project_root.join("docs-bmad"),
        |c| c.docs_bmad(),
    );
    let report = validate_all(&docs);
    let ok = report.ok && config_error.is_none();

    if json {
        let body = serde_json::json!({
            "ok": ok,
            "config_error": config_error,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(i32::from(!ok));
    }

    if let Some(error) = &config_error {
        println!("config: {error}");
    }
    if !report.sprint_status.is_empty() {
        println!("sprint-status.yaml:");
        for finding in &report.sprint_status {
            println!("  - {finding}");
        }
    }
    for (file, findings) in &report.epics {
        println!("{file}:");
        for finding in findings {
            println!("  - {finding}");
        }
    }
    for (file, findings) in &report.stories {
        println!("{file}:");
        for finding in findings {
            println!("  - {finding}");
        }
    }

    if ok {
        println!("All checks passed.");
        Ok(0)
    } else {
        println!("{} issue(s) found.", report.error_count() + usize::from(config_error.is_some()));
        Ok(1)
    }
}
