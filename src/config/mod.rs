//! Per-project configuration loading and validation.
//!
//! The project config lives at `.sync/config/sync_config.yaml` under
//! the project root. Loading resolves `{bmad_root}` / `{docs_bmad}`
//! placeholders, applies environment overrides, and validates the
//! result with accumulated error messages so a misconfigured file
//! reports every problem at once.
//!
//! Environment overrides:
//! - `BMAD_PROJECT_ROOT` / `BMAD_ROOT` → `project.bmad_root`
//! - `BMAD_DOCS_BMAD` → `project.docs_bmad`
//! - `BMAD_STORIES_DIR` → `project.stories_dir`
//! - `LINEAR_TEAM` → `linear.team_id` (when unset)
//! - `LINEAR_PROJECT` → `linear.project_id` (when unset)

pub mod portfolio;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// `project:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bmad_root: String,
    #[serde(default)]
    pub docs_bmad: String,
    #[serde(default)]
    pub stories_dir: String,
}

/// `linear:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearSection {
    #[serde(default)]
    pub team_prefix: String,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub project_id: String,
}

/// `numbering:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberingSection {
    #[serde(default = "default_epic_base")]
    pub epic_base: i64,
    #[serde(default = "default_block_size")]
    pub epic_block_size: i64,
    #[serde(default)]
    pub story_offset: i64,
}

const fn default_epic_base() -> i64 {
    360
}

const fn default_block_size() -> i64 {
    20
}

impl Default for NumberingSection {
    fn default() -> Self {
        Self {
            epic_base: default_epic_base(),
            epic_block_size: default_block_size(),
            story_offset: 0,
        }
    }
}

/// `sync:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_true")]
    pub preserve_linear_comments: bool,
}

const fn default_true() -> bool {
    true
}

/// Validated per-project sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub linear: LinearSection,
    #[serde(default)]
    pub numbering: NumberingSection,
    #[serde(default)]
    pub sync: SyncSection,
}

impl ProjectConfig {
    /// Load, resolve, and validate the config under `project_root`.
    ///
    /// # Errors
    ///
    /// Returns `Config` errors for a missing/invalid file and a
    /// combined validation error listing every failed check.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".sync").join("config").join("sync_config.yaml");
        Self::load_from(&config_path, project_root)
    }

    /// Load from an explicit path, resolving paths against `root`.
    ///
    /// # Errors
    ///
    /// See [`ProjectConfig::load`].
    pub fn load_from(config_path: &Path, root: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(SyncError::Config(format!(
                "configuration file not found: {}",
                config_path.display()
            )));
        }

        let raw = std::fs::read_to_string(config_path)?;
        let mut config: Self = serde_yaml::from_str(&raw).map_err(|e| {
            SyncError::Config(format!(
                "invalid YAML in {}: {e}",
                config_path.display()
            ))
        })?;

        config.substitute_env();
        config.resolve_paths(root);
        config.validate()?;
        Ok(config)
    }

    /// Walk up from `start` looking for a directory containing `.sync/`.
    ///
    /// # Errors
    ///
    /// `NotInitialized` when no ancestor carries a `.sync` directory.
    pub fn discover_root(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(".sync").is_dir() {
                return Ok(current);
            }
            if !current.pop() {
                return Err(SyncError::NotInitialized);
            }
        }
    }

    fn substitute_env(&mut self) {
        if self.linear.team_id.is_empty() {
            if let Ok(team) = std::env::var("LINEAR_TEAM") {
                self.linear.team_id = team;
            }
        }
        if self.linear.project_id.is_empty() {
            if let Ok(project) = std::env::var("LINEAR_PROJECT") {
                self.linear.project_id = project;
            }
        }
    }

    fn resolve_paths(&mut self, discovered_root: &Path) {
        let root_env =
            std::env::var("BMAD_PROJECT_ROOT").or_else(|_| std::env::var("BMAD_ROOT")).ok();
        let docs_env = std::env::var("BMAD_DOCS_BMAD").ok();
        let stories_env = std::env::var("BMAD_STORIES_DIR").ok();

        let discovered = discovered_root.to_string_lossy().to_string();

        if let Some(root) = root_env {
            self.project.bmad_root = root;
        } else if self.project.bmad_root.trim().is_empty()
            || !Path::new(&self.project.bmad_root).exists()
        {
            // Configured root that does not exist falls back to the
            // directory we discovered `.sync` in.
            self.project.bmad_root = discovered;
        }

        let bmad_root = self.project.bmad_root.clone();
        let docs_template = docs_env.unwrap_or_else(|| {
            if self.project.docs_bmad.trim().is_empty() {
                "{bmad_root}/docs-bmad".to_string()
            } else {
                self.project.docs_bmad.clone()
            }
        });
        self.project.docs_bmad = docs_template.replace("{bmad_root}", &bmad_root);

        let docs_bmad = self.project.docs_bmad.clone();
        let stories_template = stories_env.unwrap_or_else(|| {
            if self.project.stories_dir.trim().is_empty() {
                "{docs_bmad}/stories".to_string()
            } else {
                self.project.stories_dir.clone()
            }
        });
        self.project.stories_dir = stories_template.replace("{docs_bmad}", &docs_bmad);
    }

    fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push("missing required field: project.name".to_string());
        }

        for (field, value) in [
            ("project.bmad_root", &self.project.bmad_root),
            ("project.docs_bmad", &self.project.docs_bmad),
            ("project.stories_dir", &self.project.stories_dir),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("missing required field: {field}"));
            } else if !Path::new(value).exists() {
                errors.push(format!("path does not exist: {field} = {value}"));
            }
        }

        if self.linear.team_prefix.is_empty()
            || self.linear.team_prefix.chars().any(|c| c.is_ascii_lowercase())
        {
            errors.push(format!(
                "linear.team_prefix must be uppercase (got: '{}')",
                self.linear.team_prefix
            ));
        }

        if self.numbering.epic_base < 1 {
            errors.push("numbering.epic_base must be a positive integer".to_string());
        }
        if self.numbering.epic_block_size < 1 {
            errors.push("numbering.epic_block_size must be a positive integer".to_string());
        }
        if self.numbering.story_offset < 0 {
            errors.push("numbering.story_offset must be a non-negative integer".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(format!(
                "configuration validation failed:\n{}",
                errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )))
        }
    }

    /// Team identifier to pass to the tracker, preferring the prefix.
    #[must_use]
    pub fn team(&self) -> Option<String> {
        if !self.linear.team_prefix.is_empty() {
            Some(self.linear.team_prefix.clone())
        } else if !self.linear.team_name.is_empty() {
            Some(self.linear.team_name.clone())
        } else {
            None
        }
    }

    /// Project identifier to pass to the tracker.
    #[must_use]
    pub fn tracker_project(&self) -> Option<String> {
        if !self.linear.project_id.is_empty() {
            Some(self.linear.project_id.clone())
        } else if !self.linear.project_name.is_empty() {
            Some(self.linear.project_name.clone())
        } else {
            None
        }
    }

    /// Absolute docs directory.
    #[must_use]
    pub fn docs_bmad(&self) -> PathBuf {
        PathBuf::from(&self.project.docs_bmad)
    }

    /// Absolute stories directory.
    #[must_use]
    pub fn stories_dir(&self) -> PathBuf {
        PathBuf::from(&self.project.stories_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let config_dir = root.join(".sync").join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("sync_config.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    fn scaffold(root: &Path) {
        fs::create_dir_all(root.join("docs-bmad").join("stories")).unwrap();
    }

    #[test]
    fn test_load_resolves_placeholders() {
        let temp = TempDir::new().unwrap();
        scaffold(temp.path());
        write_config(
            temp.path(),
            r"project:
  name: demo
  docs_bmad: '{bmad_root}/docs-bmad'
  stories_dir: '{docs_bmad}/stories'
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
        );

        let config = ProjectConfig::load(temp.path()).unwrap();
        assert_eq!(config.project.name, "demo");
        assert!(config.project.docs_bmad.ends_with("docs-bmad"));
        assert!(config.project.stories_dir.ends_with("stories"));
        assert_eq!(config.team().as_deref(), Some("RAE"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = ProjectConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validation_accumulates_errors() {
        let temp = TempDir::new().unwrap();
        scaffold(temp.path());
        write_config(
            temp.path(),
            r"project:
  name: ''
linear:
  team_prefix: rae
numbering:
  epic_base: 0
  epic_block_size: 20
  story_offset: 0
",
        );

        let err = ProjectConfig::load(temp.path()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("project.name"));
        assert!(text.contains("team_prefix"));
        assert!(text.contains("epic_base"));
    }

    #[test]
    fn test_discover_root_walks_up() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".sync")).unwrap();
        let nested = temp.path().join("docs-bmad").join("stories");
        fs::create_dir_all(&nested).unwrap();

        let root = ProjectConfig::discover_root(&nested).unwrap();
        assert_eq!(root, temp.path());
    }

    #[test]
    fn test_discover_root_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            ProjectConfig::discover_root(temp.path()),
            Err(SyncError::NotInitialized)
        ));
    }
}
