//! Portfolio-level configuration: many projects, one control file.
//!
//! The portfolio config lives at `~/.bmad-sync-portfolio/config.yaml`
//! (`BMAD_PORTFOLIO_DIR` overrides the directory). It records
//! registered projects, shared defaults, discovery settings, and
//! per-project schedules.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

const CONFIG_FILE: &str = "config.yaml";

/// `portfolio:` header section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSection {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub created: String,
}

/// Shared defaults applied to projects without explicit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioDefaults {
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_true")]
    pub preserve_linear_comments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_schedule: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl Default for PortfolioDefaults {
    fn default() -> Self {
        Self {
            auto_sync: false,
            preserve_linear_comments: true,
            sync_schedule: None,
        }
    }
}

/// One registered project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub registered: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Project auto-discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub search_paths: Vec<String>,
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_excludes")]
    pub exclude_dirs: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    vec![".sync/config/sync_config.yaml".to_string()]
}

fn default_excludes() -> Vec<String> {
    ["target", ".git", "node_modules", "venv", "__pycache__"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            search_paths: Vec::new(),
            patterns: default_patterns(),
            exclude_dirs: default_excludes(),
        }
    }
}

/// The whole portfolio document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub portfolio: PortfolioSection,
    #[serde(default)]
    pub defaults: PortfolioDefaults,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// project key → cron expression
    #[serde(default)]
    pub schedules: BTreeMap<String, String>,
    #[serde(skip)]
    config_path: PathBuf,
}

impl PortfolioConfig {
    /// Resolve the portfolio directory from env or the home default.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("BMAD_PORTFOLIO_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME").map_or_else(
            |_| PathBuf::from(".bmad-sync-portfolio"),
            |home| PathBuf::from(home).join(".bmad-sync-portfolio"),
        )
    }

    /// Load the portfolio config, creating a default document when
    /// none exists yet.
    ///
    /// # Errors
    ///
    /// Returns `Config` errors for unreadable or invalid YAML and for
    /// validation failures (duplicate keys, dead project paths).
    pub fn load_or_init(portfolio_dir: Option<&Path>) -> Result<Self> {
        let dir = portfolio_dir.map_or_else(Self::default_dir, Path::to_path_buf);
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            let mut config = Self {
                portfolio: PortfolioSection {
                    name: "BMAD Project Portfolio".to_string(),
                    version: "1.0.0".to_string(),
                    created: Utc::now().to_rfc3339(),
                },
                defaults: PortfolioDefaults::default(),
                projects: BTreeMap::new(),
                discovery: DiscoverySection::default(),
                schedules: BTreeMap::new(),
                config_path,
            };
            config.save()?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yaml::from_str(&raw).map_err(|e| {
            SyncError::Config(format!(
                "invalid YAML in portfolio config {}: {e}",
                config_path.display()
            ))
        })?;
        config.config_path = config_path;
        config.validate()?;
        Ok(config)
    }

    /// Persist the portfolio config.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from directory creation or the write.
    pub fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&self)?;
        std::fs::write(&self.config_path, yaml)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (key, project) in &self.projects {
            if project.path.trim().is_empty() {
                errors.push(format!("project '{key}' has an empty path"));
                continue;
            }
            if !Path::new(&project.path).exists() {
                errors.push(format!(
                    "project path does not exist: {key} -> {}",
                    project.path
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(format!(
                "portfolio validation failed:\n{}",
                errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )))
        }
    }

    /// Register a project, deriving the key from the directory name.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the path does not contain a
    /// per-project config root, and write errors from `save`.
    pub fn register_project(
        &mut self,
        project_path: &Path,
        name: Option<&str>,
    ) -> Result<String> {
        let marker = project_path.join(".sync").join("config").join("sync_config.yaml");
        if !marker.exists() {
            return Err(SyncError::Config(format!(
                "not a BMAD sync project (missing {}): {}",
                marker.display(),
                project_path.display()
            )));
        }

        let derived = project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase().replace(' ', "-"))
            .unwrap_or_else(|| "project".to_string());
        let mut key = derived.clone();
        let mut suffix = 2;
        while self.projects.contains_key(&key) {
            key = format!("{derived}-{suffix}");
            suffix += 1;
        }

        self.projects.insert(
            key.clone(),
            ProjectEntry {
                path: project_path.to_string_lossy().to_string(),
                name: name.unwrap_or(&derived).to_string(),
                registered: Utc::now().to_rfc3339(),
                enabled: true,
                settings: None,
            },
        );
        self.save()?;
        Ok(key)
    }

    /// Projects in key order, optionally restricted to enabled ones.
    #[must_use]
    pub fn list_projects(&self, enabled_only: bool) -> Vec<(String, ProjectEntry)> {
        self.projects
            .iter()
            .filter(|(_, p)| !enabled_only || p.enabled)
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    /// Walk discovery search paths for project config markers.
    ///
    /// Returns candidate project roots not yet registered.
    #[must_use]
    pub fn discover_projects(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        if !self.discovery.enabled {
            return found;
        }

        let registered: Vec<PathBuf> =
            self.projects.values().map(|p| PathBuf::from(&p.path)).collect();

        for search in &self.discovery.search_paths {
            let base = PathBuf::from(search);
            if base.is_dir() {
                self.walk_for_markers(&base, 0, &registered, &mut found);
            }
        }
        found.sort();
        found.dedup();
        found
    }

    fn walk_for_markers(
        &self,
        dir: &Path,
        depth: usize,
        registered: &[PathBuf],
        found: &mut Vec<PathBuf>,
    ) {
        // Depth cap keeps discovery bounded on large home directories.
        if depth > 6 {
            return;
        }
        for pattern in &self.discovery.patterns {
            if dir.join(pattern).exists() && !registered.iter().any(|r| r == dir) {
                found.push(dir.to_path_buf());
            }
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || self.discovery.exclude_dirs.contains(&name) {
                continue;
            }
            self.walk_for_markers(&path, depth + 1, registered, found);
        }
    }

    /// Set or replace a project's cron schedule expression.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for unknown project keys, and write
    /// errors from `save`.
    pub fn set_schedule(&mut self, project_key: &str, cron_expr: &str) -> Result<()> {
        if !self.projects.contains_key(project_key) {
            return Err(SyncError::Config(format!(
                "unknown project key: {project_key}"
            )));
        }
        self.schedules
            .insert(project_key.to_string(), cron_expr.to_string());
        self.save()
    }

    /// The on-disk location of this config.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_project(dir: &Path) {
        fs::create_dir_all(dir.join(".sync").join("config")).unwrap();
        fs::write(
            dir.join(".sync").join("config").join("sync_config.yaml"),
            "project:\n  name: p\n",
        )
        .unwrap();
    }

    #[test]
    fn test_init_creates_default() {
        let temp = TempDir::new().unwrap();
        let config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        assert_eq!(config.portfolio.version, "1.0.0");
        assert!(temp.path().join("config.yaml").exists());
    }

    #[test]
    fn test_register_and_list() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("alpha");
        make_project(&project);

        let mut config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        let key = config.register_project(&project, None).unwrap();
        assert_eq!(key, "alpha");

        let listed = config.list_projects(true);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.name, "alpha");
    }

    #[test]
    fn test_register_rejects_non_project() {
        let temp = TempDir::new().unwrap();
        let not_project = temp.path().join("plain");
        fs::create_dir_all(&not_project).unwrap();

        let mut config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        assert!(config.register_project(&not_project, None).is_err());
    }

    #[test]
    fn test_duplicate_key_gets_suffix() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("x").join("app");
        let b = temp.path().join("y").join("app");
        make_project(&a);
        make_project(&b);

        let mut config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        assert_eq!(config.register_project(&a, None).unwrap(), "app");
        assert_eq!(config.register_project(&b, None).unwrap(), "app-2");
    }

    #[test]
    fn test_discovery_finds_markers() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("work").join("beta");
        make_project(&project);

        let mut config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        config.discovery.search_paths = vec![temp.path().to_string_lossy().to_string()];
        let found = config.discover_projects();
        assert!(found.contains(&project));
    }

    #[test]
    fn test_schedule_requires_known_key() {
        let temp = TempDir::new().unwrap();
        let mut config = PortfolioConfig::load_or_init(Some(temp.path())).unwrap();
        assert!(config.set_schedule("ghost", "0 */6 * * *").is_err());
    }
}
