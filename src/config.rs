//! Configuration loading
//!
//! `changecov.toml` files are layered: a workspace root file, then a member's
//! own file, then command line overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "changecov.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub module: ModuleConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Name shown in the aggregate log header (default: directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Module type; modules whose packaging is in `skipped_packaging` are skipped
    #[serde(default = "default_packaging")]
    pub packaging: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: None,
            packaging: default_packaging(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverageConfig {
    /// Branch whose merge base with HEAD is the diff baseline
    #[serde(default = "default_compare_branch")]
    pub compare_branch: String,
    #[serde(default = "default_requirement")]
    pub branch_requirement: f64,
    #[serde(default = "default_requirement")]
    pub line_requirement: f64,
    /// Source roots, relative to the module directory
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<String>,
    /// JaCoCo XML report consumed by the report goal
    #[serde(default = "default_report")]
    pub report: String,
    /// Persisted summary written by report and read by check
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_check: bool,
    #[serde(default = "default_skipped_packaging")]
    pub skipped_packaging: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            compare_branch: default_compare_branch(),
            branch_requirement: default_requirement(),
            line_requirement: default_requirement(),
            source_roots: default_source_roots(),
            report: default_report(),
            summary: default_summary(),
            log_file: default_log_file(),
            skip: false,
            skip_check: false,
            skipped_packaging: default_skipped_packaging(),
        }
    }
}

impl CoverageConfig {
    pub fn report_path(&self, base_dir: &Path) -> Result<PathBuf> {
        resolve_path(base_dir, &self.report)
    }

    pub fn summary_path(&self, base_dir: &Path) -> Result<PathBuf> {
        resolve_path(base_dir, &self.summary)
    }

    pub fn log_path(&self, base_dir: &Path) -> Result<PathBuf> {
        resolve_path(base_dir, &self.log_file)
    }

    pub fn source_root_paths(&self, base_dir: &Path) -> Result<Vec<PathBuf>> {
        self.source_roots
            .iter()
            .map(|root| resolve_path(base_dir, root))
            .collect()
    }
}

/// Values given on the command line, applied over every loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub compare_branch: Option<String>,
    pub line_requirement: Option<f64>,
    pub branch_requirement: Option<f64>,
    pub source_roots: Vec<String>,
    pub report: Option<String>,
    pub summary: Option<String>,
    pub skip: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        let coverage = &mut config.coverage;
        if let Some(ref branch) = self.compare_branch {
            coverage.compare_branch = branch.clone();
        }
        if let Some(requirement) = self.line_requirement {
            coverage.line_requirement = requirement;
        }
        if let Some(requirement) = self.branch_requirement {
            coverage.branch_requirement = requirement;
        }
        if !self.source_roots.is_empty() {
            coverage.source_roots = self.source_roots.clone();
        }
        if let Some(ref report) = self.report {
            coverage.report = report.clone();
        }
        if let Some(ref summary) = self.summary {
            coverage.summary = summary.clone();
        }
        if self.skip {
            coverage.skip = true;
        }
        config.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Glob patterns matching module directories
    #[serde(default)]
    pub members: Vec<String>,
    /// Maximum number of modules processed concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_packaging() -> String {
    "jar".to_string()
}

fn default_compare_branch() -> String {
    "develop".to_string()
}

fn default_requirement() -> f64 {
    92.0
}

fn default_source_roots() -> Vec<String> {
    vec!["src/main/java".to_string()]
}

fn default_report() -> String {
    "target/site/jacoco/jacoco.xml".to_string()
}

fn default_summary() -> String {
    "target/site/change-coverage/report.xml".to_string()
}

fn default_log_file() -> String {
    "target/change-coverage.log".to_string()
}

fn default_skipped_packaging() -> Vec<String> {
    vec!["pom".to_string()]
}

fn default_jobs() -> usize {
    4
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_layered(&[path.to_path_buf()])
    }

    /// Load configuration files in order, later files overriding earlier ones
    /// key by key. Missing files are skipped.
    pub fn load_layered(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = empty_table();
        for path in paths {
            if let Some(value) = read_value(path)? {
                merge_values(&mut merged, value);
            }
        }
        Self::from_value(merged)
    }

    /// Configuration of a workspace member: the root configuration overlaid
    /// with the member's own `changecov.toml`. The root module name is not
    /// inherited.
    pub fn load_member(root_config: &Path, module_dir: &Path) -> Result<Self> {
        let mut merged = empty_table();
        if let Some(mut root) = read_value(root_config)? {
            if let Some(module) = root.get_mut("module").and_then(|m| m.as_table_mut()) {
                module.remove("name");
            }
            merge_values(&mut merged, root);
        }
        if let Some(member) = read_value(&module_dir.join(CONFIG_FILE))? {
            merge_values(&mut merged, member);
        }
        Self::from_value(merged)
    }

    fn from_value(value: toml::Value) -> Result<Self> {
        let config = value
            .try_into::<Config>()
            .with_context(|| "Failed to parse change coverage configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .with_context(|| format!("Failed to parse {}", CONFIG_FILE))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("branch_requirement", self.coverage.branch_requirement),
            ("line_requirement", self.coverage.line_requirement),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("coverage.{} must be between 0 and 100, got {}", name, value);
            }
        }

        if let Some(ref workspace) = self.workspace {
            if workspace.jobs == 0 {
                anyhow::bail!("workspace.jobs must be at least 1");
            }
        }

        Ok(())
    }

    /// Module display name, falling back to the module directory name
    pub fn module_name(&self, base_dir: &Path) -> String {
        self.module.name.clone().unwrap_or_else(|| {
            base_dir
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        })
    }
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn read_value(path: &Path) -> Result<Option<toml::Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let value: toml::Value = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Expand `~` and `$VAR`, then resolve relative paths against `base_dir`
pub fn resolve_path(base_dir: &Path, value: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(value)
        .with_context(|| format!("Failed to expand path: {}", value))?;
    let path = PathBuf::from(expanded.as_ref());

    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(base_dir.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[module]
name = "billing"

[coverage]
compare_branch = "main"
line_requirement = 80
source_roots = ["src/main/java", "src/generated/java"]

[workspace]
members = ["modules/*"]
"#;

        let config = Config::from_toml_str(toml_content).unwrap();
        assert_eq!(config.module.name.as_deref(), Some("billing"));
        assert_eq!(config.module.packaging, "jar");
        assert_eq!(config.coverage.compare_branch, "main");
        assert_eq!(config.coverage.line_requirement, 80.0);
        assert_eq!(config.coverage.branch_requirement, 92.0);
        assert_eq!(config.coverage.source_roots.len(), 2);
        assert_eq!(config.workspace.unwrap().jobs, 4);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coverage.compare_branch, "develop");
        assert_eq!(config.coverage.branch_requirement, 92.0);
        assert_eq!(config.coverage.line_requirement, 92.0);
        assert_eq!(config.coverage.skipped_packaging, vec!["pom".to_string()]);
        assert!(!config.coverage.skip);
    }

    #[test]
    fn test_rejects_out_of_range_requirement() {
        let result = Config::from_toml_str("[coverage]\nbranch_requirement = 120\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_layered_config_overrides_keys() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(CONFIG_FILE);
        let module = dir.path().join("module.toml");
        fs::write(
            &root,
            "[coverage]\ncompare_branch = \"main\"\nline_requirement = 70\n",
        )
        .unwrap();
        fs::write(&module, "[coverage]\nline_requirement = 85\n").unwrap();

        let config =
            Config::load_layered(&[root, module, dir.path().join("missing.toml")]).unwrap();
        assert_eq!(config.coverage.compare_branch, "main");
        assert_eq!(config.coverage.line_requirement, 85.0);
    }

    #[test]
    fn test_member_config_does_not_inherit_module_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(CONFIG_FILE);
        fs::write(
            &root,
            "[module]\nname = \"parent\"\n\n[coverage]\nbranch_requirement = 75\n",
        )
        .unwrap();
        let member = dir.path().join("billing");
        fs::create_dir_all(&member).unwrap();
        fs::write(member.join(CONFIG_FILE), "[coverage]\nline_requirement = 60\n").unwrap();

        let config = Config::load_member(&root, &member).unwrap();
        assert_eq!(config.module_name(&member), "billing");
        assert_eq!(config.coverage.branch_requirement, 75.0);
        assert_eq!(config.coverage.line_requirement, 60.0);
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let overrides = Overrides {
            compare_branch: Some("main".to_string()),
            line_requirement: Some(50.0),
            source_roots: vec!["src".to_string()],
            ..Default::default()
        };
        overrides.apply(&mut config).unwrap();

        assert_eq!(config.coverage.compare_branch, "main");
        assert_eq!(config.coverage.line_requirement, 50.0);
        assert_eq!(config.coverage.branch_requirement, 92.0);
        assert_eq!(config.coverage.source_roots, vec!["src".to_string()]);

        let invalid = Overrides {
            branch_requirement: Some(101.0),
            ..Default::default()
        };
        assert!(invalid.apply(&mut config).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/project/module");
        assert_eq!(
            resolve_path(base, "target/jacoco.xml").unwrap(),
            PathBuf::from("/project/module/target/jacoco.xml")
        );
        assert_eq!(
            resolve_path(base, "/tmp/report.xml").unwrap(),
            PathBuf::from("/tmp/report.xml")
        );
    }

    #[test]
    fn test_module_name_falls_back_to_directory() {
        let config = Config::default();
        assert_eq!(config.module_name(Path::new("/repo/billing")), "billing");
    }
}
