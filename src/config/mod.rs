//! Configuration management for isle
//!
//! Handles the project's `isle.toml` options, the fixed project layout,
//! and the global `~/.isle/config.toml`

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Name of the project options file
pub const OPTIONS_FILE: &str = "isle.toml";

/// Where the previous manifest is persisted between invocations.
///
/// `Env` only outlives the process when an embedding parent re-runs isle in
/// a child that inherits the variable; the CLI persists to the file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Env,
}

/// Project options, read from `isle.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IsleOptions {
    /// Minimum isle version the project needs
    pub requires: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub state: StateBackend,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub dev: DevConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    /// Route files whose relative path matches are not collected
    pub ignore_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevConfig {
    pub command: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            command: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildConfig {
    /// Overrides `_isle` as the build output directory. Must stay inside
    /// the project and clear of its sources; it is emptied on every build.
    pub out_dir: Option<PathBuf>,
}

/// A plugin whose hooks are shell commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginConfig {
    pub name: String,
    pub build_start: Option<String>,
    pub build_end: Option<String>,
}

impl IsleOptions {
    /// Parse options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Options are supplied only when a file was named explicitly or the
    /// project carries an `isle.toml`
    pub fn discover(base: &Path, explicit: Option<&Path>) -> Result<Option<Self>> {
        if let Some(path) = explicit {
            return Self::from_file(path).map(Some);
        }
        let default_path = base.join(OPTIONS_FILE);
        if default_path.exists() {
            return Self::from_file(&default_path).map(Some);
        }
        Ok(None)
    }
}

/// Fixed paths under a project's base directory
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub base: PathBuf,
    pub routes: PathBuf,
    pub islands: PathBuf,
    pub static_dir: PathBuf,
    pub registration: PathBuf,
    pub out_dir: PathBuf,
    pub state_dir: PathBuf,
    pub state_file: PathBuf,
}

impl ProjectPaths {
    pub fn new(base: &Path) -> Self {
        let base = base.to_path_buf();
        Self {
            routes: base.join("routes"),
            islands: base.join("islands"),
            static_dir: base.join("static"),
            registration: base.join("isle.gen.json"),
            out_dir: base.join("_isle"),
            state_dir: base.join(".isle"),
            state_file: base.join(".isle/previous_manifest.json"),
            base,
        }
    }

    /// Apply overrides from the project options
    pub fn with_options(mut self, options: Option<&IsleOptions>) -> Result<Self> {
        if let Some(out_dir) = options.and_then(|o| o.build.out_dir.as_ref()) {
            self.out_dir = normalize(&self.base.join(out_dir));
        }
        self.check_out_dir()?;
        Ok(self)
    }

    /// Fail unless the output directory can be emptied without touching the
    /// project itself: strictly below the base, and neither inside nor
    /// containing routes, islands, static assets, state or the registration
    /// module.
    pub fn check_out_dir(&self) -> Result<()> {
        let base = normalize(&self.base);
        let out_dir = normalize(&self.out_dir);
        if out_dir == base || !out_dir.starts_with(&base) {
            bail!(
                "Build output directory {} must be a subdirectory of the project {}",
                self.out_dir.display(),
                self.base.display()
            );
        }
        let protected = [
            &self.routes,
            &self.islands,
            &self.static_dir,
            &self.state_dir,
            &self.registration,
        ];
        for path in protected {
            let path = normalize(path);
            if out_dir.starts_with(&path) || path.starts_with(&out_dir) {
                bail!(
                    "Build output directory {} overlaps project sources at {}",
                    self.out_dir.display(),
                    path.display()
                );
            }
        }
        Ok(())
    }
}

/// Resolve `.` and `..` without touching the file system
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Returns the path to the isle home directory (~/.isle)
pub fn isle_home() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".isle"))
}

/// Global configuration, shared by every project
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub update_check: UpdateCheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub registry_url: String,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
            registry_url: "https://crates.io/api/v1/crates/isle".to_string(),
        }
    }
}

/// Load the global configuration from disk
pub fn load_global_config() -> Result<GlobalConfig> {
    let path = isle_home()?.join("config.toml");
    if !path.exists() {
        return Ok(GlobalConfig::default());
    }
    let content = fs::read_to_string(&path).context("Failed to read config.toml")?;
    toml::from_str(&content).context("Failed to parse config.toml")
}
