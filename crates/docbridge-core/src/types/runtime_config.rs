//! Runtime configuration types for operational parameters
//!
//! These types control where the runtime keeps its state, how long network
//! and process calls may take, and which extensions are discovered at startup.

use crate::utils::get_home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Extension host process settings
    #[serde(default)]
    pub host: HostConfig,

    /// Dependency resolver settings
    #[serde(default)]
    pub dependencies: DependencyConfig,

    /// Startup discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Built-in sources shipped with the application
    #[serde(default)]
    pub default_sources: Vec<DefaultSource>,
}

/// Filesystem locations; unset entries are derived from `data-dir`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    /// Root directory for runtime state (default: ~/.docbridge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Downloaded extension cache (default: <data-dir>/cache)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// JSON state file used by the file store (default: <data-dir>/state.json)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Lifecycle ledger (default: <data-dir>/lifecycle.jsonl)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_file: Option<PathBuf>,

    /// Directory of locally installed extension packages (default: <data-dir>/plugins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_points_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(get_home_dir()?.join(".docbridge")),
        }
    }

    pub fn cache_dir(&self) -> anyhow::Result<PathBuf> {
        self.resolve(&self.cache_dir, "cache")
    }

    pub fn state_file(&self) -> anyhow::Result<PathBuf> {
        self.resolve(&self.state_file, "state.json")
    }

    pub fn ledger_file(&self) -> anyhow::Result<PathBuf> {
        self.resolve(&self.ledger_file, "lifecycle.jsonl")
    }

    pub fn entry_points_dir(&self) -> anyhow::Result<PathBuf> {
        self.resolve(&self.entry_points_dir, "plugins")
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default_name: &str) -> anyhow::Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join(default_name)),
        }
    }
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Timeout for manifest and small file requests in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Timeout for archive downloads in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base URL for raw repository file access
    #[serde(default = "default_github_raw_base")]
    pub github_raw_base: String,

    /// Base URL for repository archive downloads
    #[serde(default = "default_github_archive_base")]
    pub github_archive_base: String,

    /// Branch used when a repository URL does not name one
    #[serde(default = "default_ref")]
    pub default_ref: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
            user_agent: default_user_agent(),
            github_raw_base: default_github_raw_base(),
            github_archive_base: default_github_archive_base(),
            default_ref: default_ref(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_download_timeout() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!(
        "docbridge/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
fn default_github_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}
fn default_github_archive_base() -> String {
    "https://github.com".to_string()
}
fn default_ref() -> String {
    "main".to_string()
}

/// Extension host process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostConfig {
    /// Timeout for a single call into an extension process in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
        }
    }
}

fn default_call_timeout() -> u64 {
    300
}

/// Dependency resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyConfig {
    /// Timeout per package install in seconds
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Command that prints installed package metadata (package name appended)
    #[serde(default = "default_query_command")]
    pub query_command: Vec<String>,

    /// Command that installs a package (requirement appended)
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            install_timeout_secs: default_install_timeout(),
            query_command: default_query_command(),
            install_command: default_install_command(),
        }
    }
}

fn default_install_timeout() -> u64 {
    120
}
fn default_query_command() -> Vec<String> {
    ["python3", "-m", "pip", "show"].map(String::from).to_vec()
}
fn default_install_command() -> Vec<String> {
    ["python3", "-m", "pip", "install"].map(String::from).to_vec()
}

/// Startup discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Compiled-in extension modules to register at startup
    #[serde(default)]
    pub modules: Vec<String>,

    /// Whether to scan the entry-points directory
    #[serde(default = "default_true")]
    pub entry_points: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            entry_points: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A built-in source shipped with the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultSource {
    pub slug: String,

    #[serde(default)]
    pub name: String,

    pub url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}
