//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. Runtime config (~/.docbridge/runtime.yaml)
//! 3. Environment variables (DOCBRIDGE_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::RuntimeConfig;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

/// Name of the user runtime config file inside the config directory
pub const RUNTIME_CONFIG_FILE: &str = "runtime.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a new hierarchical config loader rooted at ~/.docbridge
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the standard config directory (~/.docbridge)
    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| Error::invalid_config("Could not determine home directory"))?;

        let config_dir = Utf8PathBuf::from(home).join(".docbridge");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(config_dir)
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = Self::load_embedded_config::<RuntimeConfig>("runtime-defaults.yaml")?;

        let runtime_config_path = self.config_dir.join(RUNTIME_CONFIG_FILE);
        if runtime_config_path.exists() {
            let file_config = self.load_yaml_file::<RuntimeConfig>(&runtime_config_path)?;
            config = Self::merge_runtime_config(config, file_config);
        }

        self.apply_env_overrides(config)
    }

    /// Load an embedded configuration file
    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file and parse it
    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Merge two runtime configs (base is overridden by overlay)
    fn merge_runtime_config(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
        let mut discovery = overlay.discovery;
        if discovery.modules.is_empty() {
            discovery.modules = base.discovery.modules;
        }

        let default_sources = if overlay.default_sources.is_empty() {
            base.default_sources
        } else {
            overlay.default_sources
        };

        RuntimeConfig {
            paths: overlay.paths,
            network: overlay.network,
            host: overlay.host,
            dependencies: overlay.dependencies,
            discovery,
            default_sources,
        }
    }

    /// Apply environment variable overrides to runtime config
    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Ok(val) = env::var("DOCBRIDGE_DATA_DIR") {
            config.paths.data_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("DOCBRIDGE_CACHE_DIR") {
            config.paths.cache_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("DOCBRIDGE_STATE_FILE") {
            config.paths.state_file = Some(PathBuf::from(val));
        }

        if let Some(val) = parse_env::<u64>("DOCBRIDGE_HTTP_TIMEOUT_SECS")? {
            config.network.http_timeout_secs = val;
        }

        if let Some(val) = parse_env::<u64>("DOCBRIDGE_DOWNLOAD_TIMEOUT_SECS")? {
            config.network.download_timeout_secs = val;
        }

        if let Some(val) = parse_env::<u64>("DOCBRIDGE_HOST_TIMEOUT_SECS")? {
            config.host.call_timeout_secs = val;
        }

        if let Some(val) = parse_env::<u64>("DOCBRIDGE_DEPENDENCY_TIMEOUT_SECS")? {
            config.dependencies.install_timeout_secs = val;
        }

        if let Ok(val) = env::var("DOCBRIDGE_GITHUB_RAW_BASE") {
            config.network.github_raw_base = val;
        }

        if let Ok(val) = env::var("DOCBRIDGE_GITHUB_ARCHIVE_BASE") {
            config.network.github_archive_base = val;
        }

        // Comma-separated list of compiled-in modules
        if let Ok(val) = env::var("DOCBRIDGE_PLUGIN_MODULES") {
            config.discovery.modules = val
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn create_temp_loader() -> (HierarchicalConfigLoader, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_dir =
            Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).expect("Invalid UTF-8 path");
        let loader = HierarchicalConfigLoader::with_dir(config_dir);
        (loader, temp_dir)
    }

    #[test]
    #[serial]
    fn test_load_runtime_config_defaults() {
        let (loader, _temp) = create_temp_loader();
        let config = loader.load_runtime_config().unwrap();
        assert_eq!(config.network.http_timeout_secs, 30);
        assert_eq!(config.dependencies.install_timeout_secs, 120);
        assert_eq!(config.discovery.modules, vec!["core-tools".to_string()]);
        assert!(config.default_sources.is_empty());
    }

    #[test]
    #[serial]
    fn test_load_runtime_config_from_file() {
        let (loader, _temp) = create_temp_loader();

        let config_content = r#"
network:
  http-timeout-secs: 10
  github-raw-base: "http://localhost:9999/raw"
host:
  call-timeout-secs: 45
default-sources:
  - slug: official
    name: Official Extensions
    url: https://github.com/docbridge/extensions
"#;
        let config_path = loader.config_dir().join(RUNTIME_CONFIG_FILE);
        fs::write(&config_path, config_content).unwrap();

        let config = loader.load_runtime_config().unwrap();
        assert_eq!(config.network.http_timeout_secs, 10);
        assert_eq!(config.network.github_raw_base, "http://localhost:9999/raw");
        assert_eq!(config.host.call_timeout_secs, 45);
        assert_eq!(config.default_sources.len(), 1);
        assert!(config.default_sources[0].enabled);
        // Modules fall back to the embedded list when the file omits them
        assert_eq!(config.discovery.modules, vec!["core-tools".to_string()]);
    }

    #[test]
    #[serial]
    fn test_invalid_file_is_an_error() {
        let (loader, _temp) = create_temp_loader();
        let config_path = loader.config_dir().join(RUNTIME_CONFIG_FILE);
        fs::write(&config_path, "network: [not, a, map]").unwrap();

        assert!(loader.load_runtime_config().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let (loader, _temp) = create_temp_loader();

        env::set_var("DOCBRIDGE_HTTP_TIMEOUT_SECS", "99");
        env::set_var("DOCBRIDGE_DEPENDENCY_TIMEOUT_SECS", "5");
        env::set_var("DOCBRIDGE_PLUGIN_MODULES", "core-tools, acme-tools ,");
        env::set_var("DOCBRIDGE_DATA_DIR", "/tmp/docbridge-env");

        let config = loader.load_runtime_config().unwrap();
        assert_eq!(config.network.http_timeout_secs, 99);
        assert_eq!(config.dependencies.install_timeout_secs, 5);
        assert_eq!(
            config.discovery.modules,
            vec!["core-tools".to_string(), "acme-tools".to_string()]
        );
        assert_eq!(config.paths.data_dir, Some(PathBuf::from("/tmp/docbridge-env")));

        env::remove_var("DOCBRIDGE_HTTP_TIMEOUT_SECS");
        env::remove_var("DOCBRIDGE_DEPENDENCY_TIMEOUT_SECS");
        env::remove_var("DOCBRIDGE_PLUGIN_MODULES");
        env::remove_var("DOCBRIDGE_DATA_DIR");
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_non_numeric() {
        let (loader, _temp) = create_temp_loader();

        env::set_var("DOCBRIDGE_HOST_TIMEOUT_SECS", "soon");
        let result = loader.load_runtime_config();
        env::remove_var("DOCBRIDGE_HOST_TIMEOUT_SECS");

        assert!(result.is_err());
    }

    #[test]
    fn test_merge_runtime_config() {
        let base = RuntimeConfig::default();
        let mut overlay = RuntimeConfig::default();
        overlay.network.http_timeout_secs = 999;
        overlay.discovery.modules = vec!["custom".into()];

        let merged = HierarchicalConfigLoader::merge_runtime_config(base, overlay);
        assert_eq!(merged.network.http_timeout_secs, 999);
        assert_eq!(merged.discovery.modules, vec!["custom".to_string()]);
    }
}
