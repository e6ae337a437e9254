//! Dynamic loader for fetched extensions
//!
//! Turns an extension directory on disk into a live [`Plugin`] handle. The
//! entry file is started as an extension host process and asked to describe
//! itself; nothing in the extension is introspected. Each load gets a unique
//! host id so concurrently loaded extensions never share state.

use docbridge_core::utils::{is_safe_relative_path, is_valid_slug};
use docbridge_core::types::{HostConfig, ManifestEntry, DEFAULT_ENTRY_POINT, SINGLE_PLUGIN_MANIFEST};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::capability::{ComponentMeta, Plugin};
use crate::host::{ExtensionHost, HostCall, HostedPlugin, PluginDescriptor};

/// Errors raised while loading or calling an extension
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Entry file not found: {0}")]
    EntryMissing(PathBuf),

    #[error("Failed to start {entry}: {reason}")]
    Spawn { entry: PathBuf, reason: String },

    #[error("Extension call '{call}' timed out after {secs}s")]
    Timeout { call: String, secs: u64 },

    #[error("Extension exited with status {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error("Extension protocol error: {0}")]
    Protocol(String),

    #[error("Extension did not describe a plugin")]
    NoPlugin,

    #[error("{0}")]
    Extension(String),

    #[error("Invalid extension: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Loads extension directories into hosted plugins
#[derive(Debug, Clone)]
pub struct DynamicLoader {
    call_timeout: Duration,
}

impl DynamicLoader {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(Duration::from_secs(config.call_timeout_secs))
    }

    /// Load `dir/entry_point` and describe it
    pub async fn load(&self, dir: &Path, entry_point: &str) -> Result<Arc<HostedPlugin>, LoadError> {
        if entry_point.is_empty() || !is_safe_relative_path(entry_point) {
            return Err(LoadError::Invalid(vec![format!(
                "Entry point '{}' must be a relative path inside {}",
                entry_point,
                dir.display()
            )]));
        }
        let entry = dir.join(entry_point);
        if !entry.is_file() {
            return Err(LoadError::EntryMissing(entry));
        }

        let host_id = Self::host_id(dir, &entry);
        debug!("Loading extension from {} as {}", entry.display(), host_id);

        let host = Arc::new(ExtensionHost::new(
            entry,
            dir.to_path_buf(),
            host_id,
            self.call_timeout,
        ));

        let descriptor: PluginDescriptor = host.call_typed(&HostCall::Describe).await?;
        let meta = descriptor.plugin.clone().ok_or(LoadError::NoPlugin)?;

        info!("Loaded extension {} v{} from {}", meta.slug, meta.version, dir.display());
        Ok(Arc::new(HostedPlugin::new(meta, descriptor, host)))
    }

    /// Load a locally installed package directory
    ///
    /// The entry point comes from the directory's single-extension manifest when
    /// present, otherwise the default entry file is used. The loaded plugin must
    /// pass [`validate_plugin`].
    pub async fn load_package(&self, dir: &Path) -> Result<Arc<dyn Plugin>, LoadError> {
        let manifest_path = dir.join(SINGLE_PLUGIN_MANIFEST);
        let entry_point = if manifest_path.is_file() {
            let content = std::fs::read(&manifest_path)
                .map_err(|e| LoadError::Protocol(format!("Failed to read {}: {}", manifest_path.display(), e)))?;
            let entry: ManifestEntry = serde_json::from_slice(&content)
                .map_err(|e| LoadError::Protocol(format!("Invalid {}: {}", manifest_path.display(), e)))?;
            entry.entry_point
        } else {
            DEFAULT_ENTRY_POINT.to_string()
        };

        let plugin = self.load(dir, &entry_point).await?;
        let errors = validate_plugin(plugin.as_ref());
        if !errors.is_empty() {
            return Err(LoadError::Invalid(errors));
        }
        Ok(plugin)
    }

    /// Release a hosted plugin; host processes only live for one call
    pub fn unload(&self, plugin: Arc<dyn Plugin>) {
        debug!("Unloading extension {}", plugin.meta().slug);
        drop(plugin);
    }

    fn host_id(dir: &Path, entry: &Path) -> String {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = entry
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let unique = uuid::Uuid::new_v4().simple().to_string();
        format!("_dynamic_plugin_{}_{}_{}", dir_name, stem, &unique[..8])
    }
}

/// Structural checks on a loaded plugin (empty = valid)
pub fn validate_plugin(plugin: &dyn Plugin) -> Vec<String> {
    let meta = plugin.meta();
    let mut errors = Vec::new();

    if meta.slug.trim().is_empty() {
        errors.push("Plugin slug is required".to_string());
    } else if !is_valid_slug(&meta.slug) {
        errors.push(format!("Plugin slug '{}' must match [a-z0-9_-]", meta.slug));
    }
    if meta.name.trim().is_empty() {
        errors.push("Plugin name is required".to_string());
    }
    if meta.version.trim().is_empty() {
        errors.push("Plugin version is required".to_string());
    } else if semver::Version::parse(&meta.version).is_err() {
        errors.push(format!("Plugin version '{}' is not valid semver", meta.version));
    }

    let kinds: [(&str, Vec<ComponentMeta>); 4] = [
        ("importer", plugin.importers().iter().map(|c| c.meta().clone()).collect()),
        ("pre-processor", plugin.preprocessors().iter().map(|c| c.meta().clone()).collect()),
        ("post-processor", plugin.postprocessors().iter().map(|c| c.meta().clone()).collect()),
        ("data source", plugin.datasources().iter().map(|c| c.meta().clone()).collect()),
    ];

    for (label, metas) in &kinds {
        let mut seen = HashSet::new();
        for meta in metas {
            if meta.slug.trim().is_empty() {
                errors.push(format!("A {} has an empty slug", label));
            } else if !is_valid_slug(&meta.slug) {
                errors.push(format!("{} slug '{}' must match [a-z0-9_-]", label, meta.slug));
            } else if !seen.insert(meta.slug.as_str()) {
                errors.push(format!("Duplicate {} slug '{}'", label, meta.slug));
            }
        }
    }

    for postprocessor in plugin.postprocessors() {
        if postprocessor.supported_events().is_empty() {
            errors.push(format!(
                "Post-processor '{}' declares no supported events",
                postprocessor.meta().slug
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PluginMeta;
    use tempfile::TempDir;

    struct Bare(PluginMeta);

    impl Plugin for Bare {
        fn meta(&self) -> &PluginMeta {
            &self.0
        }
    }

    #[test]
    fn test_validate_plugin_reports_meta_problems() {
        let errors = validate_plugin(&Bare(PluginMeta::new("", "Word Count", "one")));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("slug"));
        assert!(errors[1].contains("semver"));
    }

    #[test]
    fn test_valid_plugin_has_no_errors() {
        assert!(validate_plugin(&Bare(PluginMeta::new("word-count", "Word Count", "1.0.0"))).is_empty());
    }

    #[test]
    fn test_host_ids_are_unique() {
        let dir = Path::new("/cache/acme/word-count");
        let entry = dir.join("plugin");
        let a = DynamicLoader::host_id(dir, &entry);
        let b = DynamicLoader::host_id(dir, &entry);

        assert!(a.starts_with("_dynamic_plugin_word-count_plugin_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_slugs_with_separators_are_rejected() {
        let errors = validate_plugin(&Bare(PluginMeta::new("acme.word-count", "Word Count", "1.0.0")));
        assert_eq!(errors, vec!["Plugin slug 'acme.word-count' must match [a-z0-9_-]".to_string()]);
    }

    #[tokio::test]
    async fn test_entry_point_outside_dir_is_rejected() {
        let temp = TempDir::new().unwrap();
        let loader = DynamicLoader::new(Duration::from_secs(5));

        for entry_point in ["../plugin", "/bin/sh", ""] {
            let err = loader.load(temp.path(), entry_point).await.err().unwrap();
            assert!(matches!(err, LoadError::Invalid(_)), "{} was accepted", entry_point);
        }
    }

    #[tokio::test]
    async fn test_missing_entry_file() {
        let temp = TempDir::new().unwrap();
        let loader = DynamicLoader::new(Duration::from_secs(5));

        let err = loader.load(temp.path(), "plugin").await.err().unwrap();
        assert!(matches!(err, LoadError::EntryMissing(_)));
    }
}
