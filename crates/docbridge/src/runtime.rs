//! Runtime bootstrap shared by every command
//!
//! Loads the hierarchical configuration, opens the state file, reconciles the
//! configured default sources and registers built-in extensions. Commands that
//! need live extension implementations also scan the entry-points directory and
//! load source-backed extensions from their caches.

use anyhow::{Context, Result};
use camino::Utf8Path;
use docbridge_core::config::HierarchicalConfigLoader;
use docbridge_core::types::{DiscoveryConfig, RuntimeConfig};
use docbridge_extensions::builtin::ensure_builtin_records;
use docbridge_extensions::{
    cleanup_orphaned_builtin_sources, ensure_default_sources, BuiltinCatalog, DependencyResolver, DynamicLoader,
    ExtensionRegistry, ExtensionStore, FileStore, LifecycleLedger, SourceManager,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load the runtime configuration, applying the `--state` override
pub fn load_config(state: Option<&Utf8Path>) -> Result<RuntimeConfig> {
    let mut config = HierarchicalConfigLoader::new()
        .context("Failed to locate configuration directory")?
        .load_runtime_config()
        .context("Failed to load runtime configuration")?;
    if let Some(state) = state {
        config.paths.state_file = Some(state.as_std_path().to_path_buf());
    }
    Ok(config)
}

/// Everything a command needs to act on the persisted state
pub struct Runtime {
    pub config: RuntimeConfig,
    pub store: Arc<FileStore>,
    pub manager: SourceManager,
}

impl Runtime {
    /// Open the state without starting extension processes
    pub async fn open(state: Option<&Utf8Path>) -> Result<Self> {
        Self::build(state, false).await
    }

    /// Open the state and load every extension implementation
    pub async fn open_with_plugins(state: Option<&Utf8Path>) -> Result<Self> {
        Self::build(state, true).await
    }

    async fn build(state: Option<&Utf8Path>, load_plugins: bool) -> Result<Self> {
        let config = load_config(state)?;
        let store = Arc::new(FileStore::new(config.paths.state_file()?));
        debug!("Using state file {}", store.path().display());

        let defaults = ensure_default_sources(store.as_ref(), &config.default_sources);
        if !defaults.created.is_empty() {
            info!("Created default sources: {}", defaults.created.join(", "));
        }
        cleanup_orphaned_builtin_sources(store.as_ref(), &config.default_sources)
            .context("Failed to reconcile built-in sources")?;

        let catalog = BuiltinCatalog::standard();
        let loader = DynamicLoader::from_config(&config.host);
        let discovery = DiscoveryConfig {
            modules: config.discovery.modules.clone(),
            entry_points: load_plugins && config.discovery.entry_points,
        };
        let entry_points_dir = config.paths.entry_points_dir()?;

        let mut registry = ExtensionRegistry::new();
        let report = registry
            .discover(&discovery, Some(&entry_points_dir), &catalog, &loader)
            .await;
        for (module, reason) in &report.skipped {
            warn!("Skipped extension {}: {}", module, reason);
        }

        ensure_builtin_records(store.as_ref(), &registry, &catalog)
            .context("Failed to record built-in extensions")?;

        let manager = SourceManager::from_config(store.clone(), registry.into_shared(), &config)?;
        if load_plugins {
            let loaded = manager
                .load_installed_plugins()
                .await
                .context("Failed to load installed extensions")?;
            for (slug, reason) in &loaded.skipped {
                warn!("Extension {} not loaded: {}", slug, reason);
            }
        }

        Ok(Self {
            config,
            store,
            manager,
        })
    }

    pub fn store(&self) -> &dyn ExtensionStore {
        self.store.as_ref()
    }

    pub fn ledger(&self) -> Result<LifecycleLedger> {
        ledger(&self.config)
    }

    pub fn dependency_resolver(&self) -> DependencyResolver {
        DependencyResolver::from_config(&self.config.dependencies)
    }
}

/// The lifecycle ledger configured in `config`
pub fn ledger(config: &RuntimeConfig) -> Result<LifecycleLedger> {
    Ok(LifecycleLedger::new(config.paths.ledger_file()?))
}
