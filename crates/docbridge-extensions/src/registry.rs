//! Capability registry
//!
//! In-memory index of loaded extensions and their components, keyed by
//! fully-qualified identifiers (`extension-slug.component-slug`). The registry
//! is an explicit context object: it is built at startup by discovery, mutated
//! only by install/update/uninstall, and handed to the executor.
//!
//! Registration is first-wins: registering a slug that is already present is a
//! no-op with a warning.

use docbridge_core::types::{composite_slug, ComponentKind, DiscoveryConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::builtin::BuiltinCatalog;
use crate::capability::{DataSource, Importer, Plugin, PostProcessor, PreProcessor};
use crate::loader::DynamicLoader;

/// Registry shared between the source manager and the executor
pub type SharedRegistry = Arc<RwLock<ExtensionRegistry>>;

/// Summary of a registered extension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginSummary {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub importers: usize,
    pub preprocessors: usize,
    pub postprocessors: usize,
    pub datasources: usize,
}

/// Summary of a registered component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSummary {
    pub full_slug: String,
    pub kind: ComponentKind,
    pub name: String,
    pub description: String,
}

/// Outcome of startup discovery
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Slugs registered
    pub registered: Vec<String>,
    /// (module or path, reason) pairs that were skipped
    pub skipped: Vec<(String, String)>,
}

/// Extension registry with loaded implementations
#[derive(Default)]
pub struct ExtensionRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    importers: HashMap<String, Arc<dyn Importer>>,
    preprocessors: HashMap<String, Arc<dyn PreProcessor>>,
    postprocessors: HashMap<String, Arc<dyn PostProcessor>>,
    datasources: HashMap<String, Arc<dyn DataSource>>,
    /// Component keys owned by each registered extension
    owned: HashMap<String, Vec<(ComponentKind, String)>>,
}

impl ExtensionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the registry for sharing
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register an extension under its own slug
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> bool {
        let slug = plugin.meta().slug.clone();
        self.register_as(&slug, plugin)
    }

    /// Register an extension under `slug`
    ///
    /// Returns `false` (and changes nothing) if `slug` is already registered.
    pub fn register_as(&mut self, slug: &str, plugin: Arc<dyn Plugin>) -> bool {
        if self.plugins.contains_key(slug) {
            warn!("Extension {} is already registered, keeping the first registration", slug);
            return false;
        }

        let mut owned = Vec::new();

        for importer in plugin.importers() {
            let key = composite_slug(slug, &importer.meta().slug);
            debug!("Registered importer: {}", key);
            self.importers.insert(key.clone(), importer);
            owned.push((ComponentKind::Importer, key));
        }

        for preprocessor in plugin.preprocessors() {
            let key = composite_slug(slug, &preprocessor.meta().slug);
            debug!("Registered pre-processor: {}", key);
            self.preprocessors.insert(key.clone(), preprocessor);
            owned.push((ComponentKind::Preprocessor, key));
        }

        for postprocessor in plugin.postprocessors() {
            let key = composite_slug(slug, &postprocessor.meta().slug);
            debug!("Registered post-processor: {}", key);
            self.postprocessors.insert(key.clone(), postprocessor);
            owned.push((ComponentKind::Postprocessor, key));
        }

        for datasource in plugin.datasources() {
            let key = composite_slug(slug, &datasource.meta().slug);
            debug!("Registered data source: {}", key);
            self.datasources.insert(key.clone(), datasource);
            owned.push((ComponentKind::Datasource, key));
        }

        info!("Registered extension: {} v{}", slug, plugin.meta().version);
        self.plugins.insert(slug.to_string(), plugin);
        self.owned.insert(slug.to_string(), owned);
        true
    }

    /// Remove an extension and all of its components
    pub fn unregister(&mut self, slug: &str) -> bool {
        if self.plugins.remove(slug).is_none() {
            debug!("Extension {} was not registered", slug);
            return false;
        }

        for (kind, key) in self.owned.remove(slug).unwrap_or_default() {
            match kind {
                ComponentKind::Importer => {
                    self.importers.remove(&key);
                }
                ComponentKind::Preprocessor => {
                    self.preprocessors.remove(&key);
                }
                ComponentKind::Postprocessor => {
                    self.postprocessors.remove(&key);
                }
                ComponentKind::Datasource => {
                    self.datasources.remove(&key);
                }
            }
        }

        info!("Unregistered extension: {}", slug);
        true
    }

    pub fn get_plugin(&self, slug: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(slug).cloned()
    }

    pub fn get_importer(&self, full_slug: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(full_slug).cloned()
    }

    pub fn get_preprocessor(&self, full_slug: &str) -> Option<Arc<dyn PreProcessor>> {
        self.preprocessors.get(full_slug).cloned()
    }

    pub fn get_postprocessor(&self, full_slug: &str) -> Option<Arc<dyn PostProcessor>> {
        self.postprocessors.get(full_slug).cloned()
    }

    pub fn get_datasource(&self, full_slug: &str) -> Option<Arc<dyn DataSource>> {
        self.datasources.get(full_slug).cloned()
    }

    pub fn has_plugin(&self, slug: &str) -> bool {
        self.plugins.contains_key(slug)
    }

    /// Whether a component of `kind` is registered under `full_slug`
    pub fn has_component(&self, kind: ComponentKind, full_slug: &str) -> bool {
        match kind {
            ComponentKind::Importer => self.importers.contains_key(full_slug),
            ComponentKind::Preprocessor => self.preprocessors.contains_key(full_slug),
            ComponentKind::Postprocessor => self.postprocessors.contains_key(full_slug),
            ComponentKind::Datasource => self.datasources.contains_key(full_slug),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered extensions, sorted by slug
    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        let mut summaries: Vec<PluginSummary> = self
            .plugins
            .iter()
            .map(|(slug, plugin)| {
                let meta = plugin.meta();
                PluginSummary {
                    slug: slug.clone(),
                    name: meta.name.clone(),
                    version: meta.version.clone(),
                    description: meta.description.clone(),
                    importers: plugin.importers().len(),
                    preprocessors: plugin.preprocessors().len(),
                    postprocessors: plugin.postprocessors().len(),
                    datasources: plugin.datasources().len(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.slug.cmp(&b.slug));
        summaries
    }

    /// Registered components of `kind`, sorted by full slug
    pub fn list_components(&self, kind: ComponentKind) -> Vec<ComponentSummary> {
        let summary = |key: &String, name: &str, description: &str| ComponentSummary {
            full_slug: key.clone(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
        };

        let mut summaries: Vec<ComponentSummary> = match kind {
            ComponentKind::Importer => self
                .importers
                .iter()
                .map(|(k, c)| summary(k, &c.meta().name, &c.meta().description))
                .collect(),
            ComponentKind::Preprocessor => self
                .preprocessors
                .iter()
                .map(|(k, c)| summary(k, &c.meta().name, &c.meta().description))
                .collect(),
            ComponentKind::Postprocessor => self
                .postprocessors
                .iter()
                .map(|(k, c)| summary(k, &c.meta().name, &c.meta().description))
                .collect(),
            ComponentKind::Datasource => self
                .datasources
                .iter()
                .map(|(k, c)| summary(k, &c.meta().name, &c.meta().description))
                .collect(),
        };
        summaries.sort_by(|a, b| a.full_slug.cmp(&b.full_slug));
        summaries
    }

    /// Discover extensions at startup
    ///
    /// Walks the configured compiled-in modules and then the entry-points
    /// directory. A module or directory that fails to load is logged and
    /// skipped; discovery itself never fails.
    pub async fn discover(
        &mut self,
        config: &DiscoveryConfig,
        entry_points_dir: Option<&Path>,
        catalog: &BuiltinCatalog,
        loader: &DynamicLoader,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for module in &config.modules {
            match catalog.create(module) {
                Some(plugin) => {
                    let slug = plugin.meta().slug.clone();
                    if self.register(plugin) {
                        report.registered.push(slug);
                    }
                }
                None => {
                    warn!("Failed to load extension module {}: unknown module", module);
                    report
                        .skipped
                        .push((module.clone(), "unknown module".to_string()));
                }
            }
        }

        if let Some(dir) = entry_points_dir.filter(|_| config.entry_points) {
            self.discover_entry_points(dir, loader, &mut report).await;
        }

        info!(
            "Discovery complete: {} registered, {} skipped",
            report.registered.len(),
            report.skipped.len()
        );
        report
    }

    async fn discover_entry_points(&mut self, dir: &Path, loader: &DynamicLoader, report: &mut DiscoveryReport) {
        if !dir.is_dir() {
            debug!("Entry points directory {} does not exist", dir.display());
            return;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read entry points directory {}: {}", dir.display(), e);
                report.skipped.push((dir.display().to_string(), e.to_string()));
                return;
            }
        };

        let mut plugin_dirs: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        plugin_dirs.sort();

        for plugin_dir in plugin_dirs {
            let label = plugin_dir.display().to_string();
            match loader.load_package(&plugin_dir).await {
                Ok(plugin) => {
                    let slug = plugin.meta().slug.clone();
                    if self.register(plugin) {
                        report.registered.push(slug);
                    }
                }
                Err(e) => {
                    warn!("Failed to load extension from {}: {}", label, e);
                    report.skipped.push((label, e.to_string()));
                }
            }
        }
    }
}
