//! Source manager: fetch, install, update, uninstall
//!
//! Sources are remote origins of extensions. The manager fetches their
//! manifests through a [`SourceHandler`](crate::handlers::SourceHandler),
//! downloads extension code into `<cache>/<source>/<extension>`, loads it with
//! the [`DynamicLoader`], persists the Extension and Component records and
//! registers the implementation under the composite slug
//! `<source>.<extension>`.
//!
//! Install, update and uninstall of one extension are serialised by
//! [`SlugLocks`]; operations on different extensions run concurrently.

use docbridge_core::types::{
    composite_slug, Component, Extension, Manifest, ManifestEntry, ManifestKind, NetworkConfig,
    RuntimeConfig, Source, SourceKind, DEFAULT_ENTRY_POINT,
};
use docbridge_core::utils::is_valid_slug;
use docbridge_core::ConfigSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLockWriteGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{ComponentContext, Plugin};
use crate::events::{EventEnvelope, LifecycleEvent};
use crate::handlers::{make_executable, resolve_handler, safe_relative_path};
use crate::host::HostedPlugin;
use crate::ledger::LifecycleLedger;
use crate::loader::{validate_plugin, DynamicLoader, LoadError};
use crate::registry::{ExtensionRegistry, SharedRegistry};
use crate::store::{ExtensionStore, InstanceFilter};

/// Errors raised by source and installation operations
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unsupported URL format: {0}")]
    UnsupportedUrl(String),

    #[error("No extension manifest found at {0}")]
    ManifestNotFound(String),

    #[error("Invalid manifest at {location}: {reason}")]
    InvalidManifest { location: String, reason: String },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Extension '{slug}' not found in source '{source_slug}'")]
    NotInManifest { source_slug: String, slug: String },

    #[error("Extension '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("Extension '{0}' is not installed")]
    NotInstalled(String),

    #[error("Extension '{0}' has no source")]
    NoSource(String),

    #[error("Failed to load extension: {0}")]
    Load(#[from] LoadError),

    #[error("Invalid extension: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] docbridge_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-slug async locks serialising lifecycle operations
#[derive(Debug, Default)]
pub struct SlugLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SlugLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `slug`
    pub async fn lock(&self, slug: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(slug.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// A manifest entry annotated with its install state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableExtension {
    #[serde(flatten)]
    pub entry: ManifestEntry,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
}

/// Instance whose configuration no longer validates after an update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncompatibleInstance {
    pub id: Uuid,
    pub name: String,
    pub component: String,
    pub errors: Vec<String>,
}

/// Result of [`SourceManager::update_plugin`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Advertised version equals the installed one; nothing was downloaded
    UpToDate { version: String },
    Updated {
        from_version: String,
        to_version: String,
        /// Instances deleted because their component was removed
        removed_instances: Vec<Uuid>,
        /// Surviving instances whose config fails the new schema (left unchanged)
        incompatible_instances: Vec<IncompatibleInstance>,
    },
}

/// Outcome of [`SourceManager::load_installed_plugins`]
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// (slug, reason) pairs
    pub skipped: Vec<(String, String)>,
}

/// Build the Extension and Component records for a loaded plugin
pub fn plugin_records(slug: &str, plugin: &dyn Plugin) -> (Extension, Vec<Component>) {
    let meta = plugin.meta();
    let mut extension = Extension::new(slug, &meta.name, &meta.version);
    extension.author = meta.author.clone();
    extension.description = meta.description.clone();
    extension.config_schema = meta.config_schema.clone();
    extension.dependencies = meta.dependencies.clone();

    let components = plugin
        .component_metas()
        .into_iter()
        .map(|(kind, component_meta)| {
            let mut component = Component::new(slug, kind, &component_meta.slug, &component_meta.name);
            component.description = component_meta.description;
            component.code_ref = format!("{}:{}", kind, component_meta.slug);
            component.config_schema = component_meta.config_schema;
            component.supported_events = component_meta.supported_events;
            component
        })
        .collect();

    (extension, components)
}

/// Version a source currently offers for `entry`
///
/// The entry's own version wins; otherwise the manifest-level version applies.
pub fn offered_version(manifest: &Manifest, entry: &ManifestEntry) -> Option<String> {
    if entry.version.is_empty() {
        manifest.advertised_version()
    } else {
        Some(entry.version.clone())
    }
}

/// Manages sources and the extensions installed from them
pub struct SourceManager {
    store: Arc<dyn ExtensionStore>,
    registry: SharedRegistry,
    loader: DynamicLoader,
    cache_dir: PathBuf,
    network: NetworkConfig,
    locks: SlugLocks,
    ledger: Option<LifecycleLedger>,
}

impl SourceManager {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        registry: SharedRegistry,
        loader: DynamicLoader,
        cache_dir: PathBuf,
        network: NetworkConfig,
    ) -> Self {
        Self {
            store,
            registry,
            loader,
            cache_dir,
            network,
            locks: SlugLocks::new(),
            ledger: None,
        }
    }

    /// Build a manager from runtime configuration, recording to the configured ledger
    pub fn from_config(
        store: Arc<dyn ExtensionStore>,
        registry: SharedRegistry,
        config: &RuntimeConfig,
    ) -> anyhow::Result<Self> {
        let manager = Self::new(
            store,
            registry,
            DynamicLoader::from_config(&config.host),
            config.paths.cache_dir()?,
            config.network.clone(),
        )
        .with_ledger(LifecycleLedger::new(config.paths.ledger_file()?));
        Ok(manager)
    }

    pub fn with_ledger(mut self, ledger: LifecycleLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn store(&self) -> &Arc<dyn ExtensionStore> {
        &self.store
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache directory of one extension: `<cache>/<source>/<extension>`
    pub fn extension_cache_dir(&self, source_slug: &str, slug: &str) -> PathBuf {
        self.cache_dir.join(source_slug).join(slug)
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, ExtensionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, extension: &str, event: LifecycleEvent) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.append(EventEnvelope::new(extension, event)) {
                warn!("Failed to record lifecycle event: {:#}", e);
            }
        }
    }

    fn load_source(&self, slug: &str) -> Result<Source, SourceError> {
        self.store
            .get_source(slug)?
            .ok_or_else(|| docbridge_core::Error::not_found("Source", slug).into())
    }

    fn ensure_valid_slug(kind: &str, slug: &str) -> Result<(), SourceError> {
        if is_valid_slug(slug) {
            Ok(())
        } else {
            Err(SourceError::Invalid(format!(
                "Invalid {} slug '{}': expected [a-z0-9_-]",
                kind, slug
            )))
        }
    }

    fn load_extension(&self, slug: &str) -> Result<Extension, SourceError> {
        self.store
            .get_extension(slug)?
            .ok_or_else(|| SourceError::NotInstalled(slug.to_string()))
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Add a user source
    pub fn add_source(&self, slug: &str, name: &str, url: &str) -> Result<Source, SourceError> {
        Self::ensure_valid_slug("source", slug)?;
        resolve_handler(url, &self.network)?;
        let source = Source::new(slug, name, url, SourceKind::User);
        self.store.create_source(source.clone())?;
        info!("Added source {} ({})", slug, url);
        Ok(source)
    }

    /// Remove a user source; built-in sources are rejected
    ///
    /// Extensions installed from it stay on record without a source; their
    /// cached code is deleted and they are unloaded.
    pub fn remove_source(&self, slug: &str) -> Result<(), SourceError> {
        Self::ensure_valid_slug("source", slug)?;
        let orphaned: Vec<String> = self
            .store
            .list_extensions()?
            .into_iter()
            .filter(|extension| extension.source.as_deref() == Some(slug))
            .map(|extension| extension.slug)
            .collect();

        self.store.delete_source(slug)?;

        if !orphaned.is_empty() {
            let mut registry = self.registry_write();
            for extension in &orphaned {
                registry.unregister(extension);
            }
        }
        let cache = self.cache_dir.join(slug);
        if cache.exists() {
            std::fs::remove_dir_all(&cache)?;
        }
        info!("Removed source {} ({} extensions orphaned)", slug, orphaned.len());
        Ok(())
    }

    /// Fetch a source's manifest and persist the result
    ///
    /// On failure the error is recorded on the source and the previously cached
    /// manifest is kept.
    pub async fn fetch_source(&self, source: &mut Source) -> Result<Manifest, SourceError> {
        info!("Fetching source {} ({})", source.slug, source.url);

        let fetched = match resolve_handler(&source.url, &self.network) {
            Ok(handler) => handler.fetch_manifest(&source.url).await,
            Err(e) => Err(e),
        };

        match fetched {
            Ok(fetched) => {
                let manifest = fetched.manifest;
                info!(
                    "Fetched {} manifest for {} from {}",
                    manifest.kind, source.slug, fetched.location
                );
                source.record_fetch(manifest.clone());
                self.store.update_source(source)?;
                self.record(
                    &source.slug,
                    LifecycleEvent::SourceFetched {
                        source: source.slug.clone(),
                        manifest_kind: manifest.kind.to_string(),
                        entries: manifest.entries.len(),
                        version: manifest.advertised_version(),
                    },
                );
                Ok(manifest)
            }
            Err(e) => {
                warn!("Failed to fetch source {}: {}", source.slug, e);
                source.record_fetch_error(e.to_string());
                if let Err(store_err) = self.store.update_source(source) {
                    error!("Failed to record fetch error on {}: {}", source.slug, store_err);
                }
                self.record(
                    &source.slug,
                    LifecycleEvent::SourceFetchFailed {
                        source: source.slug.clone(),
                        error_message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Fetch a source by slug and return the updated record
    pub async fn refresh_source(&self, slug: &str) -> Result<Source, SourceError> {
        let mut source = self.load_source(slug)?;
        self.fetch_source(&mut source).await?;
        Ok(source)
    }

    /// Extensions offered by a source's cached manifest
    pub fn get_available_extensions(&self, source: &Source) -> Result<Vec<AvailableExtension>, SourceError> {
        let Some(manifest) = &source.manifest else {
            return Ok(Vec::new());
        };

        let entries: Vec<ManifestEntry> = match manifest.kind {
            ManifestKind::Multi => manifest.entries.clone(),
            ManifestKind::Single | ManifestKind::Inferred => manifest
                .entries
                .first()
                .map(|entry| {
                    let mut entry = entry.clone();
                    entry.path.clear();
                    vec![entry]
                })
                .unwrap_or_default(),
        };

        let mut available = Vec::with_capacity(entries.len());
        for entry in entries {
            let installed = self.store.get_extension(&composite_slug(&source.slug, &entry.slug))?;
            available.push(AvailableExtension {
                installed: installed.is_some(),
                installed_version: installed.and_then(|e| e.installed_version),
                entry,
            });
        }
        Ok(available)
    }

    // ========================================================================
    // Install
    // ========================================================================

    /// Install extension `slug` from source `source_slug`
    pub async fn install_extension(&self, source_slug: &str, slug: &str) -> Result<Extension, SourceError> {
        Self::ensure_valid_slug("source", source_slug)?;
        Self::ensure_valid_slug("extension", slug)?;
        let full_slug = composite_slug(source_slug, slug);
        let _guard = self.locks.lock(&full_slug).await;

        let mut source = self.load_source(source_slug)?;
        if self.store.get_extension(&full_slug)?.is_some() {
            return Err(SourceError::AlreadyInstalled(full_slug));
        }

        if source.manifest.is_none() {
            self.fetch_source(&mut source).await?;
        }
        let entry = self
            .get_available_extensions(&source)?
            .into_iter()
            .find(|available| available.entry.slug == slug)
            .map(|available| available.entry)
            .ok_or_else(|| SourceError::NotInManifest {
                source_slug: source_slug.to_string(),
                slug: slug.to_string(),
            })?;
        entry.validate().map_err(|e| SourceError::Invalid(e.to_string()))?;

        info!("Installing {} from {}", full_slug, source.url);
        self.record(
            &full_slug,
            LifecycleEvent::InstallStarted {
                source: source.slug.clone(),
                version: entry.version.clone(),
                url: source.url.clone(),
            },
        );

        let started = Instant::now();
        let cache = self.extension_cache_dir(source_slug, slug);

        match self.install_into(&source, &entry, &full_slug, &cache).await {
            Ok((extension, components)) => {
                info!("Installed {} v{}", full_slug, extension.version);
                self.record(
                    &full_slug,
                    LifecycleEvent::InstallCompleted {
                        version: extension.version.clone(),
                        duration_secs: started.elapsed().as_secs(),
                        components,
                    },
                );
                Ok(extension)
            }
            Err(e) => {
                error!("Failed to install {}: {}", full_slug, e);
                if cache.exists() {
                    if let Err(cleanup) = tokio::fs::remove_dir_all(&cache).await {
                        warn!("Failed to remove {}: {}", cache.display(), cleanup);
                    }
                }
                self.record(
                    &full_slug,
                    LifecycleEvent::InstallFailed {
                        version: entry.version.clone(),
                        error_message: e.to_string(),
                        duration_secs: started.elapsed().as_secs(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn install_into(
        &self,
        source: &Source,
        entry: &ManifestEntry,
        full_slug: &str,
        cache: &Path,
    ) -> Result<(Extension, Vec<String>), SourceError> {
        if cache.exists() {
            debug!("Removing stale cache directory {}", cache.display());
            tokio::fs::remove_dir_all(cache).await?;
        }
        tokio::fs::create_dir_all(cache).await?;

        let plugin = self.download_and_load(source, entry, cache).await?;

        let (mut extension, components) = plugin_records(full_slug, plugin.as_ref());
        extension.code_location = cache.join(&entry.entry_point).display().to_string();
        extension.source = Some(source.slug.clone());
        extension.source_path = entry.path.clone();
        extension.installed_version = Some(extension.version.clone());
        extension.installed_from_url = Some(source.url.clone());

        let component_slugs: Vec<String> = components.iter().map(Component::full_slug).collect();

        self.store.create_extension(extension.clone())?;
        if let Err(e) = self.store.replace_components(full_slug, components) {
            if let Err(rollback) = self.store.delete_extension(full_slug) {
                error!("Failed to roll back extension record {}: {}", full_slug, rollback);
            }
            return Err(e.into());
        }

        self.registry_write().register_as(full_slug, plugin);
        Ok((extension, component_slugs))
    }

    /// Download `entry` into `dir`, then load and validate it
    async fn download_and_load(
        &self,
        source: &Source,
        entry: &ManifestEntry,
        dir: &Path,
    ) -> Result<Arc<HostedPlugin>, SourceError> {
        let handler = resolve_handler(&source.url, &self.network)?;
        let entry_point = safe_relative_path(Path::new(&entry.entry_point))
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| SourceError::Invalid(format!("Unsafe entry point '{}'", entry.entry_point)))?;
        handler.download(&source.url, &entry.path, dir).await?;

        make_executable(&dir.join(&entry_point))?;

        let plugin = self.loader.load(dir, &entry_point.to_string_lossy()).await?;
        let errors = validate_plugin(plugin.as_ref());
        if !errors.is_empty() {
            return Err(SourceError::Invalid(errors.join(", ")));
        }
        Ok(plugin)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Resolve the manifest entry of an installed extension after re-fetching its source
    async fn refreshed_entry(&self, extension: &Extension) -> Result<(Source, Manifest, ManifestEntry), SourceError> {
        let source_slug = extension
            .source
            .clone()
            .ok_or_else(|| SourceError::NoSource(extension.slug.clone()))?;
        let mut source = self.load_source(&source_slug)?;
        let manifest = self.fetch_source(&mut source).await?;
        let entry = self.entry_in_source(extension, &source)?;
        Ok((source, manifest, entry))
    }

    /// Manifest entry of an installed extension in an already fetched source
    fn entry_in_source(&self, extension: &Extension, source: &Source) -> Result<ManifestEntry, SourceError> {
        let local_slug = extension.local_slug();
        self.get_available_extensions(source)?
            .into_iter()
            .find(|available| available.entry.slug == local_slug)
            .map(|available| available.entry)
            .ok_or_else(|| SourceError::NotInManifest {
                source_slug: source.slug.clone(),
                slug: local_slug.to_string(),
            })
    }

    fn installed_version(extension: &Extension) -> String {
        extension
            .installed_version
            .clone()
            .unwrap_or_else(|| extension.version.clone())
    }

    /// Update an installed extension to the version its source offers
    pub async fn update_plugin(&self, slug: &str) -> Result<UpdateOutcome, SourceError> {
        let _guard = self.locks.lock(slug).await;

        let mut extension = self.load_extension(slug)?;
        let (source, manifest, entry) = self.refreshed_entry(&extension).await?;
        let from_version = Self::installed_version(&extension);

        let to_version = match offered_version(&manifest, &entry) {
            Some(version) if version != from_version => version,
            _ => {
                info!("{} is already at the latest version {}", slug, from_version);
                if extension.update_available {
                    extension.mark_update(None);
                    self.store.update_extension(&extension)?;
                }
                return Ok(UpdateOutcome::UpToDate { version: from_version });
            }
        };

        info!("Updating {} from {} to {}", slug, from_version, to_version);
        self.record(
            slug,
            LifecycleEvent::UpdateStarted {
                from_version: from_version.clone(),
                to_version: to_version.clone(),
            },
        );

        let started = Instant::now();
        match self.apply_update(&mut extension, &source, &entry).await {
            Ok((removed_instances, incompatible_instances)) => {
                let to_version = extension.version.clone();
                info!("Updated {} to v{}", slug, to_version);
                self.record(
                    slug,
                    LifecycleEvent::UpdateCompleted {
                        from_version: from_version.clone(),
                        to_version: to_version.clone(),
                        duration_secs: started.elapsed().as_secs(),
                        incompatible_instances: incompatible_instances.iter().map(|i| i.id.to_string()).collect(),
                    },
                );
                Ok(UpdateOutcome::Updated {
                    from_version,
                    to_version,
                    removed_instances,
                    incompatible_instances,
                })
            }
            Err(e) => {
                error!("Failed to update {}: {}", slug, e);
                self.record(
                    slug,
                    LifecycleEvent::UpdateFailed {
                        from_version,
                        to_version,
                        error_message: e.to_string(),
                        duration_secs: started.elapsed().as_secs(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn apply_update(
        &self,
        extension: &mut Extension,
        source: &Source,
        entry: &ManifestEntry,
    ) -> Result<(Vec<Uuid>, Vec<IncompatibleInstance>), SourceError> {
        let slug = extension.slug.clone();
        let cache = self.extension_cache_dir(&source.slug, extension.local_slug());
        let parent = cache.parent().unwrap_or(&self.cache_dir).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        // Staged copy must load before the installed copy is touched
        let staging = tempfile::Builder::new().prefix(".update-").tempdir_in(&parent)?;
        let next = staging.path().join("next");
        tokio::fs::create_dir_all(&next).await?;
        let staged = self.download_and_load(source, entry, &next).await?;
        drop(staged);

        let plugin = self.swap_into_place(&next, &cache, &entry.entry_point).await?;

        let meta = plugin.meta().clone();
        extension.name = meta.name;
        extension.author = meta.author;
        extension.version = meta.version.clone();
        extension.description = meta.description;
        extension.config_schema = meta.config_schema;
        extension.dependencies = meta.dependencies;
        extension.code_location = cache.join(&entry.entry_point).display().to_string();
        extension.source_path = entry.path.clone();
        extension.installed_version = Some(meta.version);
        extension.installed_from_url = Some(source.url.clone());
        extension.mark_update(None);
        self.store.update_extension(extension)?;

        let (_, components) = plugin_records(&slug, plugin.as_ref());
        let orphaned = self.store.replace_components(&slug, components)?;
        for instance in &orphaned {
            warn!(
                "Deleted instance '{}' ({}): component {} was removed in the new version",
                instance.name, instance.id, instance.component
            );
        }

        {
            let mut registry = self.registry_write();
            registry.unregister(&slug);
            registry.register_as(&slug, plugin);
        }

        let incompatible = self.revalidate_instances(extension)?;
        for instance in &incompatible {
            warn!(
                "Instance '{}' ({}) is incompatible with {} v{}: {}",
                instance.name,
                instance.id,
                slug,
                extension.version,
                instance.errors.join(", ")
            );
        }

        Ok((orphaned.into_iter().map(|i| i.id).collect(), incompatible))
    }

    /// Move the staged tree to `cache` and reload it from there
    ///
    /// If the reload fails the previous tree is restored.
    async fn swap_into_place(
        &self,
        next: &Path,
        cache: &Path,
        entry_point: &str,
    ) -> Result<Arc<HostedPlugin>, SourceError> {
        let backup = cache.with_file_name(format!(
            ".{}.previous",
            cache.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));
        if backup.exists() {
            tokio::fs::remove_dir_all(&backup).await?;
        }
        if cache.exists() {
            tokio::fs::rename(cache, &backup).await?;
        }
        tokio::fs::rename(next, cache).await?;

        match self.loader.load(cache, entry_point).await {
            Ok(plugin) => {
                if backup.exists() {
                    tokio::fs::remove_dir_all(&backup).await?;
                }
                Ok(plugin)
            }
            Err(e) => {
                warn!("Reload from {} failed, restoring previous version", cache.display());
                tokio::fs::remove_dir_all(cache).await?;
                if backup.exists() {
                    tokio::fs::rename(&backup, cache).await?;
                }
                Err(e.into())
            }
        }
    }

    /// Validate every instance of `extension` against its component's current schema
    fn revalidate_instances(&self, extension: &Extension) -> Result<Vec<IncompatibleInstance>, SourceError> {
        let mut incompatible = Vec::new();

        for instance in self.store.list_instances(&InstanceFilter::extension(&extension.slug))? {
            let Some(component) = self.store.get_component(&instance.component)? else {
                continue;
            };
            let merged = ComponentContext::new(extension.config.clone(), instance.config.clone()).config();
            let errors = ConfigSchema::check(&component.config_schema, &Value::Object(merged));
            if !errors.is_empty() {
                incompatible.push(IncompatibleInstance {
                    id: instance.id,
                    name: instance.name,
                    component: instance.component,
                    errors,
                });
            }
        }

        Ok(incompatible)
    }

    /// Check whether the source offers a different version than the installed one
    ///
    /// Sets or clears the extension's `available_version` / `update_available`.
    /// A source that cannot be fetched is reported as no update; the error is
    /// recorded on the source.
    pub async fn check_for_updates(&self, slug: &str) -> Result<Option<String>, SourceError> {
        let _guard = self.locks.lock(slug).await;

        let extension = self.load_extension(slug)?;
        let Some(source_slug) = extension.source.clone() else {
            return Ok(None);
        };

        let mut source = self.load_source(&source_slug)?;
        match self.fetch_source(&mut source).await {
            Ok(_) => {}
            Err(e @ SourceError::Store(_)) => return Err(e),
            Err(e) => {
                warn!("Failed to check {} for updates: {}", slug, e);
                return Ok(None);
            }
        }

        self.mark_available_update(extension, &source)
    }

    /// Check an installed extension against a source that was just fetched
    ///
    /// Lets callers checking every extension of a source fetch it once.
    pub async fn check_against_source(&self, slug: &str, source: &Source) -> Result<Option<String>, SourceError> {
        let _guard = self.locks.lock(slug).await;

        let extension = self.load_extension(slug)?;
        if extension.source.as_deref() != Some(source.slug.as_str()) {
            return Ok(None);
        }
        self.mark_available_update(extension, source)
    }

    fn mark_available_update(&self, mut extension: Extension, source: &Source) -> Result<Option<String>, SourceError> {
        let available = match self.entry_in_source(&extension, source) {
            Ok(entry) => source
                .manifest
                .as_ref()
                .and_then(|manifest| offered_version(manifest, &entry)),
            Err(SourceError::NotInManifest { .. }) => {
                warn!("{} is no longer offered by its source", extension.slug);
                None
            }
            Err(e) => return Err(e),
        };

        let installed = Self::installed_version(&extension);
        let update = available.filter(|version| *version != installed);
        match &update {
            Some(version) => info!("Update available for {}: {} -> {}", extension.slug, installed, version),
            None => debug!("{} is up to date ({})", extension.slug, installed),
        }

        extension.mark_update(update.clone());
        self.store.update_extension(&extension)?;
        Ok(update)
    }

    // ========================================================================
    // Uninstall and startup
    // ========================================================================

    /// Remove an installed extension, its cache directory and its records
    pub async fn uninstall_extension(&self, slug: &str) -> Result<(), SourceError> {
        let _guard = self.locks.lock(slug).await;

        let extension = self.load_extension(slug)?;
        if extension.is_builtin() {
            return Err(docbridge_core::Error::protected(
                "Extension",
                slug,
                "built-in extensions can only be disabled",
            )
            .into());
        }

        info!("Uninstalling {}", slug);
        self.registry_write().unregister(slug);

        if let Some(source_slug) = &extension.source {
            let cache = self.extension_cache_dir(source_slug, extension.local_slug());
            if cache.exists() {
                tokio::fs::remove_dir_all(&cache).await?;
                debug!("Removed {}", cache.display());
            }
        }

        self.store.delete_extension(slug)?;
        self.record(
            slug,
            LifecycleEvent::Uninstalled {
                version: Self::installed_version(&extension),
            },
        );
        info!("Uninstalled {}", slug);
        Ok(())
    }

    /// Entry point of an installed extension relative to its cache directory
    fn entry_point_of(&self, extension: &Extension, cache: &Path, source: Option<&Source>) -> String {
        if let Ok(relative) = Path::new(&extension.code_location).strip_prefix(cache) {
            if !relative.as_os_str().is_empty() {
                return relative.to_string_lossy().to_string();
            }
        }
        source
            .and_then(|s| s.manifest.as_ref())
            .and_then(|m| m.entry(extension.local_slug()))
            .map(|entry| entry.entry_point.clone())
            .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string())
    }

    /// Register every enabled source-backed extension from its cache directory
    ///
    /// Nothing is downloaded. Extensions whose cache is missing or that fail to
    /// load are logged and skipped.
    pub async fn load_installed_plugins(&self) -> Result<LoadReport, SourceError> {
        let mut report = LoadReport::default();

        for extension in self.store.list_extensions()? {
            let Some(source_slug) = extension.source.clone().filter(|_| extension.enabled) else {
                continue;
            };

            let cache = self.extension_cache_dir(&source_slug, extension.local_slug());
            if !cache.is_dir() {
                warn!("Cache directory missing for {}: {}", extension.slug, cache.display());
                report
                    .skipped
                    .push((extension.slug.clone(), "cache directory missing".to_string()));
                continue;
            }

            let source = self.store.get_source(&source_slug)?;
            let entry_point = self.entry_point_of(&extension, &cache, source.as_ref());

            match self.loader.load(&cache, &entry_point).await {
                Ok(plugin) => {
                    if self.registry_write().register_as(&extension.slug, plugin) {
                        info!("Loaded installed extension {}", extension.slug);
                        report.loaded.push(extension.slug.clone());
                    } else {
                        report
                            .skipped
                            .push((extension.slug.clone(), "already registered".to_string()));
                    }
                }
                Err(e) => {
                    error!("Failed to load extension {}: {}", extension.slug, e);
                    report.skipped.push((extension.slug.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
