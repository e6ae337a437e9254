//! Extensions compiled into the host
//!
//! The [`BuiltinCatalog`] maps static module names (the `discovery.modules`
//! configuration list) to constructors. Built-in extensions are registered at
//! startup and recorded with a `builtin:<module>` code location.

mod core_tools;
mod json_records;
mod webhook;

pub use core_tools::{ArchiveOnApproval, CoreTools, CustomIdGenerator, FilesystemImporter, CORE_TOOLS_MODULE};
pub use json_records::JsonFileRecords;
pub use webhook::WebhookNotifier;

use docbridge_core::types::BUILTIN_LOCATION_PREFIX;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capability::Plugin;
use crate::registry::ExtensionRegistry;
use crate::source_manager::plugin_records;
use crate::store::ExtensionStore;

type PluginConstructor = fn() -> Arc<dyn Plugin>;

/// Compiled-in extension modules
#[derive(Clone)]
pub struct BuiltinCatalog {
    modules: BTreeMap<String, PluginConstructor>,
}

impl BuiltinCatalog {
    /// Catalog with no modules
    pub fn empty() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Catalog with every extension shipped in this crate
    pub fn standard() -> Self {
        Self::empty().with_module(CORE_TOOLS_MODULE, || Arc::new(CoreTools::new()))
    }

    pub fn with_module(mut self, name: &str, constructor: PluginConstructor) -> Self {
        self.modules.insert(name.to_string(), constructor);
        self
    }

    /// Instantiate the module registered under `name`
    pub fn create(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.modules.get(name).map(|constructor| constructor())
    }

    pub fn modules(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Make sure every registered built-in extension has persisted records
///
/// Extensions that already have a record keep it (and its enabled flag and
/// configuration); only missing ones are created. Returns the slugs created.
pub fn ensure_builtin_records(
    store: &dyn ExtensionStore,
    registry: &ExtensionRegistry,
    catalog: &BuiltinCatalog,
) -> docbridge_core::Result<Vec<String>> {
    let mut created = Vec::new();

    for module in catalog.modules() {
        let Some(plugin) = registry.get_plugin(module) else {
            continue;
        };
        if store.get_extension(module)?.is_some() {
            debug!("Built-in extension {} already recorded", module);
            continue;
        }

        let (mut extension, components) = plugin_records(module, plugin.as_ref());
        extension.code_location = format!("{}{}", BUILTIN_LOCATION_PREFIX, module);
        extension.installed_version = Some(extension.version.clone());

        store.create_extension(extension)?;
        store.replace_components(module, components)?;
        info!("Recorded built-in extension {}", module);
        created.push(module.to_string());
    }

    Ok(created)
}
