//! Persistence interface for the extension runtime
//!
//! The runtime reads and writes its records through [`ExtensionStore`]. The
//! relational database of a production host sits behind this trait; the
//! workspace ships two implementations:
//! - [`MemoryStore`]: RwLock-guarded maps, used by tests and embedders
//! - [`crate::file_store::FileStore`]: whole state in one locked JSON file, used by the CLI
//!
//! Both share the integrity rules in [`StoreState`]:
//! - Source, Extension and Component slugs are unique
//! - `(source, source_path)` is unique among Source-backed Extensions
//! - built-in Sources cannot be deleted; deleting a user Source orphans its Extensions
//! - Extension -> Component -> Instance -> ExecutionLog deletes cascade
//! - an ExecutionLog is completed exactly once

use chrono::Utc;
use docbridge_core::error::{Error, Result};
use docbridge_core::types::{
    Component, ComponentKind, ExecutionLog, Extension, Instance, LogCompletion, Source,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Filter for [`ExtensionStore::list_instances`]
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub kind: Option<ComponentKind>,
    /// Owning extension slug
    pub extension: Option<String>,
    /// Component full slug
    pub component: Option<String>,
    pub enabled: Option<bool>,
}

impl InstanceFilter {
    pub fn kind(kind: ComponentKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn extension(slug: impl Into<String>) -> Self {
        Self {
            extension: Some(slug.into()),
            ..Default::default()
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = Some(true);
        self
    }

    fn matches(&self, instance: &Instance) -> bool {
        if let Some(kind) = self.kind {
            if instance.kind != kind {
                return false;
            }
        }
        if let Some(extension) = &self.extension {
            if instance.extension_slug() != extension {
                return false;
            }
        }
        if let Some(component) = &self.component {
            if &instance.component != component {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if instance.enabled != enabled {
                return false;
            }
        }
        true
    }
}

/// Persistence operations used by the runtime
pub trait ExtensionStore: Send + Sync {
    // Sources
    fn list_sources(&self) -> Result<Vec<Source>>;
    fn get_source(&self, slug: &str) -> Result<Option<Source>>;
    fn create_source(&self, source: Source) -> Result<()>;
    fn update_source(&self, source: &Source) -> Result<()>;
    fn delete_source(&self, slug: &str) -> Result<()>;

    // Extensions
    fn list_extensions(&self) -> Result<Vec<Extension>>;
    fn get_extension(&self, slug: &str) -> Result<Option<Extension>>;
    fn create_extension(&self, extension: Extension) -> Result<()>;
    fn update_extension(&self, extension: &Extension) -> Result<()>;
    /// Delete an extension with its components, instances and logs
    fn delete_extension(&self, slug: &str) -> Result<()>;

    // Components
    fn list_components(&self, extension: Option<&str>) -> Result<Vec<Component>>;
    fn get_component(&self, full_slug: &str) -> Result<Option<Component>>;
    /// Replace every component of `extension`; returns instances deleted because
    /// their component no longer exists
    fn replace_components(&self, extension: &str, components: Vec<Component>) -> Result<Vec<Instance>>;

    // Instances
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>>;
    fn get_instance(&self, id: Uuid) -> Result<Option<Instance>>;
    fn create_instance(&self, instance: Instance) -> Result<()>;
    fn update_instance(&self, instance: &Instance) -> Result<()>;
    fn delete_instance(&self, id: Uuid) -> Result<()>;

    // Execution logs
    fn create_log(&self, log: ExecutionLog) -> Result<()>;
    /// Complete a started log; a second completion is rejected
    fn complete_log(&self, id: Uuid, completion: LogCompletion) -> Result<ExecutionLog>;
    fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>>;
    /// Logs of one instance, newest first
    fn list_logs(&self, instance: Uuid) -> Result<Vec<ExecutionLog>>;
}

/// Complete persisted state with integrity rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub sources: BTreeMap<String, Source>,
    #[serde(default)]
    pub extensions: BTreeMap<String, Extension>,
    /// Keyed by component full slug
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
    #[serde(default)]
    pub instances: BTreeMap<Uuid, Instance>,
    #[serde(default)]
    pub logs: BTreeMap<Uuid, ExecutionLog>,
}

impl StoreState {
    pub fn create_source(&mut self, source: Source) -> Result<()> {
        if self.sources.contains_key(&source.slug) {
            return Err(Error::already_exists("source", &source.slug));
        }
        self.sources.insert(source.slug.clone(), source);
        Ok(())
    }

    pub fn update_source(&mut self, source: &Source) -> Result<()> {
        let existing = self
            .sources
            .get_mut(&source.slug)
            .ok_or_else(|| Error::not_found("source", &source.slug))?;
        *existing = source.clone();
        Ok(())
    }

    pub fn delete_source(&mut self, slug: &str) -> Result<()> {
        let source = self.sources.get(slug).ok_or_else(|| Error::not_found("source", slug))?;
        if source.is_builtin() {
            return Err(Error::protected(
                "source",
                slug,
                "built-in sources can only be disabled",
            ));
        }

        self.sources.remove(slug);
        for extension in self.extensions.values_mut() {
            if extension.source.as_deref() == Some(slug) {
                debug!("Orphaning extension {} from deleted source {}", extension.slug, slug);
                extension.source = None;
            }
        }
        Ok(())
    }

    pub fn create_extension(&mut self, extension: Extension) -> Result<()> {
        if self.extensions.contains_key(&extension.slug) {
            return Err(Error::already_exists("extension", &extension.slug));
        }
        self.check_source_path_unique(&extension)?;
        self.extensions.insert(extension.slug.clone(), extension);
        Ok(())
    }

    pub fn update_extension(&mut self, extension: &Extension) -> Result<()> {
        if !self.extensions.contains_key(&extension.slug) {
            return Err(Error::not_found("extension", &extension.slug));
        }
        self.check_source_path_unique(extension)?;
        self.extensions.insert(extension.slug.clone(), extension.clone());
        Ok(())
    }

    fn check_source_path_unique(&self, extension: &Extension) -> Result<()> {
        let Some(source) = &extension.source else {
            return Ok(());
        };
        let clash = self.extensions.values().any(|other| {
            other.slug != extension.slug
                && other.source.as_ref() == Some(source)
                && other.source_path == extension.source_path
        });
        if clash {
            return Err(Error::already_exists(
                "extension",
                format!("{}:{}", source, extension.source_path),
            ));
        }
        Ok(())
    }

    pub fn delete_extension(&mut self, slug: &str) -> Result<()> {
        if self.extensions.remove(slug).is_none() {
            return Err(Error::not_found("extension", slug));
        }
        let removed = self.replace_components(slug, Vec::new())?;
        debug!(
            "Deleted extension {} with {} instance(s)",
            slug,
            removed.len()
        );
        Ok(())
    }

    pub fn list_components(&self, extension: Option<&str>) -> Vec<Component> {
        self.components
            .values()
            .filter(|c| extension.is_none_or(|slug| c.extension == slug))
            .cloned()
            .collect()
    }

    pub fn replace_components(&mut self, extension: &str, components: Vec<Component>) -> Result<Vec<Instance>> {
        let mut seen = BTreeSet::new();
        for component in &components {
            if component.extension != extension {
                return Err(Error::invalid_state(format!(
                    "Component {} does not belong to extension {}",
                    component.full_slug(),
                    extension
                )));
            }
            if !seen.insert(component.full_slug()) {
                return Err(Error::already_exists("component", component.full_slug()));
            }
        }

        self.components.retain(|_, c| c.extension != extension);
        for component in components {
            self.components.insert(component.full_slug(), component);
        }

        let orphaned: Vec<Uuid> = self
            .instances
            .values()
            .filter(|i| i.extension_slug() == extension && !self.components.contains_key(&i.component))
            .map(|i| i.id)
            .collect();

        let mut removed = Vec::new();
        for id in orphaned {
            if let Some(instance) = self.remove_instance(id) {
                removed.push(instance);
            }
        }
        Ok(removed)
    }

    pub fn list_instances(&self, filter: &InstanceFilter) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        instances.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        instances
    }

    pub fn create_instance(&mut self, instance: Instance) -> Result<()> {
        if self.instances.contains_key(&instance.id) {
            return Err(Error::already_exists("instance", instance.id.to_string()));
        }
        let component = self
            .components
            .get(&instance.component)
            .ok_or_else(|| Error::not_found("component", &instance.component))?;
        if component.kind != instance.kind {
            return Err(Error::invalid_state(format!(
                "Instance kind {} does not match component {} ({})",
                instance.kind, instance.component, component.kind
            )));
        }
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    pub fn update_instance(&mut self, instance: &Instance) -> Result<()> {
        let existing = self
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| Error::not_found("instance", instance.id.to_string()))?;
        *existing = instance.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    pub fn delete_instance(&mut self, id: Uuid) -> Result<()> {
        self.remove_instance(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("instance", id.to_string()))
    }

    fn remove_instance(&mut self, id: Uuid) -> Option<Instance> {
        let instance = self.instances.remove(&id)?;
        self.logs.retain(|_, log| log.instance != id);
        Some(instance)
    }

    pub fn create_log(&mut self, log: ExecutionLog) -> Result<()> {
        if !self.instances.contains_key(&log.instance) {
            return Err(Error::not_found("instance", log.instance.to_string()));
        }
        if self.logs.contains_key(&log.id) {
            return Err(Error::already_exists("execution log", log.id.to_string()));
        }
        self.logs.insert(log.id, log);
        Ok(())
    }

    pub fn complete_log(&mut self, id: Uuid, completion: LogCompletion) -> Result<ExecutionLog> {
        let log = self
            .logs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("execution log", id.to_string()))?;
        if log.is_completed() {
            return Err(Error::invalid_state(format!(
                "Execution log {} is already completed",
                id
            )));
        }

        log.status = completion.status;
        log.output = completion.output;
        log.error = completion.error;
        log.completed_at = Some(Utc::now());
        Ok(log.clone())
    }

    pub fn list_logs(&self, instance: Uuid) -> Vec<ExecutionLog> {
        let mut logs: Vec<ExecutionLog> = self
            .logs
            .values()
            .filter(|log| log.instance == instance)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::storage("store lock poisoned"))?;
        Ok(f(&state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::storage("store lock poisoned"))?;
        f(&mut state)
    }
}

impl ExtensionStore for MemoryStore {
    fn list_sources(&self) -> Result<Vec<Source>> {
        self.read(|s| s.sources.values().cloned().collect())
    }

    fn get_source(&self, slug: &str) -> Result<Option<Source>> {
        self.read(|s| s.sources.get(slug).cloned())
    }

    fn create_source(&self, source: Source) -> Result<()> {
        self.write(|s| s.create_source(source))
    }

    fn update_source(&self, source: &Source) -> Result<()> {
        self.write(|s| s.update_source(source))
    }

    fn delete_source(&self, slug: &str) -> Result<()> {
        self.write(|s| s.delete_source(slug))
    }

    fn list_extensions(&self) -> Result<Vec<Extension>> {
        self.read(|s| s.extensions.values().cloned().collect())
    }

    fn get_extension(&self, slug: &str) -> Result<Option<Extension>> {
        self.read(|s| s.extensions.get(slug).cloned())
    }

    fn create_extension(&self, extension: Extension) -> Result<()> {
        self.write(|s| s.create_extension(extension))
    }

    fn update_extension(&self, extension: &Extension) -> Result<()> {
        self.write(|s| s.update_extension(extension))
    }

    fn delete_extension(&self, slug: &str) -> Result<()> {
        self.write(|s| s.delete_extension(slug))
    }

    fn list_components(&self, extension: Option<&str>) -> Result<Vec<Component>> {
        self.read(|s| s.list_components(extension))
    }

    fn get_component(&self, full_slug: &str) -> Result<Option<Component>> {
        self.read(|s| s.components.get(full_slug).cloned())
    }

    fn replace_components(&self, extension: &str, components: Vec<Component>) -> Result<Vec<Instance>> {
        self.write(|s| s.replace_components(extension, components))
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        self.read(|s| s.list_instances(filter))
    }

    fn get_instance(&self, id: Uuid) -> Result<Option<Instance>> {
        self.read(|s| s.instances.get(&id).cloned())
    }

    fn create_instance(&self, instance: Instance) -> Result<()> {
        self.write(|s| s.create_instance(instance))
    }

    fn update_instance(&self, instance: &Instance) -> Result<()> {
        self.write(|s| s.update_instance(instance))
    }

    fn delete_instance(&self, id: Uuid) -> Result<()> {
        self.write(|s| s.delete_instance(id))
    }

    fn create_log(&self, log: ExecutionLog) -> Result<()> {
        self.write(|s| s.create_log(log))
    }

    fn complete_log(&self, id: Uuid, completion: LogCompletion) -> Result<ExecutionLog> {
        self.write(|s| s.complete_log(id, completion))
    }

    fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>> {
        self.read(|s| s.logs.get(&id).cloned())
    }

    fn list_logs(&self, instance: Uuid) -> Result<Vec<ExecutionLog>> {
        self.read(|s| s.list_logs(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_core::types::{ExecutionStatus, SourceKind};
    use serde_json::json;

    fn seeded_store() -> (MemoryStore, Instance) {
        let store = MemoryStore::new();
        store
            .create_source(Source::new("acme", "Acme", "https://github.com/acme/plugins", SourceKind::User))
            .unwrap();

        let mut ext = Extension::new("acme.word-count", "Word Count", "1.0.0");
        ext.source = Some("acme".into());
        ext.source_path = "word-count".into();
        store.create_extension(ext).unwrap();

        let component = Component::new("acme.word-count", ComponentKind::Postprocessor, "counter", "Counter");
        store
            .replace_components("acme.word-count", vec![component.clone()])
            .unwrap();

        let instance = Instance::new(&component, "count");
        store.create_instance(instance.clone()).unwrap();
        (store, instance)
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let (store, _) = seeded_store();
        let err = store
            .create_extension(Extension::new("acme.word-count", "Again", "1.0.0"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_source_path_unique_per_source() {
        let (store, _) = seeded_store();
        let mut other = Extension::new("acme.other", "Other", "1.0.0");
        other.source = Some("acme".into());
        other.source_path = "word-count".into();
        assert!(store.create_extension(other).is_err());
    }

    #[test]
    fn test_delete_extension_cascades() {
        let (store, instance) = seeded_store();
        store
            .create_log(ExecutionLog::start(instance.id, json!({})))
            .unwrap();

        store.delete_extension("acme.word-count").unwrap();
        assert!(store.list_components(None).unwrap().is_empty());
        assert!(store.get_instance(instance.id).unwrap().is_none());
        assert!(store.list_logs(instance.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_user_source_orphans_extensions() {
        let (store, _) = seeded_store();
        store.delete_source("acme").unwrap();

        let ext = store.get_extension("acme.word-count").unwrap().unwrap();
        assert!(ext.source.is_none());
    }

    #[test]
    fn test_builtin_source_cannot_be_deleted() {
        let store = MemoryStore::new();
        store
            .create_source(Source::new("official", "Official", "https://github.com/docbridge/plugins", SourceKind::Builtin))
            .unwrap();
        let err = store.delete_source("official").unwrap_err();
        assert!(matches!(err, Error::Protected { .. }));
    }

    #[test]
    fn test_replace_components_drops_orphaned_instances() {
        let (store, instance) = seeded_store();
        let renamed = Component::new("acme.word-count", ComponentKind::Postprocessor, "tally", "Tally");

        let removed = store.replace_components("acme.word-count", vec![renamed]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, instance.id);
        assert!(store.get_component("acme.word-count.counter").unwrap().is_none());
    }

    #[test]
    fn test_instance_requires_matching_component() {
        let (store, _) = seeded_store();
        let component = Component::new("acme.word-count", ComponentKind::Importer, "counter", "Counter");
        let err = store.create_instance(Instance::new(&component, "wrong kind")).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_log_completed_exactly_once() {
        let (store, instance) = seeded_store();
        let log = ExecutionLog::start(instance.id, json!({"document": "doc-1"}));
        let id = log.id;
        store.create_log(log).unwrap();

        let done = store
            .complete_log(id, LogCompletion::success(json!({"ok": true})))
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert!(done.completed_at.is_some());

        assert!(store.complete_log(id, LogCompletion::failure("again")).is_err());
    }

    #[test]
    fn test_list_instances_orders_by_priority_then_creation() {
        let (store, first) = seeded_store();
        let component = store.get_component("acme.word-count.counter").unwrap().unwrap();
        let early = Instance::new(&component, "early").with_priority(10);
        let late = Instance::new(&component, "late").with_priority(100);
        store.create_instance(early.clone()).unwrap();
        store.create_instance(late.clone()).unwrap();

        let ids: Vec<Uuid> = store
            .list_instances(&InstanceFilter::kind(ComponentKind::Postprocessor))
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![early.id, first.id, late.id]);
    }
}
