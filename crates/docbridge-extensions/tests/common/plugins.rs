//! In-process test plugins
//!
//! Components with scripted outcomes that append to a shared [`Journal`], plus
//! a [`Harness`] wiring a memory store, registry, recording helpers and an
//! executor together.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use docbridge_core::types::{Component, Document, DocumentEvent, Instance};
use docbridge_extensions::capability::{
    ComponentContext, ComponentMeta, DataRecord, DataSource, ImportResult, Importer, Plugin, PluginMeta,
    PostProcessResult, PostProcessor, PreProcessResult, PreProcessor,
};
use docbridge_extensions::helpers::UploadHelper;
use docbridge_extensions::helpers::UploadRequest;
use docbridge_extensions::registry::{ExtensionRegistry, SharedRegistry};
use docbridge_extensions::source_manager::plugin_records;
use docbridge_extensions::store::{ExtensionStore, MemoryStore};
use docbridge_extensions::Executor;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::mocks::{entries, journal, Journal, RecordingHelpers};

/// What a scripted component does when run
#[derive(Clone)]
pub enum Outcome<T> {
    Return(T),
    Error(String),
}

impl<T: Clone> Outcome<T> {
    fn produce(&self) -> Result<T> {
        match self {
            Outcome::Return(value) => Ok(value.clone()),
            Outcome::Error(message) => Err(anyhow!(message.clone())),
        }
    }
}

pub struct ScriptedPreProcessor {
    meta: ComponentMeta,
    outcome: Outcome<PreProcessResult>,
    config_errors: Vec<String>,
    journal: Journal,
}

impl ScriptedPreProcessor {
    pub fn new(slug: &str, outcome: Outcome<PreProcessResult>, journal: &Journal) -> Self {
        Self {
            meta: ComponentMeta::new(slug, slug),
            outcome,
            config_errors: Vec::new(),
            journal: journal.clone(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.meta = self.meta.with_schema(schema);
        self
    }

    pub fn with_config_errors(mut self, errors: &[&str]) -> Self {
        self.config_errors = errors.iter().map(|e| e.to_string()).collect();
        self
    }
}

#[async_trait]
impl PreProcessor for ScriptedPreProcessor {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, _ctx: &ComponentContext) -> Result<Vec<String>> {
        Ok(self.config_errors.clone())
    }

    async fn process(&self, ctx: &ComponentContext, document: &Document) -> Result<PreProcessResult> {
        let label = ctx.get_str("label").unwrap_or_else(|| self.meta.slug.clone());
        self.journal
            .lock()
            .unwrap()
            .push(format!("pre:{}:{}", label, document.identifier));
        self.outcome.produce()
    }
}

pub struct ScriptedPostProcessor {
    meta: ComponentMeta,
    outcome: Outcome<PostProcessResult>,
    journal: Journal,
}

impl ScriptedPostProcessor {
    pub fn new(slug: &str, outcome: Outcome<PostProcessResult>, journal: &Journal) -> Self {
        Self {
            meta: ComponentMeta::new(slug, slug).with_events([
                DocumentEvent::Uploaded,
                DocumentEvent::Approved,
                DocumentEvent::Archived,
                DocumentEvent::Rejected,
                DocumentEvent::Updated,
            ]),
            outcome,
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl PostProcessor for ScriptedPostProcessor {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn process(
        &self,
        ctx: &ComponentContext,
        document: &Document,
        event: DocumentEvent,
    ) -> Result<PostProcessResult> {
        let label = ctx.get_str("label").unwrap_or_else(|| self.meta.slug.clone());
        self.journal
            .lock()
            .unwrap()
            .push(format!("post:{}:{}:{}", label, event, document.identifier));
        self.outcome.produce()
    }
}

/// Uploads one fixed file through the upload helper
pub struct SingleFileImporter {
    meta: ComponentMeta,
}

impl SingleFileImporter {
    pub fn new(slug: &str) -> Self {
        Self {
            meta: ComponentMeta::new(slug, slug),
        }
    }
}

#[async_trait]
impl Importer for SingleFileImporter {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn run(&self, ctx: &ComponentContext, uploads: &dyn UploadHelper) -> Result<Vec<ImportResult>> {
        let collection = ctx.get_str("collection").unwrap_or_else(|| "inbox".to_string());
        let uploaded = uploads
            .upload(UploadRequest::new(b"%PDF".to_vec(), "scan.pdf", collection))
            .await?;
        Ok(vec![ImportResult::uploaded(uploaded.identifier, "scan.pdf")])
    }
}

/// Returns fixed records
pub struct FixedRecords {
    meta: ComponentMeta,
    outcome: Outcome<Vec<DataRecord>>,
}

impl FixedRecords {
    pub fn new(slug: &str, outcome: Outcome<Vec<DataRecord>>) -> Self {
        Self {
            meta: ComponentMeta::new(slug, slug),
            outcome,
        }
    }
}

#[async_trait]
impl DataSource for FixedRecords {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn fetch_records(&self, _ctx: &ComponentContext) -> Result<Vec<DataRecord>> {
        self.outcome.produce()
    }
}

pub fn record(identifier: &str, name: &str) -> DataRecord {
    let mut data = Map::new();
    data.insert("name".to_string(), json!(name));
    DataRecord::new(identifier, data)
}

/// A plugin assembled from arbitrary components
pub struct TestPlugin {
    meta: PluginMeta,
    importers: Vec<Arc<dyn Importer>>,
    preprocessors: Vec<Arc<dyn PreProcessor>>,
    postprocessors: Vec<Arc<dyn PostProcessor>>,
    datasources: Vec<Arc<dyn DataSource>>,
}

impl TestPlugin {
    pub fn new(slug: &str, version: &str) -> Self {
        Self {
            meta: PluginMeta::new(slug, slug, version),
            importers: Vec::new(),
            preprocessors: Vec::new(),
            postprocessors: Vec::new(),
            datasources: Vec::new(),
        }
    }

    pub fn with_importer(mut self, importer: impl Importer + 'static) -> Self {
        self.importers.push(Arc::new(importer));
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: impl PreProcessor + 'static) -> Self {
        self.preprocessors.push(Arc::new(preprocessor));
        self
    }

    pub fn with_postprocessor(mut self, postprocessor: impl PostProcessor + 'static) -> Self {
        self.postprocessors.push(Arc::new(postprocessor));
        self
    }

    pub fn with_datasource(mut self, datasource: impl DataSource + 'static) -> Self {
        self.datasources.push(Arc::new(datasource));
        self
    }

    pub fn build(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }
}

impl Plugin for TestPlugin {
    fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    fn importers(&self) -> Vec<Arc<dyn Importer>> {
        self.importers.clone()
    }

    fn preprocessors(&self) -> Vec<Arc<dyn PreProcessor>> {
        self.preprocessors.clone()
    }

    fn postprocessors(&self) -> Vec<Arc<dyn PostProcessor>> {
        self.postprocessors.clone()
    }

    fn datasources(&self) -> Vec<Arc<dyn DataSource>> {
        self.datasources.clone()
    }
}

/// Store, registry, helpers and executor wired together
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub registry: SharedRegistry,
    pub helpers: RecordingHelpers,
    pub executor: Arc<Executor>,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_helpers(RecordingHelpers::new())
    }

    pub fn with_helpers(helpers: RecordingHelpers) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = ExtensionRegistry::new().into_shared();
        let executor = Arc::new(Executor::new(
            store.clone(),
            registry.clone(),
            Arc::new(helpers.clone()),
        ));
        Self {
            store,
            registry,
            helpers,
            executor,
            journal: journal(),
        }
    }

    /// Register `plugin` and persist its extension and component records
    pub fn install(&self, plugin: Arc<dyn Plugin>) {
        let slug = plugin.meta().slug.clone();
        let (extension, components) = plugin_records(&slug, plugin.as_ref());
        self.store.create_extension(extension).unwrap();
        self.store.replace_components(&slug, components).unwrap();
        self.registry.write().unwrap().register(plugin);
    }

    /// Persist a new instance of `component` (full slug)
    pub fn instance(&self, component: &str, name: &str, build: impl FnOnce(Instance) -> Instance) -> Instance {
        let component: Component = self.store.get_component(component).unwrap().unwrap();
        let instance = build(Instance::new(&component, name));
        self.store.create_instance(instance.clone()).unwrap();
        instance
    }

    pub fn journal(&self) -> Vec<String> {
        entries(&self.journal)
    }

    pub fn set_extension_enabled(&self, slug: &str, enabled: bool) {
        let mut extension = self.store.get_extension(slug).unwrap().unwrap();
        extension.enabled = enabled;
        self.store.update_extension(&extension).unwrap();
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn document(identifier: &str) -> Document {
    Document::new(identifier, format!("{}.pdf", identifier))
}
