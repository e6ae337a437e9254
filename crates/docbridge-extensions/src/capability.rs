//! Capability contracts implemented by extensions
//!
//! An extension ([`Plugin`]) contributes components of four kinds:
//! - [`Importer`]: pulls content in through the upload helper
//! - [`PreProcessor`]: inspects a document before processing and may abort the chain
//! - [`PostProcessor`]: reacts to document events with declarative follow-up requests
//! - [`DataSource`]: fetches records from an external system for a data sink

use async_trait::async_trait;
use docbridge_core::types::{ComponentKind, Document, DocumentEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::helpers::{DataSinkHelper, UploadHelper};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Metadata describing an extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMeta {
    pub slug: String,
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "empty_object")]
    pub config_schema: Value,

    /// Package requirements (e.g. `requests>=2,<3`)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMeta {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            version: version.into(),
            author: String::new(),
            description: String::new(),
            config_schema: empty_object(),
            dependencies: Vec::new(),
        }
    }
}

/// Metadata describing one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMeta {
    pub slug: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "empty_object")]
    pub config_schema: Value,

    /// Events a post-processor handles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_events: Vec<DocumentEvent>,
}

impl ComponentMeta {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            config_schema: empty_object(),
            supported_events: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.config_schema = schema;
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = DocumentEvent>) -> Self {
        self.supported_events = events.into_iter().collect();
        self
    }
}

/// Configuration handed to a component for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentContext {
    pub plugin_config: Value,
    pub instance_config: Value,
}

impl ComponentContext {
    pub fn new(plugin_config: Value, instance_config: Value) -> Self {
        Self {
            plugin_config,
            instance_config,
        }
    }

    /// Extension configuration overlaid with instance configuration
    pub fn config(&self) -> Map<String, Value> {
        let mut merged = self.plugin_config.as_object().cloned().unwrap_or_default();
        if let Some(instance) = self.instance_config.as_object() {
            for (key, value) in instance {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.instance_config
            .get(key)
            .or_else(|| self.plugin_config.get(key))
            .cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|v| v.as_str().map(String::from))
            .filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }
}

/// Outcome of importing one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ImportResult {
    pub fn uploaded(identifier: impl Into<String>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            success: true,
            document_identifier: Some(identifier.into()),
            message: format!("Successfully uploaded {}", file_name),
            file_name: Some(file_name),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Outcome of a pre-processor run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreProcessResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_custom_identifier: Option<String>,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Halt the remaining pre-processor chain for this document
    #[serde(default)]
    pub abort: bool,
}

impl PreProcessResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_abort(mut self) -> Self {
        self.abort = true;
        self
    }
}

/// Outcome of a post-processor run; follow-up actions are requests the executor performs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessResult {
    pub success: bool,

    #[serde(default)]
    pub archive_document: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_custom_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file_name: Option<String>,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PostProcessResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Whether the result requests any follow-up action
    pub fn has_actions(&self) -> bool {
        self.archive_document || self.new_custom_identifier.is_some() || self.new_file_name.is_some()
    }
}

/// One record fetched from an external system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub identifier: String,

    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DataRecord {
    pub fn new(identifier: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            identifier: identifier.into(),
            data,
        }
    }
}

/// Outcome of a data-source sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSyncResult {
    pub success: bool,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DataSourceSyncResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            errors: vec![message.clone()],
            message,
            ..Default::default()
        }
    }
}

/// Pulls content into the service through the upload helper
#[async_trait]
pub trait Importer: Send + Sync {
    fn meta(&self) -> &ComponentMeta;

    /// Extra validation beyond the JSON schema (empty = valid)
    async fn validate_config(&self, _ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn run(&self, ctx: &ComponentContext, uploads: &dyn UploadHelper) -> anyhow::Result<Vec<ImportResult>>;
}

/// Runs against a document before it is processed
#[async_trait]
pub trait PreProcessor: Send + Sync {
    fn meta(&self) -> &ComponentMeta;

    async fn validate_config(&self, _ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn process(&self, ctx: &ComponentContext, document: &Document) -> anyhow::Result<PreProcessResult>;
}

/// Reacts to document lifecycle events
#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn meta(&self) -> &ComponentMeta;

    /// Events this post-processor handles
    fn supported_events(&self) -> &[DocumentEvent] {
        &self.meta().supported_events
    }

    async fn validate_config(&self, _ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn process(
        &self,
        ctx: &ComponentContext,
        document: &Document,
        event: DocumentEvent,
    ) -> anyhow::Result<PostProcessResult>;
}

/// Fetches records from an external system
#[async_trait]
pub trait DataSource: Send + Sync {
    fn meta(&self) -> &ComponentMeta;

    async fn validate_config(&self, _ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn fetch_records(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<DataRecord>>;

    /// Fetch records and push them into `sink_id`; failures become a failed result
    async fn sync(&self, ctx: &ComponentContext, sink_id: &str, sink: &dyn DataSinkHelper) -> DataSourceSyncResult {
        let records = match self.fetch_records(ctx).await {
            Ok(records) => records,
            Err(e) => return DataSourceSyncResult::failed(format!("Failed to fetch records: {:#}", e)),
        };

        if records.is_empty() {
            return DataSourceSyncResult::ok("No records to sync");
        }

        match sink.sync_records(sink_id, &records, false).await {
            Ok(counts) => DataSourceSyncResult {
                success: counts.failed == 0,
                created: counts.created,
                updated: counts.updated,
                failed: counts.failed,
                message: format!(
                    "Synced {} records: {} created, {} updated, {} failed",
                    records.len(),
                    counts.created,
                    counts.updated,
                    counts.failed
                ),
                errors: Vec::new(),
            },
            Err(e) => DataSourceSyncResult::failed(format!("Failed to sync records to {}: {:#}", sink_id, e)),
        }
    }
}

/// An extension implementation: metadata plus its components
pub trait Plugin: Send + Sync {
    fn meta(&self) -> &PluginMeta;

    fn importers(&self) -> Vec<Arc<dyn Importer>> {
        Vec::new()
    }

    fn preprocessors(&self) -> Vec<Arc<dyn PreProcessor>> {
        Vec::new()
    }

    fn postprocessors(&self) -> Vec<Arc<dyn PostProcessor>> {
        Vec::new()
    }

    fn datasources(&self) -> Vec<Arc<dyn DataSource>> {
        Vec::new()
    }

    /// Metadata of every component, tagged with its kind
    fn component_metas(&self) -> Vec<(ComponentKind, ComponentMeta)> {
        let mut metas = Vec::new();
        metas.extend(self.importers().iter().map(|c| (ComponentKind::Importer, c.meta().clone())));
        metas.extend(self.preprocessors().iter().map(|c| (ComponentKind::Preprocessor, c.meta().clone())));
        metas.extend(self.postprocessors().iter().map(|c| (ComponentKind::Postprocessor, c.meta().clone())));
        metas.extend(self.datasources().iter().map(|c| (ComponentKind::Datasource, c.meta().clone())));
        metas
    }
}
