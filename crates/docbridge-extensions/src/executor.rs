//! Instance executor
//!
//! Runs a persisted [`Instance`] against the implementation registered for its
//! component. Every run that gets past the cheap filters (enabled flag,
//! collection scope, event triggers) is recorded as an [`ExecutionLog`] that is
//! created `started` and completed exactly once.
//!
//! Capability failures never escape as errors: they complete the log as failed
//! and come back as a failed result. The outer `Result` is reserved for caller
//! bugs (wrong component kind) and persistence failures.

use docbridge_core::types::{
    ComponentKind, Document, DocumentEvent, ExecutionLog, Instance, LogCompletion,
};
use docbridge_core::ConfigSchema;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLockReadGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{
    ComponentContext, DataSourceSyncResult, ImportResult, PostProcessResult, PreProcessResult,
};
use crate::helpers::{DocumentHelper, HelperProvider, HelperScope};
use crate::registry::{ExtensionRegistry, SharedRegistry};
use crate::store::{ExtensionStore, InstanceFilter};

/// Errors that escape the executor
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Instance '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Store(#[from] docbridge_core::Error),
}

/// Configuration and schema an instance runs with
struct RunInputs {
    plugin_config: Value,
    schema: Value,
}

/// Runs instances of all four capability kinds
pub struct Executor {
    store: Arc<dyn ExtensionStore>,
    registry: SharedRegistry,
    helpers: Arc<dyn HelperProvider>,
}

fn config_errors(errors: Vec<String>) -> String {
    format!("Configuration errors: {}", errors.join(", "))
}

/// Turn the result of a `validate_config` hook into a run failure
fn check_hook(result: anyhow::Result<Vec<String>>) -> Result<(), String> {
    match result {
        Ok(errors) if errors.is_empty() => Ok(()),
        Ok(errors) => Err(config_errors(errors)),
        Err(e) => Err(format!("Configuration validation failed: {:#}", e)),
    }
}

fn to_output<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Executor {
    pub fn new(
        store: Arc<dyn ExtensionStore>,
        registry: SharedRegistry,
        helpers: Arc<dyn HelperProvider>,
    ) -> Self {
        Self {
            store,
            registry,
            helpers,
        }
    }

    fn registry(&self) -> RwLockReadGuard<'_, ExtensionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_kind(instance: &Instance, expected: ComponentKind) -> Result<(), ExecutorError> {
        if instance.kind == expected {
            return Ok(());
        }
        Err(ExecutorError::KindMismatch {
            name: instance.name.clone(),
            expected: expected.label(),
            actual: instance.kind.label(),
        })
    }

    fn load_inputs(&self, instance: &Instance) -> Result<RunInputs, ExecutorError> {
        let plugin_config = self
            .store
            .get_extension(instance.extension_slug())?
            .map(|extension| extension.config)
            .unwrap_or_else(|| json!({}));
        let schema = self
            .store
            .get_component(&instance.component)?
            .map(|component| component.config_schema)
            .unwrap_or_else(|| json!({}));
        Ok(RunInputs { plugin_config, schema })
    }

    /// Merge extension and instance config, apply schema defaults and validate
    fn context(instance: &Instance, inputs: &RunInputs) -> Result<ComponentContext, String> {
        let merged = Value::Object(ComponentContext::new(inputs.plugin_config.clone(), instance.config.clone()).config());
        let schema = ConfigSchema::compile(&inputs.schema).map_err(|e| config_errors(vec![e.to_string()]))?;
        let config = schema.apply_defaults(&merged);

        let errors = schema.validate(&config);
        if !errors.is_empty() {
            return Err(config_errors(errors));
        }
        Ok(ComponentContext::new(inputs.plugin_config.clone(), config))
    }

    fn start_log(&self, log: ExecutionLog) -> Result<Uuid, ExecutorError> {
        let id = log.id;
        self.store.create_log(log)?;
        Ok(id)
    }

    fn complete_log(&self, log_id: Uuid, completion: LogCompletion) -> Result<(), ExecutorError> {
        self.store.complete_log(log_id, completion)?;
        Ok(())
    }

    // ========================================================================
    // Importers
    // ========================================================================

    /// Run an importer instance
    pub async fn execute_importer(&self, instance: &Instance) -> Result<Vec<ImportResult>, ExecutorError> {
        Self::check_kind(instance, ComponentKind::Importer)?;
        if !instance.enabled {
            info!("Skipping disabled importer: {}", instance.name);
            return Ok(Vec::new());
        }

        let inputs = self.load_inputs(instance)?;
        let log_id = self.start_log(ExecutionLog::start(instance.id, json!({"config": instance.config})))?;

        match self.run_importer(instance, &inputs).await {
            Ok(results) => {
                info!("Importer {} completed: {} results", instance.name, results.len());
                self.complete_log(log_id, LogCompletion::success(json!({"results": results})))?;
                Ok(results)
            }
            Err(message) => {
                error!("Importer {} failed: {}", instance.name, message);
                self.complete_log(log_id, LogCompletion::failure(&message))?;
                Ok(vec![ImportResult::failed(message)])
            }
        }
    }

    async fn run_importer(&self, instance: &Instance, inputs: &RunInputs) -> Result<Vec<ImportResult>, String> {
        let importer = self
            .registry()
            .get_importer(&instance.component)
            .ok_or_else(|| format!("Importer not found: {}", instance.component))?;

        let ctx = Self::context(instance, inputs)?;
        check_hook(importer.validate_config(&ctx).await)?;

        let helper = self
            .helpers
            .upload_helper()
            .await
            .map_err(|e| format!("Failed to open upload helper: {:#}", e))?;
        let uploads = HelperScope::new(helper);

        importer.run(&ctx, &*uploads).await.map_err(|e| format!("{:#}", e))
    }

    // ========================================================================
    // Pre-processors
    // ========================================================================

    /// Run a pre-processor instance on a document
    pub async fn execute_preprocessor(
        &self,
        instance: &Instance,
        document: &Document,
    ) -> Result<PreProcessResult, ExecutorError> {
        Self::check_kind(instance, ComponentKind::Preprocessor)?;
        if !instance.enabled {
            return Ok(PreProcessResult::ok("Pre-processor disabled"));
        }
        if !instance.in_scope(document.collection.as_deref()) {
            return Ok(PreProcessResult::ok("Document not in configured collections"));
        }

        let inputs = self.load_inputs(instance)?;
        let log = ExecutionLog::start(
            instance.id,
            json!({
                "document_identifier": document.identifier,
                "file_name": document.file_name,
                "custom_identifier": document.custom_identifier,
            }),
        )
        .with_document(&document.identifier);
        let log_id = self.start_log(log)?;

        match self.run_preprocessor(instance, &inputs, document).await {
            Ok(result) => {
                let output = to_output(&result);
                if result.success {
                    info!("Pre-processor {} completed for document {}", instance.name, document.identifier);
                    self.complete_log(log_id, LogCompletion::success(output))?;
                } else {
                    warn!("Pre-processor {} reported failure: {}", instance.name, result.message);
                    self.complete_log(log_id, LogCompletion::failure_with_output(&result.message, output))?;
                }
                Ok(result)
            }
            Err(message) => {
                error!("Pre-processor {} failed: {}", instance.name, message);
                self.complete_log(log_id, LogCompletion::failure(&message))?;
                Ok(PreProcessResult::failed(message))
            }
        }
    }

    async fn run_preprocessor(
        &self,
        instance: &Instance,
        inputs: &RunInputs,
        document: &Document,
    ) -> Result<PreProcessResult, String> {
        let preprocessor = self
            .registry()
            .get_preprocessor(&instance.component)
            .ok_or_else(|| format!("Pre-processor not found: {}", instance.component))?;

        let ctx = Self::context(instance, inputs)?;
        check_hook(preprocessor.validate_config(&ctx).await)?;

        preprocessor
            .process(&ctx, document)
            .await
            .map_err(|e| format!("{:#}", e))
    }

    /// Run every enabled pre-processor in priority order, stopping after an abort
    pub async fn execute_preprocessors(&self, document: &Document) -> Result<Vec<PreProcessResult>, ExecutorError> {
        let mut results = Vec::new();

        for instance in self.runnable_instances(ComponentKind::Preprocessor)? {
            let result = match self.execute_preprocessor(&instance, document).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error executing pre-processor {}: {}", instance.name, e);
                    PreProcessResult::failed(e.to_string())
                }
            };

            let abort = result.abort;
            results.push(result);
            if abort {
                info!("Pre-processor {} requested abort", instance.name);
                break;
            }
        }

        Ok(results)
    }

    // ========================================================================
    // Post-processors
    // ========================================================================

    /// Run a post-processor instance for a document event
    pub async fn execute_postprocessor(
        &self,
        instance: &Instance,
        document: &Document,
        event: DocumentEvent,
    ) -> Result<PostProcessResult, ExecutorError> {
        Self::check_kind(instance, ComponentKind::Postprocessor)?;
        if !instance.enabled {
            return Ok(PostProcessResult::ok("Post-processor disabled"));
        }
        if !instance.triggered_by(event) {
            return Ok(PostProcessResult::ok(format!("Event {} not in triggers", event)));
        }
        if !instance.in_scope(document.collection.as_deref()) {
            return Ok(PostProcessResult::ok("Document not in configured collections"));
        }

        let inputs = self.load_inputs(instance)?;
        let log = ExecutionLog::start(
            instance.id,
            json!({"document_identifier": document.identifier, "event": event}),
        )
        .with_document(&document.identifier)
        .with_event(event);
        let log_id = self.start_log(log)?;

        match self.run_postprocessor(instance, &inputs, document, event).await {
            Ok(result) => {
                let output = to_output(&result);
                if result.success {
                    info!("Post-processor {} completed for document {}", instance.name, document.identifier);
                    self.complete_log(log_id, LogCompletion::success(output))?;
                } else {
                    warn!("Post-processor {} reported failure: {}", instance.name, result.message);
                    self.complete_log(log_id, LogCompletion::failure_with_output(&result.message, output))?;
                }
                Ok(result)
            }
            Err(message) => {
                error!("Post-processor {} failed: {}", instance.name, message);
                self.complete_log(log_id, LogCompletion::failure(&message))?;
                Ok(PostProcessResult::failed(message))
            }
        }
    }

    async fn run_postprocessor(
        &self,
        instance: &Instance,
        inputs: &RunInputs,
        document: &Document,
        event: DocumentEvent,
    ) -> Result<PostProcessResult, String> {
        let postprocessor = self
            .registry()
            .get_postprocessor(&instance.component)
            .ok_or_else(|| format!("Post-processor not found: {}", instance.component))?;

        let ctx = Self::context(instance, inputs)?;
        check_hook(postprocessor.validate_config(&ctx).await)?;

        let helper = self
            .helpers
            .document_helper()
            .await
            .map_err(|e| format!("Failed to open document helper: {:#}", e))?;
        let documents = HelperScope::new(helper);

        let result = postprocessor
            .process(&ctx, document, event)
            .await
            .map_err(|e| format!("{:#}", e))?;

        if result.has_actions() {
            Self::apply_actions(&*documents, &document.identifier, &result)
                .await
                .map_err(|e| format!("Failed to apply post-processor actions: {:#}", e))?;
        }

        Ok(result)
    }

    /// Perform the follow-up requests of a post-processor result: archive, re-identify, rename
    async fn apply_actions(
        documents: &dyn DocumentHelper,
        identifier: &str,
        result: &PostProcessResult,
    ) -> anyhow::Result<()> {
        if result.archive_document {
            debug!("Archiving document {}", identifier);
            documents.archive(identifier).await?;
        }
        if let Some(custom_identifier) = &result.new_custom_identifier {
            debug!("Setting custom identifier of {} to {}", identifier, custom_identifier);
            documents.update_custom_identifier(identifier, custom_identifier).await?;
        }
        if let Some(file_name) = &result.new_file_name {
            debug!("Renaming document {} to {}", identifier, file_name);
            documents.rename(identifier, file_name).await?;
        }
        Ok(())
    }

    /// Run every enabled post-processor triggered by `event`, in priority order
    ///
    /// A failing instance never stops the others.
    pub async fn execute_postprocessors(
        &self,
        document: &Document,
        event: DocumentEvent,
    ) -> Result<Vec<PostProcessResult>, ExecutorError> {
        let mut results = Vec::new();

        for instance in self.runnable_instances(ComponentKind::Postprocessor)? {
            if !instance.triggered_by(event) {
                continue;
            }
            let result = match self.execute_postprocessor(&instance, document, event).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error executing post-processor {}: {}", instance.name, e);
                    PostProcessResult::failed(e.to_string())
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    // ========================================================================
    // Data sources
    // ========================================================================

    /// Run a data-source instance, syncing its records into the instance's sink
    pub async fn execute_datasource(&self, instance: &Instance) -> Result<DataSourceSyncResult, ExecutorError> {
        Self::check_kind(instance, ComponentKind::Datasource)?;
        if !instance.enabled {
            info!("Skipping disabled data source: {}", instance.name);
            return Ok(DataSourceSyncResult::ok("Data source disabled"));
        }
        let Some(sink_id) = instance.sink_id.clone() else {
            error!("Data source instance {} has no data sink configured", instance.name);
            return Ok(DataSourceSyncResult::failed("No data sink configured for this instance"));
        };

        let inputs = self.load_inputs(instance)?;
        let log_id = self.start_log(ExecutionLog::start(
            instance.id,
            json!({"config": instance.config, "sink_id": sink_id}),
        ))?;

        match self.run_datasource(instance, &inputs, &sink_id).await {
            Ok(result) => {
                let output = to_output(&result);
                if result.success {
                    info!(
                        "Data source {} completed: {} created, {} updated",
                        instance.name, result.created, result.updated
                    );
                    self.complete_log(log_id, LogCompletion::success(output))?;
                } else {
                    warn!("Data source {} failed: {}", instance.name, result.message);
                    self.complete_log(log_id, LogCompletion::failure_with_output(&result.message, output))?;
                }
                Ok(result)
            }
            Err(message) => {
                error!("Data source {} failed: {}", instance.name, message);
                self.complete_log(log_id, LogCompletion::failure(&message))?;
                Ok(DataSourceSyncResult::failed(format!("Data source sync failed: {}", message)))
            }
        }
    }

    async fn run_datasource(
        &self,
        instance: &Instance,
        inputs: &RunInputs,
        sink_id: &str,
    ) -> Result<DataSourceSyncResult, String> {
        let datasource = self
            .registry()
            .get_datasource(&instance.component)
            .ok_or_else(|| format!("Data source not found: {}", instance.component))?;

        let ctx = Self::context(instance, inputs)?;
        check_hook(datasource.validate_config(&ctx).await)?;

        let helper = self
            .helpers
            .data_sink_helper()
            .await
            .map_err(|e| format!("Failed to open data sink helper: {:#}", e))?;
        let sink = HelperScope::new(helper);

        Ok(datasource.sync(&ctx, sink_id, &*sink).await)
    }

    /// Enabled instances of `kind` whose extension is enabled, in run order
    fn runnable_instances(&self, kind: ComponentKind) -> Result<Vec<Instance>, ExecutorError> {
        let mut runnable = Vec::new();
        for instance in self.store.list_instances(&InstanceFilter::kind(kind).enabled())? {
            let extension_enabled = self
                .store
                .get_extension(instance.extension_slug())?
                .is_some_and(|extension| extension.enabled);
            if extension_enabled {
                runnable.push(instance);
            } else {
                debug!("Skipping {}: extension disabled or missing", instance.name);
            }
        }
        Ok(runnable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_hook() {
        assert!(check_hook(Ok(Vec::new())).is_ok());
        assert_eq!(
            check_hook(Ok(vec!["a".into(), "b".into()])).unwrap_err(),
            "Configuration errors: a, b"
        );
        assert!(check_hook(Err(anyhow::anyhow!("boom")))
            .unwrap_err()
            .contains("boom"));
    }

    #[test]
    fn test_context_applies_defaults_and_validates() {
        let component = docbridge_core::types::Component::new(
            "ext",
            ComponentKind::Preprocessor,
            "ids",
            "IDs",
        );
        let instance = Instance::new(&component, "ids").with_config(json!({"prefix": "INV"}));
        let inputs = RunInputs {
            plugin_config: json!({"debug_mode": true}),
            schema: json!({
                "type": "object",
                "properties": {
                    "prefix": {"type": "string"},
                    "include_date": {"type": "boolean", "default": true}
                },
                "required": ["prefix"]
            }),
        };

        let ctx = Executor::context(&instance, &inputs).unwrap();
        assert!(ctx.get_bool("include_date", false));
        assert!(ctx.get_bool("debug_mode", false));
        assert_eq!(ctx.get_str("prefix").as_deref(), Some("INV"));

        let bad = Instance::new(&component, "bad").with_config(json!({"prefix": 12}));
        let error = Executor::context(&bad, &inputs).unwrap_err();
        assert!(error.starts_with("Configuration errors: "));
    }
}
