//! Extension host protocol
//!
//! Fetched extensions run out of process. Each call spawns the extension's
//! entry file with the extension directory as working directory, writes one
//! JSON request to stdin and reads one JSON response from stdout:
//!
//! ```text
//! -> {"protocol":1,"call":"preprocess","component":"stamp","context":{..},"document":{..}}
//! <- {"ok":true,"result":{"success":true,"message":"stamped"}}
//! <- {"ok":false,"error":"directory does not exist"}
//! ```
//!
//! Hosted importers never see the upload helper. They answer `import` with a
//! list of [`ImportItem`]s and the host performs the uploads.

use async_trait::async_trait;
use docbridge_core::types::{ComponentKind, Document, DocumentEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::capability::{
    ComponentContext, ComponentMeta, DataRecord, DataSource, ImportResult, Importer, Plugin, PluginMeta,
    PostProcessResult, PostProcessor, PreProcessResult, PreProcessor,
};
use crate::helpers::{UploadHelper, UploadRequest, UrlUploadRequest};
use crate::loader::LoadError;

/// Version of the request/response protocol
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the loader-assigned host id
pub const HOST_ID_ENV: &str = "DOCBRIDGE_HOST_ID";

/// Environment variable carrying the extension directory
pub const PLUGIN_DIR_ENV: &str = "DOCBRIDGE_PLUGIN_DIR";

/// One call into an extension process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HostCall {
    Describe,
    ValidateConfig {
        kind: ComponentKind,
        component: String,
        context: ComponentContext,
    },
    Import {
        component: String,
        context: ComponentContext,
    },
    Preprocess {
        component: String,
        context: ComponentContext,
        document: Document,
    },
    Postprocess {
        component: String,
        context: ComponentContext,
        document: Document,
        event: DocumentEvent,
    },
    FetchRecords {
        component: String,
        context: ComponentContext,
    },
}

impl HostCall {
    pub fn name(&self) -> &'static str {
        match self {
            HostCall::Describe => "describe",
            HostCall::ValidateConfig { .. } => "validate_config",
            HostCall::Import { .. } => "import",
            HostCall::Preprocess { .. } => "preprocess",
            HostCall::Postprocess { .. } => "postprocess",
            HostCall::FetchRecords { .. } => "fetch_records",
        }
    }
}

#[derive(Debug, Serialize)]
struct HostRequest<'a> {
    protocol: u32,
    #[serde(flatten)]
    call: &'a HostCall,
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Answer to the `describe` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDescriptor {
    #[serde(default)]
    pub plugin: Option<PluginMeta>,
    #[serde(default)]
    pub importers: Vec<ComponentMeta>,
    #[serde(default)]
    pub preprocessors: Vec<ComponentMeta>,
    #[serde(default)]
    pub postprocessors: Vec<ComponentMeta>,
    #[serde(default)]
    pub datasources: Vec<ComponentMeta>,
}

/// A document a hosted importer asks the host to upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportItem {
    /// Local file to upload (relative paths resolve against the extension directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Remote document the service fetches itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,

    #[serde(default)]
    pub wait: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Handle on an extension's entry file
#[derive(Debug, Clone)]
pub struct ExtensionHost {
    entry: PathBuf,
    dir: PathBuf,
    host_id: String,
    timeout: Duration,
}

impl ExtensionHost {
    pub fn new(entry: PathBuf, dir: PathBuf, host_id: String, timeout: Duration) -> Self {
        Self {
            entry,
            dir,
            host_id,
            timeout,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run one call and return its `result` payload
    pub async fn call(&self, call: &HostCall) -> Result<Value, LoadError> {
        let request = serde_json::to_vec(&HostRequest {
            protocol: PROTOCOL_VERSION,
            call,
        })
        .map_err(|e| LoadError::Protocol(format!("Failed to encode request: {}", e)))?;

        debug!("Calling {} on {}", call.name(), self.host_id);

        let mut child = Command::new(&self.entry)
            .current_dir(&self.dir)
            .env(HOST_ID_ENV, &self.host_id)
            .env(PLUGIN_DIR_ENV, &self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoadError::Spawn {
                entry: self.entry.clone(),
                reason: e.to_string(),
            })?;

        // The request write and the wait share the call timeout
        let stdin = child.stdin.take();
        let exchange = async move {
            let write = async {
                if let Some(mut stdin) = stdin {
                    // A process that exits without reading stdin is judged by its response
                    if let Err(e) = stdin.write_all(&request).await {
                        debug!("Extension {} closed stdin early: {}", self.host_id, e);
                    }
                }
            };
            let ((), output) = tokio::join!(write, child.wait_with_output());
            output
        };

        // kill_on_drop terminates the child when the timeout drops the future
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| LoadError::Timeout {
                call: call.name().to_string(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| LoadError::Spawn {
                entry: self.entry.clone(),
                reason: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(LoadError::ExitStatus {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!("Extension {} stderr: {}", self.host_id, stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| LoadError::Protocol(format!("Empty response to {}", call.name())))?;

        let response: HostResponse = serde_json::from_str(line.trim())
            .map_err(|e| LoadError::Protocol(format!("Invalid response to {}: {}", call.name(), e)))?;

        if response.ok {
            Ok(response.result)
        } else {
            Err(LoadError::Extension(
                response
                    .error
                    .unwrap_or_else(|| format!("{} failed without a message", call.name())),
            ))
        }
    }

    /// Run one call and decode its result
    pub async fn call_typed<T: DeserializeOwned>(&self, call: &HostCall) -> Result<T, LoadError> {
        let value = self.call(call).await?;
        serde_json::from_value(value)
            .map_err(|e| LoadError::Protocol(format!("Unexpected {} result: {}", call.name(), e)))
    }
}

/// An extension running out of process
pub struct HostedPlugin {
    meta: PluginMeta,
    host: Arc<ExtensionHost>,
    importers: Vec<Arc<dyn Importer>>,
    preprocessors: Vec<Arc<dyn PreProcessor>>,
    postprocessors: Vec<Arc<dyn PostProcessor>>,
    datasources: Vec<Arc<dyn DataSource>>,
}

impl std::fmt::Debug for HostedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedPlugin")
            .field("meta", &self.meta)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl HostedPlugin {
    pub fn new(meta: PluginMeta, descriptor: PluginDescriptor, host: Arc<ExtensionHost>) -> Self {
        let component = |meta: ComponentMeta| HostedComponent {
            meta,
            host: host.clone(),
        };

        Self {
            importers: descriptor
                .importers
                .into_iter()
                .map(|m| Arc::new(component(m)) as Arc<dyn Importer>)
                .collect(),
            preprocessors: descriptor
                .preprocessors
                .into_iter()
                .map(|m| Arc::new(component(m)) as Arc<dyn PreProcessor>)
                .collect(),
            postprocessors: descriptor
                .postprocessors
                .into_iter()
                .map(|m| Arc::new(component(m)) as Arc<dyn PostProcessor>)
                .collect(),
            datasources: descriptor
                .datasources
                .into_iter()
                .map(|m| Arc::new(component(m)) as Arc<dyn DataSource>)
                .collect(),
            meta,
            host,
        }
    }

    pub fn host(&self) -> &ExtensionHost {
        &self.host
    }
}

impl Plugin for HostedPlugin {
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

/// A component whose implementation lives in the extension process
struct HostedComponent {
    meta: ComponentMeta,
    host: Arc<ExtensionHost>,
}

impl HostedComponent {
    async fn validate(&self, kind: ComponentKind, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        let errors = self
            .host
            .call_typed(&HostCall::ValidateConfig {
                kind,
                component: self.meta.slug.clone(),
                context: ctx.clone(),
            })
            .await?;
        Ok(errors)
    }

    async fn upload_item(&self, item: ImportItem, uploads: &dyn UploadHelper) -> ImportResult {
        let custom_identifier = item.custom_identifier.clone();
        let outcome = match (&item.path, &item.url) {
            (Some(path), _) => {
                let path = self.host.dir().join(path);
                let file_name = item.file_name.clone().unwrap_or_else(|| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default()
                });
                match tokio::fs::read(&path).await {
                    Ok(content) => {
                        let mut request = UploadRequest::new(content, file_name.clone(), item.collection);
                        request.custom_identifier = item.custom_identifier;
                        request.wait = item.wait;
                        request.metadata = item.metadata;
                        uploads.upload(request).await.map(|doc| (doc, file_name))
                    }
                    Err(e) => Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
                }
            }
            (None, Some(url)) => {
                let request = UrlUploadRequest {
                    url: url.clone(),
                    file_name: item.file_name.clone(),
                    collection: item.collection,
                    custom_identifier: item.custom_identifier,
                    wait: item.wait,
                };
                let file_name = item.file_name.unwrap_or_else(|| url.clone());
                uploads.upload_from_url(request).await.map(|doc| (doc, file_name))
            }
            (None, None) => Err(anyhow::anyhow!("Import item has neither a path nor a url")),
        };

        match outcome {
            Ok((document, file_name)) => {
                let mut result = ImportResult::uploaded(document.identifier, file_name);
                result.custom_identifier = document.custom_identifier.or(custom_identifier);
                result
            }
            Err(e) => {
                warn!("Upload from {} failed: {:#}", self.host.host_id(), e);
                ImportResult::failed(format!("{:#}", e))
            }
        }
    }
}

#[async_trait]
impl Importer for HostedComponent {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        self.validate(ComponentKind::Importer, ctx).await
    }

    async fn run(&self, ctx: &ComponentContext, uploads: &dyn UploadHelper) -> anyhow::Result<Vec<ImportResult>> {
        let items: Vec<ImportItem> = self
            .host
            .call_typed(&HostCall::Import {
                component: self.meta.slug.clone(),
                context: ctx.clone(),
            })
            .await?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.upload_item(item, uploads).await);
        }
        Ok(results)
    }
}

#[async_trait]
impl PreProcessor for HostedComponent {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        self.validate(ComponentKind::Preprocessor, ctx).await
    }

    async fn process(&self, ctx: &ComponentContext, document: &Document) -> anyhow::Result<PreProcessResult> {
        let result = self
            .host
            .call_typed(&HostCall::Preprocess {
                component: self.meta.slug.clone(),
                context: ctx.clone(),
                document: document.clone(),
            })
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl PostProcessor for HostedComponent {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        self.validate(ComponentKind::Postprocessor, ctx).await
    }

    async fn process(
        &self,
        ctx: &ComponentContext,
        document: &Document,
        event: DocumentEvent,
    ) -> anyhow::Result<PostProcessResult> {
        let result = self
            .host
            .call_typed(&HostCall::Postprocess {
                component: self.meta.slug.clone(),
                context: ctx.clone(),
                document: document.clone(),
                event,
            })
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl DataSource for HostedComponent {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        self.validate(ComponentKind::Datasource, ctx).await
    }

    async fn fetch_records(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<DataRecord>> {
        let records: Vec<DataRecord> = self
            .host
            .call_typed(&HostCall::FetchRecords {
                component: self.meta.slug.clone(),
                context: ctx.clone(),
            })
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_encoding() {
        let call = HostCall::Import {
            component: "inbox".into(),
            context: ComponentContext::new(json!({}), json!({"directory": "/inbox"})),
        };
        let encoded = serde_json::to_value(HostRequest {
            protocol: PROTOCOL_VERSION,
            call: &call,
        })
        .unwrap();

        assert_eq!(encoded["protocol"], 1);
        assert_eq!(encoded["call"], "import");
        assert_eq!(encoded["component"], "inbox");
        assert_eq!(encoded["context"]["instance_config"]["directory"], "/inbox");
    }

    #[test]
    fn test_describe_encodes_bare_call() {
        let encoded = serde_json::to_string(&HostRequest {
            protocol: PROTOCOL_VERSION,
            call: &HostCall::Describe,
        })
        .unwrap();
        assert_eq!(encoded, r#"{"protocol":1,"call":"describe"}"#);
    }

    #[test]
    fn test_descriptor_defaults_missing_lists() {
        let descriptor: PluginDescriptor = serde_json::from_value(json!({
            "plugin": {"slug": "word-count", "name": "Word Count", "version": "1.0.0"},
            "postprocessors": [{"slug": "counter", "name": "Counter", "supported_events": ["document_approved"]}]
        }))
        .unwrap();

        assert!(descriptor.importers.is_empty());
        assert_eq!(descriptor.postprocessors[0].supported_events, vec![DocumentEvent::Approved]);
    }

    #[test]
    fn test_import_item_requires_collection() {
        assert!(serde_json::from_value::<ImportItem>(json!({"path": "a.pdf"})).is_err());
        let item: ImportItem = serde_json::from_value(json!({"url": "https://x/a.pdf", "collection": "inbox"})).unwrap();
        assert!(!item.wait);
    }
}
