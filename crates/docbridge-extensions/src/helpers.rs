//! Host helper contracts
//!
//! Capabilities never talk to the document-processing service directly.
//! The host hands them helpers for uploads, document updates, and data-sink
//! syncs. Helpers are scoped resources: the executor acquires one per run
//! through a [`HelperProvider`] and wraps it in a [`HelperScope`] so it is
//! released on every exit path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Deref, DerefMut};

use crate::capability::DataRecord;

/// Upload of in-memory file content
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub content: Vec<u8>,
    pub file_name: String,
    /// Target collection
    pub collection: String,
    pub custom_identifier: Option<String>,
    /// Wait for processing to finish before returning
    pub wait: bool,
    pub metadata: Option<Value>,
}

impl UploadRequest {
    pub fn new(content: Vec<u8>, file_name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            content,
            file_name: file_name.into(),
            collection: collection.into(),
            custom_identifier: None,
            wait: false,
            metadata: None,
        }
    }
}

/// Upload of a document the service fetches from a URL
#[derive(Debug, Clone)]
pub struct UrlUploadRequest {
    pub url: String,
    pub file_name: Option<String>,
    pub collection: String,
    pub custom_identifier: Option<String>,
    pub wait: bool,
}

/// Descriptor of a document created by an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Bulk document update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_confirmed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An external data sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkInfo {
    pub identifier: String,
    pub name: String,
}

/// Outcome counts of a sink sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSyncCounts {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Release hook shared by all helpers
pub trait HelperResource: Send + Sync {
    /// Release the underlying client; called exactly once by [`HelperScope`]
    fn close(&mut self) {}
}

/// Uploads documents on behalf of importers
#[async_trait]
pub trait UploadHelper: HelperResource {
    async fn upload(&self, request: UploadRequest) -> anyhow::Result<UploadedDocument>;

    async fn upload_from_url(&self, request: UrlUploadRequest) -> anyhow::Result<UploadedDocument>;
}

/// Reads and updates documents on behalf of the executor
#[async_trait]
pub trait DocumentHelper: HelperResource {
    async fn get(&self, identifier: &str) -> anyhow::Result<Value>;

    async fn archive(&self, identifier: &str) -> anyhow::Result<()>;

    async fn rename(&self, identifier: &str, new_file_name: &str) -> anyhow::Result<()>;

    async fn update_custom_identifier(&self, identifier: &str, custom_identifier: &str) -> anyhow::Result<()>;

    async fn update(&self, identifier: &str, update: DocumentUpdate) -> anyhow::Result<()>;
}

/// Pushes records into external data sinks
#[async_trait]
pub trait DataSinkHelper: HelperResource {
    async fn list_sinks(&self) -> anyhow::Result<Vec<SinkInfo>>;

    async fn get_sink(&self, sink_id: &str) -> anyhow::Result<SinkInfo>;

    async fn sync_records(
        &self,
        sink_id: &str,
        records: &[DataRecord],
        replace_all: bool,
    ) -> anyhow::Result<SinkSyncCounts>;

    async fn delete_records(&self, sink_id: &str, identifiers: &[String]) -> anyhow::Result<usize>;

    async fn get_records(&self, sink_id: &str, limit: usize, offset: usize) -> anyhow::Result<Vec<DataRecord>>;
}

/// Opens helpers for one execution
#[async_trait]
pub trait HelperProvider: Send + Sync {
    async fn upload_helper(&self) -> anyhow::Result<Box<dyn UploadHelper>>;

    async fn document_helper(&self) -> anyhow::Result<Box<dyn DocumentHelper>>;

    async fn data_sink_helper(&self) -> anyhow::Result<Box<dyn DataSinkHelper>>;
}

/// Scoped acquisition of a helper; releases it on drop
pub struct HelperScope<H: HelperResource + ?Sized> {
    inner: Box<H>,
}

impl<H: HelperResource + ?Sized> HelperScope<H> {
    pub fn new(inner: Box<H>) -> Self {
        Self { inner }
    }
}

impl<H: HelperResource + ?Sized> Deref for HelperScope<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

impl<H: HelperResource + ?Sized> DerefMut for HelperScope<H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.inner
    }
}

impl<H: HelperResource + ?Sized> Drop for HelperScope<H> {
    fn drop(&mut self) {
        self.inner.close();
    }
}
