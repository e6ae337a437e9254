//! Mock implementations for testing
//!
//! Provides recording host helpers and an in-memory package environment so
//! executor and dependency tests run without a document service or pip.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use docbridge_extensions::capability::DataRecord;
use docbridge_extensions::dependency::PackageEnvironment;
use docbridge_extensions::helpers::{
    DataSinkHelper, DocumentHelper, DocumentUpdate, HelperProvider, HelperResource, SinkInfo, SinkSyncCounts,
    UploadHelper, UploadRequest, UploadedDocument, UrlUploadRequest,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of calls
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Helper provider that records every helper call
#[derive(Clone)]
pub struct RecordingHelpers {
    pub calls: Journal,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    /// Document helper calls fail with this message
    fail_documents: Option<String>,
    /// Helper acquisition fails with this message
    fail_open: Option<String>,
}

impl Default for RecordingHelpers {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHelpers {
    pub fn new() -> Self {
        Self {
            calls: journal(),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            fail_documents: None,
            fail_open: None,
        }
    }

    pub fn failing_documents(mut self, message: &str) -> Self {
        self.fail_documents = Some(message.to_string());
        self
    }

    pub fn failing_open(mut self, message: &str) -> Self {
        self.fail_open = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        entries(&self.calls)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn open(&self) -> Result<RecordingHelper> {
        if let Some(message) = &self.fail_open {
            return Err(anyhow!(message.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingHelper {
            calls: self.calls.clone(),
            closed: self.closed.clone(),
            fail_documents: self.fail_documents.clone(),
        })
    }
}

#[async_trait]
impl HelperProvider for RecordingHelpers {
    async fn upload_helper(&self) -> Result<Box<dyn UploadHelper>> {
        Ok(Box::new(self.open()?))
    }

    async fn document_helper(&self) -> Result<Box<dyn DocumentHelper>> {
        Ok(Box::new(self.open()?))
    }

    async fn data_sink_helper(&self) -> Result<Box<dyn DataSinkHelper>> {
        Ok(Box::new(self.open()?))
    }
}

/// One opened helper; implements all three contracts
pub struct RecordingHelper {
    calls: Journal,
    closed: Arc<AtomicUsize>,
    fail_documents: Option<String>,
}

impl RecordingHelper {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn document_call(&self, call: String) -> Result<()> {
        self.record(call);
        match &self.fail_documents {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

impl HelperResource for RecordingHelper {
    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadHelper for RecordingHelper {
    async fn upload(&self, request: UploadRequest) -> Result<UploadedDocument> {
        self.record(format!("upload:{}:{}", request.collection, request.file_name));
        Ok(UploadedDocument {
            identifier: format!("doc-{}", request.file_name),
            file_name: Some(request.file_name),
            custom_identifier: request.custom_identifier,
            state: Some("review".to_string()),
        })
    }

    async fn upload_from_url(&self, request: UrlUploadRequest) -> Result<UploadedDocument> {
        self.record(format!("upload_url:{}:{}", request.collection, request.url));
        Ok(UploadedDocument {
            identifier: "doc-url".to_string(),
            file_name: request.file_name,
            custom_identifier: request.custom_identifier,
            state: None,
        })
    }
}

#[async_trait]
impl DocumentHelper for RecordingHelper {
    async fn get(&self, identifier: &str) -> Result<Value> {
        self.record(format!("get:{}", identifier));
        Ok(json!({"identifier": identifier}))
    }

    async fn archive(&self, identifier: &str) -> Result<()> {
        self.document_call(format!("archive:{}", identifier))
    }

    async fn rename(&self, identifier: &str, new_file_name: &str) -> Result<()> {
        self.document_call(format!("rename:{}:{}", identifier, new_file_name))
    }

    async fn update_custom_identifier(&self, identifier: &str, custom_identifier: &str) -> Result<()> {
        self.document_call(format!("custom_identifier:{}:{}", identifier, custom_identifier))
    }

    async fn update(&self, identifier: &str, _update: DocumentUpdate) -> Result<()> {
        self.document_call(format!("update:{}", identifier))
    }
}

#[async_trait]
impl DataSinkHelper for RecordingHelper {
    async fn list_sinks(&self) -> Result<Vec<SinkInfo>> {
        Ok(vec![SinkInfo {
            identifier: "sink-1".to_string(),
            name: "Vendors".to_string(),
        }])
    }

    async fn get_sink(&self, sink_id: &str) -> Result<SinkInfo> {
        Ok(SinkInfo {
            identifier: sink_id.to_string(),
            name: "Vendors".to_string(),
        })
    }

    async fn sync_records(&self, sink_id: &str, records: &[DataRecord], replace_all: bool) -> Result<SinkSyncCounts> {
        self.record(format!("sync:{}:{}:{}", sink_id, records.len(), replace_all));
        Ok(SinkSyncCounts {
            created: records.len(),
            updated: 0,
            failed: 0,
        })
    }

    async fn delete_records(&self, sink_id: &str, identifiers: &[String]) -> Result<usize> {
        self.record(format!("delete:{}:{}", sink_id, identifiers.len()));
        Ok(identifiers.len())
    }

    async fn get_records(&self, _sink_id: &str, _limit: usize, _offset: usize) -> Result<Vec<DataRecord>> {
        Ok(Vec::new())
    }
}

/// In-memory package environment
#[derive(Default)]
pub struct MockEnvironment {
    installed: Mutex<HashMap<String, String>>,
    /// Packages whose install fails
    broken: Vec<String>,
    pub install_calls: Journal,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(self, name: &str, version: &str) -> Self {
        self.installed
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), version.to_string());
        self
    }

    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.push(name.to_string());
        self
    }
}

#[async_trait]
impl PackageEnvironment for MockEnvironment {
    async fn installed_version(&self, name: &str) -> Result<Option<String>> {
        Ok(self.installed.lock().unwrap().get(&name.to_lowercase()).cloned())
    }

    async fn install(&self, requirement: &str, _timeout: Duration) -> Result<String> {
        self.install_calls.lock().unwrap().push(requirement.to_string());
        let name: String = requirement
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if self.broken.contains(&name) {
            return Err(anyhow!("No matching distribution found for {}", requirement));
        }
        self.installed
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), "9.9.9".to_string());
        Ok(format!("Successfully installed {}", name))
    }
}
