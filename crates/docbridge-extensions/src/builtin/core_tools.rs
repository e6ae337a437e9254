//! The `core-tools` extension: a small set of generally useful components

use anyhow::Context;
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use docbridge_core::types::{Document, DocumentEvent};
use regex::{Regex, RegexBuilder};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use super::{JsonFileRecords, WebhookNotifier};
use crate::capability::{
    ComponentContext, ComponentMeta, DataSource, ImportResult, Importer, Plugin, PluginMeta, PostProcessResult,
    PostProcessor, PreProcessResult, PreProcessor,
};
use crate::helpers::{UploadHelper, UploadRequest};

/// Module name and extension slug
pub const CORE_TOOLS_MODULE: &str = "core-tools";

const DEFAULT_FILE_PATTERN: &str = r".*\.(pdf|png|jpg|jpeg|tiff)$";
const DEFAULT_ID_PREFIX: &str = "DOC";
const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";
const ARCHIVED_PREFIX: &str = "ARCHIVED-";

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]").expect("valid regex"));

/// Built-in extension bundling the core components
pub struct CoreTools {
    meta: PluginMeta,
}

impl CoreTools {
    pub fn new() -> Self {
        let mut meta = PluginMeta::new(CORE_TOOLS_MODULE, "Core Tools", env!("CARGO_PKG_VERSION"));
        meta.author = "docbridge".to_string();
        meta.description = "Filesystem import, custom identifiers, archiving, webhooks and JSON records".to_string();
        meta.config_schema = json!({
            "type": "object",
            "properties": {
                "debug_mode": {
                    "type": "boolean",
                    "description": "Verbose logging for all components",
                    "default": false
                }
            }
        });
        Self { meta }
    }
}

impl Default for CoreTools {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for CoreTools {
    fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    fn importers(&self) -> Vec<Arc<dyn Importer>> {
        vec![Arc::new(FilesystemImporter::new())]
    }

    fn preprocessors(&self) -> Vec<Arc<dyn PreProcessor>> {
        vec![Arc::new(CustomIdGenerator::new())]
    }

    fn postprocessors(&self) -> Vec<Arc<dyn PostProcessor>> {
        vec![Arc::new(ArchiveOnApproval::new()), Arc::new(WebhookNotifier::new())]
    }

    fn datasources(&self) -> Vec<Arc<dyn DataSource>> {
        vec![Arc::new(JsonFileRecords::new())]
    }
}

// ============================================================================
// Filesystem importer
// ============================================================================

/// Uploads matching files from a local directory
pub struct FilesystemImporter {
    meta: ComponentMeta,
}

impl FilesystemImporter {
    pub fn new() -> Self {
        let meta = ComponentMeta::new("filesystem-importer", "File System Importer")
            .with_description("Import documents from a local directory")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to scan for files"},
                    "file_pattern": {
                        "type": "string",
                        "description": "Regex matched against file names (case-insensitive)",
                        "default": DEFAULT_FILE_PATTERN
                    },
                    "collection": {"type": "string", "description": "Target collection"},
                    "delete_after_import": {
                        "type": "boolean",
                        "description": "Delete files after a successful upload",
                        "default": false
                    }
                },
                "required": ["directory", "collection"]
            }));
        Self { meta }
    }

    fn pattern(ctx: &ComponentContext) -> Result<Regex, regex::Error> {
        let pattern = ctx.get_str("file_pattern").unwrap_or_else(|| DEFAULT_FILE_PATTERN.to_string());
        // Anchored at the start like a prefix match
        RegexBuilder::new(&format!("^(?:{})", pattern))
            .case_insensitive(true)
            .build()
    }
}

impl Default for FilesystemImporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Importer for FilesystemImporter {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        let mut errors = Vec::new();
        if ctx.get_str("directory").is_none() {
            errors.push("Directory is required".to_string());
        }
        if ctx.get_str("collection").is_none() {
            errors.push("Collection is required".to_string());
        }
        if let Err(e) = Self::pattern(ctx) {
            errors.push(format!("Invalid file pattern: {}", e));
        }
        Ok(errors)
    }

    async fn run(&self, ctx: &ComponentContext, uploads: &dyn UploadHelper) -> anyhow::Result<Vec<ImportResult>> {
        let directory = ctx.get_str("directory").unwrap_or_default();
        let collection = ctx.get_str("collection").unwrap_or_default();
        let delete_after = ctx.get_bool("delete_after_import", false);
        let pattern = Self::pattern(ctx).context("Invalid file pattern")?;

        if !std::path::Path::new(&directory).is_dir() {
            return Ok(vec![ImportResult::failed(format!(
                "Directory does not exist: {}",
                directory
            ))]);
        }

        let mut files: Vec<_> = std::fs::read_dir(&directory)
            .with_context(|| format!("Failed to read {}", directory))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut results = Vec::new();
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if !pattern.is_match(&file_name) {
                continue;
            }

            let upload = async {
                let content = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                uploads
                    .upload(UploadRequest::new(content, file_name.clone(), collection.clone()))
                    .await
            };

            match upload.await {
                Ok(document) => {
                    results.push(ImportResult::uploaded(document.identifier, file_name.clone()));
                    if delete_after {
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => info!("Deleted imported file: {}", path.display()),
                            Err(e) => warn!("Failed to delete imported file {}: {}", path.display(), e),
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to import {}: {:#}", file_name, e);
                    results.push(ImportResult::failed(format!("{:#}", e)).with_file_name(file_name));
                }
            }
        }

        Ok(results)
    }
}

// ============================================================================
// Custom identifier generator
// ============================================================================

/// Generates a custom identifier from a prefix, the date and the file name
pub struct CustomIdGenerator {
    meta: ComponentMeta,
}

impl CustomIdGenerator {
    pub fn new() -> Self {
        let meta = ComponentMeta::new("custom-id-generator", "Custom Identifier Generator")
            .with_description("Generate custom identifiers based on file name and date")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "prefix": {"type": "string", "default": DEFAULT_ID_PREFIX},
                    "include_date": {"type": "boolean", "default": true},
                    "date_format": {"type": "string", "default": DEFAULT_DATE_FORMAT}
                }
            }));
        Self { meta }
    }

    fn date_format_is_valid(format: &str) -> bool {
        !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
    }

    /// Build the identifier for `document`
    pub fn generate(prefix: &str, date: Option<String>, document: &Document) -> String {
        let mut parts = vec![prefix.to_string()];
        if let Some(date) = date {
            parts.push(date);
        }

        if !document.file_name.is_empty() {
            let stem = document
                .file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&document.file_name);
            let sanitized: String = NON_ALPHANUMERIC.replace_all(stem, "-").chars().take(20).collect();
            parts.push(sanitized);
        }

        let chars: Vec<char> = document.identifier.chars().collect();
        let suffix: String = chars[chars.len().saturating_sub(8)..].iter().collect();
        parts.push(suffix);

        parts.join("-").to_uppercase()
    }
}

impl Default for CustomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreProcessor for CustomIdGenerator {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        let format = ctx.get_str("date_format").unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
        if Self::date_format_is_valid(&format) {
            Ok(Vec::new())
        } else {
            Ok(vec![format!("Invalid date format: {}", format)])
        }
    }

    async fn process(&self, ctx: &ComponentContext, document: &Document) -> anyhow::Result<PreProcessResult> {
        if document.custom_identifier.as_deref().is_some_and(|id| !id.is_empty()) {
            return Ok(PreProcessResult::ok("Document already has custom identifier"));
        }

        let prefix = ctx.get_str("prefix").unwrap_or_else(|| DEFAULT_ID_PREFIX.to_string());
        let date = if ctx.get_bool("include_date", true) {
            let format = ctx.get_str("date_format").unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
            if !Self::date_format_is_valid(&format) {
                return Ok(PreProcessResult::failed(format!("Invalid date format: {}", format)));
            }
            Some(Local::now().format(&format).to_string())
        } else {
            None
        };

        let custom_id = Self::generate(&prefix, date, document);
        info!("Generated custom identifier for {}: {}", document.identifier, custom_id);

        Ok(PreProcessResult {
            new_custom_identifier: Some(custom_id.clone()),
            ..PreProcessResult::ok(format!("Generated custom identifier: {}", custom_id))
        })
    }
}

// ============================================================================
// Archive on approval
// ============================================================================

/// Requests archiving of approved documents
pub struct ArchiveOnApproval {
    meta: ComponentMeta,
}

impl ArchiveOnApproval {
    pub fn new() -> Self {
        let meta = ComponentMeta::new("archive-on-approval", "Archive on Approval")
            .with_description("Automatically archive documents after they are approved")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "archive_delay_days": {"type": "integer", "minimum": 0, "default": 0},
                    "add_archived_prefix": {"type": "boolean", "default": true}
                }
            }))
            .with_events([DocumentEvent::Approved]);
        Self { meta }
    }
}

impl Default for ArchiveOnApproval {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostProcessor for ArchiveOnApproval {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn process(
        &self,
        ctx: &ComponentContext,
        document: &Document,
        event: DocumentEvent,
    ) -> anyhow::Result<PostProcessResult> {
        if event != DocumentEvent::Approved {
            return Ok(PostProcessResult::ok(format!("Event {} not handled by this processor", event)));
        }

        let delay = ctx.get_i64("archive_delay_days", 0);
        if delay > 0 {
            // Deferred archiving needs a scheduler, which the host does not run
            info!("Would schedule archive for {} in {} days", document.identifier, delay);
            return Ok(PostProcessResult::ok(format!("Archive scheduled for {} days from now", delay)));
        }

        let new_custom_identifier = match &document.custom_identifier {
            Some(id) if ctx.get_bool("add_archived_prefix", true) && !id.is_empty() && !id.starts_with(ARCHIVED_PREFIX) => {
                Some(format!("{}{}", ARCHIVED_PREFIX, id))
            }
            _ => None,
        };

        info!("Archiving document {}", document.identifier);
        Ok(PostProcessResult {
            archive_document: true,
            new_custom_identifier,
            ..PostProcessResult::ok("Document archived successfully")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{HelperResource, UploadedDocument, UrlUploadRequest};
    use serde_json::Value;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingUploads {
        uploaded: Mutex<Vec<String>>,
    }

    impl HelperResource for RecordingUploads {}

    #[async_trait]
    impl UploadHelper for RecordingUploads {
        async fn upload(&self, request: UploadRequest) -> anyhow::Result<UploadedDocument> {
            self.uploaded.lock().unwrap().push(request.file_name.clone());
            Ok(UploadedDocument {
                identifier: format!("doc-{}", request.file_name),
                file_name: Some(request.file_name),
                custom_identifier: None,
                state: None,
            })
        }

        async fn upload_from_url(&self, _request: UrlUploadRequest) -> anyhow::Result<UploadedDocument> {
            anyhow::bail!("not used")
        }
    }

    fn ctx(instance: Value) -> ComponentContext {
        ComponentContext::new(json!({}), instance)
    }

    #[test]
    fn test_core_tools_components() {
        let plugin = CoreTools::new();
        let metas = plugin.component_metas();
        let slugs: Vec<&str> = metas.iter().map(|(_, m)| m.slug.as_str()).collect();
        assert_eq!(
            slugs,
            vec![
                "filesystem-importer",
                "custom-id-generator",
                "archive-on-approval",
                "webhook-notifier",
                "json-file-records"
            ]
        );
        assert!(crate::loader::validate_plugin(&plugin).is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_importer_uploads_matching_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.PDF"), b"%PDF").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"skip").unwrap();

        let uploads = RecordingUploads::default();
        let importer = FilesystemImporter::new();
        let results = importer
            .run(
                &ctx(json!({"directory": temp.path(), "collection": "inbox", "delete_after_import": true})),
                &uploads,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(*uploads.uploaded.lock().unwrap(), vec!["a.PDF".to_string()]);
        assert!(!temp.path().join("a.PDF").exists());
        assert!(temp.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_filesystem_importer_missing_directory() {
        let importer = FilesystemImporter::new();
        let results = importer
            .run(&ctx(json!({"directory": "/nonexistent/inbox", "collection": "inbox"})), &RecordingUploads::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].message.contains("Directory does not exist"));
    }

    #[tokio::test]
    async fn test_filesystem_importer_validation() {
        let errors = FilesystemImporter::new()
            .validate_config(&ctx(json!({"file_pattern": "("})))
            .await
            .unwrap();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_generate_custom_identifier() {
        let document = Document::new("abcdef0123456789", "Invoice March #2.pdf");
        let id = CustomIdGenerator::generate("inv", Some("20260101".into()), &document);
        assert_eq!(id, "INV-20260101-INVOICE-MARCH--2-23456789");
    }

    #[tokio::test]
    async fn test_custom_id_skips_documents_with_identifier() {
        let document = Document::new("abcdef0123456789", "a.pdf").with_custom_identifier("KEEP");
        let result = CustomIdGenerator::new().process(&ctx(json!({})), &document).await.unwrap();
        assert!(result.success);
        assert!(result.new_custom_identifier.is_none());
    }

    #[tokio::test]
    async fn test_custom_id_rejects_bad_date_format() {
        let generator = CustomIdGenerator::new();
        let errors = generator
            .validate_config(&ctx(json!({"date_format": "%Q"})))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        let document = Document::new("abcdef0123456789", "a.pdf");
        let result = generator
            .process(&ctx(json!({"date_format": "%Q"})), &document)
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_archive_on_approval_requests_archive_and_prefix() {
        let document = Document::new("doc-1", "a.pdf").with_custom_identifier("INV-1");
        let result = ArchiveOnApproval::new()
            .process(&ctx(json!({})), &document, DocumentEvent::Approved)
            .await
            .unwrap();

        assert!(result.archive_document);
        assert_eq!(result.new_custom_identifier.as_deref(), Some("ARCHIVED-INV-1"));
    }

    #[tokio::test]
    async fn test_archive_on_approval_ignores_other_events_and_delays() {
        let processor = ArchiveOnApproval::new();
        let document = Document::new("doc-1", "a.pdf");

        let other = processor
            .process(&ctx(json!({})), &document, DocumentEvent::Updated)
            .await
            .unwrap();
        assert!(!other.has_actions());

        let delayed = processor
            .process(&ctx(json!({"archive_delay_days": 3})), &document, DocumentEvent::Approved)
            .await
            .unwrap();
        assert!(!delayed.has_actions());
    }
}
