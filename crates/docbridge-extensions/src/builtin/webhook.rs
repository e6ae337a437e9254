//! Webhook notifications on document events

use async_trait::async_trait;
use chrono::Utc;
use docbridge_core::types::{Document, DocumentEvent};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::capability::{ComponentContext, ComponentMeta, PostProcessResult, PostProcessor};

const WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// Posts a JSON payload to a configured URL for each handled event
pub struct WebhookNotifier {
    meta: ComponentMeta,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        let meta = ComponentMeta::new("webhook-notifier", "Webhook Notifier")
            .with_description("Send webhook notifications on document events")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "webhook_url": {"type": "string", "description": "URL to send webhooks to"},
                    "include_data": {
                        "type": "boolean",
                        "description": "Include extracted document data in the payload",
                        "default": false
                    }
                },
                "required": ["webhook_url"]
            }))
            .with_events([
                DocumentEvent::Uploaded,
                DocumentEvent::Approved,
                DocumentEvent::Rejected,
                DocumentEvent::Archived,
            ]);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self { meta, client }
    }

    /// Payload sent for `event`
    pub fn payload(document: &Document, event: DocumentEvent, include_data: bool) -> Value {
        let mut doc = Map::new();
        doc.insert("identifier".into(), json!(document.identifier));
        doc.insert("custom_identifier".into(), json!(document.custom_identifier));
        doc.insert("file_name".into(), json!(document.file_name));
        doc.insert("state".into(), json!(document.state));
        if include_data {
            if let Some(data) = &document.data {
                doc.insert("data".into(), data.clone());
            }
        }

        json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "document": doc,
        })
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostProcessor for WebhookNotifier {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn validate_config(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<String>> {
        match ctx.get_str("webhook_url") {
            None => Ok(vec!["Webhook URL is required".to_string()]),
            Some(url) if url::Url::parse(&url).is_err() => Ok(vec![format!("Invalid webhook URL: {}", url)]),
            Some(_) => Ok(Vec::new()),
        }
    }

    async fn process(
        &self,
        ctx: &ComponentContext,
        document: &Document,
        event: DocumentEvent,
    ) -> anyhow::Result<PostProcessResult> {
        let webhook_url = ctx.get_str("webhook_url").unwrap_or_default();
        let payload = Self::payload(document, event, ctx.get_bool("include_data", false));

        let response = self
            .client
            .post(&webhook_url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                info!("Webhook sent for {}: {}", document.identifier, event);
                let mut result = PostProcessResult::ok(format!("Webhook sent: {}", status));
                result.metadata.insert("response_code".into(), json!(status));
                Ok(result)
            }
            Err(e) => {
                warn!("Webhook failed for {}: {}", document.identifier, e);
                Ok(PostProcessResult::failed(format!("Webhook failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(url: &str) -> ComponentContext {
        ComponentContext::new(json!({}), json!({"webhook_url": url}))
    }

    #[test]
    fn test_payload_includes_data_only_when_asked() {
        let mut document = Document::new("doc-1", "a.pdf");
        document.data = Some(json!({"total": 12}));

        let without = WebhookNotifier::payload(&document, DocumentEvent::Approved, false);
        assert_eq!(without["event"], "document_approved");
        assert!(without["document"].get("data").is_none());

        let with = WebhookNotifier::payload(&document, DocumentEvent::Approved, true);
        assert_eq!(with["document"]["data"]["total"], 12);
    }

    #[tokio::test]
    async fn test_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = WebhookNotifier::new()
            .process(&ctx(&format!("{}/hook", server.uri())), &Document::new("doc-1", "a.pdf"), DocumentEvent::Uploaded)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.metadata["response_code"], 204);
    }

    #[tokio::test]
    async fn test_http_error_is_failed_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = WebhookNotifier::new()
            .process(&ctx(&server.uri()), &Document::new("doc-1", "a.pdf"), DocumentEvent::Approved)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message.starts_with("Webhook failed"));
    }

    #[tokio::test]
    async fn test_validate_config() {
        let notifier = WebhookNotifier::new();
        assert_eq!(notifier.validate_config(&ctx("not a url")).await.unwrap().len(), 1);
        assert!(notifier.validate_config(&ctx("https://hooks.example.com/x")).await.unwrap().is_empty());
    }
}
