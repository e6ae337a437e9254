//! Data source reading records from a local JSON file

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::capability::{ComponentContext, ComponentMeta, DataRecord, DataSource};

const DEFAULT_IDENTIFIER_FIELD: &str = "id";

/// Reads an array of JSON objects and keys each by an identifier field
pub struct JsonFileRecords {
    meta: ComponentMeta,
}

impl JsonFileRecords {
    pub fn new() -> Self {
        let meta = ComponentMeta::new("json-file-records", "JSON File Records")
            .with_description("Sync records from a JSON file into a data sink")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File holding a JSON array of objects"},
                    "identifier_field": {"type": "string", "default": DEFAULT_IDENTIFIER_FIELD}
                },
                "required": ["path"]
            }));
        Self { meta }
    }

    fn identifier(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Default for JsonFileRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for JsonFileRecords {
    fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    async fn fetch_records(&self, ctx: &ComponentContext) -> anyhow::Result<Vec<DataRecord>> {
        let path = ctx.get_str("path").ok_or_else(|| anyhow!("path is required"))?;
        let field = ctx
            .get_str("identifier_field")
            .unwrap_or_else(|| DEFAULT_IDENTIFIER_FIELD.to_string());

        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        let rows: Vec<Value> =
            serde_json::from_slice(&content).with_context(|| format!("{} is not a JSON array", path))?;

        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let Value::Object(data) = row else {
                warn!("Skipping row {} of {}: not an object", index, path);
                continue;
            };
            match data.get(&field).and_then(Self::identifier) {
                Some(identifier) => records.push(DataRecord::new(identifier, data)),
                None => warn!("Skipping row {} of {}: missing '{}'", index, path, field),
            }
        }

        debug!("Read {} records from {}", records.len(), path);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_records_and_skips_bad_rows() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("vendors.json");
        std::fs::write(
            &file,
            r#"[{"id": "v-1", "name": "Acme"}, {"id": 7, "name": "Globex"}, {"name": "no id"}, 3]"#,
        )
        .unwrap();

        let ctx = ComponentContext::new(json!({}), json!({"path": file}));
        let records = JsonFileRecords::new().fetch_records(&ctx).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["v-1", "7"]);
        assert_eq!(records[0].data["name"], "Acme");
    }

    #[tokio::test]
    async fn test_custom_identifier_field() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("rows.json");
        std::fs::write(&file, r#"[{"code": "X1"}]"#).unwrap();

        let ctx = ComponentContext::new(json!({}), json!({"path": file, "identifier_field": "code"}));
        let records = JsonFileRecords::new().fetch_records(&ctx).await.unwrap();
        assert_eq!(records[0].identifier, "X1");
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let ctx = ComponentContext::new(json!({}), json!({"path": "/nonexistent/rows.json"}));
        assert!(JsonFileRecords::new().fetch_records(&ctx).await.is_err());
    }
}
