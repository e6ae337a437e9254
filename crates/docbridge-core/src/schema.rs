//! JSON Schema validation for extension and instance configuration
//!
//! Extensions and their components describe their options with JSON Schema
//! documents. A schema violation is a configuration error, reported as a list
//! of human-readable messages rather than a hard failure.

use crate::error::{Error, Result};
use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::debug;

/// A compiled configuration schema
#[derive(Debug)]
pub struct ConfigSchema {
    raw: Value,
    /// `None` when the schema places no constraints
    validator: Option<Validator>,
}

impl ConfigSchema {
    /// Compile a schema document
    pub fn compile(schema: &Value) -> Result<Self> {
        if Self::is_unconstrained(schema) {
            return Ok(Self {
                raw: schema.clone(),
                validator: None,
            });
        }

        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::invalid_config(format!("Failed to compile schema: {}", e)))?;

        Ok(Self {
            raw: schema.clone(),
            validator: Some(validator),
        })
    }

    /// Validate `config`, returning one message per violation (empty = valid)
    pub fn validate(&self, config: &Value) -> Vec<String> {
        let Some(validator) = &self.validator else {
            return Vec::new();
        };

        validator
            .iter_errors(config)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect()
    }

    /// Fill in top-level property defaults missing from `config`
    pub fn apply_defaults(&self, config: &Value) -> Value {
        let mut merged = match config {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => return other.clone(),
        };

        if let Some(properties) = self.raw.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                if merged.contains_key(key) {
                    continue;
                }
                if let Some(default) = property.get("default") {
                    debug!("Applying schema default for '{}'", key);
                    merged.insert(key.clone(), default.clone());
                }
            }
        }

        Value::Object(merged)
    }

    /// Compile `schema` and validate `config` in one step
    ///
    /// A schema that fails to compile is itself reported as a configuration error.
    pub fn check(schema: &Value, config: &Value) -> Vec<String> {
        match Self::compile(schema) {
            Ok(compiled) => compiled.validate(&compiled.apply_defaults(config)),
            Err(e) => vec![e.to_string()],
        }
    }

    /// Raw schema document
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn is_unconstrained(schema: &Value) -> bool {
        match schema {
            Value::Null => true,
            Value::Bool(true) => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn importer_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string"},
                "file_pattern": {"type": "string", "default": ".*\\.pdf$"},
                "delete_after_import": {"type": "boolean", "default": false}
            },
            "required": ["directory"]
        })
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        let schema = ConfigSchema::compile(&importer_schema()).unwrap();
        assert!(schema.validate(&json!({"directory": "/inbox"})).is_empty());
    }

    #[test]
    fn test_missing_required_property() {
        let errors = ConfigSchema::check(&importer_schema(), &json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("directory"));
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let errors = ConfigSchema::check(
            &importer_schema(),
            &json!({"directory": "/inbox", "delete_after_import": "yes"}),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("/delete_after_import"));
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let schema = ConfigSchema::compile(&importer_schema()).unwrap();
        let merged = schema.apply_defaults(&json!({"directory": "/inbox", "file_pattern": ".*"}));
        assert_eq!(merged["file_pattern"], ".*");
        assert_eq!(merged["delete_after_import"], false);
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        assert!(ConfigSchema::check(&json!({}), &json!({"anything": [1, 2]})).is_empty());
        assert!(ConfigSchema::check(&Value::Null, &json!(null)).is_empty());
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        let errors = ConfigSchema::check(&json!({"type": 12}), &json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Failed to compile schema"));
    }
}
