//! Installed extensions, their components, and configured instances

use crate::types::DocumentEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default priority for new instances (lower runs first)
pub const DEFAULT_PRIORITY: i32 = 100;

/// Prefix of `code_location` for extensions compiled into the host
pub const BUILTIN_LOCATION_PREFIX: &str = "builtin:";

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// An installed unit of third-party code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    /// Globally unique slug (`<source>.<extension>` for source-backed extensions)
    pub slug: String,
    pub name: String,

    #[serde(default)]
    pub author: String,

    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Entry file inside the cache directory, or `builtin:<module>`
    pub code_location: String,

    pub enabled: bool,
    pub installed_at: DateTime<Utc>,

    #[serde(default = "empty_object")]
    pub config_schema: Value,

    /// Operator-supplied extension-level configuration
    #[serde(default = "empty_object")]
    pub config: Value,

    /// Slug of the source this extension was installed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Sub-path within the source
    #[serde(default)]
    pub source_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_from_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_version: Option<String>,

    #[serde(default)]
    pub update_available: bool,

    /// Package requirements declared by the extension
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Extension {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            author: String::new(),
            version: version.into(),
            description: String::new(),
            code_location: String::new(),
            enabled: true,
            installed_at: Utc::now(),
            config_schema: empty_object(),
            config: empty_object(),
            source: None,
            source_path: String::new(),
            installed_version: None,
            installed_from_url: None,
            available_version: None,
            update_available: false,
            dependencies: Vec::new(),
        }
    }

    /// Slug of the extension within its source (`acme.word-count` -> `word-count`)
    pub fn local_slug(&self) -> &str {
        match &self.source {
            Some(source) => self
                .slug
                .strip_prefix(source.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(&self.slug),
            None => &self.slug,
        }
    }

    /// Whether the extension is compiled into the host
    pub fn is_builtin(&self) -> bool {
        self.code_location.starts_with(BUILTIN_LOCATION_PREFIX)
    }

    /// Record the outcome of an update check
    pub fn mark_update(&mut self, available: Option<String>) {
        self.update_available = available.is_some();
        self.available_version = available;
    }
}

/// Build the composite slug of a source-backed extension
pub fn composite_slug(source_slug: &str, extension_slug: &str) -> String {
    format!("{}.{}", source_slug, extension_slug)
}

/// Capability kinds an extension can contribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Importer,
    Preprocessor,
    Postprocessor,
    Datasource,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Importer,
        ComponentKind::Preprocessor,
        ComponentKind::Postprocessor,
        ComponentKind::Datasource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Importer => "importer",
            ComponentKind::Preprocessor => "preprocessor",
            ComponentKind::Postprocessor => "postprocessor",
            ComponentKind::Datasource => "datasource",
        }
    }

    /// Human-readable label used in messages
    pub fn label(&self) -> &'static str {
        match self {
            ComponentKind::Importer => "importer",
            ComponentKind::Preprocessor => "pre-processor",
            ComponentKind::Postprocessor => "post-processor",
            ComponentKind::Datasource => "data source",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "importer" => Ok(ComponentKind::Importer),
            "preprocessor" => Ok(ComponentKind::Preprocessor),
            "postprocessor" => Ok(ComponentKind::Postprocessor),
            "datasource" => Ok(ComponentKind::Datasource),
            _ => Err(format!("Unknown component kind: {}", s)),
        }
    }
}

/// A declared capability exposed by an extension (metadata only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Owning extension slug
    pub extension: String,
    pub kind: ComponentKind,
    pub slug: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Reference to the implementation inside the extension
    #[serde(default)]
    pub code_ref: String,

    #[serde(default = "empty_object")]
    pub config_schema: Value,

    /// Events a post-processor declares support for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_events: Vec<DocumentEvent>,
}

impl Component {
    pub fn new(
        extension: impl Into<String>,
        kind: ComponentKind,
        slug: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            extension: extension.into(),
            kind,
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            code_ref: String::new(),
            config_schema: empty_object(),
            supported_events: Vec::new(),
        }
    }

    /// Fully-qualified identifier (`extension-slug.component-slug`)
    pub fn full_slug(&self) -> String {
        composite_slug(&self.extension, &self.slug)
    }
}

/// An operator-configured, runnable configuration of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,

    /// Full slug of the owning component
    pub component: String,
    pub kind: ComponentKind,
    pub name: String,
    pub enabled: bool,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default = "empty_object")]
    pub config: Value,

    /// Events that trigger a post-processor (empty = every event)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub event_triggers: BTreeSet<DocumentEvent>,

    /// Collections this instance is restricted to (empty = unrestricted)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub collections: BTreeSet<String>,

    /// External sink a data-source instance syncs into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(component: &Component, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            component: component.full_slug(),
            kind: component.kind,
            name: name.into(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
            config: empty_object(),
            event_triggers: BTreeSet::new(),
            collections: BTreeSet::new(),
            sink_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_trigger(mut self, event: DocumentEvent) -> Self {
        self.event_triggers.insert(event);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.insert(collection.into());
        self
    }

    pub fn with_sink(mut self, sink_id: impl Into<String>) -> Self {
        self.sink_id = Some(sink_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Slug of the extension owning this instance's component
    pub fn extension_slug(&self) -> &str {
        self.component
            .rsplit_once('.')
            .map(|(extension, _)| extension)
            .unwrap_or(&self.component)
    }

    /// Whether a document in `collection` falls within this instance's scope
    pub fn in_scope(&self, collection: Option<&str>) -> bool {
        match collection {
            Some(collection) if !self.collections.is_empty() => self.collections.contains(collection),
            _ => true,
        }
    }

    /// Whether `event` should trigger this instance
    pub fn triggered_by(&self, event: DocumentEvent) -> bool {
        self.event_triggers.is_empty() || self.event_triggers.contains(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> Component {
        Component::new("acme.word-count", ComponentKind::Postprocessor, "counter", "Counter")
    }

    #[test]
    fn test_full_slug_and_extension_slug() {
        let component = component();
        assert_eq!(component.full_slug(), "acme.word-count.counter");

        let instance = Instance::new(&component, "count words");
        assert_eq!(instance.extension_slug(), "acme.word-count");
        assert_eq!(instance.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_local_slug_strips_source_prefix() {
        let mut ext = Extension::new("acme.word-count", "Word Count", "1.0.0");
        assert_eq!(ext.local_slug(), "acme.word-count");

        ext.source = Some("acme".into());
        assert_eq!(ext.local_slug(), "word-count");
    }

    #[test]
    fn test_scope_filter() {
        let instance = Instance::new(&component(), "scoped").with_collection("invoices");
        assert!(instance.in_scope(Some("invoices")));
        assert!(!instance.in_scope(Some("resumes")));
        // Documents without a collection are never filtered out
        assert!(instance.in_scope(None));

        let open = Instance::new(&component(), "open");
        assert!(open.in_scope(Some("resumes")));
    }

    #[test]
    fn test_event_filter() {
        let instance = Instance::new(&component(), "on approve").with_trigger(DocumentEvent::Approved);
        assert!(instance.triggered_by(DocumentEvent::Approved));
        assert!(!instance.triggered_by(DocumentEvent::Updated));

        let any = Instance::new(&component(), "any");
        assert!(any.triggered_by(DocumentEvent::Updated));
    }

    #[test]
    fn test_component_kind_parsing() {
        assert_eq!("pre-processor".parse::<ComponentKind>().unwrap(), ComponentKind::Preprocessor);
        assert_eq!("data_source".parse::<ComponentKind>().unwrap(), ComponentKind::Datasource);
        assert!("exporter".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn test_mark_update() {
        let mut ext = Extension::new("acme.ocr", "OCR", "1.0.0");
        ext.mark_update(Some("1.1.0".into()));
        assert!(ext.update_available);
        ext.mark_update(None);
        assert!(!ext.update_available);
        assert!(ext.available_version.is_none());
    }
}
