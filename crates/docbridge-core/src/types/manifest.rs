//! Source manifest formats
//!
//! A source advertises its extensions in one of three ways:
//! - a multi-extension manifest (`docbridge-plugins.json`) listing many extensions
//! - a single-extension manifest (`docbridge-plugin.json`) at the repository root
//! - no manifest at all, in which case one is inferred from the repository name

use crate::error::{Error, Result};
use crate::utils::{is_safe_relative_path, is_valid_slug, slugify, title_from_slug};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File name of the multi-extension manifest
pub const MULTI_PLUGIN_MANIFEST: &str = "docbridge-plugins.json";

/// File name of the single-extension manifest
pub const SINGLE_PLUGIN_MANIFEST: &str = "docbridge-plugin.json";

/// Entry file looked for when a source has no manifest
pub const DEFAULT_ENTRY_POINT: &str = "plugin";

fn default_entry_point() -> String {
    DEFAULT_ENTRY_POINT.to_string()
}

/// How a manifest was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Multi,
    Single,
    Inferred,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Multi => write!(f, "multi"),
            ManifestKind::Single => write!(f, "single"),
            ManifestKind::Inferred => write!(f, "inferred"),
        }
    }
}

/// One installable extension described by a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub slug: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Entry file, relative to `path`
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Sub-directory within the source ("" = repository root)
    #[serde(default)]
    pub path: String,
}

impl ManifestEntry {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            version: String::new(),
            description: String::new(),
            author: String::new(),
            entry_point: default_entry_point(),
            path: String::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check the fields that end up in filesystem paths
    pub fn validate(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(Error::missing_field("slug"));
        }
        if !is_valid_slug(&self.slug) {
            return Err(Error::invalid_config(format!(
                "Invalid extension slug '{}': expected [a-z0-9_-]",
                self.slug
            )));
        }
        if self.entry_point.is_empty() || !is_safe_relative_path(&self.entry_point) {
            return Err(Error::invalid_config(format!(
                "Entry point '{}' of '{}' must be a relative path inside the extension",
                self.entry_point, self.slug
            )));
        }
        if !is_safe_relative_path(&self.path) {
            return Err(Error::invalid_config(format!(
                "Path '{}' of '{}' must be relative to the source root",
                self.path, self.slug
            )));
        }
        Ok(())
    }

    /// Display name, falling back to the slug
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.slug
        } else {
            &self.name
        }
    }
}

/// On-disk shape of a multi-extension manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MultiManifestFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    plugins: Vec<ManifestEntry>,
}

/// Normalised manifest cached on a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: ManifestKind,

    /// Top-level version of a multi-extension manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn multi(version: Option<String>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            kind: ManifestKind::Multi,
            version,
            entries,
        }
    }

    /// A single-extension manifest always describes the source root
    pub fn single(mut entry: ManifestEntry) -> Self {
        entry.path.clear();
        Self {
            kind: ManifestKind::Single,
            version: None,
            entries: vec![entry],
        }
    }

    /// Synthesise a minimal manifest from a repository name
    pub fn inferred(repo_name: &str) -> Self {
        let entry = ManifestEntry::new(slugify(repo_name), title_from_slug(repo_name));
        Self {
            kind: ManifestKind::Inferred,
            version: None,
            entries: vec![entry],
        }
    }

    /// Parse the contents of a multi-extension manifest file
    pub fn parse_multi(content: &[u8]) -> Result<Self> {
        let file: MultiManifestFile = serde_json::from_slice(content)?;
        for entry in &file.plugins {
            entry.validate()?;
        }
        Ok(Self::multi(file.version, file.plugins))
    }

    /// Parse the contents of a single-extension manifest file
    pub fn parse_single(content: &[u8]) -> Result<Self> {
        let entry: ManifestEntry = serde_json::from_slice(content)?;
        entry.validate()?;
        Ok(Self::single(entry))
    }

    /// Version advertised for the source as a whole
    pub fn advertised_version(&self) -> Option<String> {
        let version = match self.kind {
            ManifestKind::Multi => self.version.clone(),
            ManifestKind::Single | ManifestKind::Inferred => {
                self.entries.first().map(|e| e.version.clone())
            }
        };
        version.filter(|v| !v.is_empty())
    }

    /// Find an entry by slug
    pub fn entry(&self, slug: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.slug == slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_manifest() {
        let json = br#"{
            "version": "3.1.0",
            "plugins": [
                {"slug": "word-count", "name": "Word Count", "version": "1.0.0", "path": "extensions/word-count"},
                {"slug": "ocr", "name": "OCR", "version": "0.2.0", "path": "extensions/ocr", "entry_point": "run.sh"}
            ]
        }"#;

        let manifest = Manifest::parse_multi(json).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Multi);
        assert_eq!(manifest.advertised_version().as_deref(), Some("3.1.0"));
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entry("word-count").unwrap().entry_point, DEFAULT_ENTRY_POINT);
        assert_eq!(manifest.entry("ocr").unwrap().entry_point, "run.sh");
    }

    #[test]
    fn test_parse_multi_rejects_entry_without_slug() {
        let json = br#"{"plugins": [{"slug": "", "name": "Nameless"}]}"#;
        assert!(Manifest::parse_multi(json).is_err());
    }

    #[test]
    fn test_parse_rejects_traversal_slug() {
        let json = br#"{"plugins": [
            {"slug": "word-count", "path": "word-count"},
            {"slug": "..", "path": "word-count"}
        ]}"#;
        let err = Manifest::parse_multi(json).unwrap_err();
        assert!(err.to_string().contains("Invalid extension slug '..'"));

        assert!(Manifest::parse_single(br#"{"slug": "acme/evil"}"#).is_err());
        assert!(Manifest::parse_single(br#"{"slug": "acme.tools"}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_escaping_entry_point_and_path() {
        let absolute = br#"{"slug": "ocr", "entry_point": "/bin/sh"}"#;
        assert!(Manifest::parse_single(absolute).is_err());

        let parent = br#"{"plugins": [{"slug": "ocr", "entry_point": "../../plugin"}]}"#;
        assert!(Manifest::parse_multi(parent).is_err());

        let path = br#"{"plugins": [{"slug": "ocr", "path": "../outside"}]}"#;
        assert!(Manifest::parse_multi(path).is_err());

        let nested = br#"{"plugins": [{"slug": "ocr", "path": "ext/ocr", "entry_point": "bin/run.sh"}]}"#;
        assert!(Manifest::parse_multi(nested).is_ok());
    }

    #[test]
    fn test_inferred_slug_is_normalised() {
        let manifest = Manifest::inferred("Docbridge.OCR");
        assert_eq!(manifest.entries[0].slug, "docbridge-ocr");
    }

    #[test]
    fn test_parse_single_manifest_forces_root_path() {
        let json = br#"{"slug": "pdf-tools", "name": "PDF Tools", "version": "1.2.0", "path": "ignored"}"#;
        let manifest = Manifest::parse_single(json).unwrap();
        assert_eq!(manifest.kind, ManifestKind::Single);
        assert_eq!(manifest.entries[0].path, "");
        assert_eq!(manifest.advertised_version().as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_inferred_manifest_from_repo_name() {
        let manifest = Manifest::inferred("word_count-plugin");
        let entry = &manifest.entries[0];
        assert_eq!(entry.slug, "word_count-plugin");
        assert_eq!(entry.name, "Word Count Plugin");
        assert_eq!(entry.entry_point, DEFAULT_ENTRY_POINT);
        assert!(manifest.advertised_version().is_none());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(Manifest::parse_single(b"not json").is_err());
    }
}
