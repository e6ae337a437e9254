//! Remote extension sources

use crate::types::{Manifest, ManifestKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of a source record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Shipped with the application; can be disabled but not deleted
    Builtin,
    /// Added by an operator
    User,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Builtin => write!(f, "builtin"),
            SourceKind::User => write!(f, "user"),
        }
    }
}

/// A remote origin of extensions (e.g. a hosted repository or an archive URL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub slug: String,
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    pub enabled: bool,

    /// Last successfully fetched manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,

    #[serde(default)]
    pub is_multi: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Error text from the most recent failed fetch (cleared on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Version advertised by the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Create an enabled source that has never been fetched
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        kind: SourceKind,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            url: url.into(),
            kind,
            enabled: true,
            manifest: None,
            is_multi: false,
            last_fetched_at: None,
            last_checked_at: None,
            last_error: None,
            latest_version: None,
            created_at: Utc::now(),
        }
    }

    /// Kind of the cached manifest, if any
    pub fn manifest_kind(&self) -> Option<ManifestKind> {
        self.manifest.as_ref().map(|m| m.kind)
    }

    /// Whether this source shipped with the application
    pub fn is_builtin(&self) -> bool {
        self.kind == SourceKind::Builtin
    }

    /// Record a successful manifest fetch
    pub fn record_fetch(&mut self, manifest: Manifest) {
        let now = Utc::now();
        self.is_multi = manifest.kind == ManifestKind::Multi;
        self.latest_version = manifest.advertised_version();
        self.manifest = Some(manifest);
        self.last_fetched_at = Some(now);
        self.last_checked_at = Some(now);
        self.last_error = None;
    }

    /// Record a failed fetch; the previously cached manifest is kept
    pub fn record_fetch_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.last_checked_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestEntry;

    #[test]
    fn test_record_fetch_sets_manifest_state() {
        let mut source = Source::new("acme", "Acme", "https://github.com/acme/plugins", SourceKind::User);
        source.record_fetch_error("boom");
        assert_eq!(source.last_error.as_deref(), Some("boom"));

        let manifest = Manifest::multi(
            Some("2.0.0".into()),
            vec![ManifestEntry::new("word-count", "Word Count")],
        );
        source.record_fetch(manifest);

        assert!(source.is_multi);
        assert_eq!(source.latest_version.as_deref(), Some("2.0.0"));
        assert!(source.last_error.is_none());
        assert!(source.last_fetched_at.is_some());
        assert_eq!(source.manifest_kind(), Some(ManifestKind::Multi));
    }

    #[test]
    fn test_fetch_error_keeps_cached_manifest() {
        let mut source = Source::new("acme", "Acme", "https://github.com/acme/plugins", SourceKind::Builtin);
        source.record_fetch(Manifest::inferred("plugins"));
        let fetched_at = source.last_fetched_at;

        source.record_fetch_error("HTTP 500");

        assert!(source.manifest.is_some());
        assert_eq!(source.last_fetched_at, fetched_at);
        assert!(source.is_builtin());
    }
}
