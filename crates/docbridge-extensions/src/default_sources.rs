//! Built-in sources shipped with the application
//!
//! Built-in sources come from the `default-sources` list of the runtime
//! configuration. Operators can disable them but not delete them; user
//! sources are never touched here.

use docbridge_core::types::{DefaultSource, Source, SourceKind};
use docbridge_core::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::store::ExtensionStore;

/// Changes made by [`ensure_default_sources`]
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DefaultSourcesReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

/// Changes made by [`cleanup_orphaned_builtin_sources`]
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    /// No longer configured but still has installed extensions
    pub converted: Vec<String>,
    pub removed: Vec<String>,
}

/// Create missing built-in sources and refresh the URL of existing ones
///
/// A failure on one source is logged and does not stop the others.
pub fn ensure_default_sources(store: &dyn ExtensionStore, defaults: &[DefaultSource]) -> DefaultSourcesReport {
    let mut report = DefaultSourcesReport::default();

    for default in defaults {
        if default.slug.trim().is_empty() {
            warn!("Skipping default source without slug: {}", default.url);
            continue;
        }

        match ensure_one(store, default) {
            Ok(Some(Change::Created)) => report.created.push(default.slug.clone()),
            Ok(Some(Change::Updated)) => report.updated.push(default.slug.clone()),
            Ok(None) => {}
            Err(e) => error!("Failed to create/update source {}: {}", default.slug, e),
        }
    }

    report
}

enum Change {
    Created,
    Updated,
}

fn ensure_one(store: &dyn ExtensionStore, default: &DefaultSource) -> Result<Option<Change>> {
    match store.get_source(&default.slug)? {
        None => {
            let name = if default.name.is_empty() {
                default.slug.clone()
            } else {
                default.name.clone()
            };
            let mut source = Source::new(&default.slug, name, &default.url, SourceKind::Builtin);
            source.enabled = default.enabled;
            store.create_source(source)?;
            info!("Created default source: {}", default.slug);
            Ok(Some(Change::Created))
        }
        Some(mut source) if source.is_builtin() && !default.url.is_empty() && source.url != default.url => {
            source.url = default.url.clone();
            store.update_source(&source)?;
            info!("Updated URL for source {}", default.slug);
            Ok(Some(Change::Updated))
        }
        Some(_) => Ok(None),
    }
}

/// Retire built-in sources that are no longer configured
///
/// Sources that still have installed extensions become user sources; the rest
/// are deleted.
pub fn cleanup_orphaned_builtin_sources(
    store: &dyn ExtensionStore,
    defaults: &[DefaultSource],
) -> Result<CleanupReport> {
    let configured: HashSet<&str> = defaults.iter().map(|d| d.slug.as_str()).collect();
    let extensions = store.list_extensions()?;
    let mut report = CleanupReport::default();

    for mut source in store.list_sources()? {
        if !source.is_builtin() || configured.contains(source.slug.as_str()) {
            continue;
        }

        let in_use = extensions
            .iter()
            .any(|e| e.source.as_deref() == Some(source.slug.as_str()));

        source.kind = SourceKind::User;
        store.update_source(&source)?;

        if in_use {
            warn!(
                "Built-in source '{}' is no longer configured but has installed extensions; converting to user source",
                source.slug
            );
            report.converted.push(source.slug);
        } else {
            info!("Removing orphaned built-in source: {}", source.slug);
            store.delete_source(&source.slug)?;
            report.removed.push(source.slug);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use docbridge_core::types::Extension;

    fn default(slug: &str, url: &str) -> DefaultSource {
        DefaultSource {
            slug: slug.into(),
            name: String::new(),
            url: url.into(),
            enabled: true,
        }
    }

    #[test]
    fn test_creates_and_updates_builtin_sources() {
        let store = MemoryStore::new();
        let defaults = vec![default("official", "https://github.com/docbridge/plugins")];

        let report = ensure_default_sources(&store, &defaults);
        assert_eq!(report.created, vec!["official"]);
        let source = store.get_source("official").unwrap().unwrap();
        assert!(source.is_builtin());
        assert_eq!(source.name, "official");

        // Unchanged config is a no-op
        assert_eq!(ensure_default_sources(&store, &defaults), DefaultSourcesReport::default());

        let moved = vec![default("official", "https://github.com/docbridge/official-plugins")];
        let report = ensure_default_sources(&store, &moved);
        assert_eq!(report.updated, vec!["official"]);
        assert_eq!(
            store.get_source("official").unwrap().unwrap().url,
            "https://github.com/docbridge/official-plugins"
        );
    }

    #[test]
    fn test_user_source_with_same_slug_is_untouched() {
        let store = MemoryStore::new();
        store
            .create_source(Source::new("acme", "Acme", "https://github.com/acme/mine", SourceKind::User))
            .unwrap();

        let report = ensure_default_sources(&store, &[default("acme", "https://github.com/acme/other")]);
        assert!(report.updated.is_empty());
        assert_eq!(store.get_source("acme").unwrap().unwrap().url, "https://github.com/acme/mine");
    }

    #[test]
    fn test_cleanup_converts_or_removes() {
        let store = MemoryStore::new();
        for slug in ["kept", "used", "unused"] {
            store
                .create_source(Source::new(slug, slug, format!("https://github.com/x/{}", slug), SourceKind::Builtin))
                .unwrap();
        }
        let mut extension = Extension::new("used.ocr", "OCR", "1.0.0");
        extension.source = Some("used".into());
        store.create_extension(extension).unwrap();

        let report = cleanup_orphaned_builtin_sources(&store, &[default("kept", "https://github.com/x/kept")]).unwrap();

        assert_eq!(report.converted, vec!["used"]);
        assert_eq!(report.removed, vec!["unused"]);
        assert_eq!(store.get_source("used").unwrap().unwrap().kind, SourceKind::User);
        assert!(store.get_source("unused").unwrap().is_none());
        assert!(store.get_source("kept").unwrap().unwrap().is_builtin());
    }
}
