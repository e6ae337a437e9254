//! Batch update checks across sources
//!
//! Every function here is best-effort: one failing source or extension is
//! recorded in the report and the batch carries on.

use chrono::{DateTime, Utc};
use docbridge_core::types::Extension;
use serde::Serialize;
use tracing::{info, warn};

use crate::source_manager::{SourceError, SourceManager, UpdateOutcome};

/// An installed extension with a newer version available
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableUpdate {
    pub slug: String,
    pub name: String,
    pub current_version: String,
    pub available_version: String,
    pub source: String,
}

/// Result of [`check_all_sources`]
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheckReport {
    pub checked_at: DateTime<Utc>,
    pub sources_checked: usize,
    pub extensions_checked: usize,
    pub updates: Vec<AvailableUpdate>,
    /// (source or extension slug, error) pairs
    pub errors: Vec<(String, String)>,
}

impl Default for UpdateCheckReport {
    fn default() -> Self {
        Self {
            checked_at: Utc::now(),
            sources_checked: 0,
            extensions_checked: 0,
            updates: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Result of [`update_all`]
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchUpdateReport {
    /// (slug, new version) pairs
    pub updated: Vec<(String, String)>,
    /// (slug, error) pairs
    pub failed: Vec<(String, String)>,
}

/// Fetch every enabled source and check the extensions installed from it
pub async fn check_all_sources(manager: &SourceManager) -> Result<UpdateCheckReport, SourceError> {
    let mut report = UpdateCheckReport::default();

    for source in manager.store().list_sources()? {
        if !source.enabled {
            continue;
        }
        check_source_into(manager, &source.slug, &mut report).await?;
    }

    info!(
        "Checked {} sources and {} extensions: {} updates, {} errors",
        report.sources_checked,
        report.extensions_checked,
        report.updates.len(),
        report.errors.len()
    );
    Ok(report)
}

/// Fetch one source and check the extensions installed from it
pub async fn check_source(manager: &SourceManager, source_slug: &str) -> Result<UpdateCheckReport, SourceError> {
    let mut report = UpdateCheckReport::default();
    check_source_into(manager, source_slug, &mut report).await?;
    Ok(report)
}

async fn check_source_into(
    manager: &SourceManager,
    source_slug: &str,
    report: &mut UpdateCheckReport,
) -> Result<(), SourceError> {
    let source = match manager.refresh_source(source_slug).await {
        Ok(source) => source,
        Err(e) => {
            warn!("Failed to fetch source {}: {}", source_slug, e);
            report.errors.push((source_slug.to_string(), e.to_string()));
            return Ok(());
        }
    };
    report.sources_checked += 1;

    let installed: Vec<Extension> = manager
        .store()
        .list_extensions()?
        .into_iter()
        .filter(|e| e.enabled && e.source.as_deref() == Some(source_slug))
        .collect();

    for extension in installed {
        report.extensions_checked += 1;
        match manager.check_against_source(&extension.slug, &source).await {
            Ok(Some(available_version)) => report.updates.push(AvailableUpdate {
                current_version: extension
                    .installed_version
                    .clone()
                    .unwrap_or_else(|| extension.version.clone()),
                slug: extension.slug,
                name: extension.name,
                available_version,
                source: source_slug.to_string(),
            }),
            Ok(None) => {}
            Err(e) => {
                warn!("Update check failed for {}: {}", extension.slug, e);
                report.errors.push((extension.slug, e.to_string()));
            }
        }
    }

    Ok(())
}

/// Enabled extensions flagged with an available update
pub fn extensions_with_updates(manager: &SourceManager) -> Result<Vec<Extension>, SourceError> {
    Ok(manager
        .store()
        .list_extensions()?
        .into_iter()
        .filter(|e| e.enabled && e.update_available)
        .collect())
}

/// Update every extension flagged with an available update
pub async fn update_all(manager: &SourceManager) -> Result<BatchUpdateReport, SourceError> {
    let mut report = BatchUpdateReport::default();

    for extension in extensions_with_updates(manager)? {
        match manager.update_plugin(&extension.slug).await {
            Ok(UpdateOutcome::Updated { to_version, .. }) => report.updated.push((extension.slug, to_version)),
            Ok(UpdateOutcome::UpToDate { .. }) => {}
            Err(e) => report.failed.push((extension.slug, e.to_string())),
        }
    }

    info!(
        "Batch update finished: {} updated, {} failed",
        report.updated.len(),
        report.failed.len()
    );
    Ok(report)
}
