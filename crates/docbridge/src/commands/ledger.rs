//! Lifecycle ledger command

use anyhow::{Context, Result};
use camino::Utf8Path;
use console::style;
use docbridge_extensions::ledger::EventFilter;
use docbridge_extensions::{EventEnvelope, LifecycleEvent};

use super::format_time;
use crate::cli::LedgerArgs;
use crate::output;
use crate::runtime;

/// Event types reported by `--failures`
const FAILURE_TYPES: [&str; 3] = ["source_fetch_failed", "install_failed", "update_failed"];

/// Maximum extension slug display width
const EXTENSION_WIDTH: usize = 24;

pub async fn run(args: LedgerArgs, state: Option<&Utf8Path>) -> Result<()> {
    let config = runtime::load_config(state)?;
    let ledger = runtime::ledger(&config)?;

    let mut event_types = args.event_types;
    if args.failures {
        event_types.extend(FAILURE_TYPES.iter().map(|t| t.to_string()));
    }

    let events = ledger
        .query_events(EventFilter {
            extension: args.extension,
            event_types: (!event_types.is_empty()).then_some(event_types),
            since: None,
            limit: Some(args.limit),
        })
        .context("Failed to read lifecycle ledger")?;

    if args.json {
        return output::json(&events);
    }
    if events.is_empty() {
        output::info("No events found");
        return Ok(());
    }

    for envelope in &events {
        print_event(envelope);
    }
    Ok(())
}

fn print_event(envelope: &EventEnvelope) {
    let type_name = envelope.event.type_name();
    let type_name = if envelope.event.is_failure() {
        style(type_name).red().to_string()
    } else {
        style(type_name).green().to_string()
    };
    println!(
        "{}  {:<width$}  {:<20}  {}",
        style(format_time(&envelope.timestamp)).dim(),
        output::truncate(&envelope.extension, EXTENSION_WIDTH),
        type_name,
        format_event_summary(&envelope.event),
        width = EXTENSION_WIDTH,
    );
}

/// Human-readable summary of one lifecycle event
fn format_event_summary(event: &LifecycleEvent) -> String {
    match event {
        LifecycleEvent::SourceFetched {
            manifest_kind,
            entries,
            version,
            ..
        } => match version {
            Some(version) => format!("Fetched {manifest_kind} manifest v{version} ({entries} extensions)"),
            None => format!("Fetched {manifest_kind} manifest ({entries} extensions)"),
        },

        LifecycleEvent::SourceFetchFailed { error_message, .. } => {
            format!("Fetch failed: {error_message}")
        }

        LifecycleEvent::InstallStarted { source, version, .. } => {
            format!("Install started (v{version} from {source})")
        }

        LifecycleEvent::InstallCompleted {
            version,
            duration_secs,
            components,
        } => format!(
            "Install completed (v{version}, {duration_secs}s, {} components)",
            components.len()
        ),

        LifecycleEvent::InstallFailed {
            version,
            error_message,
            duration_secs,
        } => format!("Install failed (v{version}, {duration_secs}s): {error_message}"),

        LifecycleEvent::UpdateStarted {
            from_version,
            to_version,
        } => format!("Update started ({from_version} \u{2192} {to_version})"),

        LifecycleEvent::UpdateCompleted {
            from_version,
            to_version,
            duration_secs,
            incompatible_instances,
        } => {
            let mut summary = format!("Update completed ({from_version} \u{2192} {to_version}, {duration_secs}s)");
            if !incompatible_instances.is_empty() {
                summary.push_str(&format!(
                    ", {} incompatible instances",
                    incompatible_instances.len()
                ));
            }
            summary
        }

        LifecycleEvent::UpdateFailed {
            from_version,
            to_version,
            error_message,
            ..
        } => format!("Update failed ({from_version} \u{2192} {to_version}): {error_message}"),

        LifecycleEvent::Uninstalled { version } => format!("Uninstalled (v{version})"),
    }
}
