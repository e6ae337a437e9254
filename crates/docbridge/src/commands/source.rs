//! Source management commands

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use docbridge_core::types::Source;
use docbridge_core::utils::title_from_slug;
use docbridge_extensions::update_checker::{check_all_sources, check_source, UpdateCheckReport};
use tabled::Tabled;

use super::format_optional_time;
use crate::cli::{JsonArgs, SourceAddArgs, SourceAvailableArgs, SourceCheckArgs, SourceCommands, SourceSlugArgs};
use crate::output;
use crate::runtime::Runtime;

/// Maximum description width in the available table
const DESCRIPTION_WIDTH: usize = 60;

pub async fn run(cmd: SourceCommands, state: Option<&Utf8Path>) -> Result<()> {
    let runtime = Runtime::open(state).await?;
    match cmd {
        SourceCommands::List(args) => list(&runtime, args),
        SourceCommands::Add(args) => add(&runtime, args).await,
        SourceCommands::Remove(args) => remove(&runtime, args),
        SourceCommands::Fetch(args) => fetch(&runtime, args).await,
        SourceCommands::Available(args) => available(&runtime, args).await,
        SourceCommands::Check(args) => check(&runtime, args).await,
    }
}

#[derive(Tabled)]
struct SourceRow {
    slug: String,
    name: String,
    kind: String,
    enabled: bool,
    manifest: String,
    #[tabled(rename = "last fetched")]
    last_fetched: String,
    status: String,
    url: String,
}

impl From<&Source> for SourceRow {
    fn from(source: &Source) -> Self {
        Self {
            slug: source.slug.clone(),
            name: source.name.clone(),
            kind: source.kind.to_string(),
            enabled: source.enabled,
            manifest: source
                .manifest_kind()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string()),
            last_fetched: format_optional_time(source.last_fetched_at.as_ref()),
            status: match &source.last_error {
                Some(error) => output::truncate(error, 40),
                None => "ok".to_string(),
            },
            url: source.url.clone(),
        }
    }
}

fn list(runtime: &Runtime, args: JsonArgs) -> Result<()> {
    let sources = runtime.store().list_sources()?;

    if args.json {
        return output::json(&sources);
    }
    if sources.is_empty() {
        output::info("No sources configured. Add one with: docbridge source add <slug> <url>");
        return Ok(());
    }

    output::table(sources.iter().map(SourceRow::from).collect());
    Ok(())
}

async fn add(runtime: &Runtime, args: SourceAddArgs) -> Result<()> {
    let name = args.name.unwrap_or_else(|| title_from_slug(&args.slug));
    let source = runtime
        .manager
        .add_source(&args.slug, &name, &args.url)
        .with_context(|| format!("Failed to add source '{}'", args.slug))?;
    output::success(&format!("Added source {} ({})", source.slug, source.url));

    if args.fetch {
        let source = runtime.manager.refresh_source(&source.slug).await?;
        print_fetch_summary(&source);
    }
    Ok(())
}

fn remove(runtime: &Runtime, args: SourceSlugArgs) -> Result<()> {
    runtime
        .manager
        .remove_source(&args.slug)
        .with_context(|| format!("Failed to remove source '{}'", args.slug))?;
    output::success(&format!("Removed source {}", args.slug));
    Ok(())
}

async fn fetch(runtime: &Runtime, args: SourceSlugArgs) -> Result<()> {
    let source = runtime
        .manager
        .refresh_source(&args.slug)
        .await
        .with_context(|| format!("Failed to fetch source '{}'", args.slug))?;
    print_fetch_summary(&source);
    Ok(())
}

fn print_fetch_summary(source: &Source) {
    let Some(manifest) = &source.manifest else {
        return;
    };
    output::success(&format!(
        "Fetched {} manifest for {} ({} extensions)",
        manifest.kind,
        source.slug,
        manifest.entries.len()
    ));
    if let Some(version) = manifest.advertised_version() {
        output::kv("Version", &version);
    }
}

#[derive(Tabled)]
struct AvailableRow {
    slug: String,
    name: String,
    version: String,
    installed: String,
    description: String,
}

async fn available(runtime: &Runtime, args: SourceAvailableArgs) -> Result<()> {
    let source = if args.refresh {
        runtime.manager.refresh_source(&args.slug).await?
    } else {
        runtime
            .store()
            .get_source(&args.slug)?
            .ok_or_else(|| anyhow!("Source '{}' not found", args.slug))?
    };

    if source.manifest.is_none() {
        output::warning(&format!(
            "Source {} has not been fetched yet. Run: docbridge source fetch {}",
            source.slug, source.slug
        ));
        return Ok(());
    }

    let extensions = runtime.manager.get_available_extensions(&source)?;
    if args.json {
        return output::json(&extensions);
    }
    if extensions.is_empty() {
        output::info(&format!("Source {} offers no extensions", source.slug));
        return Ok(());
    }

    let rows = extensions
        .into_iter()
        .map(|available| AvailableRow {
            name: available.entry.display_name().to_string(),
            version: output::or_dash(Some(available.entry.version.as_str())),
            installed: match (available.installed, available.installed_version) {
                (true, Some(version)) => format!("yes ({})", version),
                (true, None) => "yes".to_string(),
                (false, _) => "no".to_string(),
            },
            description: output::truncate(&available.entry.description, DESCRIPTION_WIDTH),
            slug: available.entry.slug,
        })
        .collect();
    output::table(rows);
    Ok(())
}

#[derive(Tabled)]
struct UpdateRow {
    extension: String,
    source: String,
    current: String,
    available: String,
}

async fn check(runtime: &Runtime, args: SourceCheckArgs) -> Result<()> {
    let report = match &args.slug {
        Some(slug) => check_source(&runtime.manager, slug).await?,
        None => check_all_sources(&runtime.manager).await?,
    };

    if args.json {
        return output::json(&report);
    }
    print_check_report(&report);
    Ok(())
}

fn print_check_report(report: &UpdateCheckReport) {
    output::info(&format!(
        "Checked {} sources and {} extensions",
        report.sources_checked, report.extensions_checked
    ));

    for (slug, error) in &report.errors {
        output::warning(&format!("{}: {}", slug, error));
    }

    if report.updates.is_empty() {
        output::success("All extensions are up to date");
        return;
    }

    output::table(
        report
            .updates
            .iter()
            .map(|update| UpdateRow {
                extension: update.slug.clone(),
                source: update.source.clone(),
                current: update.current_version.clone(),
                available: update.available_version.clone(),
            })
            .collect(),
    );
    output::info("Apply with: docbridge extension update-all");
}
