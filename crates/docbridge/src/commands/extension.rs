//! Extension management commands
//!
//! - list: installed extensions, or registered components with `--components`
//! - install: download and register an extension from a source
//! - update / update-all: move extensions to the version their source offers
//! - check: look for a newer version of one extension
//! - uninstall: remove an extension with its instances and logs
//! - info: extension details, components and recent lifecycle events

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use docbridge_core::types::{Component, Extension};
use docbridge_extensions::update_checker::update_all;
use docbridge_extensions::{EventEnvelope, InstanceFilter, UpdateOutcome};
use serde_json::json;
use std::sync::PoisonError;
use tabled::Tabled;

use super::deps::install_missing;
use super::format_time;
use crate::cli::{ExtensionCommands, ExtensionInfoArgs, ExtensionInstallArgs, ExtensionListArgs, ExtensionSlugArgs};
use crate::output;
use crate::runtime::Runtime;

/// Lifecycle events shown by `extension info`
const RECENT_EVENTS: usize = 5;

pub async fn run(cmd: ExtensionCommands, state: Option<&Utf8Path>) -> Result<()> {
    match cmd {
        ExtensionCommands::List(args) if args.components => {
            list_components(&Runtime::open_with_plugins(state).await?, args)
        }
        ExtensionCommands::List(args) => list(&Runtime::open(state).await?, args),
        ExtensionCommands::Install(args) => install(&Runtime::open(state).await?, args).await,
        ExtensionCommands::Update(args) => update(&Runtime::open(state).await?, args).await,
        ExtensionCommands::UpdateAll => update_all_extensions(&Runtime::open(state).await?).await,
        ExtensionCommands::Check(args) => check(&Runtime::open(state).await?, args).await,
        ExtensionCommands::Uninstall(args) => uninstall(&Runtime::open(state).await?, args).await,
        ExtensionCommands::Info(args) => info(&Runtime::open(state).await?, args),
    }
}

fn get_extension(runtime: &Runtime, slug: &str) -> Result<Extension> {
    runtime
        .store()
        .get_extension(slug)?
        .ok_or_else(|| anyhow!("Extension '{}' is not installed", slug))
}

fn installed_version(extension: &Extension) -> String {
    extension
        .installed_version
        .clone()
        .unwrap_or_else(|| extension.version.clone())
}

#[derive(Tabled)]
struct ExtensionRow {
    slug: String,
    name: String,
    version: String,
    source: String,
    enabled: bool,
    update: String,
    #[tabled(rename = "installed at")]
    installed_at: String,
}

impl From<&Extension> for ExtensionRow {
    fn from(extension: &Extension) -> Self {
        Self {
            slug: extension.slug.clone(),
            name: extension.name.clone(),
            version: installed_version(extension),
            source: if extension.is_builtin() {
                "built-in".to_string()
            } else {
                output::or_dash(extension.source.as_deref())
            },
            enabled: extension.enabled,
            update: match (&extension.available_version, extension.update_available) {
                (Some(version), true) => version.clone(),
                _ => "-".to_string(),
            },
            installed_at: format_time(&extension.installed_at),
        }
    }
}

fn list(runtime: &Runtime, args: ExtensionListArgs) -> Result<()> {
    let extensions = runtime.store().list_extensions()?;

    if args.json {
        return output::json(&extensions);
    }
    if extensions.is_empty() {
        output::info("No extensions installed");
        return Ok(());
    }

    output::table(extensions.iter().map(ExtensionRow::from).collect());
    Ok(())
}

#[derive(Tabled)]
struct ComponentRow {
    component: String,
    kind: String,
    name: String,
    description: String,
}

fn list_components(runtime: &Runtime, args: ExtensionListArgs) -> Result<()> {
    let components = {
        let registry = runtime
            .manager
            .registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match args.kind {
            Some(kind) => registry.list_components(kind),
            None => docbridge_core::types::ComponentKind::ALL
                .iter()
                .flat_map(|kind| registry.list_components(*kind))
                .collect(),
        }
    };

    if args.json {
        return output::json(&components);
    }
    if components.is_empty() {
        output::info("No components registered");
        return Ok(());
    }

    output::table(
        components
            .into_iter()
            .map(|c| ComponentRow {
                component: c.full_slug,
                kind: c.kind.label().to_string(),
                name: c.name,
                description: output::truncate(&c.description, 60),
            })
            .collect(),
    );
    Ok(())
}

fn print_components(components: &[Component]) {
    for component in components {
        output::kv(component.kind.label(), &format!("{} ({})", component.full_slug(), component.name));
    }
}

async fn install(runtime: &Runtime, args: ExtensionInstallArgs) -> Result<()> {
    output::info(&format!("Installing {} from {}...", args.slug, args.source));

    let extension = runtime
        .manager
        .install_extension(&args.source, &args.slug)
        .await
        .with_context(|| format!("Failed to install '{}' from '{}'", args.slug, args.source))?;

    output::success(&format!(
        "Installed {} v{}",
        extension.slug,
        installed_version(&extension)
    ));
    print_components(&runtime.store().list_components(Some(&extension.slug))?);

    if !extension.dependencies.is_empty() {
        if args.with_deps {
            install_missing(runtime, &extension.dependencies).await?;
        } else {
            output::info(&format!(
                "Declares {} dependencies. Check with: docbridge deps check {}",
                extension.dependencies.len(),
                extension.slug
            ));
        }
    }
    Ok(())
}

async fn update(runtime: &Runtime, args: ExtensionSlugArgs) -> Result<()> {
    let outcome = runtime
        .manager
        .update_plugin(&args.slug)
        .await
        .with_context(|| format!("Failed to update '{}'", args.slug))?;

    match outcome {
        UpdateOutcome::UpToDate { version } => {
            output::success(&format!("{} is already at the latest version ({})", args.slug, version));
        }
        UpdateOutcome::Updated {
            from_version,
            to_version,
            removed_instances,
            incompatible_instances,
        } => {
            output::success(&format!("Updated {} from {} to {}", args.slug, from_version, to_version));
            if !removed_instances.is_empty() {
                output::warning(&format!(
                    "Deleted {} instances whose component was removed",
                    removed_instances.len()
                ));
            }
            for instance in incompatible_instances {
                output::warning(&format!(
                    "Instance {} ({}) no longer validates: {}",
                    instance.name,
                    instance.id,
                    instance.errors.join(", ")
                ));
            }
        }
    }
    Ok(())
}

async fn update_all_extensions(runtime: &Runtime) -> Result<()> {
    let report = update_all(&runtime.manager).await?;

    if report.updated.is_empty() && report.failed.is_empty() {
        output::success("No extensions flagged for update. Run: docbridge source check");
        return Ok(());
    }
    for (slug, version) in &report.updated {
        output::success(&format!("Updated {} to {}", slug, version));
    }
    for (slug, error) in &report.failed {
        output::error(&format!("Failed to update {}: {}", slug, error));
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} extensions failed to update", report.failed.len()))
    }
}

async fn check(runtime: &Runtime, args: ExtensionSlugArgs) -> Result<()> {
    let extension = get_extension(runtime, &args.slug)?;
    if extension.source.is_none() {
        output::info(&format!("{} is not installed from a source", args.slug));
        return Ok(());
    }

    match runtime.manager.check_for_updates(&args.slug).await? {
        Some(version) => output::info(&format!(
            "Update available for {}: {} -> {}",
            args.slug,
            installed_version(&extension),
            version
        )),
        None => output::success(&format!(
            "{} is up to date ({})",
            args.slug,
            installed_version(&extension)
        )),
    }
    Ok(())
}

async fn uninstall(runtime: &Runtime, args: ExtensionSlugArgs) -> Result<()> {
    let instances = runtime
        .store()
        .list_instances(&InstanceFilter::extension(args.slug.as_str()))?;

    runtime
        .manager
        .uninstall_extension(&args.slug)
        .await
        .with_context(|| format!("Failed to uninstall '{}'", args.slug))?;

    output::success(&format!("Uninstalled {}", args.slug));
    if !instances.is_empty() {
        output::info(&format!("Deleted {} instances and their logs", instances.len()));
    }
    Ok(())
}

fn info(runtime: &Runtime, args: ExtensionInfoArgs) -> Result<()> {
    let extension = get_extension(runtime, &args.slug)?;
    let components = runtime.store().list_components(Some(&extension.slug))?;
    let instances = runtime
        .store()
        .list_instances(&InstanceFilter::extension(extension.slug.as_str()))?;
    let events = runtime.ledger()?.history(&extension.slug).unwrap_or_default();
    let recent: Vec<&EventEnvelope> = events.iter().rev().take(RECENT_EVENTS).collect();

    if args.json {
        return output::json(&json!({
            "extension": extension,
            "components": components,
            "instances": instances.len(),
            "recent_events": recent,
        }));
    }

    output::header(&extension.name);
    output::kv("Slug", &extension.slug);
    output::kv("Version", &installed_version(&extension));
    output::kv("Author", &output::or_dash(Some(extension.author.as_str())));
    output::kv("Enabled", &extension.enabled.to_string());
    output::kv("Location", &extension.code_location);
    if let Some(source) = &extension.source {
        output::kv("Source", source);
    }
    if let Some(url) = &extension.installed_from_url {
        output::kv("Installed from", url);
    }
    if extension.update_available {
        output::kv("Update available", &output::or_dash(extension.available_version.as_deref()));
    }
    if !extension.description.is_empty() {
        println!();
        println!("  {}", extension.description);
    }

    if !extension.dependencies.is_empty() {
        output::header("Dependencies");
        for dependency in &extension.dependencies {
            println!("  {}", dependency);
        }
    }

    output::header("Components");
    if components.is_empty() {
        println!("  (none)");
    } else {
        print_components(&components);
    }
    output::kv("Instances", &instances.len().to_string());

    if !recent.is_empty() {
        output::header("Recent events");
        for envelope in recent {
            output::kv(&format_time(&envelope.timestamp), envelope.event.type_name());
        }
    }
    Ok(())
}
