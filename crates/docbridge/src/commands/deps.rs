//! Dependency commands

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use docbridge_core::types::Extension;
use docbridge_extensions::dependency::DependencyStatus;
use docbridge_extensions::DependencyResolver;
use std::collections::BTreeSet;
use tabled::Tabled;

use crate::cli::{DepsArgs, DepsCommands};
use crate::output;
use crate::runtime::Runtime;

pub async fn run(cmd: DepsCommands, state: Option<&Utf8Path>) -> Result<()> {
    let runtime = Runtime::open(state).await?;
    match cmd {
        DepsCommands::Check(args) => check(&runtime, args).await,
        DepsCommands::Install(args) => install(&runtime, args).await,
    }
}

/// Requirements declared by one extension, or by every installed extension
fn requirements(runtime: &Runtime, extension: Option<&str>) -> Result<Vec<String>> {
    let extensions: Vec<Extension> = match extension {
        Some(slug) => vec![runtime
            .store()
            .get_extension(slug)?
            .ok_or_else(|| anyhow!("Extension '{}' is not installed", slug))?],
        None => runtime.store().list_extensions()?,
    };

    let unique: BTreeSet<String> = extensions.into_iter().flat_map(|e| e.dependencies).collect();
    Ok(unique.into_iter().collect())
}

#[derive(Tabled)]
struct DependencyRow {
    requirement: String,
    installed: String,
    status: String,
}

impl From<&DependencyStatus> for DependencyRow {
    fn from(status: &DependencyStatus) -> Self {
        Self {
            requirement: status.package.clone(),
            installed: output::or_dash(status.installed_version.as_deref()),
            status: if status.satisfied {
                "ok".to_string()
            } else if status.installed {
                "version mismatch".to_string()
            } else {
                "missing".to_string()
            },
        }
    }
}

async fn check(runtime: &Runtime, args: DepsArgs) -> Result<()> {
    let requirements = requirements(runtime, args.extension.as_deref())?;
    let statuses = runtime.dependency_resolver().check(&requirements).await;

    if args.json {
        return output::json(&statuses);
    }
    if statuses.is_empty() {
        output::info("No dependencies declared");
        return Ok(());
    }

    output::table(statuses.iter().map(DependencyRow::from).collect());
    let unsatisfied = statuses.iter().filter(|s| !s.satisfied).count();
    if unsatisfied > 0 {
        output::warning(&format!(
            "{} dependencies need attention. Install with: docbridge deps install",
            unsatisfied
        ));
    }
    Ok(())
}

async fn install(runtime: &Runtime, args: DepsArgs) -> Result<()> {
    let requirements = requirements(runtime, args.extension.as_deref())?;
    if args.json {
        let resolver = runtime.dependency_resolver();
        let missing = missing_packages(&resolver, &requirements).await;
        return output::json(&resolver.install(&missing).await);
    }
    install_missing(runtime, &requirements).await
}

async fn missing_packages(resolver: &DependencyResolver, requirements: &[String]) -> Vec<String> {
    resolver
        .missing(requirements)
        .await
        .into_iter()
        .map(|status| status.package)
        .collect()
}

/// Install the requirements that are missing or out of range
pub(super) async fn install_missing(runtime: &Runtime, requirements: &[String]) -> Result<()> {
    let resolver = runtime.dependency_resolver();
    let missing = missing_packages(&resolver, requirements).await;

    if missing.is_empty() {
        output::success("All dependencies are satisfied");
        return Ok(());
    }

    output::info(&format!("Installing {} dependencies...", missing.len()));
    let report = resolver.install(&missing).await;
    for line in report.output.lines() {
        if line.starts_with("Failed") {
            output::error(line);
        } else {
            output::success(line);
        }
    }

    if report.success {
        Ok(())
    } else {
        Err(anyhow!("{} dependencies failed to install", report.failed.len()))
    }
}
