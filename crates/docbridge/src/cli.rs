//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use docbridge_core::types::{ComponentKind, DocumentEvent};
use uuid::Uuid;

/// docbridge - extension runtime for the document-processing bridge
#[derive(Parser, Debug)]
#[command(name = "docbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the state file (overrides paths.state-file)
    #[arg(long, global = true, env = "DOCBRIDGE_STATE")]
    pub state: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extension source management
    #[command(subcommand)]
    Source(SourceCommands),

    /// Extension management
    #[command(subcommand)]
    Extension(ExtensionCommands),

    /// Component instance management
    #[command(subcommand)]
    Instance(InstanceCommands),

    /// Extension package dependencies
    #[command(subcommand)]
    Deps(DepsCommands),

    /// Show execution logs of an instance
    Logs(LogsArgs),

    /// Show the extension lifecycle ledger
    Ledger(LedgerArgs),
}

// Source commands
#[derive(Subcommand, Debug)]
pub enum SourceCommands {
    /// List configured sources
    List(JsonArgs),

    /// Add a user source
    Add(SourceAddArgs),

    /// Remove a user source
    Remove(SourceSlugArgs),

    /// Fetch a source's manifest
    Fetch(SourceSlugArgs),

    /// List extensions offered by a source
    Available(SourceAvailableArgs),

    /// Check sources for extension updates
    Check(SourceCheckArgs),
}

#[derive(Args, Debug)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SourceAddArgs {
    /// Unique source slug
    pub slug: String,

    /// Repository or archive URL
    pub url: String,

    /// Display name (defaults to a title derived from the slug)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Fetch the manifest right away
    #[arg(long)]
    pub fetch: bool,
}

#[derive(Args, Debug)]
pub struct SourceSlugArgs {
    /// Source slug
    pub slug: String,
}

#[derive(Args, Debug)]
pub struct SourceAvailableArgs {
    /// Source slug
    pub slug: String,

    /// Fetch the manifest before listing
    #[arg(long)]
    pub refresh: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SourceCheckArgs {
    /// Only check this source (default: every enabled source)
    pub slug: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Extension commands
#[derive(Subcommand, Debug)]
pub enum ExtensionCommands {
    /// List installed extensions
    List(ExtensionListArgs),

    /// Install an extension from a source
    Install(ExtensionInstallArgs),

    /// Update an installed extension to the version its source offers
    Update(ExtensionSlugArgs),

    /// Update every extension flagged with an available update
    UpdateAll,

    /// Check one extension for an update
    Check(ExtensionSlugArgs),

    /// Uninstall an extension with its instances and logs
    Uninstall(ExtensionSlugArgs),

    /// Show extension details and components
    Info(ExtensionInfoArgs),
}

#[derive(Args, Debug)]
pub struct ExtensionListArgs {
    /// Show registered components instead of extensions
    #[arg(long)]
    pub components: bool,

    /// Only components of this kind
    #[arg(long, requires = "components")]
    pub kind: Option<ComponentKind>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExtensionInstallArgs {
    /// Source to install from
    pub source: String,

    /// Extension slug within the source
    pub slug: String,

    /// Install missing package dependencies afterwards
    #[arg(long)]
    pub with_deps: bool,
}

#[derive(Args, Debug)]
pub struct ExtensionSlugArgs {
    /// Extension slug (source-backed extensions use `<source>.<slug>`)
    pub slug: String,
}

#[derive(Args, Debug)]
pub struct ExtensionInfoArgs {
    /// Extension slug
    pub slug: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Instance commands
#[derive(Subcommand, Debug)]
pub enum InstanceCommands {
    /// List component instances
    List(InstanceListArgs),

    /// Create an instance of a component
    Create(InstanceCreateArgs),

    /// Enable an instance
    Enable(InstanceIdArgs),

    /// Disable an instance
    Disable(InstanceIdArgs),

    /// Delete an instance and its logs
    Delete(InstanceIdArgs),
}

#[derive(Args, Debug)]
pub struct InstanceListArgs {
    /// Only instances of this kind
    #[arg(long)]
    pub kind: Option<ComponentKind>,

    /// Only instances of this extension
    #[arg(long)]
    pub extension: Option<String>,

    /// Only enabled instances
    #[arg(long)]
    pub enabled: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InstanceCreateArgs {
    /// Component full slug (`<extension>.<component>`)
    pub component: String,

    /// Instance name
    pub name: String,

    /// Execution priority (lower runs first)
    #[arg(short, long, default_value = "100")]
    pub priority: i32,

    /// Instance configuration as a JSON object
    #[arg(short, long)]
    pub config: Option<String>,

    /// Document event that triggers the instance (repeatable; none = every event)
    #[arg(short, long = "trigger")]
    pub triggers: Vec<DocumentEvent>,

    /// Collection the instance is scoped to (repeatable; none = every collection)
    #[arg(long = "collection")]
    pub collections: Vec<String>,

    /// Data sink for data source instances
    #[arg(long)]
    pub sink: Option<String>,

    /// Create the instance disabled
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Args, Debug)]
pub struct InstanceIdArgs {
    /// Instance id
    pub id: Uuid,
}

// Dependency commands
#[derive(Subcommand, Debug)]
pub enum DepsCommands {
    /// Check declared dependencies against the package environment
    Check(DepsArgs),

    /// Install missing dependencies
    Install(DepsArgs),
}

#[derive(Args, Debug)]
pub struct DepsArgs {
    /// Only this extension (default: every installed extension)
    pub extension: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Instance id
    pub instance: Uuid,

    /// Show at most this many logs (newest first)
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Only events of this extension or source
    #[arg(short, long)]
    pub extension: Option<String>,

    /// Only events of these types (comma-separated, e.g. install_failed,update_failed)
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    pub event_types: Vec<String>,

    /// Only failure events
    #[arg(long)]
    pub failures: bool,

    /// Show at most this many of the most recent events
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
