//! Instance management commands

use anyhow::{anyhow, bail, Context, Result};
use camino::Utf8Path;
use chrono::Utc;
use docbridge_core::types::{ComponentKind, Instance};
use docbridge_core::ConfigSchema;
use docbridge_extensions::InstanceFilter;
use serde_json::{Map, Value};
use tabled::Tabled;
use uuid::Uuid;

use crate::cli::{InstanceCommands, InstanceCreateArgs, InstanceIdArgs, InstanceListArgs};
use crate::output;
use crate::runtime::Runtime;

pub async fn run(cmd: InstanceCommands, state: Option<&Utf8Path>) -> Result<()> {
    let runtime = Runtime::open(state).await?;
    match cmd {
        InstanceCommands::List(args) => list(&runtime, args),
        InstanceCommands::Create(args) => create(&runtime, args),
        InstanceCommands::Enable(args) => set_enabled(&runtime, args.id, true),
        InstanceCommands::Disable(args) => set_enabled(&runtime, args.id, false),
        InstanceCommands::Delete(args) => delete(&runtime, args),
    }
}

#[derive(Tabled)]
struct InstanceRow {
    id: String,
    name: String,
    component: String,
    kind: String,
    enabled: bool,
    priority: i32,
    triggers: String,
    collections: String,
}

impl From<&Instance> for InstanceRow {
    fn from(instance: &Instance) -> Self {
        let joined = |items: Vec<String>| {
            if items.is_empty() {
                "all".to_string()
            } else {
                items.join(", ")
            }
        };
        Self {
            id: instance.id.to_string(),
            name: instance.name.clone(),
            component: instance.component.clone(),
            kind: instance.kind.label().to_string(),
            enabled: instance.enabled,
            priority: instance.priority,
            triggers: match instance.kind {
                ComponentKind::Postprocessor => {
                    joined(instance.event_triggers.iter().map(|e| e.to_string()).collect())
                }
                _ => "-".to_string(),
            },
            collections: joined(instance.collections.iter().cloned().collect()),
        }
    }
}

fn list(runtime: &Runtime, args: InstanceListArgs) -> Result<()> {
    let filter = InstanceFilter {
        kind: args.kind,
        extension: args.extension,
        component: None,
        enabled: args.enabled.then_some(true),
    };
    let instances = runtime.store().list_instances(&filter)?;

    if args.json {
        return output::json(&instances);
    }
    if instances.is_empty() {
        output::info("No instances found");
        return Ok(());
    }

    output::table(instances.iter().map(InstanceRow::from).collect());
    Ok(())
}

/// Parse `--config` into a JSON object
fn parse_config(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Map::new()));
    };
    let value: Value = serde_json::from_str(raw).context("--config is not valid JSON")?;
    if !value.is_object() {
        bail!("--config must be a JSON object");
    }
    Ok(value)
}

/// Extension config overlaid with instance config
fn merged_config(extension_config: &Value, instance_config: &Value) -> Value {
    let mut merged = extension_config.as_object().cloned().unwrap_or_default();
    if let Some(overrides) = instance_config.as_object() {
        merged.extend(overrides.clone());
    }
    Value::Object(merged)
}

fn create(runtime: &Runtime, args: InstanceCreateArgs) -> Result<()> {
    let component = runtime
        .store()
        .get_component(&args.component)?
        .ok_or_else(|| anyhow!("Component '{}' not found", args.component))?;
    let extension = runtime
        .store()
        .get_extension(&component.extension)?
        .ok_or_else(|| anyhow!("Extension '{}' is not installed", component.extension))?;

    let config = parse_config(args.config.as_deref())?;
    let errors = ConfigSchema::check(&component.config_schema, &merged_config(&extension.config, &config));
    if !errors.is_empty() {
        bail!("Configuration errors: {}", errors.join(", "));
    }

    if !args.triggers.is_empty() && component.kind != ComponentKind::Postprocessor {
        bail!("Event triggers only apply to post-processors");
    }
    if let Some(event) = args
        .triggers
        .iter()
        .find(|e| !component.supported_events.is_empty() && !component.supported_events.contains(e))
    {
        bail!("{} does not support the {} event", component.full_slug(), event);
    }
    if args.sink.is_some() && component.kind != ComponentKind::Datasource {
        bail!("A data sink only applies to data sources");
    }

    let mut instance = Instance::new(&component, args.name)
        .with_priority(args.priority)
        .with_config(config);
    for event in args.triggers {
        instance = instance.with_trigger(event);
    }
    for collection in args.collections {
        instance = instance.with_collection(collection);
    }
    if let Some(sink) = args.sink {
        instance = instance.with_sink(sink);
    }
    if args.disabled {
        instance = instance.disabled();
    }

    let id = instance.id;
    runtime
        .store()
        .create_instance(instance)
        .context("Failed to create instance")?;
    output::success(&format!("Created {} instance {}", component.kind.label(), id));
    Ok(())
}

fn set_enabled(runtime: &Runtime, id: Uuid, enabled: bool) -> Result<()> {
    let mut instance = runtime
        .store()
        .get_instance(id)?
        .ok_or_else(|| anyhow!("Instance {} not found", id))?;

    let verb = if enabled { "Enabled" } else { "Disabled" };
    if instance.enabled == enabled {
        output::info(&format!("{} is already {}", instance.name, verb.to_lowercase()));
        return Ok(());
    }

    instance.enabled = enabled;
    instance.updated_at = Utc::now();
    runtime.store().update_instance(&instance)?;
    output::success(&format!("{} {} ({})", verb, instance.name, id));
    Ok(())
}

fn delete(runtime: &Runtime, args: InstanceIdArgs) -> Result<()> {
    runtime
        .store()
        .delete_instance(args.id)
        .with_context(|| format!("Failed to delete instance {}", args.id))?;
    output::success(&format!("Deleted instance {}", args.id));
    Ok(())
}
