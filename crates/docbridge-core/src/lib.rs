//! # docbridge-core
//!
//! Core library for the docbridge extension runtime providing:
//! - The persisted data model (sources, extensions, components, instances, logs)
//! - The document contract consumed by processors
//! - Hierarchical runtime configuration (embedded defaults, YAML, environment)
//! - JSON Schema validation of extension configuration

pub mod config;
pub mod error;
pub mod schema;
pub mod types;
pub mod utils;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use schema::ConfigSchema;
pub use utils::get_home_dir;
