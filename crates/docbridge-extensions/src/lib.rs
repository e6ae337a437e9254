//! Extension runtime for docbridge
//!
//! This crate handles:
//! - Capability contracts and the in-memory registry
//! - Loading fetched extensions through the extension host protocol
//! - Remote sources (GitHub repositories, tarball URLs) and their manifests
//! - Installation, update and removal of extensions
//! - Python-style dependency checking and installation
//! - Executing instances and dispatching document events
//! - Persistence and the lifecycle ledger

pub mod builtin;
pub mod capability;
pub mod default_sources;
pub mod dependency;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod file_store;
pub mod handlers;
pub mod helpers;
pub mod host;
pub mod ledger;
pub mod loader;
pub mod registry;
pub mod source_manager;
pub mod store;
pub mod update_checker;

pub use builtin::BuiltinCatalog;
pub use capability::{
    ComponentContext, ComponentMeta, DataSource, Importer, Plugin, PluginMeta, PostProcessor, PreProcessor,
};
pub use default_sources::{cleanup_orphaned_builtin_sources, ensure_default_sources};
pub use dependency::{DependencyResolver, Requirement};
pub use dispatcher::{derive_events, DocumentSnapshot, EventDispatcher};
pub use events::{EventEnvelope, LifecycleEvent};
pub use executor::{Executor, ExecutorError};
pub use file_store::FileStore;
pub use helpers::{HelperProvider, HelperScope};
pub use ledger::LifecycleLedger;
pub use loader::{DynamicLoader, LoadError};
pub use registry::{ExtensionRegistry, SharedRegistry};
pub use source_manager::{SourceError, SourceManager, UpdateOutcome};
pub use store::{ExtensionStore, InstanceFilter, MemoryStore};
