//! Type definitions for the docbridge extension runtime

mod document;
mod execution;
mod extension;
mod manifest;
mod runtime_config;
mod source;

pub use document::*;
pub use execution::*;
pub use extension::*;
pub use manifest::*;
pub use runtime_config::*;
pub use source::*;
