//! Common test utilities for docbridge-extensions
//!
//! This module provides shared test infrastructure including:
//! - Recording mock helpers and package environments
//! - In-process test plugins with scripted outcomes
//! - Hosted (shell script) plugins, tarballs and mock GitHub servers

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;
pub mod plugins;

pub use fixtures::*;
pub use mocks::*;
pub use plugins::*;
