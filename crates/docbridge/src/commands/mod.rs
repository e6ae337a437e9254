//! CLI command implementations

pub mod deps;
pub mod extension;
pub mod instance;
pub mod ledger;
pub mod logs;
pub mod source;

use chrono::{DateTime, Utc};

/// Render a timestamp for tables
pub(crate) fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render an optional timestamp for tables
pub(crate) fn format_optional_time(timestamp: Option<&DateTime<Utc>>) -> String {
    timestamp.map(format_time).unwrap_or_else(|| "never".to_string())
}
