use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extension lifecycle events recorded by the source manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Source manifest fetched
    SourceFetched {
        source: String,
        manifest_kind: String,
        entries: usize,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        version: Option<String>,
    },

    /// Source manifest fetch failed
    SourceFetchFailed { source: String, error_message: String },

    /// Install started
    InstallStarted {
        source: String,
        version: String,
        url: String,
    },

    /// Install completed
    InstallCompleted {
        version: String,
        duration_secs: u64,
        components: Vec<String>,
    },

    /// Install failed; the cache directory has been rolled back
    InstallFailed {
        version: String,
        error_message: String,
        duration_secs: u64,
    },

    /// Update started
    UpdateStarted { from_version: String, to_version: String },

    /// Update completed
    UpdateCompleted {
        from_version: String,
        to_version: String,
        duration_secs: u64,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        incompatible_instances: Vec<String>,
    },

    /// Update failed; the previous version stays in place
    UpdateFailed {
        from_version: String,
        to_version: String,
        error_message: String,
        duration_secs: u64,
    },

    /// Extension removed
    Uninstalled { version: String },
}

impl LifecycleEvent {
    /// Snake-case type name used for filtering and display
    pub fn type_name(&self) -> &'static str {
        match self {
            LifecycleEvent::SourceFetched { .. } => "source_fetched",
            LifecycleEvent::SourceFetchFailed { .. } => "source_fetch_failed",
            LifecycleEvent::InstallStarted { .. } => "install_started",
            LifecycleEvent::InstallCompleted { .. } => "install_completed",
            LifecycleEvent::InstallFailed { .. } => "install_failed",
            LifecycleEvent::UpdateStarted { .. } => "update_started",
            LifecycleEvent::UpdateCompleted { .. } => "update_completed",
            LifecycleEvent::UpdateFailed { .. } => "update_failed",
            LifecycleEvent::Uninstalled { .. } => "uninstalled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::SourceFetchFailed { .. }
                | LifecycleEvent::InstallFailed { .. }
                | LifecycleEvent::UpdateFailed { .. }
        )
    }
}

/// Event metadata envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID (UUID v4)
    pub event_id: String,

    pub timestamp: DateTime<Utc>,

    /// Extension or source slug (for indexing)
    pub extension: String,

    /// Runtime version that recorded the event
    pub runtime_version: String,

    pub event: LifecycleEvent,
}

impl EventEnvelope {
    pub fn new(extension: impl Into<String>, event: LifecycleEvent) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            extension: extension.into(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_started_serialization() {
        let event = LifecycleEvent::InstallStarted {
            source: "acme".to_string(),
            version: "1.0.0".to_string(),
            url: "https://github.com/acme/plugins".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"install_started"#));
        assert!(json.contains(r#""source":"acme"#));

        let deserialized: LifecycleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_update_completed_omits_empty_incompatible_list() {
        let event = LifecycleEvent::UpdateCompleted {
            from_version: "1.0.0".to_string(),
            to_version: "1.1.0".to_string(),
            duration_secs: 2,
            incompatible_instances: Vec::new(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("incompatible_instances"));
        assert_eq!(event.type_name(), "update_completed");
    }

    #[test]
    fn test_envelope_has_unique_ids() {
        let a = EventEnvelope::new("acme.word-count", LifecycleEvent::Uninstalled { version: "1.0.0".into() });
        let b = EventEnvelope::new("acme.word-count", LifecycleEvent::Uninstalled { version: "1.0.0".into() });
        assert_ne!(a.event_id, b.event_id);
        assert!(!a.event.is_failure());
    }
}
