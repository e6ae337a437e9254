use crate::events::EventEnvelope;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Filter criteria for querying the ledger
#[derive(Debug, Default)]
pub struct EventFilter {
    /// Extension or source slug
    pub extension: Option<String>,
    /// Event type names (e.g. "install_started", "update_failed")
    pub event_types: Option<Vec<String>>,
    /// Only events at or after this timestamp
    pub since: Option<DateTime<Utc>>,
    /// Return at most this many of the most recent events
    pub limit: Option<usize>,
}

/// Append-only JSONL record of extension lifecycle events
#[derive(Debug, Clone)]
pub struct LifecycleLedger {
    ledger_path: PathBuf,
}

impl LifecycleLedger {
    pub fn new(ledger_path: PathBuf) -> Self {
        Self { ledger_path }
    }

    pub fn path(&self) -> &Path {
        &self.ledger_path
    }

    /// Append event to ledger (file-locked)
    pub fn append(&self, event: EventEnvelope) -> Result<()> {
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent).context("Failed to create ledger parent directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .context("Failed to open ledger file")?;

        // Released when `file` is dropped
        file.lock_exclusive()
            .context("Failed to acquire exclusive lock on ledger")?;

        let json_line = serde_json::to_string(&event).context("Failed to serialize event")?;
        writeln!(file, "{}", json_line).context("Failed to write event to ledger")?;
        file.sync_all().context("Failed to sync ledger file")?;

        Ok(())
    }

    /// Query events in chronological order
    pub fn query_events(&self, filter: EventFilter) -> Result<Vec<EventEnvelope>> {
        if !self.ledger_path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.ledger_path).context("Failed to open ledger file")?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line.context("Failed to read line from ledger")?;
            if line.trim().is_empty() {
                continue;
            }

            let envelope: EventEnvelope =
                serde_json::from_str(&line).context("Failed to deserialize event from ledger")?;

            if let Some(ref extension) = filter.extension {
                if envelope.extension != *extension {
                    continue;
                }
            }

            if let Some(ref types) = filter.event_types {
                if !types.iter().any(|t| t == envelope.event.type_name()) {
                    continue;
                }
            }

            if let Some(since) = filter.since {
                if envelope.timestamp < since {
                    continue;
                }
            }

            events.push(envelope);
        }

        // Keep the last N in chronological order
        if let Some(limit) = filter.limit {
            if events.len() > limit {
                events = events.split_off(events.len() - limit);
            }
        }

        Ok(events)
    }

    /// Full history of one extension
    pub fn history(&self, extension: &str) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventFilter {
            extension: Some(extension.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LifecycleEvent;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_ledger() -> (LifecycleLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = LifecycleLedger::new(temp_dir.path().join("lifecycle.jsonl"));
        (ledger, temp_dir)
    }

    fn installed(ledger: &LifecycleLedger, extension: &str, version: &str) {
        ledger
            .append(EventEnvelope::new(
                extension,
                LifecycleEvent::InstallCompleted {
                    version: version.to_string(),
                    duration_secs: 1,
                    components: vec![],
                },
            ))
            .unwrap();
    }

    #[test]
    fn test_append_and_history() {
        let (ledger, _temp) = create_test_ledger();
        installed(&ledger, "acme.word-count", "1.0.0");
        installed(&ledger, "acme.ocr", "0.3.0");

        let history = ledger.history("acme.word-count").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.type_name(), "install_completed");
    }

    #[test]
    fn test_empty_ledger() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.query_events(EventFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_query_filters() {
        let (ledger, _temp) = create_test_ledger();
        installed(&ledger, "acme.word-count", "1.0.0");
        ledger
            .append(EventEnvelope::new(
                "acme.word-count",
                LifecycleEvent::Uninstalled {
                    version: "1.0.0".into(),
                },
            ))
            .unwrap();

        let uninstalls = ledger
            .query_events(EventFilter {
                event_types: Some(vec!["uninstalled".into()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(uninstalls.len(), 1);

        let future = ledger
            .query_events(EventFilter {
                since: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn test_limit_keeps_most_recent() {
        let (ledger, _temp) = create_test_ledger();
        for v in ["1.0.0", "1.1.0", "1.2.0"] {
            installed(&ledger, "acme.word-count", v);
        }

        let events = ledger
            .query_events(EventFilter {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1].event,
            LifecycleEvent::InstallCompleted { version, .. } if version == "1.2.0"
        ));
    }

    #[test]
    fn test_concurrent_appends() {
        let (ledger, _temp) = create_test_ledger();
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || installed(&ledger, &format!("ext-{}", i), "1.0.0"))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.query_events(EventFilter::default()).unwrap().len(), 10);
    }
}
