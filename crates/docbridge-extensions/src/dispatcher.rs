//! Document event dispatcher
//!
//! Turns document writes into lifecycle events and fans each event out to the
//! post-processors through the [`Executor`]. The writer takes a snapshot with
//! [`EventDispatcher::before_write`], persists the document, then hands both to
//! [`EventDispatcher::after_write`]. Dispatch is best-effort: nothing here ever
//! fails the write.

use docbridge_core::types::{Document, DocumentEvent, DocumentState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::capability::PostProcessResult;
use crate::executor::Executor;

/// The fields of a document that drive event derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSnapshot {
    pub state: DocumentState,
    pub is_confirmed: bool,
    pub failed: bool,
}

impl From<&Document> for DocumentSnapshot {
    fn from(document: &Document) -> Self {
        Self {
            state: document.state.clone(),
            is_confirmed: document.is_confirmed,
            failed: document.failed,
        }
    }
}

/// Events implied by a write; `prior` is `None` for a newly created document
pub fn derive_events(prior: Option<&DocumentSnapshot>, current: &Document) -> Vec<DocumentEvent> {
    let Some(prior) = prior else {
        return vec![DocumentEvent::Uploaded];
    };

    let mut events = Vec::new();
    if !prior.is_confirmed && current.is_confirmed {
        events.push(DocumentEvent::Approved);
    }
    if prior.state != DocumentState::Archived && current.state == DocumentState::Archived {
        events.push(DocumentEvent::Archived);
    }
    if !prior.failed && current.failed {
        events.push(DocumentEvent::Rejected);
    }
    events.push(DocumentEvent::Updated);
    events
}

/// What a dispatch did
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchReport {
    pub events: Vec<DocumentEvent>,
    pub results: Vec<(DocumentEvent, Vec<PostProcessResult>)>,
    /// (event, error) pairs for events whose fan-out could not run
    pub errors: Vec<(DocumentEvent, String)>,
}

impl DispatchReport {
    /// Number of post-processor runs that reported failure
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .flat_map(|(_, results)| results)
            .filter(|r| !r.success)
            .count()
    }
}

pub struct EventDispatcher {
    executor: Arc<Executor>,
}

impl EventDispatcher {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Capture the fields needed to derive events once the write lands
    pub fn before_write(&self, document: &Document) -> DocumentSnapshot {
        DocumentSnapshot::from(document)
    }

    /// Fire every event implied by the write
    pub async fn after_write(&self, prior: Option<&DocumentSnapshot>, document: &Document) -> DispatchReport {
        let events = derive_events(prior, document);
        debug!("Document {} produced events: {:?}", document.identifier, events);

        let mut report = DispatchReport {
            events: events.clone(),
            ..Default::default()
        };

        for event in events {
            match self.executor.execute_postprocessors(document, event).await {
                Ok(results) => {
                    if !results.is_empty() {
                        info!(
                            "Dispatched {} for document {} to {} post-processors",
                            event,
                            document.identifier,
                            results.len()
                        );
                    }
                    report.results.push((event, results));
                }
                Err(e) => {
                    error!("Failed to dispatch {} for document {}: {}", event, document.identifier, e);
                    report.errors.push((event, e.to_string()));
                }
            }
        }

        report
    }
}
