//! Document contract consumed by processors and the event dispatcher

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a document in the external processing service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    #[default]
    Review,
    Complete,
    Archived,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentState::Review => write!(f, "review"),
            DocumentState::Complete => write!(f, "complete"),
            DocumentState::Archived => write!(f, "archived"),
        }
    }
}

/// The primary content entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub identifier: String,

    #[serde(default)]
    pub file_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,

    /// Collection the document belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default)]
    pub state: DocumentState,

    #[serde(default)]
    pub is_confirmed: bool,

    #[serde(default)]
    pub failed: bool,

    /// Extracted data, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Document {
    pub fn new(identifier: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            file_name: file_name.into(),
            custom_identifier: None,
            collection: None,
            state: DocumentState::Review,
            is_confirmed: false,
            failed: false,
            data: None,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_custom_identifier(mut self, custom_identifier: impl Into<String>) -> Self {
        self.custom_identifier = Some(custom_identifier.into());
        self
    }

    pub fn with_state(mut self, state: DocumentState) -> Self {
        self.state = state;
        self
    }
}

/// Events derived from document writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentEvent {
    #[serde(rename = "document_uploaded", alias = "uploaded")]
    Uploaded,
    #[serde(rename = "document_approved", alias = "approved")]
    Approved,
    #[serde(rename = "document_archived", alias = "archived")]
    Archived,
    #[serde(rename = "document_rejected", alias = "rejected")]
    Rejected,
    #[serde(rename = "document_updated", alias = "updated")]
    Updated,
}

impl DocumentEvent {
    pub const ALL: [DocumentEvent; 5] = [
        DocumentEvent::Uploaded,
        DocumentEvent::Approved,
        DocumentEvent::Archived,
        DocumentEvent::Rejected,
        DocumentEvent::Updated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentEvent::Uploaded => "document_uploaded",
            DocumentEvent::Approved => "document_approved",
            DocumentEvent::Archived => "document_archived",
            DocumentEvent::Rejected => "document_rejected",
            DocumentEvent::Updated => "document_updated",
        }
    }
}

impl fmt::Display for DocumentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let short = s.strip_prefix("document_").unwrap_or(s);
        match short {
            "uploaded" => Ok(DocumentEvent::Uploaded),
            "approved" => Ok(DocumentEvent::Approved),
            "archived" => Ok(DocumentEvent::Archived),
            "rejected" => Ok(DocumentEvent::Rejected),
            "updated" => Ok(DocumentEvent::Updated),
            _ => Err(format!("Unknown document event: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing_accepts_short_and_long_names() {
        assert_eq!("approved".parse::<DocumentEvent>().unwrap(), DocumentEvent::Approved);
        assert_eq!(
            "document_archived".parse::<DocumentEvent>().unwrap(),
            DocumentEvent::Archived
        );
        assert!("deleted".parse::<DocumentEvent>().is_err());
    }

    #[test]
    fn test_event_serde_uses_long_names() {
        let json = serde_json::to_string(&DocumentEvent::Rejected).unwrap();
        assert_eq!(json, "\"document_rejected\"");

        let parsed: Vec<DocumentEvent> = serde_json::from_str(r#"["uploaded", "document_updated"]"#).unwrap();
        assert_eq!(parsed, vec![DocumentEvent::Uploaded, DocumentEvent::Updated]);
    }

    #[test]
    fn test_document_defaults_from_json() {
        let doc: Document = serde_json::from_str(r#"{"identifier": "abc123"}"#).unwrap();
        assert_eq!(doc.state, DocumentState::Review);
        assert!(!doc.is_confirmed);
        assert!(doc.collection.is_none());
    }
}
