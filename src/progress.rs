//! Progress events shared by sync, archive and subtitle extraction.
//!
//! Each long-running operation reports a sequence of events ending with
//! exactly one `done` or `error`. The HTTP layer serializes every event as
//! one SSE `data:` line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Start,
    Progress,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    /// Operation-specific payload, flattened into the event object.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressEvent {
    fn new(status: ProgressStatus, message: Option<String>, percent: Option<u8>) -> Self {
        Self {
            status,
            message,
            percent,
            extra: Map::new(),
        }
    }

    pub fn start(message: impl Into<String>) -> Self {
        Self::new(ProgressStatus::Start, Some(message.into()), None)
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::new(ProgressStatus::Progress, Some(message.into()), None)
    }

    pub fn percent(percent: u8) -> Self {
        Self::new(ProgressStatus::Progress, None, Some(percent))
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(ProgressStatus::Done, Some(message.into()), None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProgressStatus::Error, Some(message.into()), None)
    }

    /// Attach a payload field.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }

    /// `done` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProgressStatus::Done | ProgressStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shape() {
        let event = ProgressEvent::done("Archive ready")
            .with_percent(100)
            .with("download_url", "/api/download/temp/x.zip")
            .with("size", 42u64);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["percent"], 100);
        assert_eq!(json["download_url"], "/api/download/temp/x.zip");
        assert_eq!(json["size"], 42);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = serde_json::to_string(&ProgressEvent::percent(12)).unwrap();
        assert_eq!(json, r#"{"status":"progress","percent":12}"#);
    }

    #[test]
    fn test_terminal() {
        assert!(ProgressEvent::done("x").is_terminal());
        assert!(ProgressEvent::error("x").is_terminal());
        assert!(!ProgressEvent::start("x").is_terminal());
        assert!(!ProgressEvent::percent(1).is_terminal());
    }
}
