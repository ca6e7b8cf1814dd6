use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Response,
    HttpError,
    FetchError,
    ToolFailed,
    ApiError,
    ProtocolError,
    LoopLimit,
}

impl DiagnosticKind {
    pub fn is_failure(self) -> bool {
        !matches!(self, DiagnosticKind::Response)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEntry {
    pub kind: DiagnosticKind,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl DiagnosticEntry {
    pub fn new(kind: DiagnosticKind, context: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            context,
            url: None,
            status: None,
            status_text: None,
            duration_ms: None,
            response_text: None,
            error: None,
            hint: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_status(mut self, status: u16, status_text: impl Into<String>) -> Self {
        self.status = Some(status);
        self.status_text = Some(status_text.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_response_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// Bounded; clones share one buffer.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: Arc<Mutex<VecDeque<DiagnosticEntry>>>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DiagnosticEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, entry: DiagnosticEntry) {
        if entry.kind.is_failure() {
            warn!(
                kind = ?entry.kind,
                url = entry.url.as_deref().unwrap_or(""),
                status = entry.status,
                hint = entry.hint.as_deref().unwrap_or(""),
                error = entry.error.as_deref().unwrap_or(""),
                "diagnostic recorded"
            );
        } else {
            debug!(
                url = entry.url.as_deref().unwrap_or(""),
                status = entry.status,
                duration_ms = entry.duration_ms,
                "request succeeded"
            );
        }

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn newest_first(&self) -> Vec<DiagnosticEntry> {
        self.lock().iter().rev().cloned().collect()
    }

    pub fn failures(&self) -> Vec<DiagnosticEntry> {
        self.lock()
            .iter()
            .filter(|e| e.kind.is_failure())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_oldest_when_full() {
        let log = DiagnosticLog::new(2);
        for i in 0..3 {
            log.record(DiagnosticEntry::new(DiagnosticKind::ToolFailed, json!({ "n": i })));
        }
        let entries = log.newest_first();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].context["n"], 2);
        assert_eq!(entries[1].context["n"], 1);
    }

    #[test]
    fn clones_share_one_buffer() {
        let log = DiagnosticLog::default();
        let other = log.clone();
        other.record(DiagnosticEntry::new(DiagnosticKind::Response, json!({})));
        assert_eq!(log.len(), 1);
        assert!(log.failures().is_empty());
        log.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn serializes_kind_in_snake_case() {
        let entry = DiagnosticEntry::new(DiagnosticKind::HttpError, json!({ "tool": "web_search" }))
            .with_status(404, "Not Found")
            .with_hint("Endpoint path mismatch");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kind"], "http_error");
        assert_eq!(value["status"], 404);
        assert!(value.get("url").is_none());
    }
}
