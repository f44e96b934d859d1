//! The audit logger and its per-request tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use reagent_core::ProtocolEvent;
use uuid::Uuid;

use crate::record::{AuditEntry, AuditRecord, HttpRequestMeta, RequestOutcome, truncate_strings};
use crate::sink::AuditSink;

/// Default length beyond which string fields are truncated.
pub const DEFAULT_CONTENT_LIMIT: usize = 1000;

struct TrackedRequest {
    request_id: String,
    started: Instant,
}

/// Maps an in-flight `(threadId, runId)` to its request id and start time.
#[derive(Default)]
pub struct RequestTracker {
    active: Mutex<HashMap<(String, String), TrackedRequest>>,
}

impl RequestTracker {
    /// Begin tracking and return the new request id (`req-xxxxxxxx`).
    pub fn start(&self, thread_id: &str, run_id: &str) -> String {
        let simple = Uuid::new_v4().simple().to_string();
        let request_id = format!("req-{}", &simple[..8]);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (thread_id.to_string(), run_id.to_string()),
                TrackedRequest {
                    request_id: request_id.clone(),
                    started: Instant::now(),
                },
            );
        request_id
    }

    pub fn request_id(&self, thread_id: &str, run_id: &str) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(thread_id.to_string(), run_id.to_string()))
            .map(|t| t.request_id.clone())
    }

    /// Stop tracking; returns the request id and elapsed milliseconds.
    pub fn finish(&self, thread_id: &str, run_id: &str) -> Option<(String, u64)> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(thread_id.to_string(), run_id.to_string()))
            .map(|t| (t.request_id, t.started.elapsed().as_millis() as u64))
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Writes audit records for runs to every configured sink.
///
/// Shared as `Arc<AuditLogger>`; a logger with no sinks only tracks requests.
pub struct AuditLogger {
    sinks: Vec<Arc<dyn AuditSink>>,
    content_limit: usize,
    tracker: RequestTracker,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sink_count", &self.sinks.len())
            .field("content_limit", &self.content_limit)
            .field("active_requests", &self.tracker.active_count())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a logger with no sinks.
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            content_limit: DEFAULT_CONTENT_LIMIT,
            tracker: RequestTracker::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_content_limit(mut self, limit: usize) -> Self {
        self.content_limit = limit;
        self
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Record `REQUEST_START` and return the new request id.
    pub fn start_request(&self, thread_id: &str, run_id: &str) -> String {
        let request_id = self.tracker.start(thread_id, run_id);
        self.write(thread_id, run_id, Some(request_id.clone()), AuditEntry::RequestStart);
        request_id
    }

    /// Record an emitted protocol event.
    pub fn log_event(&self, event: &ProtocolEvent) {
        let mut value = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event for audit");
                return;
            }
        };
        truncate_strings(&mut value, self.content_limit);
        let request_id = self.tracker.request_id(&event.thread_id, &event.run_id);
        self.write(
            &event.thread_id,
            &event.run_id,
            request_id,
            AuditEntry::Event {
                event_type: event.event_type().to_string(),
                event: value,
            },
        );
    }

    pub fn log_http_request(&self, thread_id: &str, run_id: &str, meta: HttpRequestMeta) {
        let request_id = self.tracker.request_id(thread_id, run_id);
        self.write(thread_id, run_id, request_id, AuditEntry::HttpRequest(meta));
    }

    pub fn log_validation_error(&self, thread_id: &str, run_id: &str, errors: &[String]) {
        self.write(
            thread_id,
            run_id,
            None,
            AuditEntry::ValidationError {
                errors: errors.to_vec(),
            },
        );
    }

    /// Record `REQUEST_END` with the outcome and duration since `start_request`.
    pub fn end_request(&self, thread_id: &str, run_id: &str, outcome: RequestOutcome, error: Option<&str>) {
        let (request_id, duration_ms) = match self.tracker.finish(thread_id, run_id) {
            Some((id, ms)) => (Some(id), ms),
            None => (None, 0),
        };
        self.write(
            thread_id,
            run_id,
            request_id,
            AuditEntry::RequestEnd {
                outcome,
                duration_ms,
                error: error.map(str::to_string),
            },
        );
    }

    fn write(&self, thread_id: &str, run_id: &str, request_id: Option<String>, entry: AuditEntry) {
        if self.sinks.is_empty() {
            return;
        }
        let record = AuditRecord {
            timestamp: Utc::now(),
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
            request_id,
            entry,
        };
        for sink in &self.sinks {
            sink.record(&record);
        }
    }
}
