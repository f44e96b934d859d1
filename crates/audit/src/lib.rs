//! Audit logging for Reagent runs.
//!
//! Every run leaves a line-delimited trail in its thread's log:
//! `REQUEST_START`, one `EVENT` per emitted protocol event, `HTTP_REQUEST`
//! metadata when the run came in over HTTP, and a closing `REQUEST_END` with
//! outcome and duration. Rejected requests leave a `VALIDATION_ERROR`.

pub mod logger;
pub mod record;
pub mod sink;

pub use logger::{AuditLogger, DEFAULT_CONTENT_LIMIT, RequestTracker};
pub use record::{AuditEntry, AuditRecord, HttpRequestMeta, RequestOutcome};
pub use sink::{AuditSink, JsonlFileSink, MemorySink};
