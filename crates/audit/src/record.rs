//! Audit record types: one JSON object per line in a thread's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub thread_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AuditEntry {
    RequestStart,
    /// A protocol event as emitted, with long strings truncated
    Event {
        event_type: String,
        event: serde_json::Value,
    },
    HttpRequest(HttpRequestMeta),
    ValidationError {
        errors: Vec<String>,
    },
    RequestEnd {
        outcome: RequestOutcome,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AuditEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestStart => "REQUEST_START",
            Self::Event { .. } => "EVENT",
            Self::HttpRequest(_) => "HTTP_REQUEST",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::RequestEnd { .. } => "REQUEST_END",
        }
    }
}

/// Metadata of the HTTP request that started a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestMeta {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub message_count: usize,
    pub tool_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    Error,
    Cancelled,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Truncate every string in `value` longer than `limit` characters.
pub fn truncate_strings(value: &mut serde_json::Value, limit: usize) {
    match value {
        serde_json::Value::String(s) => {
            let total = s.chars().count();
            if total > limit {
                let kept: String = s.chars().take(limit).collect();
                *s = format!("{kept}... [truncated {} chars]", total - limit);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                truncate_strings(item, limit);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                truncate_strings(item, limit);
            }
        }
        _ => {}
    }
}
