//! AG-UI protocol events: what a run streams back to its caller.
//!
//! Every event carries the `(threadId, runId)` correlation pair and a
//! millisecond timestamp. A run's stream ends with exactly one terminal
//! event: `RUN_FINISHED`, or a `RUN_ERROR` whose code is not `TOOL_ERROR`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// `RUN_ERROR` codes.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    pub const TOOL_ERROR: &str = "TOOL_ERROR";
    pub const STREAM_ERROR: &str = "STREAM_ERROR";
    pub const CANCELLED: &str = "CANCELLED";
    pub const RUN_ALREADY_ACTIVE: &str = "RUN_ALREADY_ACTIVE";
}

/// A protocol event with its correlation envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    pub thread_id: String,
    pub run_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: ProtocolEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ProtocolEventKind {
    RunStarted,
    TextMessageStart {
        message_id: String,
        role: String,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        message_id: String,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: String,
    },
    ToolCallResult {
        message_id: String,
        tool_call_id: String,
        content: String,
        role: String,
    },
    StateDelta {
        delta: serde_json::Value,
    },
    RunFinished,
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ProtocolEvent {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>, kind: ProtocolEventKind) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            kind,
        }
    }

    pub fn run_error(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        message: impl Into<String>,
        code: &str,
    ) -> Self {
        Self::new(
            thread_id,
            run_id,
            ProtocolEventKind::RunError {
                message: message.into(),
                code: Some(code.to_string()),
            },
        )
    }

    /// The wire name of this event's type.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Whether this event ends the run's stream.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            ProtocolEventKind::RunFinished => true,
            ProtocolEventKind::RunError { code, .. } => code.as_deref() != Some(codes::TOOL_ERROR),
            _ => false,
        }
    }
}

impl ProtocolEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::RunFinished => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
        }
    }
}
