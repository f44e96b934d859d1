//! Streaming protocol adapter: [`AgentEvent`]s in, AG-UI [`ProtocolEvent`]s out.
//!
//! One adapter per run. It owns the text-message lifecycle
//! (`Idle → MessageActive → {Interrupted → MessageActive}* → Ended`):
//! tool calls interrupt the active message and a fresh message starts once
//! every announced tool has reported back. Every emitted event is also
//! written to the audit log.

use std::sync::Arc;

use reagent_audit::{AuditLogger, RequestOutcome};
use reagent_core::event::AgentEvent;
use reagent_core::protocol::{ProtocolEvent, ProtocolEventKind, codes};
use reagent_core::tool::display_name;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state_delta::{detect_ppl_query, query_text};

/// Advisory tool counters. They never decide when the run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolMetrics {
    pub pending: usize,
    pub completed: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Finished,
    Failed { code: String, message: String },
    Cancelled,
}

impl RunEnd {
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn outcome(&self) -> RequestOutcome {
        match self {
            Self::Finished => RequestOutcome::Success,
            Self::Failed { .. } => RequestOutcome::Error,
            Self::Cancelled => RequestOutcome::Cancelled,
        }
    }
}

/// Per-run translator from agent events to protocol events.
pub struct StreamingProtocolAdapter {
    thread_id: String,
    run_id: String,
    request_id: String,
    audit: Arc<AuditLogger>,
    out: mpsc::Sender<ProtocolEvent>,

    /// Id of the current (or most recently interrupted) text message
    message_id: Option<String>,
    message_active: bool,

    accumulated_text: String,
    pending_deltas: Vec<Value>,
    tools: ToolMetrics,
}

impl StreamingProtocolAdapter {
    /// Register the request with the audit log and emit `RUN_STARTED`
    /// followed by the first `TEXT_MESSAGE_START`.
    pub async fn start(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        audit: Arc<AuditLogger>,
        out: mpsc::Sender<ProtocolEvent>,
    ) -> Self {
        let thread_id = thread_id.into();
        let run_id = run_id.into();
        let request_id = audit.start_request(&thread_id, &run_id);

        let mut adapter = Self {
            thread_id,
            run_id,
            request_id,
            audit,
            out,
            message_id: None,
            message_active: false,
            accumulated_text: String::new(),
            pending_deltas: Vec::new(),
            tools: ToolMetrics::default(),
        };
        adapter.emit(ProtocolEventKind::RunStarted).await;
        adapter.start_message().await;
        adapter
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn tool_metrics(&self) -> ToolMetrics {
        self.tools
    }

    /// Translate one agent event.
    pub async fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextStart { text } => {
                self.accumulated_text = text.clone();
                self.scan_for_state_delta();
                self.content(text).await;
            }
            AgentEvent::TextDelta { delta } => {
                self.accumulated_text.push_str(&delta);
                self.scan_for_state_delta();
                self.content(delta).await;
            }
            AgentEvent::ToolInputStart { id, name } => {
                debug!(id = %id, tool = %name, "Model started a tool call");
            }
            AgentEvent::ToolInputDelta { .. } => {}
            AgentEvent::ToolUseStart { name, id, input } => {
                self.tools.pending += 1;
                let parent_message_id = self.message_id.clone();
                self.end_message().await;

                self.emit(ProtocolEventKind::ToolCallStart {
                    tool_call_id: id.clone(),
                    tool_call_name: display_name(&name).to_string(),
                    parent_message_id,
                })
                .await;
                self.emit(ProtocolEventKind::ToolCallArgs {
                    tool_call_id: id.clone(),
                    delta: input.to_string(),
                })
                .await;
                self.emit(ProtocolEventKind::ToolCallEnd { tool_call_id: id }).await;
            }
            AgentEvent::ToolResult { id, content, .. } => {
                self.tools.completed += 1;
                self.tools.pending = self.tools.pending.saturating_sub(1);
                self.end_message().await;
                self.tool_call_result(id, content).await;
                if self.tools.pending == 0 {
                    self.start_message().await;
                }
            }
            AgentEvent::ToolError { name, id, error } => {
                let tool = display_name(&name).to_string();
                self.emit(ProtocolEventKind::RunError {
                    message: format!("Tool {tool} failed: {error}"),
                    code: Some(codes::TOOL_ERROR.to_string()),
                })
                .await;

                self.tools.completed += 1;
                self.tools.pending = self.tools.pending.saturating_sub(1);
                self.end_message().await;
                self.tool_call_result(id, serde_json::json!({ "error": error }).to_string())
                    .await;
                if self.tools.pending == 0 {
                    self.start_message().await;
                    self.content(format!("\n\nTool {tool} error: {error}")).await;
                }
            }
            AgentEvent::TurnComplete => self.flush_state_deltas().await,
            AgentEvent::Error { message } => {
                self.content(format!("\n\nError: {message}")).await;
            }
        }
    }

    /// Close the active message and emit the single terminal event.
    pub async fn finish(mut self, end: RunEnd) -> ToolMetrics {
        self.end_message().await;

        let error = match &end {
            RunEnd::Finished => {
                self.emit(ProtocolEventKind::RunFinished).await;
                None
            }
            RunEnd::Failed { code, message } => {
                self.emit(ProtocolEventKind::RunError {
                    message: message.clone(),
                    code: Some(code.clone()),
                })
                .await;
                Some(message.clone())
            }
            RunEnd::Cancelled => {
                let message = "Run cancelled".to_string();
                self.emit(ProtocolEventKind::RunError {
                    message: message.clone(),
                    code: Some(codes::CANCELLED.to_string()),
                })
                .await;
                Some(message)
            }
        };

        let outcome = end.outcome();
        self.audit
            .end_request(&self.thread_id, &self.run_id, outcome, error.as_deref());
        info!(
            request_id = %self.request_id,
            outcome = outcome.as_str(),
            tools_completed = self.tools.completed,
            tools_pending = self.tools.pending,
            "Run ended"
        );
        self.tools
    }

    async fn content(&mut self, delta: String) {
        if delta.is_empty() {
            return;
        }
        if !self.message_active {
            self.start_message().await;
        }
        let message_id = self.message_id.clone().unwrap_or_default();
        self.emit(ProtocolEventKind::TextMessageContent { message_id, delta })
            .await;
    }

    async fn start_message(&mut self) {
        let message_id = Uuid::new_v4().to_string();
        self.message_id = Some(message_id.clone());
        self.message_active = true;
        self.emit(ProtocolEventKind::TextMessageStart {
            message_id,
            role: "assistant".into(),
        })
        .await;
    }

    async fn end_message(&mut self) {
        if !self.message_active {
            return;
        }
        self.message_active = false;
        let message_id = self.message_id.clone().unwrap_or_default();
        self.emit(ProtocolEventKind::TextMessageEnd { message_id }).await;
    }

    async fn tool_call_result(&mut self, tool_call_id: String, content: String) {
        self.emit(ProtocolEventKind::ToolCallResult {
            message_id: Uuid::new_v4().to_string(),
            tool_call_id,
            content,
            role: "tool".into(),
        })
        .await;
    }

    fn scan_for_state_delta(&mut self) {
        let Some(query) = detect_ppl_query(&self.accumulated_text) else {
            return;
        };
        let seen = self
            .pending_deltas
            .iter()
            .any(|d| d.get("ppl_query").and_then(query_text) == query_text(&query));
        if !seen {
            self.pending_deltas.push(serde_json::json!({ "ppl_query": query }));
            debug!(pending = self.pending_deltas.len(), "Buffered PPL state delta");
        }
    }

    /// Merge buffered deltas (later keys win) into one `STATE_DELTA`.
    async fn flush_state_deltas(&mut self) {
        if self.pending_deltas.is_empty() {
            return;
        }
        let mut merged = serde_json::Map::new();
        for delta in std::mem::take(&mut self.pending_deltas) {
            if let Value::Object(fields) = delta {
                merged.extend(fields);
            }
        }
        self.emit(ProtocolEventKind::StateDelta {
            delta: Value::Object(merged),
        })
        .await;
    }

    async fn emit(&mut self, kind: ProtocolEventKind) {
        let event = ProtocolEvent::new(&self.thread_id, &self.run_id, kind);
        self.audit.log_event(&event);
        if self.out.send(event).await.is_err() {
            debug!(request_id = %self.request_id, "Protocol event consumer gone, event dropped");
        }
    }
}
