//! Agent events: the typed messages a run's producers put on its channel.
//!
//! The model client and the reasoning loop emit [`AgentEvent`]s through an
//! [`EventSink`]; the protocol adapter consumes them in order and turns them
//! into externally visible protocol events.

use serde::Serialize;
use tokio::sync::mpsc;

/// Everything observable while a run makes progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First text of a new text block
    TextStart { text: String },

    /// Subsequent text of the current text block
    TextDelta { delta: String },

    /// The model started constructing a tool call
    ToolInputStart { id: String, name: String },

    /// A fragment of tool input JSON
    ToolInputDelta { id: String, delta: String },

    /// A tool call is about to be executed (or delegated to the client)
    ToolUseStart {
        name: String,
        id: String,
        input: serde_json::Value,
    },

    /// A server tool finished
    ToolResult {
        name: String,
        id: String,
        content: String,
    },

    /// A server tool failed
    ToolError {
        name: String,
        id: String,
        error: String,
    },

    /// The turn produced its final answer
    TurnComplete,

    /// A user-facing error message
    Error { message: String },
}

/// Sending half of a run's event channel.
///
/// Cloneable; every producer of a run holds one. A closed sink means the
/// consumer went away, so producers can treat it as cancellation.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere.
    pub fn discard() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Deliver an event. Returns `false` if the consumer is gone.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
