//! Model backend trait: the abstraction over LLM inference services.
//!
//! A backend accepts a [`ConverseRequest`] and yields an incremental stream of
//! [`ConverseChunk`]s that distinguish text blocks from tool-use blocks. Retry,
//! classification into agent events, and tool-input assembly live above this
//! boundary, in the model client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ModelError;
use crate::message::ConversationMessage;

/// A tool schema as sent to the model. `name` is the qualified name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

/// One call to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub model_id: String,
    pub messages: Vec<ConversationMessage>,
    pub system_prompt: String,

    /// `None` withholds tools entirely, forcing a textual answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,

    pub inference: InferenceConfig,
}

/// What a content block carries.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// An increment to an open block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockDelta {
    Text(String),
    /// A fragment of the tool input JSON document
    ToolInput(String),
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single item of the backend's incremental stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ConverseChunk {
    BlockStart { index: usize, kind: BlockKind },
    BlockDelta { index: usize, delta: BlockDelta },
    BlockStop { index: usize },
    MessageStop { stop_reason: StopReason },
    Usage(Usage),
}

/// Stream of chunks produced by one backend call.
pub type ConverseStream = mpsc::Receiver<Result<ConverseChunk, ModelError>>;

/// The core model backend trait.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Start a call. Errors returned here happen before any chunk was produced.
    async fn converse(&self, request: ConverseRequest) -> Result<ConverseStream, ModelError>;
}
