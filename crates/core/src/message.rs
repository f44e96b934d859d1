//! Conversation message domain types.
//!
//! A conversation is an ordered list of [`ConversationMessage`]s whose content
//! is a closed union of [`ContentBlock`]s. Every tool-call request emitted by an
//! assistant message is answered by exactly one tool-call result, matched by
//! call id, before the model is asked again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolCall;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Results of executed (or client-delegated) tool calls
    ToolResult,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCallRequest {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolCallResult {
        call_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolCallResult {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn tool_error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolCallResult {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

impl From<ToolCall> for ContentBlock {
    fn from(call: ToolCall) -> Self {
        Self::ToolCallRequest {
            id: call.id,
            name: call.name,
            input: call.input,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// A user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// An assistant message made of optional text followed by tool-call requests.
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(tool_calls.len() + 1);
        if !text.trim().is_empty() {
            content.push(ContentBlock::text(text));
        }
        content.extend(tool_calls.into_iter().map(ContentBlock::from));
        Self::new(Role::Assistant, content)
    }

    /// A message carrying tool-call results.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self::new(Role::ToolResult, results)
    }

    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls requested in this message, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCallRequest { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Ids answered by tool-call result blocks in this message.
    pub fn result_call_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolCallResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }
}

/// Every call id that already has a result anywhere in `history`.
pub fn answered_call_ids(history: &[ConversationMessage]) -> HashSet<&str> {
    history.iter().flat_map(|m| m.result_call_ids()).collect()
}
