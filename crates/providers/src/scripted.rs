//! A backend that replays scripted turns, for tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reagent_core::error::ModelError;
use reagent_core::model::*;
use reagent_core::tool::ToolCall;

/// What one `converse` call yields.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these chunks, then end normally
    Chunks(Vec<ConverseChunk>),
    /// Stream these chunks, then fail mid-stream
    ChunksThenFail(Vec<ConverseChunk>, ModelError),
    /// Fail before any chunk
    Fail(ModelError),
}

impl ScriptedTurn {
    /// A single text block ending the turn.
    pub fn text(text: &str) -> Self {
        Self::text_chunks(&[text])
    }

    /// A text block delivered as several deltas.
    pub fn text_chunks(parts: &[&str]) -> Self {
        let mut chunks = vec![ConverseChunk::BlockStart {
            index: 0,
            kind: BlockKind::Text,
        }];
        chunks.extend(parts.iter().map(|part| ConverseChunk::BlockDelta {
            index: 0,
            delta: BlockDelta::Text(part.to_string()),
        }));
        chunks.push(ConverseChunk::BlockStop { index: 0 });
        chunks.extend(finish(StopReason::EndTurn));
        Self::Chunks(chunks)
    }

    /// Optional text followed by structured tool calls.
    pub fn tool_use(text: &str, calls: Vec<ToolCall>) -> Self {
        let mut chunks = Vec::new();
        let mut index = 0;
        if !text.is_empty() {
            chunks.push(ConverseChunk::BlockStart {
                index,
                kind: BlockKind::Text,
            });
            chunks.push(ConverseChunk::BlockDelta {
                index,
                delta: BlockDelta::Text(text.to_string()),
            });
            chunks.push(ConverseChunk::BlockStop { index });
            index += 1;
        }
        for call in calls {
            chunks.push(ConverseChunk::BlockStart {
                index,
                kind: BlockKind::ToolUse {
                    id: call.id,
                    name: call.name,
                },
            });
            chunks.push(ConverseChunk::BlockDelta {
                index,
                delta: BlockDelta::ToolInput(call.input.to_string()),
            });
            chunks.push(ConverseChunk::BlockStop { index });
            index += 1;
        }
        chunks.extend(finish(StopReason::ToolUse));
        Self::Chunks(chunks)
    }

    /// Make this turn fail after streaming its chunks.
    pub fn then_fail(self, error: ModelError) -> Self {
        match self {
            Self::Chunks(chunks) | Self::ChunksThenFail(chunks, _) => Self::ChunksThenFail(chunks, error),
            Self::Fail(_) => Self::Fail(error),
        }
    }
}

fn finish(stop_reason: StopReason) -> [ConverseChunk; 2] {
    [
        ConverseChunk::Usage(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        ConverseChunk::MessageStop { stop_reason },
    ]
}

/// Replays [`ScriptedTurn`]s in order and records every request it saw.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ConverseRequest>>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ConverseRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn converse(&self, request: ConverseRequest) -> Result<ConverseStream, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let turn = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ModelError::NotConfigured("scripted backend has no turns left".into()))?;

        let (chunks, failure) = match turn {
            ScriptedTurn::Fail(error) => return Err(error),
            ScriptedTurn::Chunks(chunks) => (chunks, None),
            ScriptedTurn::ChunksThenFail(chunks, error) => (chunks, Some(error)),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            let _ = tx.try_send(Ok(chunk));
        }
        if let Some(error) = failure {
            let _ = tx.try_send(Err(error));
        }
        Ok(rx)
    }
}
