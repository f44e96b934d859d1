//! Model client: one logical model call with throttling retries.
//!
//! Wraps a [`ModelBackend`], forwards its stream to the run's [`EventSink`]
//! as [`AgentEvent`]s, and assembles the final text and tool calls. A
//! throttled attempt is retried with exponential backoff plus jitter, but
//! only while nothing from that attempt has reached the sink yet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reagent_config::RetryConfig;
use reagent_core::error::ModelError;
use reagent_core::event::{AgentEvent, EventSink};
use reagent_core::message::{ContentBlock, ConversationMessage, Role};
use reagent_core::model::*;
use reagent_core::tool::ToolCall;
use reagent_telemetry::{MetricsRegistry, names};
use tracing::{debug, warn};

/// Input of a single model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_id: String,
    pub messages: Vec<ConversationMessage>,
    pub system_prompt: String,
    /// `None` forces a textual answer
    pub tools: Option<Vec<ToolSchema>>,
    pub inference: InferenceConfig,
}

/// Assembled result of a model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// All text blocks, concatenated in block order
    pub text: String,
    /// Structured tool calls, in block order
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// An attempt failure plus whether any of its output already reached the sink.
struct AttemptError {
    error: ModelError,
    emitted: bool,
}

/// Accumulator for one content block of the stream.
enum BlockState {
    Text {
        text: String,
    },
    Tool {
        id: String,
        name: String,
        raw: String,
        parsed: Option<serde_json::Value>,
    },
}

/// The model client.
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    retry: RetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>, retry: RetryConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            backend,
            retry,
            metrics,
        }
    }

    /// Perform one logical model call, streaming progress into `events`.
    ///
    /// On failure an [`AgentEvent::Error`] carrying the user-facing message
    /// is emitted before the error is returned.
    pub async fn request(&self, request: ModelRequest, events: &EventSink) -> Result<ModelResponse, ModelError> {
        let converse = ConverseRequest {
            model_id: request.model_id,
            messages: prepare_messages(request.messages),
            system_prompt: request.system_prompt,
            tools: request.tools,
            inference: request.inference,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(converse.clone(), events).await {
                Ok(response) => {
                    self.record_usage(&converse.model_id, response.usage);
                    return Ok(response);
                }
                Err(AttemptError { error, emitted }) => {
                    let retryable = error.is_throttling() && !error.is_credentials_expired() && !emitted;
                    if retryable && attempt < max_attempts {
                        let delay = self.backoff(attempt);
                        self.metrics
                            .increment(names::THROTTLE_RETRIES, 1, &[("model_id", &converse.model_id)]);
                        warn!(
                            backend = self.backend.name(),
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Model throttled, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        code = error.code(),
                        error = %error,
                        "Model call failed"
                    );
                    events
                        .emit(AgentEvent::Error {
                            message: error.user_message(),
                        })
                        .await;
                    return Err(error);
                }
            }
        }
    }

    /// `base · 2^(attempt-1)` plus uniform jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.retry.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(20));
        let jitter = if self.retry.max_jitter_ms > 0 {
            rand::rng().random_range(0..self.retry.max_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }

    fn record_usage(&self, model_id: &str, usage: Usage) {
        let labels = [("model_id", model_id)];
        self.metrics
            .increment(names::MODEL_INPUT_TOKENS, usage.input_tokens as u64, &labels);
        self.metrics
            .increment(names::MODEL_OUTPUT_TOKENS, usage.output_tokens as u64, &labels);
    }

    async fn attempt(&self, request: ConverseRequest, events: &EventSink) -> Result<ModelResponse, AttemptError> {
        let mut stream = self
            .backend
            .converse(request)
            .await
            .map_err(|error| AttemptError { error, emitted: false })?;

        let mut blocks: BTreeMap<usize, BlockState> = BTreeMap::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        let mut emitted = false;

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.map_err(|error| AttemptError { error, emitted })?;
            match chunk {
                ConverseChunk::BlockStart { index, kind } => match kind {
                    BlockKind::Text => {
                        blocks.insert(index, BlockState::Text { text: String::new() });
                    }
                    BlockKind::ToolUse { id, name } => {
                        emitted = true;
                        events
                            .emit(AgentEvent::ToolInputStart {
                                id: id.clone(),
                                name: name.clone(),
                            })
                            .await;
                        blocks.insert(
                            index,
                            BlockState::Tool {
                                id,
                                name,
                                raw: String::new(),
                                parsed: None,
                            },
                        );
                    }
                },
                ConverseChunk::BlockDelta { index, delta } => {
                    let block = blocks
                        .entry(index)
                        .or_insert_with(|| BlockState::Text { text: String::new() });
                    match (block, delta) {
                        (BlockState::Text { text }, BlockDelta::Text(delta)) => {
                            if delta.is_empty() {
                                continue;
                            }
                            let event = if text.is_empty() {
                                AgentEvent::TextStart { text: delta.clone() }
                            } else {
                                AgentEvent::TextDelta { delta: delta.clone() }
                            };
                            text.push_str(&delta);
                            emitted = true;
                            events.emit(event).await;
                        }
                        (BlockState::Tool { id, raw, parsed, .. }, BlockDelta::ToolInput(delta)) => {
                            raw.push_str(&delta);
                            if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
                                *parsed = Some(value);
                            }
                            emitted = true;
                            events
                                .emit(AgentEvent::ToolInputDelta {
                                    id: id.clone(),
                                    delta,
                                })
                                .await;
                        }
                        (_, delta) => {
                            debug!(index, ?delta, "Ignoring delta for mismatched block");
                        }
                    }
                }
                ConverseChunk::BlockStop { .. } => {}
                ConverseChunk::MessageStop { stop_reason: reason } => stop_reason = reason,
                ConverseChunk::Usage(u) => {
                    usage.input_tokens = usage.input_tokens.max(u.input_tokens);
                    usage.output_tokens = usage.output_tokens.max(u.output_tokens);
                }
            }
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks.into_values() {
            match block {
                BlockState::Text { text: t } => text.push_str(&t),
                BlockState::Tool { id, name, parsed, .. } => tool_calls.push(ToolCall {
                    id,
                    name,
                    input: parsed.unwrap_or_else(|| serde_json::json!({})),
                }),
            }
        }

        debug!(
            backend = self.backend.name(),
            text_len = text.len(),
            tool_calls = tool_calls.len(),
            ?stop_reason,
            "Model call complete"
        );

        Ok(ModelResponse {
            text,
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

/// Drop empty text blocks and assistant messages left with no content.
pub fn prepare_messages(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    messages
        .into_iter()
        .filter_map(|mut msg| {
            msg.content
                .retain(|block| !matches!(block, ContentBlock::Text { text } if text.trim().is_empty()));
            if msg.content.is_empty() && msg.role == Role::Assistant {
                None
            } else {
                Some(msg)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBackend, ScriptedTurn};
    use serde_json::json;

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_jitter_ms: 10,
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            model_id: "test-model".into(),
            messages: vec![ConversationMessage::user("hi")],
            system_prompt: String::new(),
            tools: None,
            inference: InferenceConfig::default(),
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> (ModelClient, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        (ModelClient::new(backend, retry(), metrics.clone()), metrics)
    }

    async fn drain(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn text_blocks_become_start_then_deltas() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::text_chunks(&["Hel", "lo"])]));
        let (client, metrics) = client(backend);
        let (sink, rx) = EventSink::channel(32);

        let response = client.request(request(), &sink).await.unwrap();
        assert_eq!(response.text, "Hello");
        assert!(response.tool_calls.is_empty());
        assert_eq!(
            drain(rx).await,
            vec![
                AgentEvent::TextStart { text: "Hel".into() },
                AgentEvent::TextDelta { delta: "lo".into() },
            ]
        );
        assert_eq!(metrics.counter_total(names::MODEL_OUTPUT_TOKENS), 5);
    }

    #[tokio::test]
    async fn tool_input_is_assembled_from_fragments() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::Chunks(vec![
            ConverseChunk::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse {
                    id: "t1".into(),
                    name: "srv__search".into(),
                },
            },
            ConverseChunk::BlockDelta {
                index: 0,
                delta: BlockDelta::ToolInput("{\"q\":".into()),
            },
            ConverseChunk::BlockDelta {
                index: 0,
                delta: BlockDelta::ToolInput("\"rust\"}".into()),
            },
            ConverseChunk::BlockStop { index: 0 },
            ConverseChunk::MessageStop {
                stop_reason: StopReason::ToolUse,
            },
        ])]));
        let (client, _) = client(backend);
        let (sink, rx) = EventSink::channel(32);

        let response = client.request(request(), &sink).await.unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls[0].input, json!({"q": "rust"}));

        let events = drain(rx).await;
        assert_eq!(
            events[0],
            AgentEvent::ToolInputStart {
                id: "t1".into(),
                name: "srv__search".into()
            }
        );
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn unparseable_tool_input_becomes_empty_object() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::Chunks(vec![
            ConverseChunk::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse {
                    id: "t1".into(),
                    name: "srv__x".into(),
                },
            },
            ConverseChunk::BlockDelta {
                index: 0,
                delta: BlockDelta::ToolInput("{\"broken".into()),
            },
        ])]));
        let (client, _) = client(backend);
        let response = client.request(request(), &EventSink::discard()).await.unwrap();
        assert_eq!(response.tool_calls[0].input, json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_is_retried_then_succeeds() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedTurn::Fail(ModelError::Throttled("slow down".into())),
            ScriptedTurn::Fail(ModelError::ApiError {
                status_code: 400,
                message: "Too many tokens, please wait".into(),
            }),
            ScriptedTurn::text("ok"),
        ]));
        let (client, metrics) = client(backend.clone());
        let (sink, rx) = EventSink::channel(32);

        let response = client.request(request(), &sink).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(backend.call_count(), 3);
        assert_eq!(metrics.counter_total(names::THROTTLE_RETRIES), 2);
        assert!(!drain(rx).await.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_emit_high_demand_message() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedTurn::Fail(ModelError::Throttled("1".into())),
            ScriptedTurn::Fail(ModelError::Throttled("2".into())),
            ScriptedTurn::Fail(ModelError::Throttled("3".into())),
        ]));
        let (client, _) = client(backend.clone());
        let (sink, rx) = EventSink::channel(32);

        let err = client.request(request(), &sink).await.unwrap_err();
        assert!(err.is_throttling());
        assert_eq!(backend.call_count(), 3);
        assert_eq!(
            drain(rx).await,
            vec![AgentEvent::Error {
                message: reagent_core::error::HIGH_DEMAND_MESSAGE.into()
            }]
        );
    }

    #[tokio::test]
    async fn expired_credentials_fail_immediately() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedTurn::Fail(ModelError::CredentialsExpired("token expired".into())),
            ScriptedTurn::text("never"),
        ]));
        let (client, metrics) = client(backend.clone());

        let err = client.request(request(), &EventSink::discard()).await.unwrap_err();
        assert!(err.is_credentials_expired());
        assert_eq!(backend.call_count(), 1);
        assert_eq!(metrics.counter_total(names::THROTTLE_RETRIES), 0);
    }

    #[tokio::test]
    async fn no_retry_after_partial_output() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedTurn::Chunks(vec![
                ConverseChunk::BlockStart {
                    index: 0,
                    kind: BlockKind::Text,
                },
                ConverseChunk::BlockDelta {
                    index: 0,
                    delta: BlockDelta::Text("partial".into()),
                },
            ])
            .then_fail(ModelError::Throttled("mid-stream".into())),
            ScriptedTurn::text("never"),
        ]));
        let (client, _) = client(backend.clone());

        let err = client.request(request(), &EventSink::discard()).await.unwrap_err();
        assert!(err.is_throttling());
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let (client, _) = client(backend);
        let first = client.backoff(1).as_millis();
        let third = client.backoff(3).as_millis();
        assert!((100..110).contains(&first));
        assert!((400..410).contains(&third));
    }

    #[test]
    fn prepare_drops_empty_assistant_content() {
        let messages = vec![
            ConversationMessage::user("q"),
            ConversationMessage::new(Role::Assistant, vec![ContentBlock::text("")]),
            ConversationMessage::new(
                Role::Assistant,
                vec![ContentBlock::text(" "), ContentBlock::text("answer")],
            ),
        ];
        let prepared = prepare_messages(messages);
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[1].content, vec![ContentBlock::text("answer")]);
    }
}
