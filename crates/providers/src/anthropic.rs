//! Anthropic native backend.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, decoded into [`ConverseChunk`]s

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reagent_config::ModelConfig;
use reagent_core::error::ModelError;
use reagent_core::message::{ContentBlock as Block, ConversationMessage, Role};
use reagent_core::model::*;
use serde::Serialize;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a backend with the given request timeout.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from the `[model]` config section. Requires an API key.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ModelError::NotConfigured("no API key configured for anthropic".into()))?;
        let backend = Self::new(api_key, Duration::from_secs(config.request_timeout_secs))?;
        Ok(match &config.api_url {
            Some(url) => backend.with_base_url(url),
            None => backend,
        })
    }

    /// Use a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert conversation messages to API messages.
    ///
    /// Tool results travel as `user` messages; adjacent messages that end up
    /// with the same API role are merged so roles keep alternating.
    fn to_api_messages(messages: &[ConversationMessage]) -> Vec<ApiMessage> {
        let mut result: Vec<ApiMessage> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::Assistant => "assistant",
                Role::User | Role::ToolResult => "user",
            };
            let blocks: Vec<ApiBlock> = msg
                .content
                .iter()
                .filter_map(|block| match block {
                    Block::Text { text } if text.trim().is_empty() => None,
                    Block::Text { text } => Some(ApiBlock::Text { text: text.clone() }),
                    Block::ToolCallRequest { id, name, input } => Some(ApiBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    Block::ToolCallResult {
                        call_id,
                        content,
                        is_error,
                    } => Some(ApiBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    }),
                })
                .collect();
            if blocks.is_empty() {
                continue;
            }

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(ApiMessage {
                    role,
                    content: blocks,
                }),
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiTool<'_>> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect()
    }

    fn request_body(request: &ConverseRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model_id,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.inference.max_tokens,
            "temperature": request.inference.temperature,
            "stream": true,
        });

        if !request.system_prompt.is_empty() {
            body["system"] = serde_json::json!(request.system_prompt);
        }

        if let Some(tools) = request.tools.as_deref().filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::json!(Self::to_api_tools(tools));
        }

        body
    }
}

/// Map a non-success HTTP status to a model error.
fn status_error(status: u16, body: String) -> ModelError {
    match status {
        429 | 529 => ModelError::Throttled(body),
        401 | 403 => ModelError::CredentialsExpired(body),
        _ => ModelError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn transport_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout(e.to_string())
    } else {
        ModelError::Network(e.to_string())
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn converse(&self, request: ConverseRequest) -> Result<ConverseStream, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            backend = "anthropic",
            model = %request.model_id,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(status_error(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(forward_stream(response.bytes_stream(), tx));

        Ok(rx)
    }
}

/// Decode an SSE byte stream into chunks on `tx`. A stream that closes
/// before `message_stop` ends with a `StreamInterrupted` error.
async fn forward_stream<S, B, E>(mut byte_stream: S, tx: tokio::sync::mpsc::Sender<Result<ConverseChunk, ModelError>>)
where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(Err(ModelError::StreamInterrupted(e.to_string()))).await;
                return;
            }
        };

        let lines = match buffer.push(bytes.as_ref()) {
            Ok(lines) => lines,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        for line in lines {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            match decode_event(data.trim()) {
                Ok(SseEvent::Chunks(chunks)) => {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(SseEvent::Done) => return,
                Ok(SseEvent::Ignored) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    warn!("Anthropic stream ended without message_stop");
    let _ = tx
        .send(Err(ModelError::StreamInterrupted(
            "stream ended without message_stop".into(),
        )))
        .await;
}

/// Splits an SSE byte stream into complete lines. Bytes are held until a
/// line is complete so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Append bytes and drain every complete, non-empty, non-comment line.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ModelError> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8(raw)
                .map_err(|e| ModelError::StreamInterrupted(format!("invalid UTF-8 in event stream: {e}")))?;
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            lines.push(line.to_string());
        }
        Ok(lines)
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Chunks(Vec<ConverseChunk>),
    Done,
    Ignored,
}

/// Decode one `data:` payload of the Messages stream.
fn decode_event(data: &str) -> Result<SseEvent, ModelError> {
    if data.is_empty() {
        return Ok(SseEvent::Ignored);
    }
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
            return Ok(SseEvent::Ignored);
        }
    };
    let index = event["index"].as_u64().unwrap_or(0) as usize;

    let chunks = match event["type"].as_str().unwrap_or("") {
        "message_start" => usage_chunk(&event["message"]["usage"]).into_iter().collect(),
        "content_block_start" => {
            let block = &event["content_block"];
            let kind = match block["type"].as_str() {
                Some("tool_use") => BlockKind::ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                },
                Some("text") => BlockKind::Text,
                _ => return Ok(SseEvent::Ignored),
            };
            vec![ConverseChunk::BlockStart { index, kind }]
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            let delta = match delta["type"].as_str() {
                Some("text_delta") => BlockDelta::Text(delta["text"].as_str().unwrap_or_default().to_string()),
                Some("input_json_delta") => {
                    BlockDelta::ToolInput(delta["partial_json"].as_str().unwrap_or_default().to_string())
                }
                _ => return Ok(SseEvent::Ignored),
            };
            vec![ConverseChunk::BlockDelta { index, delta }]
        }
        "content_block_stop" => vec![ConverseChunk::BlockStop { index }],
        "message_delta" => {
            let mut chunks: Vec<ConverseChunk> = usage_chunk(&event["usage"]).into_iter().collect();
            if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                chunks.push(ConverseChunk::MessageStop {
                    stop_reason: StopReason::parse(reason),
                });
            }
            chunks
        }
        "message_stop" => return Ok(SseEvent::Done),
        "error" => {
            let error = &event["error"];
            let message = error["message"].as_str().unwrap_or("unknown stream error").to_string();
            return Err(match error["type"].as_str() {
                Some("overloaded_error") | Some("rate_limit_error") => ModelError::Throttled(message),
                Some("authentication_error") | Some("permission_error") => {
                    ModelError::CredentialsExpired(message)
                }
                _ => ModelError::StreamInterrupted(message),
            });
        }
        _ => return Ok(SseEvent::Ignored),
    };

    Ok(SseEvent::Chunks(chunks))
}

fn usage_chunk(usage: &serde_json::Value) -> Option<ConverseChunk> {
    if !usage.is_object() {
        return None;
    }
    Some(ConverseChunk::Usage(Usage {
        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
    }))
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::ToolCall;
    use serde_json::json;

    #[test]
    fn constructor_with_base_url() {
        let backend = AnthropicBackend::new("sk-ant-test", Duration::from_secs(5))
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(backend.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn from_config_requires_key() {
        let config = ModelConfig::default();
        assert!(matches!(
            AnthropicBackend::from_config(&config),
            Err(ModelError::NotConfigured(_))
        ));
    }

    #[test]
    fn tool_round_becomes_alternating_messages() {
        let messages = vec![
            ConversationMessage::user("What time is it?"),
            ConversationMessage::assistant(
                "Let me check",
                vec![ToolCall {
                    id: "toolu_1".into(),
                    name: "builtin__current_time".into(),
                    input: json!({}),
                }],
            ),
            ConversationMessage::tool_results(vec![Block::tool_result("toolu_1", "12:00")]),
            ConversationMessage::user("Thanks"),
        ];

        let api = AnthropicBackend::to_api_messages(&messages);
        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(api.len(), 3);
        assert_eq!(value[1]["role"], "assistant");
        assert_eq!(value[1]["content"][1]["type"], "tool_use");
        assert_eq!(value[1]["content"][1]["name"], "builtin__current_time");
        // tool result and the follow-up user text merge into one user turn
        assert_eq!(value[2]["role"], "user");
        assert_eq!(value[2]["content"][0]["type"], "tool_result");
        assert_eq!(value[2]["content"][0]["tool_use_id"], "toolu_1");
        assert!(value[2]["content"][0].get("is_error").is_none());
        assert_eq!(value[2]["content"][1]["text"], "Thanks");
    }

    #[test]
    fn empty_assistant_messages_are_dropped() {
        let messages = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::new(Role::Assistant, vec![Block::text("  ")]),
            ConversationMessage::user("again"),
        ];
        let api = AnthropicBackend::to_api_messages(&messages);
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].content.len(), 2);
    }

    #[test]
    fn body_omits_withheld_tools() {
        let mut request = ConverseRequest {
            model_id: "claude-test".into(),
            messages: vec![ConversationMessage::user("hi")],
            system_prompt: "be brief".into(),
            tools: None,
            inference: InferenceConfig::default(),
        };
        let body = AnthropicBackend::request_body(&request);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("tools").is_none());

        request.tools = Some(vec![ToolSchema {
            name: "srv__search".into(),
            description: "Search".into(),
            input_schema: json!({"type": "object"}),
        }]);
        let body = AnthropicBackend::request_body(&request);
        assert_eq!(body["tools"][0]["name"], "srv__search");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn status_mapping() {
        assert!(status_error(429, "slow down".into()).is_throttling());
        assert!(status_error(401, "expired".into()).is_credentials_expired());
        assert!(matches!(status_error(500, "boom".into()), ModelError::ApiError { status_code: 500, .. }));
    }

    #[test]
    fn line_buffer_handles_split_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"event: ping\nda").unwrap().len() == 1);
        let lines = buffer.push(b"ta: {\"type\":\"ping\"}\r\n\n: comment\n").unwrap();
        assert_eq!(lines, vec!["data: {\"type\":\"ping\"}".to_string()]);
    }

    #[test]
    fn line_buffer_keeps_characters_split_across_chunks() {
        let line = "data: {\"t\":\"é\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(&line[..split]).unwrap().is_empty());
        let lines = buffer.push(&line[split..]).unwrap();
        assert_eq!(lines, vec!["data: {\"t\":\"é\"}".to_string()]);
    }

    #[test]
    fn line_buffer_rejects_invalid_utf8_lines() {
        let mut buffer = SseLineBuffer::default();
        let err = buffer.push(b"data: \xff\n").unwrap_err();
        assert_eq!(err.code(), "STREAM_ERROR");
    }

    async fn forward(chunks: Vec<&'static str>) -> Vec<Result<ConverseChunk, ModelError>> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        forward_stream(stream, tx).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn complete_stream_ends_cleanly() {
        let out = forward(vec![
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        ])
        .await;
        assert!(out.iter().all(Result::is_ok));
        assert!(matches!(
            out.last(),
            Some(Ok(ConverseChunk::MessageStop {
                stop_reason: StopReason::EndTurn
            }))
        ));
    }

    #[tokio::test]
    async fn truncated_stream_is_interrupted() {
        let out = forward(vec![
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hal\"}}\n\n",
        ])
        .await;
        assert_eq!(out.len(), 3);
        assert!(out[..2].iter().all(Result::is_ok));
        let err = out[2].as_ref().unwrap_err();
        assert!(matches!(err, ModelError::StreamInterrupted(m) if m.contains("message_stop")));
        assert_eq!(err.code(), "STREAM_ERROR");
    }

    #[test]
    fn decodes_tool_use_stream() {
        let start = decode_event(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"srv__search","input":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            start,
            SseEvent::Chunks(vec![ConverseChunk::BlockStart {
                index: 1,
                kind: BlockKind::ToolUse {
                    id: "toolu_9".into(),
                    name: "srv__search".into()
                }
            }])
        );

        let delta = decode_event(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
        )
        .unwrap();
        assert_eq!(
            delta,
            SseEvent::Chunks(vec![ConverseChunk::BlockDelta {
                index: 1,
                delta: BlockDelta::ToolInput("{\"q\":".into())
            }])
        );

        let stop = decode_event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
        )
        .unwrap();
        assert_eq!(
            stop,
            SseEvent::Chunks(vec![
                ConverseChunk::Usage(Usage {
                    input_tokens: 0,
                    output_tokens: 12
                }),
                ConverseChunk::MessageStop {
                    stop_reason: StopReason::ToolUse
                },
            ])
        );

        assert_eq!(decode_event(r#"{"type":"message_stop"}"#).unwrap(), SseEvent::Done);
        assert_eq!(decode_event(r#"{"type":"ping"}"#).unwrap(), SseEvent::Ignored);
        assert_eq!(decode_event("not json").unwrap(), SseEvent::Ignored);
    }

    #[test]
    fn overloaded_stream_error_is_throttling() {
        let err = decode_event(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.is_throttling());
    }
}
