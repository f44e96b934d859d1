//! Run input: validation and conversion of an AG-UI `RunAgentInput`.
//!
//! The raw JSON is checked structurally first (all problems collected), then
//! converted into the closed domain types. Nothing downstream ever sees an
//! unvalidated shape.

use serde_json::Value;
use tracing::debug;

use crate::error::ValidationError;
use crate::message::{ContentBlock, ConversationMessage, Role};
use crate::tool::{ToolCall, ToolDeclaration, ToolOrigin};

/// A validated run request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<ConversationMessage>,
    /// Tools declared by the client for delegated execution
    pub client_tools: Vec<ToolDeclaration>,
    pub context: Vec<Value>,
    pub state: Option<Value>,
    /// `forwardedProps.modelId`, if the client picked a model
    pub model_id: Option<String>,
}

/// `threadId`/`runId` as given, for correlating a rejected request.
pub fn correlation_ids(raw: &Value) -> (Option<String>, Option<String>) {
    let id = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    (id("threadId"), id("runId"))
}

/// Validate and convert a raw run input.
pub fn validate_run_input(raw: &Value) -> Result<RunRequest, ValidationError> {
    let errors = structural_errors(raw);
    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    let messages = convert_messages(raw.get("messages").and_then(Value::as_array).map_or(&[][..], Vec::as_slice));
    if messages.is_empty() {
        return Err(ValidationError {
            errors: vec!["messages must contain at least one user, assistant or tool message".into()],
        });
    }

    let (thread_id, run_id) = correlation_ids(raw);
    Ok(RunRequest {
        thread_id: thread_id.unwrap_or_default(),
        run_id: run_id.unwrap_or_default(),
        messages,
        client_tools: raw
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| tools.iter().filter_map(client_tool).collect())
            .unwrap_or_default(),
        context: raw
            .get("context")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        state: raw.get("state").filter(|s| !s.is_null()).cloned(),
        model_id: raw
            .pointer("/forwardedProps/modelId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

fn structural_errors(raw: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    if !is_non_empty_str(raw.get("threadId")) {
        errors.push("threadId must be a non-empty string".to_string());
    }
    if !is_non_empty_str(raw.get("runId")) {
        errors.push("runId must be a non-empty string".to_string());
    }

    match raw.get("messages").and_then(Value::as_array) {
        Some(messages) if !messages.is_empty() => {
            for (index, msg) in messages.iter().enumerate() {
                let role = msg.get("role").and_then(Value::as_str);
                if role.is_none() {
                    errors.push(format!("messages[{index}].role must be a string"));
                }

                let content = msg.get("content");
                let assistant_with_tools =
                    role == Some("assistant") && msg.get("toolCalls").is_some_and(Value::is_array);
                if assistant_with_tools {
                    if content.is_some_and(|c| !c.is_null() && !c.is_string() && !c.is_array()) {
                        errors.push(format!(
                            "messages[{index}].content must be a string or array when provided"
                        ));
                    }
                } else if !(is_non_empty_str(content) || content.is_some_and(Value::is_array)) {
                    errors.push(format!("messages[{index}].content must be a string or array"));
                }
            }
        }
        _ => errors.push("messages must be a non-empty array".to_string()),
    }

    if raw.get("tools").is_some_and(|t| !t.is_null() && !t.is_array()) {
        errors.push("tools must be an array if provided".to_string());
    }
    if raw.get("context").is_some_and(|c| !c.is_null() && !c.is_array()) {
        errors.push("context must be an array if provided".to_string());
    }

    errors
}

fn is_non_empty_str(value: Option<&Value>) -> bool {
    value.and_then(Value::as_str).is_some_and(|s| !s.is_empty())
}

/// Text parts of a string-or-array content value.
fn text_of(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn convert_messages(raw: &[Value]) -> Vec<ConversationMessage> {
    let mut out: Vec<ConversationMessage> = Vec::with_capacity(raw.len());

    for msg in raw {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
        match role {
            "user" => out.push(ConversationMessage::user(text_of(msg.get("content")))),
            "assistant" => {
                let calls = msg
                    .get("toolCalls")
                    .and_then(Value::as_array)
                    .map(|calls| calls.iter().filter_map(tool_call).collect())
                    .unwrap_or_default();
                let message = ConversationMessage::assistant(text_of(msg.get("content")), calls);
                if !message.content.is_empty() {
                    out.push(message);
                }
            }
            "tool" => {
                let Some(call_id) = msg.get("toolCallId").and_then(Value::as_str) else {
                    debug!("Skipping tool message without toolCallId");
                    continue;
                };
                let block = ContentBlock::tool_result(call_id, text_of(msg.get("content")));
                // Consecutive tool messages answer one assistant turn
                match out.last_mut() {
                    Some(last) if last.role == Role::ToolResult => last.content.push(block),
                    _ => out.push(ConversationMessage::tool_results(vec![block])),
                }
            }
            other => debug!(role = other, "Skipping message role not forwarded to the model"),
        }
    }

    out
}

/// `{id, function: {name, arguments}}` where `arguments` is a JSON string.
fn tool_call(raw: &Value) -> Option<ToolCall> {
    let id = raw.get("id")?.as_str()?.to_string();
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let input = match function.get("arguments") {
        Some(Value::String(args)) => serde_json::from_str(args).unwrap_or_else(|_| Value::Object(Default::default())),
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        _ => Value::Object(Default::default()),
    };
    Some(ToolCall { id, name, input })
}

fn client_tool(raw: &Value) -> Option<ToolDeclaration> {
    let name = raw.get("name")?.as_str()?.to_string();
    let description = raw
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Client tool: {name}"));
    Some(ToolDeclaration {
        name,
        description,
        input_schema: raw
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
        origin: ToolOrigin::Client,
    })
}
