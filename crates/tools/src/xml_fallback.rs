//! Recovery of tool calls a model wrote as text markup.
//!
//! Some backends degrade to emitting
//! `<function_calls><invoke name="…"><parameter name="…">…</parameter></invoke></function_calls>`
//! in the text channel instead of structured tool use.

use rand::Rng;
use rand::distr::Alphanumeric;
use reagent_core::ToolCall;
use regex_lite::Regex;
use std::sync::LazyLock;

static FUNCTION_CALLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<function_calls>([\s\S]*?)</function_calls>").expect("valid regex"));
static INVOKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<invoke name="([^"]+)">([\s\S]*?)</invoke>"#).expect("valid regex"));
static PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<parameter name="([^"]+)">([^<]*)</parameter>"#).expect("valid regex"));

const OPEN_TAG: &str = "<function_calls>";

/// Whether `text` contains tool-call markup worth parsing.
pub fn contains_markup(text: &str) -> bool {
    text.contains(OPEN_TAG)
}

/// Parse the first `<function_calls>` block into tool calls.
///
/// Parameter values are kept as strings. Each call gets a fresh
/// `tooluse_…` id.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let Some(block) = FUNCTION_CALLS.captures(text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    INVOKE
        .captures_iter(block.as_str())
        .map(|invoke| {
            let name = invoke[1].to_string();
            let params: serde_json::Map<String, serde_json::Value> = PARAMETER
                .captures_iter(&invoke[2])
                .map(|p| (p[1].to_string(), serde_json::Value::String(p[2].to_string())))
                .collect();
            let call = ToolCall {
                id: generate_call_id(),
                name,
                input: serde_json::Value::Object(params),
            };
            tracing::info!(tool = %call.name, id = %call.id, "Parsed tool call from text markup");
            call
        })
        .collect()
}

/// The text preceding the markup, trimmed.
pub fn strip_markup(text: &str) -> String {
    match text.find(OPEN_TAG) {
        Some(pos) => text[..pos].trim().to_string(),
        None => text.to_string(),
    }
}

fn generate_call_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("tooluse_{suffix}")
}
