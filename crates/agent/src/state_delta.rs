//! Detection of PPL queries in streamed assistant text.
//!
//! A query the model writes (as an explicit `STATE_DELTA` JSON object, a
//! fenced ```` ```ppl ```` block, or an inline `source=… | …` pipeline) is
//! surfaced to the client as `{"ppl_query": {...}}` state.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex_lite::Regex;
use serde_json::{Value, json};
use tracing::debug;

static STATE_DELTA_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*"type"\s*:\s*"STATE_DELTA""#).expect("valid regex"));
static PPL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```ppl\s*([\s\S]*?)```").expect("valid regex"));
static INLINE_PIPELINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)source\s*=\s*[^\s|]+.*?\|.*?(?:where|stats|fields|sort|head|tail)").expect("valid regex")
});
static INLINE_SEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)search\s+source\s*=\s*[^\s|]+").expect("valid regex"));
static DATASET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"source\s*=\s*([^\s|]+)").expect("valid regex"));

/// The first PPL query found in `text`, as the value stored under `ppl_query`.
pub fn detect_ppl_query(text: &str) -> Option<Value> {
    if let Some(found) = STATE_DELTA_START.find(text) {
        // The object ends wherever its braces balance; trailing prose is ignored.
        let query = serde_json::Deserializer::from_str(&text[found.start()..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .and_then(|parsed| parsed.pointer("/delta/ppl_query").cloned())
            .filter(|q| !q.is_null());
        if let Some(query) = query {
            debug!(query = %query["query"], "PPL query found in STATE_DELTA object");
            return Some(query);
        }
    }

    if let Some(block) = PPL_BLOCK.captures(text).and_then(|c| c.get(1)) {
        let query = block.as_str().trim();
        if !query.is_empty() {
            debug!(query, "PPL query found in code block");
            return Some(describe(query, "PPL query from code block"));
        }
    }

    [&*INLINE_PIPELINE, &*INLINE_SEARCH].iter().find_map(|pattern| {
        pattern.find(text).map(|found| {
            debug!(query = found.as_str(), "Inline PPL query found");
            describe(found.as_str(), "Inline PPL query")
        })
    })
}

/// The `query` string of a detected value, used for de-duplication.
pub fn query_text(detected: &Value) -> Option<&str> {
    detected.get("query").and_then(Value::as_str)
}

fn describe(query: &str, description: &str) -> Value {
    let dataset = DATASET
        .captures(query)
        .and_then(|c| c.get(1))
        .map_or("unknown", |m| m.as_str());
    json!({
        "query": query,
        "description": description,
        "dataset": dataset,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
