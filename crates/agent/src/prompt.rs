//! System prompt assembly.
//!
//! The base template is fixed once per process. Each run substitutes the
//! cached server-tool description and the client's state, context and
//! tools into a copy of it; the base itself is never mutated.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{OnceLock, PoisonError, RwLock};

use reagent_core::tool::{ToolDeclaration, ToolOrigin};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const SERVER_TOOLS: &str = "{{SERVER_TOOLS}}";
pub const CLIENT_STATE: &str = "{{CLIENT_STATE}}";
pub const CLIENT_CONTEXT: &str = "{{CLIENT_CONTEXT}}";
pub const CLIENT_TOOLS: &str = "{{CLIENT_TOOLS}}";

const NONE_PROVIDED: &str = "None provided.";

/// Section headings appended to a custom template that lacks a placeholder.
const SECTIONS: [(&str, &str); 4] = [
    (SERVER_TOOLS, "Available tools"),
    (CLIENT_STATE, "Client state"),
    (CLIENT_CONTEXT, "Client context"),
    (CLIENT_TOOLS, "Client tools"),
];

const DEFAULT_TEMPLATE: &str = "\
You are a helpful assistant that solves tasks by reasoning step by step and \
using tools when they help.

Work in cycles. Think about what you still need to know, call a tool to find \
it out, then read the result before deciding on the next step. When you have \
enough information, answer the user directly without calling further tools.

Guidelines:
- Always pass every required parameter when calling a tool.
- If a tool call fails, read the error and correct the call instead of \
repeating it unchanged.
- Prefer a short, direct answer over an exhaustive one.

## Available tools
{{SERVER_TOOLS}}

## Client state
{{CLIENT_STATE}}

## Client context
{{CLIENT_CONTEXT}}

## Client tools
{{CLIENT_TOOLS}}
";

/// Builds the system prompt for each model call.
///
/// Shared across runs; only the tool description is mutable after bootstrap.
#[derive(Debug, Default)]
pub struct PromptAssembler {
    base: OnceLock<String>,
    server_tools: RwLock<String>,
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the base template. Only the first call has an effect; later calls
    /// return the template already in place.
    pub fn load_base(&self, custom_template: Option<String>) -> &str {
        self.base.get_or_init(|| match custom_template {
            Some(template) if !template.trim().is_empty() => {
                info!(chars = template.len(), "Using custom system prompt template");
                with_missing_sections(template)
            }
            _ => DEFAULT_TEMPLATE.to_string(),
        })
    }

    /// The base template, falling back to the default if none was loaded.
    pub fn base(&self) -> &str {
        self.load_base(None)
    }

    /// Recompute the server tool description from `tools`.
    /// Client-origin declarations are ignored here; they arrive per run.
    pub fn set_tools(&self, tools: &[ToolDeclaration]) {
        let mut by_provider: BTreeMap<&str, Vec<&ToolDeclaration>> = BTreeMap::new();
        for tool in tools {
            if let ToolOrigin::Server { provider } = &tool.origin {
                by_provider.entry(provider.as_str()).or_default().push(tool);
            }
        }

        let rendered = if by_provider.is_empty() {
            NONE_PROVIDED.to_string()
        } else {
            by_provider
                .iter()
                .map(|(provider, tools)| {
                    let entries: Vec<String> = tools.iter().map(|t| describe_tool(t)).collect();
                    format!("### {provider}\n{}", entries.join("\n"))
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        debug!(providers = by_provider.len(), "Server tool description updated");
        *self.server_tools.write().unwrap_or_else(PoisonError::into_inner) = rendered;
    }

    /// The system prompt for one run.
    pub fn inject(&self, state: Option<&Value>, context: &[Value], client_tools: &[ToolDeclaration]) -> String {
        let server_tools = {
            let cached = self.server_tools.read().unwrap_or_else(PoisonError::into_inner);
            if cached.is_empty() {
                NONE_PROVIDED.to_string()
            } else {
                cached.clone()
            }
        };
        let state = render_state(state);
        let context = render_context(context);
        let client_tools = render_client_tools(client_tools);

        substitute(
            self.base(),
            &[
                (SERVER_TOOLS, &server_tools),
                (CLIENT_STATE, &state),
                (CLIENT_CONTEXT, &context),
                (CLIENT_TOOLS, &client_tools),
            ],
        )
    }
}

/// Read a custom template from `path`. An unreadable or empty file logs a
/// warning and yields `None`, so the default template is used.
pub fn load_template_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(template) if !template.trim().is_empty() => {
            info!(path = %path.display(), "Loaded system prompt template");
            Some(template)
        }
        Ok(_) => {
            warn!(path = %path.display(), "System prompt file is empty, using default");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "System prompt file unreadable, using default");
            None
        }
    }
}

fn with_missing_sections(mut template: String) -> String {
    for (placeholder, heading) in SECTIONS {
        if !template.contains(placeholder) {
            template.push_str(&format!("\n\n## {heading}\n{placeholder}"));
        }
    }
    template
}

fn describe_tool(tool: &ToolDeclaration) -> String {
    let mut line = format!("- {}: {}", tool.qualified_name(), tool.description);
    let required = tool.required_parameters();
    if !required.is_empty() {
        line.push_str(&format!("\n  Required parameters: {}", required.join(", ")));
    }
    line
}

fn render_state(state: Option<&Value>) -> String {
    let Some(state) = state.filter(|s| !s.is_null()) else {
        return NONE_PROVIDED.to_string();
    };
    let pretty = serde_json::to_string_pretty(state).unwrap_or_else(|_| state.to_string());
    format!(
        "```json\n{pretty}\n```\n\
         This is the current state of the user's application. Use it to understand \
         what the user is looking at and do not ask for information already present here."
    )
}

fn render_context(context: &[Value]) -> String {
    if context.is_empty() {
        return NONE_PROVIDED.to_string();
    }
    let items: Vec<String> = context
        .iter()
        .map(|item| {
            let description = item.get("description").and_then(Value::as_str);
            match (description, item.get("value")) {
                (Some(description), Some(Value::String(value))) => format!("- {description}: {value}"),
                (Some(description), Some(value)) => format!("- {description}: {value}"),
                _ => format!("- {item}"),
            }
        })
        .collect();
    format!("The client supplied this read-only context:\n{}", items.join("\n"))
}

fn render_client_tools(tools: &[ToolDeclaration]) -> String {
    if tools.is_empty() {
        return NONE_PROVIDED.to_string();
    }
    let entries: Vec<String> = tools.iter().map(describe_tool).collect();
    format!(
        "{}\n\nThese tools run in the user's client. Calling one ends your turn: the client \
         executes it asynchronously and sends the result back in a later request.",
        entries.join("\n")
    )
}

/// Single pass over `template`, so substituted values are never rescanned.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_tool(provider: &str, name: &str, required: &[&str]) -> ToolDeclaration {
        ToolDeclaration {
            name: name.into(),
            description: format!("{name} things"),
            input_schema: json!({"type": "object", "required": required}),
            origin: ToolOrigin::Server {
                provider: provider.into(),
            },
        }
    }

    #[test]
    fn default_template_without_inputs() {
        let prompt = PromptAssembler::new().inject(None, &[], &[]);
        assert!(!prompt.contains("{{"));
        assert_eq!(prompt.matches(NONE_PROVIDED).count(), 4);
    }

    #[test]
    fn first_load_wins() {
        let assembler = PromptAssembler::new();
        assert_eq!(
            assembler.load_base(Some("first {{SERVER_TOOLS}} {{CLIENT_STATE}} {{CLIENT_CONTEXT}} {{CLIENT_TOOLS}}".into())),
            "first {{SERVER_TOOLS}} {{CLIENT_STATE}} {{CLIENT_CONTEXT}} {{CLIENT_TOOLS}}"
        );
        assert!(assembler.load_base(Some("second".into())).starts_with("first"));
        assert!(assembler.load_base(None).starts_with("first"));
    }

    #[test]
    fn custom_template_gets_missing_sections() {
        let assembler = PromptAssembler::new();
        let base = assembler.load_base(Some("Be brief.\n{{CLIENT_STATE}}".into()));
        assert!(base.starts_with("Be brief.\n{{CLIENT_STATE}}"));
        assert!(base.contains("## Available tools\n{{SERVER_TOOLS}}"));
        assert!(base.contains("## Client tools\n{{CLIENT_TOOLS}}"));
        assert_eq!(base.matches(CLIENT_STATE).count(), 1);
    }

    #[test]
    fn server_tools_grouped_by_provider() {
        let assembler = PromptAssembler::new();
        assembler.set_tools(&[
            server_tool("search", "logs", &["index", "query"]),
            server_tool("builtin", "current_time", &[]),
            server_tool("search", "metrics", &[]),
        ]);
        let prompt = assembler.inject(None, &[], &[]);

        let builtin = prompt.find("### builtin").unwrap();
        let search = prompt.find("### search").unwrap();
        assert!(builtin < search);
        assert!(prompt.contains("- search__logs: logs things\n  Required parameters: index, query"));
        assert!(prompt.contains("- search__metrics: metrics things"));
    }

    #[test]
    fn injects_client_data() {
        let assembler = PromptAssembler::new();
        let client_tool = ToolDeclaration {
            name: "open_tab".into(),
            description: "Open a tab".into(),
            input_schema: json!({"type": "object"}),
            origin: ToolOrigin::Client,
        };
        let prompt = assembler.inject(
            Some(&json!({"page": "discover"})),
            &[json!({"description": "Current index", "value": "logs-*"})],
            &[client_tool],
        );

        assert!(prompt.contains("\"page\": \"discover\""));
        assert!(prompt.contains("- Current index: logs-*"));
        assert!(prompt.contains("- client__open_tab: Open a tab"));
        assert!(prompt.contains("asynchronously"));
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let assembler = PromptAssembler::new();
        let prompt = assembler.inject(Some(&json!({"note": "{{CLIENT_TOOLS}}"})), &[], &[]);
        assert!(prompt.contains("\"note\": \"{{CLIENT_TOOLS}}\""));
        // the base is untouched by injection
        assert!(assembler.base().contains(CLIENT_STATE));
    }

    #[test]
    fn template_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Custom {{SERVER_TOOLS}}").unwrap();
        assert_eq!(load_template_file(&path).as_deref(), Some("Custom {{SERVER_TOOLS}}"));

        assert!(load_template_file(&dir.path().join("missing.md")).is_none());

        std::fs::write(&path, "  \n").unwrap();
        assert!(load_template_file(&path).is_none());
    }
}
