//! Tool traits: the abstraction over agent capabilities.
//!
//! Tools come from [`ToolProvider`]s (an MCP server, an in-process registry)
//! or are declared by the client for delegated execution. Server tools are
//! exposed to the model as `<provider>__<tool>`, client tools as
//! `client__<tool>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Separates the provider name from the tool name in a qualified name.
pub const NAME_SEPARATOR: &str = "__";

/// Provider segment used for client-declared tools.
pub const CLIENT_PROVIDER: &str = "client";

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool-use id)
    pub id: String,

    /// Qualified tool name
    pub name: String,

    /// Arguments as a JSON value
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn is_client(&self) -> bool {
        is_client_tool_name(&self.name)
    }
}

/// Where a tool executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Executed by this process through the named provider
    Server { provider: String },
    /// Execution delegated to the caller
    Client,
}

/// A tool as declared by its provider (or by the client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Unqualified name as the provider knows it
    pub name: String,

    /// Description sent to the model
    pub description: String,

    /// JSON Schema for the tool's input
    pub input_schema: serde_json::Value,

    pub origin: ToolOrigin,
}

impl ToolDeclaration {
    /// The name the model sees.
    pub fn qualified_name(&self) -> String {
        let provider = match &self.origin {
            ToolOrigin::Server { provider } => provider.as_str(),
            ToolOrigin::Client => CLIENT_PROVIDER,
        };
        format!("{provider}{NAME_SEPARATOR}{}", self.name)
    }

    pub fn is_client(&self) -> bool {
        matches!(self.origin, ToolOrigin::Client)
    }

    /// Names listed under `required` in the input schema.
    pub fn required_parameters(&self) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Split `provider__tool` into its parts. The tool part may itself contain `__`.
pub fn split_qualified_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_SEPARATOR)
}

/// The tool name without its provider prefix, for display.
pub fn display_name(name: &str) -> &str {
    split_qualified_name(name).map_or(name, |(_, tool)| tool)
}

pub fn is_client_tool_name(name: &str) -> bool {
    matches!(split_qualified_name(name), Some((CLIENT_PROVIDER, _)))
}

/// What a tool returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: serde_json::Value,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: serde_json::Value::String(text.into()),
        }
    }

    pub fn json(content: serde_json::Value) -> Self {
        Self { content }
    }

    /// Render for the model: strings verbatim, anything else as JSON.
    pub fn to_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Client data forwarded to providers alongside model-supplied arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallContext {
    pub thread_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<serde_json::Value>,
}

/// A source of server-executed tools.
///
/// Transport (subprocess, remote stream, in-process) is the implementor's
/// concern; the executor only sees this interface.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Connection name, used as the qualified-name prefix.
    fn name(&self) -> &str;

    /// Declarations offered by this provider. Called once at connect time.
    async fn list_tools(&self) -> Result<Vec<ToolDeclaration>, ToolError>;

    /// Invoke a tool by its unqualified name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "current_time").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Declaration under the given provider.
    fn to_declaration(&self, provider: &str) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
            origin: ToolOrigin::Server {
                provider: provider.to_string(),
            },
        }
    }
}
