//! In-process tool provider backed by a registry of [`Tool`]s.

use std::collections::HashMap;

use async_trait::async_trait;
use reagent_core::error::ToolError;
use reagent_core::tool::{Tool, ToolCallContext, ToolDeclaration, ToolOutput, ToolProvider};

/// Serves registered [`Tool`] implementations under one provider name.
pub struct LocalToolProvider {
    name: String,
    tools: HashMap<String, Box<dyn Tool>>,
}

impl LocalToolProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn with_tool(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDeclaration>, ToolError> {
        let mut declarations: Vec<ToolDeclaration> =
            self.tools.values().map(|t| t.to_declaration(&self.name)).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(declarations)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        _context: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(format!("{}__{name}", self.name)))?;
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current_time::CurrentTimeTool;
    use reagent_core::tool::ToolOrigin;

    #[tokio::test]
    async fn lists_and_calls_registered_tools() {
        let provider = LocalToolProvider::new("builtin").with_tool(Box::new(CurrentTimeTool));
        assert_eq!(provider.len(), 1);

        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "current_time");
        assert_eq!(
            tools[0].origin,
            ToolOrigin::Server {
                provider: "builtin".into()
            }
        );
        assert_eq!(tools[0].qualified_name(), "builtin__current_time");

        let output = provider
            .call_tool("current_time", serde_json::json!({}), &ToolCallContext::default())
            .await
            .unwrap();
        assert!(output.content["utc"].is_string());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let provider = LocalToolProvider::new("builtin");
        let err = provider
            .call_tool("nope", serde_json::json!({}), &ToolCallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "builtin__nope"));
    }
}
