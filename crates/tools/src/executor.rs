//! Tool executor: resolves qualified names to provider connections,
//! validates calls, guards them with a circuit breaker, and runs batches.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reagent_config::ToolsConfig;
use reagent_core::error::ToolError;
use reagent_core::event::{AgentEvent, EventSink};
use reagent_core::message::{ContentBlock, ConversationMessage, answered_call_ids};
use reagent_core::model::ToolSchema;
use reagent_core::tool::{
    CLIENT_PROVIDER, ToolCall, ToolCallContext, ToolDeclaration, ToolOutput, ToolProvider, split_qualified_name,
};
use reagent_telemetry::{MetricsRegistry, names};
use tracing::{debug, info, warn};

use crate::breaker::{CircuitBreaker, canonical_json, signature};
use crate::truncate::truncate_tool_result;

/// A connected provider and the tools it declared at connect time.
struct Connection {
    provider: Arc<dyn ToolProvider>,
    tools: Vec<ToolDeclaration>,
    breaker: CircuitBreaker,
}

/// What happened to a batch of tool calls.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every call already had a result in the history; nothing ran.
    AllRedundant { skipped: usize },

    /// Server tools ran and `results` answers each of them. Any client calls
    /// in the same batch were announced and handed to the caller.
    Completed {
        results: ConversationMessage,
        delegated: Vec<ToolCall>,
    },

    /// Only client tools; they were announced for the caller to execute.
    Delegated { calls: Vec<ToolCall> },
}

/// The tool executor. Built at bootstrap, then shared as `Arc<ToolExecutor>`.
pub struct ToolExecutor {
    connections: BTreeMap<String, Connection>,
    config: ToolsConfig,
    metrics: Arc<MetricsRegistry>,
}

impl ToolExecutor {
    pub fn new(config: ToolsConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            connections: BTreeMap::new(),
            config,
            metrics,
        }
    }

    /// Connect a provider under `name`, caching its tool declarations.
    /// Returns the number of tools it offers.
    pub async fn connect(&mut self, name: &str, provider: Arc<dyn ToolProvider>) -> Result<usize, ToolError> {
        if name == CLIENT_PROVIDER || name.is_empty() || name.contains("__") {
            return Err(ToolError::InvalidArguments(format!("invalid connection name: {name:?}")));
        }
        let tools = provider.list_tools().await?;
        let count = tools.len();
        info!(connection = name, tools = count, "Tool provider connected");
        self.connections.insert(
            name.to_string(),
            Connection {
                provider,
                tools,
                breaker: CircuitBreaker::new(
                    self.config.breaker_max_failures,
                    Duration::from_secs(self.config.breaker_reset_secs),
                ),
            },
        );
        Ok(count)
    }

    pub fn connection_names(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Server tools (re-tagged with their connection name), optionally
    /// followed by the client's tools.
    pub fn list_tools(&self, include_client_tools: bool, client_tools: &[ToolDeclaration]) -> Vec<ToolDeclaration> {
        let mut all: Vec<ToolDeclaration> = self
            .connections
            .iter()
            .flat_map(|(name, conn)| {
                conn.tools.iter().map(move |tool| ToolDeclaration {
                    origin: reagent_core::ToolOrigin::Server {
                        provider: name.clone(),
                    },
                    ..tool.clone()
                })
            })
            .collect();
        if include_client_tools {
            all.extend(client_tools.iter().cloned());
        }
        all
    }

    /// Execute one server tool call.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        if call.is_client() {
            return Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: "client tools are executed by the client, not the server".into(),
            });
        }

        let (conn_name, tool_name) =
            split_qualified_name(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let conn = self
            .connections
            .get(conn_name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let declaration = conn
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let key = signature(&call.name, &call.input);
        let _in_flight = conn.breaker.lock(&key).await;

        if let Err(open) = conn.breaker.check(&key) {
            self.metrics
                .increment(names::CIRCUIT_BREAKER_OPEN, 1, &[("tool_name", &call.name)]);
            warn!(
                tool = %call.name,
                attempts = open.attempts,
                remaining_secs = open.remaining.as_secs(),
                "Circuit breaker open, refusing tool call"
            );
            return Err(ToolError::CircuitBreakerOpen {
                tool: call.name.clone(),
                attempts: open.attempts,
                input: canonical_json(&call.input),
                remaining_minutes: open.remaining_minutes(),
            });
        }

        let required = declaration.required_parameters();
        let missing: Vec<String> = required
            .iter()
            .filter(|p| call.input.get(p.as_str()).is_none_or(|v| v.is_null()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let failures = conn.breaker.record_failure(&key);
            let provided = call
                .input
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            warn!(tool = %call.name, ?missing, failures, "Tool call missing required parameters");
            return Err(ToolError::MissingParameters {
                tool: call.name.clone(),
                missing,
                required,
                provided,
                max_failures: conn.breaker.max_failures(),
            });
        }

        match conn.provider.call_tool(tool_name, call.input.clone(), ctx).await {
            Ok(output) => {
                if conn.breaker.record_success(&key) {
                    info!(tool = %call.name, "Tool succeeded after previous failures, breaker cleared");
                }
                Ok(output)
            }
            Err(e) => {
                let failures = conn.breaker.record_failure(&key);
                warn!(tool = %call.name, error = %e, failures, "Tool execution failed");
                Err(ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run a batch of calls requested by one model response.
    ///
    /// Calls already answered in `history` are skipped. Every remaining call
    /// is announced with [`AgentEvent::ToolUseStart`] before any executes;
    /// server calls then run sequentially, each reported as
    /// [`AgentEvent::ToolResult`] or [`AgentEvent::ToolError`].
    pub async fn execute_batch(
        &self,
        calls: Vec<ToolCall>,
        history: &[ConversationMessage],
        ctx: &ToolCallContext,
        events: &EventSink,
    ) -> BatchOutcome {
        let total = calls.len();
        let answered = answered_call_ids(history);
        let fresh: Vec<ToolCall> = calls
            .into_iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .collect();

        if fresh.is_empty() {
            if total > 0 {
                self.metrics
                    .increment(names::REDUNDANT_TOOL_CALLS, total as u64, &[("agent_type", "react")]);
                warn!(skipped = total, "All tool calls were already executed, skipping");
            }
            return BatchOutcome::AllRedundant { skipped: total };
        }
        if fresh.len() < total {
            debug!(skipped = total - fresh.len(), "Skipping already answered tool calls");
        }

        for call in &fresh {
            events
                .emit(AgentEvent::ToolUseStart {
                    name: call.name.clone(),
                    id: call.id.clone(),
                    input: call.input.clone(),
                })
                .await;
        }

        let (client, server): (Vec<ToolCall>, Vec<ToolCall>) = fresh.into_iter().partition(ToolCall::is_client);
        if server.is_empty() {
            info!(count = client.len(), "Delegating client tools");
            return BatchOutcome::Delegated { calls: client };
        }

        let budget = self.config.result_char_budget;
        let mut results = Vec::with_capacity(server.len());
        for call in &server {
            let started = Instant::now();
            info!(tool = %call.name, id = %call.id, "Tool execution started");
            match self.execute(call, ctx).await {
                Ok(output) => {
                    let text = output.to_text();
                    info!(
                        tool = %call.name,
                        id = %call.id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        result_chars = text.chars().count(),
                        "Tool execution completed"
                    );
                    results.push(ContentBlock::tool_result(&call.id, truncate_tool_result(&text, budget)));
                    events
                        .emit(AgentEvent::ToolResult {
                            name: call.name.clone(),
                            id: call.id.clone(),
                            content: text,
                        })
                        .await;
                }
                Err(e) => {
                    let message = e.to_string();
                    let content = serde_json::json!({ "error": message }).to_string();
                    results.push(ContentBlock::tool_error(&call.id, truncate_tool_result(&content, budget)));
                    events
                        .emit(AgentEvent::ToolError {
                            name: call.name.clone(),
                            id: call.id.clone(),
                            error: message,
                        })
                        .await;
                }
            }
        }

        if !client.is_empty() {
            info!(count = client.len(), "Delegating client tools after server round");
        }
        BatchOutcome::Completed {
            results: ConversationMessage::tool_results(results),
            delegated: client,
        }
    }
}

/// Schemas for the model request. Missing descriptions get a generic one.
pub fn tool_schemas(tools: &[ToolDeclaration]) -> Vec<ToolSchema> {
    tools
        .iter()
        .map(|t| ToolSchema {
            name: t.qualified_name(),
            description: if t.description.is_empty() {
                format!("Tool: {}", t.name)
            } else {
                t.description.clone()
            },
            input_schema: t.input_schema.clone(),
        })
        .collect()
}
