//! ReAct reasoning loop: Reason → Act → Observe, bounded.
//!
//! One invocation drives a run through
//! `ProcessInput → CallModel → {ExecuteTools → CallModel}* → GenerateResponse`.
//! Progress is streamed as [`AgentEvent`]s into the run's [`EventSink`];
//! the conversation only ever grows by appending.
//!
//! Termination:
//! - the model answers without tool calls;
//! - a completed tool round brings the iteration count to the maximum
//!   (the call before that one is made without tools, forcing an answer);
//! - the batch contains client-delegated tools;
//! - every requested call was already answered in the history;
//! - the run is cancelled (checked before each tool round and while pacing
//!   or waiting on the model).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reagent_config::AgentConfig;
use reagent_core::error::ModelError;
use reagent_core::event::{AgentEvent, EventSink};
use reagent_core::message::{ContentBlock, ConversationMessage};
use reagent_core::model::{InferenceConfig, ToolSchema};
use reagent_core::run::RunRequest;
use reagent_core::tool::{ToolCall, ToolCallContext, ToolDeclaration};
use reagent_providers::{ModelClient, ModelRequest};
use reagent_telemetry::{MetricsRegistry, names};
use reagent_tools::{BatchOutcome, ToolExecutor, tool_schemas, xml_fallback};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prompt::PromptAssembler;

/// Loop limits and model parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    /// Delay added per completed iteration before the next model call
    pub pacing_step: Duration,
    /// Upper bound on the pacing delay
    pub pacing_cap: Duration,
    pub inference: InferenceConfig,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            pacing_step: Duration::from_millis(config.pacing_step_ms),
            pacing_cap: Duration::from_millis(config.pacing_cap_ms),
            inference: InferenceConfig {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        }
    }

    /// `min(step · iterations, cap)`; nothing before the first call.
    pub fn pacing_delay(&self, iterations: u32) -> Duration {
        self.pacing_step.saturating_mul(iterations).min(self.pacing_cap)
    }

    /// Whether the next call must be made without tools.
    pub fn at_max_iterations(&self, iterations: u32) -> bool {
        iterations >= self.max_iterations.saturating_sub(1)
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The model answered without requesting tools
    Answered,
    /// The iteration limit was reached
    MaxIterations,
    /// Client tools were requested; the caller executes them
    AwaitingClient,
    /// Every requested call already had a result
    AllRedundant,
    Cancelled,
}

impl LoopStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::MaxIterations => "max_iterations",
            Self::AwaitingClient => "awaiting_client",
            Self::AllRedundant => "all_redundant",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The result of a loop invocation.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Input messages followed by everything the loop appended
    pub history: Vec<ConversationMessage>,
    /// Completed server tool rounds
    pub iterations: u32,
    pub stop: LoopStop,
}

/// State owned by one loop invocation.
#[derive(Debug)]
pub struct ReasoningState {
    pub history: Vec<ConversationMessage>,
    pub iterations: u32,
    pub max_iterations: u32,
    /// Calls requested by the latest model response, not yet executed
    pub pending_calls: Vec<ToolCall>,
    /// Results of executed calls, by call id
    pub tool_results: HashMap<String, ContentBlock>,
    pub should_continue: bool,
    pub client_state: Option<Value>,
    pub client_context: Vec<Value>,
    pub client_tools: Vec<ToolDeclaration>,
    pub model_id: String,
    pub thread_id: String,
    pub run_id: String,
}

impl ReasoningState {
    pub fn new(request: RunRequest, model_id: String, max_iterations: u32) -> Self {
        Self {
            history: request.messages,
            iterations: 0,
            max_iterations,
            pending_calls: Vec::new(),
            tool_results: HashMap::new(),
            should_continue: true,
            client_state: request.state,
            client_context: request.context,
            client_tools: request.client_tools,
            model_id,
            thread_id: request.thread_id,
            run_id: request.run_id,
        }
    }

    fn tool_context(&self) -> ToolCallContext {
        ToolCallContext {
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            state: self.client_state.clone(),
            context: self.client_context.clone(),
        }
    }
}

enum Step {
    ProcessInput,
    CallModel,
    ExecuteTools,
    GenerateResponse(LoopStop),
    Done(LoopStop),
}

/// Per-run values computed once in `ProcessInput`.
struct Prepared {
    system_prompt: String,
    tools: Vec<ToolSchema>,
}

/// The reasoning loop. Shared across runs; all per-run data lives in
/// [`ReasoningState`].
pub struct ReasoningLoop {
    client: Arc<ModelClient>,
    tools: Arc<ToolExecutor>,
    prompt: Arc<PromptAssembler>,
    metrics: Arc<MetricsRegistry>,
    settings: LoopSettings,
}

impl ReasoningLoop {
    pub fn new(
        client: Arc<ModelClient>,
        tools: Arc<ToolExecutor>,
        prompt: Arc<PromptAssembler>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            tools,
            prompt,
            metrics,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Drive one run to completion.
    ///
    /// A model failure ends the loop with the error; the model client has
    /// already put a user-facing [`AgentEvent::Error`] on `events`.
    pub async fn run(
        &self,
        request: RunRequest,
        model_id: String,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, ModelError> {
        let mut state = ReasoningState::new(request, model_id, self.settings.max_iterations);
        let mut prepared = Prepared {
            system_prompt: String::new(),
            tools: Vec::new(),
        };
        let mut step = Step::ProcessInput;

        loop {
            step = match step {
                Step::ProcessInput => {
                    prepared = self.process_input(&state);
                    Step::CallModel
                }
                Step::CallModel => self.call_model(&mut state, &prepared, events, cancel).await?,
                Step::ExecuteTools => self.execute_tools(&mut state, events, cancel).await,
                Step::GenerateResponse(stop) => {
                    events.emit(AgentEvent::TurnComplete).await;
                    Step::Done(stop)
                }
                Step::Done(stop) => {
                    info!(
                        iterations = state.iterations,
                        messages = state.history.len(),
                        stop = stop.as_str(),
                        "Reasoning loop finished"
                    );
                    return Ok(LoopOutcome {
                        history: state.history,
                        iterations: state.iterations,
                        stop,
                    });
                }
            };
        }
    }

    fn process_input(&self, state: &ReasoningState) -> Prepared {
        let declarations = self.tools.list_tools(true, &state.client_tools);
        debug!(
            messages = state.history.len(),
            tools = declarations.len(),
            model_id = %state.model_id,
            "Processing run input"
        );
        Prepared {
            system_prompt: self
                .prompt
                .inject(state.client_state.as_ref(), &state.client_context, &state.client_tools),
            tools: tool_schemas(&declarations),
        }
    }

    async fn call_model(
        &self,
        state: &mut ReasoningState,
        prepared: &Prepared,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Step, ModelError> {
        if cancel.is_cancelled() {
            return Ok(Step::Done(LoopStop::Cancelled));
        }

        let delay = self.settings.pacing_delay(state.iterations);
        if !delay.is_zero() {
            debug!(iterations = state.iterations, delay_ms = delay.as_millis() as u64, "Pacing model call");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Step::Done(LoopStop::Cancelled)),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let at_max = self.settings.at_max_iterations(state.iterations);
        let tools = if at_max {
            warn!(
                iterations = state.iterations,
                max_iterations = state.max_iterations,
                "Iteration limit reached, requesting a final answer without tools"
            );
            let max = state.max_iterations.to_string();
            self.metrics.increment(
                names::MAX_ITERATIONS_REACHED,
                1,
                &[("agent_type", "react"), ("max_iterations", &max)],
            );
            None
        } else {
            Some(prepared.tools.clone())
        };

        let request = ModelRequest {
            model_id: state.model_id.clone(),
            messages: state.history.clone(),
            system_prompt: prepared.system_prompt.clone(),
            tools,
            inference: self.settings.inference,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(iterations = state.iterations, "Run cancelled during model call");
                return Ok(Step::Done(LoopStop::Cancelled));
            }
            response = self.client.request(request, events) => response?,
        };

        let mut text = response.text;
        let mut calls = response.tool_calls;
        if calls.is_empty() && xml_fallback::contains_markup(&text) {
            let parsed = xml_fallback::parse_tool_calls(&text);
            if !parsed.is_empty() {
                warn!(count = parsed.len(), "Recovered tool calls from text markup");
                calls = parsed;
                text = xml_fallback::strip_markup(&text);
            }
        }

        state
            .history
            .push(ConversationMessage::assistant(text, calls.clone()));

        if calls.is_empty() {
            let stop = if at_max { LoopStop::MaxIterations } else { LoopStop::Answered };
            return Ok(Step::GenerateResponse(stop));
        }

        debug!(count = calls.len(), iterations = state.iterations, "Model requested tools");
        state.pending_calls = calls;
        Ok(Step::ExecuteTools)
    }

    async fn execute_tools(&self, state: &mut ReasoningState, events: &EventSink, cancel: &CancellationToken) -> Step {
        if cancel.is_cancelled() {
            return Step::Done(LoopStop::Cancelled);
        }

        let calls = std::mem::take(&mut state.pending_calls);
        let ctx = state.tool_context();
        let outcome = self.tools.execute_batch(calls, &state.history, &ctx, events).await;

        match outcome {
            BatchOutcome::AllRedundant { skipped } => {
                debug!(skipped, "No new tool calls to run");
                state.should_continue = false;
                Step::GenerateResponse(LoopStop::AllRedundant)
            }
            BatchOutcome::Delegated { calls } => {
                info!(count = calls.len(), "Waiting for client tool results");
                state.should_continue = false;
                Step::GenerateResponse(LoopStop::AwaitingClient)
            }
            BatchOutcome::Completed { results, delegated } => {
                for block in &results.content {
                    if let ContentBlock::ToolCallResult { call_id, .. } = block {
                        state.tool_results.insert(call_id.clone(), block.clone());
                    }
                }
                state.history.push(results);
                state.iterations += 1;
                self.metrics.observe(
                    names::ITERATIONS_PER_REQUEST,
                    state.iterations as f64,
                    &[("agent_type", "react")],
                );

                state.should_continue = delegated.is_empty() && state.iterations < state.max_iterations;
                if !delegated.is_empty() {
                    Step::GenerateResponse(LoopStop::AwaitingClient)
                } else if state.should_continue {
                    Step::CallModel
                } else {
                    Step::GenerateResponse(LoopStop::MaxIterations)
                }
            }
        }
    }
}
