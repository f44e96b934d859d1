//! The Reagent agent: a ReAct reasoning loop and the run boundary around it.
//!
//! A run flows through three layers:
//!
//! 1. [`AgentRuntime`] validates the request, registers the run and owns
//!    its cancellation token.
//! 2. [`ReasoningLoop`] alternates model calls and tool rounds, emitting
//!    [`AgentEvent`](reagent_core::event::AgentEvent)s as it goes.
//! 3. [`StreamingProtocolAdapter`] turns those events into the protocol
//!    stream the client reads, auditing every event it sends.
//!
//! [`AgentBuilder`] wires a runtime from an [`AppConfig`](reagent_config::AppConfig).

pub mod adapter;
pub mod builder;
pub mod prompt;
pub mod react;
pub mod runtime;
pub mod state_delta;

#[cfg(test)]
mod test_helpers;

pub use adapter::{RunEnd, StreamingProtocolAdapter, ToolMetrics};
pub use builder::{Agent, AgentBuilder};
pub use prompt::PromptAssembler;
pub use react::{LoopOutcome, LoopSettings, LoopStop, ReasoningLoop, ReasoningState};
pub use runtime::AgentRuntime;
