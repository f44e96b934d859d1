//! Model backends and the model client for Reagent.
//!
//! Backends implement [`reagent_core::ModelBackend`]; the [`ModelClient`]
//! sits on top of one and adds retries, event classification, and tool
//! input assembly. [`ModelResolver`] decides which model id a run uses.

pub mod anthropic;
pub mod client;
pub mod resolver;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use anthropic::AnthropicBackend;
pub use client::{ModelClient, ModelRequest, ModelResponse, prepare_messages};
pub use resolver::ModelResolver;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedBackend, ScriptedTurn};
