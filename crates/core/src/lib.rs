//! # Reagent Core
//!
//! Domain types, traits, and error definitions for the Reagent ReAct agent
//! runtime. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here ([`ModelBackend`], [`ToolProvider`],
//! [`Tool`]); implementations live in their respective crates. Data crossing
//! the run boundary is validated once ([`run::validate_run_input`]) and
//! represented by closed tagged unions afterwards.

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod protocol;
pub mod run;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, ToolError, ValidationError};
pub use event::{AgentEvent, EventSink};
pub use message::{ContentBlock, ConversationMessage, Role};
pub use model::{
    BlockDelta, BlockKind, ConverseChunk, ConverseRequest, ConverseStream, InferenceConfig,
    ModelBackend, StopReason, ToolSchema, Usage,
};
pub use protocol::{ProtocolEvent, ProtocolEventKind};
pub use run::{RunRequest, validate_run_input};
pub use tool::{Tool, ToolCall, ToolCallContext, ToolDeclaration, ToolOrigin, ToolOutput, ToolProvider};
