//! Tool execution for Reagent.
//!
//! The [`ToolExecutor`] fronts every connected [`ToolProvider`]: it resolves
//! qualified names, validates required parameters, refuses repeated
//! identical failures through a circuit breaker, and runs the batches a
//! model response asks for. Built-in tools are served in-process by a
//! [`LocalToolProvider`].
//!
//! [`ToolProvider`]: reagent_core::ToolProvider

pub mod breaker;
pub mod current_time;
pub mod executor;
pub mod local;
pub mod truncate;
pub mod xml_fallback;

pub use breaker::{CircuitBreaker, canonical_json, input_hash};
pub use executor::{BatchOutcome, ToolExecutor, tool_schemas};
pub use local::LocalToolProvider;
pub use truncate::truncate_tool_result;

/// Connection name of the built-in provider.
pub const BUILTIN_PROVIDER: &str = "builtin";

/// A provider serving every built-in tool.
pub fn builtin_provider() -> LocalToolProvider {
    LocalToolProvider::new(BUILTIN_PROVIDER).with_tool(Box::new(current_time::CurrentTimeTool))
}
