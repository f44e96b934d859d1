//! Metrics for Reagent.
//!
//! A small in-process registry of counters and histograms. Components receive
//! an `Arc<MetricsRegistry>` at construction; the gateway exposes it in
//! Prometheus text format.

pub mod metrics;

pub use metrics::{HistogramSnapshot, MetricsRegistry};

/// Names of the metrics emitted by the runtime.
pub mod names {
    /// Model calls made with tools withheld because the iteration cap was reached
    pub const MAX_ITERATIONS_REACHED: &str = "react_agent_max_iterations_reached_total";
    /// Tool rounds completed per run
    pub const ITERATIONS_PER_REQUEST: &str = "react_agent_iterations_per_request";
    /// Tool calls skipped because history already held their results
    pub const REDUNDANT_TOOL_CALLS: &str = "react_agent_redundant_tool_calls_total";
    /// Retries after a throttled model call
    pub const THROTTLE_RETRIES: &str = "model_client_throttle_retries_total";
    /// Calls refused by an open circuit breaker
    pub const CIRCUIT_BREAKER_OPEN: &str = "tool_circuit_breaker_open_total";
    /// Completed runs by outcome
    pub const RUNS: &str = "agent_runs_total";
    pub const MODEL_INPUT_TOKENS: &str = "model_input_tokens_total";
    pub const MODEL_OUTPUT_TOKENS: &str = "model_output_tokens_total";
}
