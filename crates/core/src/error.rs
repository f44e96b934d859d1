//! Error types for the Reagent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; tool-level errors are
//! recoverable (they become tool-result text for the model), model and
//! validation errors terminate the run.

use thiserror::Error;

/// The top-level error type for all Reagent operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model backend errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Run input validation ---
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Shown to end users once throttling retries are exhausted.
pub const HIGH_DEMAND_MESSAGE: &str =
    "The AI service is currently experiencing high demand. Please wait a moment and try again.";

/// Shown to end users when the backend rejects our credentials.
pub const CREDENTIALS_EXPIRED_MESSAGE: &str =
    "Model credentials expired. Please refresh your credentials and try again.";

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Throttled by model backend: {0}")]
    Throttled(String),

    #[error("Credentials expired: {0}")]
    CredentialsExpired(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model backend not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    /// Rate limiting shows up as an explicit throttle, an HTTP 429, or a
    /// "too many tokens" complaint buried in an otherwise generic message.
    pub fn is_throttling(&self) -> bool {
        match self {
            Self::Throttled(_) => true,
            Self::ApiError { status_code: 429, .. } => true,
            Self::ApiError { message, .. }
            | Self::StreamInterrupted(message)
            | Self::Network(message) => message.to_lowercase().contains("too many tokens"),
            _ => false,
        }
    }

    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, Self::CredentialsExpired(_))
    }

    /// Text suitable for showing to the end user of the conversation.
    pub fn user_message(&self) -> String {
        if self.is_throttling() {
            HIGH_DEMAND_MESSAGE.to_string()
        } else if self.is_credentials_expired() {
            CREDENTIALS_EXPIRED_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    /// The `RUN_ERROR` code reported for a run that this error terminated.
    pub fn code(&self) -> &'static str {
        if self.is_throttling() {
            "MODEL_THROTTLED"
        } else if self.is_credentials_expired() {
            "CREDENTIALS_EXPIRED"
        } else if matches!(self, Self::StreamInterrupted(_)) {
            "STREAM_ERROR"
        } else {
            "MODEL_ERROR"
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("{}", missing_parameters_message(.tool, .missing, .required, .provided, .max_failures))]
    MissingParameters {
        tool: String,
        missing: Vec<String>,
        required: Vec<String>,
        provided: Vec<String>,
        max_failures: u32,
    },

    #[error("{}", circuit_open_message(.tool, .attempts, .input, .remaining_minutes))]
    CircuitBreakerOpen {
        tool: String,
        attempts: u32,
        input: String,
        remaining_minutes: u64,
    },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

fn missing_parameters_message(
    tool: &str,
    missing: &[String],
    required: &[String],
    provided: &[String],
    max_failures: &u32,
) -> String {
    let provided = if provided.is_empty() {
        "no parameters".to_string()
    } else {
        provided.join(", ")
    };
    let example = missing
        .iter()
        .map(|p| format!("{p}: \"appropriate_value\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "PARAMETER VALIDATION FAILED for tool \"{tool}\":\n\n\
         Missing required parameters: {missing}\n\n\
         Tool schema shows these are required: {required}\n\
         You provided: {provided}\n\n\
         SELF-CORRECTION NEEDED:\n\
         1. Review the tool description for parameter requirements\n\
         2. Identify the missing parameter values from context or ask the user\n\
         3. Retry the tool call with ALL required parameters\n\n\
         Example correct usage would include: {example}\n\n\
         WARNING: This failure has been recorded. After {max_failures} identical failures, \
         this parameter combination will be temporarily blocked.",
        missing = missing.join(", "),
        required = required.join(", "),
    )
}

fn circuit_open_message(tool: &str, attempts: &u32, input: &str, remaining_minutes: &u64) -> String {
    format!(
        "CIRCUIT BREAKER ACTIVATED for tool \"{tool}\":\n\n\
         This exact tool call has failed {attempts} times with identical parameters.\n\
         To prevent infinite loops, this combination is temporarily blocked.\n\n\
         Parameters attempted: {input}\n\n\
         RECOVERY OPTIONS:\n\
         1. Modify the parameters (different values, additional context)\n\
         2. Ask the user for clarification on the correct parameter values\n\
         3. Wait {remaining_minutes} minutes for automatic reset"
    )
}

/// A run request that failed structural validation.
///
/// Carries every problem found, not just the first one.
#[derive(Debug, Clone, Error)]
#[error("Input validation failed: {}", .errors.join(", "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}
