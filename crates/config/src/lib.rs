//! Configuration loading, validation, and management for Reagent.
//!
//! Loads configuration from `~/.reagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.reagent/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model backend settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Throttling retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Tool execution settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Audit log settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool rounds allowed per run before a textual answer is forced
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Custom system prompt template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<PathBuf>,

    /// Pacing delay added per iteration before each model call
    #[serde(default = "default_pacing_step_ms")]
    pub pacing_step_ms: u64,

    #[serde(default = "default_pacing_cap_ms")]
    pub pacing_cap_ms: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_pacing_step_ms() -> u64 {
    500
}
fn default_pacing_cap_ms() -> u64 {
    5000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            system_prompt_path: None,
            pacing_step_ms: default_pacing_step_ms(),
            pacing_cap_ms: default_pacing_cap_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Used when a request does not name a model
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the backend base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_model: default_model(),
            api_key: None,
            api_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("default_model", &self.default_model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_jitter_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Identical failing calls allowed before the breaker opens
    #[serde(default = "default_breaker_max_failures")]
    pub breaker_max_failures: u32,

    #[serde(default = "default_breaker_reset_secs")]
    pub breaker_reset_secs: u64,

    /// Characters of a tool result replayed to the model
    #[serde(default = "default_result_char_budget")]
    pub result_char_budget: usize,
}

fn default_breaker_max_failures() -> u32 {
    3
}
fn default_breaker_reset_secs() -> u64 {
    300
}
fn default_result_char_budget() -> usize {
    5000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            breaker_max_failures: default_breaker_max_failures(),
            breaker_reset_secs: default_breaker_reset_secs(),
            result_char_budget: default_result_char_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding one JSONL file per thread
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,

    /// Content fields longer than this are truncated in audit records
    #[serde(default = "default_content_limit")]
    pub content_limit: usize,
}

fn default_true() -> bool {
    true
}
fn default_audit_dir() -> PathBuf {
    AppConfig::config_dir().join("audit")
}
fn default_content_limit() -> usize {
    1000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_audit_dir(),
            content_limit: default_content_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location (`~/.reagent/config.toml`),
    /// then apply environment overrides:
    /// - `REAGENT_API_KEY`, then `ANTHROPIC_API_KEY` (only when no key is configured)
    /// - `REAGENT_MODEL`
    /// - `REAGENT_SYSTEM_PROMPT`
    /// - `REAGENT_MAX_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.model.api_key.is_none() {
            self.model.api_key = var("REAGENT_API_KEY").or_else(|| var("ANTHROPIC_API_KEY"));
        }
        if let Some(model) = var("REAGENT_MODEL") {
            self.model.default_model = model;
        }
        if let Some(path) = var("REAGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt_path = Some(PathBuf::from(path));
        }
        if let Some(n) = var("REAGENT_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.agent.max_iterations = n;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reagent")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.tools.breaker_max_failures == 0 {
            return Err(ConfigError::ValidationError(
                "tools.breaker_max_failures must be at least 1".into(),
            ));
        }

        if self.tools.result_char_budget == 0 {
            return Err(ConfigError::ValidationError(
                "tools.result_char_budget must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Render the effective configuration as TOML with secrets removed.
    pub fn redacted_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.tools.breaker_max_failures, 3);
        assert_eq!(config.tools.result_char_budget, 5000);
        assert_eq!(config.audit.content_limit, 1000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.default_model, config.model.default_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_iterations = 4\n\n[tools]\nresult_char_budget = 200\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.max_tokens, 4096);
        assert_eq!(config.tools.result_char_budget, 200);
        assert_eq!(config.tools.breaker_reset_secs, 300);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.agent.temperature = 5.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tools.result_char_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unparseable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_iterations = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.provider, "anthropic");
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("REAGENT_MODEL", "claude-haiku"),
            ("REAGENT_MAX_ITERATIONS", "3"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.default_model, "claude-haiku");
        assert_eq!(config.agent.max_iterations, 3);
    }

    #[test]
    fn configured_key_wins_over_env() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("from-file".into());
        config.apply_env(|k| (k == "REAGENT_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn secrets_are_redacted() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-secret".into());
        assert!(!format!("{config:?}").contains("sk-secret"));
        let shown = config.redacted_toml();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("[REDACTED]"));
    }
}
