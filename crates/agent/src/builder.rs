//! Bootstrap: wire configuration, backend, tool providers and audit sinks
//! into a ready [`AgentRuntime`].

use std::sync::Arc;

use reagent_audit::{AuditLogger, AuditSink, JsonlFileSink};
use reagent_config::AppConfig;
use reagent_core::error::{Error, ModelError};
use reagent_core::model::ModelBackend;
use reagent_core::tool::ToolProvider;
use reagent_providers::{AnthropicBackend, ModelClient, ModelResolver};
use reagent_telemetry::MetricsRegistry;
use reagent_tools::{BUILTIN_PROVIDER, ToolExecutor, builtin_provider};
use tracing::info;

use crate::prompt::{PromptAssembler, load_template_file};
use crate::react::{LoopSettings, ReasoningLoop};
use crate::runtime::AgentRuntime;

/// The assembled agent and the shared components other surfaces read.
pub struct Agent {
    pub runtime: Arc<AgentRuntime>,
    pub tools: Arc<ToolExecutor>,
    pub resolver: Arc<ModelResolver>,
    pub metrics: Arc<MetricsRegistry>,
    pub prompt: Arc<PromptAssembler>,
    pub backend_name: String,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    config: AppConfig,
    backend: Option<Arc<dyn ModelBackend>>,
    providers: Vec<(String, Arc<dyn ToolProvider>)>,
    audit_sinks: Vec<Arc<dyn AuditSink>>,
    builtin_tools: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backend: None,
            providers: Vec::new(),
            audit_sinks: Vec::new(),
            builtin_tools: true,
        }
    }

    /// Use this backend instead of the one named in the configuration.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Connect an additional tool provider under `name`.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    /// Write audit records to `sink` as well as any configured sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sinks.push(sink);
        self
    }

    pub fn without_builtin_tools(mut self) -> Self {
        self.builtin_tools = false;
        self
    }

    pub async fn build(self) -> Result<Agent, Error> {
        let config = self.config;
        config.validate().map_err(|e| Error::Config { message: e.to_string() })?;

        let metrics = Arc::new(MetricsRegistry::new());

        let backend: Arc<dyn ModelBackend> = match self.backend {
            Some(backend) => backend,
            None => match config.model.provider.as_str() {
                "anthropic" => Arc::new(AnthropicBackend::from_config(&config.model)?),
                other => {
                    return Err(ModelError::NotConfigured(format!("unknown model provider: {other}")).into());
                }
            },
        };
        let backend_name = backend.name().to_string();
        let client = Arc::new(ModelClient::new(backend, config.retry.clone(), metrics.clone()));

        let mut tools = ToolExecutor::new(config.tools.clone(), metrics.clone());
        if self.builtin_tools {
            tools.connect(BUILTIN_PROVIDER, Arc::new(builtin_provider())).await?;
        }
        for (name, provider) in self.providers {
            tools.connect(&name, provider).await?;
        }
        let tools = Arc::new(tools);

        let prompt = Arc::new(PromptAssembler::new());
        prompt.load_base(config.agent.system_prompt_path.as_deref().and_then(load_template_file));
        prompt.set_tools(&tools.list_tools(false, &[]));

        let mut audit = AuditLogger::new().with_content_limit(config.audit.content_limit);
        if config.audit.enabled {
            audit = audit.with_sink(Arc::new(JsonlFileSink::new(&config.audit.dir)));
        }
        for sink in self.audit_sinks {
            audit = audit.with_sink(sink);
        }

        let settings = LoopSettings::from_config(&config.agent);
        let reasoning = ReasoningLoop::new(client, tools.clone(), prompt.clone(), metrics.clone()).with_settings(settings);
        let resolver = Arc::new(ModelResolver::new(config.model.default_model.clone()));

        info!(
            backend = %backend_name,
            model = %config.model.default_model,
            connections = ?tools.connection_names(),
            max_iterations = settings.max_iterations,
            pacing_cap_ms = settings.pacing_cap.as_millis() as u64,
            audit = config.audit.enabled,
            "Agent runtime ready"
        );

        let runtime = Arc::new(AgentRuntime::new(
            reasoning,
            resolver.clone(),
            Arc::new(audit),
            metrics.clone(),
        ));

        Ok(Agent {
            runtime,
            tools,
            resolver,
            metrics,
            prompt,
            backend_name,
        })
    }
}
