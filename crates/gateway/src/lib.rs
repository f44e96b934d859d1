//! HTTP gateway for Reagent.
//!
//! `POST /` accepts an AG-UI run input and answers with a server-sent event
//! stream of protocol events. The routes under `/api` expose the runtime:
//! tool listing, run cancellation, and the default model.
//!
//! Built on Axum; CORS, request tracing and the body limit come from
//! `tower-http` layers.

pub mod api;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use reagent_agent::{Agent, AgentRuntime};
use reagent_audit::HttpRequestMeta;
use reagent_config::{AppConfig, GatewayConfig};
use reagent_core::ValidationError;
use reagent_core::run::validate_run_input;
use reagent_providers::ModelResolver;
use reagent_telemetry::MetricsRegistry;
use reagent_tools::ToolExecutor;

/// Shared state behind every route.
pub struct GatewayState {
    pub runtime: Arc<AgentRuntime>,
    pub tools: Arc<ToolExecutor>,
    pub resolver: Arc<ModelResolver>,
    pub metrics: Arc<MetricsRegistry>,
    pub backend_name: String,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            runtime: agent.runtime.clone(),
            tools: agent.tools.clone(),
            resolver: agent.resolver.clone(),
            metrics: agent.metrics.clone(),
            backend_name: agent.backend_name.clone(),
            start_time: Utc::now(),
        }
    }
}

/// Build the router with all routes and layers.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/", post(run_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/runs/{thread_id}/{run_id}/cancel", post(api::cancel_handler))
        .route("/api/info", get(api::info_handler))
        .route("/api/tools", get(api::tools_handler))
        .route("/api/model/default", get(api::get_default_model_handler))
        .route("/api/model/default", put(api::set_default_model_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Any origin when none are configured, otherwise exactly the listed ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

/// Bind and serve until Ctrl-C.
pub async fn serve(agent: Agent, config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_agent(&agent));
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, model = %agent.resolver.default_model(), "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

/// `POST /`: run the agent and stream its protocol events.
///
/// Invalid input, malformed JSON included, is answered with `400` and the
/// `RUN_ERROR` event as the JSON body; no stream is opened.
async fn run_handler(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            let error = ValidationError {
                errors: vec![format!("request body is not valid JSON: {e}")],
            };
            let event = state.runtime.reject(&Value::Null, &error);
            return (StatusCode::BAD_REQUEST, Json(event)).into_response();
        }
    };

    let request = match validate_run_input(&raw) {
        Ok(request) => request,
        Err(error) => {
            let event = state.runtime.reject(&raw, &error);
            return (StatusCode::BAD_REQUEST, Json(event)).into_response();
        }
    };

    state.runtime.log_http_request(
        &request.thread_id,
        &request.run_id,
        HttpRequestMeta {
            method: "POST".into(),
            path: "/".into(),
            user_agent: header_str(&headers, header::USER_AGENT).map(str::to_string),
            content_length: header_str(&headers, header::CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            message_count: request.messages.len(),
            tool_count: request.client_tools.len(),
        },
    );

    let events = ReceiverStream::new(state.runtime.start(request)).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}
