//! Runtime API: cancellation, info, tools, and the default model.
//!
//! - `POST /runs/{thread_id}/{run_id}/cancel`
//! - `GET  /api/info`
//! - `GET  /api/tools`
//! - `GET  /api/model/default`, `PUT /api/model/default`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use reagent_core::tool::ToolOrigin;

use crate::SharedState;

#[derive(Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel_handler(
    State(state): State<SharedState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> Json<CancelResponse> {
    let cancelled = state.runtime.cancel(&thread_id, &run_id);
    info!(thread_id = %thread_id, run_id = %run_id, cancelled, "Cancel requested");
    Json(CancelResponse { cancelled })
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub default_model: String,
    pub connections: Vec<String>,
    pub tool_count: usize,
    pub active_runs: usize,
    pub uptime_secs: u64,
}

pub async fn info_handler(State(state): State<SharedState>) -> Json<InfoResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    Json(InfoResponse {
        name: "reagent".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        backend: state.backend_name.clone(),
        default_model: state.resolver.default_model(),
        connections: state.tools.connection_names().into_iter().map(String::from).collect(),
        tool_count: state.tools.list_tools(false, &[]).len(),
        active_runs: state.runtime.active_runs(),
        uptime_secs: uptime,
    })
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDto {
    /// Name as the model sees it (`provider__tool`)
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub provider: String,
}

#[derive(Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

/// Server tools only; client tools exist per run.
pub async fn tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolDto> = state
        .tools
        .list_tools(false, &[])
        .into_iter()
        .map(|decl| ToolDto {
            name: decl.qualified_name(),
            provider: match &decl.origin {
                ToolOrigin::Server { provider } => provider.clone(),
                ToolOrigin::Client => "client".into(),
            },
            description: decl.description,
            input_schema: decl.input_schema,
        })
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultModel {
    pub model_id: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn get_default_model_handler(State(state): State<SharedState>) -> Json<DefaultModel> {
    Json(DefaultModel {
        model_id: state.resolver.default_model(),
    })
}

/// Applies to runs started after the change.
pub async fn set_default_model_handler(
    State(state): State<SharedState>,
    Json(payload): Json<DefaultModel>,
) -> Result<Json<DefaultModel>, (StatusCode, Json<ErrorResponse>)> {
    let model_id = payload.model_id.trim();
    if model_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "modelId must not be empty".into(),
            }),
        ));
    }

    state.resolver.set_default(model_id);
    Ok(Json(DefaultModel {
        model_id: model_id.to_string(),
    }))
}
