//! HTTP surface over the lifecycle manager

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::manager::AgentManager;
use crate::types::AgentRun;

/// Shared handler state
pub struct AppState {
    pub manager: AgentManager,
}

/// Optional symbol in a request body
#[derive(Debug, Default, Deserialize)]
pub struct SymbolRequest {
    #[serde(default)]
    pub symbol: Option<String>,
}

/// `{success, data}` / `{success, error}` envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        })
    }

    fn err(status: StatusCode, error: &str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(error.to_string()),
                message: None,
            }),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

type ApiError = (StatusCode, Json<Envelope<()>>);

/// Build the router with CORS and request tracing
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/agent/run", post(run_agent))
        .route("/api/agents/start", post(start_agent))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/running", get(list_running_agents))
        .route("/api/agents/{id}", get(get_agent))
        .route("/api/agents/{id}/stop", post(stop_agent))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// POST /api/agent/run - run the whole pipeline and return its final state
pub async fn run_agent(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SymbolRequest>>,
) -> Json<Envelope<crate::pipeline::PipelineState>> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    info!("Synchronous run requested for {:?}", request.symbol);
    let result = state.manager.run_once(request.symbol.as_deref()).await;
    Envelope::ok(result)
}

/// POST /api/agents/start - register a background run
pub async fn start_agent(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SymbolRequest>>,
) -> Json<AgentRun> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Json(state.manager.start(request.symbol.as_deref()).await)
}

/// GET /api/agents
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<AgentRun>>> {
    Envelope::ok(state.manager.list().await)
}

/// GET /api/agents/running
pub async fn list_running_agents(
    State(state): State<Arc<AppState>>,
) -> Json<Envelope<Vec<AgentRun>>> {
    Envelope::ok(state.manager.list_running().await)
}

/// GET /api/agents/{id}
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<AgentRun>>, ApiError> {
    match state.manager.get(&id).await {
        Some(run) => Ok(Envelope::ok(run)),
        None => Err(Envelope::err(StatusCode::NOT_FOUND, "Agent not found")),
    }
}

/// POST /api/agents/{id}/stop
pub async fn stop_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    if !state.manager.stop(&id).await {
        return Err(Envelope::err(
            StatusCode::NOT_FOUND,
            "Agent not found or not running",
        ));
    }

    Ok(Json(Envelope {
        success: true,
        data: None,
        error: None,
        message: Some("Agent stopped successfully".to_string()),
    }))
}
