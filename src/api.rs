//! REST API server for the research agent
//!
//! Exposes the orchestrator and each pattern via HTTP endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::ResearchOrchestrator;
use crate::error::OrchestrationError;
use crate::routing::ContentItem;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResearchRequest {
    pub ticker: String,
    #[serde(default)]
    pub user_context: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphRequest {
    pub seed: String,
    pub max_depth: Option<u32>,
    /// Also ask the content service for a narrative around the seed.
    #[serde(default)]
    pub narrate: bool,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    #[serde(default)]
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRouteRequest {
    pub items: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    pub raw_news: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "api".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub ticker: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub max_iterations: Option<u32>,
    pub quality_threshold: Option<f64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn status_for(error: &OrchestrationError) -> StatusCode {
    match error {
        OrchestrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::SchemaViolation { .. }
        | OrchestrationError::ContentService(_)
        | OrchestrationError::PlanFailure(_)
        | OrchestrationError::StageFailed { .. } => StatusCode::BAD_GATEWAY,
        OrchestrationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(action: &str, result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            warn!(action, error = %e, "Request failed");
            (status_for(&e), Json(ApiResponse::error(format!("{} failed: {}", action, e))))
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ResearchOrchestrator>,
}

/// =============================
/// Handlers
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "memory_backend": state.orchestrator.memory_backend(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn research(State(state): State<ApiState>, Json(req): Json<ResearchRequest>) -> ApiResult {
    info!(ticker = %req.ticker, "Received research request");
    respond(
        "Research",
        state.orchestrator.research_stock(&req.ticker, &req.user_context).await,
    )
}

async fn expand_graph(State(state): State<ApiState>, Json(req): Json<GraphRequest>) -> ApiResult {
    let orchestrator = &state.orchestrator;
    let max_depth = req.max_depth.unwrap_or(orchestrator.settings().graph_max_depth);

    let result = async {
        let graph = orchestrator.expand_graph(&req.seed, max_depth).await?;
        let summary = orchestrator.summarize_graph(&graph);
        let narrative = if req.narrate {
            Some(orchestrator.narrate_graph(&graph, &req.seed).await?)
        } else {
            None
        };
        Ok::<_, OrchestrationError>(serde_json::json!({
            "entities": graph.entities(),
            "relationships": graph.relationship_views(),
            "summary": summary,
            "narrative": narrative,
        }))
    }
    .await;

    respond("Graph expansion", result)
}

async fn route(State(state): State<ApiState>, Json(req): Json<RouteRequest>) -> ApiResult {
    let item = ContentItem::new(req.title, req.content);
    respond("Routing", state.orchestrator.route_item(&item).await)
}

async fn route_batch(State(state): State<ApiState>, Json(req): Json<BatchRouteRequest>) -> ApiResult {
    respond("Batch routing", state.orchestrator.route_batch(&req.items).await)
}

async fn pipeline(State(state): State<ApiState>, Json(req): Json<PipelineRequest>) -> ApiResult {
    respond("Pipeline", state.orchestrator.run_pipeline(&req.raw_news, &req.source).await)
}

async fn evaluate(State(state): State<ApiState>, Json(req): Json<EvaluateRequest>) -> ApiResult {
    let settings = state.orchestrator.settings();
    let result = state
        .orchestrator
        .run_evaluator_optimizer(
            &req.ticker.trim().to_uppercase(),
            &req.data,
            req.max_iterations.unwrap_or(settings.eo_max_iterations),
            req.quality_threshold.unwrap_or(settings.eo_quality_threshold),
        )
        .await;
    respond("Evaluation", result)
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<ResearchOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/research", post(research))
        .route("/api/graph/expand", post(expand_graph))
        .route("/api/route", post(route))
        .route("/api/route/batch", post(route_batch))
        .route("/api/pipeline", post(pipeline))
        .route("/api/evaluate", post(evaluate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<ResearchOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
