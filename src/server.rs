//! HTTP surface.
//!
//! A thin `axum` router over [`crate::api::Api`]: handlers decode requests,
//! call straight through to the public API, and encode responses. No
//! retrieval logic lives here.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::api::Api;
use crate::error::RetrievalError;

#[derive(Clone)]
struct AppState {
    api: Arc<Api>,
}

pub async fn run_server(api: Arc<Api>, bind_addr: &str) -> anyhow::Result<()> {
    let state = AppState { api };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/retrieval/search", post(handle_search))
        .route("/api/v1/retrieval/search/debug", post(handle_search_debug))
        .route("/api/v1/config/pipelines", get(handle_list_pipelines))
        .route("/api/v1/config/pipelines/{name}", get(handle_get_pipeline))
        .route("/api/v1/config/pipelines/{name}", put(handle_upsert_pipeline))
        .route("/api/v1/config/pipelines/{name}", delete(handle_delete_pipeline))
        .route(
            "/api/v1/config/pipelines/{name}/set-default",
            post(handle_set_default),
        )
        .route(
            "/api/v1/config/pipelines/{name}/validate",
            post(handle_validate_pipeline),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(%bind_addr, "retrieval service listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map each [`RetrievalError`] kind to an HTTP status code.
impl From<RetrievalError> for AppError {
    fn from(e: RetrievalError) -> Self {
        let (status, code) = match &e {
            RetrievalError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "invalid_config"),
            RetrievalError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RetrievalError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            RetrievalError::EmbeddingError { .. } => (StatusCode::BAD_GATEWAY, "embedding_error"),
            RetrievalError::VectorStoreError { .. } => (StatusCode::BAD_GATEWAY, "vector_store_error"),
            RetrievalError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: e.to_string(),
        }
    }
}

// ============ POST /api/v1/retrieval/search(/debug) ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

#[derive(Deserialize)]
struct PipelineQuery {
    pipeline_name: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(q): Query<PipelineQuery>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_config".to_string(),
            message: "query must not be empty".to_string(),
        });
    }
    let resp = state
        .api
        .search(&req.query, q.pipeline_name.as_deref())
        .await?;
    Ok(Json(resp))
}

async fn handle_search_debug(
    State(state): State<AppState>,
    Query(q): Query<PipelineQuery>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_config".to_string(),
            message: "query must not be empty".to_string(),
        });
    }
    let resp = state
        .api
        .search_debug(&req.query, q.pipeline_name.as_deref())
        .await?;
    Ok(Json(resp))
}

// ============ Admin pipeline CRUD ============

async fn handle_list_pipelines(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.api.list_pipelines().await?;
    Ok(Json(serde_json::json!({
        "default": snapshot.default,
        "pipelines": snapshot.pipeline_names,
    })))
}

async fn handle_get_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let config = state.api.get_pipeline(Some(&name)).await?;
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| RetrievalError::Internal(format!("failed to render yaml: {e}")))?;
    Ok(yaml)
}

#[derive(Deserialize)]
struct UpsertRequest {
    yaml: String,
}

async fn handle_upsert_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    // Accept either a raw YAML body or a `{"yaml": "..."}` JSON envelope.
    let yaml = match serde_json::from_str::<UpsertRequest>(&body) {
        Ok(req) => req.yaml,
        Err(_) => body,
    };
    let config = state.api.upsert_pipeline(&name, &yaml).await?;
    let rendered = serde_yaml::to_string(&config)
        .map_err(|e| RetrievalError::Internal(format!("failed to render yaml: {e}")))?;
    Ok(rendered)
}

async fn handle_delete_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.api.delete_pipeline(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_set_default(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.api.set_default_pipeline(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_validate_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.api.validate_pipeline(Some(&name)).await?;
    Ok(Json(serde_json::json!({
        "ok": report.ok,
        "errors_by_field": report.errors_by_field,
    })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    pipelines_available: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.api.list_pipelines().await {
        Ok(snapshot) => Json(HealthResponse {
            status: "healthy".to_string(),
            pipelines_available: snapshot.pipeline_names.len(),
        }),
        Err(_) => Json(HealthResponse {
            status: "unhealthy".to_string(),
            pipelines_available: 0,
        }),
    }
}
