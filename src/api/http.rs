use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::service::GraphService;
use super::types::{ErrorBody, ExpandBody, GenerateBody, GraphParams, HealthResponse, JobAccepted, PathParams};
use crate::config::HttpServerConfig;
use crate::error::{Result, XkgError};

/// Service error rendered as `{"error": ...}` with a matching status.
pub struct ApiError(XkgError);

impl From<XkgError> for ApiError {
    fn from(error: XkgError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            XkgError::InvalidInput(_) | XkgError::Planning(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// All routes under `/api`, with tracing and CORS applied.
pub fn router(service: Arc<GraphService>, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> =
            allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/graph/generate", post(handle_generate))
        .route("/api/graph/expand", post(handle_expand))
        .route("/api/graph/:concept", get(handle_graph))
        .route("/api/graph/:concept/path", get(handle_path))
        .route("/api/job/:job_id", get(handle_job))
        .route("/api/history", get(handle_history))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(service)
}

/// Bind and serve until the listener fails.
pub async fn serve(service: Arc<GraphService>, config: &HttpServerConfig) -> Result<()> {
    let app = router(service, &config.allowed_origins);
    let addr = format!("{}:{}", config.bind, config.port);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        XkgError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to bind to {}: {}", addr, e),
        ))
    })?;
    log::info!("Serving xkg API on http://{}/api", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| XkgError::Io(std::io::Error::other(format!("HTTP server error: {}", e))))
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "xkg".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_generate(
    State(service): State<Arc<GraphService>>,
    Json(body): Json<GenerateBody>,
) -> std::result::Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job_id = service.submit_generation(body).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

async fn handle_job(State(service): State<Arc<GraphService>>, Path(job_id): Path<String>) -> ApiResult<crate::jobs::Job> {
    Ok(Json(service.job(&job_id).await?))
}

async fn handle_graph(
    State(service): State<Arc<GraphService>>,
    Path(concept): Path<String>,
    Query(params): Query<GraphParams>,
) -> ApiResult<crate::graph::GraphResult> {
    Ok(Json(service.graph(&concept, params.depth, params.version).await?))
}

async fn handle_path(
    State(service): State<Arc<GraphService>>,
    Path(concept): Path<String>,
    Query(params): Query<PathParams>,
) -> ApiResult<super::types::PathResponse> {
    Ok(Json(
        service
            .path(&concept, &params.from, &params.to, params.version)
            .await?,
    ))
}

async fn handle_expand(
    State(service): State<Arc<GraphService>>,
    Json(body): Json<ExpandBody>,
) -> ApiResult<crate::graph::GraphResult> {
    Ok(Json(service.expand(body).await?))
}

async fn handle_history(State(service): State<Arc<GraphService>>) -> ApiResult<Vec<crate::jobs::JobSummary>> {
    Ok(Json(service.history().await?))
}
