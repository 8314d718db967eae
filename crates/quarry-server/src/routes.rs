use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use chrono::Utc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::require_api_key;
use crate::dto::{
    BatchRequest, BatchResponse, ClearCacheResponse, HealthResponse, MetricsResponse,
    ScrapeRequest, ScrapeResponse,
};
use crate::error::{ApiError, status_for};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/batch", post(batch))
        .route("/v1/metrics", get(metrics))
        .route("/v1/cache", delete(clear_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

/// The body is always the outcome envelope; the status mirrors its error category.
#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Content extracted", body = ScrapeResponse),
        (status = 400, description = "Invalid target or options", body = ScrapeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Throttled by the target", body = ScrapeResponse),
        (status = 502, description = "Target unreachable, blocked or unparseable", body = ScrapeResponse),
        (status = 504, description = "Deadline exceeded", body = ScrapeResponse),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = quarry_core::ScrapeRequest::try_from(body)?;
    let envelope = state.orchestrator.scrape(&request).await;

    let status = envelope.category().map_or(StatusCode::OK, status_for);
    Ok((status, axum::Json(ScrapeResponse::from(envelope))))
}

#[utoipa::path(
    post,
    path = "/v1/batch",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Per-target envelopes in input order", body = BatchResponse),
        (status = 400, description = "Empty or oversized batch", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn batch(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (targets, options) = body.into_parts()?;
    let report = state
        .batch
        .run_batch(&targets, &options, &state.shutdown)
        .await?;

    Ok(axum::Json(BatchResponse::from(report)))
}

// ---------------------------------------------------------------------------
// Service management
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/metrics",
    responses(
        (status = 200, description = "Request, cache and rate limiter statistics", body = MetricsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "service"
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.orchestrator.get_metrics().await;
    Ok(axum::Json(MetricsResponse::try_from(snapshot)?))
}

#[utoipa::path(
    delete,
    path = "/v1/cache",
    responses(
        (status = 200, description = "Cache emptied", body = ClearCacheResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "service"
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.orchestrator.clear_cache();
    tracing::info!(removed = result.removed_count, "Cache cleared via API");
    axum::Json(ClearCacheResponse {
        removed_count: result.removed_count,
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "No fetch strategy available", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let strategies: Vec<String> = state
        .orchestrator
        .available()
        .iter()
        .map(ToString::to_string)
        .collect();

    let (status, label) = if strategies.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else {
        (StatusCode::OK, "healthy")
    };

    let response = HealthResponse {
        status: label,
        version: env!("CARGO_PKG_VERSION"),
        strategies,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    };

    (status, axum::Json(response))
}
