mod admin;
mod credit;
mod jobs;
mod nodes;

use std::path::PathBuf;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::warn;

use crate::state::AppState;
use crate::websocket::ws_handler;

pub use admin::CreateCustomerResponse;
pub use credit::CreditedKey;
pub use jobs::JobRequest;
pub use nodes::{JobSummary, NodeSummary};

/// Directories served as static content. Missing entries are not mounted.
#[derive(Debug, Clone, Default)]
pub struct StaticDirs {
    pub web: Option<PathBuf>,
    pub downloads: Option<PathBuf>,
}

pub fn build_router(state: AppState, dirs: StaticDirs) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/jobs", post(jobs::submit_job))
        .route("/api/nodes", get(nodes::list_nodes))
        .route("/api/jobs", get(nodes::list_jobs))
        .route("/api/admin/create-customer", post(admin::create_customer))
        .with_state(state);

    if let Some(dir) = dirs.downloads {
        router = router.nest_service("/downloads", ServeDir::new(dir));
    }
    if let Some(dir) = dirs.web {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.render_metrics(),
    )
        .into_response()
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    PaymentRequired,
    BadRequest(String),
    ServiceUnavailable(&'static str),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                Some("missing or invalid API key".to_string()),
            ),
            ApiError::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_required",
                Some("insufficient credits".to_string()),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                Some(msg.to_string()),
            ),
            ApiError::Internal(msg) => {
                warn!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    Some(msg),
                )
            }
        };
        (status, Json(ApiErrorBody { error, message })).into_response()
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
