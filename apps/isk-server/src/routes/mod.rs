mod auth;
mod catalog;
mod displays;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::SyncError;
use crate::state::AppState;
use crate::websocket::websocket_handler;

pub use auth::Authenticated;
pub use catalog::*;
pub use displays::*;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(websocket_handler))
        .route("/displays", get(list_displays))
        .route(
            "/displays/:display_id/override",
            get(get_override_queue).post(enqueue_override),
        )
        .route("/displays/:display_id/override/skip", post(skip_override))
        .route("/events", post(create_event))
        .route("/events/:event_id/current", post(set_current_event))
        .route("/groups", post(create_group))
        .route("/groups/:group_id", get(get_group).delete(destroy_group))
        .route("/groups/:group_id/adopt", post(adopt_slides))
        .route("/groups/:group_id/sort", post(sort_slide))
        .route("/groups/:group_id/publish", post(publish_slides))
        .route("/groups/:group_id/hide", post(hide_slides))
        .route("/groups/:group_id/override", post(enqueue_group_override))
        .route("/slides", post(create_slide))
        .route("/slides/:slide_id", get(get_slide))
        .route("/slides/:slide_id/clone", post(clone_slide))
        .route("/slides/:slide_id/fetch", post(refetch_slide))
        .route("/slides/:slide_id/ready", post(mark_slide_ready))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.render_metrics(),
    )
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    NotFound(String),
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    success: bool,
    error: &'a str,
    message: String,
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            SyncError::PermissionDenied => ApiError::Forbidden,
            SyncError::Validation(_) | SyncError::Protocol(_) | SyncError::OverrideActive(_) => {
                ApiError::BadRequest(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or unknown token".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "permission_denied",
                "permission denied".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };
        (
            status,
            Json(ApiErrorBody {
                success: false,
                error,
                message,
            }),
        )
            .into_response()
    }
}
