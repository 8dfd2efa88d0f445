use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::require_api_key;
use crate::error::TaskError;
use crate::AppContext;

pub mod download;
pub mod tasks;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let protected = Router::new()
        .merge(download::download_router(ctx.clone()))
        .merge(tasks::tasks_router(ctx.clone()))
        .layer(middleware::from_fn_with_state(ctx.auth.clone(), require_api_key));

    Router::new()
        .route("/health", get(tasks::health))
        .with_state(ctx)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

pub fn status_for(err: &TaskError) -> StatusCode {
    match err {
        TaskError::InvalidInput(_) | TaskError::NotReady { .. } => StatusCode::BAD_REQUEST,
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::Gone(_) => StatusCode::GONE,
        TaskError::RetryLimitExceeded { .. } => StatusCode::CONFLICT,
        TaskError::Adapter(_) => StatusCode::BAD_GATEWAY,
        TaskError::Persistence(_)
        | TaskError::Io(_)
        | TaskError::Serialization(_)
        | TaskError::Archive(_)
        | TaskError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let message = match status {
            StatusCode::BAD_GATEWAY => {
                error!("Upstream failure: {}", self);
                "Upstream service failure".to_string()
            }
            s if s.is_server_error() => {
                error!("Request failed: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
