use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, warn};

use super::{ApiKeyConfig, AuthError};
use crate::web::handlers::ApiResponse;

/// Rejects requests without the master key. Mount it with
/// `middleware::from_fn_with_state` on every router that needs it.
pub async fn require_api_key(
    State(config): State<Arc<ApiKeyConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(config.header_name.as_str())
        .and_then(|value| value.to_str().ok());

    if let Err(e) = config.verify(presented) {
        match e {
            AuthError::MasterKeyNotConfigured => error!("API key auth enabled but master key is missing"),
            _ => warn!(path = %request.uri().path(), "Rejected request: {}", e),
        }
        return (e.status(), Json(ApiResponse::<()>::error(e.to_string()))).into_response();
    }

    next.run(request).await
}
