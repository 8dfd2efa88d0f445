use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::ApiResponse;
use crate::error::TaskError;
use crate::schedule::{FormatParams, JobKind, SubmitOutcome, SubmitRequest, Submission};
use crate::AppContext;

pub fn download_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/download", post(submit_video))
        .route("/audio", post(submit_audio))
        .route("/subtitles", post(submit_subtitles))
        .with_state(ctx)
}

/// Body shared by the submit endpoints. The kind-specific fields are read
/// into [`FormatParams`], with its defaults for anything left out.
#[derive(Debug, Deserialize)]
struct SubmitBody {
    url: String,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(flatten)]
    params: FormatParams,
}

type SubmitResult = Result<(StatusCode, Json<ApiResponse<SubmitOutcome>>), TaskError>;

async fn submit_video(State(ctx): State<Arc<AppContext>>, Json(body): Json<Map<String, Value>>) -> SubmitResult {
    submit(&ctx, JobKind::Video, body).await
}

async fn submit_audio(State(ctx): State<Arc<AppContext>>, Json(body): Json<Map<String, Value>>) -> SubmitResult {
    submit(&ctx, JobKind::Audio, body).await
}

async fn submit_subtitles(State(ctx): State<Arc<AppContext>>, Json(body): Json<Map<String, Value>>) -> SubmitResult {
    submit(&ctx, JobKind::Subtitles, body).await
}

async fn submit(ctx: &AppContext, kind: JobKind, mut body: Map<String, Value>) -> SubmitResult {
    // the route decides the kind, whatever the body says
    body.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
    let body: SubmitBody = serde_json::from_value(Value::Object(body))
        .map_err(|e| TaskError::invalid(format!("invalid request body: {}", e)))?;

    info!(kind = %kind, url = %body.url, output_path = ?body.output_path, "Received submission");
    let outcome = ctx
        .dispatcher
        .submit(SubmitRequest {
            kind,
            url: body.url,
            output_label: body.output_path.unwrap_or_default(),
            params: body.params,
        })
        .await?;

    let status = match outcome.submission {
        Submission::Created => StatusCode::CREATED,
        Submission::Deduplicated | Submission::Retried => StatusCode::OK,
    };
    Ok((status, Json(ApiResponse::success(outcome))))
}
