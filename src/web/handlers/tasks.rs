use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::ApiResponse;
use crate::artifacts::{ArtifactLink, ServedArchive, ServedFile, TaskFile};
use crate::error::{Result, TaskError};
use crate::schedule::{DeleteSummary, Task, TaskView};
use crate::web::Pagination;
use crate::AppContext;

pub fn tasks_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/task/:task_id", get(get_task).delete(delete_task))
        .route("/task/:task_id/files", get(list_files))
        .route("/task/:task_id/file", get(get_file))
        .route("/task/:task_id/zip", get(get_zip))
        .route("/task/:task_id/file_url", get(get_file_url))
        .with_state(ctx)
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": env!("GIT_HASH"),
        "tasks": ctx.registry.count().await,
    }))
}

async fn find_task(ctx: &AppContext, task_id: &str) -> Result<Task> {
    ctx.registry
        .get(task_id)
        .await
        .ok_or_else(|| TaskError::not_found(format!("Task with ID {} not found", task_id)))
}

async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskView>>> {
    let task = find_task(&ctx, &task_id).await?;
    Ok(Json(ApiResponse::success(TaskView::from(&task))))
}

async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<DeleteSummary>>> {
    let summary = ctx.registry.delete(&task_id).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// All tasks in creation order; `?index=&size=` selects a page.
async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    pagination: Option<Query<Pagination>>,
) -> Json<ApiResponse<Vec<TaskView>>> {
    let views: Vec<TaskView> = ctx.registry.list().await.iter().map(TaskView::from).collect();
    let views = match pagination {
        Some(Query(page)) => page.apply(views),
        None => views,
    };
    Json(ApiResponse::success(views))
}

async fn list_files(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TaskFile>>>> {
    let task = find_task(&ctx, &task_id).await?;
    let files = ctx.artifacts.list_files(&task).await?;
    Ok(Json(ApiResponse::success(files)))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    name: String,
}

async fn get_file(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Response> {
    let task = find_task(&ctx, &task_id).await?;
    match ctx.artifacts.serve_file(&task, &query.name).await? {
        ServedFile::Remote { url, .. } => {
            info!(task_id = %task_id, "Redirecting to relocated artifact");
            Ok(Redirect::temporary(&url).into_response())
        }
        ServedFile::Local(file) => {
            let handle = tokio::fs::File::open(&file.path).await?;
            attachment(
                &file.name,
                "application/octet-stream",
                Some(file.size),
                Body::from_stream(ReaderStream::new(handle)),
            )
        }
    }
}

async fn get_zip(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Response> {
    let task = find_task(&ctx, &task_id).await?;
    match ctx.artifacts.serve_archive(&task).await? {
        ServedArchive::Remote { url, .. } => Ok(Redirect::temporary(&url).into_response()),
        ServedArchive::Local(archive) => {
            let file_name = archive.file_name.clone();
            let size = archive.size;
            let stream = archive.into_stream().await?;
            attachment(&file_name, "application/zip", Some(size), Body::from_stream(stream))
        }
    }
}

async fn get_file_url(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<ArtifactLink>>> {
    let task = find_task(&ctx, &task_id).await?;
    let link = ctx.artifacts.access_url(&task).await?;
    Ok(Json(ApiResponse::success(link)))
}

fn attachment(name: &str, content_type: &str, size: Option<u64>, body: Body) -> Result<Response> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(name));
    if let Some(size) = size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }
    builder
        .body(body)
        .map_err(|e| TaskError::Internal(format!("failed to build response: {}", e)))
}

/// `attachment; filename="..."` with anything outside printable ASCII
/// (and quotes) replaced.
fn content_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
