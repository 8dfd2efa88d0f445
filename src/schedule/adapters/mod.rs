pub mod ytdlp;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::AdapterError;
use crate::schedule::types::{FormatParams, JobKind};

pub use ytdlp::YtDlpAdapter;

/// Everything an adapter needs to run one job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub kind: JobKind,
    pub target_dir: PathBuf,
    pub url: String,
    pub params: FormatParams,
}

/// Performs the actual download. Implementations report failures as
/// [`AdapterError`] values; the worker additionally isolates panics.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, request: &ExecutionRequest) -> Result<serde_json::Value, AdapterError>;
}
