//! Read access to the files a completed task produced.
//!
//! File names coming from clients are only ever matched against a fresh
//! directory listing; they are never joined onto a path.

use futures::Stream;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, TaskError};
use crate::schedule::relocation::ArtifactRelocator;
use crate::schedule::types::{Task, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TaskFile {
    pub name: String,
    pub size: u64,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub modified: SystemTime,
}

#[derive(Debug)]
pub enum ServedFile {
    Local(TaskFile),
    Remote { url: String, expires_in: u64 },
}

#[derive(Debug)]
pub enum ServedArchive {
    Local(TaskArchive),
    Remote { url: String, expires_in: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArtifactLink {
    Local { url: String },
    Remote { url: String, expires_in: u64 },
}

/// A zip archive in a private temporary file. The file is removed when this
/// value (or the stream created from it) is dropped.
#[derive(Debug)]
pub struct TaskArchive {
    path: TempPath,
    pub file_name: String,
    pub entries: usize,
    pub size: u64,
}

impl TaskArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn into_stream(self) -> io::Result<ArchiveStream> {
        let file = File::open(&self.path).await?;
        Ok(ArchiveStream {
            inner: ReaderStream::new(file),
            _temp: self.path,
        })
    }
}

/// Byte stream over a [`TaskArchive`] that owns the temporary file.
pub struct ArchiveStream {
    inner: ReaderStream<File>,
    _temp: TempPath,
}

impl Stream for ArchiveStream {
    type Item = <ReaderStream<File> as Stream>::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub struct ArtifactAccess {
    relocator: Option<Arc<dyn ArtifactRelocator>>,
    access_ttl: Duration,
    public_domain: Option<String>,
}

impl ArtifactAccess {
    pub fn new(
        relocator: Option<Arc<dyn ArtifactRelocator>>,
        access_ttl: Duration,
        public_domain: Option<String>,
    ) -> Self {
        Self {
            relocator,
            access_ttl,
            public_domain: public_domain.map(|d| d.trim_end_matches('/').to_string()),
        }
    }

    /// Regular files directly inside the task directory, newest first.
    pub async fn list_files(&self, task: &Task) -> Result<Vec<TaskFile>> {
        require_completed(task)?;
        let files = scan_files(&task.task_output_path).await?;
        debug!(task_id = %task.id, count = files.len(), "Listed task files");
        Ok(files)
    }

    /// Only names from the local listing, plus the name of the relocated
    /// artifact, are accepted. The relocated one is redirected.
    pub async fn serve_file(&self, task: &Task, name: &str) -> Result<ServedFile> {
        require_completed(task)?;
        let files = scan_files(&task.task_output_path).await?;
        let local = files.into_iter().find(|f| f.name == name);

        if relocated_name(task) == Some(name) {
            if let Some((url, expires_in)) = self.remote_access(task).await {
                info!(task_id = %task.id, name = %name, "Serving relocated file");
                return Ok(ServedFile::Remote { url, expires_in });
            }
            return match local {
                Some(file) => Ok(ServedFile::Local(file)),
                None => Err(TaskError::Gone("artifact was relocated and is no longer available locally".into())),
            };
        }

        match local {
            Some(file) => {
                info!(task_id = %task.id, name = %name, "Serving file");
                Ok(ServedFile::Local(file))
            }
            None => {
                info!(task_id = %task.id, name = %name, "File not found");
                Err(TaskError::not_found("File not found for this task"))
            }
        }
    }

    pub async fn serve_archive(&self, task: &Task) -> Result<ServedArchive> {
        require_completed(task)?;
        if let Some((url, expires_in)) = self.remote_access(task).await {
            return Ok(ServedArchive::Remote { url, expires_in });
        }

        let files = scan_files(&task.task_output_path).await?;
        if files.is_empty() {
            if task.external_artifact_ref.is_some() {
                return Err(TaskError::Gone("artifact was relocated and is no longer available locally".into()));
            }
            info!(task_id = %task.id, "No files to zip");
            return Err(TaskError::not_found("No files found to zip"));
        }

        let file_name = format!("task-{}.zip", task.id);
        let entries = files.len();
        info!(task_id = %task.id, file_count = entries, "Creating zip");
        let (path, size) = tokio::task::spawn_blocking(move || build_archive(&files))
            .await
            .map_err(|e| TaskError::Internal(format!("archive builder stopped: {}", e)))??;

        Ok(ServedArchive::Local(TaskArchive { path, file_name, entries, size }))
    }

    /// Download link for the task's primary artifact.
    pub async fn access_url(&self, task: &Task) -> Result<ArtifactLink> {
        require_completed(task)?;
        if let Some(external_ref) = &task.external_artifact_ref {
            let relocator = self
                .relocator
                .as_ref()
                .ok_or_else(|| TaskError::Gone("artifact was relocated but no relocator is configured".into()))?;
            let url = relocator.generate_access(external_ref, self.access_ttl).await?;
            return Ok(ArtifactLink::Remote { url, expires_in: self.access_ttl.as_secs() });
        }

        let primary = scan_files(&task.task_output_path)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::not_found("No files found for this task"))?;
        let domain = self
            .public_domain
            .as_deref()
            .ok_or_else(|| TaskError::Internal("DOMAIN not configured".into()))?;
        let mut url = Url::parse(&format!("{}/task/{}/file", domain, task.id))
            .map_err(|e| TaskError::Internal(format!("invalid DOMAIN: {}", e)))?;
        url.query_pairs_mut().append_pair("name", &primary.name);
        Ok(ArtifactLink::Local { url: url.to_string() })
    }

    async fn remote_access(&self, task: &Task) -> Option<(String, u64)> {
        let external_ref = task.external_artifact_ref.as_deref()?;
        let Some(relocator) = &self.relocator else {
            warn!(task_id = %task.id, "Task has an external artifact but no relocator is configured");
            return None;
        };
        match relocator.generate_access(external_ref, self.access_ttl).await {
            Ok(url) => Some((url, self.access_ttl.as_secs())),
            Err(e) => {
                warn!(task_id = %task.id, "Failed to generate access url: {}", e);
                None
            }
        }
    }
}

/// File name of the relocated artifact, the last segment of its reference.
fn relocated_name(task: &Task) -> Option<&str> {
    task.external_artifact_ref
        .as_deref()
        .and_then(|r| r.rsplit('/').next())
        .filter(|n| !n.is_empty())
}

fn require_completed(task: &Task) -> Result<()> {
    if task.status != TaskStatus::Completed {
        info!(task_id = %task.id, status = %task.status, "Task not completed");
        return Err(TaskError::NotReady { status: task.status });
    }
    Ok(())
}

/// Regular files (no directories, no symlinks) directly inside `dir`,
/// most recently modified first. A missing directory yields no files.
pub async fn scan_files(dir: &Path) -> io::Result<Vec<TaskFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Task output directory missing");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let metadata = entry.metadata().await?;
        files.push(TaskFile {
            name,
            size: metadata.len(),
            path: entry.path(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

fn build_archive(files: &[TaskFile]) -> Result<(TempPath, u64)> {
    let mut tmp = tempfile::Builder::new().prefix("task-").suffix(".zip").tempfile()?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        for file in files {
            zip.start_file(file.name.as_str(), options)?;
            let mut source = std::fs::File::open(&file.path)?;
            io::copy(&mut source, &mut zip)?;
        }
        zip.finish()?.flush()?;
    }

    let size = tmp.as_file().metadata()?.len();
    debug!(path = %tmp.path().display(), size, "Archive written");
    Ok((tmp.into_temp_path(), size))
}
