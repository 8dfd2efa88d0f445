mod worker;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Result, TaskError};
use crate::schedule::adapters::ExecutionAdapter;
use crate::schedule::registry::TaskRegistry;
use crate::schedule::types::{FormatParams, JobKind, Signature, Task, TaskStatus};

pub use worker::TaskWorker;

pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_workers: usize,
    pub max_attempts: u32,
    pub job_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_attempts: 3,
            job_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub url: String,
    pub output_label: String,
    pub params: FormatParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Submission {
    Created,
    Deduplicated,
    Retried,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub task_id: String,
    pub submission: Submission,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub interrupted: usize,
    pub requeued: usize,
}

/// Accepts submissions, collapses duplicates and feeds a fixed pool of
/// workers through an unbounded queue.
pub struct JobDispatcher {
    registry: Arc<TaskRegistry>,
    queue: mpsc::UnboundedSender<String>,
    // find-or-create must be atomic per signature
    submit_lock: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker: Arc<TaskWorker>,
    max_attempts: u32,
}

impl JobDispatcher {
    /// Spawns `max_workers` workers. Must be called inside a tokio runtime.
    pub fn start(
        registry: Arc<TaskRegistry>,
        adapter: Arc<dyn ExecutionAdapter>,
        config: DispatcherConfig,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let worker = Arc::new(TaskWorker::new(registry.clone(), adapter, config.job_timeout));

        let max_workers = config.max_workers.max(1);
        let handles = (0..max_workers)
            .map(|worker_id| {
                let worker = worker.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    worker.run(worker_id, receiver).await;
                })
            })
            .collect();
        info!(
            workers = max_workers,
            max_attempts = config.max_attempts,
            timeout_secs = config.job_timeout.map(|d| d.as_secs()),
            "Job dispatcher started"
        );

        Self {
            registry,
            queue,
            submit_lock: Mutex::new(()),
            workers: Mutex::new(handles),
            worker,
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Returns the id of the task that will (or already did) run this job.
    ///
    /// An identical non-failed task is reused as is. An identical failed task
    /// is reset to pending and queued again until it has used up its
    /// attempts. Only when neither exists is a new task created.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let url = validate_url(&request.url)?;
        if request.params.kind() != request.kind {
            return Err(TaskError::invalid(format!(
                "format parameters for {} given to a {} job",
                request.params.kind(),
                request.kind
            )));
        }
        request.params.validate()?;

        let base = self.registry.sandbox().resolve_base(&request.output_label)?;
        let signature = Signature::new(request.kind, &url, &base, &request.params.format_key());

        let _guard = self.submit_lock.lock().await;

        if let Some(existing) = self.registry.find_by_signature(&signature).await {
            info!(
                task_id = %existing.id,
                status = %existing.status,
                kind = %request.kind,
                "Deduplicated submission"
            );
            return Ok(SubmitOutcome {
                task_id: existing.id,
                submission: Submission::Deduplicated,
            });
        }

        if let Some(failed) = self.registry.find_failed_by_signature(&signature).await {
            if failed.attempts >= self.max_attempts {
                warn!(task_id = %failed.id, attempts = failed.attempts, "Retry limit reached");
                return Err(TaskError::RetryLimitExceeded {
                    task_id: failed.id,
                    attempts: failed.attempts,
                });
            }
            let task = self
                .registry
                .update(&failed.id, Task::reset_for_retry)
                .await
                .ok_or_else(|| TaskError::Internal(format!("task {} vanished during retry", failed.id)))?;
            info!(task_id = %task.id, attempts = task.attempts, "Retrying failed task");
            self.schedule(&task.id);
            return Ok(SubmitOutcome {
                task_id: task.id,
                submission: Submission::Retried,
            });
        }

        let task = self.registry.create(request.kind, &url, base, request.params).await?;
        self.schedule(&task.id);
        Ok(SubmitOutcome {
            task_id: task.id,
            submission: Submission::Created,
        })
    }

    /// Settles tasks left over from a previous run: in-flight ones are
    /// failed, pending ones are queued again.
    pub async fn recover(&self) -> RecoveryStats {
        let mut stats = RecoveryStats::default();
        for task in self.registry.list().await {
            match task.status {
                status if status.is_in_flight() => {
                    if self
                        .registry
                        .update(&task.id, |t| t.mark_failed(INTERRUPTED_MESSAGE))
                        .await
                        .is_some()
                    {
                        stats.interrupted += 1;
                    }
                }
                TaskStatus::Pending => {
                    self.schedule(&task.id);
                    stats.requeued += 1;
                }
                _ => {}
            }
        }
        info!(interrupted = stats.interrupted, requeued = stats.requeued, "Recovered tasks from previous run");
        stats
    }

    /// Stops all workers and aborts the jobs they were running. Aborted
    /// tasks stay `running` and are failed by [`recover`](Self::recover) on
    /// the next start.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
        let aborted = self.worker.abort_jobs().await;
        info!(aborted, "Job dispatcher stopped");
    }

    fn schedule(&self, task_id: &str) {
        if self.queue.send(task_id.to_string()).is_err() {
            error!(task_id = %task_id, "Worker queue closed, task stays pending until restart");
        }
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TaskError::invalid("url must not be empty"));
    }
    let parsed = Url::parse(raw).map_err(|e| TaskError::invalid(format!("invalid url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(TaskError::invalid("url must be an http(s) address"));
    }
    Ok(raw.to_string())
}
