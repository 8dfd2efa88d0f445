use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::artifacts::scan_files;
use crate::error::AdapterError;
use crate::schedule::adapters::{ExecutionAdapter, ExecutionRequest};
use crate::schedule::registry::TaskRegistry;
use crate::schedule::types::{Task, TaskStatus};

pub struct TaskWorker {
    registry: Arc<TaskRegistry>,
    adapter: Arc<dyn ExecutionAdapter>,
    // no limit when unset
    job_timeout: Option<Duration>,
    // adapter jobs in flight, by task id
    jobs: Mutex<HashMap<String, AbortHandle>>,
}

impl TaskWorker {
    pub fn new(
        registry: Arc<TaskRegistry>,
        adapter: Arc<dyn ExecutionAdapter>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            adapter,
            job_timeout,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Aborts every adapter job still running. Their tasks keep their
    /// in-flight status until the next startup recovery.
    pub async fn abort_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        for (task_id, job) in jobs.iter() {
            warn!(task_id = %task_id, "Aborting running job");
            job.abort();
        }
        let count = jobs.len();
        jobs.clear();
        count
    }

    /// Pulls task ids off the shared queue until the sending side is gone.
    pub async fn run(&self, worker_id: usize, queue: Arc<Mutex<UnboundedReceiver<String>>>) {
        debug!(worker_id, "Worker started");
        loop {
            let next = queue.lock().await.recv().await;
            let Some(task_id) = next else {
                break;
            };
            self.process(&task_id).await;
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Runs one task from pending to a terminal status. Never panics and
    /// never returns an error; every failure ends up on the task.
    pub async fn process(&self, task_id: &str) {
        match self.registry.get(task_id).await {
            Some(task) if task.status == TaskStatus::Pending => {}
            Some(task) => {
                debug!(task_id = %task_id, status = %task.status, "Skipping task that is no longer pending");
                return;
            }
            None => {
                warn!(task_id = %task_id, "Skipping unknown task");
                return;
            }
        }

        let Some(task) = self.registry.update(task_id, Task::mark_running).await else {
            return;
        };
        info!(
            task_id = %task.id,
            kind = %task.kind,
            attempt = task.attempts,
            adapter = self.adapter.name(),
            "Processing task"
        );
        let start = Instant::now();

        let request = ExecutionRequest {
            task_id: task.id.clone(),
            kind: task.kind,
            target_dir: task.task_output_path.clone(),
            url: task.url.clone(),
            params: task.params.clone(),
        };
        let outcome = match self.execute(request).await {
            Ok(result) => self.relocate(&task).await.map(|()| result),
            Err(e) => Err(e),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                if self.registry.update(task_id, |t| t.mark_completed(result)).await.is_some() {
                    info!(task_id = %task_id, elapsed_ms, "Task completed");
                }
            }
            Err(e) => {
                error!(task_id = %task_id, elapsed_ms, "Task failed: {}", e);
                self.registry.update(task_id, |t| t.mark_failed(e.message)).await;
            }
        }
    }

    /// Runs the adapter on its own tokio task so a panic only fails this job.
    async fn execute(&self, request: ExecutionRequest) -> Result<Value, AdapterError> {
        let task_id = request.task_id.clone();
        let adapter = self.adapter.clone();
        let mut handle = tokio::spawn(async move { adapter.execute(&request).await });
        self.jobs.lock().await.insert(task_id.clone(), handle.abort_handle());

        let joined = match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, &mut handle).await.ok(),
            None => Some((&mut handle).await),
        };
        self.jobs.lock().await.remove(&task_id);

        let Some(joined) = joined else {
            handle.abort();
            let limit = self.job_timeout.unwrap_or_default();
            return Err(AdapterError::new(format!("job timed out after {}s", limit.as_secs())));
        };

        match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(AdapterError::new(format!(
                "adapter panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(AdapterError::new(format!("adapter task aborted: {}", e))),
        }
    }

    /// Moves the newest artifact to external storage when a relocator is
    /// configured, then drops the local copy.
    async fn relocate(&self, task: &Task) -> Result<(), AdapterError> {
        let Some(relocator) = self.registry.relocator().cloned() else {
            return Ok(());
        };
        if self
            .registry
            .update(&task.id, |t| t.status = TaskStatus::Uploading)
            .await
            .is_none()
        {
            return Err(AdapterError::new("task disappeared before upload"));
        }

        let primary = scan_files(&task.task_output_path)
            .await
            .map_err(|e| AdapterError::new(format!("failed to list artifacts: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::new("no artifact produced to relocate"))?;

        let external_ref = relocator.relocate(&primary.path, &task.id).await?;
        info!(task_id = %task.id, external_ref = %external_ref, "Relocated artifact");
        self.registry
            .update(&task.id, |t| t.external_artifact_ref = Some(external_ref))
            .await;

        if let Err(e) = tokio::fs::remove_file(&primary.path).await {
            warn!(task_id = %task.id, path = %primary.path.display(), "Failed to remove local copy: {}", e);
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
