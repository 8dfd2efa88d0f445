use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, TaskError};
use crate::sandbox::PathSandbox;
use crate::schedule::relocation::ArtifactRelocator;
use crate::schedule::types::{FormatParams, JobKind, Signature, Task, TaskStatus};
use crate::storage::task::entity::Model as TaskModel;
use crate::storage::task::TaskStorage;

/// Owns every task: the durable store and its in-memory mirror.
///
/// All mutations go through here so the two never disagree for longer than a
/// failed write. Store failures are logged and the in-memory state still
/// moves on; durability is degraded until the store recovers.
pub struct TaskRegistry {
    storage: Arc<dyn TaskStorage>,
    sandbox: Arc<PathSandbox>,
    relocator: Option<Arc<dyn ArtifactRelocator>>,
    tasks: RwLock<HashMap<String, Task>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSummary {
    pub task_id: String,
    pub removed_local_path: Option<String>,
    pub removed_external: bool,
}

impl TaskRegistry {
    /// Loads the whole table into memory.
    pub async fn load(
        storage: Arc<dyn TaskStorage>,
        sandbox: Arc<PathSandbox>,
        relocator: Option<Arc<dyn ArtifactRelocator>>,
    ) -> Result<Self> {
        let start = Instant::now();
        let models = storage.load_all().await?;
        let mut tasks = HashMap::with_capacity(models.len());
        for model in models {
            let id = model.id.clone();
            match Task::try_from(model) {
                Ok(task) => {
                    tasks.insert(id, task);
                }
                Err(e) => error!(task_id = %id, "Skipping unreadable task row: {}", e),
            }
        }
        info!(count = tasks.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Loaded tasks from database");

        Ok(Self {
            storage,
            sandbox,
            relocator,
            tasks: RwLock::new(tasks),
        })
    }

    pub fn sandbox(&self) -> &Arc<PathSandbox> {
        &self.sandbox
    }

    pub fn relocator(&self) -> Option<&Arc<dyn ArtifactRelocator>> {
        self.relocator.as_ref()
    }

    /// Creates a pending task under an already resolved base directory.
    pub async fn create(&self, kind: JobKind, url: &str, base: PathBuf, params: FormatParams) -> Result<Task> {
        if params.kind() != kind {
            return Err(TaskError::invalid(format!(
                "format parameters for {} given to a {} job",
                params.kind(),
                kind
            )));
        }
        if !self.sandbox.contains(&base) {
            warn!(base = %base.display(), "Rejected base dir outside sandbox");
            return Err(TaskError::invalid("output_path resolves outside the server root"));
        }

        let id = Uuid::new_v4().to_string();
        let task_output_path = self.sandbox.task_dir(&base, &id)?;
        let now = Utc::now();
        let task = Task {
            id: id.clone(),
            kind,
            url: url.to_string(),
            base_output_path: base,
            task_output_path,
            format_signature: params.format_key(),
            params,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            external_artifact_ref: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(id.clone(), task.clone());
            self.persist(&task).await;
        }
        info!(
            task_id = %id,
            kind = %kind,
            base = %task.base_output_path.display(),
            fmt = %task.format_signature,
            url = %url,
            "Created task"
        );
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Applies `change` to the task and persists the full row.
    ///
    /// The row is written while the map lock is held, so a delete is never
    /// overtaken by a late write for the same id. Unknown ids (a task deleted
    /// while its worker was still running) and illegal status moves are
    /// logged and ignored.
    pub async fn update<F>(&self, task_id: &str, change: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let updated = {
            let Some(current) = tasks.get(task_id) else {
                warn!(task_id = %task_id, "Attempted to update missing task");
                return None;
            };

            let mut next = current.clone();
            change(&mut next);
            if !current.status.can_transition_to(next.status) {
                warn!(
                    task_id = %task_id,
                    from = %current.status,
                    to = %next.status,
                    "Refused illegal status transition"
                );
                return None;
            }
            // ids are immutable
            next.id = current.id.clone();
            next.updated_at = Utc::now();
            tasks.insert(task_id.to_string(), next.clone());
            next
        };

        self.persist(&updated).await;
        drop(tasks);
        debug!(task_id = %task_id, status = %updated.status, "Updated task");
        Some(updated)
    }

    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Non-failed task with this signature, if any.
    ///
    /// Linear scan; a signature index belongs here once task counts grow
    /// beyond a few thousand.
    pub async fn find_by_signature(&self, signature: &Signature) -> Option<Task> {
        self.find_where(signature, |status| status != TaskStatus::Failed).await
    }

    pub async fn find_failed_by_signature(&self, signature: &Signature) -> Option<Task> {
        self.find_where(signature, |status| status == TaskStatus::Failed).await
    }

    async fn find_where<P>(&self, signature: &Signature, wanted: P) -> Option<Task>
    where
        P: Fn(TaskStatus) -> bool,
    {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| wanted(t.status) && &t.signature() == signature)
            .min_by_key(|t| t.created_at)
            .cloned()
    }

    /// Removes the task and, best-effort, its local and relocated artifacts.
    pub async fn delete(&self, task_id: &str) -> Result<DeleteSummary> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .remove(task_id)
                .ok_or_else(|| TaskError::not_found(format!("Task with ID {} not found", task_id)))?;
            if let Err(e) = self.storage.delete(task_id).await {
                error!(task_id = %task_id, "Failed to delete task row: {}", e);
            }
            task
        };

        let mut removed_external = false;
        if let Some(external_ref) = &task.external_artifact_ref {
            match &self.relocator {
                Some(relocator) => removed_external = relocator.remove(external_ref).await,
                None => warn!(task_id = %task_id, external_ref = %external_ref, "No relocator configured, external artifact left in place"),
            }
        }

        let mut removed_local_path = None;
        if self.sandbox.contains(&task.task_output_path) {
            match tokio::fs::remove_dir_all(&task.task_output_path).await {
                Ok(()) => removed_local_path = Some(task.task_output_path.display().to_string()),
                Err(e) => warn!(task_id = %task_id, "Failed to remove task directory: {}", e),
            }
        }

        info!(
            task_id = %task_id,
            removed_local = removed_local_path.is_some(),
            removed_external,
            "Deleted task"
        );
        Ok(DeleteSummary {
            task_id: task_id.to_string(),
            removed_local_path,
            removed_external,
        })
    }

    async fn persist(&self, task: &Task) {
        let model = match TaskModel::try_from(task) {
            Ok(model) => model,
            Err(e) => {
                error!(task_id = %task.id, "Failed to encode task row: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.upsert(&model).await {
            error!(task_id = %task.id, status = %task.status, "Error saving task to database: {}", e);
        }
    }
}
