use std::path::PathBuf;

use crate::error::TaskError;
use crate::schedule::types::Task;
use crate::storage::task::entity::Model as TaskModel;

impl TryFrom<TaskModel> for Task {
    type Error = TaskError;

    fn try_from(model: TaskModel) -> Result<Self, Self::Error> {
        Ok(Task {
            kind: model.kind.parse().map_err(TaskError::Internal)?,
            status: model.status.parse().map_err(TaskError::Internal)?,
            params: serde_json::from_str(&model.format_params)?,
            result: model.result.as_deref().map(serde_json::from_str).transpose()?,
            id: model.id,
            url: model.url,
            base_output_path: PathBuf::from(model.base_output_path),
            task_output_path: PathBuf::from(model.task_output_path),
            format_signature: model.format_signature,
            error: model.error,
            external_artifact_ref: model.external_artifact_ref,
            attempts: u32::try_from(model.attempts).unwrap_or_default(),
            created_at: model.created_at,
            updated_at: model.last_updated,
        })
    }
}

impl TryFrom<&Task> for TaskModel {
    type Error = TaskError;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        Ok(TaskModel {
            id: task.id.clone(),
            kind: task.kind.to_string(),
            url: task.url.clone(),
            base_output_path: task.base_output_path.display().to_string(),
            task_output_path: task.task_output_path.display().to_string(),
            format_signature: task.format_signature.clone(),
            format_params: serde_json::to_string(&task.params)?,
            status: task.status.to_string(),
            result: task.result.as_ref().map(serde_json::to_string).transpose()?,
            error: task.error.clone(),
            external_artifact_ref: task.external_artifact_ref.clone(),
            attempts: i32::try_from(task.attempts).unwrap_or(i32::MAX),
            created_at: task.created_at,
            last_updated: task.updated_at,
        })
    }
}
