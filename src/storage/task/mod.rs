use async_trait::async_trait;
use crate::error::Result;
use crate::storage::task::entity::Model as TaskModel;
pub mod sqlite;
pub mod entity;
pub mod mapping;

pub use sqlite::SqliteTaskStorage;

/// Durable side of the task registry.
#[async_trait]
pub trait TaskStorage: Send + Sync + 'static {
    /// Insert-or-replace of the full row keyed by id.
    async fn upsert(&self, model: &TaskModel) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<TaskModel>>;
    /// Reads one persisted row. The registry serves reads from memory; this
    /// is for checking what actually reached the store.
    async fn get(&self, task_id: &str) -> Result<Option<TaskModel>>;
    /// Returns whether a row was removed.
    async fn delete(&self, task_id: &str) -> Result<bool>;
}
