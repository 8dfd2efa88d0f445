use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use sea_orm::Schema;
use sea_orm::DbBackend;
use sea_query::{SchemaStatementBuilder, SqliteQueryBuilder};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::TaskStorage;
use super::entity::{Entity as TaskEntity, Model as TaskModel};
use crate::error::Result;

pub struct SqliteTaskStorage {
    pool: SqlitePool,
}

impl SqliteTaskStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite task storage at {}", database_url);

        // make sure the database directory exists
        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(dir) = Path::new(db_path).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Opens the storage on an existing pool, creating the table if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let mut create = Schema::new(DbBackend::Sqlite).create_table_from_entity(TaskEntity);
        create.if_not_exists();
        sqlx::query(&create.to_string(SqliteQueryBuilder))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    fn row_to_model(row: SqliteRow) -> std::result::Result<TaskModel, sqlx::Error> {
        Ok(TaskModel {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            url: row.try_get("url")?,
            base_output_path: row.try_get("base_output_path")?,
            task_output_path: row.try_get("task_output_path")?,
            format_signature: row.try_get("format_signature")?,
            format_params: row.try_get("format_params")?,
            status: row.try_get("status")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            external_artifact_ref: row.try_get("external_artifact_ref")?,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

#[async_trait]
impl TaskStorage for SqliteTaskStorage {
    async fn upsert(&self, model: &TaskModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, kind, url, base_output_path, task_output_path, format_signature, format_params,
             status, result, error, external_artifact_ref, attempts, created_at, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                url = excluded.url,
                base_output_path = excluded.base_output_path,
                task_output_path = excluded.task_output_path,
                format_signature = excluded.format_signature,
                format_params = excluded.format_params,
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                external_artifact_ref = excluded.external_artifact_ref,
                attempts = excluded.attempts,
                created_at = excluded.created_at,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&model.id)
        .bind(&model.kind)
        .bind(&model.url)
        .bind(&model.base_output_path)
        .bind(&model.task_output_path)
        .bind(&model.format_signature)
        .bind(&model.format_params)
        .bind(&model.status)
        .bind(&model.result)
        .bind(&model.error)
        .bind(&model.external_artifact_ref)
        .bind(model.attempts)
        .bind(model.created_at)
        .bind(model.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<TaskModel>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            models.push(Self::row_to_model(row)?);
        }
        Ok(models)
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskModel>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(Self::row_to_model(row)?),
            None => None,
        })
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
