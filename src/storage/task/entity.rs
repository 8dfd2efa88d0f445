use sea_orm::entity::prelude::*;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// One persisted task row. Every write replaces the whole row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub url: String,
    pub base_output_path: String,
    pub task_output_path: String,
    pub format_signature: String,
    #[sea_orm(column_type = "Text")]
    pub format_params: String,  // serialized FormatParams
    pub status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub result: Option<String>,  // serialized adapter payload
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub external_artifact_ref: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
