//! Ebook generation job entity

use crate::errors::{AppError, Result as AppResult};
use crate::pipeline::job::{BookLength, ChapterSlots, EbookJob, OutlineEntry};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ebook_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub topic: String,

    #[sea_orm(column_type = "Text")]
    pub tone: String,

    #[sea_orm(column_type = "Text")]
    pub length: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub subtitle: Option<String>,

    /// Ordered outline entries as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub outline: Json,

    pub total_chapters: i32,

    /// One nullable markdown string per outline entry, as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub content_parts: Json,

    pub progress: i32,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub cover_prompt: Option<String>,

    /// Optimistic concurrency token
    pub version: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product::Entity")]
    Products,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for EbookJob {
    type Error = AppError;

    fn try_from(row: Model) -> AppResult<Self> {
        let outline: Vec<OutlineEntry> = serde_json::from_value(row.outline)?;
        let content_parts: ChapterSlots = serde_json::from_value(row.content_parts)?;
        let length: BookLength = row.length.parse()?;

        Ok(EbookJob {
            id: row.id,
            user_id: row.user_id,
            topic: row.topic,
            tone: row.tone,
            length,
            title: row.title,
            subtitle: row.subtitle,
            outline,
            total_chapters: row.total_chapters.max(0) as u32,
            content_parts,
            progress: row.progress.max(0) as u32,
            status: row.status.parse()?,
            error_message: row.error_message,
            cover_prompt: row.cover_prompt,
            version: row.version,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        })
    }
}

impl TryFrom<&EbookJob> for ActiveModel {
    type Error = AppError;

    /// Every column set, ready for insert or a full-row conditional update
    fn try_from(job: &EbookJob) -> AppResult<Self> {
        Ok(ActiveModel {
            id: Set(job.id),
            user_id: Set(job.user_id),
            topic: Set(job.topic.clone()),
            tone: Set(job.tone.clone()),
            length: Set(job.length.as_str().to_string()),
            title: Set(job.title.clone()),
            subtitle: Set(job.subtitle.clone()),
            outline: Set(serde_json::to_value(&job.outline)?),
            total_chapters: Set(job.total_chapters as i32),
            content_parts: Set(serde_json::to_value(&job.content_parts)?),
            progress: Set(job.progress as i32),
            status: Set(job.status.as_str().to_string()),
            error_message: Set(job.error_message.clone()),
            cover_prompt: Set(job.cover_prompt.clone()),
            version: Set(job.version),
            created_at: Set(job.created_at.into()),
            updated_at: Set(job.updated_at.into()),
        })
    }
}
