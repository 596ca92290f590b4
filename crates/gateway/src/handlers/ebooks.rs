//! Ebook pipeline handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{required, validate_body};
use crate::AppState;
use nexora_common::{
    auth::{AuthUser, Subscriber},
    errors::Result,
    pipeline::{BookLength, ChapterOutcome, CoverRequest, EbookJob, JobStatus, NewEbook, OutlineEntry},
};

/// Request to start a new ebook
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEbookRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub topic: String,

    #[validate(length(max = 200))]
    pub tone: Option<String>,

    pub length: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEbookResponse {
    pub job_id: Uuid,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub outline: Vec<OutlineEntry>,
    pub total_chapters: u32,
    pub status: JobStatus,
}

/// Create a job and run the title and outline stages
pub async fn generate_ebook(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<GenerateEbookRequest>,
) -> Result<Json<GenerateEbookResponse>> {
    validate_body(&request)?;

    let length = match request.length.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value.parse::<BookLength>()?,
        _ => BookLength::default(),
    };

    let job = state
        .pipeline
        .start(
            user.user_id(),
            NewEbook {
                topic: request.topic,
                tone: request.tone,
                length,
            },
        )
        .await?;

    Ok(Json(GenerateEbookResponse {
        job_id: job.id,
        title: job.title,
        subtitle: job.subtitle,
        outline: job.outline,
        total_chapters: job.total_chapters,
        status: job.status,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub job_id: Option<Uuid>,
}

/// Full job snapshot
pub async fn ebook_status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<JobQuery>,
) -> Result<Json<EbookJob>> {
    let job_id = required(query.job_id, "jobId")?;
    let job = state.pipeline.job(user.user_id, job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateChapterRequest {
    pub job_id: Option<Uuid>,
    pub chapter_index: Option<i64>,
}

#[derive(Serialize)]
pub struct GenerateChapterResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ChapterOutcome,
}

/// Generate one chapter. Repeating a request for a filled chapter returns
/// the current progress without generating again.
pub async fn generate_chapter(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<GenerateChapterRequest>,
) -> Result<Json<GenerateChapterResponse>> {
    let job_id = required(request.job_id, "jobId")?;
    let index = required(request.chapter_index, "chapterIndex")?;

    let outcome = state
        .pipeline
        .generate_chapter(user.user_id(), job_id, index)
        .await?;

    Ok(Json(GenerateChapterResponse {
        success: true,
        outcome,
    }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCoverRequest {
    #[validate(length(max = 300))]
    pub title: Option<String>,

    #[validate(length(max = 500))]
    pub subtitle: Option<String>,

    #[validate(length(max = 500))]
    pub topic: Option<String>,

    pub job_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCoverResponse {
    pub success: bool,
    pub cover_prompt: String,
}

pub async fn generate_cover(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<GenerateCoverRequest>,
) -> Result<Json<GenerateCoverResponse>> {
    validate_body(&request)?;

    let cover_prompt = state
        .pipeline
        .generate_cover(
            user.user_id(),
            CoverRequest {
                title: request.title.unwrap_or_default(),
                subtitle: request.subtitle.unwrap_or_default(),
                topic: request.topic,
                job_id: request.job_id,
            },
        )
        .await?;

    Ok(Json(GenerateCoverResponse {
        success: true,
        cover_prompt,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub job_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub final_markdown: String,
}

/// Assemble the finished book
pub async fn finalize_ebook(
    State(state): State<AppState>,
    user: Subscriber,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>> {
    let job_id = required(request.job_id, "jobId")?;
    let final_markdown = state.pipeline.finalize(user.user_id(), job_id).await?;

    Ok(Json(FinalizeResponse {
        success: true,
        final_markdown,
    }))
}
