//! Chapter stage
//!
//! Fills exactly one slot of the job's chapter table. Slots are write-once:
//! a request for a filled slot is acknowledged as already generated without
//! calling the LLM, and if two writers race on the same slot the first
//! committed write wins.

use super::job::{EbookJob, JobPatch, JobStatus};
use super::{observe, prompts, EbookPipeline};
use crate::errors::{AppError, Result};
use crate::metrics;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

const SUMMARY_MAX_CHARS: usize = 600;

/// Result of one chapter request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterOutcome {
    pub chapter_index: u32,
    pub progress: u32,
    pub total_chapters: u32,
    pub status: JobStatus,
    pub already_generated: bool,
}

impl ChapterOutcome {
    fn from_job(job: &EbookJob, index: usize, already_generated: bool) -> Self {
        Self {
            chapter_index: index as u32,
            progress: job.progress,
            total_chapters: job.total_chapters,
            status: job.status,
            already_generated,
        }
    }
}

/// Short plain-text recap of the chapter before `index`, used to keep
/// consecutive chapters coherent
pub fn previous_summary(job: &EbookJob, index: usize) -> Option<String> {
    let previous = job.content_parts.get(index.checked_sub(1)?)?;

    let text = previous
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }

    if text.chars().count() <= SUMMARY_MAX_CHARS {
        return Some(text);
    }
    let cut: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) => &cut[..pos],
        None => cut.as_str(),
    };
    Some(format!("{}...", cut))
}

/// Check a requested index against the job's chapter count
fn checked_index(job: &EbookJob, index: i64) -> Result<usize> {
    if index < 0 || index >= i64::from(job.total_chapters) {
        return Err(AppError::Validation {
            message: format!(
                "chapterIndex {} out of range 0..{}",
                index, job.total_chapters
            ),
            field: Some("chapterIndex".to_string()),
        });
    }
    Ok(index as usize)
}

impl EbookPipeline {
    /// Generate chapter `index` of a job owned by `owner`
    #[instrument(skip(self))]
    pub async fn generate_chapter(&self, owner: Uuid, job_id: Uuid, index: i64) -> Result<ChapterOutcome> {
        let start = Instant::now();
        let result = self.chapter_stage(owner, job_id, index).await;
        observe("chapter", start, &result);
        result
    }

    async fn chapter_stage(&self, owner: Uuid, job_id: Uuid, index: i64) -> Result<ChapterOutcome> {
        let job = self.job(owner, job_id).await?;

        if !job.has_outline() {
            return Err(AppError::JobNotReady {
                id: job_id.to_string(),
                message: "chapters require an outline".to_string(),
            });
        }
        let index = checked_index(&job, index)?;

        if job.content_parts.is_filled(index) {
            return Ok(ChapterOutcome::from_job(&job, index, true));
        }
        if !job.status.accepts_chapters() {
            return Err(AppError::JobNotReady {
                id: job_id.to_string(),
                message: format!("job is {}", job.status),
            });
        }

        let entry = &job.outline[index];
        let summary = previous_summary(&job, index);
        let prompt = prompts::chapter_prompt(
            job.title.as_deref().unwrap_or(&job.topic),
            &job.tone,
            entry,
            job.total_chapters,
            summary.as_deref(),
            job.length.words_per_chapter(),
        );
        let content = self
            .generate_for(job_id, &prompt, self.config.chapter_max_tokens)
            .await?;

        let (job, written) = self
            .write_job(job_id, |current| {
                if current.content_parts.is_filled(index) {
                    return Ok(None);
                }
                let mut parts = current.content_parts.clone();
                parts.fill(index, content.clone())?;

                let status = if parts.filled_count() == parts.len() {
                    JobStatus::Complete
                } else {
                    JobStatus::Writing
                };
                // a successful retry on a failed job clears the failure
                let error_message = (current.status == JobStatus::Error).then_some(None);

                Ok(Some(JobPatch {
                    content_parts: Some(parts),
                    status: Some(status),
                    error_message,
                    ..Default::default()
                }))
            })
            .await?;

        if written {
            metrics::record_chapter_generated();
            info!(
                chapter = index,
                progress = job.progress,
                total = job.total_chapters,
                status = %job.status,
                "Chapter generated"
            );
        } else {
            info!(chapter = index, "Chapter was written concurrently, keeping first write");
        }

        Ok(ChapterOutcome::from_job(&job, index, !written))
    }
}


#[cfg(test)]
mod tests {
    use super::super::job::{BookLength, ChapterSlots, NewJob};
    use super::super::testing::*;
    use super::*;
    use crate::db::{JobStore, MemoryStore};
    use crate::llm::ScriptedProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Store that lets a competing request fill slot 0 just before the
    /// first chapter write lands
    #[derive(Default)]
    struct RacingStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl JobStore for RacingStore {
        async fn create_job(&self, new: NewJob) -> Result<EbookJob> {
            self.inner.create_job(new).await
        }

        async fn get_job(&self, id: Uuid) -> Result<Option<EbookJob>> {
            self.inner.get_job(id).await
        }

        async fn update_job(&self, id: Uuid, patch: JobPatch, expected_version: i32) -> Result<EbookJob> {
            if patch.content_parts.is_some() && !self.raced.swap(true, Ordering::SeqCst) {
                let current = self.inner.get_job(id).await?.unwrap();
                let mut parts = current.content_parts.clone();
                parts.fill(0, "first writer".to_string())?;
                self.inner
                    .update_job(
                        id,
                        JobPatch {
                            content_parts: Some(parts),
                            status: Some(JobStatus::Writing),
                            ..Default::default()
                        },
                        current.version,
                    )
                    .await?;
            }
            self.inner.update_job(id, patch, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_chapters_fill_slots_and_complete() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        let first = pipeline.generate_chapter(owner, job.id, 0).await.unwrap();
        assert_eq!(first.progress, 1);
        assert_eq!(first.status, JobStatus::Writing);
        assert!(!first.already_generated);

        pipeline.generate_chapter(owner, job.id, 2).await.unwrap();
        let last = pipeline.generate_chapter(owner, job.id, 1).await.unwrap();
        assert_eq!(last.progress, 3);
        assert_eq!(last.status, JobStatus::Complete);

        let job = pipeline.job(owner, job.id).await.unwrap();
        assert_eq!(job.progress as usize, job.content_parts.filled_count());
    }

    #[tokio::test]
    async fn test_regenerating_a_filled_slot_is_a_no_op() {
        let provider = Arc::new(happy_provider(3));
        let (pipeline, _) = pipeline_with(provider.clone());
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        pipeline.generate_chapter(owner, job.id, 0).await.unwrap();
        let before = pipeline.job(owner, job.id).await.unwrap();
        let calls = provider.calls();

        let again = pipeline.generate_chapter(owner, job.id, 0).await.unwrap();
        assert!(again.already_generated);
        assert_eq!(again.progress, 1);
        assert_eq!(provider.calls(), calls);

        let after = pipeline.job(owner, job.id).await.unwrap();
        assert_eq!(after.content_parts, before.content_parts);
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_rejected_without_mutation() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        for index in [3, -1] {
            let err = pipeline.generate_chapter(owner, job.id, index).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }

        let after = pipeline.job(owner, job.id).await.unwrap();
        assert_eq!(after, job);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let err = pipeline
            .generate_chapter(Uuid::new_v4(), Uuid::new_v4(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_chapter_marks_error_and_retry_resumes() {
        let failing = Arc::new(AtomicBool::new(false));
        let flag = failing.clone();
        let provider = Arc::new(ScriptedProvider::new(move |prompt, call| {
            if flag.load(Ordering::SeqCst) && prompt.contains("You are writing chapter") {
                return Err(AppError::Internal {
                    message: "rate limited".to_string(),
                });
            }
            happy_response(prompt, call, 3)
        }));
        let (pipeline, _) = pipeline_with(provider);
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = pipeline.generate_chapter(owner, job.id, 0).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamGeneration { .. }));
        let failed = pipeline.job(owner, job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.progress, 0);
        assert!(failed.error_message.is_some());

        failing.store(false, Ordering::SeqCst);
        let resumed = pipeline.generate_chapter(owner, job.id, 0).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Writing);
        let job = pipeline.job(owner, job.id).await.unwrap();
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writer_keeps_first_write() {
        let store = Arc::new(RacingStore::default());
        let pipeline = pipeline_on(store.clone(), Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        let outcome = pipeline.generate_chapter(owner, job.id, 0).await.unwrap();
        assert!(outcome.already_generated);
        assert_eq!(outcome.progress, 1);

        let job = pipeline.job(owner, job.id).await.unwrap();
        assert_eq!(job.content_parts.get(0), Some("first writer"));
    }

    #[test]
    fn test_previous_summary_strips_headings_and_truncates() {
        let mut job = EbookJob::new(
            Uuid::new_v4(),
            NewJob {
                user_id: Uuid::new_v4(),
                topic: "t".into(),
                tone: "t".into(),
                length: BookLength::Short,
            },
            chrono::Utc::now(),
        );
        let mut parts = ChapterSlots::new(2);
        parts
            .fill(0, format!("## Heading\n\n{}", "word ".repeat(300)))
            .unwrap();
        job.content_parts = parts;

        assert!(previous_summary(&job, 0).is_none());
        let summary = previous_summary(&job, 1).unwrap();
        assert!(!summary.contains('#'));
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS + 3);
    }
}
