//! Ebook generation pipeline
//!
//! Stages run as independent requests against the shared job record:
//! title → outline → chapter (once per outline entry) → finalize, with the
//! cover stage runnable any time a title exists. Each stage reads the job,
//! calls the LLM, and writes its result back with the optimistic version
//! token. A stage whose LLM call fails marks the job `error`.

pub mod chapter;
pub mod cover;
pub mod finalize;
pub mod job;
pub mod outline;
pub mod poller;
pub mod prompts;
pub mod title;

pub use chapter::ChapterOutcome;
pub use cover::CoverRequest;
pub use job::{BookLength, ChapterSlots, EbookJob, JobPatch, JobStatus, NewJob, OutlineEntry};
pub use poller::{JobDriver, JobProgress, PollOutcome, Poller};

use crate::config::PipelineConfig;
use crate::db::JobStore;
use crate::errors::{AppError, Result};
use crate::llm::LlmClient;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Request to start a new ebook
#[derive(Debug, Clone)]
pub struct NewEbook {
    pub topic: String,
    pub tone: Option<String>,
    pub length: BookLength,
}

pub const DEFAULT_TONE: &str = "informative and engaging";

/// Runs generation stages against an injected job store and LLM client
#[derive(Clone)]
pub struct EbookPipeline {
    store: Arc<dyn JobStore>,
    llm: Arc<LlmClient>,
    config: PipelineConfig,
}

impl EbookPipeline {
    pub fn new(store: Arc<dyn JobStore>, llm: Arc<LlmClient>, config: PipelineConfig) -> Self {
        Self { store, llm, config }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a job and run the title and outline stages
    #[instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn start(&self, owner: Uuid, request: NewEbook) -> Result<EbookJob> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AppError::MissingField {
                field: "topic".to_string(),
            });
        }

        let tone = request
            .tone
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TONE)
            .to_string();

        let job = self
            .store
            .create_job(NewJob {
                user_id: owner,
                topic: topic.to_string(),
                tone,
                length: request.length,
            })
            .await?;
        info!(job_id = %job.id, length = job.length.as_str(), "Ebook job created");

        let job = self.run_title(&job).await?;
        self.run_outline(&job).await
    }

    /// Snapshot of a job owned by `owner`. Jobs of other users are reported
    /// as missing.
    pub async fn job(&self, owner: Uuid, job_id: Uuid) -> Result<EbookJob> {
        match self.store.get_job(job_id).await? {
            Some(job) if job.user_id == owner => Ok(job),
            _ => Err(AppError::JobNotFound {
                id: job_id.to_string(),
            }),
        }
    }

    /// Call the LLM on behalf of a job, marking the job failed when the
    /// client gives up.
    async fn generate_for(&self, job_id: Uuid, prompt: &str, max_tokens: u32) -> Result<String> {
        self.generate_for_with(job_id, prompt, max_tokens, |text| text.to_string())
            .await
    }

    /// [`EbookPipeline::generate_for`] with a per-completion cleanup step
    async fn generate_for_with<F>(
        &self,
        job_id: Uuid,
        prompt: &str,
        max_tokens: u32,
        refine: F,
    ) -> Result<String>
    where
        F: Fn(&str) -> String,
    {
        match self.llm.call_with(prompt, max_tokens, refine).await {
            Ok(text) => Ok(text),
            Err(err) => {
                self.mark_failed(job_id, &err).await;
                Err(err)
            }
        }
    }

    /// Record a stage failure on the job. Best effort: a job that already
    /// completed stays complete, and store errors are only logged.
    #[instrument(skip(self, cause))]
    pub async fn mark_failed(&self, job_id: Uuid, cause: &AppError) {
        let message = cause.to_string();
        let result = self
            .write_job(job_id, |job| {
                if job.status == JobStatus::Complete {
                    return Ok(None);
                }
                Ok(Some(JobPatch::failed(message.clone())))
            })
            .await;

        match result {
            Ok((_, true)) => warn!(error = %message, "Job marked as failed"),
            Ok((_, false)) => warn!(error = %message, "Stage failed on a completed job"),
            Err(e) => warn!(error = %e, "Could not record job failure"),
        }
    }

    /// Read-check-write against the job row.
    ///
    /// `build` inspects the freshest snapshot and returns the patch to apply,
    /// or `None` when nothing needs writing. On a version conflict the row is
    /// re-read and `build` runs again, up to `write_retries` times. Returns
    /// the resulting job and whether a write happened.
    pub(crate) async fn write_job<F>(&self, job_id: Uuid, mut build: F) -> Result<(EbookJob, bool)>
    where
        F: FnMut(&EbookJob) -> Result<Option<JobPatch>> + Send,
    {
        let mut attempt = 0;
        loop {
            let job = self
                .store
                .get_job(job_id)
                .await?
                .ok_or_else(|| AppError::JobNotFound {
                    id: job_id.to_string(),
                })?;

            let Some(patch) = build(&job)? else {
                return Ok((job, false));
            };

            match self.store.update_job(job_id, patch, job.version).await {
                Ok(updated) => return Ok((updated, true)),
                Err(AppError::Conflict { .. }) if attempt < self.config.write_retries => {
                    attempt += 1;
                    tracing::debug!(%job_id, attempt, "Job changed underneath us, retrying write");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Record the duration and outcome of a stage
fn observe<T>(stage: &'static str, start: Instant, result: &Result<T>) {
    metrics::record_stage(stage, start.elapsed().as_secs_f64(), result.is_ok());
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::llm::ScriptedProvider;

    #[tokio::test]
    async fn test_start_runs_title_and_outline() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();

        let job = pipeline.start(owner, short_book("Sourdough")).await.unwrap();
        assert_eq!(job.title.as_deref(), Some("Crust & Crumb"));
        assert_eq!(job.status, JobStatus::OutlineDone);
        assert_eq!(job.total_chapters, 3);
        assert_eq!(job.outline.len(), 3);
        assert_eq!(job.content_parts.len(), 3);
        assert_eq!(job.progress, 0);
        assert_eq!(job.tone, DEFAULT_TONE);
    }

    #[tokio::test]
    async fn test_start_requires_topic() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let err = pipeline
            .start(Uuid::new_v4(), short_book("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_llm_failure_marks_job_failed() {
        let provider = Arc::new(ScriptedProvider::new(|_, _| {
            Err(AppError::Internal {
                message: "provider down".to_string(),
            })
        }));
        let (pipeline, store) = pipeline_with(provider);
        let owner = Uuid::new_v4();

        let err = pipeline.start(owner, short_book("Kites")).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamGeneration { attempts: 3, .. }));

        let tables = store.all_jobs().await;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].status, JobStatus::Error);
        let message = tables[0].error_message.as_deref().unwrap();
        assert!(message.contains("provider down"));
        assert!(message.len() <= crate::errors::MAX_ERROR_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_jobs_of_other_users_are_hidden() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let job = pipeline.start(Uuid::new_v4(), short_book("Tea")).await.unwrap();

        let err = pipeline.job(Uuid::new_v4(), job.id).await.unwrap_err();
        assert!(matches!(err, AppError::JobNotFound { .. }));
    }
}
