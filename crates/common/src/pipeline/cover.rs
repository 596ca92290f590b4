//! Cover stage

use super::job::JobPatch;
use super::{observe, prompts, EbookPipeline};
use crate::errors::{AppError, Result};
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Input of the cover stage. Runs standalone or attached to a job.
#[derive(Debug, Clone, Default)]
pub struct CoverRequest {
    pub title: String,
    pub subtitle: String,
    pub topic: Option<String>,
    pub job_id: Option<Uuid>,
}

/// Strip wrapping quotes and labels the model sometimes adds
pub fn clean_cover_prompt(text: &str) -> String {
    let mut text = text.trim();
    for label in ["Prompt:", "prompt:", "Cover prompt:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

impl EbookPipeline {
    /// Produce an image-generation prompt for the book cover. With a job id
    /// the prompt is stored on that job.
    #[instrument(skip(self, request), fields(job_id = ?request.job_id))]
    pub async fn generate_cover(&self, owner: Uuid, request: CoverRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.cover_stage(owner, request).await;
        observe("cover", start, &result);
        result
    }

    async fn cover_stage(&self, owner: Uuid, request: CoverRequest) -> Result<String> {
        let title = request.title.trim();
        let subtitle = request.subtitle.trim();
        if title.is_empty() {
            return Err(AppError::MissingField {
                field: "title".to_string(),
            });
        }
        if subtitle.is_empty() {
            return Err(AppError::MissingField {
                field: "subtitle".to_string(),
            });
        }

        let job = match request.job_id {
            Some(job_id) => Some(self.job(owner, job_id).await?),
            None => None,
        };
        let topic = request
            .topic
            .as_deref()
            .or(job.as_ref().map(|j| j.topic.as_str()));

        let prompt = prompts::cover_prompt(title, subtitle, topic);
        let max_tokens = self.config.cover_max_tokens;
        let cover_prompt = match &job {
            Some(job) => {
                self.generate_for_with(job.id, &prompt, max_tokens, clean_cover_prompt)
                    .await?
            }
            None => {
                self.llm
                    .call_with(&prompt, max_tokens, clean_cover_prompt)
                    .await?
            }
        };

        if let Some(job) = job {
            self.write_job(job.id, |_| {
                Ok(Some(JobPatch {
                    cover_prompt: Some(cover_prompt.clone()),
                    ..Default::default()
                }))
            })
            .await?;
        }

        info!(chars = cover_prompt.len(), "Cover prompt generated");
        Ok(cover_prompt)
    }
}
