//! Title stage

use super::job::{EbookJob, JobPatch, JobStatus};
use super::{observe, prompts, EbookPipeline};
use crate::errors::{AppError, Result};
use crate::llm::parse::{self, Fallback, Parsed};
use serde::Deserialize;
use std::time::Instant;
use tracing::{info, instrument};

/// Title and subtitle proposed for a book
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TitleDraft {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
}

impl TitleDraft {
    pub fn placeholder(topic: &str) -> Self {
        Self {
            title: format!("Mastering {}", topic),
            subtitle: format!("A practical guide to {}", topic),
        }
    }
}

/// Decode the title JSON, falling back to a templated title for `topic`.
/// A missing subtitle is filled from the template rather than rejected.
pub fn parse_title(text: &str, topic: &str) -> Parsed<TitleDraft> {
    let placeholder = TitleDraft::placeholder(topic);

    let draft: TitleDraft = match parse::parse_json(text) {
        Ok(draft) => draft,
        Err(reason) => return Err(Fallback::new(placeholder, reason)),
    };

    let title = draft.title.trim();
    if title.is_empty() {
        return Err(Fallback::new(placeholder, "empty title"));
    }

    let subtitle = match draft.subtitle.trim() {
        "" => placeholder.subtitle,
        s => s.to_string(),
    };

    Ok(TitleDraft {
        title: title.to_string(),
        subtitle,
    })
}

impl EbookPipeline {
    /// Name the book. The job stays `pending` until its outline exists.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn run_title(&self, job: &EbookJob) -> Result<EbookJob> {
        let start = Instant::now();
        let result = self.title_stage(job).await;
        observe("title", start, &result);
        result
    }

    async fn title_stage(&self, job: &EbookJob) -> Result<EbookJob> {
        if job.status != JobStatus::Pending {
            return Err(AppError::JobNotReady {
                id: job.id.to_string(),
                message: format!("title runs on pending jobs, job is {}", job.status),
            });
        }

        let prompt = prompts::title_prompt(&job.topic, &job.tone);
        let text = self
            .generate_for(job.id, &prompt, self.config.title_max_tokens)
            .await?;
        let draft = parse::settle(parse_title(&text, &job.topic), "title");

        let (job, _) = self
            .write_job(job.id, |_| {
                Ok(Some(JobPatch {
                    title: Some(draft.title.clone()),
                    subtitle: Some(draft.subtitle.clone()),
                    ..Default::default()
                }))
            })
            .await?;

        info!(title = job.title.as_deref().unwrap_or_default(), "Title generated");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_title_json_in_prose() {
        let text = "Here it is:\n{\"title\": \" Deep Work \", \"subtitle\": \"Focus wins\"}";
        let draft = parse_title(text, "focus").unwrap();
        assert_eq!(draft.title, "Deep Work");
        assert_eq!(draft.subtitle, "Focus wins");
    }

    #[test]
    fn test_bad_json_falls_back_to_template() {
        let fallback = parse_title("Deep Work, a book", "focus").unwrap_err();
        assert_eq!(fallback.value.title, "Mastering focus");
        assert!(!fallback.value.subtitle.is_empty());
    }

    #[test]
    fn test_missing_subtitle_is_templated() {
        let draft = parse_title("{\"title\": \"Deep Work\"}", "focus").unwrap();
        assert_eq!(draft.subtitle, "A practical guide to focus");
    }

    #[test]
    fn test_blank_title_falls_back() {
        assert!(parse_title("{\"title\": \"  \", \"subtitle\": \"x\"}", "focus").is_err());
    }
}
