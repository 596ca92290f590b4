//! Outline stage

use super::job::{BookLength, EbookJob, JobPatch, JobStatus, OutlineEntry};
use super::{observe, prompts, EbookPipeline};
use crate::errors::{AppError, Result};
use crate::llm::parse::{self, Fallback, Parsed};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, instrument};

const PLACEHOLDER_TITLES: &[&str] = &[
    "Foundations of {topic}",
    "Core Principles",
    "Practical Techniques",
    "Common Mistakes and How to Avoid Them",
    "Advanced Strategies",
    "Real-World Case Studies",
    "Putting {topic} into Practice",
];

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "description", alias = "summary")]
    goal: String,
    #[serde(default, alias = "estimatedWords")]
    estimated_words: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOutline {
    List(Vec<RawEntry>),
    Wrapped { chapters: Vec<RawEntry> },
}

/// Placeholder outline of exactly `length.chapter_count()` entries
pub fn placeholder_outline(topic: &str, length: BookLength) -> Vec<OutlineEntry> {
    (0..length.chapter_count())
        .map(|i| placeholder_entry(topic, length, i))
        .collect()
}

fn placeholder_entry(topic: &str, length: BookLength, index: usize) -> OutlineEntry {
    let title = match PLACEHOLDER_TITLES.get(index) {
        Some(template) => template.replace("{topic}", topic),
        None => format!("Chapter {}", index + 1),
    };
    OutlineEntry {
        number: index as u32 + 1,
        goal: format!("Cover {} as it relates to {}", title.to_lowercase(), topic),
        title,
        estimated_words: Some(length.words_per_chapter()),
    }
}

/// Decode the outline and force it to the target chapter count: entries
/// without a title are dropped, extra entries truncated, missing ones padded
/// with placeholders, and numbers rewritten 1..n.
pub fn parse_outline(text: &str, topic: &str, length: BookLength) -> Parsed<Vec<OutlineEntry>> {
    let raw = match parse::parse_json::<RawOutline>(text) {
        Ok(RawOutline::List(entries)) | Ok(RawOutline::Wrapped { chapters: entries }) => entries,
        Err(reason) => return Err(Fallback::new(placeholder_outline(topic, length), reason)),
    };

    let target = length.chapter_count();
    let mut entries: Vec<OutlineEntry> = raw
        .into_iter()
        .filter(|e| !e.title.trim().is_empty())
        .map(|e| OutlineEntry {
            number: 0,
            title: e.title.trim().to_string(),
            goal: e.goal.trim().to_string(),
            estimated_words: e.estimated_words,
        })
        .collect();

    if entries.is_empty() {
        return Err(Fallback::new(
            placeholder_outline(topic, length),
            "outline contained no chapters",
        ));
    }

    if entries.len() != target {
        debug!(received = entries.len(), target, "Normalising outline length");
    }
    entries.truncate(target);
    while entries.len() < target {
        entries.push(placeholder_entry(topic, length, entries.len()));
    }
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.number = i as u32 + 1;
    }

    Ok(entries)
}

impl EbookPipeline {
    /// Plan the chapters and size the slot table
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn run_outline(&self, job: &EbookJob) -> Result<EbookJob> {
        let start = Instant::now();
        let result = self.outline_stage(job).await;
        observe("outline", start, &result);
        result
    }

    async fn outline_stage(&self, job: &EbookJob) -> Result<EbookJob> {
        let (Some(title), Some(subtitle)) = (job.title.as_deref(), job.subtitle.as_deref()) else {
            return Err(AppError::JobNotReady {
                id: job.id.to_string(),
                message: "outline requires a title".to_string(),
            });
        };
        if job.has_outline() {
            return Err(AppError::JobNotReady {
                id: job.id.to_string(),
                message: "outline already generated".to_string(),
            });
        }

        let prompt = prompts::outline_prompt(title, subtitle, &job.topic, &job.tone, job.length);
        let text = self
            .generate_for(job.id, &prompt, self.config.outline_max_tokens)
            .await?;
        let outline = parse::settle(parse_outline(&text, &job.topic, job.length), "outline");

        let (job, _) = self
            .write_job(job.id, |_| {
                Ok(Some(JobPatch {
                    outline: Some(outline.clone()),
                    status: Some(JobStatus::OutlineDone),
                    ..Default::default()
                }))
            })
            .await?;

        info!(chapters = job.total_chapters, "Outline generated");
        Ok(job)
    }
}
