//! Finalize stage: assemble the finished book as one Markdown document

use super::job::{EbookJob, JobStatus};
use super::{observe, EbookPipeline};
use crate::errors::{AppError, Result};
use std::fmt::Write;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Title, subtitle, table of contents and every chapter in outline order.
/// Chapters that do not open with a heading get one from the outline.
pub fn assemble(job: &EbookJob) -> String {
    let mut doc = String::new();
    let title = job.title.as_deref().unwrap_or(&job.topic);

    let _ = writeln!(doc, "# {}\n", title);
    if let Some(subtitle) = job.subtitle.as_deref() {
        let _ = writeln!(doc, "_{}_\n", subtitle);
    }

    doc.push_str("## Table of Contents\n\n");
    for entry in &job.outline {
        let _ = writeln!(doc, "{}. {}", entry.number, entry.title);
    }

    for (entry, content) in job.outline.iter().zip(job.content_parts.iter()) {
        doc.push_str("\n---\n\n");
        let content = content.unwrap_or_default().trim();
        if !content.starts_with('#') {
            let _ = writeln!(doc, "## Chapter {}: {}\n", entry.number, entry.title);
        }
        doc.push_str(content);
        doc.push('\n');
    }

    doc
}

impl EbookPipeline {
    /// Final Markdown of a completed job. Nothing is persisted.
    #[instrument(skip(self))]
    pub async fn finalize(&self, owner: Uuid, job_id: Uuid) -> Result<String> {
        let start = Instant::now();
        let result = self.job(owner, job_id).await.and_then(|job| {
            if job.status != JobStatus::Complete {
                return Err(AppError::JobNotReady {
                    id: job_id.to_string(),
                    message: format!(
                        "job is {} with {}/{} chapters",
                        job.status, job.progress, job.total_chapters
                    ),
                });
            }
            Ok(assemble(&job))
        });
        observe("finalize", start, &result);

        if let Ok(markdown) = &result {
            info!(bytes = markdown.len(), "Ebook finalized");
        }
        result
    }
}
