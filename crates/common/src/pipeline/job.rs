//! Ebook job domain model
//!
//! The job record is the only shared mutable resource of the pipeline.
//! Every mutation goes through [`EbookJob::apply`], which enforces the
//! record's invariants regardless of which store persists it.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    OutlineDone,
    Writing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::OutlineDone => "outline_done",
            JobStatus::Writing => "writing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// Position along the forward path. `Error` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::OutlineDone => Some(1),
            JobStatus::Writing => Some(2),
            JobStatus::Complete => Some(3),
            JobStatus::Error => None,
        }
    }

    /// Whether chapter generation may run in this state. An errored job can
    /// be resumed by an explicit chapter retry.
    pub fn accepts_chapters(&self) -> bool {
        matches!(
            self,
            JobStatus::OutlineDone | JobStatus::Writing | JobStatus::Error
        )
    }

    /// Forward-only transitions, plus `error` from any non-terminal state.
    /// Staying in place is always allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match (*self, next) {
            (JobStatus::Complete, _) => false,
            (_, JobStatus::Error) => true,
            // explicit chapter retry after a failure
            (JobStatus::Error, JobStatus::Writing | JobStatus::Complete) => true,
            (JobStatus::Error, _) => false,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "outline_done" => Ok(JobStatus::OutlineDone),
            "writing" => Ok(JobStatus::Writing),
            "complete" => Ok(JobStatus::Complete),
            "error" => Ok(JobStatus::Error),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown job status '{}'", other),
            }),
        }
    }
}

/// Requested book length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl BookLength {
    /// Target number of chapters
    pub fn chapter_count(&self) -> usize {
        match self {
            BookLength::Short => 3,
            BookLength::Medium => 5,
            BookLength::Long => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookLength::Short => "short",
            BookLength::Medium => "medium",
            BookLength::Long => "long",
        }
    }

    /// Rough word target per chapter used in prompts
    pub fn words_per_chapter(&self) -> u32 {
        match self {
            BookLength::Short => 900,
            BookLength::Medium => 1200,
            BookLength::Long => 1500,
        }
    }
}

impl FromStr for BookLength {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(BookLength::Short),
            "medium" => Ok(BookLength::Medium),
            "long" => Ok(BookLength::Long),
            other => Err(AppError::Validation {
                message: format!("length must be one of short, medium, long (got '{}')", other),
                field: Some("length".to_string()),
            }),
        }
    }
}

/// A planned chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEntry {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, alias = "estimated_words", skip_serializing_if = "Option::is_none")]
    pub estimated_words: Option<u32>,
}

/// Fixed-size table mapping chapter index to generated markdown.
///
/// Slots are write-once. Empty strings are never stored; they read back as
/// an unfilled slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct ChapterSlots(Vec<Option<String>>);

impl ChapterSlots {
    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|slot| slot.as_deref())
    }

    pub fn is_filled(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Store content at `index`. Returns `Ok(false)` without touching the
    /// slot when it is already filled.
    pub fn fill(&mut self, index: usize, content: String) -> Result<bool> {
        let len = self.0.len();
        let slot = self.0.get_mut(index).ok_or_else(|| AppError::Validation {
            message: format!("chapter index {} out of range 0..{}", index, len),
            field: Some("chapterIndex".to_string()),
        })?;
        if slot.is_some() {
            return Ok(false);
        }
        if content.trim().is_empty() {
            return Err(AppError::Validation {
                message: "chapter content is empty".to_string(),
                field: None,
            });
        }
        *slot = Some(content);
        Ok(true)
    }

    pub fn filled_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    /// Lowest unfilled index
    pub fn first_empty(&self) -> Option<usize> {
        self.0.iter().position(|slot| slot.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.0.iter().map(|slot| slot.as_deref())
    }

    /// True when every slot filled in `self` holds the same text in `next`.
    fn preserved_by(&self, next: &ChapterSlots) -> bool {
        self.0.iter().enumerate().all(|(i, slot)| match slot {
            Some(content) => next.get(i) == Some(content.as_str()),
            None => true,
        })
    }
}

impl From<Vec<Option<String>>> for ChapterSlots {
    fn from(slots: Vec<Option<String>>) -> Self {
        Self(
            slots
                .into_iter()
                .map(|slot| slot.filter(|s| !s.trim().is_empty()))
                .collect(),
        )
    }
}

impl From<ChapterSlots> for Vec<Option<String>> {
    fn from(slots: ChapterSlots) -> Self {
        slots.0
    }
}

/// One ebook generation request and its accumulated state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbookJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub topic: String,
    pub tone: String,
    pub length: BookLength,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub outline: Vec<OutlineEntry>,
    pub total_chapters: u32,
    pub content_parts: ChapterSlots,
    pub progress: u32,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub cover_prompt: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub topic: String,
    pub tone: String,
    pub length: BookLength,
}

/// Partial update merged into a job by [`EbookJob::apply`]
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub outline: Option<Vec<OutlineEntry>>,
    pub content_parts: Option<ChapterSlots>,
    pub status: Option<JobStatus>,
    /// `Some(None)` clears the message
    pub error_message: Option<Option<String>>,
    pub cover_prompt: Option<String>,
}

impl JobPatch {
    /// Patch marking a job failed
    pub fn failed(message: String) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_message: Some(Some(crate::errors::truncate_message(
                &message,
                crate::errors::MAX_ERROR_MESSAGE_LEN,
            ))),
            ..Default::default()
        }
    }
}

impl EbookJob {
    /// Build a fresh pending job
    pub fn new(id: Uuid, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            topic: new.topic,
            tone: new.tone,
            length: new.length,
            title: None,
            subtitle: None,
            outline: Vec::new(),
            total_chapters: 0,
            content_parts: ChapterSlots::default(),
            progress: 0,
            status: JobStatus::Pending,
            error_message: None,
            cover_prompt: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_outline(&self) -> bool {
        !self.outline.is_empty()
    }

    /// Merge `patch` into the job, rejecting any change that would break an
    /// invariant. On error the job is left untouched.
    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) -> Result<()> {
        let mut next = self.clone();

        if let Some(title) = patch.title {
            next.title = Some(title);
        }
        if let Some(subtitle) = patch.subtitle {
            next.subtitle = Some(subtitle);
        }
        if let Some(cover_prompt) = patch.cover_prompt {
            next.cover_prompt = Some(cover_prompt);
        }

        if let Some(outline) = patch.outline {
            if self.has_outline() && outline != self.outline {
                return Err(AppError::Validation {
                    message: format!("outline of job {} is already set", self.id),
                    field: Some("outline".to_string()),
                });
            }
            if outline.is_empty() {
                return Err(AppError::Validation {
                    message: "outline must not be empty".to_string(),
                    field: Some("outline".to_string()),
                });
            }
            next.total_chapters = outline.len() as u32;
            if next.content_parts.len() != outline.len() {
                next.content_parts = ChapterSlots::new(outline.len());
            }
            next.outline = outline;
        }

        if let Some(parts) = patch.content_parts {
            if parts.len() != next.total_chapters as usize {
                return Err(AppError::Validation {
                    message: format!(
                        "content slots ({}) do not match total chapters ({})",
                        parts.len(),
                        next.total_chapters
                    ),
                    field: Some("contentParts".to_string()),
                });
            }
            if !self.content_parts.preserved_by(&parts) {
                return Err(AppError::Conflict {
                    resource: "chapter".to_string(),
                    id: self.id.to_string(),
                });
            }
            next.content_parts = parts;
        }
        next.progress = next.content_parts.filled_count() as u32;

        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(AppError::InvalidTransition {
                    from: self.status.to_string(),
                    to: status.to_string(),
                });
            }
            next.status = status;
        }

        match patch.error_message {
            Some(Some(message)) if next.status == JobStatus::Error => {
                next.error_message = Some(message);
            }
            Some(Some(_)) => {
                return Err(AppError::Validation {
                    message: "error message is only recorded on failed jobs".to_string(),
                    field: None,
                });
            }
            Some(None) => next.error_message = None,
            None => {}
        }

        let full = next.total_chapters > 0 && next.progress == next.total_chapters;
        if (next.status == JobStatus::Complete) != full && next.status != JobStatus::Error {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.status.to_string(),
            });
        }

        next.version = self.version + 1;
        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(n: usize) -> Vec<OutlineEntry> {
        (1..=n as u32)
            .map(|number| OutlineEntry {
                number,
                title: format!("Chapter {}", number),
                goal: "goal".to_string(),
                estimated_words: None,
            })
            .collect()
    }

    fn job() -> EbookJob {
        EbookJob::new(
            Uuid::new_v4(),
            NewJob {
                user_id: Uuid::new_v4(),
                topic: "Rust".to_string(),
                tone: "friendly".to_string(),
                length: BookLength::Short,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_length_chapter_targets() {
        assert_eq!(BookLength::Short.chapter_count(), 3);
        assert_eq!(BookLength::Medium.chapter_count(), 5);
        assert_eq!(BookLength::Long.chapter_count(), 7);
        assert_eq!("LONG".parse::<BookLength>().unwrap(), BookLength::Long);
        assert!("epic".parse::<BookLength>().is_err());
    }

    #[test]
    fn test_status_only_moves_forward() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(OutlineDone));
        assert!(OutlineDone.can_transition_to(Writing));
        assert!(Writing.can_transition_to(Complete));
        assert!(OutlineDone.can_transition_to(Complete));
        assert!(!Writing.can_transition_to(OutlineDone));
        assert!(!Complete.can_transition_to(Writing));
        assert!(!Complete.can_transition_to(Error));
        assert!(Pending.can_transition_to(Error));
        assert!(Writing.can_transition_to(Error));
        assert!(!Error.can_transition_to(Pending));
        assert!(!Error.can_transition_to(OutlineDone));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::OutlineDone,
            JobStatus::Writing,
            JobStatus::Complete,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_slots_are_write_once() {
        let mut slots = ChapterSlots::new(2);
        assert!(slots.fill(0, "first".into()).unwrap());
        assert!(!slots.fill(0, "second".into()).unwrap());
        assert_eq!(slots.get(0), Some("first"));
        assert_eq!(slots.filled_count(), 1);
        assert_eq!(slots.first_empty(), Some(1));
        assert!(slots.fill(2, "x".into()).is_err());
    }

    #[test]
    fn test_empty_strings_read_as_unfilled() {
        let slots = ChapterSlots::from(vec![Some(String::new()), Some("a".into()), None]);
        assert_eq!(slots.filled_count(), 1);
        assert!(!slots.is_filled(0));
    }

    #[test]
    fn test_outline_sizes_slots_and_is_immutable() {
        let mut job = job();
        job.apply(
            JobPatch {
                outline: Some(outline(3)),
                status: Some(JobStatus::OutlineDone),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.total_chapters, 3);
        assert_eq!(job.content_parts.len(), 3);
        assert_eq!(job.version, 1);

        let err = job
            .apply(
                JobPatch {
                    outline: Some(outline(4)),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(job.total_chapters, 3);
    }

    #[test]
    fn test_progress_recomputed_and_complete_requires_all_slots() {
        let mut job = job();
        job.apply(
            JobPatch {
                outline: Some(outline(2)),
                status: Some(JobStatus::OutlineDone),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();

        let mut parts = job.content_parts.clone();
        parts.fill(0, "one".into()).unwrap();
        let premature = job.apply(
            JobPatch {
                content_parts: Some(parts.clone()),
                status: Some(JobStatus::Complete),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(premature.is_err());
        assert_eq!(job.progress, 0);

        job.apply(
            JobPatch {
                content_parts: Some(parts.clone()),
                status: Some(JobStatus::Writing),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.progress, 1);

        parts.fill(1, "two".into()).unwrap();
        job.apply(
            JobPatch {
                content_parts: Some(parts),
                status: Some(JobStatus::Complete),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.progress, 2);
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[test]
    fn test_filled_slot_cannot_be_overwritten() {
        let mut job = job();
        job.apply(
            JobPatch {
                outline: Some(outline(1)),
                status: Some(JobStatus::OutlineDone),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        job.apply(
            JobPatch {
                content_parts: Some(ChapterSlots::from(vec![Some("a".to_string())])),
                status: Some(JobStatus::Complete),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();

        let err = job
            .apply(
                JobPatch {
                    content_parts: Some(ChapterSlots::from(vec![Some("b".to_string())])),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(job.content_parts.get(0), Some("a"));
    }

    #[test]
    fn test_failed_patch_truncates_message() {
        let mut job = job();
        job.apply(JobPatch::failed("e".repeat(900)), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_ref().unwrap().len(), 500);
    }

    #[test]
    fn test_error_message_rejected_on_healthy_job() {
        let mut job = job();
        let result = job.apply(
            JobPatch {
                error_message: Some(Some("boom".to_string())),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(result.is_err());
        assert!(job.error_message.is_none());
    }
}
