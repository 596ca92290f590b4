//! Status poller
//!
//! Client-side driver of a generation job: on every tick it fetches the job
//! status and, while chapters remain, requests the lowest unfilled chapter.
//! The slots are re-read on every tick, so a failed, duplicated or
//! out-of-order trigger corrects itself on the next one.

use super::job::{ChapterSlots, EbookJob, JobStatus};
use super::EbookPipeline;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The fields of a job snapshot the poller acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub status: JobStatus,
    pub progress: u32,
    pub total_chapters: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub content_parts: ChapterSlots,
}

impl JobProgress {
    /// Index of the chapter to request next, if any.
    ///
    /// `progress` counts filled slots, not a prefix, so it only stands in for
    /// the first gap when the snapshot carries no slots.
    pub fn next_chapter(&self) -> Option<u32> {
        let runnable = matches!(self.status, JobStatus::OutlineDone | JobStatus::Writing);
        if !runnable || self.progress >= self.total_chapters {
            return None;
        }
        if self.content_parts.is_empty() {
            return Some(self.progress);
        }
        self.content_parts
            .first_empty()
            .and_then(|index| u32::try_from(index).ok())
    }
}

impl From<EbookJob> for JobProgress {
    fn from(job: EbookJob) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            total_chapters: job.total_chapters,
            error_message: job.error_message,
            content_parts: job.content_parts,
        }
    }
}

/// Transport between the poller and the pipeline
#[async_trait]
pub trait JobDriver: Send + Sync {
    async fn fetch_status(&self, job_id: Uuid) -> Result<JobProgress>;

    async fn trigger_chapter(&self, job_id: Uuid, index: u32) -> Result<()>;

    /// Assembled Markdown of a completed job
    async fn finalize(&self, job_id: Uuid) -> Result<String>;
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Complete(JobProgress),
    Failed(JobProgress),
    Cancelled,
    /// `max_polls` ticks elapsed without reaching a terminal state
    Exhausted(Option<JobProgress>),
}

pub struct Poller<D> {
    driver: D,
    interval: Duration,
    max_polls: Option<u32>,
}

impl<D: JobDriver> Poller<D> {
    pub fn new(driver: D, interval: Duration) -> Self {
        Self {
            driver,
            interval,
            max_polls: None,
        }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Poll `job_id` until it completes, fails, or `cancel` turns true.
    /// An in-flight chapter request is never interrupted; cancellation only
    /// stops further ticks.
    pub async fn run(&self, job_id: Uuid, mut cancel: watch::Receiver<bool>) -> PollOutcome {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls = 0u32;
        let mut last_seen = None;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    info!(%job_id, polls, "Polling cancelled");
                    return PollOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            polls += 1;
            match self.driver.fetch_status(job_id).await {
                Ok(status) => {
                    debug!(
                        %job_id,
                        status = %status.status,
                        progress = status.progress,
                        total = status.total_chapters,
                        "Polled job"
                    );
                    match status.status {
                        JobStatus::Complete => return PollOutcome::Complete(status),
                        JobStatus::Error => {
                            warn!(%job_id, error = ?status.error_message, "Job failed, stopping");
                            return PollOutcome::Failed(status);
                        }
                        _ => {}
                    }

                    if let Some(index) = status.next_chapter() {
                        if let Err(e) = self.driver.trigger_chapter(job_id, index).await {
                            warn!(%job_id, chapter = index, error = %e, "Chapter trigger failed");
                        }
                    }
                    last_seen = Some(status);
                }
                Err(e) => warn!(%job_id, error = %e, "Status fetch failed"),
            }

            if self.max_polls.is_some_and(|max| polls >= max) {
                return PollOutcome::Exhausted(last_seen);
            }
        }
    }
}

/// Resolves once the flag is true. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives a job through an in-process pipeline on behalf of its owner
pub struct LocalDriver {
    pipeline: EbookPipeline,
    owner: Uuid,
}

impl LocalDriver {
    pub fn new(pipeline: EbookPipeline, owner: Uuid) -> Self {
        Self { pipeline, owner }
    }
}

#[async_trait]
impl JobDriver for LocalDriver {
    async fn fetch_status(&self, job_id: Uuid) -> Result<JobProgress> {
        let job = self.pipeline.job(self.owner, job_id).await?;
        Ok(job.into())
    }

    async fn trigger_chapter(&self, job_id: Uuid, index: u32) -> Result<()> {
        self.pipeline
            .generate_chapter(self.owner, job_id, i64::from(index))
            .await
            .map(|_| ())
    }

    async fn finalize(&self, job_id: Uuid) -> Result<String> {
        self.pipeline.finalize(self.owner, job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::errors::AppError;
    use crate::llm::ScriptedProvider;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const TICK: Duration = Duration::from_millis(1);

    /// Driver replaying a fixed sequence of snapshots and recording triggers
    struct ScriptedDriver {
        snapshots: Mutex<Vec<JobProgress>>,
        triggers: Mutex<Vec<u32>>,
        fetches: AtomicU32,
    }

    impl ScriptedDriver {
        fn new(mut snapshots: Vec<JobProgress>) -> Self {
            snapshots.reverse();
            Self {
                snapshots: Mutex::new(snapshots),
                triggers: Mutex::new(Vec::new()),
                fetches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobDriver for ScriptedDriver {
        async fn fetch_status(&self, _job_id: Uuid) -> Result<JobProgress> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut snapshots = self.snapshots.lock().unwrap();
            match snapshots.len() {
                0 => Err(AppError::Internal {
                    message: "script exhausted".to_string(),
                }),
                1 => Ok(snapshots[0].clone()),
                _ => Ok(snapshots.pop().unwrap()),
            }
        }

        async fn trigger_chapter(&self, _job_id: Uuid, index: u32) -> Result<()> {
            self.triggers.lock().unwrap().push(index);
            Err(AppError::Internal {
                message: "triggers fail in this script".to_string(),
            })
        }

        async fn finalize(&self, _job_id: Uuid) -> Result<String> {
            Ok(String::new())
        }
    }

    fn snapshot(status: JobStatus, progress: u32) -> JobProgress {
        JobProgress {
            status,
            progress,
            total_chapters: 3,
            error_message: None,
            content_parts: ChapterSlots::default(),
        }
    }

    fn slots(filled: &[bool]) -> ChapterSlots {
        let mut slots = ChapterSlots::new(filled.len());
        for (i, _) in filled.iter().enumerate().filter(|(_, f)| **f) {
            slots.fill(i, format!("chapter {i}")).unwrap();
        }
        slots
    }

    #[test]
    fn test_next_chapter() {
        assert_eq!(snapshot(JobStatus::OutlineDone, 0).next_chapter(), Some(0));
        assert_eq!(snapshot(JobStatus::Writing, 2).next_chapter(), Some(2));
        assert_eq!(snapshot(JobStatus::Pending, 0).next_chapter(), None);
        assert_eq!(snapshot(JobStatus::Error, 1).next_chapter(), None);
        assert_eq!(snapshot(JobStatus::Writing, 3).next_chapter(), None);
    }

    #[test]
    fn test_next_chapter_targets_first_gap() {
        let progress = JobProgress {
            content_parts: slots(&[false, false, true]),
            ..snapshot(JobStatus::Writing, 1)
        };
        assert_eq!(progress.next_chapter(), Some(0));

        let progress = JobProgress {
            content_parts: slots(&[true, false, true]),
            ..snapshot(JobStatus::Writing, 2)
        };
        assert_eq!(progress.next_chapter(), Some(1));
    }

    #[tokio::test]
    async fn test_fills_earlier_gap_after_out_of_order_chapter() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();
        pipeline.generate_chapter(owner, job.id, 2).await.unwrap();

        let poller = Poller::new(LocalDriver::new(pipeline.clone(), owner), TICK).with_max_polls(10);
        let (_tx, rx) = watch::channel(false);

        match poller.run(job.id, rx).await {
            PollOutcome::Complete(progress) => assert_eq!(progress.progress, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let job = pipeline.job(owner, job.id).await.unwrap();
        assert!((0..3).all(|i| job.content_parts.is_filled(i)));
    }

    #[tokio::test]
    async fn test_drives_job_to_completion() {
        let (pipeline, _) = pipeline_with(Arc::new(happy_provider(3)));
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        let poller = Poller::new(LocalDriver::new(pipeline.clone(), owner), TICK).with_max_polls(20);
        let (_tx, rx) = watch::channel(false);

        match poller.run(job.id, rx).await {
            PollOutcome::Complete(progress) => assert_eq!(progress.progress, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let markdown = poller.driver().finalize(job.id).await.unwrap();
        assert!(markdown.contains("Part 3"));
    }

    #[tokio::test]
    async fn test_stops_on_error() {
        let driver = ScriptedDriver::new(vec![
            snapshot(JobStatus::Writing, 1),
            JobProgress {
                error_message: Some("boom".to_string()),
                ..snapshot(JobStatus::Error, 1)
            },
        ]);
        let poller = Poller::new(driver, TICK).with_max_polls(10);
        let (_tx, rx) = watch::channel(false);

        let outcome = poller.run(Uuid::new_v4(), rx).await;
        assert!(matches!(outcome, PollOutcome::Failed(_)));
        assert_eq!(*poller.driver().triggers.lock().unwrap(), vec![1]);
        assert_eq!(poller.driver().fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_trigger_retries_same_index() {
        let driver = ScriptedDriver::new(vec![snapshot(JobStatus::Writing, 1)]);
        let poller = Poller::new(driver, TICK).with_max_polls(3);
        let (_tx, rx) = watch::channel(false);

        let outcome = poller.run(Uuid::new_v4(), rx).await;
        assert!(matches!(outcome, PollOutcome::Exhausted(Some(_))));
        assert_eq!(*poller.driver().triggers.lock().unwrap(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_pending_job_is_not_triggered() {
        let driver = ScriptedDriver::new(vec![snapshot(JobStatus::Pending, 0)]);
        let poller = Poller::new(driver, TICK).with_max_polls(2);
        let (_tx, rx) = watch::channel(false);

        poller.run(Uuid::new_v4(), rx).await;
        assert!(poller.driver().triggers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let driver = ScriptedDriver::new(vec![snapshot(JobStatus::Writing, 0)]);
        let poller = Poller::new(driver, Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let outcome = poller.run(Uuid::new_v4(), rx).await;
            (outcome, poller.driver().fetches.load(Ordering::SeqCst))
        });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let (outcome, fetches) = handle.await.unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
        // first tick fires immediately, the hour-long second one never does
        assert!(fetches <= 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_polls() {
        let driver = ScriptedDriver::new(vec![snapshot(JobStatus::Writing, 0)]);
        let poller = Poller::new(driver, TICK);
        let (_tx, rx) = watch::channel(true);

        assert_eq!(poller.run(Uuid::new_v4(), rx).await, PollOutcome::Cancelled);
        assert_eq!(poller.driver().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_llm_outage_surfaces_as_failed() {
        let provider = Arc::new(ScriptedProvider::new(|prompt, call| {
            if prompt.contains("You are writing chapter") {
                return Err(AppError::Internal {
                    message: "quota".to_string(),
                });
            }
            happy_response(prompt, call, 3)
        }));
        let (pipeline, _) = pipeline_with(provider);
        let owner = Uuid::new_v4();
        let job = pipeline.start(owner, short_book("Bread")).await.unwrap();

        let poller = Poller::new(LocalDriver::new(pipeline, owner), TICK).with_max_polls(5);
        let (_tx, rx) = watch::channel(false);

        match poller.run(job.id, rx).await {
            PollOutcome::Failed(progress) => {
                assert_eq!(progress.progress, 0);
                assert!(progress.error_message.unwrap().contains("quota"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
