//! Debounced commit scheduling.
//!
//! A burst of revisions on one document should produce one commit, not one
//! per keystroke. The first trigger takes a short-TTL lock and queues a
//! commit job to run just after the lock expires; triggers arriving while
//! the lock is held are dropped because that job will see their revisions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::{SchedulerError, SyncError};
use crate::events::{EventSink, SyncEvent};
use crate::model::DocumentId;
use crate::traits::{Job, JobScheduler, LockService};

/// What a commit trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new commit job was queued
    Scheduled,
    /// A commit job was already pending
    AlreadyPending,
}

/// Collapses commit triggers into delayed commit jobs.
pub struct CommitScheduler {
    locks: Arc<dyn LockService>,
    jobs: Arc<dyn JobScheduler>,
    events: Arc<dyn EventSink>,
    config: SyncConfig,
}

impl CommitScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        locks: Arc<dyn LockService>,
        jobs: Arc<dyn JobScheduler>,
        events: Arc<dyn EventSink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            locks,
            jobs,
            events,
            config,
        }
    }

    /// Queue a commit for `document_id` unless one is already pending.
    ///
    /// # Errors
    ///
    /// Returns error if the lock backend or the job queue fails.
    pub async fn schedule(&self, document_id: &DocumentId) -> Result<ScheduleOutcome, SyncError> {
        let acquired = self
            .locks
            .try_acquire(&document_id.commit_debounce_key(), self.config.commit_debounce)
            .await?;

        if !acquired {
            self.events.emit(SyncEvent::CommitAlreadyPending {
                document_id: document_id.clone(),
            });
            return Ok(ScheduleOutcome::AlreadyPending);
        }

        let delay = self.config.commit_delay();
        self.jobs
            .enqueue_delayed(
                Job::Commit {
                    document_id: document_id.clone(),
                },
                delay,
            )
            .await?;

        self.events.emit(SyncEvent::CommitScheduled {
            document_id: document_id.clone(),
            delay,
        });
        Ok(ScheduleOutcome::Scheduled)
    }
}

/// In-process job scheduler backed by tokio timers.
///
/// Due jobs are delivered on the channel returned by [`TokioJobScheduler::new`];
/// the owner of the receiver runs them.
#[derive(Debug, Clone)]
pub struct TokioJobScheduler {
    sender: mpsc::UnboundedSender<Job>,
}

impl TokioJobScheduler {
    /// Create a scheduler and the receiving end of its job queue.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<(), SchedulerError> {
        if self.sender.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = sender.send(job) {
                tracing::warn!(job = ?err.0, "Job queue closed before delivery");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::memory::LocalLockService;

    fn scheduler(config: SyncConfig) -> (CommitScheduler, mpsc::UnboundedReceiver<Job>) {
        let (jobs, receiver) = TokioJobScheduler::new();
        let scheduler = CommitScheduler::new(
            Arc::new(LocalLockService::new()),
            Arc::new(jobs),
            Arc::new(MemoryEventSink::new()),
            config,
        );
        (scheduler, receiver)
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            commit_debounce: Duration::from_millis(50),
            commit_delay_slack: Duration::from_millis(10),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn burst_collapses_into_one_job() {
        let (scheduler, mut receiver) = scheduler(fast_config());
        let doc = DocumentId::new("doc");

        assert_eq!(
            scheduler.schedule(&doc).await.unwrap(),
            ScheduleOutcome::Scheduled
        );
        for _ in 0..5 {
            assert_eq!(
                scheduler.schedule(&doc).await.unwrap(),
                ScheduleOutcome::AlreadyPending
            );
        }

        let job = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("job not delivered")
            .expect("queue closed");
        assert_eq!(job, Job::Commit { document_id: doc });

        let extra = tokio::time::timeout(Duration::from_millis(150), receiver.recv()).await;
        assert!(extra.is_err(), "burst produced more than one job");
    }

    #[tokio::test]
    async fn documents_are_debounced_independently() {
        let (scheduler, _receiver) = scheduler(fast_config());

        assert_eq!(
            scheduler.schedule(&DocumentId::new("a")).await.unwrap(),
            ScheduleOutcome::Scheduled
        );
        assert_eq!(
            scheduler.schedule(&DocumentId::new("b")).await.unwrap(),
            ScheduleOutcome::Scheduled
        );
    }

    #[tokio::test]
    async fn schedules_again_after_debounce_expires() {
        let (scheduler, _receiver) = scheduler(fast_config());
        let doc = DocumentId::new("doc");

        scheduler.schedule(&doc).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(
            scheduler.schedule(&doc).await.unwrap(),
            ScheduleOutcome::Scheduled
        );
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (jobs, receiver) = TokioJobScheduler::new();
        drop(receiver);

        let result = jobs
            .enqueue_delayed(
                Job::Commit {
                    document_id: DocumentId::new("doc"),
                },
                Duration::from_millis(1),
            )
            .await;
        assert!(matches!(result, Err(SchedulerError::Closed)));
    }
}
