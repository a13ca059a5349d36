//! Client-facing facade over the coordinator, scheduler, and engine.

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::coordinator::{ReviseOutcome, ReviseRequest, SyncCoordinator};
use crate::engine::{CommitEngine, CommitOutcome};
use crate::error::SyncError;
use crate::events::EventSink;
use crate::log::RevisionLog;
use crate::model::{DocumentId, Version};
use crate::scheduler::CommitScheduler;
use crate::traits::{DocumentStore, Job, JobScheduler, LockService, TextOps, Transport};

/// Everything the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Revision storage
    pub log: Arc<dyn RevisionLog>,
    /// Merge/extract capability
    pub text_ops: Arc<dyn TextOps>,
    /// Canonical content owner
    pub store: Arc<dyn DocumentStore>,
    /// Debounce locks and commit mutex
    pub locks: Arc<dyn LockService>,
    /// Peer fan-out
    pub transport: Arc<dyn Transport>,
    /// Delayed commit jobs
    pub jobs: Arc<dyn JobScheduler>,
    /// Observability sink
    pub events: Arc<dyn EventSink>,
}

/// Latest state of a document's log, as served to a joining editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestState {
    /// Highest version, `0` when collaborative mode is off
    pub version: Version,
    /// Full text at that version, if materialized
    pub materialized_text: Option<String>,
}

/// Implements `revise`, `toggle`, and `latest` for editors, and runs
/// delivered commit jobs.
pub struct SharedEditService {
    coordinator: SyncCoordinator,
    scheduler: Arc<CommitScheduler>,
    engine: CommitEngine,
}

impl SharedEditService {
    /// Wire a service from its collaborators.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: SyncConfig) -> Self {
        let Collaborators {
            log,
            text_ops,
            store,
            locks,
            transport,
            jobs,
            events,
        } = collaborators;

        let scheduler = Arc::new(CommitScheduler::new(
            locks.clone(),
            jobs,
            events.clone(),
            config.clone(),
        ));
        let coordinator = SyncCoordinator::new(
            log.clone(),
            text_ops.clone(),
            transport,
            scheduler.clone(),
            events.clone(),
            config.clone(),
        );
        let engine = CommitEngine::new(log, text_ops, store, locks, events, config);

        Self {
            coordinator,
            scheduler,
            engine,
        }
    }

    /// Submit an editor's update.
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::revise`].
    pub async fn revise(&self, request: ReviseRequest) -> Result<ReviseOutcome, SyncError> {
        self.coordinator.revise(request).await
    }

    /// Turn collaborative mode on or off.
    ///
    /// # Errors
    ///
    /// See [`CommitEngine::toggle`].
    pub async fn toggle(&self, document_id: &DocumentId, enabled: bool) -> Result<(), SyncError> {
        self.engine.toggle(document_id, enabled).await
    }

    /// Latest version and its text, after a merge-only commit has brought
    /// the snapshot cache up to date. Both come from the same replay, so the
    /// text always belongs to the version reported with it.
    ///
    /// # Errors
    ///
    /// Returns error if the log or the text capability fails.
    pub async fn latest(&self, document_id: &DocumentId) -> Result<LatestState, SyncError> {
        Ok(match self.engine.current_text(document_id).await? {
            Some((version, text)) => LatestState {
                version,
                materialized_text: Some(text),
            },
            None => LatestState {
                version: 0,
                materialized_text: None,
            },
        })
    }

    /// Commit immediately, bypassing the debounce.
    ///
    /// # Errors
    ///
    /// See [`CommitEngine::commit`].
    pub async fn commit_now(&self, document_id: &DocumentId) -> Result<CommitOutcome, SyncError> {
        self.engine.commit(document_id, true).await
    }

    /// Run a job delivered by the job scheduler. A commit that finds the
    /// commit mutex busy is queued again.
    ///
    /// # Errors
    ///
    /// Returns error if the commit fails or cannot be queued again.
    pub async fn run_job(&self, job: Job) -> Result<CommitOutcome, SyncError> {
        match job {
            Job::Commit { document_id } => {
                let outcome = self.engine.commit(&document_id, true).await?;
                if outcome == CommitOutcome::Deferred {
                    self.scheduler.schedule(&document_id).await?;
                }
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LogError, TextOpsError};
    use crate::events::MemoryEventSink;
    use crate::log::AppendOutcome;
    use crate::memory::{LocalLockService, MemoryDocumentStore, MemoryRevisionLog, MemoryTransport};
    use crate::model::{
        AuditRevisionId, AuthorId, ClientId, NewRevision, Revision, Snapshot, Update,
    };
    use crate::scheduler::TokioJobScheduler;
    use std::sync::Mutex;
    use std::time::Duration;

    struct PlainOps;

    impl TextOps for PlainOps {
        fn initial_state(&self, text: &str) -> Result<Update, TextOpsError> {
            Ok(Update::new(text.as_bytes().to_vec()))
        }

        fn merge(&self, updates: &[Update]) -> Result<Update, TextOpsError> {
            updates.last().cloned().ok_or(TextOpsError::EmptyMerge)
        }

        fn extract_text(&self, update: &Update) -> Result<String, TextOpsError> {
            String::from_utf8(update.as_bytes().to_vec())
                .map_err(|e| TextOpsError::Decode(e.to_string()))
        }
    }

    #[tokio::test]
    async fn scheduled_job_commits_after_debounce() {
        let store = Arc::new(MemoryDocumentStore::new());
        let doc = DocumentId::new("doc");
        store.insert_document(&doc, "Hello");
        let (jobs, mut receiver) = TokioJobScheduler::new();

        let service = SharedEditService::new(
            Collaborators {
                log: Arc::new(MemoryRevisionLog::new()),
                text_ops: Arc::new(PlainOps),
                store: store.clone(),
                locks: Arc::new(LocalLockService::new()),
                transport: Arc::new(MemoryTransport::new()),
                jobs: Arc::new(jobs),
                events: Arc::new(MemoryEventSink::new()),
            },
            SyncConfig {
                commit_debounce: Duration::from_millis(30),
                commit_delay_slack: Duration::from_millis(5),
                ..SyncConfig::default()
            },
        );

        service.toggle(&doc, true).await.unwrap();
        let outcome = service
            .revise(ReviseRequest {
                document_id: doc.clone(),
                author_id: AuthorId::new("u1"),
                client_id: ClientId::new("tab"),
                version: 1,
                update: Update::new(b"Hello, world".to_vec()),
                materialized_text: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.version(), 2);

        let latest = service.latest(&doc).await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.materialized_text.as_deref(), Some("Hello, world"));
        assert_eq!(store.content(&doc).as_deref(), Some("Hello"));

        let job = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            service.run_job(job).await.unwrap(),
            CommitOutcome::Committed { version: 2, .. }
        ));
        assert_eq!(store.content(&doc).as_deref(), Some("Hello, world"));
    }

    /// Lands `pending` in the log right after the first range read, the way
    /// a concurrent revise would between two reads of the log.
    struct AppendsDuringReplay {
        inner: MemoryRevisionLog,
        pending: Mutex<Option<NewRevision>>,
    }

    #[async_trait::async_trait]
    impl RevisionLog for AppendsDuringReplay {
        async fn append(&self, revision: NewRevision) -> Result<AppendOutcome, LogError> {
            self.inner.append(revision).await
        }

        async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, LogError> {
            self.inner.latest_version(document_id).await
        }

        async fn revisions_after(
            &self,
            document_id: &DocumentId,
            version: Version,
        ) -> Result<Vec<Revision>, LogError> {
            let revisions = self.inner.revisions_after(document_id, version).await?;
            let pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if let Some(revision) = pending {
                assert!(self.inner.append(revision).await?.is_inserted());
            }
            Ok(revisions)
        }

        async fn latest_snapshot(
            &self,
            document_id: &DocumentId,
        ) -> Result<Option<Snapshot>, LogError> {
            self.inner.latest_snapshot(document_id).await
        }

        async fn revision(
            &self,
            document_id: &DocumentId,
            version: Version,
        ) -> Result<Option<Revision>, LogError> {
            self.inner.revision(document_id, version).await
        }

        async fn latest_committed_version(
            &self,
            document_id: &DocumentId,
        ) -> Result<Version, LogError> {
            self.inner.latest_committed_version(document_id).await
        }

        async fn set_materialized_text(
            &self,
            document_id: &DocumentId,
            version: Version,
            text: &str,
        ) -> Result<(), LogError> {
            self.inner.set_materialized_text(document_id, version, text).await
        }

        async fn mark_committed(
            &self,
            document_id: &DocumentId,
            version: Version,
            audit_id: &AuditRevisionId,
        ) -> Result<(), LogError> {
            self.inner.mark_committed(document_id, version, audit_id).await
        }

        async fn delete_all(&self, document_id: &DocumentId) -> Result<usize, LogError> {
            self.inner.delete_all(document_id).await
        }
    }

    #[tokio::test]
    async fn latest_pairs_version_with_its_own_text() {
        let store = Arc::new(MemoryDocumentStore::new());
        let doc = DocumentId::new("doc");
        store.insert_document(&doc, "Hello");
        let (jobs, _receiver) = TokioJobScheduler::new();
        let log = Arc::new(AppendsDuringReplay {
            inner: MemoryRevisionLog::new(),
            pending: Mutex::new(None),
        });

        let service = SharedEditService::new(
            Collaborators {
                log: log.clone(),
                text_ops: Arc::new(PlainOps),
                store,
                locks: Arc::new(LocalLockService::new()),
                transport: Arc::new(MemoryTransport::new()),
                jobs: Arc::new(jobs),
                events: Arc::new(MemoryEventSink::new()),
            },
            SyncConfig::default(),
        );
        service.toggle(&doc, true).await.unwrap();

        *log.pending.lock().unwrap() = Some(NewRevision {
            document_id: doc.clone(),
            version: 2,
            author_id: AuthorId::new("u2"),
            client_id: ClientId::new("other-tab"),
            update: Update::new(b"Hello from elsewhere".to_vec()),
            materialized_text: None,
        });

        let first = service.latest(&doc).await.unwrap();
        assert_eq!(
            first,
            LatestState {
                version: 1,
                materialized_text: Some("Hello".to_string()),
            }
        );

        let second = service.latest(&doc).await.unwrap();
        assert_eq!(
            second,
            LatestState {
                version: 2,
                materialized_text: Some("Hello from elsewhere".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn latest_is_empty_before_enable() {
        let store = Arc::new(MemoryDocumentStore::new());
        let doc = DocumentId::new("doc");
        store.insert_document(&doc, "Hello");
        let (jobs, _receiver) = TokioJobScheduler::new();

        let service = SharedEditService::new(
            Collaborators {
                log: Arc::new(MemoryRevisionLog::new()),
                text_ops: Arc::new(PlainOps),
                store,
                locks: Arc::new(LocalLockService::new()),
                transport: Arc::new(MemoryTransport::new()),
                jobs: Arc::new(jobs),
                events: Arc::new(MemoryEventSink::new()),
            },
            SyncConfig::default(),
        );

        let latest = service.latest(&doc).await.unwrap();
        assert_eq!(latest.version, 0);
        assert!(latest.materialized_text.is_none());
    }
}
