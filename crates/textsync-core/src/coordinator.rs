//! Optimistic revise protocol.
//!
//! A client sends an update based on the version it last saw. The
//! coordinator tries to append it one past that version. When another
//! writer got there first, the update is folded together with every
//! revision the client missed and the append is retried on top of them.
//!
//! ```text
//! ATTEMPT ──ok──► PUBLISH ──► SCHEDULE COMMIT ──► done
//!    ▲  │
//!    │  conflict
//!    │  ▼
//!   MERGE (fold missing revisions, back off)
//! ```
//!
//! Ordering rests entirely on [`RevisionLog::append`]; the loop is bounded
//! by [`SyncConfig::max_attempts`].

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventSink, SyncEvent};
use crate::log::{AppendOutcome, RevisionLog};
use crate::model::{
    AuthorId, ClientId, DocumentId, NewRevision, PublishedRevision, Revision, Update, Version,
};
use crate::scheduler::CommitScheduler;
use crate::traits::{TextOps, Transport};

/// An update submitted by an editor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviseRequest {
    /// Document being edited
    pub document_id: DocumentId,
    /// Editing user
    pub author_id: AuthorId,
    /// Editor session
    pub client_id: ClientId,
    /// Version the update was produced against
    pub version: Version,
    /// Opaque update
    pub update: Update,
    /// Full text after the update, when the client knows it
    pub materialized_text: Option<String>,
}

/// Result of a revise call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviseOutcome {
    /// The update landed at `version`; `update` is what was stored, which
    /// includes any revisions merged in while resolving conflicts.
    Applied {
        /// Version the update landed at
        version: Version,
        /// Stored update
        update: Update,
    },
    /// The update was too small to be genuine and was dropped.
    Declined {
        /// Current version of the log, unchanged
        version: Version,
    },
}

impl ReviseOutcome {
    /// Version to report back to the client.
    #[must_use]
    pub fn version(&self) -> Version {
        match self {
            Self::Applied { version, .. } | Self::Declined { version } => *version,
        }
    }
}

/// Runs the revise protocol against a revision log.
pub struct SyncCoordinator {
    log: Arc<dyn RevisionLog>,
    text_ops: Arc<dyn TextOps>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<CommitScheduler>,
    events: Arc<dyn EventSink>,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        log: Arc<dyn RevisionLog>,
        text_ops: Arc<dyn TextOps>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<CommitScheduler>,
        events: Arc<dyn EventSink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            log,
            text_ops,
            transport,
            scheduler,
            events,
            config,
        }
    }

    /// Append a client update, merging in missed revisions as needed, then
    /// announce it to peers and schedule a commit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotCollaborative`] if the document's log was
    /// never seeded, [`SyncError::InvalidVersion`] if the base version is
    /// not one the log has issued, [`SyncError::MissingRevisions`] if the
    /// log reports a conflict with nothing newer than the base version, and
    /// [`SyncError::ExcessContention`] once `max_attempts` appends have
    /// conflicted. Storage and merge failures are passed through.
    pub async fn revise(&self, request: ReviseRequest) -> Result<ReviseOutcome, SyncError> {
        let latest = self.log.latest_version(&request.document_id).await?;

        if request.update.len() < self.config.min_update_len {
            self.events.emit(SyncEvent::UpdateDeclined {
                document_id: request.document_id,
                len: request.update.len(),
                current_version: latest,
            });
            return Ok(ReviseOutcome::Declined { version: latest });
        }

        if latest == 0 {
            return Err(SyncError::NotCollaborative {
                document_id: request.document_id,
            });
        }
        if request.version == 0 || request.version > latest {
            return Err(SyncError::InvalidVersion {
                document_id: request.document_id,
                version: request.version,
                latest,
            });
        }

        let revision = self.append_with_retry(request).await?;

        self.publish(&revision).await;

        if let Err(err) = self.scheduler.schedule(&revision.document_id).await {
            self.events.emit(SyncEvent::ScheduleFailed {
                document_id: revision.document_id.clone(),
                error: err.to_string(),
            });
        }

        Ok(ReviseOutcome::Applied {
            version: revision.version,
            update: revision.update,
        })
    }

    async fn append_with_retry(&self, request: ReviseRequest) -> Result<Revision, SyncError> {
        let ReviseRequest {
            document_id,
            author_id,
            client_id,
            mut version,
            mut update,
            mut materialized_text,
        } = request;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let Some(next) = version.checked_add(1) else {
                return Err(SyncError::InvalidVersion {
                    document_id,
                    version,
                    latest: version,
                });
            };

            let candidate = NewRevision {
                document_id: document_id.clone(),
                version: next,
                author_id: author_id.clone(),
                client_id: client_id.clone(),
                update: update.clone(),
                materialized_text: materialized_text.clone(),
            };

            if let AppendOutcome::Inserted(revision) = self.log.append(candidate).await? {
                self.events.emit(SyncEvent::Appended {
                    document_id,
                    version: revision.version,
                    attempts: attempt,
                });
                return Ok(revision);
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.backoff_for(attempt)).await;
            }

            let missing = self.log.revisions_after(&document_id, version).await?;
            let Some(newest) = missing.last().map(|r| r.version) else {
                // Cleared by a concurrent disable.
                if self.log.latest_version(&document_id).await? == 0 {
                    return Err(SyncError::NotCollaborative { document_id });
                }
                self.events.emit(SyncEvent::InvariantViolation {
                    document_id: document_id.clone(),
                    version,
                });
                return Err(SyncError::MissingRevisions {
                    document_id,
                    version,
                });
            };

            if attempt >= self.config.max_attempts {
                self.events.emit(SyncEvent::ContentionExceeded {
                    document_id: document_id.clone(),
                    attempts: attempt,
                });
                return Err(SyncError::ExcessContention {
                    document_id,
                    attempts: attempt,
                });
            }

            self.events.emit(SyncEvent::VersionConflict {
                document_id: document_id.clone(),
                base_version: version,
                missing: missing.len(),
                attempt,
            });

            update = self.fold(update, missing)?;
            // The client's text no longer describes the merged update.
            materialized_text = None;
            version = newest;
        }
    }

    /// Fold `missing` into `update` pairwise in ascending version order.
    fn fold(&self, update: Update, missing: Vec<Revision>) -> Result<Update, SyncError> {
        missing.into_iter().try_fold(update, |acc, revision| {
            self.text_ops
                .merge(&[acc, revision.update])
                .map_err(SyncError::from)
        })
    }

    async fn publish(&self, revision: &Revision) {
        let message = PublishedRevision {
            version: revision.version,
            update: revision.update.clone(),
            client_id: revision.client_id.clone(),
            author_id: revision.author_id.clone(),
        };

        if let Err(err) = self
            .transport
            .publish(&revision.document_id.sync_channel(), &message)
            .await
        {
            self.events.emit(SyncEvent::PublishFailed {
                document_id: revision.document_id.clone(),
                version: revision.version,
                error: err.to_string(),
            });
        }
    }
}
