//! Commit engine: folds the revision log into canonical content.
//!
//! A commit replays every revision after the latest materialized snapshot,
//! writes the resulting text to the document store as the system actor,
//! credits the authors in the audit revision's reason, and finally stamps
//! the last replayed revision with the audit revision id. That stamp makes
//! re-running a commit (at-least-once job delivery, a disable racing a
//! scheduled job) a no-op.
//!
//! Everything that mutates canonical content runs under a per-document
//! commit mutex taken from the [`LockService`].

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::{LockError, StoreError, SyncError};
use crate::events::{EventSink, SyncEvent};
use crate::log::RevisionLog;
use crate::model::{AuditRevisionId, AuthorId, ClientId, DocumentId, NewRevision, Revision, Version};
use crate::reason::EditReason;
use crate::traits::{DocumentStore, LockService, TextOps, UpdateOptions};

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The document has no materialized snapshot to start from
    NothingToCommit,
    /// The last revision was already committed
    AlreadyCommitted {
        /// Last revision
        version: Version,
        /// Audit revision it was committed into
        audit_id: AuditRevisionId,
    },
    /// A concurrent commit already covered newer revisions
    Superseded {
        /// Newest committed revision
        version: Version,
    },
    /// Merge-only run: the snapshot cache is fresh, canonical content untouched
    MergedOnly {
        /// Last revision
        version: Version,
    },
    /// Canonical content already matches the log
    Unchanged {
        /// Last revision
        version: Version,
    },
    /// Canonical content was replaced and attributed
    Committed {
        /// Last revision folded in
        version: Version,
        /// Resulting audit revision
        audit_id: AuditRevisionId,
    },
    /// The commit mutex was unavailable; try again later
    Deferred,
}

/// Text reconstructed from the log.
#[derive(Debug)]
struct Replay {
    text: String,
    authors: Vec<AuthorId>,
    last: Revision,
}

/// Reconciles a document's revision log into its canonical content.
pub struct CommitEngine {
    log: Arc<dyn RevisionLog>,
    text_ops: Arc<dyn TextOps>,
    store: Arc<dyn DocumentStore>,
    locks: Arc<dyn LockService>,
    events: Arc<dyn EventSink>,
    config: SyncConfig,
}

impl CommitEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        log: Arc<dyn RevisionLog>,
        text_ops: Arc<dyn TextOps>,
        store: Arc<dyn DocumentStore>,
        locks: Arc<dyn LockService>,
        events: Arc<dyn EventSink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            log,
            text_ops,
            store,
            locks,
            events,
            config,
        }
    }

    /// Replay the log and, when `apply_to_canonical` is set, write the
    /// result into the document store.
    ///
    /// # Errors
    ///
    /// Returns error if the log, the text capability, or the document store
    /// fails. The cycle is abandoned and the last revision stays
    /// uncommitted, so the next commit retries it.
    pub async fn commit(
        &self,
        document_id: &DocumentId,
        apply_to_canonical: bool,
    ) -> Result<CommitOutcome, SyncError> {
        let result = self.try_commit(document_id, apply_to_canonical).await;
        if let Err(err) = &result {
            self.events.emit(SyncEvent::CommitFailed {
                document_id: document_id.clone(),
                error: err.to_string(),
            });
        }
        result
    }

    /// Turn collaborative mode on or off.
    ///
    /// Enabling seeds version 1 from canonical content when the log is
    /// empty. Disabling commits synchronously, then drops the whole log.
    ///
    /// # Errors
    ///
    /// Returns error if seeding or committing fails. A disable whose commit
    /// could not take the commit mutex fails with [`LockError::Timeout`]
    /// and leaves the log in place.
    pub async fn toggle(&self, document_id: &DocumentId, enabled: bool) -> Result<(), SyncError> {
        if enabled {
            self.enable(document_id).await
        } else {
            self.disable(document_id).await
        }
    }

    async fn enable(&self, document_id: &DocumentId) -> Result<(), SyncError> {
        if self.log.latest_version(document_id).await? == 0 {
            let content = self.store.current_content(document_id).await?;
            let update = self.text_ops.initial_state(&content)?;
            let seeded = self
                .log
                .append(NewRevision {
                    document_id: document_id.clone(),
                    version: 1,
                    author_id: AuthorId::new(self.config.system_actor.clone()),
                    client_id: ClientId::new(self.config.system_actor.clone()),
                    update,
                    materialized_text: Some(content),
                })
                .await?;

            // Losing the race means another enable already seeded.
            if seeded.is_inserted() {
                self.events.emit(SyncEvent::Seeded {
                    document_id: document_id.clone(),
                });
            }
        }

        self.store.set_collaborative(document_id, true).await?;
        Ok(())
    }

    async fn disable(&self, document_id: &DocumentId) -> Result<(), SyncError> {
        if self.commit(document_id, true).await? == CommitOutcome::Deferred {
            return Err(LockError::Timeout(document_id.commit_mutex_key()).into());
        }

        let removed = self.log.delete_all(document_id).await?;
        self.store.set_collaborative(document_id, false).await?;
        self.events.emit(SyncEvent::LogCleared {
            document_id: document_id.clone(),
            removed,
        });
        Ok(())
    }

    /// Merge-only pass that returns the last version together with the
    /// text it replays to, or `None` when there is no snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the log or the text capability fails.
    pub async fn current_text(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<(Version, String)>, SyncError> {
        let replay = self.refresh(document_id).await;
        if let Err(err) = &replay {
            self.events.emit(SyncEvent::CommitFailed {
                document_id: document_id.clone(),
                error: err.to_string(),
            });
        }
        Ok(replay?.map(|replay| (replay.last.version, replay.text)))
    }

    /// Replay and write the result back as the last revision's snapshot.
    async fn refresh(&self, document_id: &DocumentId) -> Result<Option<Replay>, SyncError> {
        let Some(replay) = self.replay(document_id).await? else {
            return Ok(None);
        };
        let version = replay.last.version;

        if replay.last.materialized_text.as_deref() != Some(replay.text.as_str()) {
            self.log
                .set_materialized_text(document_id, version, &replay.text)
                .await?;
            self.events.emit(SyncEvent::SnapshotRefreshed {
                document_id: document_id.clone(),
                version,
            });
        }

        Ok(Some(replay))
    }

    async fn try_commit(
        &self,
        document_id: &DocumentId,
        apply_to_canonical: bool,
    ) -> Result<CommitOutcome, SyncError> {
        let Some(replay) = self.refresh(document_id).await? else {
            return Ok(CommitOutcome::NothingToCommit);
        };
        let version = replay.last.version;

        if !apply_to_canonical {
            return Ok(match replay.last.committed_audit_id {
                Some(audit_id) => CommitOutcome::AlreadyCommitted { version, audit_id },
                None => CommitOutcome::MergedOnly { version },
            });
        }

        let handle = match self
            .locks
            .acquire(
                &document_id.commit_mutex_key(),
                self.config.commit_lock_ttl,
                self.config.commit_lock_timeout,
            )
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                tracing::debug!(%document_id, error = %err, "Commit mutex unavailable");
                self.events.emit(SyncEvent::CommitDeferred {
                    document_id: document_id.clone(),
                });
                return Ok(CommitOutcome::Deferred);
            }
        };

        let result = self.commit_locked(document_id, replay).await;

        if let Err(err) = self.locks.release(handle).await {
            tracing::warn!(%document_id, error = %err, "Failed to release commit mutex");
        }

        result
    }

    async fn commit_locked(
        &self,
        document_id: &DocumentId,
        replay: Replay,
    ) -> Result<CommitOutcome, SyncError> {
        let version = replay.last.version;

        // Re-read under the mutex; a racing commit may have stamped it, or
        // a racing disable may have dropped the log.
        let Some(last) = self.log.revision(document_id, version).await? else {
            return Ok(CommitOutcome::NothingToCommit);
        };
        if let Some(audit_id) = last.committed_audit_id {
            return Ok(CommitOutcome::AlreadyCommitted { version, audit_id });
        }

        let committed = self.log.latest_committed_version(document_id).await?;
        if committed > version {
            return Ok(CommitOutcome::Superseded { version: committed });
        }

        let canonical = self.store.current_content(document_id).await?;
        if canonical == replay.text {
            return Ok(CommitOutcome::Unchanged { version });
        }

        let applied = self
            .store
            .apply_update(
                &self.config.system_actor,
                document_id,
                &replay.text,
                UpdateOptions::automated(),
            )
            .await?;

        let audit = match applied.audit_revision {
            Some(audit) => audit,
            None => self
                .store
                .latest_audit_revision(document_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Rejected("content update produced no audit revision".to_string())
                })?,
        };

        let usernames = self.store.resolve_usernames(&replay.authors).await?;
        let mut reason = EditReason::parse(audit.reason.as_deref());
        reason.extend(&usernames);
        if let Some(rendered) = reason.render() {
            if audit.reason.as_deref() != Some(rendered.as_str()) {
                self.store
                    .set_reason(document_id, &audit.id, &rendered)
                    .await?;
            }
        }

        self.log
            .mark_committed(document_id, version, &audit.id)
            .await?;

        self.events.emit(SyncEvent::Committed {
            document_id: document_id.clone(),
            version,
            audit_id: audit.id.clone(),
            authors: replay.authors.len(),
        });

        Ok(CommitOutcome::Committed {
            version,
            audit_id: audit.id,
        })
    }

    /// Rebuild the current text from the latest snapshot.
    ///
    /// Authors are collected from every revision since the last committed
    /// one (or since the seed), so a merge-only run that moves the snapshot
    /// forward does not drop anyone from attribution.
    async fn replay(&self, document_id: &DocumentId) -> Result<Option<Replay>, SyncError> {
        let Some(snapshot) = self.log.latest_snapshot(document_id).await? else {
            return Ok(None);
        };

        let floor = self
            .log
            .latest_committed_version(document_id)
            .await?
            .max(1)
            .min(snapshot.version);

        let mut text = snapshot.materialized_text;
        let mut authors: Vec<AuthorId> = Vec::new();
        let mut last = None;

        for revision in self.log.revisions_after(document_id, floor).await? {
            if !authors.contains(&revision.author_id) {
                authors.push(revision.author_id.clone());
            }

            if revision.version > snapshot.version {
                let extracted = self.text_ops.extract_text(&revision.update)?;
                if !extracted.is_empty() {
                    text = extracted;
                }
            }

            if revision.version >= snapshot.version {
                last = Some(revision);
            }
        }

        let last = match last {
            Some(revision) => revision,
            // Cleared since the snapshot was read.
            None => match self.log.revision(document_id, snapshot.version).await? {
                Some(revision) => revision,
                None => return Ok(None),
            },
        };

        Ok(Some(Replay {
            text,
            authors,
            last,
        }))
    }
}
