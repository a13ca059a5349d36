//! Structured event sink.
//!
//! The coordinator and the commit engine report what they did as
//! [`SyncEvent`]s instead of logging inline. The default sink renders them
//! through `tracing`; tests record them with [`MemoryEventSink`].

use std::sync::Mutex;
use std::time::Duration;

use crate::model::{AuditRevisionId, DocumentId, Version};

/// Something observable happened on the sync or commit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An update was rejected as empty or truncated
    UpdateDeclined {
        /// Document
        document_id: DocumentId,
        /// Update size in bytes
        len: usize,
        /// Version returned to the client
        current_version: Version,
    },
    /// An append lost the version race
    VersionConflict {
        /// Document
        document_id: DocumentId,
        /// Version the client based its update on
        base_version: Version,
        /// Revisions folded into the update
        missing: usize,
        /// 1-based attempt that conflicted
        attempt: u32,
    },
    /// An update landed in the log
    Appended {
        /// Document
        document_id: DocumentId,
        /// Version it landed at
        version: Version,
        /// Attempts it took
        attempts: u32,
    },
    /// A conflict was reported with nothing newer in the log
    InvariantViolation {
        /// Document
        document_id: DocumentId,
        /// Base version of the failed append
        version: Version,
    },
    /// The merge-retry loop gave up
    ContentionExceeded {
        /// Document
        document_id: DocumentId,
        /// Attempts made
        attempts: u32,
    },
    /// Fan-out to peers failed; the append stands
    PublishFailed {
        /// Document
        document_id: DocumentId,
        /// Version that was not announced
        version: Version,
        /// Transport error text
        error: String,
    },
    /// A delayed commit was queued
    CommitScheduled {
        /// Document
        document_id: DocumentId,
        /// Delay before the job runs
        delay: Duration,
    },
    /// A commit could not be queued; the next revise will try again
    ScheduleFailed {
        /// Document
        document_id: DocumentId,
        /// Failure text
        error: String,
    },
    /// A commit trigger collapsed into one already queued
    CommitAlreadyPending {
        /// Document
        document_id: DocumentId,
    },
    /// A cached materialized text was rewritten
    SnapshotRefreshed {
        /// Document
        document_id: DocumentId,
        /// Revision whose cache changed
        version: Version,
    },
    /// Canonical content was written and attributed
    Committed {
        /// Document
        document_id: DocumentId,
        /// Last revision folded into the write
        version: Version,
        /// Resulting audit revision
        audit_id: AuditRevisionId,
        /// Distinct authors credited
        authors: usize,
    },
    /// A commit could not take the commit mutex and will be retried
    CommitDeferred {
        /// Document
        document_id: DocumentId,
    },
    /// A commit cycle was abandoned
    CommitFailed {
        /// Document
        document_id: DocumentId,
        /// Failure text
        error: String,
    },
    /// Collaborative mode started from canonical content
    Seeded {
        /// Document
        document_id: DocumentId,
    },
    /// Collaborative mode ended and the log was dropped
    LogCleared {
        /// Document
        document_id: DocumentId,
        /// Revisions removed
        removed: usize,
    },
}

/// Receiver of [`SyncEvent`]s.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: SyncEvent);
}

/// Renders events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    #[allow(clippy::too_many_lines)]
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::UpdateDeclined {
                document_id,
                len,
                current_version,
            } => tracing::warn!(%document_id, len, current_version, "Declined undersized update"),
            SyncEvent::VersionConflict {
                document_id,
                base_version,
                missing,
                attempt,
            } => tracing::debug!(
                %document_id,
                base_version,
                missing,
                attempt,
                "Version conflict, merging missing revisions"
            ),
            SyncEvent::Appended {
                document_id,
                version,
                attempts,
            } => tracing::debug!(%document_id, version, attempts, "Appended revision"),
            SyncEvent::InvariantViolation {
                document_id,
                version,
            } => tracing::error!(
                %document_id,
                version,
                "Version conflict without newer revisions; revision log ordering is broken"
            ),
            SyncEvent::ContentionExceeded {
                document_id,
                attempts,
            } => tracing::warn!(%document_id, attempts, "Gave up revising under contention"),
            SyncEvent::PublishFailed {
                document_id,
                version,
                error,
            } => tracing::warn!(%document_id, version, %error, "Failed to publish revision"),
            SyncEvent::CommitScheduled { document_id, delay } => {
                tracing::debug!(%document_id, ?delay, "Scheduled commit");
            }
            SyncEvent::ScheduleFailed { document_id, error } => {
                tracing::warn!(%document_id, %error, "Failed to schedule commit");
            }
            SyncEvent::CommitAlreadyPending { document_id } => {
                tracing::trace!(%document_id, "Commit already pending");
            }
            SyncEvent::SnapshotRefreshed {
                document_id,
                version,
            } => tracing::debug!(%document_id, version, "Refreshed materialized text"),
            SyncEvent::Committed {
                document_id,
                version,
                audit_id,
                authors,
            } => tracing::info!(
                %document_id,
                version,
                %audit_id,
                authors,
                "Committed collaborative edits"
            ),
            SyncEvent::CommitDeferred { document_id } => {
                tracing::info!(%document_id, "Commit mutex busy, deferring commit");
            }
            SyncEvent::CommitFailed { document_id, error } => {
                tracing::warn!(%document_id, %error, "Commit abandoned");
            }
            SyncEvent::Seeded { document_id } => {
                tracing::info!(%document_id, "Enabled collaborative mode");
            }
            SyncEvent::LogCleared {
                document_id,
                removed,
            } => tracing::info!(%document_id, removed, "Disabled collaborative mode"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
