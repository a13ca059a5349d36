//! Error types for textsync-core.

use crate::model::{DocumentId, Version};
use thiserror::Error;

/// Errors raised by a [`RevisionLog`](crate::log::RevisionLog) backend.
#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// The backing database failed
    #[error("database error: {0}")]
    Database(String),
    /// A stored row could not be decoded
    #[error("corrupt revision row: {0}")]
    Corrupt(String),
    /// The addressed revision does not exist
    #[error("revision {version} of {document_id} not found")]
    NotFound {
        /// Document the lookup targeted
        document_id: DocumentId,
        /// Missing version
        version: Version,
    },
}

/// Errors raised by the merge/extract capability.
#[derive(Debug, Clone, Error)]
pub enum TextOpsError {
    /// An update could not be decoded
    #[error("undecodable update: {0}")]
    Decode(String),
    /// A merged update could not be encoded
    #[error("unencodable update: {0}")]
    Encode(String),
    /// `merge` was handed nothing to merge
    #[error("nothing to merge")]
    EmptyMerge,
}

/// Errors raised by the document store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The document does not exist
    #[error("document {0} not found")]
    NotFound(DocumentId),
    /// The store rejected the write
    #[error("update rejected: {0}")]
    Rejected(String),
    /// The store could not be reached
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the lock service.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The lock was not obtained within the allowed wait
    #[error("timed out waiting for lock {0}")]
    Timeout(String),
    /// The lock backend failed
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Errors raised by the peer transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The message could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
    /// The message could not be handed to the broker
    #[error("publish error: {0}")]
    Publish(String),
}

/// Errors raised by the job scheduler.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The job queue is no longer accepting jobs
    #[error("job queue closed")]
    Closed,
}

/// Top-level error of the synchronization and commit paths.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Revision storage failed
    #[error("revision log error: {0}")]
    Log(#[from] LogError),

    /// Merging or extracting text failed
    #[error("text operation error: {0}")]
    TextOps(#[from] TextOpsError),

    /// The document store failed
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// The lock service failed
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// A commit job could not be scheduled
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// An append conflicted yet no newer revisions exist. The log's
    /// ordering guarantee is broken; this must never be retried.
    #[error("version conflict on {document_id} after version {version} but no newer revisions exist")]
    MissingRevisions {
        /// Document being revised
        document_id: DocumentId,
        /// Base version the conflict was detected against
        version: Version,
    },

    /// The document has no seeded revision log to append to.
    #[error("{document_id} is not collaborative")]
    NotCollaborative {
        /// Document being revised
        document_id: DocumentId,
    },

    /// The client's base version is not one the log has issued.
    #[error("invalid base version {version} for {document_id}, latest is {latest}")]
    InvalidVersion {
        /// Document being revised
        document_id: DocumentId,
        /// Version the client sent
        version: Version,
        /// Latest version in the log
        latest: Version,
    },

    /// The merge-retry loop gave up.
    #[error("excess contention on {document_id}: gave up after {attempts} attempts")]
    ExcessContention {
        /// Document being revised
        document_id: DocumentId,
        /// Number of append attempts made
        attempts: u32,
    },
}

impl SyncError {
    /// Whether this error signals a broken internal invariant rather than an
    /// operational failure. Such errors should page someone.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::MissingRevisions { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_revisions_is_an_invariant_violation() {
        let missing = SyncError::MissingRevisions {
            document_id: DocumentId::new("d"),
            version: 4,
        };
        let contention = SyncError::ExcessContention {
            document_id: DocumentId::new("d"),
            attempts: 8,
        };

        assert!(missing.is_invariant_violation());
        assert!(!contention.is_invariant_violation());
        assert!(!SyncError::from(LockError::Timeout("k".into())).is_invariant_violation());
    }

    #[test]
    fn client_errors_are_not_invariant_violations() {
        let invalid = SyncError::InvalidVersion {
            document_id: DocumentId::new("d"),
            version: u64::MAX,
            latest: 3,
        };
        assert!(!invalid.is_invariant_violation());
        assert!(invalid.to_string().contains("latest is 3"));
        assert!(!SyncError::NotCollaborative {
            document_id: DocumentId::new("d"),
        }
        .is_invariant_violation());
    }

    #[test]
    fn error_messages_name_the_document() {
        let err = SyncError::ExcessContention {
            document_id: DocumentId::new("post-7"),
            attempts: 3,
        };
        assert!(err.to_string().contains("post-7"));
        assert!(err.to_string().contains("3 attempts"));
    }
}
