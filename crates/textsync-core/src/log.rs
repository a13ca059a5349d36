//! Revision log contract.
//!
//! The log is the only shared resource on the write hot path. Its
//! [`append`](RevisionLog::append) must evaluate "`version` is exactly one
//! past the current maximum" and insert in one atomic step against the
//! backing storage. Ordering correctness depends on nothing else.

use async_trait::async_trait;

use crate::error::LogError;
use crate::model::{AuditRevisionId, DocumentId, NewRevision, Revision, Snapshot, Version};

/// Result of a conditional append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The revision was stored at the requested version.
    Inserted(Revision),
    /// Another writer already holds that version (or the requested version
    /// skips ahead of the log).
    Conflict,
}

impl AppendOutcome {
    /// Whether the append landed.
    #[must_use]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Append-only, per-document, version-CAS-guarded revision storage.
#[async_trait]
pub trait RevisionLog: Send + Sync {
    /// Insert `revision` only if its version equals the document's current
    /// maximum version plus one.
    async fn append(&self, revision: NewRevision) -> Result<AppendOutcome, LogError>;

    /// Highest stored version, `0` if the document has no revisions.
    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, LogError>;

    /// Revisions with a version strictly greater than `version`, ascending.
    async fn revisions_after(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Vec<Revision>, LogError>;

    /// The newest revision that carries a materialized text.
    async fn latest_snapshot(&self, document_id: &DocumentId)
        -> Result<Option<Snapshot>, LogError>;

    /// Fetch a single revision.
    async fn revision(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Option<Revision>, LogError>;

    /// Highest version already committed into an audit revision, `0` if none.
    async fn latest_committed_version(&self, document_id: &DocumentId)
        -> Result<Version, LogError>;

    /// Overwrite the cached materialized text of a revision.
    async fn set_materialized_text(
        &self,
        document_id: &DocumentId,
        version: Version,
        text: &str,
    ) -> Result<(), LogError>;

    /// Record the audit revision a revision was committed into.
    async fn mark_committed(
        &self,
        document_id: &DocumentId,
        version: Version,
        audit_id: &AuditRevisionId,
    ) -> Result<(), LogError>;

    /// Drop every revision of the document. Returns the number removed.
    async fn delete_all(&self, document_id: &DocumentId) -> Result<usize, LogError>;
}
