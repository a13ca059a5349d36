//! External collaborators consumed by the sync and commit paths.
//!
//! Everything the core touches outside its own revision log is reached
//! through one of these traits and handed in at construction time:
//!
//! - [`TextOps`]: the opaque merge/extract capability (CRDT or OT library)
//! - [`DocumentStore`]: canonical content and its audit history
//! - [`LockService`]: short-TTL debounce locks and the commit mutex
//! - [`Transport`]: best-effort fan-out to peer editors
//! - [`JobScheduler`]: delayed commit jobs

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LockError, SchedulerError, StoreError, TextOpsError, TransportError};
use crate::model::{AuditRevision, AuditRevisionId, AuthorId, DocumentId, PublishedRevision, Update};

/// Opaque text-operation capability.
///
/// `merge` is expected to converge regardless of the order updates are
/// folded in. The core relies on that contract without checking it.
pub trait TextOps: Send + Sync {
    /// Update that reproduces `text` from an empty state.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be encoded.
    fn initial_state(&self, text: &str) -> Result<Update, TextOpsError>;

    /// Combine several updates into one.
    ///
    /// # Errors
    ///
    /// Returns error if any update is undecodable or `updates` is empty.
    fn merge(&self, updates: &[Update]) -> Result<Update, TextOpsError>;

    /// Full document text represented by `update`.
    ///
    /// # Errors
    ///
    /// Returns error if the update is undecodable.
    fn extract_text(&self, update: &Update) -> Result<String, TextOpsError>;
}

/// Side-effect switches for an automated content write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Skip per-user rate limits
    pub bypass_rate_limit: bool,
    /// Do not bump the document in activity listings or notify watchers
    pub bypass_bump: bool,
    /// Do not write incidental audit-log entries for this write
    pub skip_audit_log: bool,
}

impl UpdateOptions {
    /// Options used when committing collaborative edits.
    #[must_use]
    pub fn automated() -> Self {
        Self {
            bypass_rate_limit: true,
            bypass_bump: true,
            skip_audit_log: true,
        }
    }
}

/// Result of a content write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    /// Audit revision created (or extended) by the write
    pub audit_revision: Option<AuditRevision>,
}

/// Owner of canonical document content and its audit history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current canonical text.
    async fn current_content(&self, document_id: &DocumentId) -> Result<String, StoreError>;

    /// Replace canonical text as `actor`.
    async fn apply_update(
        &self,
        actor: &str,
        document_id: &DocumentId,
        text: &str,
        options: UpdateOptions,
    ) -> Result<AppliedUpdate, StoreError>;

    /// Newest audit revision of the document.
    async fn latest_audit_revision(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<AuditRevision>, StoreError>;

    /// Set the edit reason of an audit revision and of the document itself.
    async fn set_reason(
        &self,
        document_id: &DocumentId,
        audit_id: &AuditRevisionId,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Usernames for the given authors, in input order. Unknown authors are
    /// skipped.
    async fn resolve_usernames(&self, authors: &[AuthorId]) -> Result<Vec<String>, StoreError>;

    /// Record whether collaborative mode is on for the document.
    async fn set_collaborative(
        &self,
        document_id: &DocumentId,
        enabled: bool,
    ) -> Result<(), StoreError>;
}

/// Proof of holding a lock, required to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Locked key
    pub key: String,
    /// Holder token; a release only succeeds with the matching token
    pub token: String,
}

/// Distributed lock service.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `key` for `ttl` if nobody holds it. Never waits.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Take `key` as a lease of `ttl`, waiting up to `wait` for the current
    /// holder.
    async fn acquire(&self, key: &str, ttl: Duration, wait: Duration)
        -> Result<LockHandle, LockError>;

    /// Give a lease back. Releasing an expired or foreign lease is a no-op.
    async fn release(&self, handle: LockHandle) -> Result<(), LockError>;
}

/// Best-effort publish/subscribe fan-out to peer editors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `message` on `channel`.
    async fn publish(&self, channel: &str, message: &PublishedRevision)
        -> Result<(), TransportError>;
}

/// Work items run by the job scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Job {
    /// Commit a document's revision log into canonical content
    Commit {
        /// Document to commit
        document_id: DocumentId,
    },
}

/// Delayed job queue with at-least-once delivery.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Deliver `job` no sooner than `delay` from now.
    async fn enqueue_delayed(&self, job: Job, delay: Duration) -> Result<(), SchedulerError>;
}
