//! Revision log data model.
//!
//! A document in collaborative mode owns a gap-free sequence of
//! [`Revision`]s numbered `1..=N`. Each revision carries an opaque
//! [`Update`] produced by the merge/extract capability and, optionally, a
//! full materialized text snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a revision in a document's log. The first revision is `1`;
/// `0` means "no revisions".
pub type Version = u64;

/// Opaque identifier of a document owned by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a document identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the synchronization channel peers of this document listen on.
    #[must_use]
    pub fn sync_channel(&self) -> String {
        format!("shared-edits/{}", self.0)
    }

    /// Key of the short-TTL lock that collapses bursts of commit triggers.
    #[must_use]
    pub fn commit_debounce_key(&self) -> String {
        format!("shared-edits:commit-pending:{}", self.0)
    }

    /// Key of the mutex held while a commit mutates canonical content.
    #[must_use]
    pub fn commit_mutex_key(&self) -> String {
        format!("shared-edits:commit:{}", self.0)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of the user who authored a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorId(String);

impl AuthorId {
    /// Create an author identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the editor session (browser tab, device) that sent an update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque update bytes understood only by the merge/extract capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update(Vec<u8>);

impl Update {
    /// Wrap raw update bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the update carries no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Update {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Identifier of an audit revision in the document store's permanent history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditRevisionId(String);

impl AuditRevisionId {
    /// Create an audit revision identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuditRevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored entry of a document's collaborative edit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Owning document
    pub document_id: DocumentId,
    /// Position in the log, starting at 1
    pub version: Version,
    /// User who produced the update
    pub author_id: AuthorId,
    /// Editor session that sent the update
    pub client_id: ClientId,
    /// Opaque update bytes
    pub update: Update,
    /// Full text as of this revision, when known
    pub materialized_text: Option<String>,
    /// Audit revision this entry was committed into
    pub committed_audit_id: Option<AuditRevisionId>,
    /// Insertion time
    pub created_at: DateTime<Utc>,
}

/// A revision about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRevision {
    /// Owning document
    pub document_id: DocumentId,
    /// Version the entry must land at
    pub version: Version,
    /// User who produced the update
    pub author_id: AuthorId,
    /// Editor session that sent the update
    pub client_id: ClientId,
    /// Opaque update bytes
    pub update: Update,
    /// Full text as of this revision, when the client supplied it
    pub materialized_text: Option<String>,
}

impl NewRevision {
    /// Turn into a stored revision stamped with `created_at`.
    #[must_use]
    pub fn into_revision(self, created_at: DateTime<Utc>) -> Revision {
        Revision {
            document_id: self.document_id,
            version: self.version,
            author_id: self.author_id,
            client_id: self.client_id,
            update: self.update,
            materialized_text: self.materialized_text,
            committed_audit_id: None,
            created_at,
        }
    }
}

/// Most recent revision carrying a materialized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Version of the snapshot revision
    pub version: Version,
    /// Full text as of that version
    pub materialized_text: String,
    /// Update stored with that version
    pub update: Update,
}

/// An entry of the document store's permanent audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRevision {
    /// Audit revision identifier
    pub id: AuditRevisionId,
    /// Edit reason attached to the revision, if any
    pub reason: Option<String>,
}

/// Message published to peers after an update lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRevision {
    /// Version the update landed at
    pub version: Version,
    /// The update as stored (merged if a conflict was resolved)
    pub update: Update,
    /// Editor session that sent it
    pub client_id: ClientId,
    /// User who authored it
    pub author_id: AuthorId,
}
