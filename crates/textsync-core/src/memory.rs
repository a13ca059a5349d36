//! In-process collaborator implementations.
//!
//! Used by tests and by single-process deployments that keep the revision
//! log in memory. Each type is safe to share across tasks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{LockError, LogError, StoreError, TransportError};
use crate::log::{AppendOutcome, RevisionLog};
use crate::model::{
    AuditRevision, AuditRevisionId, AuthorId, DocumentId, NewRevision, PublishedRevision,
    Revision, Snapshot, Version,
};
use crate::traits::{AppliedUpdate, DocumentStore, LockHandle, LockService, Transport, UpdateOptions};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Revision log kept in a mutex-guarded map.
///
/// The version check and the insert happen under one lock acquisition,
/// which gives the same atomicity as the SQL conditional insert.
#[derive(Debug, Default)]
pub struct MemoryRevisionLog {
    documents: Mutex<HashMap<DocumentId, BTreeMap<Version, Revision>>>,
}

impl MemoryRevisionLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored versions of a document, ascending.
    #[must_use]
    pub fn versions(&self, document_id: &DocumentId) -> Vec<Version> {
        lock(&self.documents)
            .get(document_id)
            .map(|log| log.keys().copied().collect())
            .unwrap_or_default()
    }

    fn with_revision<R>(
        &self,
        document_id: &DocumentId,
        version: Version,
        f: impl FnOnce(&mut Revision) -> R,
    ) -> Result<R, LogError> {
        let mut documents = lock(&self.documents);
        documents
            .get_mut(document_id)
            .and_then(|log| log.get_mut(&version))
            .map(f)
            .ok_or_else(|| LogError::NotFound {
                document_id: document_id.clone(),
                version,
            })
    }
}

#[async_trait]
impl RevisionLog for MemoryRevisionLog {
    async fn append(&self, revision: NewRevision) -> Result<AppendOutcome, LogError> {
        let mut documents = lock(&self.documents);
        let log = documents.entry(revision.document_id.clone()).or_default();
        let current = log.keys().next_back().copied().unwrap_or(0);

        if revision.version != current + 1 {
            return Ok(AppendOutcome::Conflict);
        }

        let stored = revision.into_revision(Utc::now());
        log.insert(stored.version, stored.clone());
        Ok(AppendOutcome::Inserted(stored))
    }

    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, LogError> {
        Ok(lock(&self.documents)
            .get(document_id)
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn revisions_after(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Vec<Revision>, LogError> {
        Ok(lock(&self.documents)
            .get(document_id)
            .map(|log| {
                log.range(version.saturating_add(1)..)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_snapshot(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Snapshot>, LogError> {
        Ok(lock(&self.documents).get(document_id).and_then(|log| {
            log.values().rev().find_map(|r| {
                r.materialized_text.as_ref().map(|text| Snapshot {
                    version: r.version,
                    materialized_text: text.clone(),
                    update: r.update.clone(),
                })
            })
        }))
    }

    async fn revision(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Option<Revision>, LogError> {
        Ok(lock(&self.documents)
            .get(document_id)
            .and_then(|log| log.get(&version).cloned()))
    }

    async fn latest_committed_version(
        &self,
        document_id: &DocumentId,
    ) -> Result<Version, LogError> {
        Ok(lock(&self.documents)
            .get(document_id)
            .and_then(|log| {
                log.values()
                    .rev()
                    .find(|r| r.committed_audit_id.is_some())
                    .map(|r| r.version)
            })
            .unwrap_or(0))
    }

    async fn set_materialized_text(
        &self,
        document_id: &DocumentId,
        version: Version,
        text: &str,
    ) -> Result<(), LogError> {
        self.with_revision(document_id, version, |r| {
            r.materialized_text = Some(text.to_string());
        })
    }

    async fn mark_committed(
        &self,
        document_id: &DocumentId,
        version: Version,
        audit_id: &AuditRevisionId,
    ) -> Result<(), LogError> {
        self.with_revision(document_id, version, |r| {
            r.committed_audit_id = Some(audit_id.clone());
        })
    }

    async fn delete_all(&self, document_id: &DocumentId) -> Result<usize, LogError> {
        Ok(lock(&self.documents)
            .remove(document_id)
            .map_or(0, |log| log.len()))
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    content: String,
    reason: Option<String>,
    collaborative: bool,
    audit: Vec<AuditRevision>,
}

#[derive(Debug, Default)]
struct LastWrite {
    actor: String,
    options: UpdateOptions,
}

/// Document store holding content, reasons, and audit history in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<DocumentId, DocumentState>>,
    users: Mutex<HashMap<AuthorId, String>>,
    last_write: Mutex<Option<LastWrite>>,
    next_audit_id: AtomicU64,
    fail_writes: AtomicBool,
    extend_latest: AtomicBool,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a document with `content`.
    pub fn insert_document(&self, document_id: &DocumentId, content: &str) {
        lock(&self.documents).insert(
            document_id.clone(),
            DocumentState {
                content: content.to_string(),
                ..DocumentState::default()
            },
        );
    }

    /// Make `author` resolve to `username`.
    pub fn register_user(&self, author: &AuthorId, username: &str) {
        lock(&self.users).insert(author.clone(), username.to_string());
    }

    /// Make content writes fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fold writes into the newest audit revision instead of creating a new
    /// one, the way stores with an edit grace period do.
    pub fn extend_latest_revision(&self, extend: bool) {
        self.extend_latest.store(extend, Ordering::SeqCst);
    }

    /// Current content.
    #[must_use]
    pub fn content(&self, document_id: &DocumentId) -> Option<String> {
        lock(&self.documents)
            .get(document_id)
            .map(|d| d.content.clone())
    }

    /// Document-level edit reason.
    #[must_use]
    pub fn reason(&self, document_id: &DocumentId) -> Option<String> {
        lock(&self.documents)
            .get(document_id)
            .and_then(|d| d.reason.clone())
    }

    /// Audit history, oldest first.
    #[must_use]
    pub fn audit_revisions(&self, document_id: &DocumentId) -> Vec<AuditRevision> {
        lock(&self.documents)
            .get(document_id)
            .map(|d| d.audit.clone())
            .unwrap_or_default()
    }

    /// Whether collaborative mode is recorded as on.
    #[must_use]
    pub fn is_collaborative(&self, document_id: &DocumentId) -> bool {
        lock(&self.documents)
            .get(document_id)
            .is_some_and(|d| d.collaborative)
    }

    /// Actor of the most recent content write.
    #[must_use]
    pub fn last_actor(&self) -> Option<String> {
        lock(&self.last_write).as_ref().map(|w| w.actor.clone())
    }

    /// Options of the most recent content write.
    #[must_use]
    pub fn last_options(&self) -> Option<UpdateOptions> {
        lock(&self.last_write).as_ref().map(|w| w.options)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn current_content(&self, document_id: &DocumentId) -> Result<String, StoreError> {
        self.content(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.clone()))
    }

    async fn apply_update(
        &self,
        actor: &str,
        document_id: &DocumentId,
        text: &str,
        options: UpdateOptions,
    ) -> Result<AppliedUpdate, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }

        let mut documents = lock(&self.documents);
        let document = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.clone()))?;
        document.content = text.to_string();

        let extend = self.extend_latest.load(Ordering::SeqCst) && !document.audit.is_empty();
        if !extend {
            let n = self.next_audit_id.fetch_add(1, Ordering::SeqCst) + 1;
            document.audit.push(AuditRevision {
                id: AuditRevisionId::new(format!("{document_id}-r{n}")),
                reason: None,
            });
        }
        let audit_revision = document.audit.last().cloned();

        *lock(&self.last_write) = Some(LastWrite {
            actor: actor.to_string(),
            options,
        });

        Ok(AppliedUpdate { audit_revision })
    }

    async fn latest_audit_revision(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<AuditRevision>, StoreError> {
        Ok(lock(&self.documents)
            .get(document_id)
            .and_then(|d| d.audit.last().cloned()))
    }

    async fn set_reason(
        &self,
        document_id: &DocumentId,
        audit_id: &AuditRevisionId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut documents = lock(&self.documents);
        let document = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.clone()))?;
        let audit = document
            .audit
            .iter_mut()
            .find(|a| &a.id == audit_id)
            .ok_or_else(|| StoreError::Rejected(format!("unknown audit revision {audit_id}")))?;
        audit.reason = Some(reason.to_string());
        document.reason = Some(reason.to_string());
        Ok(())
    }

    async fn resolve_usernames(&self, authors: &[AuthorId]) -> Result<Vec<String>, StoreError> {
        let users = lock(&self.users);
        Ok(authors.iter().filter_map(|a| users.get(a).cloned()).collect())
    }

    async fn set_collaborative(
        &self,
        document_id: &DocumentId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        lock(&self.documents)
            .get_mut(document_id)
            .map(|d| d.collaborative = enabled)
            .ok_or_else(|| StoreError::NotFound(document_id.clone()))
    }
}

#[derive(Debug)]
struct Lease {
    token: String,
    expires_at: Instant,
}

/// Lock service for a single process: leases in a map with expiry.
#[derive(Debug, Default)]
pub struct LocalLockService {
    leases: Mutex<HashMap<String, Lease>>,
}

impl LocalLockService {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Create a lock service with no held keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_take(&self, key: &str, ttl: Duration) -> Option<String> {
        let now = Instant::now();
        let mut leases = lock(&self.leases);
        if leases.get(key).is_some_and(|l| l.expires_at > now) {
            return None;
        }

        let token = Uuid::new_v4().to_string();
        leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Some(token)
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        Ok(self.try_take(key, ttl).is_some())
    }

    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_take(key, ttl) {
                return Ok(LockHandle {
                    key: key.to_string(),
                    token,
                });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout(key.to_string()));
            }
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut leases = lock(&self.leases);
        if leases.get(&handle.key).is_some_and(|l| l.token == handle.token) {
            leases.remove(&handle.key);
        }
        Ok(())
    }
}

/// Transport that records every publish.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<(String, PublishedRevision)>>,
    fail: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport with nothing published.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishes fail until switched off again.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Channel and message of every successful publish.
    #[must_use]
    pub fn published(&self) -> Vec<(String, PublishedRevision)> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        channel: &str,
        message: &PublishedRevision,
    ) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Publish("broker unreachable".to_string()));
        }
        lock(&self.published).push((channel.to_string(), message.clone()));
        Ok(())
    }
}
