//! # textsync Core
//!
//! Concurrency core for collaborative editing of a single shared text
//! document.
//!
//! This crate provides:
//! - A version-CAS revision log contract ([`RevisionLog`]) and an in-memory
//!   implementation
//! - The optimistic revise protocol with bounded merge-retry
//!   ([`SyncCoordinator`])
//! - Debounced commit scheduling over a short-TTL lock ([`CommitScheduler`])
//! - Idempotent reconciliation of the log into canonical content with
//!   author attribution ([`CommitEngine`])
//!
//! Text merging itself is delegated to a [`TextOps`] implementation; the
//! document store, lock service, transport, and job scheduler are likewise
//! injected through the traits in [`traits`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod log;
pub mod memory;
pub mod model;
pub mod reason;
pub mod scheduler;
pub mod service;
pub mod traits;

pub use config::SyncConfig;
pub use coordinator::{ReviseOutcome, ReviseRequest, SyncCoordinator};
pub use engine::{CommitEngine, CommitOutcome};
pub use error::{
    LockError, LogError, SchedulerError, StoreError, SyncError, TextOpsError, TransportError,
};
pub use events::{EventSink, MemoryEventSink, SyncEvent, TracingEventSink};
pub use log::{AppendOutcome, RevisionLog};
pub use model::{
    AuditRevision, AuditRevisionId, AuthorId, ClientId, DocumentId, NewRevision,
    PublishedRevision, Revision, Snapshot, Update, Version,
};
pub use scheduler::{CommitScheduler, ScheduleOutcome, TokioJobScheduler};
pub use service::{Collaborators, LatestState, SharedEditService};
pub use traits::{
    AppliedUpdate, DocumentStore, Job, JobScheduler, LockHandle, LockService, TextOps, Transport,
    UpdateOptions,
};
