//! # textsync Text Operations
//!
//! Merge/extract capability for the sync core, backed by the `yrs` text
//! CRDT so updates are wire-compatible with Yjs editors.
//!
//! A document is a `Doc` holding one shared text named [`TEXT_NAME`]. An
//! update is a v1-encoded full state of that `Doc`.
//!
//! - [`YrsTextOps`]: implements [`textsync_core::TextOps`]
//! - [`TextDocument`]: editor-side session producing updates

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod ops;

pub use document::TextDocument;
pub use ops::{YrsTextOps, TEXT_NAME};
