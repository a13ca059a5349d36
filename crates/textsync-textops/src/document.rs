//! Editor-side session over a `yrs` document.

use crate::ops::{apply_to, full_state, read_text, TEXT_NAME};
use textsync_core::{TextOpsError, Update};
use yrs::{Doc, Text, Transact, WriteTxn};

/// A document held by one editor session.
///
/// Offsets follow the document's default offset kind, which counts UTF-8
/// bytes.
pub struct TextDocument {
    doc: Doc,
}

impl TextDocument {
    /// Empty document with a fresh client id.
    #[must_use]
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Load a document from an update, e.g. the latest revision.
    ///
    /// # Errors
    ///
    /// Returns error if the update cannot be decoded.
    pub fn from_update(update: &Update) -> Result<Self, TextOpsError> {
        let document = Self::new();
        apply_to(&document.doc, update)?;
        Ok(document)
    }

    /// Integrate a peer's update.
    ///
    /// # Errors
    ///
    /// Returns error if the update cannot be decoded.
    pub fn apply(&mut self, update: &Update) -> Result<(), TextOpsError> {
        apply_to(&self.doc, update)
    }

    /// Insert `chunk` at `index`.
    pub fn insert(&mut self, index: u32, chunk: &str) {
        let mut txn = self.doc.transact_mut();
        let text = txn.get_or_insert_text(TEXT_NAME);
        text.insert(&mut txn, index, chunk);
    }

    /// Append `chunk` at the end.
    pub fn push(&mut self, chunk: &str) {
        let mut txn = self.doc.transact_mut();
        let text = txn.get_or_insert_text(TEXT_NAME);
        let end = text.len(&txn);
        text.insert(&mut txn, end, chunk);
    }

    /// Replace the whole text.
    pub fn replace(&mut self, content: &str) {
        let mut txn = self.doc.transact_mut();
        let text = txn.get_or_insert_text(TEXT_NAME);
        let len = text.len(&txn);
        text.remove_range(&mut txn, 0, len);
        text.insert(&mut txn, 0, content);
    }

    /// Current text.
    #[must_use]
    pub fn text(&self) -> String {
        read_text(&self.doc)
    }

    /// Full state as an update to send with a revise call.
    #[must_use]
    pub fn to_update(&self) -> Update {
        full_state(&self.doc)
    }
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new()
    }
}
