//! [`TextOps`] over `yrs` updates.

use textsync_core::{TextOps, TextOpsError, Update};
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, WriteTxn};

/// Name of the shared text inside every document.
pub const TEXT_NAME: &str = "content";

/// Decode `update` and integrate it into `doc`.
pub(crate) fn apply_to(doc: &Doc, update: &Update) -> Result<(), TextOpsError> {
    let decoded = yrs::Update::decode_v1(update.as_bytes())
        .map_err(|e| TextOpsError::Decode(e.to_string()))?;
    let mut txn = doc.transact_mut();
    txn.apply_update(decoded)
        .map_err(|e| TextOpsError::Decode(e.to_string()))
}

/// Full state of `doc`, encoded against the empty state vector.
pub(crate) fn full_state(doc: &Doc) -> Update {
    let txn = doc.transact();
    Update::new(txn.encode_state_as_update_v1(&StateVector::default()))
}

/// Current text of `doc`; empty if the text was never written.
pub(crate) fn read_text(doc: &Doc) -> String {
    let txn = doc.transact();
    txn.get_text(TEXT_NAME)
        .map(|text| text.get_string(&txn))
        .unwrap_or_default()
}

/// Merge/extract capability backed by a `yrs` document.
#[derive(Debug, Clone, Copy, Default)]
pub struct YrsTextOps;

impl YrsTextOps {
    /// Create the capability.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TextOps for YrsTextOps {
    fn initial_state(&self, text: &str) -> Result<Update, TextOpsError> {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let shared = txn.get_or_insert_text(TEXT_NAME);
            shared.insert(&mut txn, 0, text);
        }
        Ok(full_state(&doc))
    }

    /// Replays every update into one fresh document and re-encodes it, so
    /// the result carries the union of their operations.
    fn merge(&self, updates: &[Update]) -> Result<Update, TextOpsError> {
        if updates.is_empty() {
            return Err(TextOpsError::EmptyMerge);
        }
        let doc = Doc::new();
        for update in updates {
            apply_to(&doc, update)?;
        }
        let merged = full_state(&doc);
        tracing::trace!(updates = updates.len(), bytes = merged.len(), "Merged updates");
        Ok(merged)
    }

    fn extract_text(&self, update: &Update) -> Result<String, TextOpsError> {
        let doc = Doc::new();
        apply_to(&doc, update)?;
        Ok(read_text(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextDocument;

    #[test]
    fn seed_extracts_to_its_text() {
        let ops = YrsTextOps::new();
        for text in ["Hello", "", "a\nb\n", "héllo wörld"] {
            let seed = ops.initial_state(text).unwrap();
            assert_eq!(ops.extract_text(&seed).unwrap(), text);
        }
    }

    #[test]
    fn merge_keeps_both_sides_in_any_order() {
        let ops = YrsTextOps::new();
        let seed = ops.initial_state("top\nbottom").unwrap();

        let mut alice = TextDocument::from_update(&seed).unwrap();
        let mut bob = TextDocument::from_update(&seed).unwrap();
        alice.insert(0, "TOP ");
        bob.push("\nfooter");

        let a = alice.to_update();
        let b = bob.to_update();
        let ab = ops.extract_text(&ops.merge(&[a.clone(), b.clone()]).unwrap()).unwrap();
        let ba = ops.extract_text(&ops.merge(&[b, a]).unwrap()).unwrap();

        assert_eq!(ab, "TOP top\nbottom\nfooter");
        assert_eq!(ab, ba);
    }

    #[test]
    fn merge_with_itself_keeps_the_text() {
        let ops = YrsTextOps::new();
        let seed = ops.initial_state("same").unwrap();
        let merged = ops.merge(&[seed.clone(), seed]).unwrap();
        assert_eq!(ops.extract_text(&merged).unwrap(), "same");
    }

    #[test]
    fn empty_merge_is_an_error() {
        assert!(matches!(
            YrsTextOps::new().merge(&[]),
            Err(TextOpsError::EmptyMerge)
        ));
    }

    #[test]
    fn garbage_update_fails_to_decode() {
        let ops = YrsTextOps::new();
        assert!(matches!(
            ops.extract_text(&Update::new(vec![0xff])),
            Err(TextOpsError::Decode(_))
        ));
        let seed = ops.initial_state("ok").unwrap();
        assert!(ops.merge(&[seed, Update::new(vec![0xff])]).is_err());
    }
}
