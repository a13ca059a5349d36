//! Path encoding for document service URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but unreserved URL characters is escaped.
const PATH_SEGMENT_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a document id for use as a path segment.
///
/// # Examples
///
/// ```
/// use textsync_adapter_docstore::encode_document_id;
///
/// let encoded = encode_document_id("wiki/Main Page");
/// assert!(!encoded.contains('/'));
/// assert!(!encoded.contains('='));
/// ```
#[must_use]
pub fn encode_document_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Decode a path-encoded document id.
///
/// # Errors
///
/// Returns error if the input is not base64url or not UTF-8.
pub fn decode_document_id(encoded: &str) -> Result<String, EncodingError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| EncodingError::Base64Decode(e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| EncodingError::Utf8Decode(e.to_string()))
}

/// Percent-encode an opaque id (such as an audit revision id) as one path
/// segment.
///
/// # Examples
///
/// ```
/// use textsync_adapter_docstore::encode_path_segment;
///
/// assert_eq!(encode_path_segment("rev 7/a"), "rev%207%2Fa");
/// assert_eq!(encode_path_segment("r-12_a.b~c"), "r-12_a.b~c");
/// ```
#[must_use]
pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ESCAPE).to_string()
}

/// Errors that can occur during decoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodingError {
    /// Base64 decoding failed
    #[error("base64 decode error: {0}")]
    Base64Decode(String),
    /// UTF-8 decoding failed
    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(String),
}
