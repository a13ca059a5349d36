//! # Document Store Adapter
//!
//! HTTP client implementing [`textsync_core::DocumentStore`] against a
//! document service's REST API.
//!
//! ## Encoding Rules
//!
//! - **Document ids**: base64url-encoded WITHOUT padding, so ids containing
//!   `/` or `?` stay one path segment
//! - **Audit revision ids**: percent-encoded

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod encoding;

pub use client::{ClientError, DocStoreClient, DocStoreConfig};
pub use encoding::{decode_document_id, encode_document_id, encode_path_segment};
