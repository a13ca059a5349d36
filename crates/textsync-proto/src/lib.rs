//! # textsync Protocol
//!
//! Wire messages and MQTT topic scheme used by the sync agent.
//!
//! ## Messages
//!
//! - `RevisionEnvelope`: A landed revision fanned out to peers
//! - `ClientRequest` / `ClientResponse`: Editor calls (`revise`, `toggle`,
//!   `latest`) carried over the broker
//!
//! ## MQTT Topics
//!
//! Topic scheme: `textsync/v1/{tenant}/{channel_hash}/revisions` for peer
//! fan-out and `textsync/v1/{tenant}/requests` for editor calls.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{
    CborMessage, ClientRequest, ClientResponse, MessageError, RequestBody, ResponseBody,
    RevisionEnvelope,
};
pub use topics::{channel_hash, TopicKind, TopicScheme};
