//! Protocol messages exchanged over the broker.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use textsync_core::{
    AuthorId, ClientId, DocumentId, PublishedRevision, ReviseOutcome, ReviseRequest, Update,
    Version,
};
use uuid::Uuid;

/// CBOR encoding shared by every wire message.
pub trait CborMessage: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// A revision that landed in the log, as fanned out to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEnvelope {
    /// Synchronization channel of the document
    pub channel: String,
    /// Version the update landed at
    pub version: Version,
    /// Editor session that sent it
    pub client_id: String,
    /// User who authored it
    pub author_id: String,
    /// Stored update bytes
    pub update: Vec<u8>,
}

impl RevisionEnvelope {
    /// Wrap a published revision for `channel`.
    #[must_use]
    pub fn new(channel: &str, revision: &PublishedRevision) -> Self {
        Self {
            channel: channel.to_string(),
            version: revision.version,
            client_id: revision.client_id.as_str().to_string(),
            author_id: revision.author_id.as_str().to_string(),
            update: revision.update.as_bytes().to_vec(),
        }
    }

    /// Unwrap into the published revision.
    #[must_use]
    pub fn into_published(self) -> PublishedRevision {
        PublishedRevision {
            version: self.version,
            update: Update::new(self.update),
            client_id: ClientId::new(self.client_id),
            author_id: AuthorId::new(self.author_id),
        }
    }
}

impl CborMessage for RevisionEnvelope {}

/// An editor call, answered on `reply_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Echoed back in the response
    pub correlation_id: Uuid,
    /// Topic the response is published to
    pub reply_to: String,
    /// The call itself
    pub body: RequestBody,
}

impl ClientRequest {
    /// Create a request with a fresh correlation id.
    #[must_use]
    pub fn new(reply_to: impl Into<String>, body: RequestBody) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            reply_to: reply_to.into(),
            body,
        }
    }
}

impl CborMessage for ClientRequest {}

/// Editor calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Submit an update produced against `version`
    Revise {
        /// Document being edited
        document_id: String,
        /// Editing user
        author_id: String,
        /// Editor session
        client_id: String,
        /// Version the update was produced against
        version: Version,
        /// Update bytes
        update: Vec<u8>,
        /// Full text after the update, if known
        materialized_text: Option<String>,
    },
    /// Turn collaborative mode on or off
    Toggle {
        /// Document
        document_id: String,
        /// New mode
        enabled: bool,
    },
    /// Fetch the latest version and its text
    Latest {
        /// Document
        document_id: String,
    },
}

impl RequestBody {
    /// Document the call targets.
    #[must_use]
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Revise { document_id, .. }
            | Self::Toggle { document_id, .. }
            | Self::Latest { document_id } => DocumentId::new(document_id.as_str()),
        }
    }

    /// Convert a `Revise` call into a core request.
    #[must_use]
    pub fn into_revise_request(self) -> Option<ReviseRequest> {
        match self {
            Self::Revise {
                document_id,
                author_id,
                client_id,
                version,
                update,
                materialized_text,
            } => Some(ReviseRequest {
                document_id: DocumentId::new(document_id),
                author_id: AuthorId::new(author_id),
                client_id: ClientId::new(client_id),
                version,
                update: Update::new(update),
                materialized_text,
            }),
            Self::Toggle { .. } | Self::Latest { .. } => None,
        }
    }
}

/// Answer to a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Copied from the request
    pub correlation_id: Uuid,
    /// Result of the call
    pub body: ResponseBody,
}

impl ClientResponse {
    /// Answer `request` with `body`.
    #[must_use]
    pub fn reply(request: &ClientRequest, body: ResponseBody) -> Self {
        Self {
            correlation_id: request.correlation_id,
            body,
        }
    }
}

impl CborMessage for ClientResponse {}

/// Results of editor calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Result of `Revise`
    Revised {
        /// Version the update landed at, or the unchanged current version
        version: Version,
        /// Whether the update was stored
        applied: bool,
        /// Stored update, including any revisions merged in while
        /// resolving conflicts; absent when the update was declined
        update: Option<Vec<u8>>,
    },
    /// Result of `Toggle`
    Toggled {
        /// Mode now in effect
        enabled: bool,
    },
    /// Result of `Latest`
    Latest {
        /// Highest version, `0` when collaborative mode is off
        version: Version,
        /// Text at that version
        materialized_text: Option<String>,
    },
    /// The call failed
    Failed {
        /// Error message
        message: String,
    },
}

impl From<ReviseOutcome> for ResponseBody {
    fn from(outcome: ReviseOutcome) -> Self {
        match outcome {
            ReviseOutcome::Applied { version, update } => Self::Revised {
                version,
                applied: true,
                update: Some(update.into_bytes()),
            },
            ReviseOutcome::Declined { version } => Self::Revised {
                version,
                applied: false,
                update: None,
            },
        }
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_published_revision() {
        let published = PublishedRevision {
            version: 7,
            update: Update::new(vec![1, 2, 3, 4]),
            client_id: ClientId::new("tab-1"),
            author_id: AuthorId::new("42"),
        };

        let envelope = RevisionEnvelope::new("shared-edits/doc", &published);
        let bytes = envelope.to_cbor().unwrap();
        let decoded = RevisionEnvelope::from_cbor(&bytes).unwrap();

        assert_eq!(decoded.channel, "shared-edits/doc");
        assert_eq!(decoded.into_published(), published);
    }

    #[test]
    fn revise_request_converts_to_core() {
        let request = ClientRequest::new(
            "textsync/v1/t/replies/tab-1",
            RequestBody::Revise {
                document_id: "doc".to_string(),
                author_id: "42".to_string(),
                client_id: "tab-1".to_string(),
                version: 3,
                update: vec![9; 8],
                materialized_text: Some("hi".to_string()),
            },
        );

        let decoded = ClientRequest::from_cbor(&request.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.body.document_id(), DocumentId::new("doc"));

        let revise = decoded.body.into_revise_request().unwrap();
        assert_eq!(revise.version, 3);
        assert_eq!(revise.update.len(), 8);
        assert_eq!(revise.materialized_text.as_deref(), Some("hi"));
    }

    #[test]
    fn non_revise_calls_have_no_core_request() {
        let body = RequestBody::Toggle {
            document_id: "doc".to_string(),
            enabled: true,
        };
        assert!(body.into_revise_request().is_none());
    }

    #[test]
    fn response_echoes_correlation_id() {
        let request = ClientRequest::new(
            "replies",
            RequestBody::Latest {
                document_id: "doc".to_string(),
            },
        );
        let response = ClientResponse::reply(
            &request,
            ResponseBody::Latest {
                version: 4,
                materialized_text: None,
            },
        );

        let decoded = ClientResponse::from_cbor(&response.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded.correlation_id, request.correlation_id);
        assert_eq!(decoded, response);
    }

    #[test]
    fn applied_revise_carries_the_stored_update() {
        let merged = ResponseBody::from(ReviseOutcome::Applied {
            version: 5,
            update: Update::new(vec![1, 2, 3]),
        });
        assert_eq!(
            merged,
            ResponseBody::Revised {
                version: 5,
                applied: true,
                update: Some(vec![1, 2, 3]),
            }
        );

        let declined = ResponseBody::from(ReviseOutcome::Declined { version: 4 });
        assert_eq!(
            declined,
            ResponseBody::Revised {
                version: 4,
                applied: false,
                update: None,
            }
        );

        let request = ClientRequest::new(
            "replies",
            RequestBody::Latest {
                document_id: "doc".to_string(),
            },
        );
        let response = ClientResponse::reply(&request, merged);
        let decoded = ClientResponse::from_cbor(&response.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            RevisionEnvelope::from_cbor(&[0xff, 0x00]),
            Err(MessageError::Deserialize(_))
        ));
    }
}
