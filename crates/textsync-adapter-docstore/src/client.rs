//! HTTP client for the document service.
//!
//! Endpoints, relative to the configured base URL (`{id}` is the
//! base64url-encoded document id):
//!
//! | Operation | Request |
//! |-----------|---------|
//! | current content | `GET /documents/{id}/content` |
//! | replace content | `PUT /documents/{id}/content` |
//! | latest audit revision | `GET /documents/{id}/audit-revisions/latest` |
//! | set edit reason | `PUT /documents/{id}/audit-revisions/{rev}/reason` |
//! | collaborative flag | `PUT /documents/{id}/collaborative` |
//! | username lookup | `POST /users/lookup` |

use crate::encoding::{encode_document_id, encode_path_segment};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use textsync_core::{
    AppliedUpdate, AuditRevision, AuditRevisionId, AuthorId, DocumentId, DocumentStore,
    StoreError, UpdateOptions,
};

/// Document service client configuration.
#[derive(Debug, Clone)]
pub struct DocStoreConfig {
    /// Base URL of the document service (e.g., <http://localhost:8080/api>)
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Optional bearer token for authentication
    pub bearer_token: Option<String>,
    /// Custom CA certificate path for self-signed server certs (PEM format)
    pub ca_cert_path: Option<PathBuf>,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            bearer_token: None,
            ca_cert_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentBody {
    content: String,
}

#[derive(Debug, Serialize)]
struct ReplaceContentBody<'a> {
    actor: &'a str,
    content: &'a str,
    #[serde(flatten)]
    options: UpdateOptions,
}

#[derive(Debug, Deserialize)]
struct ReplaceContentResponse {
    #[serde(default)]
    audit_revision: Option<AuditRevision>,
}

#[derive(Debug, Serialize)]
struct ReasonBody<'a> {
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct CollaborativeBody {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct LookupBody<'a> {
    ids: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LookupEntry {
    id: String,
    username: String,
}

/// HTTP implementation of [`DocumentStore`].
pub struct DocStoreClient {
    client: Client,
    config: DocStoreConfig,
}

impl DocStoreClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created or the CA
    /// certificate cannot be read or parsed.
    pub fn new(config: DocStoreConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if config.base_url.starts_with("https://") {
            builder = builder.use_rustls_tls();

            if let Some(ca_path) = &config.ca_cert_path {
                let ca_cert = fs::read(ca_path).map_err(|e| {
                    ClientError::Init(format!(
                        "failed to read CA certificate {}: {e}",
                        ca_path.display()
                    ))
                })?;
                let cert = reqwest::Certificate::from_pem(&ca_cert).map_err(|e| {
                    ClientError::Init(format!("failed to parse CA certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(cert);
                tracing::debug!(ca_path = %ca_path.display(), "Loaded custom CA certificate");
            }
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn document_url(&self, document_id: &DocumentId, suffix: &str) -> String {
        format!(
            "{}/documents/{}/{suffix}",
            self.config.base_url.trim_end_matches('/'),
            encode_document_id(document_id.as_str())
        )
    }

    fn users_url(&self) -> String {
        format!("{}/users/lookup", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(ClientError::ApiError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    /// Fetch the current content of a document.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn get_content(&self, document_id: &DocumentId) -> Result<String, ClientError> {
        let url = self.document_url(document_id, "content");
        tracing::debug!(%document_id, url, "GET content");

        let response = self.send(self.client.get(&url)).await?;
        Ok(Self::json::<ContentBody>(response).await?.content)
    }

    /// Replace the content of a document as `actor`.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn put_content(
        &self,
        actor: &str,
        document_id: &DocumentId,
        content: &str,
        options: UpdateOptions,
    ) -> Result<Option<AuditRevision>, ClientError> {
        let url = self.document_url(document_id, "content");
        tracing::debug!(%document_id, url, actor, len = content.len(), "PUT content");

        let body = ReplaceContentBody {
            actor,
            content,
            options,
        };
        let response = self.send(self.client.put(&url).json(&body)).await?;
        Ok(Self::json::<ReplaceContentResponse>(response)
            .await?
            .audit_revision)
    }

    /// Fetch the newest audit revision, `None` if the document has none.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn get_latest_audit_revision(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<AuditRevision>, ClientError> {
        let url = self.document_url(document_id, "audit-revisions/latest");
        tracing::debug!(%document_id, url, "GET latest audit revision");

        match self.send(self.client.get(&url)).await {
            Ok(response) => Self::json(response).await.map(Some),
            Err(ClientError::ApiError { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Set the edit reason on an audit revision.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn put_reason(
        &self,
        document_id: &DocumentId,
        audit_id: &AuditRevisionId,
        reason: &str,
    ) -> Result<(), ClientError> {
        let suffix = format!(
            "audit-revisions/{}/reason",
            encode_path_segment(audit_id.as_str())
        );
        let url = self.document_url(document_id, &suffix);
        tracing::debug!(%document_id, %audit_id, url, "PUT reason");

        self.send(self.client.put(&url).json(&ReasonBody { reason }))
            .await?;
        Ok(())
    }

    /// Switch the collaborative flag of a document.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn put_collaborative(
        &self,
        document_id: &DocumentId,
        enabled: bool,
    ) -> Result<(), ClientError> {
        let url = self.document_url(document_id, "collaborative");
        tracing::debug!(%document_id, url, enabled, "PUT collaborative");

        self.send(self.client.put(&url).json(&CollaborativeBody { enabled }))
            .await?;
        Ok(())
    }

    /// Look up usernames, returned in the order of `authors`.
    ///
    /// # Errors
    ///
    /// Returns error on network or API errors.
    pub async fn lookup_usernames(&self, authors: &[AuthorId]) -> Result<Vec<String>, ClientError> {
        if authors.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.users_url();
        tracing::debug!(url, count = authors.len(), "POST users lookup");

        let body = LookupBody {
            ids: authors.iter().map(AuthorId::as_str).collect(),
        };
        let response = self.send(self.client.post(&url).json(&body)).await?;
        let entries: Vec<LookupEntry> = Self::json(response).await?;

        let mut by_id: HashMap<String, String> = entries
            .into_iter()
            .map(|entry| (entry.id, entry.username))
            .collect();
        Ok(authors
            .iter()
            .filter_map(|author| by_id.remove(author.as_str()))
            .collect())
    }
}

#[async_trait]
impl DocumentStore for DocStoreClient {
    async fn current_content(&self, document_id: &DocumentId) -> Result<String, StoreError> {
        self.get_content(document_id)
            .await
            .map_err(|e| e.into_store_error(document_id))
    }

    async fn apply_update(
        &self,
        actor: &str,
        document_id: &DocumentId,
        text: &str,
        options: UpdateOptions,
    ) -> Result<AppliedUpdate, StoreError> {
        let audit_revision = self
            .put_content(actor, document_id, text, options)
            .await
            .map_err(|e| e.into_store_error(document_id))?;
        Ok(AppliedUpdate { audit_revision })
    }

    async fn latest_audit_revision(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<AuditRevision>, StoreError> {
        self.get_latest_audit_revision(document_id)
            .await
            .map_err(|e| e.into_store_error(document_id))
    }

    async fn set_reason(
        &self,
        document_id: &DocumentId,
        audit_id: &AuditRevisionId,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.put_reason(document_id, audit_id, reason)
            .await
            .map_err(|e| e.into_store_error(document_id))
    }

    async fn resolve_usernames(&self, authors: &[AuthorId]) -> Result<Vec<String>, StoreError> {
        self.lookup_usernames(authors)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn set_collaborative(
        &self,
        document_id: &DocumentId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.put_collaborative(document_id, enabled)
            .await
            .map_err(|e| e.into_store_error(document_id))
    }
}

/// Errors that can occur with the document service client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// API returned an error status
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from API
        message: String,
    },
    /// Response parsing failed
    #[error("parse error: {0}")]
    Parse(String),
}

impl ClientError {
    /// Classify for the sync core: 404 is a missing document, other 4xx
    /// statuses are rejections, everything else is an outage.
    #[must_use]
    pub fn into_store_error(self, document_id: &DocumentId) -> StoreError {
        match self {
            Self::ApiError { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
                StoreError::NotFound(document_id.clone())
            }
            Self::ApiError { status, message } if (400..500).contains(&status) => {
                StoreError::Rejected(format!("status {status}: {message}"))
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
