//! MQTT plumbing: revision fan-out and editor call traffic.

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;
use textsync_core::{PublishedRevision, Transport, TransportError};
use textsync_proto::{CborMessage, ClientResponse, RevisionEnvelope, TopicScheme};
use url::Url;

/// Shared subscription group, so each editor call is handled by one agent.
const SHARE_GROUP: &str = "textsync";

/// MQTT-backed [`Transport`] that also carries editor calls.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    topic_scheme: TopicScheme,
}

impl MqttTransport {
    /// Create a transport and the event loop that drives it.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(
        mqtt_broker: &str,
        client_id: &str,
        topic_scheme: TopicScheme,
    ) -> Result<(Self, EventLoop), ReplicationError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok((
            Self {
                client,
                topic_scheme,
            },
            eventloop,
        ))
    }

    /// Topic scheme in use.
    #[must_use]
    pub fn topic_scheme(&self) -> &TopicScheme {
        &self.topic_scheme
    }

    /// Subscribe to the tenant's editor calls.
    ///
    /// # Errors
    ///
    /// Returns error if subscription fails.
    pub async fn subscribe_requests(&self) -> Result<(), ReplicationError> {
        let topic = format!("$share/{SHARE_GROUP}/{}", self.topic_scheme.requests());

        tracing::info!(topic, "Subscribing to request topic");

        self.client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ReplicationError::Subscribe(e.to_string()))
    }

    /// Send a response to the topic named by the request.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or publishing fails.
    pub async fn respond(
        &self,
        reply_to: &str,
        response: &ClientResponse,
    ) -> Result<(), ReplicationError> {
        let payload = response
            .to_cbor()
            .map_err(|e| ReplicationError::Serialize(e.to_string()))?;

        tracing::debug!(
            topic = reply_to,
            correlation_id = %response.correlation_id,
            "Publishing response"
        );

        self.client
            .publish(reply_to, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| ReplicationError::Publish(e.to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        channel: &str,
        message: &PublishedRevision,
    ) -> Result<(), TransportError> {
        let topic = self.topic_scheme.revisions_for_channel(channel);
        let payload = RevisionEnvelope::new(channel, message)
            .to_cbor()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        tracing::debug!(
            topic,
            version = message.version,
            payload_len = payload.len(),
            "Publishing revision"
        );

        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

/// Parse MQTT URL into host and port.
pub(crate) fn parse_mqtt_url(input: &str) -> Result<(String, u16), ReplicationError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| ReplicationError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(ReplicationError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| ReplicationError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let (host, port) = match input.split_once(':') {
        None => (input, None),
        Some((host, port)) => (host, Some(port)),
    };
    if host.is_empty() {
        return Err(ReplicationError::InvalidBrokerUrl(format!(
            "{input}: missing host"
        )));
    }
    let port = match port {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            ReplicationError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };

    Ok((host.to_string(), port))
}

/// Errors for replication operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
}
