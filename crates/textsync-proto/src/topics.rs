//! MQTT topic scheme.
//!
//! Topic structure: `textsync/v1/{tenant}/{channel_hash}/revisions` for
//! revision fan-out, `textsync/v1/{tenant}/requests` for editor calls.
//!
//! Hashing the channel keeps document identifiers (which may contain `/`,
//! `+`, or `#`) out of topic levels.

use serde::{Deserialize, Serialize};

/// Protocol version for topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Default topic prefix.
pub const DEFAULT_PREFIX: &str = "textsync";

/// Topic scheme configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Tenant identifier
    pub tenant: String,
    /// Topic prefix (default: "textsync")
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("default")
    }
}

impl TopicScheme {
    /// Create a new topic scheme with the given tenant.
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    fn tenant_base(&self) -> String {
        format!("{}/{}/{}", self.prefix, PROTOCOL_VERSION, self.tenant)
    }

    /// Topic revisions of a channel are published to.
    #[must_use]
    pub fn revisions(&self, channel_hash: &str) -> String {
        format!("{}/{channel_hash}/revisions", self.tenant_base())
    }

    /// Topic for the revisions of the channel named `channel`.
    #[must_use]
    pub fn revisions_for_channel(&self, channel: &str) -> String {
        self.revisions(&channel_hash(channel))
    }

    /// Topic editor calls are sent to.
    #[must_use]
    pub fn requests(&self) -> String {
        format!("{}/requests", self.tenant_base())
    }

    /// Wildcard subscription for every channel's revisions in the tenant.
    #[must_use]
    pub fn revisions_wildcard(&self) -> String {
        format!("{}/+/revisions", self.tenant_base())
    }

    /// Parse a topic of this tenant.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<TopicKind> {
        let base = self.tenant_base();
        let remainder = topic.strip_prefix(&base)?.strip_prefix('/')?;
        let parts: Vec<&str> = remainder.split('/').collect();

        match parts.as_slice() {
            ["requests"] => Some(TopicKind::Requests),
            [hash, "revisions"] if !hash.is_empty() => Some(TopicKind::Revisions {
                channel_hash: (*hash).to_string(),
            }),
            _ => None,
        }
    }
}

/// Kinds of topics in the scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// Revision fan-out for one channel
    Revisions {
        /// Hash of the channel name
        channel_hash: String,
    },
    /// Editor calls
    Requests,
}

/// Hash a channel name for topic sharding.
#[must_use]
pub fn channel_hash(channel: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    channel.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
