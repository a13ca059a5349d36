//! Agent configuration.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use textsync_adapter_docstore::DocStoreConfig;
use textsync_core::SyncConfig;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent unique identifier
    pub agent_id: Option<Uuid>,

    /// Document service connection
    pub docstore: DocStoreConfig,

    /// Replication configuration
    pub replication: ReplicationConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,

    /// Revise and commit tuning
    pub sync: SyncConfig,
}

/// Replication configuration.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Tenant identifier
    pub tenant: String,
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Backend for the revision log and locks
    pub store_type: StoreType,

    /// Database path (for `SQLite`)
    pub db_path: PathBuf,
}

/// Revision log and lock backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// Shared `SQLite` file
    Sqlite,
    /// Process-local memory; only correct for a single agent
    Memory,
}

impl FromStr for StoreType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown store type '{other}'")),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            docstore: DocStoreConfig::default(),
            replication: ReplicationConfig {
                mqtt_broker: "tcp://localhost:1883".to_string(),
                tenant: "default".to_string(),
            },
            persistence: PersistenceConfig {
                store_type: StoreType::Sqlite,
                db_path: PathBuf::from("./textsync.db"),
            },
            sync: SyncConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TEXTSYNC_AGENT_ID`: Agent UUID
    /// - `TEXTSYNC_DOCSTORE_URL`: Document service base URL
    /// - `TEXTSYNC_BEARER_TOKEN`: Bearer token for the document service
    /// - `TEXTSYNC_DOCSTORE_CA_CERT`: PEM CA certificate for the document service
    /// - `TEXTSYNC_MQTT_BROKER`: MQTT broker URL
    /// - `TEXTSYNC_TENANT`: Tenant identifier
    /// - `TEXTSYNC_STORE_TYPE`: "sqlite" or "memory"
    /// - `TEXTSYNC_DB_PATH`: `SQLite` database path
    /// - `TEXTSYNC_COMMIT_DEBOUNCE_SECS`: Commit debounce window
    /// - `TEXTSYNC_MAX_ATTEMPTS`: Append attempts per revise
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparseable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("TEXTSYNC_AGENT_ID") {
            config.agent_id = Some(Uuid::parse_str(&id).context("Invalid TEXTSYNC_AGENT_ID")?);
        }

        if let Some(url) = lookup("TEXTSYNC_DOCSTORE_URL") {
            config.docstore.base_url = url;
        }

        config.docstore.bearer_token = lookup("TEXTSYNC_BEARER_TOKEN");
        config.docstore.ca_cert_path = lookup("TEXTSYNC_DOCSTORE_CA_CERT").map(PathBuf::from);

        if let Some(broker) = lookup("TEXTSYNC_MQTT_BROKER") {
            config.replication.mqtt_broker = broker;
        }

        if let Some(tenant) = lookup("TEXTSYNC_TENANT") {
            config.replication.tenant = tenant;
        }

        if let Some(store_type) = lookup("TEXTSYNC_STORE_TYPE") {
            config.persistence.store_type = store_type
                .parse()
                .context("Invalid TEXTSYNC_STORE_TYPE")?;
        }

        if let Some(path) = lookup("TEXTSYNC_DB_PATH") {
            config.persistence.db_path = PathBuf::from(path);
        }

        if let Some(secs) = lookup("TEXTSYNC_COMMIT_DEBOUNCE_SECS") {
            let secs: u64 = secs
                .parse()
                .context("Invalid TEXTSYNC_COMMIT_DEBOUNCE_SECS")?;
            config.sync.commit_debounce = Duration::from_secs(secs);
        }

        if let Some(attempts) = lookup("TEXTSYNC_MAX_ATTEMPTS") {
            config.sync.max_attempts = attempts
                .parse()
                .context("Invalid TEXTSYNC_MAX_ATTEMPTS")?;
        }

        Ok(config)
    }
}
