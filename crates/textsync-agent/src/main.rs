//! # textsync agent
//!
//! Serves collaborative editing calls for documents whose canonical text
//! lives in an external document service.
//!
//! ## Architecture
//!
//! The agent runs three concurrent loops:
//! 1. **Requests**: Editor calls (revise, toggle, latest) arrive over MQTT
//!    and are answered on the caller's reply topic
//! 2. **Fan-out**: Every stored revision is published to the document's
//!    channel so peer editors catch up
//! 3. **Commits**: Debounced commit jobs fold the revision log back into the
//!    document service

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod locks;
mod persistence;
mod replication;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting textsync agent");

    let config = AgentConfig::from_env()?;

    let agent_id = config.agent_id.unwrap_or_else(Uuid::new_v4);

    tracing::info!(
        %agent_id,
        tenant = %config.replication.tenant,
        store_type = ?config.persistence.store_type,
        "Agent initialized"
    );

    let agent = Agent::new(config, agent_id)?;

    agent.run().await?;

    Ok(())
}
