//! Agent runtime orchestration.

use crate::config::{AgentConfig, StoreType};
use crate::locks::SqliteLockService;
use crate::persistence::SqliteRevisionLog;
use crate::replication::MqttTransport;
use anyhow::{Context, Result};
use rumqttc::{Event, EventLoop, Packet};
use std::sync::Arc;
use std::time::Duration;
use textsync_adapter_docstore::DocStoreClient;
use textsync_core::memory::{LocalLockService, MemoryRevisionLog};
use textsync_core::{
    Collaborators, Job, LockService, RevisionLog, SharedEditService,
    TokioJobScheduler, TracingEventSink,
};
use textsync_proto::{
    CborMessage, ClientRequest, ClientResponse, RequestBody, ResponseBody, TopicKind,
};
use textsync_textops::YrsTextOps;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// The main agent runtime.
pub struct Agent {
    service: Arc<SharedEditService>,
    transport: MqttTransport,
    eventloop: EventLoop,
    jobs: UnboundedReceiver<Job>,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails.
    pub fn new(config: AgentConfig, agent_id: Uuid) -> Result<Self> {
        let (log, locks): (Arc<dyn RevisionLog>, Arc<dyn LockService>) =
            match config.persistence.store_type {
                StoreType::Sqlite => (
                    Arc::new(
                        SqliteRevisionLog::open(&config.persistence.db_path)
                            .context("Failed to open revision log")?,
                    ),
                    Arc::new(
                        SqliteLockService::open(&config.persistence.db_path)
                            .context("Failed to open lock table")?,
                    ),
                ),
                StoreType::Memory => {
                    tracing::warn!("Memory store selected; revisions are not shared between agents");
                    (
                        Arc::new(MemoryRevisionLog::new()),
                        Arc::new(LocalLockService::new()),
                    )
                }
            };

        let store =
            DocStoreClient::new(config.docstore.clone()).context("Failed to create docstore client")?;

        let (transport, eventloop) = MqttTransport::new(
            &config.replication.mqtt_broker,
            &format!("textsync-{agent_id}"),
            textsync_proto::TopicScheme::new(&config.replication.tenant),
        )
        .context("Failed to create MQTT transport")?;

        let (scheduler, jobs) = TokioJobScheduler::new();

        let service = SharedEditService::new(
            Collaborators {
                log,
                text_ops: Arc::new(YrsTextOps::new()),
                store: Arc::new(store),
                locks,
                transport: Arc::new(transport.clone()),
                jobs: Arc::new(scheduler),
                events: Arc::new(TracingEventSink),
            },
            config.sync,
        );

        Ok(Self {
            service: Arc::new(service),
            transport,
            eventloop,
            jobs,
        })
    }

    /// Run the agent's main loop.
    ///
    /// # Errors
    ///
    /// Returns error if any component fails.
    pub async fn run(self) -> Result<()> {
        let Self {
            service,
            transport,
            mut eventloop,
            mut jobs,
        } = self;

        tracing::info!("Starting agent runtime");

        tracing::info!("Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if transport.topic_scheme().parse(&publish.topic) != Some(TopicKind::Requests) {
                                continue;
                            }

                            let request = match ClientRequest::from_cbor(&publish.payload) {
                                Ok(request) => request,
                                Err(err) => {
                                    tracing::warn!(error = %err, "Failed to decode request");
                                    continue;
                                }
                            };

                            let service = service.clone();
                            let transport = transport.clone();
                            tokio::spawn(async move {
                                serve_request(&service, &transport, request).await;
                            });
                        }
                        // Subscriptions do not survive a clean-session reconnect.
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!("Connected to broker");
                            let transport = transport.clone();
                            tokio::spawn(async move {
                                if let Err(err) = transport.subscribe_requests().await {
                                    tracing::error!(error = %err, "Failed to resubscribe");
                                }
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "MQTT error");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }

                Some(job) = jobs.recv() => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        match service.run_job(job.clone()).await {
                            Ok(outcome) => tracing::debug!(?job, ?outcome, "Job finished"),
                            Err(err) => tracing::error!(?job, error = %err, "Job failed"),
                        }
                    });
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!("Agent stopped");
        Ok(())
    }
}

async fn serve_request(service: &SharedEditService, transport: &MqttTransport, request: ClientRequest) {
    tracing::debug!(
        correlation_id = %request.correlation_id,
        document_id = %request.body.document_id(),
        "Handling request"
    );

    let body = handle_request(service, request.body.clone()).await;
    let response = ClientResponse::reply(&request, body);

    if let Err(err) = transport.respond(&request.reply_to, &response).await {
        tracing::warn!(error = %err, reply_to = %request.reply_to, "Failed to send response");
    }
}

/// Run one editor call against the service.
pub(crate) async fn handle_request(service: &SharedEditService, body: RequestBody) -> ResponseBody {
    let document_id = body.document_id();

    let result = match body {
        RequestBody::Toggle { enabled, .. } => service
            .toggle(&document_id, enabled)
            .await
            .map(|()| ResponseBody::Toggled { enabled }),
        RequestBody::Latest { .. } => service.latest(&document_id).await.map(|latest| {
            ResponseBody::Latest {
                version: latest.version,
                materialized_text: latest.materialized_text,
            }
        }),
        revise @ RequestBody::Revise { .. } => {
            let Some(request) = revise.into_revise_request() else {
                return ResponseBody::Failed {
                    message: "malformed revise call".to_string(),
                };
            };
            service.revise(request).await.map(ResponseBody::from)
        }
    };

    result.unwrap_or_else(|err| {
        tracing::warn!(document_id = %document_id, error = %err, "Request failed");
        ResponseBody::Failed {
            message: err.to_string(),
        }
    })
}
