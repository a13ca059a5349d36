use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use textsync_core::{AuthorId, ClientId, DocumentId, PublishedRevision, Update};
use textsync_proto::{CborMessage, ClientRequest, RequestBody, RevisionEnvelope, TopicScheme};
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

fn parse_mqtt_url(url: &str) -> (String, u16) {
    let url = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);

    let parts: Vec<&str> = url.split(':').collect();

    let host = parts.first().copied().unwrap_or("localhost").to_string();
    let port = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(1883);

    (host, port)
}

fn broker() -> Option<(String, u16)> {
    if std::env::var("TEXTSYNC_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set TEXTSYNC_INTEGRATION=1 to run");
        return None;
    }
    let broker = std::env::var("TEXTSYNC_MQTT_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    Some(parse_mqtt_url(&broker))
}

async fn spawn_eventloop(mut eventloop: EventLoop) {
    loop {
        if eventloop.poll().await.is_err() {
            break;
        }
    }
}

/// Subscribe to `topic` and hand back the first payload seen on it.
async fn first_payload(host: &str, port: u16, topic: &str) -> oneshot::Receiver<Vec<u8>> {
    let mut opts = MqttOptions::new(format!("sub-{}", Uuid::new_v4()), host, port);
    opts.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    client.subscribe(topic, QoS::AtLeastOnce).await.unwrap();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _client = client;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let _ = tx.send(publish.payload.to_vec());
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
    rx
}

async fn publish(host: &str, port: u16, topic: &str, payload: Vec<u8>) {
    let mut opts = MqttOptions::new(format!("pub-{}", Uuid::new_v4()), host, port);
    opts.set_keep_alive(Duration::from_secs(5));
    let (client, eventloop) = AsyncClient::new(opts, 10);
    tokio::spawn(spawn_eventloop(eventloop));

    // Give the subscriber time to register.
    tokio::time::sleep(Duration::from_millis(300)).await;
    client
        .publish(topic, QoS::AtLeastOnce, false, payload)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mqtt_revision_roundtrip() {
    let Some((host, port)) = broker() else {
        return;
    };

    let scheme = TopicScheme::new("integration");
    let channel = DocumentId::new("notes/standup").sync_channel();
    let topic = scheme.revisions_for_channel(&channel);

    let rx = first_payload(&host, port, &topic).await;

    let revision = PublishedRevision {
        version: 3,
        update: Update::new(vec![9, 8, 7, 6, 5]),
        client_id: ClientId::new("tab-1"),
        author_id: AuthorId::new("42"),
    };
    let envelope = RevisionEnvelope::new(&channel, &revision);
    publish(&host, port, &topic, envelope.to_cbor().unwrap()).await;

    let payload = timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for revision")
        .expect("subscriber dropped");

    let received = RevisionEnvelope::from_cbor(&payload).unwrap();
    assert_eq!(received.channel, channel);
    assert_eq!(received.into_published(), revision);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mqtt_request_roundtrip() {
    let Some((host, port)) = broker() else {
        return;
    };

    let scheme = TopicScheme::new("integration");
    let topic = scheme.requests();

    let rx = first_payload(&host, port, &topic).await;

    let request = ClientRequest::new(
        format!("replies/{}", Uuid::new_v4()),
        RequestBody::Latest {
            document_id: "notes/standup".to_string(),
        },
    );
    publish(&host, port, &topic, request.to_cbor().unwrap()).await;

    let payload = timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for request")
        .expect("subscriber dropped");

    assert_eq!(ClientRequest::from_cbor(&payload).unwrap(), request);
}
