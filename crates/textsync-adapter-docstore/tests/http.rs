//! Exercises the client against a one-shot local HTTP responder.

use std::time::Duration;

use textsync_adapter_docstore::{encode_document_id, DocStoreClient, DocStoreConfig};
use textsync_core::{AuditRevisionId, AuthorId, DocumentId, DocumentStore, StoreError, UpdateOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one request with `status` and `body`; the task yields the raw
/// request text.
async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).to_string()
    });

    (format!("http://{addr}"), handle)
}

fn client(base_url: String) -> DocStoreClient {
    DocStoreClient::new(DocStoreConfig {
        base_url,
        timeout: Duration::from_secs(5),
        bearer_token: Some("secret".to_string()),
        ca_cert_path: None,
    })
    .unwrap()
}

#[tokio::test]
async fn reads_current_content() {
    let (url, server) = respond_once("200 OK", r#"{"content":"Hello"}"#).await;
    let doc = DocumentId::new("wiki/Home");

    let content = client(url).current_content(&doc).await.unwrap();
    let request = server.await.unwrap();

    assert_eq!(content, "Hello");
    assert!(request.starts_with(&format!(
        "GET /documents/{}/content ",
        encode_document_id("wiki/Home")
    )));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
}

#[tokio::test]
async fn replaces_content_and_returns_audit_revision() {
    let (url, server) =
        respond_once("200 OK", r#"{"audit_revision":{"id":"r-9","reason":null}}"#).await;
    let doc = DocumentId::new("d");

    let applied = client(url)
        .apply_update("system", &doc, "new text", UpdateOptions::automated())
        .await
        .unwrap();
    let request = server.await.unwrap();

    let audit = applied.audit_revision.unwrap();
    assert_eq!(audit.id, AuditRevisionId::new("r-9"));
    assert!(audit.reason.is_none());
    assert!(request.starts_with("PUT "));
    assert!(request.contains(r#""actor":"system""#));
    assert!(request.contains(r#""skip_audit_log":true"#));
}

#[tokio::test]
async fn missing_audit_revision_is_none() {
    let (url, server) = respond_once("404 Not Found", "{}").await;

    let latest = client(url)
        .latest_audit_revision(&DocumentId::new("d"))
        .await
        .unwrap();
    server.await.unwrap();

    assert!(latest.is_none());
}

#[tokio::test]
async fn reason_goes_to_encoded_audit_path() {
    let (url, server) = respond_once("204 No Content", "").await;

    client(url)
        .set_reason(
            &DocumentId::new("d"),
            &AuditRevisionId::new("rev/1"),
            "Edited by: alice",
        )
        .await
        .unwrap();
    let request = server.await.unwrap();

    assert!(request.contains("/audit-revisions/rev%2F1/reason "));
    assert!(request.contains(r#""reason":"Edited by: alice""#));
}

#[tokio::test]
async fn usernames_follow_author_order() {
    let (url, server) = respond_once(
        "200 OK",
        r#"[{"id":"2","username":"bob"},{"id":"1","username":"alice"}]"#,
    )
    .await;

    let names = client(url)
        .resolve_usernames(&[AuthorId::new("1"), AuthorId::new("3"), AuthorId::new("2")])
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn rejected_write_maps_to_store_error() {
    let (url, server) = respond_once("422 Unprocessable Entity", r#"{"error":"too long"}"#).await;

    let err = client(url)
        .set_collaborative(&DocumentId::new("d"), true)
        .await
        .unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, StoreError::Rejected(_)));
}
