//! End-to-end tests for the HTTP surface over a real socket.
//!
//! Uses an ephemeral port and a reqwest client, with the scriptable
//! in-process transport standing in for the gateway.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use courier::http::{router, ApiState};

use super::test_helpers::{harness, Harness};

/// Serve the router on an ephemeral port; cancel `ct` to shut down.
async fn spawn_server(h: &Harness) -> (String, CancellationToken) {
    let app = router(Arc::new(ApiState {
        registry: Arc::clone(&h.registry),
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let ct = CancellationToken::new();
    let shutdown = ct.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
    });

    (format!("http://{addr}"), ct)
}

fn send_form(payloads: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("target", "obs-1")
        .text("target_kind", "direct")
        .text("pacing_seconds", "1")
        .part(
            "credential",
            reqwest::multipart::Part::bytes(b"token-material".to_vec())
                .file_name("credential.bin"),
        )
        .part(
            "payloads",
            reqwest::multipart::Part::text(payloads.to_owned()).file_name("payloads.txt"),
        )
}

fn key_from_body(body: &str) -> String {
    body.rsplit(' ').next().expect("key in body").to_owned()
}

#[tokio::test]
async fn health_returns_ok() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;

    let resp = reqwest::get(format!("{base}/health")).await.expect("GET /health");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");

    ct.cancel();
}

#[tokio::test]
async fn send_then_stop_round_trip() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    // Create.
    let resp = client
        .post(format!("{base}/send"))
        .multipart(send_form("hello\nworld\n"))
        .send()
        .await
        .expect("POST /send");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.expect("body");
    assert!(
        body.starts_with("Your session key is: "),
        "unexpected body: {body}"
    );
    let key = key_from_body(&body);
    assert_eq!(key.len(), 32);

    // The session is live and its credential material is on disk.
    let snapshot = client
        .get(format!("{base}/sessions/{key}"))
        .send()
        .await
        .expect("GET /sessions")
        .json::<serde_json::Value>()
        .await
        .expect("snapshot json");
    assert_eq!(snapshot["payload_count"], 2);
    let cred_dir = h.data_dir.path().join("sessions").join(&key);
    assert!(cred_dir.exists());

    // Stop.
    let resp = client
        .post(format!("{base}/stop"))
        .form(&[("session_key", key.as_str())])
        .send()
        .await
        .expect("POST /stop");
    assert_eq!(resp.status(), 200);

    // The dispatcher drains within a pacing interval and releases
    // everything.
    for _ in 0..50 {
        if h.registry.lookup(&key).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(h.registry.lookup(&key).await.is_none());
    assert!(!cred_dir.exists(), "credential material purged after stop");

    ct.cancel();
}

#[tokio::test]
async fn send_with_blank_payload_file_is_rejected() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/send"))
        .multipart(send_form("\n \n"))
        .send()
        .await
        .expect("POST /send");

    assert_eq!(resp.status(), 400);
    let body = resp.text().await.expect("body");
    assert!(body.contains("payload list is empty"), "unexpected body: {body}");
    assert!(h.registry.is_empty().await, "no session created");

    ct.cancel();
}

#[tokio::test]
async fn send_with_missing_credential_is_rejected() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .text("target", "obs-1")
        .text("target_kind", "direct")
        .text("pacing_seconds", "1")
        .part(
            "payloads",
            reqwest::multipart::Part::text("hello").file_name("payloads.txt"),
        );
    let resp = client
        .post(format!("{base}/send"))
        .multipart(form)
        .send()
        .await
        .expect("POST /send");

    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.expect("body").contains("missing credential"));

    ct.cancel();
}

#[tokio::test]
async fn send_with_unknown_target_kind_is_rejected() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let form = send_form("hello").text("target_kind", "broadcast");
    // Note: the duplicate field keeps the last value, which is invalid.
    let resp = client
        .post(format!("{base}/send"))
        .multipart(form)
        .send()
        .await
        .expect("POST /send");

    assert_eq!(resp.status(), 400);

    ct.cancel();
}

#[tokio::test]
async fn stop_with_unknown_key_is_404_and_changes_nothing() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/stop"))
        .form(&[("session_key", "0123456789abcdef0123456789abcdef")])
        .send()
        .await
        .expect("POST /stop");

    assert_eq!(resp.status(), 404);
    assert!(h.registry.is_empty().await);

    ct.cancel();
}

#[tokio::test]
async fn logs_stream_replays_buffer_then_follows_live() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{base}/send"))
        .multipart(send_form("hello"))
        .send()
        .await
        .expect("POST /send")
        .text()
        .await
        .expect("body");
    let key = key_from_body(&body);

    let resp = client
        .get(format!("{base}/logs/{key}"))
        .send()
        .await
        .expect("GET /logs");
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream")));

    // "session created" was published before we attached, so it can only
    // arrive via the retained-buffer replay.
    let mut stream = Box::pin(resp.bytes_stream());
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline
        && !(seen.contains("session created") && seen.contains("sent payload #1"))
    {
        match tokio::time::timeout(Duration::from_secs(1), stream.next()).await {
            Ok(Some(Ok(chunk))) => seen.push_str(&String::from_utf8_lossy(&chunk)),
            Ok(Some(Err(_)) | None) => break,
            Err(_) => {}
        }
    }

    assert!(seen.contains("data: {"), "SSE framing missing: {seen}");
    assert!(
        seen.contains("\"message\":\"session created\""),
        "replay missing: {seen}"
    );
    assert!(
        seen.contains("\"type\":\"info\""),
        "severity missing: {seen}"
    );

    h.registry.stop(&key).await.expect("stop");
    ct.cancel();
}

#[tokio::test]
async fn logs_for_an_unknown_key_is_404() {
    let h = harness();
    let (base, ct) = spawn_server(&h).await;

    let resp = reqwest::get(format!("{base}/logs/deadbeefdeadbeefdeadbeefdeadbeef"))
        .await
        .expect("GET /logs");
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("{base}/sessions/deadbeefdeadbeefdeadbeefdeadbeef"))
        .await
        .expect("GET /sessions");
    assert_eq!(resp.status(), 404);

    ct.cancel();
}
