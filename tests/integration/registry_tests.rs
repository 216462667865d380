//! Integration tests for the session registry: creation validation,
//! credential persistence, stop semantics, and lookups.

use std::time::Duration;

use courier::AppError;

use super::test_helpers::{harness, request};

const PACING: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn create_returns_a_hex_key_and_persists_credentials() {
    let h = harness();
    let key = h
        .registry
        .create(request(&["a", "b"], PACING))
        .await
        .expect("create");

    assert_eq!(key.len(), 32);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

    let snapshot = h.registry.lookup(&key).await.expect("lookup");
    assert_eq!(snapshot.payload_count, 2);
    assert_eq!(snapshot.sent, 0);

    let cred = h
        .data_dir
        .path()
        .join("sessions")
        .join(&key)
        .join("credential");
    assert!(cred.exists(), "credential material persisted under the key");

    h.registry.stop(&key).await.expect("stop");
}

#[tokio::test]
async fn create_rejects_an_empty_payload_list() {
    let h = harness();
    let result = h.registry.create(request(&[], PACING)).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert!(h.registry.is_empty().await);
}

#[tokio::test]
async fn create_rejects_an_oversized_payload_list() {
    let h = harness(); // cap: 10
    let payloads: Vec<&str> = std::iter::repeat("x").take(11).collect();
    let result = h.registry.create(request(&payloads, PACING)).await;

    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert!(h.registry.is_empty().await);
}

#[tokio::test]
async fn create_rejects_bad_credentials_and_targets() {
    let h = harness();

    let mut empty_cred = request(&["a"], PACING);
    empty_cred.credential.clear();
    assert!(matches!(
        h.registry.create(empty_cred).await,
        Err(AppError::InvalidInput(_))
    ));

    let mut binary_cred = request(&["a"], PACING);
    binary_cred.credential = vec![0xff, 0xfe, 0xfd];
    assert!(matches!(
        h.registry.create(binary_cred).await,
        Err(AppError::InvalidInput(_))
    ));

    let mut oversized_cred = request(&["a"], PACING);
    oversized_cred.credential = vec![b'x'; 2048]; // cap: 1024
    assert!(matches!(
        h.registry.create(oversized_cred).await,
        Err(AppError::InvalidInput(_))
    ));

    let mut blank_target = request(&["a"], PACING);
    blank_target.target.id = "  ".into();
    assert!(matches!(
        h.registry.create(blank_target).await,
        Err(AppError::InvalidInput(_))
    ));

    let slow = request(&["a"], Duration::from_secs(24 * 3600));
    assert!(matches!(
        h.registry.create(slow).await,
        Err(AppError::InvalidInput(_))
    ));

    // Nothing was created, nothing was persisted.
    assert!(h.registry.is_empty().await);
    let sessions_root = h.data_dir.path().join("sessions");
    let leftovers = std::fs::read_dir(&sessions_root)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn stop_of_an_unknown_key_is_not_found() {
    let h = harness();
    let result = h.registry.stop("0123456789abcdef0123456789abcdef").await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(h.registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_while_the_session_drains() {
    let h = harness();
    let key = h
        .registry
        .create(request(&["a"], PACING))
        .await
        .expect("create");

    h.registry.stop(&key).await.expect("first stop");
    // A second stop on a draining session is fine as long as the entry
    // still exists.
    if h.registry.lookup(&key).await.is_some() {
        let second = h.registry.stop(&key).await;
        assert!(second.is_ok() || matches!(second, Err(AppError::NotFound(_))));
    }
}

#[tokio::test]
async fn subscribe_to_an_unknown_key_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.registry.subscribe("deadbeefdeadbeefdeadbeefdeadbeef").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn lookup_returns_none_for_unknown_and_snapshot_for_live() {
    let h = harness();
    assert!(h.registry.lookup("ffffffffffffffffffffffffffffffff").await.is_none());

    let key = h
        .registry
        .create(request(&["a"], PACING))
        .await
        .expect("create");
    assert!(h.registry.lookup(&key).await.is_some());
    h.registry.stop(&key).await.expect("stop");
}
