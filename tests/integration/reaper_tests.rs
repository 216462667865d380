//! Integration tests for the inactivity reaper.
//!
//! Validates that the sweep stops stale running sessions and only
//! those, that eviction rides the dispatcher's normal exit path, and
//! that the background task drives sweeps on its own.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use courier::reaper;

use super::test_helpers::{harness, request, wait_until};

const PACING: Duration = Duration::from_secs(60);

async fn wait_removed(registry: &courier::registry::SessionRegistry, key: &str) {
    for round in 0..20_000_u32 {
        if registry.lookup(key).await.is_none() {
            return;
        }
        if round % 512 == 511 {
            std::thread::sleep(Duration::from_millis(1));
        }
        tokio::task::yield_now().await;
    }
    panic!("session {key} was not removed");
}

#[tokio::test(start_paused = true)]
async fn sweep_stops_stale_sessions_and_spares_active_ones() {
    let h = harness(); // inactivity threshold: 120s
    let stale_key = h
        .registry
        .create(request(&["a"], PACING))
        .await
        .expect("create stale");
    let fresh_key = h
        .registry
        .create(request(&["b"], PACING))
        .await
        .expect("create fresh");

    let transport = h.transport.clone();
    wait_until("both sessions sent", || transport.sent().len() >= 2).await;

    // Backdate one session past the threshold, keep the other recent.
    let now = Utc::now();
    for session in h.registry.live_sessions().await {
        if session.key == stale_key {
            session.set_last_activity(now - chrono::Duration::seconds(200));
        } else {
            session.set_last_activity(now - chrono::Duration::seconds(10));
        }
    }

    let stopped = reaper::sweep(&h.registry, now).await;
    assert_eq!(stopped, 1, "only the stale session is stopped");

    // The stale session drains through its own exit path.
    wait_removed(&h.registry, &stale_key).await;
    assert!(
        !h.data_dir.path().join("sessions").join(&stale_key).exists(),
        "stale session's credential material purged"
    );

    // The fresh session is untouched.
    let fresh = h.registry.lookup(&fresh_key).await.expect("fresh session still live");
    assert_eq!(fresh.key, fresh_key);
    assert_eq!(h.registry.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_is_a_no_op_for_an_idle_registry() {
    let h = harness();
    assert_eq!(reaper::sweep(&h.registry, Utc::now()).await, 0);
}

#[tokio::test(start_paused = true)]
async fn sweep_ignores_sessions_already_stopping() {
    let h = harness();
    let key = h
        .registry
        .create(request(&["a"], PACING))
        .await
        .expect("create");

    let transport = h.transport.clone();
    wait_until("first send", || transport.sent().len() >= 1).await;

    let sessions = h.registry.live_sessions().await;
    let session = sessions.iter().find(|s| s.key == key).expect("live session");
    session.set_last_activity(Utc::now() - chrono::Duration::seconds(500));
    session.stop();

    // Already stopping: the sweep must not count it again.
    assert_eq!(reaper::sweep(&h.registry, Utc::now()).await, 0);
    wait_removed(&h.registry, &key).await;
}

#[tokio::test(start_paused = true)]
async fn background_task_sweeps_on_its_own() {
    let h = harness();
    let key = h
        .registry
        .create(request(&["a"], PACING))
        .await
        .expect("create");

    let transport = h.transport.clone();
    wait_until("first send", || transport.sent().len() >= 1).await;

    let logs = h.registry.subscribe(&key).await.expect("subscribe");
    for session in h.registry.live_sessions().await {
        session.set_last_activity(Utc::now() - chrono::Duration::seconds(500));
    }

    let ct = CancellationToken::new();
    let handle = reaper::spawn_reaper(h.registry.clone(), ct.clone());

    // The interval's first tick fires immediately and stops the idle
    // session; its dispatcher then releases it.
    wait_removed(&h.registry, &key).await;

    ct.cancel();
    let _ = handle.await;

    let records: Vec<_> = tokio::time::timeout(
        Duration::from_secs(30),
        futures_util::StreamExt::collect::<Vec<_>>(logs),
    )
    .await
    .expect("log stream ends");
    assert!(records
        .iter()
        .any(|r| r.text == "session auto-stopped after inactivity"));
}
