//! Periodic eviction of abandoned sessions.
//!
//! The reaper only signals: it clears the running flag of sessions idle
//! past the inactivity threshold and lets each dispatcher's own exit
//! path close the connection and release resources. It never removes a
//! session directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::SessionRegistry;

/// Spawn the inactivity sweep background task.
///
/// Runs every `sweep_interval` until `cancel` fires.
#[must_use]
pub fn spawn_reaper(registry: Arc<SessionRegistry>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(registry.config().sweep_interval());
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reaper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let stopped = sweep(&registry, Utc::now()).await;
                    if stopped > 0 {
                        info!(stopped, "inactivity sweep complete");
                    }
                }
            }
        }
    })
}

/// Stop every running session whose last activity is older than the
/// configured threshold as of `now`. Returns how many were stopped.
pub async fn sweep(registry: &SessionRegistry, now: DateTime<Utc>) -> usize {
    let threshold = registry.config().inactivity_threshold();
    let mut stopped = 0;

    for session in registry.live_sessions().await {
        if !session.is_running() {
            continue;
        }
        let idle = now - session.last_activity();
        if idle > threshold {
            session.bus().info("session auto-stopped after inactivity");
            session.stop();
            info!(
                session_key = %session.key,
                idle_seconds = idle.num_seconds(),
                "idle session stopped"
            );
            stopped += 1;
        }
    }

    stopped
}
