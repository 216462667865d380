//! Per-session dispatch loop.
//!
//! One task per session walks the payload cycle in order, composes each
//! outgoing message, sends it through the supervised connection, and
//! paces iterations. The loop deliberately never terminates on payload
//! exhaustion — the cursor wraps and delivery continues until the
//! session is stopped or fails. The session's cancellation token is the
//! only exit signal; it is observed at the pacing sleep and at every
//! connection wait, so stop latency is bounded by one pacing interval
//! plus one reconnect-wait timeout.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};

use crate::models::session::{Session, SessionState};
use crate::registry::SessionRegistry;
use crate::supervisor::{ConnectionSupervisor, EnsureError};
use crate::transport::SendError;

/// Spawn the dispatch loop for a freshly created session.
///
/// Exactly one loop exists per session; the registry calls this once,
/// at creation.
#[must_use]
pub fn spawn(session: Arc<Session>, registry: Arc<SessionRegistry>) -> JoinHandle<()> {
    let span = info_span!("dispatcher", session_key = %session.key);
    tokio::spawn(run(session, registry).instrument(span))
}

async fn run(session: Arc<Session>, registry: Arc<SessionRegistry>) {
    let supervisor = ConnectionSupervisor::start(
        Arc::clone(&session),
        registry.transport(),
        registry.credentials(),
        registry.config().reconnect_backoff(),
    );
    let connect_timeout = registry.config().connect_timeout();
    let cancel = session.cancel_token();

    session.transition(SessionState::Connecting);

    // Initial connection: keep trying until open, fatally rejected, or
    // stopped. Unreachable-gateway periods are reported but not fatal.
    loop {
        match supervisor.ensure_open(connect_timeout).await {
            Ok(()) => {
                session.transition(SessionState::Running);
                session.bus().info("dispatch loop started");
                break;
            }
            Err(EnsureError::TimedOut) => {
                session.bus().error("gateway unreachable; still trying");
            }
            Err(EnsureError::Fatal | EnsureError::Cancelled) => break,
        }
    }

    // The registry rejects empty payload lists; if one slips through,
    // there is nothing to dispatch and the session just waits for stop.
    if session.payloads.is_empty() && session.is_running() {
        session.bus().info("no payloads to dispatch");
        cancel.cancelled().await;
    }

    while session.is_running() {
        let cursor = session.cursor();
        let payload = &session.payloads[cursor];
        let outgoing = match &session.prefix {
            Some(prefix) => format!("{prefix} {payload}"),
            None => payload.clone(),
        };

        match supervisor.send(&outgoing).await {
            Ok(()) => {
                session.record_sent();
                session.touch();
                session.bus().info(format!(
                    "sent payload #{} to {}",
                    cursor + 1,
                    session.target
                ));
                advance(&session);
            }
            Err(SendError::Transient(msg)) => {
                // Connection-related: reconnect and retry the same
                // payload; the cursor does not move.
                session.bus().error(format!("send failed: {msg}; reconnecting"));
                match supervisor.ensure_open(connect_timeout).await {
                    Ok(()) => {}
                    Err(EnsureError::TimedOut) => {
                        session
                            .bus()
                            .error("reconnect timed out; payload will be retried");
                    }
                    Err(EnsureError::Fatal | EnsureError::Cancelled) => {}
                }
            }
            Err(SendError::Permanent(msg)) => {
                // Poisoned payload or target rejection: skip it and keep
                // the cycle moving.
                session.bus().error(format!(
                    "send rejected: {msg}; skipping payload #{}",
                    cursor + 1
                ));
                advance(&session);
            }
        }

        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(session.pacing) => {}
        }
    }

    // Exit path: close the connection, publish the terminal record, then
    // ask the registry to release the session's resources.
    supervisor.close().await;

    if session.state() == SessionState::Failed {
        session.bus().error("session failed");
    } else {
        session.transition(SessionState::Stopping);
        session.bus().info("session stopped");
        session.transition(SessionState::Stopped);
    }

    info!(sent = session.sent(), "dispatch loop finished");
    registry.remove(&session.key).await;
}

/// Move the cursor to the next payload, wrapping to 0 at the end of the
/// list. The cursor therefore never leaves `[0, len)`, and every wrap
/// is announced to observers.
fn advance(session: &Session) {
    let next = session.cursor() + 1;
    if next >= session.payloads.len() {
        session.set_cursor(0);
        session.bus().info("loop restarted");
    } else {
        session.set_cursor(next);
    }
}
