//! Session model, lifecycle state machine, and delivery targets.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logbus::LogBus;
use crate::AppError;

/// Lifecycle status for a dispatch session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session created but its dispatcher has not started connecting yet.
    Queued,
    /// Gateway connection being established.
    Connecting,
    /// Dispatch loop actively sending.
    Running,
    /// Stop requested; dispatcher draining.
    Stopping,
    /// Dispatcher exited and resources released.
    Stopped,
    /// Connection closed non-recoverably; terminal.
    Failed,
}

/// Whether a target is an individual recipient or a group-like destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Single recipient.
    Direct,
    /// Group-like destination.
    Group,
}

impl std::str::FromStr for TargetKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(AppError::InvalidInput(format!(
                "target kind must be 'direct' or 'group', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Delivery destination for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Target {
    /// Destination identifier understood by the gateway.
    pub id: String,
    /// Direct vs. group-like discriminant.
    pub kind: TargetKind,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Generate a collision-resistant session key (32 lowercase hex chars).
#[must_use]
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Read-only view of a session returned by registry lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSnapshot {
    /// Unique session key.
    pub key: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Delivery destination.
    pub target: Target,
    /// Number of payloads in the cycle.
    pub payload_count: usize,
    /// Next payload index.
    pub cursor: usize,
    /// Successful sends so far.
    pub sent: u64,
    /// Seconds between sends.
    pub pacing_seconds: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last successful send or connection transition.
    pub last_activity: DateTime<Utc>,
}

/// One live dispatch session.
///
/// Immutable configuration is plain public state; everything mutated after
/// creation goes through accessors so the dispatcher stays the single
/// writer for `cursor` and registry readers only ever see snapshots.
#[derive(Debug)]
pub struct Session {
    /// Unique session key, immutable.
    pub key: String,
    /// Delivery destination, immutable.
    pub target: Target,
    /// Ordered payload cycle, immutable after creation.
    pub payloads: Vec<String>,
    /// Optional label prepended to every outgoing payload.
    pub prefix: Option<String>,
    /// Delay between sends.
    pub pacing: Duration,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    cursor: AtomicUsize,
    sent: AtomicU64,
    last_activity: Mutex<DateTime<Utc>>,
    cancel: CancellationToken,
    bus: LogBus,
}

impl Session {
    /// Construct a new session in the `Queued` state.
    #[must_use]
    pub fn new(
        key: String,
        payloads: Vec<String>,
        target: Target,
        prefix: Option<String>,
        pacing: Duration,
        log_cap: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            target,
            payloads,
            prefix,
            pacing,
            created_at: now,
            state: Mutex::new(SessionState::Queued),
            cursor: AtomicUsize::new(0),
            sent: AtomicU64::new(0),
            last_activity: Mutex::new(now),
            cancel: CancellationToken::new(),
            bus: LogBus::new(log_cap),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state(), next),
            (SessionState::Queued, SessionState::Connecting | SessionState::Stopping)
                | (
                    SessionState::Connecting,
                    SessionState::Running | SessionState::Stopping | SessionState::Failed
                )
                | (
                    SessionState::Running,
                    SessionState::Stopping | SessionState::Failed
                )
                | (SessionState::Stopping, SessionState::Stopped)
        )
    }

    /// Apply a lifecycle transition if the state machine permits it.
    ///
    /// Returns whether the transition was applied. Connection-affecting
    /// transitions also refresh `last_activity`.
    pub fn transition(&self, next: SessionState) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.touch();
        true
    }

    /// Whether the dispatch loop should keep going.
    ///
    /// Once false this never becomes true again; a new session (new key)
    /// must be created to resume.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Clone of the cancellation token shared by the dispatcher,
    /// supervisor, and pacing sleeps.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop: move to `Stopping` and cancel the token.
    ///
    /// Idempotent; the dispatcher observes the cancellation at its next
    /// suspension point and performs the actual teardown.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.transition(SessionState::Stopping);
        self.cancel.cancel();
    }

    /// Mark the session failed after a non-recoverable closure and clear
    /// the running flag.
    pub fn fail(&self) {
        self.transition(SessionState::Failed);
        self.cancel.cancel();
    }

    /// Next payload index.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Set the payload index (dispatcher is the single writer).
    pub fn set_cursor(&self, value: usize) {
        self.cursor.store(value, Ordering::SeqCst);
    }

    /// Successful sends so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Count one successful send.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Last successful send or connection transition.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh `last_activity` to now.
    pub fn touch(&self) {
        self.set_last_activity(Utc::now());
    }

    /// Set `last_activity` to a specific instant.
    pub fn set_last_activity(&self, at: DateTime<Utc>) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// The session's observer log bus.
    #[must_use]
    pub fn bus(&self) -> &LogBus {
        &self.bus
    }

    /// Produce a read-only view for API consumers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            state: self.state(),
            target: self.target.clone(),
            payload_count: self.payloads.len(),
            cursor: self.cursor(),
            sent: self.sent(),
            pacing_seconds: self.pacing.as_secs(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}
