//! Connection lifecycle supervision for one session.
//!
//! The supervisor owns the session's gateway connection handle and its
//! [`LinkState`] machine. Close notifications from the transport's reader
//! arrive on a channel consumed by a single supervisor task; recoverable
//! closures schedule exactly one reconnect after a fixed backoff, and
//! non-recoverable closures mark the session failed and clear its running
//! flag. Reconnection has no retry ceiling — it is gated solely by the
//! session's cancellation state, and every attempt is published to the
//! session log so operators can spot loops.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::credentials::CredentialStore;
use crate::models::session::Session;
use crate::transport::{CloseEvent, ConnectError, Connection, LinkState, SendError, Transport};

/// Cap on a single connect attempt so a hung handshake cannot pin the
/// dispatcher past its wait deadline.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a wait-for-open gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureError {
    /// Credential rejected; the session has been marked failed.
    Fatal,
    /// The caller's deadline elapsed before the link opened.
    TimedOut,
    /// The session stopped while waiting.
    Cancelled,
}

impl Display for EnsureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "connection failed permanently"),
            Self::TimedOut => write!(f, "timed out waiting for connection"),
            Self::Cancelled => write!(f, "session stopped while connecting"),
        }
    }
}

/// Owner of one session's connection handle and link state.
pub struct ConnectionSupervisor {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    conn: AsyncMutex<Option<Box<dyn Connection>>>,
    link: Mutex<LinkState>,
    backoff: Duration,
    reconnect_pending: AtomicBool,
    attempts: AtomicU64,
    /// Monotonic connection generation; close events from a superseded
    /// connection's reader are ignored.
    epoch: AtomicU64,
    events_tx: mpsc::Sender<(u64, CloseEvent)>,
}

impl ConnectionSupervisor {
    /// Build a supervisor and spawn its close-event consumer task.
    ///
    /// The task runs until the session's cancellation token fires.
    #[must_use]
    pub fn start(
        session: Arc<Session>,
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        backoff: Duration,
    ) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::channel(16);

        let supervisor = Arc::new(Self {
            session,
            transport,
            credentials,
            conn: AsyncMutex::new(None),
            link: Mutex::new(LinkState::Disconnected),
            backoff,
            reconnect_pending: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            events_tx,
        });

        let consumer = Arc::clone(&supervisor);
        tokio::spawn(async move {
            let cancel = consumer.session.cancel_token();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    next = events_rx.recv() => match next {
                        Some((epoch, event)) => {
                            Self::handle_close(&consumer, epoch, event).await;
                        }
                        None => break,
                    },
                }
            }
            debug!(session_key = %consumer.session.key, "close-event consumer exiting");
        });

        supervisor
    }

    /// Current link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        *self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_link(&self, next: LinkState) {
        *self.link.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Wait until the link is open, attempting connects with the fixed
    /// backoff between failures, for at most `limit`.
    ///
    /// # Errors
    ///
    /// [`EnsureError::Fatal`] if a connect attempt was rejected
    /// non-recoverably (the session is already marked failed),
    /// [`EnsureError::TimedOut`] when `limit` elapses, and
    /// [`EnsureError::Cancelled`] when the session stops first.
    pub async fn ensure_open(&self, limit: Duration) -> Result<(), EnsureError> {
        let deadline = tokio::time::Instant::now() + limit;
        let cancel = self.session.cancel_token();

        loop {
            if !self.session.is_running() {
                return Err(EnsureError::Cancelled);
            }
            if self.conn.lock().await.is_some() {
                return Ok(());
            }

            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(ConnectError::Fatal(_)) => return Err(EnsureError::Fatal),
                Err(ConnectError::Transient(_)) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(EnsureError::TimedOut);
                    }
                    let wait = self.backoff.min(deadline - now);
                    tokio::select! {
                        () = cancel.cancelled() => return Err(EnsureError::Cancelled),
                        () = tokio::time::sleep(wait) => {}
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(EnsureError::TimedOut);
                    }
                }
            }
        }
    }

    /// One connect attempt. A no-op if a connection is already live.
    async fn connect_once(&self) -> Result<(), ConnectError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        self.set_link(LinkState::Connecting);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.session
            .bus()
            .info(format!("connecting to gateway (attempt {attempt})"));

        let credential = self.credentials.load(&self.session.key).await.map_err(|err| {
            let err = ConnectError::Fatal(format!("credential material unavailable: {err}"));
            self.fail_link(&err);
            err
        })?;

        // Fresh per-connection channel, forwarded with an epoch tag so a
        // stale reader cannot tear down its successor.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, mut rx) = mpsc::channel(4);
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if forward.send((epoch, event)).await.is_err() {
                    break;
                }
            }
        });

        let connected =
            tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, self.transport.connect(&credential, tx))
                .await
                .unwrap_or_else(|_| {
                    Err(ConnectError::Transient("connect attempt timed out".into()))
                });

        match connected {
            Ok(conn) => {
                *guard = Some(conn);
                self.set_link(LinkState::Open);
                self.session.touch();
                self.session.bus().info("gateway connection open");
                Ok(())
            }
            Err(err @ ConnectError::Fatal(_)) => {
                drop(guard);
                self.fail_link(&err);
                Err(err)
            }
            Err(err @ ConnectError::Transient(_)) => {
                self.set_link(LinkState::Disconnected);
                self.session.bus().error(err.to_string());
                Err(err)
            }
        }
    }

    fn fail_link(&self, err: &ConnectError) {
        self.set_link(LinkState::Failed);
        self.session.bus().error(format!("{err}; session failed"));
        self.session.fail();
    }

    /// Deliver one composed payload over the current connection.
    ///
    /// The connection handle is read and written under the same lock the
    /// reconnect path uses, so a send never races a handle swap. A
    /// transient failure drops the dead handle; the caller decides when
    /// to reconnect.
    ///
    /// # Errors
    ///
    /// Propagates the transport's [`SendError`] classification; a missing
    /// connection counts as transient.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            None => Err(SendError::Transient("no open connection".into())),
            Some(conn) => {
                let result = conn.send(&self.session.target, text).await;
                if matches!(result, Err(SendError::Transient(_))) {
                    *guard = None;
                    self.set_link(LinkState::Disconnected);
                }
                result
            }
        }
    }

    /// Orderly shutdown of whatever connection is live.
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            self.set_link(LinkState::Closing);
            conn.close().await;
        }
        self.set_link(LinkState::Disconnected);
    }

    /// React to a close notification from a connection's reader.
    async fn handle_close(this: &Arc<Self>, epoch: u64, event: CloseEvent) {
        if epoch != this.epoch.load(Ordering::SeqCst) {
            debug!(
                session_key = %this.session.key,
                epoch,
                "ignoring close event from superseded connection"
            );
            return;
        }

        *this.conn.lock().await = None;

        if !event.recoverable {
            this.set_link(LinkState::Failed);
            this.session.bus().error(format!(
                "connection closed ({}); session failed",
                event.reason
            ));
            this.session.fail();
            return;
        }

        this.set_link(LinkState::Disconnected);
        if !this.session.is_running() {
            return;
        }

        this.session.bus().error(format!(
            "connection closed ({}); reconnecting in {}s",
            event.reason,
            this.backoff.as_secs()
        ));

        // One scheduled reconnect at a time, however many close events
        // pile up.
        if this.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let supervisor = Arc::clone(this);
        tokio::spawn(async move {
            let cancel = supervisor.session.cancel_token();
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(supervisor.backoff) => {
                    if supervisor.session.is_running() {
                        if let Err(err) = supervisor.connect_once().await {
                            warn!(
                                session_key = %supervisor.session.key,
                                %err,
                                "scheduled reconnect attempt failed"
                            );
                        }
                    }
                }
            }
            supervisor.reconnect_pending.store(false, Ordering::SeqCst);
        });
    }
}
