//! Concurrent session store with a defined ownership contract.
//!
//! The key→session map is the only structure mutated by multiple tasks
//! (API handlers, dispatchers, the reaper) and sits behind an async
//! `RwLock`; every critical section is a single map access. Credential
//! material on disk exists exactly as long as the session is present
//! here: `create` persists it before inserting, and `remove` — called
//! only from the dispatcher's exit path, after the connection is closed
//! — deletes it along with the entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::credentials::CredentialStore;
use crate::dispatcher;
use crate::models::log::LogRecord;
use crate::models::session::{self, Session, SessionSnapshot, Target};
use crate::transport::Transport;
use crate::{AppError, Result};

/// Validated input for session creation.
#[derive(Debug)]
pub struct SessionRequest {
    /// Ordered payload cycle.
    pub payloads: Vec<String>,
    /// Delivery destination.
    pub target: Target,
    /// Optional label prepended to every payload.
    pub prefix: Option<String>,
    /// Delay between sends.
    pub pacing: Duration,
    /// Credential blob to persist for the session.
    pub credential: Vec<u8>,
}

/// Concurrent-safe store of live sessions keyed by session key.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    config: Arc<GlobalConfig>,
}

impl SessionRegistry {
    /// Build a registry backed by `transport` and the configured data dir.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let credentials = Arc::new(CredentialStore::new(&config.data_dir));
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            credentials,
            transport,
            config,
        })
    }

    /// Shared configuration.
    #[must_use]
    pub fn config(&self) -> Arc<GlobalConfig> {
        Arc::clone(&self.config)
    }

    /// The gateway transport sessions connect through.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// The credential store owned by this registry.
    #[must_use]
    pub fn credentials(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.credentials)
    }

    /// Create a session: validate, persist credential material, insert
    /// the record, and start its dispatcher. Returns the session key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for an empty or oversized payload
    /// list, an empty target, an over-long pacing interval, or malformed
    /// credential material; `AppError::Credential` if persistence fails.
    pub async fn create(self: &Arc<Self>, request: SessionRequest) -> Result<String> {
        self.validate(&request)?;

        let key = session::generate_key();
        self.credentials.save(&key, &request.credential).await?;

        let session = Arc::new(Session::new(
            key.clone(),
            request.payloads,
            request.target,
            request.prefix,
            request.pacing,
            self.config.limits.log_buffer_cap,
        ));
        session.bus().info("session created");

        self.sessions
            .write()
            .await
            .insert(key.clone(), Arc::clone(&session));

        // Exactly one dispatcher per session, started here and nowhere
        // else.
        let _handle = dispatcher::spawn(session, Arc::clone(self));

        info!(session_key = %key, "session created");
        Ok(key)
    }

    fn validate(&self, request: &SessionRequest) -> Result<()> {
        let limits = &self.config.limits;

        if request.payloads.is_empty() {
            return Err(AppError::InvalidInput("payload list is empty".into()));
        }
        if request.payloads.len() > limits.max_payloads {
            return Err(AppError::InvalidInput(format!(
                "payload list exceeds the cap of {} entries",
                limits.max_payloads
            )));
        }
        if request.target.id.trim().is_empty() {
            return Err(AppError::InvalidInput("target is empty".into()));
        }
        if request.pacing > Duration::from_secs(limits.max_pacing_seconds) {
            return Err(AppError::InvalidInput(format!(
                "pacing exceeds the cap of {} seconds",
                limits.max_pacing_seconds
            )));
        }
        if request.credential.is_empty() {
            return Err(AppError::InvalidInput("credential material is empty".into()));
        }
        if request.credential.len() > limits.max_credential_bytes {
            return Err(AppError::InvalidInput(format!(
                "credential material exceeds {} bytes",
                limits.max_credential_bytes
            )));
        }
        if std::str::from_utf8(&request.credential).is_err() {
            return Err(AppError::InvalidInput(
                "credential material is not valid UTF-8".into(),
            ));
        }

        Ok(())
    }

    /// Request a stop for a session. Idempotent for a session already
    /// stopping; the dispatcher performs the actual teardown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown key.
    pub async fn stop(&self, key: &str) -> Result<()> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("session {key} not found")))?;
        session.bus().info("stop requested");
        session.stop();
        info!(session_key = %key, "session stop requested");
        Ok(())
    }

    /// Read-only snapshot of one session.
    pub async fn lookup(&self, key: &str) -> Option<SessionSnapshot> {
        self.sessions.read().await.get(key).map(|s| s.snapshot())
    }

    /// Attach an observer stream to a session's log bus: retained buffer
    /// first, then live records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown key.
    pub async fn subscribe(&self, key: &str) -> Result<BoxStream<'static, LogRecord>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("session {key} not found")))?;
        Ok(session.bus().subscribe())
    }

    /// Release a session: drop the record and purge its credential
    /// material. Called only from the dispatcher's exit path, once the
    /// connection is closed; dropping the record also ends every live
    /// observer stream.
    pub async fn remove(&self, key: &str) {
        let removed = self.sessions.write().await.remove(key);
        if removed.is_none() {
            warn!(session_key = %key, "remove for unknown session");
        }
        if let Err(err) = self.credentials.purge(key).await {
            warn!(session_key = %key, %err, "failed to purge credential material");
        }
        info!(session_key = %key, "session removed");
    }

    /// Every live session, for sweeps and shutdown.
    pub async fn live_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().map(Arc::clone).collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Request a stop for every live session (process shutdown).
    pub async fn stop_all(&self) {
        for session in self.live_sessions().await {
            session.bus().info("server shutting down");
            session.stop();
        }
    }
}
