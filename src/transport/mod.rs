//! Gateway transport abstraction.
//!
//! The [`Transport`] trait decouples the session engine (registry,
//! supervisor, dispatcher) from the wire protocol. The production
//! implementation speaks websocket to the configured gateway
//! ([`gateway::GatewayTransport`]); [`memory::MemoryTransport`] is an
//! in-process implementation with scriptable outcomes for tests and dry
//! runs.

pub mod gateway;
pub mod memory;

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::session::Target;

/// Connection lifecycle state tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection; nothing in flight.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connection established and usable.
    Open,
    /// Orderly shutdown in progress.
    Closing,
    /// Non-recoverable closure; terminal.
    Failed,
}

/// Failure establishing a connection.
#[derive(Debug)]
pub enum ConnectError {
    /// Worth retrying: network failure, gateway unavailable.
    Transient(String),
    /// Not worth retrying: credential rejected or revoked upstream.
    Fatal(String),
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "connect failed (transient): {msg}"),
            Self::Fatal(msg) => write!(f, "connect failed (fatal): {msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Failure sending one payload.
#[derive(Debug)]
pub enum SendError {
    /// Connection-related; reconnect and retry the same payload.
    Transient(String),
    /// Payload- or target-related; skip the payload and move on.
    Permanent(String),
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "send failed (transient): {msg}"),
            Self::Permanent(msg) => write!(f, "send failed (permanent): {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Connection-closed notification pushed by a transport's reader task.
#[derive(Debug, Clone)]
pub struct CloseEvent {
    /// Human-readable close reason.
    pub reason: String,
    /// Whether the supervisor may schedule a reconnect.
    pub recoverable: bool,
}

/// Factory for gateway connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection authenticated with `credential`.
    ///
    /// Close notifications for the returned connection are delivered on
    /// `events` from a transport-owned reader task; the caller never
    /// installs callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Fatal`] when the credential is rejected,
    /// [`ConnectError::Transient`] for anything retryable.
    async fn connect(
        &self,
        credential: &[u8],
        events: mpsc::Sender<CloseEvent>,
    ) -> Result<Box<dyn Connection>, ConnectError>;
}

/// One live gateway connection.
#[async_trait]
pub trait Connection: Send {
    /// Deliver one payload to a target.
    ///
    /// Success means the write was accepted by the gateway connection;
    /// delivery receipts are not modeled.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Transient`] for connection-level failures and
    /// [`SendError::Permanent`] for payload- or target-level rejections.
    async fn send(&mut self, target: &Target, text: &str) -> Result<(), SendError>;

    /// Close the connection in an orderly fashion. Never fails; close
    /// errors on an already-dying connection carry no information.
    async fn close(&mut self);
}
