//! In-process transport with scriptable outcomes.
//!
//! Default behavior is a gateway that always connects and always accepts
//! sends. Tests (and dry runs) queue up deviating outcomes per attempt
//! and can inject close events on the live connection to exercise the
//! supervisor's recovery paths.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CloseEvent, ConnectError, Connection, SendError, Transport};
use crate::models::session::Target;

/// Scripted result for one connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Attempt succeeds.
    Open,
    /// Attempt fails recoverably.
    Transient(String),
    /// Attempt fails fatally (credential rejected).
    Fatal(String),
}

/// Scripted result for one send.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Send is accepted and recorded.
    Delivered,
    /// Connection-level failure; payload should be retried.
    Transient(String),
    /// Payload-level rejection; payload should be skipped.
    Permanent(String),
}

/// One payload accepted by the in-process gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination the payload was addressed to.
    pub target: Target,
    /// Composed outgoing text (prefix already applied).
    pub text: String,
}

#[derive(Debug, Default)]
struct Shared {
    connect_plan: VecDeque<ConnectOutcome>,
    send_plan: VecDeque<SendOutcome>,
    sent: Vec<SentMessage>,
    connect_attempts: usize,
    events: Option<mpsc::Sender<CloseEvent>>,
}

/// Scriptable in-process [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Create a transport that connects and delivers unless told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an outcome for the next unplanned connect attempt.
    pub fn plan_connect(&self, outcome: ConnectOutcome) {
        self.lock().connect_plan.push_back(outcome);
    }

    /// Queue an outcome for the next unplanned send.
    pub fn plan_send(&self, outcome: SendOutcome) {
        self.lock().send_plan.push_back(outcome);
    }

    /// All payloads accepted so far, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Number of connect attempts observed.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Push a close event on the most recent live connection.
    ///
    /// Returns whether a connection was there to receive it.
    pub async fn inject_close(&self, reason: impl Into<String>, recoverable: bool) -> bool {
        let sender = self.lock().events.clone();
        match sender {
            Some(sender) => sender
                .send(CloseEvent {
                    reason: reason.into(),
                    recoverable,
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        _credential: &[u8],
        events: mpsc::Sender<CloseEvent>,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let outcome = {
            let mut shared = self.lock();
            shared.connect_attempts += 1;
            shared
                .connect_plan
                .pop_front()
                .unwrap_or(ConnectOutcome::Open)
        };

        match outcome {
            ConnectOutcome::Open => {
                self.lock().events = Some(events);
                Ok(Box::new(MemoryConnection {
                    shared: Arc::clone(&self.shared),
                }))
            }
            ConnectOutcome::Transient(msg) => Err(ConnectError::Transient(msg)),
            ConnectOutcome::Fatal(msg) => Err(ConnectError::Fatal(msg)),
        }
    }
}

struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, target: &Target, text: &str) -> Result<(), SendError> {
        let mut shared = self.lock();
        match shared.send_plan.pop_front().unwrap_or(SendOutcome::Delivered) {
            SendOutcome::Delivered => {
                shared.sent.push(SentMessage {
                    target: target.clone(),
                    text: text.to_owned(),
                });
                Ok(())
            }
            SendOutcome::Transient(msg) => Err(SendError::Transient(msg)),
            SendOutcome::Permanent(msg) => Err(SendError::Permanent(msg)),
        }
    }

    async fn close(&mut self) {
        self.lock().events = None;
    }
}
