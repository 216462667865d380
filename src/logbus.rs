//! Per-session event log: bounded retained history plus live fan-out.
//!
//! Observers that attach late receive the retained buffer first and then
//! switch seamlessly to live records. Slow or disconnected observers are
//! dropped by the broadcast channel rather than ever blocking a publisher.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::models::log::LogRecord;

/// Live-subscriber channel depth; laggards past this are disconnected.
const CHANNEL_CAPACITY: usize = 256;

/// Bounded ring buffer of log records with broadcast fan-out.
#[derive(Debug)]
pub struct LogBus {
    history: RwLock<VecDeque<LogRecord>>,
    sender: broadcast::Sender<LogRecord>,
    cap: usize,
}

impl LogBus {
    /// Create a bus retaining at most `cap` records (oldest evicted first).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(cap.min(64))),
            sender,
            cap,
        }
    }

    /// Append a record to the retained buffer and push it to every live
    /// subscriber. Publishing never blocks; a send with no subscribers is
    /// not an error.
    pub fn publish(&self, record: LogRecord) {
        let _ = self.sender.send(record.clone());

        let mut history = self
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.cap {
            if history.pop_front().is_none() {
                break;
            }
        }
        history.push_back(record);
    }

    /// Publish an informational record.
    pub fn info(&self, text: impl Into<String>) {
        self.publish(LogRecord::info(text));
    }

    /// Publish an error record.
    pub fn error(&self, text: impl Into<String>) {
        self.publish(LogRecord::error(text));
    }

    /// Snapshot of the retained buffer, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<LogRecord> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields the retained buffer first, then live records in
    /// publish order.
    ///
    /// The stream holds only a history snapshot and a broadcast receiver —
    /// never the session itself — so it ends when the session is removed
    /// and the bus (the sole sender) is dropped. Records missed while a
    /// subscriber lags are skipped rather than stalling the publisher.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, LogRecord> {
        let history = self.history();
        let receiver = self.sender.subscribe();

        let retained = stream::iter(history);
        let live = BroadcastStream::new(receiver).filter_map(|res| async move { res.ok() });

        retained.chain(live).boxed()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
