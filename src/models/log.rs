//! Log record model published to session observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity classification for an observer-visible record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine progress.
    Info,
    /// Failure or recovery activity.
    Error,
}

/// One timestamped entry in a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogRecord {
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Human-readable event text.
    pub text: String,
    /// Severity classification.
    pub severity: Severity,
}

impl LogRecord {
    /// Construct an informational record stamped now.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            severity: Severity::Info,
        }
    }

    /// Construct an error record stamped now.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            severity: Severity::Error,
        }
    }

    /// Wire shape for the log stream: `{"message": …, "type": …}`.
    #[must_use]
    pub fn stream_json(&self) -> String {
        serde_json::json!({
            "message": self.text,
            "type": self.severity,
        })
        .to_string()
    }
}
