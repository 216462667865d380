#![forbid(unsafe_code)]

//! `courier` — outbound messaging session server.
//!
//! Manages many concurrent, independent dispatch sessions. Each session
//! drives a long-lived connection to an external message-delivery
//! gateway, cycles through a bounded payload list with configurable
//! pacing, and streams its progress to live observers over HTTP.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod logbus;
pub mod models;
pub mod reaper;
pub mod registry;
pub mod supervisor;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
