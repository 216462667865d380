//! HTTP transport: session creation, stop, live log streaming.
//!
//! Thin axum layer over the [`SessionRegistry`]; all engine behavior
//! lives behind it. Only input-validation failures surface here as
//! responses — dispatch and connection failures stay inside the engine
//! and are visible through the log stream.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::SessionRegistry;
use crate::{AppError, Result};

/// Shared state for request handlers.
pub struct ApiState {
    /// The session registry behind every route.
    pub registry: Arc<SessionRegistry>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(%self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/send", post(handlers::create_session))
        .route("/stop", post(handlers::stop_session))
        .route("/logs/{session_key}", get(handlers::stream_logs))
        .route("/sessions/{session_key}", get(handlers::session_snapshot))
        .with_state(state)
}

/// Serve the HTTP transport on the configured port until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound, or
/// `AppError::Io` if the server loop fails.
pub async fn serve(registry: Arc<SessionRegistry>, ct: CancellationToken) -> Result<()> {
    let port = registry.config().http_port;
    let bind = SocketAddr::from(([0, 0, 0, 0], port));

    let app = router(Arc::new(ApiState { registry }));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, "starting HTTP transport");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("HTTP transport shut down");
    Ok(())
}
