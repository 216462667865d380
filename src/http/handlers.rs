//! Request handlers for the HTTP surface.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::{Form, Json};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;

use super::ApiState;
use crate::models::session::{SessionSnapshot, Target, TargetKind};
use crate::registry::SessionRequest;
use crate::{AppError, Result};

/// Handler for `GET /health` — 200 OK with a plain-text body.
pub async fn health() -> &'static str {
    "ok"
}

/// Handler for `POST /send` — create a session from a multipart form.
///
/// Expected fields: `credential` (blob), `payloads` (one payload per
/// line), `target`, `target_kind` (`direct`|`group`), `pacing_seconds`,
/// and optionally `prefix`. Unknown fields are ignored.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` (400) for missing or malformed
/// fields and for anything registry validation rejects.
pub async fn create_session(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<String> {
    let mut credential: Option<Vec<u8>> = None;
    let mut payloads: Option<Vec<String>> = None;
    let mut target_id: Option<String> = None;
    let mut target_kind: Option<TargetKind> = None;
    let mut prefix: Option<String> = None;
    let mut pacing_seconds: u64 = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::InvalidInput(format!("malformed multipart request: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "credential" => {
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::InvalidInput(format!("unreadable credential field: {err}"))
                })?;
                credential = Some(bytes.to_vec());
            }
            "payloads" => {
                let text = read_text(field, "payloads").await?;
                payloads = Some(parse_payloads(&text));
            }
            "target" => target_id = Some(read_text(field, "target").await?.trim().to_owned()),
            "target_kind" => {
                target_kind = Some(read_text(field, "target_kind").await?.trim().parse()?);
            }
            "prefix" => {
                let text = read_text(field, "prefix").await?;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    prefix = Some(trimmed.to_owned());
                }
            }
            "pacing_seconds" => {
                let text = read_text(field, "pacing_seconds").await?;
                pacing_seconds = text.trim().parse().map_err(|_| {
                    AppError::InvalidInput(format!("pacing_seconds is not a number: {text}"))
                })?;
            }
            _ => {}
        }
    }

    let request = SessionRequest {
        payloads: payloads.ok_or_else(|| missing("payloads"))?,
        target: Target {
            id: target_id.ok_or_else(|| missing("target"))?,
            kind: target_kind.ok_or_else(|| missing("target_kind"))?,
        },
        prefix,
        pacing: Duration::from_secs(pacing_seconds),
        credential: credential.ok_or_else(|| missing("credential"))?,
    };

    let key = state.registry.create(request).await?;
    Ok(format!("Your session key is: {key}"))
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String> {
    field
        .text()
        .await
        .map_err(|err| AppError::InvalidInput(format!("unreadable {name} field: {err}")))
}

fn missing(name: &str) -> AppError {
    AppError::InvalidInput(format!("missing {name} field"))
}

/// Split a payload file into its non-blank, trimmed lines.
fn parse_payloads(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Form body for `POST /stop`.
#[derive(Debug, Deserialize)]
pub struct StopForm {
    /// Key of the session to stop.
    pub session_key: String,
}

/// Handler for `POST /stop` — request a session stop.
///
/// # Errors
///
/// Returns `AppError::NotFound` (404) for an unknown key.
pub async fn stop_session(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<StopForm>,
) -> Result<&'static str> {
    state.registry.stop(&form.session_key).await?;
    Ok("Session stopped")
}

/// Handler for `GET /logs/{session_key}` — server-sent event stream of
/// the retained buffer followed by live records.
///
/// # Errors
///
/// Returns `AppError::NotFound` (404) for an unknown key.
pub async fn stream_logs(
    State(state): State<Arc<ApiState>>,
    Path(session_key): Path<String>,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, std::result::Result<Event, Infallible>>>>> {
    let records = state.registry.subscribe(&session_key).await?;
    let stream = records
        .map(|record| Ok(Event::default().data(record.stream_json())))
        .boxed();
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Handler for `GET /sessions/{session_key}` — JSON snapshot.
///
/// # Errors
///
/// Returns `AppError::NotFound` (404) for an unknown key.
pub async fn session_snapshot(
    State(state): State<Arc<ApiState>>,
    Path(session_key): Path<String>,
) -> Result<Json<SessionSnapshot>> {
    state
        .registry
        .lookup(&session_key)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {session_key} not found")))
}
