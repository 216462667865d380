//! Websocket gateway transport.
//!
//! One websocket connection per session. The first frame after the
//! handshake carries the session's credential material; every payload is
//! then a JSON text frame `{"target", "kind", "text"}`. The read half
//! runs in a spawned task that translates close frames and stream errors
//! into [`CloseEvent`]s for the supervisor.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{CloseEvent, ConnectError, Connection, SendError, Transport};
use crate::models::session::Target;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Websocket client for the configured gateway endpoint.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    url: String,
}

impl GatewayTransport {
    /// Create a transport targeting `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(
        &self,
        credential: &[u8],
        events: mpsc::Sender<CloseEvent>,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let credential = std::str::from_utf8(credential)
            .map_err(|_| ConnectError::Fatal("credential material is not valid UTF-8".into()))?;

        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(classify_handshake_error)?;
        let (mut writer, reader) = stream.split();

        let auth = serde_json::json!({ "type": "auth", "credential": credential }).to_string();
        writer
            .send(Message::Text(auth))
            .await
            .map_err(|err| ConnectError::Transient(format!("auth frame write failed: {err}")))?;

        let reader_task = tokio::spawn(read_until_closed(reader, events));

        Ok(Box::new(GatewayConnection {
            writer,
            reader_task,
        }))
    }
}

/// Consume the read half until the connection dies, then report why.
async fn read_until_closed(mut reader: WsSource, events: mpsc::Sender<CloseEvent>) {
    let event = loop {
        match reader.next().await {
            Some(Ok(Message::Close(frame))) => break close_event_from_frame(frame),
            Some(Ok(other)) => {
                // Gateway acks and pings carry no session state.
                debug!(kind = ?other, "ignoring inbound gateway frame");
            }
            Some(Err(err)) => {
                break CloseEvent {
                    reason: err.to_string(),
                    recoverable: true,
                }
            }
            None => {
                break CloseEvent {
                    reason: "connection closed by peer".into(),
                    recoverable: true,
                }
            }
        }
    };
    let _ = events.send(event).await;
}

/// Map a close frame onto the recoverability taxonomy.
///
/// 1008 (policy) and the gateway's 4xxx application range mean the
/// credential or session was invalidated upstream; everything else is
/// treated as a transient network condition.
fn close_event_from_frame(frame: Option<CloseFrame<'_>>) -> CloseEvent {
    frame.map_or_else(
        || CloseEvent {
            reason: "closed without close frame".into(),
            recoverable: true,
        },
        |frame| {
            let code: u16 = frame.code.into();
            CloseEvent {
                reason: format!("close code {code}: {}", frame.reason),
                recoverable: !matches!(code, 1008 | 4000..=4099),
            }
        },
    )
}

fn classify_handshake_error(err: WsError) -> ConnectError {
    match err {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ConnectError::Fatal(format!(
                "gateway rejected credentials (http {})",
                response.status()
            ))
        }
        other => ConnectError::Transient(other.to_string()),
    }
}

fn classify_send_error(err: WsError) -> SendError {
    match err {
        WsError::Capacity(_) => SendError::Permanent(err.to_string()),
        other => SendError::Transient(other.to_string()),
    }
}

/// Live websocket connection: write half plus the reader task handle.
struct GatewayConnection {
    writer: WsSink,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl Connection for GatewayConnection {
    async fn send(&mut self, target: &Target, text: &str) -> Result<(), SendError> {
        let frame = serde_json::json!({
            "target": target.id,
            "kind": target.kind,
            "text": text,
        })
        .to_string();

        self.writer
            .send(Message::Text(frame))
            .await
            .map_err(classify_send_error)
    }

    async fn close(&mut self) {
        let _ = self.writer.send(Message::Close(None)).await;
        let _ = self.writer.close().await;
        // Orderly shutdown: the supervisor no longer wants close events.
        self.reader_task.abort();
    }
}
