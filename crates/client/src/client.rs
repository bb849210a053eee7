//! WebSocket transport for per-job push channels.
//!
//! [`PushTransport`] is the seam between the push channel manager and the
//! wire: it turns a job id into a stream of inbound [`Frame`]s.
//! [`WsTransport`] is the production implementation over
//! `tokio-tungstenite`, connecting to `{ws_url}/ws/jobs/{job_id}`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use jobwatch_core::error::WatchError;
use jobwatch_core::types::JobId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// An inbound application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload, expected to be a JSON job snapshot.
    Text(String),
    /// The server closed the channel, with its stated reason if any.
    Close(Option<String>),
}

/// Inbound frames in wire order. The stream ending without a
/// [`Frame::Close`] means the connection dropped.
pub type FrameStream = BoxStream<'static, Result<Frame, ChannelError>>;

/// Opens push connections scoped to one job.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, job_id: &JobId) -> Result<FrameStream, ChannelError>;
}

/// Connection settings for the backend's job WebSocket endpoint.
pub struct WsTransport {
    ws_url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    /// * `ws_url`          - WebSocket base URL, e.g. `ws://host:8000`.
    /// * `connect_timeout` - upper bound on the handshake.
    pub fn new(ws_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8000`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full channel URL for one job.
    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/ws/jobs/{}", self.ws_url, job_id)
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, job_id: &JobId) -> Result<FrameStream, ChannelError> {
        let url = self.job_url(job_id);

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| ChannelError::Timeout(self.connect_timeout))?
            .map_err(|e| ChannelError::Connection(format!("Failed to connect to {url}: {e}")))?;

        tracing::info!(job_id = %job_id, url = %url, "Push channel connected");

        let frames = ws_stream.filter_map(|msg| async move { inbound(msg) });

        Ok(frames.boxed())
    }
}

/// Map one WebSocket message to an application frame, skipping control
/// traffic and binary payloads that are not UTF-8.
fn inbound(msg: Result<Message, WsError>) -> Option<Result<Frame, ChannelError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        // Some backends send JSON as binary frames.
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(e) => {
                tracing::warn!(
                    len = e.as_bytes().len(),
                    error = %e.utf8_error(),
                    "Dropping malformed binary frame: not valid UTF-8",
                );
                None
            }
        },
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(frame.map(|f| f.reason.into_owned())))),
        // Handled automatically by tungstenite.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(ChannelError::Protocol(e.to_string()))),
    }
}

/// Errors that end a push channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Failed to establish the connection (refused, DNS, handshake).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The server closed the channel or the connection dropped.
    #[error("Channel closed: {0}")]
    Closed(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<ChannelError> for WatchError {
    fn from(e: ChannelError) -> Self {
        WatchError::Transport(e.to_string())
    }
}
