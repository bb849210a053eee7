//! Job status transport layer.
//!
//! Provides the pull side (HTTP [`api::JobsApi`] behind the
//! [`api::StatusFetcher`] trait), the push side (WebSocket
//! [`client::WsTransport`] behind [`client::PushTransport`], driven by the
//! per-job [`channel::PushChannel`] manager), and the translation of
//! backend payloads into snapshots.

pub mod api;
pub mod channel;
pub mod client;
pub mod messages;
pub mod processor;

pub use api::{FetchError, JobsApi, StatusFetcher};
pub use channel::{PushChannel, PushHandle};
pub use client::{ChannelError, Frame, FrameStream, PushTransport, WsTransport};
