//! Push channel frame processing loop.
//!
//! Reads [`Frame`]s from an open channel, parses text frames into
//! [`JobStatusSnapshot`]s, and hands them to the subscriber in wire order.
//! Malformed frames are logged and dropped; they never end the channel.

use futures::StreamExt;
use jobwatch_core::snapshot::JobStatusSnapshot;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelError, Frame, FrameStream};
use crate::messages::parse_snapshot;

/// Process frames until the channel ends or `cancel` fires.
///
/// Returns the reason the channel ended, or `None` when it was closed
/// locally through `cancel`. No snapshot is delivered once `cancel` has
/// fired.
pub async fn process_frames<S>(
    frames: &mut FrameStream,
    job_id: &str,
    on_snapshot: &mut S,
    cancel: &CancellationToken,
) -> Option<ChannelError>
where
    S: FnMut(JobStatusSnapshot),
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(Frame::Text(text))) => {
                if cancel.is_cancelled() {
                    return None;
                }
                handle_text_frame(&text, job_id, on_snapshot);
            }
            Some(Ok(Frame::Close(reason))) => {
                tracing::info!(job_id, ?reason, "Push channel closed by server");
                return Some(ChannelError::Closed(
                    reason.unwrap_or_else(|| "closed by server".to_string()),
                ));
            }
            Some(Err(e)) => {
                tracing::warn!(job_id, error = %e, "Push channel receive error");
                return Some(e);
            }
            None => {
                tracing::warn!(job_id, "Push channel stream ended abruptly");
                return Some(ChannelError::Closed("connection dropped".to_string()));
            }
        }
    }
}

fn handle_text_frame<S>(text: &str, job_id: &str, on_snapshot: &mut S)
where
    S: FnMut(JobStatusSnapshot),
{
    match parse_snapshot(text, job_id) {
        Ok(snapshot) => {
            tracing::debug!(
                job_id,
                status = %snapshot.status,
                progress = snapshot.progress,
                "Push frame received",
            );
            on_snapshot(snapshot);
        }
        Err(e) => {
            tracing::warn!(
                job_id,
                error = %e,
                raw_message = %text,
                "Dropping malformed push frame",
            );
        }
    }
}
