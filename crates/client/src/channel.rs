//! Per-job push channel manager.
//!
//! [`PushChannel::open`] spawns one task per channel: connect, then
//! process frames until the channel ends. The task reports inbound
//! snapshots through `on_snapshot` in wire order and reports the end of
//! the channel through `on_failure`, exactly once. It never reconnects;
//! reconnection policy belongs to the tracker that owns the channel.

use std::sync::Arc;

use jobwatch_core::snapshot::JobStatusSnapshot;
use jobwatch_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelError, PushTransport};
use crate::processor::process_frames;

/// Opens push channels through a shared [`PushTransport`].
#[derive(Clone)]
pub struct PushChannel {
    transport: Arc<dyn PushTransport>,
}

/// Owner's handle to one open push channel.
///
/// Closing is idempotent and silent: a locally closed channel never
/// reports `on_failure`, and the reader stops delivering snapshots as soon
/// as it observes the close. Dropping the handle closes the channel.
#[derive(Debug)]
pub struct PushHandle {
    job_id: JobId,
    cancel: CancellationToken,
}

impl PushHandle {
    /// Release the channel. Calling this more than once is a no-op.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!(job_id = %self.job_id, "Closing push channel");
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl PushChannel {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Open a channel scoped to `job_id`.
    pub fn open<S, F>(&self, job_id: JobId, on_snapshot: S, on_failure: F) -> PushHandle
    where
        S: FnMut(JobStatusSnapshot) + Send + 'static,
        F: FnOnce(ChannelError) + Send + 'static,
    {
        self.spawn(job_id, CancellationToken::new(), on_snapshot, on_failure)
    }

    /// Open a channel that is also closed when `parent` is cancelled.
    pub fn open_scoped<S, F>(
        &self,
        parent: &CancellationToken,
        job_id: JobId,
        on_snapshot: S,
        on_failure: F,
    ) -> PushHandle
    where
        S: FnMut(JobStatusSnapshot) + Send + 'static,
        F: FnOnce(ChannelError) + Send + 'static,
    {
        self.spawn(job_id, parent.child_token(), on_snapshot, on_failure)
    }

    // ---- private helpers ----

    fn spawn<S, F>(
        &self,
        job_id: JobId,
        cancel: CancellationToken,
        mut on_snapshot: S,
        on_failure: F,
    ) -> PushHandle
    where
        S: FnMut(JobStatusSnapshot) + Send + 'static,
        F: FnOnce(ChannelError) + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let task_cancel = cancel.clone();
        let task_job_id = job_id.clone();

        tokio::spawn(async move {
            let job_id = task_job_id;
            let cancel = task_cancel;

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                connected = transport.connect(&job_id) => connected,
            };

            let end = match connected {
                Ok(mut frames) => {
                    process_frames(&mut frames, &job_id, &mut on_snapshot, &cancel).await
                }
                Err(e) => Some(e),
            };

            match end {
                Some(e) if !cancel.is_cancelled() => {
                    tracing::warn!(job_id = %job_id, error = %e, "Push channel failed");
                    cancel.cancel();
                    on_failure(e);
                }
                _ => {
                    tracing::debug!(job_id = %job_id, "Push channel task exited after close");
                }
            }
        });

        PushHandle { job_id, cancel }
    }
}
