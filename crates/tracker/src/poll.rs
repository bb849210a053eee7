//! Timer-driven repeated invocation.
//!
//! [`PollLoop::start`] calls a supplied async function every `interval`
//! until stopped. The first call happens one interval after start, never
//! immediately. Calls never overlap: if one outlives its interval, the
//! missed ticks are skipped rather than stacked.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct PollLoop;

/// Handle to a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
}

impl PollLoop {
    /// Start calling `f` every `interval`.
    ///
    /// `interval` must be non-zero.
    pub fn start<F, Fut>(interval: Duration, f: F) -> PollHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::start_scoped(&CancellationToken::new(), interval, f)
    }

    /// Like [`start`](Self::start), also stopped when `parent` is cancelled.
    pub fn start_scoped<F, Fut>(
        parent: &CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> PollHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // An invocation already started runs to completion; the
                // caller discards results that arrive after `stop`.
                f().await;
            }

            tracing::debug!(
                interval_ms = interval.as_millis() as u64,
                "Poll loop stopped"
            );
        });

        PollHandle { cancel }
    }
}

impl PollHandle {
    /// Cancel future invocations. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
