//! Single-job tracker.
//!
//! [`watch_job`] spawns one actor task per job. The actor owns the whole
//! session: which channel is authoritative, the tentative push channel
//! racing the poll loop, retry counters, and the last emitted snapshot.
//! Push and poll tasks never touch that state; they post
//! generation-tagged [`TrackerEvent`]s into the actor's inbox and the
//! actor drops anything from a channel it has since replaced.
//!
//! ```text
//! Idle -> Loading -> PushActive <-> PollActive
//!            \            \            /
//!             `------------+--> Closed
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use jobwatch_client::{ChannelError, FetchError, PushChannel, PushHandle, PushTransport, StatusFetcher};
use jobwatch_core::error::WatchError;
use jobwatch_core::snapshot::JobStatusSnapshot;
use jobwatch_core::types::JobId;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::events::{JobUpdate, TrackerState};
use crate::poll::{PollHandle, PollLoop};
use crate::race::{Claim, Contender, RaceSlot};
use crate::reconnect::ReopenSchedule;
use crate::subscriber::Subscriber;

/// Caller's handle to a tracked job.
///
/// Dropping the handle unwatches the job.
pub struct JobWatch {
    job_id: JobId,
    subscriber: Arc<Subscriber<JobUpdate>>,
    cancel: CancellationToken,
    state: watch::Receiver<TrackerState>,
    events: mpsc::UnboundedSender<TrackerEvent>,
}

impl JobWatch {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<TrackerState> {
        self.state.clone()
    }

    /// Resolve once the tracker reaches [`TrackerState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err means the actor is gone, which is closed as well.
        let _ = state.wait_for(|s| *s == TrackerState::Closed).await;
    }

    /// Fetch the job once now, outside the poll cadence.
    ///
    /// The answer is delivered like any other update: only if it
    /// supersedes what was last emitted. A failed refetch is logged and
    /// does not count toward the poll failure budget. No-op once closed.
    pub fn refetch(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.events.send(TrackerEvent::Refetch);
    }

    /// Stop tracking. Idempotent.
    ///
    /// When this returns the callback will not run again, even if a fetch
    /// or frame is still in flight. Safe to call from inside the callback.
    pub fn unwatch(&self) {
        if !self.subscriber.is_live() && self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!(job_id = %self.job_id, "Unwatching job");
        self.subscriber.cancel();
        self.cancel.cancel();
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Start tracking `job_id`, delivering updates to `on_update`.
///
/// Must be called from within a tokio runtime.
pub fn watch_job<F>(
    fetcher: Arc<dyn StatusFetcher>,
    transport: Arc<dyn PushTransport>,
    job_id: impl Into<JobId>,
    config: TrackerConfig,
    on_update: F,
) -> JobWatch
where
    F: FnMut(JobUpdate) + Send + 'static,
{
    let job_id = job_id.into();
    let subscriber = Arc::new(Subscriber::new(on_update));
    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(TrackerState::Idle);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let tracker = Tracker {
        job_id: job_id.clone(),
        session: TrackerSession::new(&config),
        config,
        fetcher,
        push: PushChannel::new(transport),
        subscriber: Arc::clone(&subscriber),
        cancel: cancel.clone(),
        state_tx,
        events_tx: events_tx.clone(),
    };
    tokio::spawn(tracker.run(events_rx));

    JobWatch {
        job_id,
        subscriber,
        cancel,
        state: state_rx,
        events: events_tx,
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Inbox message from a channel the actor opened.
#[derive(Debug)]
enum TrackerEvent {
    PushSnapshot {
        generation: u64,
        snapshot: JobStatusSnapshot,
    },
    PushFailed {
        generation: u64,
        error: ChannelError,
    },
    PollResult {
        generation: u64,
        result: Result<JobStatusSnapshot, FetchError>,
    },
    Refetch,
    Refetched {
        result: Result<JobStatusSnapshot, FetchError>,
    },
}

enum ActiveChannel {
    None,
    Push { generation: u64, handle: PushHandle },
    Poll { generation: u64, handle: PollHandle },
}

impl ActiveChannel {
    fn release(&self) {
        match self {
            Self::None => {}
            Self::Push { handle, .. } => handle.close(),
            Self::Poll { handle, .. } => handle.stop(),
        }
    }
}

/// Push channel reopened while polling, not yet authoritative.
struct Candidate {
    generation: u64,
    handle: PushHandle,
    race: RaceSlot,
}

struct TrackerSession {
    channel: ActiveChannel,
    candidate: Option<Candidate>,
    reopen: ReopenSchedule,
    poll_failures: u32,
    next_generation: u64,
    last: Option<JobStatusSnapshot>,
}

impl TrackerSession {
    fn new(config: &TrackerConfig) -> Self {
        Self {
            channel: ActiveChannel::None,
            candidate: None,
            reopen: ReopenSchedule::new(&config.reconnect),
            poll_failures: 0,
            next_generation: 0,
            last: None,
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn push_generation(&self) -> Option<u64> {
        match self.channel {
            ActiveChannel::Push { generation, .. } => Some(generation),
            _ => None,
        }
    }

    fn poll_generation(&self) -> Option<u64> {
        match self.channel {
            ActiveChannel::Poll { generation, .. } => Some(generation),
            _ => None,
        }
    }

    fn candidate_generation(&self) -> Option<u64> {
        self.candidate.as_ref().map(|c| c.generation)
    }

    /// A reopened push channel is still racing the poll loop.
    fn reopen_pending(&self) -> bool {
        self.candidate.as_ref().is_some_and(|c| !c.race.is_decided())
    }
}

struct Tracker {
    job_id: JobId,
    config: TrackerConfig,
    fetcher: Arc<dyn StatusFetcher>,
    push: PushChannel,
    subscriber: Arc<Subscriber<JobUpdate>>,
    cancel: CancellationToken,
    state_tx: watch::Sender<TrackerState>,
    events_tx: mpsc::UnboundedSender<TrackerEvent>,
    session: TrackerSession,
}

impl Tracker {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<TrackerEvent>) {
        if self.start().await.is_continue() {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                if self.handle(event).is_break() {
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Initial fetch and the choice of first channel.
    async fn start(&mut self) -> ControlFlow<()> {
        self.set_state(TrackerState::Loading);

        let initial = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ControlFlow::Break(()),
            result = self.fetcher.fetch(&self.job_id) => result,
        };

        match initial {
            Ok(snapshot) => {
                self.observe(snapshot)?;
                self.open_push();
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(job_id = %self.job_id, "Job not found on initial fetch");
                self.subscriber.emit(JobUpdate::Failed(e.into()));
                return ControlFlow::Break(());
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    "Initial fetch failed, starting in polling mode",
                );
                self.start_polling();
            }
        }
        ControlFlow::Continue(())
    }

    fn handle(&mut self, event: TrackerEvent) -> ControlFlow<()> {
        match event {
            TrackerEvent::PushSnapshot {
                generation,
                snapshot,
            } => {
                if self.session.push_generation() == Some(generation) {
                    self.observe(snapshot)
                } else if self.session.candidate_generation() == Some(generation) {
                    self.on_candidate_snapshot(snapshot)
                } else {
                    self.discard_stale("push snapshot", generation);
                    ControlFlow::Continue(())
                }
            }
            TrackerEvent::PushFailed { generation, error } => {
                if self.session.push_generation() == Some(generation) {
                    tracing::warn!(
                        job_id = %self.job_id,
                        generation,
                        error = %error,
                        "Push channel failed, falling back to polling",
                    );
                    self.session.channel.release();
                    self.session.channel = ActiveChannel::None;
                    self.session.reopen.rearm();
                    self.start_polling();
                } else if self.session.candidate_generation() == Some(generation) {
                    tracing::info!(
                        job_id = %self.job_id,
                        generation,
                        attempt = self.session.reopen.attempts(),
                        error = %error,
                        "Push reopen attempt failed, staying on polling",
                    );
                    self.session.candidate = None;
                    if self.session.reopen.exhausted(&self.config.reconnect) {
                        tracing::info!(
                            job_id = %self.job_id,
                            "Push reconnect budget spent, polling until the job ends",
                        );
                    }
                } else {
                    self.discard_stale("push failure", generation);
                }
                ControlFlow::Continue(())
            }
            TrackerEvent::PollResult { generation, result } => {
                if self.session.poll_generation() != Some(generation) {
                    self.discard_stale("poll result", generation);
                    return ControlFlow::Continue(());
                }
                self.on_poll_result(result)
            }
            TrackerEvent::Refetch => {
                self.spawn_refetch();
                ControlFlow::Continue(())
            }
            TrackerEvent::Refetched { result } => self.on_refetch(result),
        }
    }

    fn on_candidate_snapshot(&mut self, snapshot: JobStatusSnapshot) -> ControlFlow<()> {
        let Some(candidate) = self.session.candidate.as_mut() else {
            return ControlFlow::Continue(());
        };
        if let Claim::Lost { winner } = candidate.race.claim(Contender::Push) {
            tracing::debug!(
                job_id = %self.job_id,
                generation = candidate.generation,
                ?winner,
                "Dropping frame from a reopened push channel that lost the race",
            );
            return ControlFlow::Continue(());
        }
        let Some(candidate) = self.session.candidate.take() else {
            return ControlFlow::Continue(());
        };

        tracing::info!(
            job_id = %self.job_id,
            generation = candidate.generation,
            "Push channel restored, stopping poll loop",
        );
        self.session.channel.release();
        self.session.channel = ActiveChannel::Push {
            generation: candidate.generation,
            handle: candidate.handle,
        };
        self.session.poll_failures = 0;
        self.set_state(TrackerState::PushActive);
        self.observe(snapshot)
    }

    fn on_poll_result(
        &mut self,
        result: Result<JobStatusSnapshot, FetchError>,
    ) -> ControlFlow<()> {
        match result {
            Ok(snapshot) => {
                self.session.poll_failures = 0;
                // The losing candidate stays until the next reopen replaces
                // it, so its late frames still meet the decided slot.
                if let Some(candidate) = self.session.candidate.as_mut() {
                    if !candidate.race.is_decided()
                        && candidate.race.claim(Contender::Poll) == Claim::Won
                    {
                        tracing::debug!(
                            job_id = %self.job_id,
                            generation = candidate.generation,
                            "Poll answered first, releasing reopened push channel",
                        );
                        candidate.handle.close();
                    }
                }
                self.observe(snapshot)?;
            }
            Err(e) => {
                self.session.poll_failures += 1;
                let failures = self.session.poll_failures;
                tracing::warn!(
                    job_id = %self.job_id,
                    failures,
                    error = %e,
                    "Poll fetch failed",
                );
                if failures >= self.config.max_poll_failures {
                    tracing::warn!(job_id = %self.job_id, failures, "Giving up on job");
                    self.subscriber.emit(JobUpdate::Failed(WatchError::GaveUp {
                        job_id: self.job_id.clone(),
                        attempts: failures,
                    }));
                    return ControlFlow::Break(());
                }
            }
        }

        if !self.session.reopen_pending() && self.session.reopen.tick(&self.config.reconnect) {
            self.reopen_push();
        }
        ControlFlow::Continue(())
    }

    fn on_refetch(&mut self, result: Result<JobStatusSnapshot, FetchError>) -> ControlFlow<()> {
        match result {
            Ok(snapshot) => self.observe(snapshot),
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Refetch failed");
                ControlFlow::Continue(())
            }
        }
    }

    /// Emit `snapshot` if it supersedes the last emission.
    ///
    /// Breaks when the snapshot is terminal; all channels are torn down
    /// before the terminal update is delivered.
    fn observe(&mut self, snapshot: JobStatusSnapshot) -> ControlFlow<()> {
        let accept = match &self.session.last {
            None => true,
            Some(prev) => snapshot.supersedes(prev),
        };
        if !accept {
            tracing::debug!(
                job_id = %self.job_id,
                status = %snapshot.status,
                progress = snapshot.progress,
                "Dropping stale or unchanged snapshot",
            );
            return ControlFlow::Continue(());
        }

        let terminal = snapshot.is_terminal();
        if terminal {
            self.release_channels();
        }
        self.session.last = Some(snapshot.clone());
        self.subscriber.emit(JobUpdate::Snapshot(snapshot));

        if terminal {
            tracing::info!(job_id = %self.job_id, "Job reached a terminal status");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn open_push(&mut self) {
        let (generation, handle) = self.spawn_push();
        tracing::info!(job_id = %self.job_id, generation, "Tracking job over push channel");
        self.session.channel = ActiveChannel::Push { generation, handle };
        self.set_state(TrackerState::PushActive);
    }

    fn reopen_push(&mut self) {
        self.session.reopen.attempted(&self.config.reconnect);
        let (generation, handle) = self.spawn_push();
        tracing::info!(
            job_id = %self.job_id,
            generation,
            attempt = self.session.reopen.attempts(),
            "Reopening push channel alongside polling",
        );
        self.session.candidate = Some(Candidate {
            generation,
            handle,
            race: RaceSlot::new(),
        });
    }

    fn spawn_push(&mut self) -> (u64, PushHandle) {
        let generation = self.session.bump_generation();
        let snapshots = self.events_tx.clone();
        let failures = self.events_tx.clone();

        let handle = self.push.open_scoped(
            &self.cancel,
            self.job_id.clone(),
            move |snapshot| {
                let _ = snapshots.send(TrackerEvent::PushSnapshot {
                    generation,
                    snapshot,
                });
            },
            move |error| {
                let _ = failures.send(TrackerEvent::PushFailed { generation, error });
            },
        );
        (generation, handle)
    }

    /// One fetch outside the poll cadence. The answer goes through
    /// [`Self::observe`] like any other snapshot.
    fn spawn_refetch(&self) {
        let fetcher = Arc::clone(&self.fetcher);
        let job_id = self.job_id.clone();
        let events = self.events_tx.clone();
        let cancel = self.cancel.child_token();

        tracing::debug!(job_id = %self.job_id, "Refetching job status");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = fetcher.fetch(&job_id) => {
                    let _ = events.send(TrackerEvent::Refetched { result });
                }
            }
        });
    }

    fn start_polling(&mut self) {
        let generation = self.session.bump_generation();
        let fetcher = Arc::clone(&self.fetcher);
        let job_id = self.job_id.clone();
        let events = self.events_tx.clone();

        let handle = PollLoop::start_scoped(&self.cancel, self.config.poll_interval, move || {
            let fetcher = Arc::clone(&fetcher);
            let job_id = job_id.clone();
            let events = events.clone();
            async move {
                tracing::debug!(job_id = %job_id, generation, "Poll tick");
                let result = fetcher.fetch(&job_id).await;
                let _ = events.send(TrackerEvent::PollResult { generation, result });
            }
        });

        tracing::info!(
            job_id = %self.job_id,
            generation,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Tracking job by polling",
        );
        self.session.channel = ActiveChannel::Poll { generation, handle };
        self.set_state(TrackerState::PollActive);
    }

    fn discard_stale(&self, what: &'static str, generation: u64) {
        tracing::debug!(job_id = %self.job_id, generation, what, "Discarding event from a replaced channel");
    }

    fn release_channels(&mut self) {
        self.session.channel.release();
        self.session.channel = ActiveChannel::None;
        if let Some(candidate) = self.session.candidate.take() {
            candidate.handle.close();
        }
    }

    fn set_state(&self, state: TrackerState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(job_id = %self.job_id, from = ?current, to = ?state, "Tracker state change");
            *current = state;
            true
        });
    }

    fn shutdown(&mut self) {
        self.release_channels();
        self.cancel.cancel();
        self.set_state(TrackerState::Closed);
        tracing::info!(job_id = %self.job_id, "Tracker closed");
    }
}
