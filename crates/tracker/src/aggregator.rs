//! Multi-job aggregator.
//!
//! One shared poll loop refreshes a whole set of jobs. Each round fetches
//! every watched job that has not reached a terminal status, concurrently;
//! a failing job only marks its own entry. When every entry is terminal
//! the aggregator stops issuing requests until a new job is added.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use jobwatch_client::{FetchError, StatusFetcher};
use jobwatch_core::error::WatchError;
use jobwatch_core::snapshot::JobStatusSnapshot;
use jobwatch_core::types::JobId;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::AggregatorConfig;
use crate::poll::PollLoop;
use crate::subscriber::Subscriber;

/// Latest known state of one watched job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableEntry {
    /// Most recent accepted snapshot; `None` until the first good fetch.
    pub snapshot: Option<JobStatusSnapshot>,
    /// Error from the latest round, cleared by the next successful fetch.
    pub last_error: Option<String>,
}

impl TableEntry {
    pub fn is_terminal(&self) -> bool {
        self.snapshot.as_ref().is_some_and(JobStatusSnapshot::is_terminal)
    }
}

/// Watched job ids and what is known about each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatorTable {
    entries: HashMap<JobId, TableEntry>,
}

impl AggregatorTable {
    pub fn get(&self, job_id: &str) -> Option<&TableEntry> {
        self.entries.get(job_id)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<&JobStatusSnapshot> {
        self.entries.get(job_id).and_then(|e| e.snapshot.as_ref())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &TableEntry)> {
        self.entries.iter()
    }

    /// True when there is at least one entry and every entry is terminal.
    pub fn all_terminal(&self) -> bool {
        !self.entries.is_empty() && self.entries.values().all(TableEntry::is_terminal)
    }

    /// Ids the next round should fetch.
    fn due(&self) -> Vec<JobId> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Caller's handle to an aggregator.
///
/// Dropping the handle stops the aggregator.
pub struct JobsWatch {
    commands: mpsc::UnboundedSender<Command>,
    table: watch::Receiver<AggregatorTable>,
    subscriber: Arc<Subscriber<AggregatorTable>>,
    cancel: CancellationToken,
}

impl JobsWatch {
    /// Replace the watched set. Entries for ids that stay are kept.
    pub fn set_jobs<I, S>(&self, job_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<JobId>,
    {
        let ids = job_ids.into_iter().map(Into::into).collect();
        self.send(Command::SetJobs(ids));
    }

    pub fn add(&self, job_id: impl Into<JobId>) {
        self.send(Command::Add(job_id.into()));
    }

    pub fn remove(&self, job_id: impl Into<JobId>) {
        self.send(Command::Remove(job_id.into()));
    }

    /// Fetch every non-terminal job now, outside the tick cadence.
    ///
    /// Skipped while a round is already in flight.
    pub fn refetch(&self) {
        self.send(Command::Refetch);
    }

    /// Copy of the current table.
    pub fn table(&self) -> AggregatorTable {
        self.table.borrow().clone()
    }

    /// Receiver notified whenever the table changes.
    pub fn table_changes(&self) -> watch::Receiver<AggregatorTable> {
        self.table.clone()
    }

    /// Stop polling and all callbacks. Idempotent.
    pub fn unwatch_all(&self) {
        if !self.subscriber.is_live() && self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!("Unwatching all jobs");
        self.subscriber.cancel();
        self.cancel.cancel();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Aggregator already stopped, ignoring command");
        }
    }
}

impl Drop for JobsWatch {
    fn drop(&mut self) {
        self.unwatch_all();
    }
}

/// Start watching `job_ids`, calling `on_update` whenever the table changes.
///
/// The first round runs immediately. Must be called from within a tokio
/// runtime.
pub fn watch_jobs<I, S, F>(
    fetcher: Arc<dyn StatusFetcher>,
    job_ids: I,
    config: AggregatorConfig,
    on_update: F,
) -> JobsWatch
where
    I: IntoIterator<Item = S>,
    S: Into<JobId>,
    F: FnMut(AggregatorTable) + Send + 'static,
{
    let subscriber = Arc::new(Subscriber::new(on_update));
    let cancel = CancellationToken::new();
    let (table_tx, table_rx) = watch::channel(AggregatorTable::default());
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let initial: Vec<JobId> = job_ids.into_iter().map(Into::into).collect();
    // Queued before the actor starts, so it is the first thing applied.
    let _ = commands_tx.send(Command::SetJobs(initial));

    let aggregator = Aggregator {
        fetcher,
        config,
        subscriber: Arc::clone(&subscriber),
        cancel: cancel.clone(),
        table_tx,
        events_tx,
        table: AggregatorTable::default(),
        epochs: HashMap::new(),
        next_epoch: 0,
        round_in_flight: false,
        paused: false,
    };
    tokio::spawn(aggregator.run(commands_rx, events_rx));

    JobsWatch {
        commands: commands_tx,
        table: table_rx,
        subscriber,
        cancel,
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    SetJobs(Vec<JobId>),
    Add(JobId),
    Remove(JobId),
    Refetch,
}

/// One fetched job, tagged with the epoch its entry had when requested.
type RoundResult = (JobId, u64, Result<JobStatusSnapshot, FetchError>);

#[derive(Debug)]
enum AggregatorEvent {
    Tick,
    RoundDone(Vec<RoundResult>),
}

struct Aggregator {
    fetcher: Arc<dyn StatusFetcher>,
    config: AggregatorConfig,
    subscriber: Arc<Subscriber<AggregatorTable>>,
    cancel: CancellationToken,
    table_tx: watch::Sender<AggregatorTable>,
    events_tx: mpsc::UnboundedSender<AggregatorEvent>,
    table: AggregatorTable,
    /// Bumped every time an id (re-)enters the set.
    epochs: HashMap<JobId, u64>,
    next_epoch: u64,
    round_in_flight: bool,
    paused: bool,
}

impl Aggregator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<AggregatorEvent>,
    ) {
        let ticks = self.events_tx.clone();
        let _poll = PollLoop::start_scoped(&self.cancel, self.config.interval, move || {
            let ticks = ticks.clone();
            async move {
                let _ = ticks.send(AggregatorEvent::Tick);
            }
        });

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Aggregator started",
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(event) = events.recv() => match event {
                    AggregatorEvent::Tick => self.on_tick(),
                    AggregatorEvent::RoundDone(results) => self.on_round_done(results),
                },
            }
        }

        self.cancel.cancel();
        tracing::info!(jobs = self.table.len(), "Aggregator stopped");
    }

    fn apply(&mut self, command: Command) {
        let mut added = false;
        let mut changed = false;

        match command {
            Command::SetJobs(ids) => {
                let wanted: HashSet<JobId> = ids.into_iter().collect();
                let gone: Vec<JobId> = self
                    .table
                    .entries
                    .keys()
                    .filter(|id| !wanted.contains(*id))
                    .cloned()
                    .collect();
                for id in gone {
                    changed |= self.remove_entry(&id);
                }
                for id in wanted {
                    added |= self.insert_entry(id);
                }
            }
            Command::Add(id) => added = self.insert_entry(id),
            Command::Remove(id) => changed = self.remove_entry(&id),
            Command::Refetch => {
                if self.round_in_flight {
                    tracing::debug!("Round already in flight, skipping refetch");
                } else {
                    self.start_round();
                }
                return;
            }
        }

        if added || changed {
            self.publish();
        }
        if added {
            if self.paused {
                tracing::info!("New job added, resuming polling");
                self.paused = false;
            }
            if !self.round_in_flight {
                self.start_round();
            }
        }
    }

    fn insert_entry(&mut self, job_id: JobId) -> bool {
        if self.table.entries.contains_key(&job_id) {
            return false;
        }
        self.next_epoch += 1;
        tracing::info!(job_id = %job_id, epoch = self.next_epoch, "Watching job");
        self.epochs.insert(job_id.clone(), self.next_epoch);
        self.table.entries.insert(job_id, TableEntry::default());
        true
    }

    fn remove_entry(&mut self, job_id: &str) -> bool {
        self.epochs.remove(job_id);
        let removed = self.table.entries.remove(job_id).is_some();
        if removed {
            tracing::info!(job_id = %job_id, "Stopped watching job");
        }
        removed
    }

    fn on_tick(&mut self) {
        if self.round_in_flight {
            tracing::debug!("Previous round still in flight, skipping tick");
            return;
        }
        if self.table.due().is_empty() {
            if !self.paused && !self.table.is_empty() {
                tracing::info!("All watched jobs are terminal, pausing polling");
            }
            self.paused = !self.table.is_empty();
            return;
        }
        self.start_round();
    }

    fn start_round(&mut self) {
        let requests: Vec<(JobId, u64)> = self
            .table
            .due()
            .into_iter()
            .filter_map(|id| self.epochs.get(&id).map(|&epoch| (id, epoch)))
            .collect();
        if requests.is_empty() {
            return;
        }

        tracing::debug!(jobs = requests.len(), "Starting fetch round");
        self.round_in_flight = true;

        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events_tx.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let round = join_all(requests.into_iter().map(|(job_id, epoch)| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let result = fetcher.fetch(&job_id).await;
                    (job_id, epoch, result)
                }
            }));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                results = round => {
                    let _ = events.send(AggregatorEvent::RoundDone(results));
                }
            }
        });
    }

    fn on_round_done(&mut self, results: Vec<RoundResult>) {
        self.round_in_flight = false;
        let mut changed = false;

        for (job_id, epoch, result) in results {
            if self.epochs.get(&job_id) != Some(&epoch) {
                tracing::debug!(job_id = %job_id, epoch, "Dropping result for a job no longer watched");
                continue;
            }
            let Some(entry) = self.table.entries.get_mut(&job_id) else {
                continue;
            };
            if entry.is_terminal() {
                continue;
            }

            match result {
                Ok(snapshot) => {
                    let accept = entry
                        .snapshot
                        .as_ref()
                        .map_or(true, |prev| snapshot.supersedes(prev));
                    if accept {
                        entry.snapshot = Some(snapshot);
                        changed = true;
                    }
                    if entry.last_error.take().is_some() {
                        changed = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Job status fetch failed, keeping last known state",
                    );
                    let message = WatchError::from(e).to_string();
                    if entry.last_error.as_deref() != Some(message.as_str()) {
                        entry.last_error = Some(message);
                        changed = true;
                    }
                }
            }
        }

        if changed {
            self.publish();
        }
    }

    fn publish(&self) {
        self.table_tx.send_replace(self.table.clone());
        self.subscriber.emit(self.table.clone());
    }
}
