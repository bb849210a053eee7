//! Scripted fakes for tracker and aggregator tests.
//!
//! [`ScriptedFetcher`] answers each job's fetches from a per-job queue of
//! [`Reply`]s, repeating the last one once the queue runs dry.
//! [`FakeTransport`] hands out in-memory push connections the test drives
//! frame by frame through [`FakeConnection`].

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::StreamExt;
use jobwatch_client::{ChannelError, FetchError, Frame, FrameStream, PushTransport, StatusFetcher};
use jobwatch_core::snapshot::{JobStatus, JobStatusSnapshot};
use jobwatch_core::types::JobId;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly tracing subscriber (once per binary).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch_tracker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn snap(job_id: &str, status: JobStatus, progress: u8) -> JobStatusSnapshot {
    JobStatusSnapshot::new(job_id, status).with_progress(progress)
}

/// Collect callback deliveries into a channel the test can await.
pub fn collector<T: Send + 'static>() -> (impl FnMut(T) + Send + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |value| {
            let _ = tx.send(value);
        },
        rx,
    )
}

/// Await the next delivery, failing the test if none arrives in time.
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for an update")
        .expect("update channel closed")
}

// ---------------------------------------------------------------------------
// Status fetcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Reply {
    Snapshot(JobStatusSnapshot),
    /// Answer after a delay.
    Slow(Duration, JobStatusSnapshot),
    /// Run `hook` just before answering.
    Then(JobStatusSnapshot, Arc<dyn Fn() + Send + Sync>),
    NotFound,
    /// A 503 from the jobs API.
    Unavailable,
}

#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<JobId, VecDeque<Reply>>>,
    calls: Mutex<HashMap<JobId, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append replies to `job_id`'s queue.
    pub fn script(&self, job_id: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .extend(replies);
    }

    /// Drop whatever is queued for `job_id` and answer `reply` from now on.
    pub fn set(&self, job_id: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), VecDeque::from([reply]));
    }

    pub fn calls(&self, job_id: &str) -> usize {
        self.calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    fn next_reply(&self, job_id: &str) -> Reply {
        *self.calls.lock().unwrap().entry(job_id.to_string()).or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::NotFound),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::NotFound),
            None => Reply::NotFound,
        }
    }
}

#[async_trait]
impl StatusFetcher for ScriptedFetcher {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusSnapshot, FetchError> {
        match self.next_reply(job_id) {
            Reply::Snapshot(snapshot) => Ok(snapshot),
            Reply::Slow(delay, snapshot) => {
                tokio::time::sleep(delay).await;
                Ok(snapshot)
            }
            Reply::Then(snapshot, hook) => {
                hook();
                Ok(snapshot)
            }
            Reply::NotFound => Err(FetchError::NotFound(job_id.clone())),
            Reply::Unavailable => Err(FetchError::Api {
                status: 503,
                body: "service unavailable".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

/// Server end of one in-memory push connection.
#[derive(Clone)]
pub struct FakeConnection {
    frames: frames::UnboundedSender<Result<Frame, ChannelError>>,
}

impl FakeConnection {
    /// Send a backend-shaped JSON frame for `snapshot`.
    pub fn send(&self, snapshot: &JobStatusSnapshot) {
        let text = format!(
            r#"{{"id":"{}","status":"{}","progress":{}}}"#,
            snapshot.job_id, snapshot.status, snapshot.progress
        );
        self.send_text(text);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.frames.unbounded_send(Ok(Frame::Text(text.into())));
    }

    /// End the stream without a close frame.
    pub fn drop_abruptly(&self) {
        self.frames.close_channel();
    }

    /// Whether the client side has gone away.
    pub fn is_released(&self) -> bool {
        self.frames.is_closed()
    }
}

pub struct FakeTransport {
    refuse: AtomicBool,
    connections: Mutex<Vec<FakeConnection>>,
    attempts: watch::Sender<usize>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refuse: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
            attempts: watch::channel(0).0,
        })
    }

    /// Make every later connect attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    /// Wait until at least `n` connects have been attempted.
    pub async fn wait_for_attempts(&self, n: usize) {
        let mut attempts = self.attempts.subscribe();
        tokio::time::timeout(Duration::from_secs(600), attempts.wait_for(|&a| a >= n))
            .await
            .expect("timed out waiting for a push connect")
            .expect("transport dropped");
    }

    /// The `index`-th accepted connection (zero-based).
    pub fn connection(&self, index: usize) -> FakeConnection {
        self.connections.lock().unwrap()[index].clone()
    }

    /// Wait for the `index`-th accepted connection.
    pub async fn accepted(&self, index: usize) -> FakeConnection {
        let mut attempts = self.attempts.subscribe();
        loop {
            if let Some(conn) = self.connections.lock().unwrap().get(index).cloned() {
                return conn;
            }
            tokio::time::timeout(Duration::from_secs(600), attempts.changed())
                .await
                .expect("timed out waiting for a push connection")
                .expect("transport dropped");
        }
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, _job_id: &JobId) -> Result<FrameStream, ChannelError> {
        let result = if self.refuse.load(Ordering::SeqCst) {
            Err(ChannelError::Connection("connection refused".into()))
        } else {
            let (tx, rx) = frames::unbounded();
            self.connections.lock().unwrap().push(FakeConnection { frames: tx });
            Ok(rx.boxed())
        };
        self.attempts.send_modify(|n| *n += 1);
        result
    }
}
