//! Scheduled fetch loops publishing immutable snapshots.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulseboard_client::ClientError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One kind of remote data a poller can fetch.
pub trait MetricsSource: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultOrdering {
    /// The most recently completed fetch wins.
    #[default]
    Completion,
    /// Results older than the one on display are dropped.
    Sequenced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub ordering: ResultOrdering,
}

impl PollerConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            ordering: ResultOrdering::Completion,
        }
    }

    pub fn sequenced(mut self) -> Self {
        self.ordering = ResultOrdering::Sequenced;
        self
    }
}

#[derive(Debug)]
pub struct PollSnapshot<T> {
    pub data: Option<Arc<T>>,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub loading: bool,
    pub applied_seq: u64,
}

impl<T> Clone for PollSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            last_error: self.last_error.clone(),
            last_updated: self.last_updated,
            loading: self.loading,
            applied_seq: self.applied_seq,
        }
    }
}

impl<T> Default for PollSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            last_error: None,
            last_updated: None,
            loading: true,
            applied_seq: 0,
        }
    }
}

impl<T> PollSnapshot<T> {
    /// True only before anything has been shown; later refreshes keep the
    /// previous data on screen.
    pub fn is_initial_load(&self) -> bool {
        self.loading && self.data.is_none()
    }
}

struct PollerShared<S: MetricsSource> {
    source: S,
    ordering: ResultOrdering,
    state: watch::Sender<PollSnapshot<S::Output>>,
    stopped: AtomicBool,
    epoch: AtomicU64,
    next_seq: AtomicU64,
}

impl<S: MetricsSource> PollerShared<S> {
    fn publish(&self, epoch: u64, seq: u64, result: Result<S::Output, ClientError>) {
        let name = self.source.name();
        if self.stopped.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("poll_result_discarded: source={name} seq={seq} reason=stopped");
            return;
        }
        let ordering = self.ordering;
        self.state.send_if_modified(|snapshot| {
            if ordering == ResultOrdering::Sequenced && seq < snapshot.applied_seq {
                debug!(
                    "poll_result_discarded: source={name} seq={seq} applied={} reason=stale",
                    snapshot.applied_seq
                );
                return false;
            }
            snapshot.loading = false;
            match result {
                Ok(data) => {
                    snapshot.data = Some(Arc::new(data));
                    snapshot.last_error = None;
                    snapshot.last_updated = Some(Utc::now());
                    snapshot.applied_seq = seq;
                }
                Err(err) => {
                    warn!("poll_fetch_error: source={name} seq={seq} error={err}");
                    snapshot.last_error = Some(err.to_string());
                }
            }
            true
        });
    }
}

fn spawn_fetch<S: MetricsSource>(shared: &Arc<PollerShared<S>>) {
    let shared = Arc::clone(shared);
    let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let epoch = shared.epoch.load(Ordering::SeqCst);
    tokio::spawn(async move {
        let result = shared.source.fetch().await;
        shared.publish(epoch, seq, result);
    });
}

/// Repeatedly fetches one [`MetricsSource`]: once on start, then every
/// interval. Each fetch runs on its own task, so a slow request never delays
/// the schedule.
pub struct MetricsPoller<S: MetricsSource> {
    shared: Arc<PollerShared<S>>,
    interval: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl<S: MetricsSource> MetricsPoller<S> {
    pub fn new(source: S, config: PollerConfig) -> Self {
        let (state, _) = watch::channel(PollSnapshot::default());
        Self {
            shared: Arc::new(PollerShared {
                source,
                ordering: config.ordering,
                state,
                stopped: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                next_seq: AtomicU64::new(0),
            }),
            interval: config.interval.max(MIN_POLL_INTERVAL),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.source.name()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot<S::Output>> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot<S::Output> {
        self.shared.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.stopped.store(false, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.task = Some(tokio::spawn(run_poller(
            Arc::clone(&self.shared),
            self.interval,
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
        debug!("poller_started: source={} interval_ms={}", self.name(), self.interval.as_millis());
    }

    /// Out-of-band fetch; the regular schedule is left untouched.
    pub fn refresh(&self) {
        if self.task.is_none() {
            return;
        }
        spawn_fetch(&self.shared);
    }

    /// Stops the schedule. Fetches still in flight are dropped when they land.
    pub async fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("poller_join_error: source={} error={err}", self.name());
            }
        }
        debug!("poller_stopped: source={}", self.name());
    }
}

impl<S: MetricsSource> Drop for MetricsPoller<S> {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_poller<S: MetricsSource>(
    shared: Arc<PollerShared<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => spawn_fetch(&shared),
            _ = shutdown.changed() => break,
        }
    }
}
