//! Live queue status over the server push stream.
//!
//! [`StreamSession`] holds the connection bookkeeping and decides what to do
//! next; [`EventStreamClient`] owns the transport and runs those decisions on
//! a background task, publishing a [`LiveSnapshot`] through a watch channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use pulseboard_core::stream_protocol::{SseFrameDecoder, StreamMessage};
use pulseboard_core::QueueStatus;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("stream closed by server")]
    Closed,
}

pub type PushByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Opens one push connection and yields its raw body chunks.
pub trait PushTransport: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<PushByteStream, TransportError>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub connection: ConnectionState,
    pub last_event_at: Option<DateTime<Utc>>,
    pub queue_status: Option<QueueStatus>,
    pub last_error: Option<String>,
}

impl LiveSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn connection_label(&self) -> &'static str {
        match self.connection {
            ConnectionState::Connected => "Connected",
            _ if self.last_event_at.is_some() => "Reconnecting...",
            ConnectionState::Reconnecting => "Reconnecting...",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Connect,
    ScheduleReconnect(Duration),
    Idle,
}

#[derive(Debug)]
pub struct StreamSession {
    snapshot: LiveSnapshot,
    reconnect_delay: Duration,
    ever_connected: bool,
    reconnect_pending: bool,
    closed: bool,
    connect_attempts: u64,
}

impl StreamSession {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            snapshot: LiveSnapshot::default(),
            reconnect_delay,
            ever_connected: false,
            reconnect_pending: false,
            closed: false,
            connect_attempts: 0,
        }
    }

    pub fn snapshot(&self) -> &LiveSnapshot {
        &self.snapshot
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    pub fn start(&mut self) -> SessionAction {
        if self.closed {
            return SessionAction::Idle;
        }
        self.snapshot.connection = ConnectionState::Connecting;
        self.connect_attempts += 1;
        SessionAction::Connect
    }

    pub fn on_open(&mut self) {
        if self.closed {
            return;
        }
        self.snapshot.connection = ConnectionState::Connected;
        self.snapshot.last_error = None;
        self.ever_connected = true;
    }

    /// Applies one inbound message in receive order. A fatal error only
    /// marks the session disconnected; the connection stays open and the
    /// next pushed message restores it.
    pub fn apply_message(&mut self, message: StreamMessage, received_at: DateTime<Utc>) {
        if self.closed {
            return;
        }
        match message {
            StreamMessage::InitialStatus(payload) | StreamMessage::QueueUpdate(payload) => {
                if payload.is_complete() {
                    match payload.queue_status() {
                        Some(status) => self.snapshot.queue_status = Some(status),
                        None => warn!("stream_status_rejected: non-finite retry ratio"),
                    }
                }
                self.mark_event(received_at);
            }
            StreamMessage::Heartbeat(_) => self.mark_event(received_at),
            StreamMessage::Error(payload) => {
                warn!("stream_server_error: {}", payload.message_or_default());
            }
            StreamMessage::FatalError(payload) => {
                let message = payload.message_or_default().to_string();
                warn!("stream_fatal_error: {message}");
                self.snapshot.connection = ConnectionState::Disconnected;
                self.snapshot.last_error = Some(message);
            }
        }
    }

    fn mark_event(&mut self, received_at: DateTime<Utc>) {
        self.snapshot.connection = ConnectionState::Connected;
        self.snapshot.last_event_at = Some(received_at);
        self.snapshot.last_error = None;
        self.ever_connected = true;
    }

    /// Records a transport failure. At most one reconnect is ever pending.
    pub fn on_transport_error(&mut self, err: &TransportError) -> SessionAction {
        if self.closed {
            return SessionAction::Idle;
        }
        self.snapshot.connection = if self.ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
        self.snapshot.last_error = Some(err.to_string());
        if self.reconnect_pending {
            debug!("stream_reconnect_already_pending");
            return SessionAction::Idle;
        }
        self.reconnect_pending = true;
        SessionAction::ScheduleReconnect(self.reconnect_delay)
    }

    /// Runs when the reconnect delay has elapsed. The attempt is skipped if
    /// the previous connection has not been fully released.
    pub fn on_reconnect_due(&mut self, previous_closed: bool) -> SessionAction {
        self.reconnect_pending = false;
        if self.closed {
            return SessionAction::Idle;
        }
        if !previous_closed {
            debug!("stream_reconnect_skipped: previous connection still open");
            return SessionAction::Idle;
        }
        if !self.ever_connected {
            self.snapshot.connection = ConnectionState::Connecting;
        }
        self.connect_attempts += 1;
        SessionAction::Connect
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.reconnect_pending = false;
        self.snapshot.connection = ConnectionState::Disconnected;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Owns the single push connection of a dashboard session.
pub struct EventStreamClient<T: PushTransport> {
    transport: Arc<T>,
    reconnect_delay: Duration,
    snapshot_tx: Arc<watch::Sender<LiveSnapshot>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl<T: PushTransport> EventStreamClient<T> {
    pub fn new(transport: Arc<T>, reconnect_delay: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(LiveSnapshot::default());
        Self {
            transport,
            reconnect_delay,
            snapshot_tx: Arc::new(snapshot_tx),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Starts the connection task. Calling it again while running is a no-op.
    pub fn connect(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = StreamSession::new(self.reconnect_delay);
        self.task = Some(tokio::spawn(run_stream(
            Arc::clone(&self.transport),
            session,
            Arc::clone(&self.snapshot_tx),
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Closes the connection and cancels any pending reconnect.
    pub async fn close(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("stream_task_join_error: {err}");
            }
        }
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.connection = ConnectionState::Disconnected;
        });
    }
}

impl<T: PushTransport> Drop for EventStreamClient<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum PumpExit {
    Shutdown,
    Failed(TransportError),
}

async fn run_stream<T: PushTransport>(
    transport: Arc<T>,
    mut session: StreamSession,
    snapshot_tx: Arc<watch::Sender<LiveSnapshot>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut action = session.start();
    let mut previous_closed = true;

    loop {
        publish(&snapshot_tx, &session);
        match action {
            SessionAction::Connect => {
                let connected = tokio::select! {
                    result = transport.connect() => result,
                    _ = shutdown.changed() => break,
                };
                let mut stream = match connected {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("stream_connect_error: {err}");
                        action = session.on_transport_error(&err);
                        continue;
                    }
                };
                info!("stream_connected: attempt={}", session.connect_attempts());
                previous_closed = false;
                session.on_open();
                publish(&snapshot_tx, &session);

                let exit = pump(&mut stream, &mut session, &snapshot_tx, &mut shutdown).await;
                drop(stream);
                previous_closed = true;
                match exit {
                    PumpExit::Shutdown => break,
                    PumpExit::Failed(err) => {
                        warn!("stream_transport_error: {err}");
                        action = session.on_transport_error(&err);
                    }
                }
            }
            SessionAction::ScheduleReconnect(delay) => {
                debug!("stream_reconnect_scheduled: delay_ms={}", delay.as_millis());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
                action = session.on_reconnect_due(previous_closed);
            }
            SessionAction::Idle => {
                let _ = shutdown.changed().await;
                break;
            }
        }
    }

    session.close();
    publish(&snapshot_tx, &session);
    info!("stream_closed");
}

async fn pump(
    stream: &mut PushByteStream,
    session: &mut StreamSession,
    snapshot_tx: &watch::Sender<LiveSnapshot>,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    let mut decoder = SseFrameDecoder::<StreamMessage>::default();
    loop {
        tokio::select! {
            chunk = stream.next() => {
                let (report, exit) = match chunk {
                    Some(Ok(bytes)) => (decoder.push_chunk(&bytes), None),
                    Some(Err(err)) => (decoder.finish(), Some(err)),
                    None => (decoder.finish(), Some(TransportError::Closed)),
                };
                for err in report.errors {
                    warn!("stream_decode_error: {err}");
                }
                for message in report.frames {
                    debug!("stream_message: {}", message.kind());
                    session.apply_message(message, Utc::now());
                }
                publish(snapshot_tx, session);
                if let Some(err) = exit {
                    return PumpExit::Failed(err);
                }
            }
            _ = shutdown.changed() => return PumpExit::Shutdown,
        }
    }
}

fn publish(snapshot_tx: &watch::Sender<LiveSnapshot>, session: &StreamSession) {
    let next = session.snapshot();
    snapshot_tx.send_if_modified(|current| {
        if current == next {
            return false;
        }
        *current = next.clone();
        true
    });
}
