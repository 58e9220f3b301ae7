use std::sync::Arc;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use pulseboard_client::{ApiClient, ClientError};
use pulseboard_core::health::ProviderStatus;
use pulseboard_core::query::FilterChange;
use pulseboard_core::{TaskDetail, TaskListPage, TaskSummary};
use pulseboard_monitor::config::Config;
use pulseboard_monitor::detail::{
    DeleteDialog, DeleteOutcome, ExpandOutcome, ExpandRequest, PendingDelete, PendingDetail,
    TaskDetailCache,
};
use pulseboard_monitor::event_stream::{EventStreamClient, LiveSnapshot};
use pulseboard_monitor::poller::{MetricsPoller, PollerConfig};
use pulseboard_monitor::sources::{
    BackpressureSource, LatencySource, ProviderStatusSource, ThroughputSource, WorkerHealthSource,
};
use pulseboard_monitor::tasks::{PendingQuery, QueryOutcome, TaskQueryController};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Dashboard,
    Tasks,
}

impl View {
    pub fn title(&self) -> &'static str {
        match self {
            View::Dashboard => "Dashboard",
            View::Tasks => "Task History",
        }
    }

    fn toggle(self) -> Self {
        match self {
            View::Dashboard => View::Tasks,
            View::Tasks => View::Dashboard,
        }
    }
}

/// Result of a request that ran off the event loop.
pub enum Completion {
    TaskPage {
        ticket: u64,
        result: Result<TaskListPage, ClientError>,
    },
    Detail {
        task_id: String,
        result: Result<TaskDetail, ClientError>,
    },
    Delete {
        task_id: String,
        result: Result<(), ClientError>,
    },
}

pub struct App {
    pub config: Config,
    pub view: View,
    pub help_open: bool,
    pub status_note: Option<String>,
    pub selected: usize,
    pub search_draft: Option<String>,
    live: watch::Receiver<LiveSnapshot>,
    stream: EventStreamClient<ApiClient>,
    pub throughput: MetricsPoller<ThroughputSource>,
    pub latency: MetricsPoller<LatencySource>,
    pub backpressure: MetricsPoller<BackpressureSource>,
    pub workers: MetricsPoller<WorkerHealthSource>,
    pub provider: MetricsPoller<ProviderStatusSource>,
    pub tasks: TaskQueryController<ApiClient>,
    pub details: TaskDetailCache<ApiClient>,
    pub delete_dialog: DeleteDialog,
    requests: JoinSet<Completion>,
}

impl App {
    pub fn new(config: Config, client: Arc<ApiClient>) -> Self {
        let minutes = config.metrics_minutes;
        let intervals = config.intervals.clone();
        let stream = EventStreamClient::new(Arc::clone(&client), config.reconnect_delay);
        let live = stream.subscribe();
        Self {
            view: View::Dashboard,
            help_open: false,
            status_note: None,
            selected: 0,
            search_draft: None,
            live,
            stream,
            throughput: MetricsPoller::new(
                ThroughputSource::new(Arc::clone(&client), minutes),
                PollerConfig::every(intervals.throughput),
            ),
            latency: MetricsPoller::new(
                LatencySource::new(Arc::clone(&client), minutes),
                PollerConfig::every(intervals.latency),
            ),
            backpressure: MetricsPoller::new(
                BackpressureSource::new(Arc::clone(&client), minutes),
                PollerConfig::every(intervals.backpressure),
            ),
            workers: MetricsPoller::new(
                WorkerHealthSource::new(Arc::clone(&client)),
                PollerConfig::every(intervals.workers),
            ),
            provider: MetricsPoller::new(
                ProviderStatusSource::new(Arc::clone(&client)),
                PollerConfig::every(intervals.provider),
            ),
            tasks: TaskQueryController::new(Arc::clone(&client), config.view_url.clone()),
            details: TaskDetailCache::new(client),
            delete_dialog: DeleteDialog::default(),
            requests: JoinSet::new(),
            config,
        }
    }

    /// Opens the push stream, starts the always-on pollers and requests the
    /// first history page. Worker health follows the connection state.
    pub fn start(&mut self) {
        self.stream.connect();
        self.throughput.start();
        self.latency.start();
        self.backpressure.start();
        self.provider.start();
        let pending = self.tasks.begin_query();
        self.spawn_query(pending);
        info!("dashboard_started: api={}", self.config.api_url);
    }

    pub async fn shutdown(&mut self) {
        self.requests.abort_all();
        self.stream.close().await;
        self.throughput.stop().await;
        self.latency.stop().await;
        self.backpressure.stop().await;
        self.workers.stop().await;
        self.provider.stop().await;
        info!("dashboard_stopped");
    }

    pub fn live(&self) -> LiveSnapshot {
        self.live.borrow().clone()
    }

    pub fn live_receiver(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.clone()
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Waits for the next list, detail or delete request to finish.
    pub async fn next_completion(&mut self) -> Option<Result<Completion, JoinError>> {
        self.requests.join_next().await
    }

    pub fn on_completion(&mut self, joined: Result<Completion, JoinError>) {
        let completion = match joined {
            Ok(completion) => completion,
            Err(err) => {
                warn!("request_join_error: {err}");
                return;
            }
        };
        match completion {
            Completion::TaskPage { ticket, result } => {
                if self.tasks.finish_query(ticket, result) == QueryOutcome::Requery {
                    let pending = self.tasks.begin_query();
                    self.spawn_query(pending);
                }
                self.clamp_selection();
            }
            Completion::Detail { task_id, result } => {
                if self.details.finish_expand(&task_id, result) == ExpandOutcome::Failed {
                    self.status_note = self.details.error().map(str::to_string);
                }
            }
            Completion::Delete { task_id, result } => {
                let outcome = self
                    .delete_dialog
                    .finish_confirm(&task_id, result, &mut self.details);
                if outcome == DeleteOutcome::Deleted {
                    self.status_note = Some("task deleted".to_string());
                    let pending = self.tasks.begin_query();
                    self.spawn_query(pending);
                }
            }
        }
    }

    fn spawn_query(&mut self, pending: PendingQuery) {
        let PendingQuery { ticket, request } = pending;
        self.requests.spawn(async move {
            Completion::TaskPage {
                ticket,
                result: request.await,
            }
        });
    }

    fn spawn_detail(&mut self, pending: PendingDetail) {
        let PendingDetail { task_id, request } = pending;
        self.requests.spawn(async move {
            Completion::Detail {
                result: request.await,
                task_id,
            }
        });
    }

    fn spawn_delete(&mut self, pending: PendingDelete) {
        let PendingDelete { task_id, request } = pending;
        self.requests.spawn(async move {
            Completion::Delete {
                result: request.await,
                task_id,
            }
        });
    }

    /// Worker health is only polled while the push stream is connected.
    pub async fn on_live_update(&mut self) {
        let connected = self.live.borrow().is_connected();
        if connected && !self.workers.is_running() {
            self.workers.start();
        } else if !connected && self.workers.is_running() {
            self.workers.stop().await;
        }
    }

    /// A failed status check is shown as its own error status.
    pub fn provider_status(&self) -> Option<ProviderStatus> {
        let snapshot = self.provider.snapshot();
        if snapshot.last_error.is_some() {
            return Some(ProviderStatus::check_failed());
        }
        snapshot.data.map(|status| status.as_ref().clone())
    }

    pub fn visible_tasks(&self) -> &[TaskSummary] {
        self.tasks
            .page()
            .map(|page| page.tasks.as_slice())
            .unwrap_or_default()
    }

    fn selected_task(&self) -> Option<TaskSummary> {
        self.visible_tasks().get(self.selected).cloned()
    }

    fn clamp_selection(&mut self) {
        let len = self.visible_tasks().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn refresh_all(&mut self) {
        self.throughput.refresh();
        self.latency.refresh();
        self.backpressure.refresh();
        self.workers.refresh();
        self.provider.refresh();
    }

    /// Returns true when the dashboard should exit.
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
            _ => false,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.search_draft.is_some() {
            self.handle_search_key(key);
            return false;
        }
        if self.delete_dialog.is_open() {
            self.handle_dialog_key(key);
            return false;
        }
        if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
            self.help_open = !self.help_open;
            return false;
        }
        if key.code == KeyCode::Esc && self.help_open {
            self.help_open = false;
            return false;
        }
        if self.help_open {
            return false;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Tab => self.view = self.view.toggle(),
            KeyCode::Char('1') => self.view = View::Dashboard,
            KeyCode::Char('2') => self.view = View::Tasks,
            KeyCode::Char('r') => {
                self.refresh_all();
                let pending = self.tasks.begin_query();
                self.spawn_query(pending);
                self.status_note = Some("refreshed".to_string());
            }
            _ if self.view == View::Tasks => self.handle_tasks_key(key),
            _ => {}
        }
        false
    }

    fn handle_tasks_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                let len = self.visible_tasks().len();
                if self.selected + 1 < len {
                    self.selected += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Enter => {
                if let Some(task) = self.selected_task() {
                    if let ExpandRequest::Fetch(pending) = self.details.begin_expand(&task.task_id)
                    {
                        self.spawn_detail(pending);
                    }
                }
            }
            KeyCode::Esc => self.details.collapse(),
            KeyCode::Char('/') => {
                self.search_draft = Some(self.tasks.filter().task_id_substring.clone());
            }
            KeyCode::Char('s') => {
                let next = self.tasks.filter().status.next();
                self.apply_filter(FilterChange::Status(next));
            }
            KeyCode::Char('t') => {
                let next = self.tasks.filter().task_type.next();
                self.apply_filter(FilterChange::TaskType(next));
            }
            KeyCode::Right | KeyCode::Char('n') => {
                if let Some(change) = self.tasks.next_page_change() {
                    self.apply_filter(change);
                }
            }
            KeyCode::Left | KeyCode::Char('p') => {
                if let Some(change) = self.tasks.previous_page_change() {
                    self.apply_filter(change);
                }
            }
            KeyCode::Char('d') => {
                if let Some(task) = self.selected_task() {
                    self.delete_dialog.open(task);
                }
            }
            _ => {}
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        let Some(mut draft) = self.search_draft.take() else {
            return;
        };
        match key.code {
            KeyCode::Enter | KeyCode::Esc => return,
            KeyCode::Backspace => {
                draft.pop();
            }
            KeyCode::Char(ch) => draft.push(ch),
            _ => {
                self.search_draft = Some(draft);
                return;
            }
        }
        self.search_draft = Some(draft.clone());
        self.apply_filter(FilterChange::TaskId(draft));
    }

    fn handle_dialog_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                if let Some(pending) = self.delete_dialog.begin_confirm(&self.details) {
                    self.spawn_delete(pending);
                }
            }
            KeyCode::Char('n') | KeyCode::Esc => self.delete_dialog.cancel(),
            _ => {}
        }
    }

    /// The new page is requested in the background; the table keeps the
    /// previous rows until it arrives.
    fn apply_filter(&mut self, change: FilterChange) {
        self.details.collapse();
        let pending = self.tasks.request(change);
        self.spawn_query(pending);
        self.selected = 0;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::app;
    use super::*;
    use std::time::Duration;

    use axum::routing::get;
    use axum::{Json, Router};
    use crossterm::event::KeyModifiers;
    use pulseboard_core::query::StatusFilter;
    use pulseboard_core::TaskState;
    use serde_json::json;

    async fn spawn_server() -> String {
        let router = Router::new().route(
            "/api/tasks/summaries",
            get(|| async {
                Json(json!({
                    "tasks": [
                        {"task_id": "abc-1", "state": "pending", "task_type": "pdfxtract", "created_at": "2026-03-01T10:00:00", "completed_at": null}
                    ],
                    "total_items": 1,
                    "total_pages": 1,
                    "page": 1,
                    "page_size": 10
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}/api")
    }

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    async fn settle(app: &mut App) {
        while app.has_pending_requests() {
            let joined = tokio::time::timeout(Duration::from_secs(10), app.next_completion())
                .await
                .expect("request finished")
                .expect("pending request");
            app.on_completion(joined);
        }
    }

    #[tokio::test]
    async fn filter_key_returns_before_the_page_arrives() {
        let api_url = spawn_server().await;
        let mut app = app(&api_url, "pulseboard://tasks-history");
        app.view = View::Tasks;

        assert!(!app.handle_event(press(KeyCode::Char('s'))));
        assert_eq!(
            app.tasks.filter().status,
            StatusFilter::Only(TaskState::Pending)
        );
        assert!(app.tasks.is_loading());
        assert!(app.has_pending_requests());
        assert_eq!(
            app.tasks.view_url().as_str(),
            "pulseboard://tasks-history?task_id=&status=all&task_type=all&page=1"
        );

        settle(&mut app).await;
        assert!(!app.tasks.is_loading());
        assert_eq!(app.visible_tasks().len(), 1);
        assert_eq!(
            app.tasks.view_url().as_str(),
            "pulseboard://tasks-history?task_id=&status=pending&task_type=all&page=1"
        );
    }

    #[tokio::test]
    async fn unreachable_api_reports_error_without_blocking_keys() {
        let mut app = app("http://127.0.0.1:9/api", "pulseboard://tasks-history?page=2");
        app.view = View::Tasks;

        app.handle_event(press(KeyCode::Char('r')));
        assert!(app.tasks.is_initial_load());
        assert!(!app.handle_event(press(KeyCode::Char('?'))));
        assert!(app.help_open);

        settle(&mut app).await;
        assert!(!app.tasks.is_loading());
        assert!(app.tasks.error().is_some());
        assert!(app.tasks.view_url().as_str().ends_with("page=2"));
    }
}
