//! On-demand task detail for the expanded history row, and task deletion.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use pulseboard_client::ClientError;
use pulseboard_core::{TaskDetail, TaskSummary};
use tracing::{info, warn};

use crate::tasks::{TaskListSource, TaskQueryController};

pub trait TaskDetailSource: Send + Sync + 'static {
    fn fetch_task_detail(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<TaskDetail, ClientError>> + Send;

    fn delete_task(&self, task_id: &str) -> impl Future<Output = Result<(), ClientError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    Collapsed,
    /// A fetch for this task was already in flight; its result will be used.
    Pending,
    Loaded,
    Failed,
    /// The row was collapsed or another row expanded before the fetch ended.
    Discarded,
}

pub struct PendingDetail {
    pub task_id: String,
    pub request: BoxFuture<'static, Result<TaskDetail, ClientError>>,
}

pub enum ExpandRequest {
    Collapsed,
    Pending,
    Fetch(PendingDetail),
}

/// Holds the detail of at most one expanded task. At most one fetch per
/// task id is in flight at a time.
pub struct TaskDetailCache<S> {
    source: Arc<S>,
    expanded_id: Option<String>,
    entry: Option<TaskDetail>,
    loading: bool,
    error: Option<String>,
    in_flight: Vec<String>,
    fetches: u64,
}

impl<S: TaskDetailSource> TaskDetailCache<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            expanded_id: None,
            entry: None,
            loading: false,
            error: None,
            in_flight: Vec::new(),
            fetches: 0,
        }
    }

    pub fn expanded_id(&self) -> Option<&str> {
        self.expanded_id.as_deref()
    }

    pub fn detail(&self) -> Option<&TaskDetail> {
        let expanded = self.expanded_id.as_deref()?;
        self.entry
            .as_ref()
            .filter(|detail| detail.task_id() == expanded)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    /// Expanding the row that is already open collapses it without a fetch.
    pub async fn expand(&mut self, task_id: &str) -> ExpandOutcome {
        match self.begin_expand(task_id) {
            ExpandRequest::Collapsed => ExpandOutcome::Collapsed,
            ExpandRequest::Pending => ExpandOutcome::Pending,
            ExpandRequest::Fetch(PendingDetail { task_id, request }) => {
                let result = request.await;
                self.finish_expand(&task_id, result)
            }
        }
    }

    /// Marks the row expanded and hands back the fetch to run, unless the
    /// row was open (collapse) or its fetch is already under way.
    pub fn begin_expand(&mut self, task_id: &str) -> ExpandRequest {
        if self.expanded_id.as_deref() == Some(task_id) {
            self.collapse();
            return ExpandRequest::Collapsed;
        }
        self.collapse();
        self.expanded_id = Some(task_id.to_string());
        self.loading = true;
        if self.in_flight.iter().any(|id| id == task_id) {
            return ExpandRequest::Pending;
        }
        self.in_flight.push(task_id.to_string());
        self.fetches += 1;

        let source = Arc::clone(&self.source);
        let id = task_id.to_string();
        ExpandRequest::Fetch(PendingDetail {
            task_id: task_id.to_string(),
            request: Box::pin(async move { source.fetch_task_detail(&id).await }),
        })
    }

    pub fn finish_expand(
        &mut self,
        task_id: &str,
        result: Result<TaskDetail, ClientError>,
    ) -> ExpandOutcome {
        self.in_flight.retain(|id| id != task_id);
        if self.expanded_id.as_deref() != Some(task_id) {
            return ExpandOutcome::Discarded;
        }
        self.loading = false;
        match result {
            Ok(detail) => {
                self.entry = Some(detail);
                ExpandOutcome::Loaded
            }
            Err(err) => {
                warn!("task_detail_error: task_id={task_id} error={err}");
                self.error = Some(err.to_string());
                ExpandOutcome::Failed
            }
        }
    }

    pub fn collapse(&mut self) {
        self.expanded_id = None;
        self.entry = None;
        self.loading = false;
        self.error = None;
    }

    fn delete_request(&self, task_id: &str) -> BoxFuture<'static, Result<(), ClientError>> {
        let source = Arc::clone(&self.source);
        let id = task_id.to_string();
        Box::pin(async move { source.delete_task(&id).await })
    }
}

pub struct PendingDelete {
    pub task_id: String,
    pub request: BoxFuture<'static, Result<(), ClientError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Failed,
    NoTarget,
}

/// Confirmation dialog for removing one task.
#[derive(Debug, Default)]
pub struct DeleteDialog {
    target: Option<TaskSummary>,
    deleting: bool,
    error: Option<String>,
}

impl DeleteDialog {
    pub fn open(&mut self, task: TaskSummary) {
        self.target = Some(task);
        self.error = None;
    }

    pub fn cancel(&mut self) {
        if self.deleting {
            return;
        }
        self.target = None;
        self.error = None;
    }

    pub fn is_open(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&TaskSummary> {
        self.target.as_ref()
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Deletes the target, then reloads the current page from the server.
    /// On failure the dialog stays open with the error and nothing is
    /// retried.
    pub async fn confirm<S, L>(
        &mut self,
        details: &mut TaskDetailCache<S>,
        tasks: &mut TaskQueryController<L>,
    ) -> DeleteOutcome
    where
        S: TaskDetailSource,
        L: TaskListSource,
    {
        let Some(PendingDelete { task_id, request }) = self.begin_confirm(details) else {
            return DeleteOutcome::NoTarget;
        };
        let result = request.await;
        let outcome = self.finish_confirm(&task_id, result, details);
        if outcome == DeleteOutcome::Deleted {
            tasks.reload().await;
        }
        outcome
    }

    /// Starts the delete request. Returns `None` with no target or while a
    /// delete is already running.
    pub fn begin_confirm<S: TaskDetailSource>(
        &mut self,
        details: &TaskDetailCache<S>,
    ) -> Option<PendingDelete> {
        if self.deleting {
            return None;
        }
        let task_id = self.target.as_ref()?.task_id.clone();
        self.deleting = true;
        self.error = None;
        Some(PendingDelete {
            request: details.delete_request(&task_id),
            task_id,
        })
    }

    /// On `Deleted` the caller reloads the task list.
    pub fn finish_confirm<S: TaskDetailSource>(
        &mut self,
        task_id: &str,
        result: Result<(), ClientError>,
        details: &mut TaskDetailCache<S>,
    ) -> DeleteOutcome {
        self.deleting = false;
        match result {
            Ok(()) => {
                info!("task_deleted: task_id={task_id}");
                self.target = None;
                self.error = None;
                if details.expanded_id() == Some(task_id) {
                    details.collapse();
                }
                DeleteOutcome::Deleted
            }
            Err(err) => {
                warn!("task_delete_error: task_id={task_id} error={err}");
                self.error = Some(err.to_string());
                DeleteOutcome::Failed
            }
        }
    }
}
