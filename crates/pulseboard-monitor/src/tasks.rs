//! Filtered, paginated task history with a shareable view link.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use pulseboard_client::ClientError;
use pulseboard_core::query::{
    pagination_controls, pagination_label, FilterChange, PaginationControls, TaskFilter,
    TaskListQuery,
};
use pulseboard_core::TaskListPage;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_VIEW_URL: &str = "pulseboard://tasks-history";

pub trait TaskListSource: Send + Sync + 'static {
    fn list_tasks(
        &self,
        query: &TaskListQuery,
    ) -> impl Future<Output = Result<TaskListPage, ClientError>> + Send;
}

/// A list request detached from the controller so it can run on its own
/// task. Hand the result back through [`TaskQueryController::finish_query`].
pub struct PendingQuery {
    pub ticket: u64,
    pub request: BoxFuture<'static, Result<TaskListPage, ClientError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Applied,
    Failed,
    /// A newer query was issued after this one; its result was dropped.
    Superseded,
    /// The page came back empty past the end; query again for the last page.
    Requery,
}

pub struct TaskQueryController<S> {
    source: Arc<S>,
    filter: TaskFilter,
    page: Option<TaskListPage>,
    error: Option<String>,
    loading: bool,
    view_url: Url,
    queries_issued: u64,
}

impl<S: TaskListSource> TaskQueryController<S> {
    /// Seeds the filter from the link's query parameters.
    pub fn new(source: Arc<S>, view_url: Url) -> Self {
        let filter = TaskFilter::from_query_pairs(view_url.query_pairs());
        let mut controller = Self {
            source,
            filter,
            page: None,
            error: None,
            loading: false,
            view_url,
            queries_issued: 0,
        };
        controller.sync_view_url();
        controller
    }

    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    pub fn page(&self) -> Option<&TaskListPage> {
        self.page.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn view_url(&self) -> &Url {
        &self.view_url
    }

    pub fn queries_issued(&self) -> u64 {
        self.queries_issued
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_initial_load(&self) -> bool {
        self.loading && self.page.is_none()
    }

    /// Applies one filter edit and re-queries. Returns whether the list
    /// was refreshed.
    pub async fn update(&mut self, change: FilterChange) -> bool {
        self.filter.apply(change);
        self.reload().await
    }

    pub async fn next_page(&mut self) -> bool {
        match self.next_page_change() {
            Some(change) => self.update(change).await,
            None => false,
        }
    }

    pub async fn previous_page(&mut self) -> bool {
        match self.previous_page_change() {
            Some(change) => self.update(change).await,
            None => false,
        }
    }

    pub fn next_page_change(&self) -> Option<FilterChange> {
        self.controls()
            .next_enabled
            .then(|| FilterChange::Page(self.filter.page.saturating_add(1)))
    }

    pub fn previous_page_change(&self) -> Option<FilterChange> {
        self.controls()
            .previous_enabled
            .then(|| FilterChange::Page(self.filter.page.saturating_sub(1)))
    }

    /// Re-runs the current query. If the page now lies past the end (for
    /// example after deleting the only row on the last page) it steps back
    /// to the new last page.
    pub async fn reload(&mut self) -> bool {
        loop {
            let PendingQuery { ticket, request } = self.begin_query();
            let result = request.await;
            match self.finish_query(ticket, result) {
                QueryOutcome::Applied => return true,
                QueryOutcome::Requery => continue,
                QueryOutcome::Failed | QueryOutcome::Superseded => return false,
            }
        }
    }

    /// Applies a filter edit and returns the request for the new page
    /// without waiting for it.
    pub fn request(&mut self, change: FilterChange) -> PendingQuery {
        self.filter.apply(change);
        self.begin_query()
    }

    /// Starts a query for the current filter. Only the most recently started
    /// query is applied when results come back.
    pub fn begin_query(&mut self) -> PendingQuery {
        let query = self.filter.to_list_query();
        self.loading = true;
        self.error = None;
        self.queries_issued += 1;
        let source = Arc::clone(&self.source);
        PendingQuery {
            ticket: self.queries_issued,
            request: Box::pin(async move { source.list_tasks(&query).await }),
        }
    }

    pub fn finish_query(
        &mut self,
        ticket: u64,
        result: Result<TaskListPage, ClientError>,
    ) -> QueryOutcome {
        if ticket != self.queries_issued {
            debug!(
                "task_page_superseded: ticket={ticket} latest={}",
                self.queries_issued
            );
            return QueryOutcome::Superseded;
        }
        self.loading = false;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!("task_list_error: {err}");
                self.error = Some(err.to_string());
                return QueryOutcome::Failed;
            }
        };
        debug!(
            "task_page_loaded: page={} items={} total={}",
            self.filter.page,
            page.tasks.len(),
            page.total_items
        );
        let last_page = page.total_pages.max(1);
        let past_end = page.tasks.is_empty() && self.filter.page > last_page;
        self.page = Some(page);
        if past_end {
            debug!(
                "task_page_out_of_range: page={} last_page={last_page}",
                self.filter.page
            );
            self.filter.page = last_page;
            return QueryOutcome::Requery;
        }
        self.sync_view_url();
        QueryOutcome::Applied
    }

    fn sync_view_url(&mut self) {
        self.view_url
            .query_pairs_mut()
            .clear()
            .extend_pairs(self.filter.to_query_pairs());
    }

    pub fn pagination_label(&self) -> Option<String> {
        self.page.as_ref().map(|page| {
            pagination_label(
                page.total_items,
                self.filter.page,
                page.page_size,
                page.tasks.len(),
            )
        })
    }

    pub fn controls(&self) -> PaginationControls {
        let total_pages = self.page.as_ref().map(|page| page.total_pages).unwrap_or(0);
        pagination_controls(self.filter.page, total_pages)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryTasks;
    use super::*;
    use pulseboard_core::query::{StatusFilter, TaskTypeFilter};
    use pulseboard_core::TaskState;
    use std::sync::atomic::Ordering;

    fn controller(tasks: usize, link: &str) -> (TaskQueryController<MemoryTasks>, Arc<MemoryTasks>) {
        let source = Arc::new(MemoryTasks::with_tasks(tasks));
        let url = Url::parse(link).expect("view url");
        (TaskQueryController::new(Arc::clone(&source), url), source)
    }

    #[tokio::test]
    async fn seeds_filter_from_view_link_and_queries() {
        let (mut controller, source) = controller(
            25,
            "pulseboard://tasks-history?status=completed&task_type=all&page=2",
        );
        assert_eq!(
            controller.filter().status,
            StatusFilter::Only(TaskState::Completed)
        );
        assert_eq!(controller.filter().page, 2);

        assert!(controller.reload().await);
        let query = source.queries.lock().expect("queries")[0].clone();
        assert_eq!(query.status, Some(TaskState::Completed));
        assert_eq!(query.task_type, None);
        assert_eq!(query.page, 2);

        // 13 completed tasks: page 2 holds 3
        assert_eq!(
            controller.pagination_label().as_deref(),
            Some("Showing tasks 11-13 of 13")
        );
    }

    #[tokio::test]
    async fn filter_change_resets_page_and_syncs_link() {
        let (mut controller, _) = controller(45, DEFAULT_VIEW_URL);
        controller.update(FilterChange::Page(4)).await;
        assert_eq!(controller.filter().page, 4);

        controller
            .update(FilterChange::TaskType(TaskTypeFilter::Only("pdfxtract".to_string())))
            .await;
        assert_eq!(controller.filter().page, 1);
        assert_eq!(
            controller.view_url().as_str(),
            "pulseboard://tasks-history?task_id=&status=all&task_type=pdfxtract&page=1"
        );
    }

    #[tokio::test]
    async fn failure_keeps_previous_page() {
        let (mut controller, source) = controller(15, DEFAULT_VIEW_URL);
        assert!(controller.reload().await);
        let shown = controller.page().cloned();

        source.fail_next.store(true, Ordering::SeqCst);
        assert!(!controller.update(FilterChange::Page(2)).await);
        assert_eq!(
            controller.error(),
            Some("server returned 503: queue backend unavailable")
        );
        assert_eq!(controller.page().cloned(), shown);
        // link still reflects the last successful query
        assert!(controller.view_url().as_str().ends_with("page=1"));
        assert!(!controller.is_loading());

        assert!(controller.reload().await);
        assert!(controller.error().is_none());
        assert_eq!(controller.page().map(|page| page.tasks.len()), Some(5));
    }

    #[tokio::test]
    async fn navigation_respects_controls() {
        let (mut controller, source) = controller(25, DEFAULT_VIEW_URL);
        controller.reload().await;
        assert!(!controller.previous_page().await);
        assert!(controller.next_page().await);
        assert!(controller.next_page().await);
        assert_eq!(controller.filter().page, 3);
        assert!(!controller.controls().next_enabled);
        assert!(!controller.next_page().await);
        assert_eq!(source.query_count(), 3);
        assert_eq!(
            controller.pagination_label().as_deref(),
            Some("Showing tasks 21-25 of 25")
        );
    }

    #[tokio::test]
    async fn steps_back_when_last_page_empties() {
        let (mut controller, source) = controller(21, DEFAULT_VIEW_URL);
        controller.update(FilterChange::Page(3)).await;
        assert_eq!(
            controller.pagination_label().as_deref(),
            Some("Showing task 21 of 21")
        );

        let last = controller.page().expect("page").tasks[0].task_id.clone();
        assert!(source.remove(&last));
        assert!(controller.reload().await);

        assert_eq!(controller.filter().page, 2);
        assert_eq!(
            controller.pagination_label().as_deref(),
            Some("Showing tasks 11-20 of 20")
        );
        assert!(!controller.controls().next_enabled);
        assert_eq!(source.query_count(), 3);
    }

    #[tokio::test]
    async fn only_the_latest_query_is_applied() {
        let (mut controller, _) = controller(25, DEFAULT_VIEW_URL);
        let first = controller.begin_query();
        let second = controller.request(FilterChange::Page(3));
        assert!(controller.is_loading());
        assert!(controller.is_initial_load());

        let second_result = second.request.await;
        assert_eq!(
            controller.finish_query(second.ticket, second_result),
            QueryOutcome::Applied
        );
        let first_result = first.request.await;
        assert_eq!(
            controller.finish_query(first.ticket, first_result),
            QueryOutcome::Superseded
        );

        assert!(!controller.is_loading());
        assert_eq!(controller.filter().page, 3);
        assert_eq!(
            controller.pagination_label().as_deref(),
            Some("Showing tasks 21-25 of 25")
        );
        assert!(controller.view_url().as_str().ends_with("page=3"));
    }

    #[tokio::test]
    async fn loading_is_visible_while_request_is_pending() {
        let (mut controller, _) = controller(15, DEFAULT_VIEW_URL);
        assert!(controller.reload().await);

        let pending = controller.request(FilterChange::Page(2));
        assert!(controller.is_loading());
        assert!(!controller.is_initial_load());
        assert_eq!(controller.page().map(|page| page.page), Some(1));

        let result = pending.request.await;
        controller.finish_query(pending.ticket, result);
        assert!(!controller.is_loading());
        assert_eq!(controller.page().map(|page| page.tasks.len()), Some(5));
    }

    #[test]
    fn seeded_link_is_normalised_to_the_filter() {
        let (controller, _) = controller(0, "pulseboard://tasks-history?status=failed&page=0");
        assert_eq!(
            controller.view_url().as_str(),
            "pulseboard://tasks-history?task_id=&status=failed&task_type=all&page=1"
        );
    }

    #[tokio::test]
    async fn empty_store_reports_no_tasks() {
        let (mut controller, _) = controller(0, DEFAULT_VIEW_URL);
        controller.reload().await;
        assert_eq!(controller.pagination_label().as_deref(), Some("No tasks found"));
        assert!(!controller.controls().visible);
    }
}
