//! Task history filter, list query normalisation, and pagination display.

use crate::TaskState;
use serde::Serialize;

pub const PAGE_SIZE: u32 = 10;
pub const SORT_BY: &str = "created_at";
pub const SORT_ORDER: &str = "desc";
const ALL: &str = "all";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(TaskState),
}

impl StatusFilter {
    pub fn as_param(&self) -> &'static str {
        match self {
            StatusFilter::All => ALL,
            StatusFilter::Only(state) => state.as_str(),
        }
    }

    /// Unknown values fall back to `All`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL) {
            return StatusFilter::All;
        }
        trimmed
            .parse::<TaskState>()
            .map(StatusFilter::Only)
            .unwrap_or(StatusFilter::All)
    }

    /// Cycles all -> pending -> ... -> dlq -> all.
    pub fn next(&self) -> Self {
        match self {
            StatusFilter::All => StatusFilter::Only(TaskState::ALL[0]),
            StatusFilter::Only(state) => TaskState::ALL
                .iter()
                .position(|candidate| candidate == state)
                .and_then(|idx| TaskState::ALL.get(idx + 1))
                .map(|next| StatusFilter::Only(*next))
                .unwrap_or(StatusFilter::All),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskTypeFilter {
    #[default]
    All,
    Only(String),
}

impl TaskTypeFilter {
    pub fn as_param(&self) -> &str {
        match self {
            TaskTypeFilter::All => ALL,
            TaskTypeFilter::Only(task_type) => task_type,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL) {
            TaskTypeFilter::All
        } else {
            TaskTypeFilter::Only(trimmed.to_string())
        }
    }

    /// Cycles through the known task types; a custom type restarts at `All`.
    pub fn next(&self) -> Self {
        let known = crate::KNOWN_TASK_TYPES;
        match self {
            TaskTypeFilter::All => TaskTypeFilter::Only(known[0].to_string()),
            TaskTypeFilter::Only(current) => known
                .iter()
                .position(|candidate| candidate == current)
                .and_then(|idx| known.get(idx + 1))
                .map(|next| TaskTypeFilter::Only(next.to_string()))
                .unwrap_or(TaskTypeFilter::All),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    TaskId(String),
    Status(StatusFilter),
    TaskType(TaskTypeFilter),
    Page(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub task_id_substring: String,
    pub status: StatusFilter,
    pub task_type: TaskTypeFilter,
    pub page: u32,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            task_id_substring: String::new(),
            status: StatusFilter::All,
            task_type: TaskTypeFilter::All,
            page: 1,
        }
    }
}

impl TaskFilter {
    /// Any change other than the page itself restarts pagination.
    pub fn apply(&mut self, change: FilterChange) {
        match change {
            FilterChange::TaskId(value) => {
                self.task_id_substring = value;
                self.page = 1;
            }
            FilterChange::Status(status) => {
                self.status = status;
                self.page = 1;
            }
            FilterChange::TaskType(task_type) => {
                self.task_type = task_type;
                self.page = 1;
            }
            FilterChange::Page(page) => self.page = page.max(1),
        }
    }

    pub fn to_list_query(&self) -> TaskListQuery {
        let task_id = self.task_id_substring.trim();
        TaskListQuery {
            task_id: (!task_id.is_empty()).then(|| task_id.to_string()),
            status: match self.status {
                StatusFilter::All => None,
                StatusFilter::Only(state) => Some(state),
            },
            task_type: match &self.task_type {
                TaskTypeFilter::All => None,
                TaskTypeFilter::Only(task_type) => Some(task_type.clone()),
            },
            page: self.page.max(1),
            page_size: PAGE_SIZE,
            sort_by: SORT_BY,
            sort_order: SORT_ORDER,
        }
    }

    /// View link parameters, always written in the same order.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("task_id", self.task_id_substring.clone()),
            ("status", self.status.as_param().to_string()),
            ("task_type", self.task_type.as_param().to_string()),
            ("page", self.page.to_string()),
        ]
    }

    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = TaskFilter::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "task_id" => filter.task_id_substring = value.to_string(),
                "status" => filter.status = StatusFilter::parse(value),
                "task_type" => filter.task_type = TaskTypeFilter::parse(value),
                "page" => {
                    filter.page = value
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|page| *page >= 1)
                        .unwrap_or(1)
                }
                _ => {}
            }
        }
        filter
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: &'static str,
    pub sort_order: &'static str,
}

pub fn pagination_label(total_items: u64, page: u32, page_size: u32, tasks_on_page: usize) -> String {
    if total_items == 0 {
        return "No tasks found".to_string();
    }
    let start = u64::from(page.saturating_sub(1)) * u64::from(page_size) + 1;
    if tasks_on_page == 1 {
        return format!("Showing task {start} of {total_items}");
    }
    let end = (start + tasks_on_page as u64).saturating_sub(1);
    format!("Showing tasks {start}-{end} of {total_items}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationControls {
    pub visible: bool,
    pub previous_enabled: bool,
    pub next_enabled: bool,
}

pub fn pagination_controls(page: u32, total_pages: u32) -> PaginationControls {
    PaginationControls {
        visible: total_pages > 1,
        previous_enabled: page > 1,
        next_enabled: page < total_pages,
    }
}
