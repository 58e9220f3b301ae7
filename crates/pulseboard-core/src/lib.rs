use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod health;
pub mod metrics;
pub mod query;
pub mod stream_protocol;

pub const DEFAULT_TASK_TYPE: &str = "summarize";
pub const KNOWN_TASK_TYPES: [&str; 2] = ["summarize", "pdfxtract"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Active,
    Completed,
    Failed,
    Scheduled,
    Dlq,
    /// Any state this client does not know; never used as a filter value.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Active,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Scheduled,
        TaskState::Dlq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Scheduled => "scheduled",
            TaskState::Dlq => "dlq",
            TaskState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Dlq)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "scheduled" => Ok(TaskState::Scheduled),
            "dlq" => Ok(TaskState::Dlq),
            other => Err(format!("Unknown task state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSummary {
    /// Task type as displayed; records without one are summarize tasks.
    pub fn task_type(&self) -> &str {
        match self.task_type.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => DEFAULT_TASK_TYPE,
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| (completed - self.created_at).num_seconds())
    }

    pub fn duration_label(&self) -> String {
        match self.duration_secs() {
            Some(secs) => format!("{secs}s"),
            None => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub state: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub state_history: Vec<StateTransition>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub error_history: Vec<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl TaskDetail {
    pub fn task_id(&self) -> &str {
        &self.summary.task_id
    }

    pub fn content_len(&self) -> usize {
        self.content
            .as_deref()
            .map(|content| content.chars().count())
            .unwrap_or(0)
    }

    pub fn has_result(&self) -> bool {
        self.result
            .as_deref()
            .is_some_and(|result| !result.is_empty())
    }

    pub fn result_len(&self) -> usize {
        self.result
            .as_deref()
            .map(|result| result.chars().count())
            .unwrap_or(0)
    }

    /// The full result body is only shown once a task has completed.
    pub fn visible_result(&self) -> Option<&str> {
        if self.summary.state != TaskState::Completed {
            return None;
        }
        self.result.as_deref().filter(|result| !result.is_empty())
    }

    pub fn error_history_json(&self) -> Option<String> {
        if self.error_history.is_empty() {
            return None;
        }
        serde_json::to_string_pretty(&self.error_history).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskListPage {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tasks: Vec<TaskSummary>,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    query::PAGE_SIZE
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDepths {
    #[serde(default)]
    pub primary: u64,
    #[serde(default)]
    pub retry: u64,
    #[serde(default)]
    pub scheduled: u64,
    #[serde(default)]
    pub dlq: u64,
}

impl QueueDepths {
    pub fn entries(&self) -> [(&'static str, u64); 4] {
        [
            ("primary", self.primary),
            ("retry", self.retry),
            ("scheduled", self.scheduled),
            ("dlq", self.dlq),
        ]
    }

    pub fn total(&self) -> u64 {
        self.primary + self.retry + self.scheduled + self.dlq
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatus {
    pub queues: QueueDepths,
    pub states: BTreeMap<String, u64>,
    pub retry_ratio: f64,
}

impl QueueStatus {
    /// Builds a status snapshot, clamping the retry ratio into [0, 1].
    /// Returns `None` when the ratio is not a finite number.
    pub fn new(queues: QueueDepths, states: BTreeMap<String, u64>, retry_ratio: f64) -> Option<Self> {
        if !retry_ratio.is_finite() {
            return None;
        }
        Some(Self {
            queues,
            states,
            retry_ratio: retry_ratio.clamp(0.0, 1.0),
        })
    }

    pub fn state_count(&self, state: TaskState) -> u64 {
        self.states.get(state.as_str()).copied().unwrap_or(0)
    }

    pub fn retry_ratio_label(&self) -> String {
        format!("{:.1}%", self.retry_ratio * 100.0)
    }
}

/// Parses a server timestamp. Offsets are honoured; naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => parse_timestamp(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{value}'"))),
    }
}

/// Treats an explicit `null` like a missing field.
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn task_state_parses_and_displays() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>(), Ok(state));
        }
        assert_eq!(" DLQ ".parse::<TaskState>(), Ok(TaskState::Dlq));
        assert!("archived".parse::<TaskState>().is_err());
        assert_eq!(TaskState::Scheduled.to_string(), "scheduled");
    }

    #[test]
    fn summary_accepts_naive_timestamps_and_defaults_task_type() {
        let summary: TaskSummary = serde_json::from_str(
            r#"{
                "task_id": "t-1",
                "state": "completed",
                "created_at": "2026-03-01T10:00:00.250",
                "completed_at": "2026-03-01T10:00:42.250"
            }"#,
        )
        .expect("parse summary");

        assert_eq!(summary.task_type(), "summarize");
        assert_eq!(summary.created_at.hour(), 10);
        assert_eq!(summary.duration_label(), "42s");
        assert!(summary.updated_at.is_none());
    }

    #[test]
    fn unexpected_state_does_not_break_the_page() {
        let page: TaskListPage = serde_json::from_str(
            r#"{
                "tasks": [
                    {"task_id": "t-1", "state": "archived", "created_at": "2026-03-01T10:00:00Z"},
                    {"task_id": "t-2", "state": "pending", "created_at": "2026-03-01T10:01:00Z"}
                ],
                "total_items": 2,
                "total_pages": 1
            }"#,
        )
        .expect("parse page");

        assert_eq!(page.tasks[0].state, TaskState::Unknown);
        assert_eq!(page.tasks[0].state.as_str(), "unknown");
        assert_eq!(page.tasks[1].state, TaskState::Pending);
        assert!(!TaskState::ALL.contains(&TaskState::Unknown));
    }

    #[test]
    fn summary_without_completion_has_no_duration() {
        let summary: TaskSummary = serde_json::from_str(
            r#"{
                "task_id": "t-2",
                "state": "active",
                "task_type": "pdfxtract",
                "created_at": "2026-03-01T10:00:00+02:00",
                "completed_at": null
            }"#,
        )
        .expect("parse summary");

        assert_eq!(summary.task_type(), "pdfxtract");
        assert_eq!(summary.created_at.hour(), 8);
        assert_eq!(summary.duration_label(), "N/A");
    }

    #[test]
    fn detail_flattens_summary_and_tolerates_null_histories() {
        let detail: TaskDetail = serde_json::from_str(
            r#"{
                "task_id": "t-3",
                "state": "completed",
                "task_type": null,
                "created_at": "2026-03-01T10:00:00Z",
                "completed_at": "2026-03-01T10:01:00Z",
                "retry_count": 1,
                "max_retries": 3,
                "last_error": "timeout",
                "state_history": [
                    {"state": "pending", "timestamp": "2026-03-01T10:00:00Z"},
                    {"state": "completed", "timestamp": "2026-03-01T10:01:00Z"}
                ],
                "error_history": null,
                "content": "hello world",
                "result": "hi"
            }"#,
        )
        .expect("parse detail");

        assert_eq!(detail.task_id(), "t-3");
        assert_eq!(detail.summary.task_type(), "summarize");
        assert_eq!(detail.state_history.len(), 2);
        assert!(detail.error_history.is_empty());
        assert!(detail.error_history_json().is_none());
        assert_eq!(detail.content_len(), 11);
        assert_eq!(detail.result_len(), 2);
        assert_eq!(detail.visible_result(), Some("hi"));
    }

    #[test]
    fn detail_hides_result_until_completed() {
        let detail: TaskDetail = serde_json::from_str(
            r#"{
                "task_id": "t-4",
                "state": "failed",
                "created_at": "2026-03-01T10:00:00Z",
                "result": "partial",
                "error_history": [{"error": "boom", "attempt": 1}]
            }"#,
        )
        .expect("parse detail");

        assert!(detail.has_result());
        assert!(detail.visible_result().is_none());
        let history = detail.error_history_json().expect("history json");
        assert!(history.contains("\"boom\""));
    }

    #[test]
    fn queue_status_clamps_ratio_and_rejects_non_finite() {
        let status = QueueStatus::new(QueueDepths::default(), BTreeMap::new(), 1.7)
            .expect("finite ratio");
        assert_eq!(status.retry_ratio, 1.0);
        assert_eq!(status.retry_ratio_label(), "100.0%");

        let low = QueueStatus::new(QueueDepths::default(), BTreeMap::new(), -0.2)
            .expect("finite ratio");
        assert_eq!(low.retry_ratio, 0.0);

        assert!(QueueStatus::new(QueueDepths::default(), BTreeMap::new(), f64::NAN).is_none());
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2026-03-01 10:00:00").is_some());
    }
}
