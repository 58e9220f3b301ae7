use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};
use pulseboard_core::health::{ProviderStatus, WorkerStatus};
use pulseboard_core::metrics::{MetricBucket, MetricsResponse};
use pulseboard_core::query::TaskListQuery;
use pulseboard_core::{TaskDetail, TaskListPage};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub type EventByteStream = BoxStream<'static, Result<Vec<u8>, ClientError>>;

const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid api url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("response decode failed: {0}")]
    Decode(String),
}

/// Typed HTTP client for the task pipeline API.
///
/// Request/response calls share one client with a total timeout. The push
/// stream uses a second client bounded only at connect time, since the
/// response body stays open for the lifetime of the connection.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url.trim()).map_err(|err| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "expected an http(s) base url".to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "base url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ── Metrics ───────────────────────────────────────────────────────────

    pub async fn fetch_task_metrics(&self, minutes: u32) -> Result<Vec<MetricBucket>, ClientError> {
        let resp = self
            .client
            .get(self.url(&["tasks", "metrics"])?)
            .query(&[("minutes", minutes)])
            .send()
            .await?;
        let body: MetricsResponse = parse_response(resp).await?;
        Ok(body.metrics)
    }

    pub async fn fetch_latency_metrics(&self, minutes: u32) -> Result<Vec<MetricBucket>, ClientError> {
        let resp = self
            .client
            .get(self.url(&["tasks", "metrics", "latency"])?)
            .query(&[("minutes", minutes)])
            .send()
            .await?;
        let body: MetricsResponse = parse_response(resp).await?;
        Ok(body.metrics)
    }

    // ── Tasks ─────────────────────────────────────────────────────────────

    pub async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, ClientError> {
        let resp = self
            .client
            .get(self.url(&["tasks", "summaries"])?)
            .query(query)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn fetch_task_detail(&self, task_id: &str) -> Result<TaskDetail, ClientError> {
        let resp = self.client.get(self.url(&["tasks", task_id])?).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(task_id.to_string()));
        }
        parse_response(resp).await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), ClientError> {
        let resp = self
            .client
            .delete(self.url(&["tasks", task_id])?)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await?;
            return Err(status_error(status, &body));
        }
        debug!("task_delete_ok: task_id={task_id}");
        Ok(())
    }

    // ── Health ────────────────────────────────────────────────────────────

    pub async fn worker_status(&self) -> Result<WorkerStatus, ClientError> {
        let resp = self
            .client
            .get(self.url(&["workers", "health"])?)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn provider_status(&self) -> Result<ProviderStatus, ClientError> {
        let resp = self
            .client
            .get(self.url(&["health", "openrouter"])?)
            .send()
            .await?;
        parse_response(resp).await
    }

    // ── Push stream ───────────────────────────────────────────────────────

    /// Opens the queue status event stream and yields raw body chunks.
    pub async fn open_event_stream(&self) -> Result<EventByteStream, ClientError> {
        let resp = self
            .stream_client
            .get(self.url(&["queues", "status", "stream"])?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await?;
            return Err(status_error(status, &body));
        }
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from))
            .boxed())
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_slice(&body).map_err(|err| ClientError::Decode(err.to_string()))
}

/// Prefers the JSON `detail` field the API puts on error bodies.
fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| match value.get("detail") {
            Some(serde_json::Value::String(text)) => Some(text.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        });
    let message = detail
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
        .trim()
        .to_string();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}
