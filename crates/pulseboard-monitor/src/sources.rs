//! Bindings between the HTTP client and the monitoring components.

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::StreamExt;
use pulseboard_client::{ApiClient, ClientError};
use pulseboard_core::health::{ProviderStatus, WorkerStatus};
use pulseboard_core::metrics::{derive_backpressure, BackpressureSeries, MetricBucket};
use pulseboard_core::query::TaskListQuery;
use pulseboard_core::{TaskDetail, TaskListPage};

use crate::detail::TaskDetailSource;
use crate::event_stream::{PushByteStream, PushTransport, TransportError};
use crate::poller::MetricsSource;
use crate::tasks::TaskListSource;

impl PushTransport for ApiClient {
    fn connect(&self) -> impl Future<Output = Result<PushByteStream, TransportError>> + Send {
        async move {
            let stream = self
                .open_event_stream()
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            Ok(stream
                .map(|chunk| chunk.map_err(|err| TransportError::Read(err.to_string())))
                .boxed())
        }
    }
}

impl TaskListSource for ApiClient {
    fn list_tasks(
        &self,
        query: &TaskListQuery,
    ) -> impl Future<Output = Result<TaskListPage, ClientError>> + Send {
        ApiClient::list_tasks(self, query)
    }
}

impl TaskDetailSource for ApiClient {
    fn fetch_task_detail(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<TaskDetail, ClientError>> + Send {
        ApiClient::fetch_task_detail(self, task_id)
    }

    fn delete_task(&self, task_id: &str) -> impl Future<Output = Result<(), ClientError>> + Send {
        ApiClient::delete_task(self, task_id)
    }
}

pub struct ThroughputSource {
    client: Arc<ApiClient>,
    minutes: u32,
}

impl ThroughputSource {
    pub fn new(client: Arc<ApiClient>, minutes: u32) -> Self {
        Self { client, minutes }
    }
}

impl MetricsSource for ThroughputSource {
    type Output = Vec<MetricBucket>;

    fn name(&self) -> &'static str {
        "throughput"
    }

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send {
        self.client.fetch_task_metrics(self.minutes)
    }
}

pub struct LatencySource {
    client: Arc<ApiClient>,
    minutes: u32,
}

impl LatencySource {
    pub fn new(client: Arc<ApiClient>, minutes: u32) -> Self {
        Self { client, minutes }
    }
}

impl MetricsSource for LatencySource {
    type Output = Vec<MetricBucket>;

    fn name(&self) -> &'static str {
        "latency"
    }

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send {
        self.client.fetch_latency_metrics(self.minutes)
    }
}

/// Throughput buckets turned into the backlog series on every fetch.
pub struct BackpressureSource {
    client: Arc<ApiClient>,
    minutes: u32,
}

impl BackpressureSource {
    pub fn new(client: Arc<ApiClient>, minutes: u32) -> Self {
        Self { client, minutes }
    }
}

impl MetricsSource for BackpressureSource {
    type Output = BackpressureSeries;

    fn name(&self) -> &'static str {
        "backpressure"
    }

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send {
        async move {
            let buckets = self.client.fetch_task_metrics(self.minutes).await?;
            Ok(derive_backpressure(&buckets))
        }
    }
}

pub struct WorkerHealthSource {
    client: Arc<ApiClient>,
}

impl WorkerHealthSource {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

impl MetricsSource for WorkerHealthSource {
    type Output = WorkerStatus;

    fn name(&self) -> &'static str {
        "workers"
    }

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send {
        self.client.worker_status()
    }
}

pub struct ProviderStatusSource {
    client: Arc<ApiClient>,
}

impl ProviderStatusSource {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

impl MetricsSource for ProviderStatusSource {
    type Output = ProviderStatus;

    fn name(&self) -> &'static str {
        "provider"
    }

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, ClientError>> + Send {
        self.client.provider_status()
    }
}
