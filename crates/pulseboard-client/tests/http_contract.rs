use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use pulseboard_client::{ApiClient, ClientError};
use pulseboard_core::health::WorkerHealth;
use pulseboard_core::query::{FilterChange, StatusFilter, TaskFilter};
use pulseboard_core::stream_protocol::{SseFrameDecoder, StreamMessage};
use pulseboard_core::TaskState;
use serde_json::json;

#[derive(Clone, Default)]
struct Recorded {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

async fn metrics(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    recorded.queries.lock().expect("lock").push(params);
    Json(json!({"metrics": [
        {"timestamp": "2026-03-01T10:00:00", "created_count": 5, "completed_count": 3, "failed_count": 1},
        {"timestamp": "2026-03-01T10:01:00", "created_count": 2, "completed_count": 4}
    ]}))
}

async fn latency() -> Json<serde_json::Value> {
    Json(json!({"metrics": [
        {"timestamp": "2026-03-01T10:00:00Z", "p50": 0.4, "p95": 1.2, "p99": 2.8}
    ]}))
}

async fn summaries(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    recorded.queries.lock().expect("lock").push(params);
    Json(json!({
        "tasks": [
            {"task_id": "abc-1", "state": "failed", "task_type": "pdfxtract", "created_at": "2026-03-01T10:00:00", "completed_at": null}
        ],
        "total_items": 1,
        "total_pages": 1,
        "page": 1,
        "page_size": 10
    }))
}

async fn task_detail(Path(task_id): Path<String>) -> axum::response::Response {
    if task_id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Task not found"}))).into_response();
    }
    Json(json!({
        "task_id": task_id,
        "state": "completed",
        "created_at": "2026-03-01T10:00:00",
        "completed_at": "2026-03-01T10:00:30",
        "retry_count": 0,
        "max_retries": 3,
        "state_history": [{"state": "completed", "timestamp": "2026-03-01T10:00:30"}],
        "error_history": [],
        "content": "document body",
        "result": "summary"
    }))
    .into_response()
}

async fn delete_task(
    State(recorded): State<Recorded>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    if task_id == "locked" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"detail": "Task is currently active"})),
        )
            .into_response();
    }
    recorded.deleted.lock().expect("lock").push(task_id);
    Json(json!({"message": "deleted"})).into_response()
}

async fn workers() -> Json<serde_json::Value> {
    Json(json!({
        "total_workers": 2,
        "healthy_workers": 1,
        "stale_workers": 1,
        "overall_status": "stale",
        "worker_details": [
            {"worker_id": "w-1", "status": "healthy", "last_heartbeat": 1767225600, "circuit_breaker": {"state": "closed", "success_count": 9, "fail_count": 0}},
            {"worker_id": "w-2", "status": "stale", "timestamp": "2026-01-01T00:00:00"}
        ]
    }))
}

async fn provider() -> Json<serde_json::Value> {
    Json(json!({"status": "rate_limited", "circuit_breaker_open": false, "consecutive_failures": 2}))
}

async fn status_stream() -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let events = vec![
        Ok(Event::default().data(
            json!({
                "type": "initial_status",
                "queue_depths": {"primary": 3, "retry": 1, "scheduled": 0, "dlq": 0},
                "state_counts": {"active": 2},
                "retry_ratio": 0.25
            })
            .to_string(),
        )),
        Ok(Event::default().data(json!({"type": "heartbeat"}).to_string())),
    ];
    Sse::new(stream::iter(events))
}

async fn spawn_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/tasks/metrics", get(metrics))
        .route("/api/tasks/metrics/latency", get(latency))
        .route("/api/tasks/summaries", get(summaries))
        .route("/api/tasks/:task_id", get(task_detail).delete(delete_task))
        .route("/api/workers/health", get(workers))
        .route("/api/health/openrouter", get(provider))
        .route("/api/queues/status/stream", get(status_stream))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}/api"), recorded)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5)).expect("client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_requests_carry_lookback_window() {
    let (base_url, recorded) = spawn_server().await;
    let api = client(&base_url);

    let buckets = api.fetch_task_metrics(360).await.expect("metrics");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[1].completed_count, 4);
    assert_eq!(buckets[1].failed_count, 0);

    let latency = api.fetch_latency_metrics(360).await.expect("latency");
    assert_eq!(latency[0].p99, Some(2.8));

    let queries = recorded.queries.lock().expect("lock").clone();
    assert_eq!(queries[0].get("minutes").map(String::as_str), Some("360"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_query_is_normalised_on_the_wire() {
    let (base_url, recorded) = spawn_server().await;
    let api = client(&base_url);

    let mut filter = TaskFilter::default();
    filter.apply(FilterChange::TaskId("  abc ".to_string()));
    let page = api
        .list_tasks(&filter.to_list_query())
        .await
        .expect("list tasks");
    assert_eq!(page.tasks[0].state, TaskState::Failed);
    assert_eq!(page.tasks[0].task_type(), "pdfxtract");

    filter.apply(FilterChange::Status(StatusFilter::Only(TaskState::Dlq)));
    filter.apply(FilterChange::Page(2));
    api.list_tasks(&filter.to_list_query())
        .await
        .expect("list tasks");

    let queries = recorded.queries.lock().expect("lock").clone();
    let first = &queries[0];
    assert_eq!(first.get("task_id").map(String::as_str), Some("abc"));
    assert!(!first.contains_key("status"));
    assert!(!first.contains_key("task_type"));
    assert_eq!(first.get("page").map(String::as_str), Some("1"));
    assert_eq!(first.get("page_size").map(String::as_str), Some("10"));
    assert_eq!(first.get("sort_by").map(String::as_str), Some("created_at"));
    assert_eq!(first.get("sort_order").map(String::as_str), Some("desc"));

    let second = &queries[1];
    assert_eq!(second.get("status").map(String::as_str), Some("dlq"));
    assert_eq!(second.get("page").map(String::as_str), Some("2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detail_and_delete_map_error_bodies() {
    let (base_url, recorded) = spawn_server().await;
    let api = client(&base_url);

    let detail = api.fetch_task_detail("abc-1").await.expect("detail");
    assert_eq!(detail.summary.duration_label(), "30s");
    assert_eq!(detail.visible_result(), Some("summary"));

    let missing = api.fetch_task_detail("missing").await;
    assert!(matches!(missing, Err(ClientError::NotFound(ref id)) if id == "missing"));

    api.delete_task("abc-1").await.expect("delete");
    assert_eq!(*recorded.deleted.lock().expect("lock"), vec!["abc-1".to_string()]);

    let locked = api.delete_task("locked").await;
    match locked {
        Err(ClientError::Status { status, message }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "Task is currently active");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_and_provider_status() {
    let (base_url, _) = spawn_server().await;
    let api = client(&base_url);

    let workers = api.worker_status().await.expect("workers");
    assert_eq!(workers.total_workers, 2);
    assert_eq!(workers.overall_health(), WorkerHealth::Stale);
    assert_eq!(
        workers.worker_details[1].heartbeat_label(),
        "2026-01-01 00:00:00 UTC"
    );

    let provider = api.provider_status().await.expect("provider");
    assert_eq!(provider.badge().label(), "Service Limited");
    assert_eq!(provider.detail_line().as_deref(), Some("2 consecutive failures"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn event_stream_yields_decodable_frames() {
    let (base_url, _) = spawn_server().await;
    let api = client(&base_url);

    let mut stream = api.open_event_stream().await.expect("open stream");
    let mut decoder = SseFrameDecoder::<StreamMessage>::default();
    let mut frames = Vec::new();
    let collect = async {
        while let Some(chunk) = stream.next().await {
            let report = decoder.push_chunk(&chunk.expect("chunk"));
            assert!(report.errors.is_empty(), "decode errors: {:?}", report.errors);
            frames.extend(report.frames);
        }
        frames.extend(decoder.finish().frames);
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("stream finished");

    assert_eq!(frames.len(), 2);
    match &frames[0] {
        StreamMessage::InitialStatus(payload) => {
            let status = payload.queue_status().expect("complete status");
            assert_eq!(status.queues.primary, 3);
            assert_eq!(status.retry_ratio, 0.25);
        }
        other => panic!("unexpected first frame: {other:?}"),
    }
    assert_eq!(frames[1].kind(), "heartbeat");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_server_is_an_http_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let api = client(&format!("http://{addr}/api"));
    assert!(matches!(
        api.worker_status().await,
        Err(ClientError::Http(_))
    ));
}
