use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::{Task, TaskId, TaskStats};
use relayd::{
    ConcurrencyStats, HealthReport, InboundDelivery, IntakeAck, LogEvent, LogStream, TaskDetail,
    DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::WebError;
use crate::model::{
    log_event_data, log_event_name, IssueTasksResponse, TaskListParams, TaskListResponse,
    WebhookStatus,
};
use crate::state::WebState;

pub const WEBHOOK_PATH: &str = "/webhook/github";
const LOG_STREAM_BUFFER: usize = 64;

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(WEBHOOK_PATH, get(webhook_status).post(receive_webhook))
        .route("/api/concurrency", get(concurrency))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/stats", get(task_stats))
        .route("/api/tasks/issue/{issue_number}", get(tasks_for_issue))
        .route("/api/tasks/{task_id}", get(get_task))
        .route("/api/tasks/{task_id}/cancel", post(cancel_task))
        .route("/api/tasks/{task_id}/retry", post(retry_task))
        .route("/api/tasks/{task_id}/logs/stream", get(stream_logs))
        .with_state(state)
}

async fn health(State(state): State<WebState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service().health().await;
    if report.is_healthy() {
        return (StatusCode::OK, Json(report));
    }
    let failing: Vec<&str> = report
        .checks
        .iter()
        .filter(|(_, check)| !check.healthy)
        .map(|(name, _)| *name)
        .collect();
    tracing::warn!(failing = ?failing, "health check degraded");
    (StatusCode::SERVICE_UNAVAILABLE, Json(report))
}

async fn webhook_status() -> Json<WebhookStatus> {
    Json(WebhookStatus {
        ok: true,
        endpoint: WEBHOOK_PATH,
        events: ["issues", "issue_comment", "ping"],
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn receive_webhook(
    State(state): State<WebState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IntakeAck>), WebError> {
    let ack = state.intake().handle(InboundDelivery {
        signature: header(&headers, SIGNATURE_HEADER),
        event_type: header(&headers, EVENT_HEADER),
        delivery_id: header(&headers, DELIVERY_HEADER),
        body: &body,
    })?;
    let status = match ack {
        IntakeAck::Accepted { .. } => StatusCode::ACCEPTED,
        IntakeAck::Pong { .. } | IntakeAck::Ignored { .. } => StatusCode::OK,
    };
    Ok((status, Json(ack)))
}

async fn concurrency(State(state): State<WebState>) -> Json<ConcurrencyStats> {
    Json(state.lifecycle().concurrency_stats())
}

async fn list_tasks(
    State(state): State<WebState>,
    Query(params): Query<TaskListParams>,
) -> Result<Json<TaskListResponse>, WebError> {
    let query = params.into_query()?;
    Ok(Json(state.lifecycle().list(&query)?.into()))
}

async fn task_stats(State(state): State<WebState>) -> Result<Json<TaskStats>, WebError> {
    Ok(Json(state.lifecycle().stats()?))
}

async fn tasks_for_issue(
    State(state): State<WebState>,
    Path(issue_number): Path<u64>,
) -> Result<Json<IssueTasksResponse>, WebError> {
    let tasks = state.lifecycle().tasks_for_issue(issue_number)?;
    Ok(Json(IssueTasksResponse {
        issue_number,
        tasks,
    }))
}

async fn get_task(
    State(state): State<WebState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskDetail>, WebError> {
    Ok(Json(state.lifecycle().get(&TaskId::new(task_id))?))
}

async fn cancel_task(
    State(state): State<WebState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, WebError> {
    Ok(Json(state.lifecycle().cancel(&TaskId::new(task_id))?))
}

async fn retry_task(
    State(state): State<WebState>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<Task>), WebError> {
    let task = state.lifecycle().retry(&TaskId::new(task_id)).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

async fn stream_logs(
    State(state): State<WebState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, WebError> {
    let task_id = TaskId::new(task_id);
    let subscription = state.lifecycle().subscribe_logs(&task_id)?;

    let (tx, rx) = mpsc::channel(LOG_STREAM_BUFFER);
    tokio::spawn(forward_logs(task_id, subscription, tx));

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<SseEvent, Infallible>(
            SseEvent::default()
                .event(log_event_name(&event))
                .data(log_event_data(&event)),
        )
    });
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    ))
}

/// Backlog first, then live events until the task is done or the client
/// goes away.
async fn forward_logs(task_id: TaskId, subscription: LogStream, tx: mpsc::Sender<LogEvent>) {
    for entry in subscription.backlog {
        if tx.send(LogEvent::Entry(entry)).await.is_err() {
            return;
        }
    }
    if let Some(status) = subscription.finished {
        let _ = tx.send(LogEvent::Done { status }).await;
        return;
    }
    let Some(mut live) = subscription.live else {
        return;
    };

    loop {
        match live.recv().await {
            Ok(event) => {
                let done = matches!(event, LogEvent::Done { .. });
                if tx.send(event).await.is_err() || done {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(task_id = %task_id, skipped, "log subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
