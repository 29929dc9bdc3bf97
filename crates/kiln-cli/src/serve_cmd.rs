//! `kiln serve`: runs the scheduler tick loop (§4.3) and the HTTP surface
//! (§6) side by side in one process.
//!
//! The SSE endpoints cannot use axum's built-in `Sse`/`Event` wrapper,
//! which re-encodes each event itself: §4.7 requires the history ring's
//! bytes to reach the client exactly as admitted (or rejected) by
//! `HIST_CAP`, frame-for-frame. Both streaming endpoints instead build a
//! raw `Body` from an `async_stream::stream!` over the fan-out's receiver,
//! forwarding already-framed `"data: ...\n\n"` chunks untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use kiln_core::Engine;
use kiln_core::chat::BroadcastChat;
use kiln_db::models::{Task, TaskStats};
use kiln_db::queries::tasks;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    engine: Engine,
    chat: Arc<BroadcastChat>,
}

pub fn build_router(engine: Engine, chat: Arc<BroadcastChat>) -> Router {
    let state = AppState { engine, chat };
    Router::new()
        .route("/stream/task/{id}", get(stream_task))
        .route("/stream/chat", get(stream_chat))
        .route("/stats", get(get_stats))
        .route("/logs", get(get_logs))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/dead-letter", get(list_dead_letter))
        .route("/tasks/{id}/requeue", post(requeue_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(engine: Engine, chat: Arc<BroadcastChat>, bind: &str, port: u16) -> Result<()> {
    let scheduler_engine = engine.clone();
    let scheduler_handle = tokio::spawn(kiln_core::scheduler::run(scheduler_engine));

    let app = build_router(engine.clone(), chat);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("kiln serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.request_stop();
    let _ = scheduler_handle.await;

    tracing::info!("kiln serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("static SSE response headers are always valid")
}

/// `GET /stream/task/{id}`: replay the task's bounded history, then stream
/// everything broadcast to it from this point on (§4.7's "startup
/// hand-off").
async fn stream_task(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let (history, mut rx) = state.engine.stream.subscribe(id);

    let body = Body::from_stream(stream! {
        if !history.is_empty() {
            yield Ok::<_, std::convert::Infallible>(Bytes::from(history));
        }
        while let Some(frame) = rx.recv().await {
            yield Ok(Bytes::from(frame));
        }
    });

    sse_response(body)
}

/// `GET /stream/chat`: live chat notifications (§4.6), framed the same way
/// as task output so a single client-side SSE parser handles both streams.
async fn stream_chat(State(state): State<AppState>) -> Response {
    let mut rx = state.chat.subscribe();

    let body = Body::from_stream(stream! {
        loop {
            match rx.recv().await {
                Ok(line) => yield Ok::<_, std::convert::Infallible>(Bytes::from(format!("data: {line}\n\n"))),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    sse_response(body)
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<TaskStats>, AppError> {
    let stats = tasks::get_stats(&state.engine.pool)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(stats))
}

/// `GET /logs`: snapshot of the Log Ring Buffer (§4.8), oldest entry
/// first, for the web UI's recent-events panel.
async fn get_logs(State(state): State<AppState>) -> Json<Vec<kiln_core::log_ring::LogEntry>> {
    Json(state.engine.log_ring.snapshot())
}

#[derive(serde::Deserialize)]
struct CreateTaskRequest {
    title: String,
    #[serde(default)]
    description: String,
    repo_path: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    created_by: String,
    #[serde(default)]
    notify_chat: String,
}

fn default_mode() -> String {
    "software-engineering".to_string()
}

/// `POST /tasks`: the HTTP-side counterpart to Chat-originated task
/// creation (§6) -- `createTask` with the mode's initial status and
/// default `max_attempts` resolved through the [`kiln_core::modes::ModeRegistry`].
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let mode = state
        .engine
        .registry
        .get(&req.mode)
        .ok_or_else(|| AppError::bad_request(format!("unknown mode: {}", req.mode)))?;

    let task = tasks::create_task(
        &state.engine.pool,
        &req.title,
        &req.description,
        &req.repo_path,
        &req.mode,
        &mode.initial_status,
        mode.default_max_attempts,
        &req.created_by,
        &req.notify_chat,
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(task))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, AppError> {
    let statuses: Vec<String> = state.engine.registry.active_statuses().into_iter().collect();
    let priority = state.engine.registry.status_priority();
    let mut active = tasks::get_active_tasks(&state.engine.pool, &statuses, i64::MAX)
        .await
        .map_err(AppError::internal)?;
    tasks::sort_by_priority(&mut active, &priority);
    Ok(Json(active))
}

async fn list_dead_letter(State(state): State<AppState>) -> Result<Json<Vec<Task>>, AppError> {
    let dead = tasks::get_dead_letter_tasks(&state.engine.pool)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(dead))
}

async fn requeue_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let task = tasks::get_task(&state.engine.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let mode = state
        .engine
        .registry
        .get(&task.mode)
        .ok_or_else(|| AppError::bad_request(format!("unknown mode: {}", task.mode)))?;

    let requeued = tasks::requeue_dead_letter(
        &state.engine.pool,
        id,
        &mode.initial_status,
        mode.default_max_attempts,
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(serde_json::json!({ "requeued": requeued })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
