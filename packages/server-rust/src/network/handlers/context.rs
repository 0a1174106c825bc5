//! Context demo endpoints.
//!
//! Every handler runs inside the request boundary, so the cell in
//! `AppState` holds this request's record for the whole handler, across
//! `.await` points included. Task endpoints hand a copy of that record to
//! the worker pool and report what the workers saw next to what the
//! request still sees afterwards.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use baton_core::ContextCell;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::AppState;
use crate::service::{current_thread_name, TaskError};

/// Error returned by task endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self, %status, "Task endpoint failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    pub task_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchParams {
    pub batch_name: String,
    #[serde(default = "default_batch_count")]
    pub count: u32,
}

/// Largest batch accepted by `batch-task`.
pub const MAX_BATCH_COUNT: u32 = 100;

fn default_batch_count() -> u32 {
    5
}

/// The request's own view of its context, reported after tasks finish.
fn main_thread_context(cell: ContextCell) -> Value {
    json!({
        "clientIp": cell.client_ip(),
        "requestId": cell.request_id(),
        "threadName": current_thread_name(),
    })
}

/// `GET /api/context`
pub async fn get_context_handler(State(state): State<AppState>) -> Json<Value> {
    let cell = state.cell;
    let ctx = cell.get();
    info!(context = %ctx, "Returning current context");
    Json(json!({
        "clientIp": ctx.client_ip(),
        "userId": ctx.user_id(),
        "username": ctx.username(),
        "requestId": cell.request_id(),
        "requestPath": ctx.request_path(),
        "requestMethod": ctx.request_method(),
        "userAgent": ctx.user_agent(),
        "threadName": current_thread_name(),
    }))
}

/// `POST /api/context/user?userId=..&username=..`
pub async fn set_user_handler(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Json<Value> {
    let cell = state.cell;
    info!(user_id = %params.user_id, username = %params.username, "Setting user info");
    cell.set_user_id(params.user_id);
    cell.set_username(params.username);
    Json(json!({
        "message": "User info set successfully",
        "userId": cell.user_id(),
        "username": cell.username(),
        "requestId": cell.request_id(),
    }))
}

/// `POST /api/context/async-task?taskName=..`
pub async fn async_task_handler(
    State(state): State<AppState>,
    Query(params): Query<TaskParams>,
) -> Result<Json<Value>, ApiError> {
    info!(task = %params.task_name, "Executing async task");
    let report = state
        .tasks
        .process_async_task(params.task_name.as_str())
        .join()
        .await?;
    Ok(Json(json!({
        "taskName": params.task_name,
        "result": report.summary(),
        "report": report,
        "mainThreadContext": main_thread_context(state.cell),
    })))
}

/// `POST /api/context/batch-task?batchName=..&count=5`
pub async fn batch_task_handler(
    State(state): State<AppState>,
    Query(params): Query<BatchParams>,
) -> Result<Json<Value>, ApiError> {
    if params.count > MAX_BATCH_COUNT {
        return Err(ApiError::BadRequest(format!(
            "count must be at most {MAX_BATCH_COUNT}, got {}",
            params.count
        )));
    }
    info!(batch = %params.batch_name, count = params.count, "Executing batch task");
    let report = state
        .tasks
        .process_batch_task(params.batch_name.as_str(), params.count)
        .join()
        .await?;
    Ok(Json(json!({
        "batchName": params.batch_name,
        "count": params.count,
        "result": report.summary(),
        "report": report,
        "mainThreadContext": main_thread_context(state.cell),
    })))
}

/// `POST /api/context/concurrent-tasks`
pub async fn concurrent_tasks_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    info!("Executing concurrent tasks");
    // All three capture the record before any of them is awaited.
    let first = state.tasks.process_async_task("Task-1");
    let second = state.tasks.process_async_task("Task-2");
    let third = state.tasks.process_async_task("Task-3");
    let (task1, task2, task3) = tokio::try_join!(first.join(), second.join(), third.join())?;
    Ok(Json(json!({
        "task1": task1.summary(),
        "task2": task2.summary(),
        "task3": task3.summary(),
        "reports": [task1, task2, task3],
        "mainThreadContext": main_thread_context(state.cell),
    })))
}

/// `POST /api/context/print`
pub async fn print_context_handler(State(state): State<AppState>) -> Json<Value> {
    let cell = state.cell;
    cell.log_current();
    Json(json!({
        "message": "Context printed to logs",
        "context": {
            "clientIp": cell.client_ip(),
            "userId": cell.user_id(),
            "username": cell.username(),
            "requestId": cell.request_id(),
            "threadName": current_thread_name(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_maps_to_internal_server_error() {
        let response = ApiError::from(TaskError::Rejected).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_maps_to_400() {
        let response = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn batch_count_defaults_to_five() {
        let Query(params): Query<BatchParams> =
            Query::try_from_uri(&"/x?batchName=nightly".parse().unwrap()).unwrap();
        assert_eq!(params.batch_name, "nightly");
        assert_eq!(params.count, 5);
    }
}
