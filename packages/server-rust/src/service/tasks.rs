//! Demo task service: asynchronous work that reads the request context on
//! a pool thread.
//!
//! Every task is submitted through a `ContextExecutor`, so it sees a copy
//! of the submitting request's context. Tasks also modify their copy
//! (appending `_async` to the username) to show that changes made on a
//! worker never reach the request's own record.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use baton_core::{ContextCell, ContextExecutor};
use serde::Serialize;
use tracing::{debug, info};

use super::config::TaskConfig;
use super::pool::{TaskHandle, WorkerThreadPool};

/// Name of the current thread, or `"unnamed"`.
#[must_use]
pub fn current_thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_owned()
}

/// What a single async task observed on its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_name: String,
    pub thread_name: String,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub request_id: String,
    /// Username as propagated from the request.
    pub username: Option<String>,
    /// Username after the task rewrote its own copy.
    pub username_after: String,
}

impl TaskReport {
    /// One-line summary, as returned by the HTTP endpoints.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Task '{}' completed successfully. Context: ClientIP={}, UserID={}, RequestID={}",
            self.task_name,
            self.client_ip.as_deref().unwrap_or("null"),
            self.user_id.as_deref().unwrap_or("null"),
            self.request_id,
        )
    }
}

/// What a batch task observed on its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_name: String,
    pub thread_name: String,
    pub count: u32,
    pub client_ip: Option<String>,
    pub request_id: String,
}

impl BatchReport {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Batch task '{}' completed. Processed {} items. Context: ClientIP={}, RequestID={}",
            self.batch_name,
            self.count,
            self.client_ip.as_deref().unwrap_or("null"),
            self.request_id,
        )
    }
}

/// Submits demo tasks to the shared worker pool.
#[derive(Debug, Clone)]
pub struct TaskService {
    executor: Arc<ContextExecutor<WorkerThreadPool>>,
    config: TaskConfig,
}

impl TaskService {
    #[must_use]
    pub fn new(executor: Arc<ContextExecutor<WorkerThreadPool>>, config: TaskConfig) -> Self {
        Self { executor, config }
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<ContextExecutor<WorkerThreadPool>> {
        &self.executor
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerThreadPool {
        self.executor.pool()
    }

    /// Runs one task on the pool under a copy of the caller's context.
    pub fn process_async_task(&self, task_name: impl Into<String>) -> TaskHandle<TaskReport> {
        let task_name = task_name.into();
        let cell = self.executor.cell();
        let delay = self.config.work_delay;
        self.executor
            .submit(move || run_async_task(cell, task_name, delay))
    }

    /// Runs a batch of `count` items on the pool under a copy of the
    /// caller's context.
    pub fn process_batch_task(
        &self,
        batch_name: impl Into<String>,
        count: u32,
    ) -> TaskHandle<BatchReport> {
        let batch_name = batch_name.into();
        let cell = self.executor.cell();
        let item_delay = self.config.batch_item_delay;
        self.executor
            .submit(move || run_batch_task(cell, batch_name, count, item_delay))
    }
}

fn run_async_task(cell: ContextCell, task_name: String, delay: Duration) -> TaskReport {
    let thread_name = current_thread_name();
    let client_ip = cell.client_ip();
    let user_id = cell.user_id();
    let request_id = cell.request_id();
    let username = cell.username();

    info!(
        task = %task_name,
        thread = %thread_name,
        client_ip = client_ip.as_deref().unwrap_or("null"),
        user_id = user_id.as_deref().unwrap_or("null"),
        request_id = %request_id,
        "Async task started"
    );

    if !delay.is_zero() {
        thread::sleep(delay);
    }

    let username_after = format!("{}_async", username.as_deref().unwrap_or("null"));
    cell.set_username(username_after.clone());

    let report = TaskReport {
        task_name,
        thread_name,
        client_ip,
        user_id,
        request_id,
        username,
        username_after,
    };
    info!(task = %report.task_name, result = %report.summary(), "Async task completed");
    report
}

fn run_batch_task(
    cell: ContextCell,
    batch_name: String,
    count: u32,
    item_delay: Duration,
) -> BatchReport {
    let thread_name = current_thread_name();
    let client_ip = cell.client_ip();
    let request_id = cell.request_id();

    info!(
        batch = %batch_name,
        thread = %thread_name,
        client_ip = client_ip.as_deref().unwrap_or("null"),
        request_id = %request_id,
        count,
        "Batch task started"
    );

    for item in 1..=count {
        if !item_delay.is_zero() {
            thread::sleep(item_delay);
        }
        debug!(item, count, thread = %thread_name, "Processed batch item");
    }

    let report = BatchReport {
        batch_name,
        thread_name,
        count,
        client_ip,
        request_id,
    };
    info!(batch = %report.batch_name, result = %report.summary(), "Batch task completed");
    report
}
