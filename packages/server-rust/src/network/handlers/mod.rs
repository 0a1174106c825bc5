//! HTTP handler definitions for the Baton server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod context;
pub mod health;

pub use context::{
    async_task_handler, batch_task_handler, concurrent_tasks_handler, get_context_handler,
    print_context_handler, set_user_handler, ApiError,
};
pub use health::health_handler;

use std::time::Instant;

use baton_core::ContextCell;

use crate::service::TaskService;

/// Shared application state passed to all axum handlers via `State`.
///
/// Cloning is cheap: the cell is a `Copy` handle and the task service
/// shares its pool through an `Arc`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Cell the request boundary installs each request's context into.
    pub cell: ContextCell,
    /// Demo task service backed by the worker pool.
    pub tasks: TaskService,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
