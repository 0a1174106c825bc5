//! Health endpoint handler.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use super::AppState;

/// Returns service status plus worker pool occupancy.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pool = state.tasks.pool();
    let status = if pool.is_shut_down() { "DOWN" } else { "UP" };
    Json(json!({
        "status": status,
        "message": "Context propagation demo service is running",
        "timestamp": Utc::now().timestamp_millis(),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "workers": pool.worker_count(),
        "queued": pool.queued(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use baton_core::{ContextCell, ContextExecutor};

    use super::*;
    use crate::service::config::{PoolConfig, TaskConfig};
    use crate::service::{TaskService, WorkerThreadPool};

    fn test_state(workers: usize) -> AppState {
        let pool = WorkerThreadPool::start(PoolConfig {
            workers,
            ..PoolConfig::default()
        })
        .unwrap();
        AppState {
            cell: ContextCell::new(),
            tasks: TaskService::new(Arc::new(ContextExecutor::new(pool)), TaskConfig::immediate()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let response = health_handler(State(test_state(3))).await;
        let json = response.0;

        assert_eq!(json["status"], "UP");
        assert!(json["message"].is_string());
        assert!(json["timestamp"].as_i64().unwrap() > 0);
        assert!(json["uptimeSecs"].is_number());
        assert_eq!(json["workers"], 3);
        assert_eq!(json["queued"], 0);
    }

    #[tokio::test]
    async fn health_handler_reports_down_after_pool_shutdown() {
        let state = test_state(1);
        assert!(state.tasks.pool().shutdown().await);

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["status"], "DOWN");
        assert_eq!(response.0["workers"], 0);
    }
}
