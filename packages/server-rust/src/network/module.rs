//! Network module with deferred startup lifecycle.
//!
//! `new()` assembles shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the binary log the bound port (or tests pick an ephemeral
//! one) before any request is accepted.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use baton_core::ContextCell;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    async_task_handler, batch_task_handler, concurrent_tasks_handler, get_context_handler,
    health_handler, print_context_handler, set_user_handler, AppState,
};
use super::middleware::build_http_layers;
use crate::service::TaskService;

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- wires the task service and context cell into shared state
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    tasks: TaskService,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// Creates a network module without binding any port. Requests are
    /// installed into the same cell the task service propagates from.
    #[must_use]
    pub fn new(config: NetworkConfig, tasks: TaskService) -> Self {
        Self {
            config,
            tasks,
            listener: None,
        }
    }

    #[must_use]
    pub fn cell(&self) -> ContextCell {
        self.tasks.executor().cell()
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /api/context` -- current request context
    /// - `POST /api/context/user` -- set user fields on the request context
    /// - `POST /api/context/async-task` -- one task on the worker pool
    /// - `POST /api/context/batch-task` -- one batch task on the worker pool
    /// - `POST /api/context/concurrent-tasks` -- three tasks at once
    /// - `POST /api/context/print` -- log the current context
    /// - `GET /health` -- status and pool occupancy
    pub fn build_router(&self) -> Router {
        let cell = self.cell();
        let state = AppState {
            cell,
            tasks: self.tasks.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/api/context", get(get_context_handler))
            .route("/api/context/user", post(set_user_handler))
            .route("/api/context/async-task", post(async_task_handler))
            .route("/api/context/batch-task", post(batch_task_handler))
            .route("/api/context/concurrent-tasks", post(concurrent_tasks_handler))
            .route("/api/context/print", post(print_context_handler))
            .route("/health", get(health_handler))
            .layer(build_http_layers(&self.config, cell))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then waits for
    /// in-flight requests to finish.
    ///
    /// Peer addresses are exposed to the request boundary through
    /// `ConnectInfo<SocketAddr>`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();

        info!("Serving HTTP connections");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
