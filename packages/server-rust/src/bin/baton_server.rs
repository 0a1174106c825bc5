use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use baton_core::ContextExecutor;
use baton_server::service::RejectionPolicy;
use baton_server::{NetworkConfig, NetworkModule, PoolConfig, TaskConfig, TaskService, WorkerThreadPool};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Baton - request context propagation demo server
#[derive(Parser, Debug)]
#[command(name = "baton-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host address to bind the server to
    #[arg(long, short = 'H', default_value = "0.0.0.0", env = "BATON_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, short, default_value = "8080", env = "BATON_PORT")]
    port: u16,

    /// Number of worker threads in the task pool
    #[arg(long, default_value = "5", env = "BATON_WORKERS")]
    workers: usize,

    /// Tasks allowed to wait for a free worker
    #[arg(long, default_value = "100", env = "BATON_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Worker thread name prefix
    #[arg(long, default_value = "AsyncThread-", env = "BATON_THREAD_PREFIX")]
    thread_prefix: String,

    /// What to do with a task when the queue is full
    #[arg(long, value_enum, default_value_t = RejectionPolicy::CallerRuns, env = "BATON_REJECTION")]
    rejection: RejectionPolicy,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", env = "BATON_REQUEST_TIMEOUT")]
    request_timeout: u64,

    /// Seconds to wait for the worker pool to drain on shutdown
    #[arg(long, default_value = "60", env = "BATON_SHUTDOWN_TIMEOUT")]
    shutdown_timeout: u64,

    /// Simulated work per async task, in milliseconds
    #[arg(long, default_value = "100", env = "BATON_TASK_DELAY_MS")]
    task_delay_ms: u64,

    /// Simulated work per batch item, in milliseconds
    #[arg(long, default_value = "50", env = "BATON_BATCH_ITEM_DELAY_MS")]
    batch_item_delay_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "BATON_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout),
            ..NetworkConfig::default()
        }
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            thread_name_prefix: self.thread_prefix.clone(),
            rejection: self.rejection,
            await_termination: Duration::from_secs(self.shutdown_timeout),
        }
    }

    fn task_config(&self) -> TaskConfig {
        TaskConfig {
            work_delay: Duration::from_millis(self.task_delay_ms),
            batch_item_delay: Duration::from_millis(self.batch_item_delay_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let executor = Arc::new(ContextExecutor::new(WorkerThreadPool::start(cli.pool_config())?));
    let tasks = TaskService::new(Arc::clone(&executor), cli.task_config());

    let mut network = NetworkModule::new(cli.network_config(), tasks);
    let port = network.start().await?;
    info!(port, "Baton server listening");

    network.serve(shutdown_signal()).await?;

    if !executor.pool().shutdown().await {
        warn!("Worker pool shutdown timed out; abandoning remaining tasks");
    }
    info!("Server stopped");
    Ok(())
}

/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        () = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_configs() {
        let cli = Cli::try_parse_from(["baton-server"]).unwrap();
        let pool = cli.pool_config();
        let defaults = PoolConfig::default();
        assert_eq!(pool.workers, defaults.workers);
        assert_eq!(pool.queue_capacity, defaults.queue_capacity);
        assert_eq!(pool.thread_name_prefix, defaults.thread_name_prefix);
        assert_eq!(pool.rejection, defaults.rejection);
        assert_eq!(pool.await_termination, defaults.await_termination);
        assert_eq!(cli.task_config().work_delay, TaskConfig::default().work_delay);
        assert_eq!(cli.network_config().port, 8080);
    }

    #[test]
    fn default_log_filter_is_info() {
        assert_eq!(DEFAULT_LOG_FILTER, "info");
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
