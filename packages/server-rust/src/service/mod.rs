//! Worker pool and the demo task service built on it.
//!
//! 1. **Configuration** (`config`): pool sizing, rejection policy, task delays
//! 2. **Pool** (`pool`): fixed set of reusable worker threads with task handles
//! 3. **Tasks** (`tasks`): work that reads the propagated request context

pub mod config;
pub mod pool;
pub mod tasks;

pub use config::{PoolConfig, RejectionPolicy, TaskConfig};
pub use pool::{PanicPayload, TaskError, TaskHandle, WorkerThreadPool};
pub use tasks::{current_thread_name, BatchReport, TaskReport, TaskService};
