use std::time::Duration;

/// What a pool does with a submission when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RejectionPolicy {
    /// Run the task on the submitting thread. The task still gets its own
    /// context copy, and the caller's context is restored afterward.
    #[default]
    CallerRuns,
    /// Fail the submission with `TaskError::Rejected`.
    Abort,
}

/// Worker pool sizing and naming.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Fixed for the pool's lifetime.
    pub workers: usize,
    /// Maximum number of tasks waiting for a free worker.
    pub queue_capacity: usize,
    /// Worker threads are named `{prefix}{index}`, starting at 1.
    pub thread_name_prefix: String,
    /// Behaviour when `queue_capacity` tasks are already waiting.
    pub rejection: RejectionPolicy,
    /// How long shutdown waits for queued and running tasks to finish.
    pub await_termination: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            thread_name_prefix: "AsyncThread-".to_string(),
            rejection: RejectionPolicy::CallerRuns,
            await_termination: Duration::from_secs(60),
        }
    }
}

/// Simulated work durations for the demo task service.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Time a single async task spends "working".
    pub work_delay: Duration,
    /// Time spent on each item of a batch task.
    pub batch_item_delay: Duration,
}

impl TaskConfig {
    /// No simulated work at all; used by tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            work_delay: Duration::ZERO,
            batch_item_delay: Duration::ZERO,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            work_delay: Duration::from_millis(100),
            batch_item_delay: Duration::from_millis(50),
        }
    }
}
