//! Fixed-size pool of reusable OS worker threads.
//!
//! Tasks travel through a bounded mpsc queue shared by all workers. Each
//! task's panic is caught on the worker so the thread survives and picks up
//! the next task; the panic payload is delivered to the task's
//! [`TaskHandle`] untouched. Because threads are reused, anything a task
//! leaves in thread-local storage is visible to the next task on that
//! thread. Submitting through `baton_core::ContextExecutor` is what keeps
//! that from happening for the request context.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use baton_core::WorkerPool;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::{PoolConfig, RejectionPolicy};

type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// Why a [`TaskHandle`] did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task panicked. Holds the original panic payload.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
    /// The pool refused the task (shut down, or full under `Abort`).
    #[error("task rejected: worker pool is shut down or saturated")]
    Rejected,
    /// The task was dropped without running to completion.
    #[error("task was dropped before it completed")]
    Cancelled,
}

impl TaskError {
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Returns the original panic payload, if the task panicked. Pass it to
    /// `std::panic::resume_unwind` to re-raise the panic on this thread.
    #[must_use]
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            Self::Panicked(payload) => Some(payload.0),
            _ => None,
        }
    }
}

/// A panic payload as caught on the worker thread.
pub struct PanicPayload(Box<dyn Any + Send + 'static>);

impl PanicPayload {
    /// Best-effort text of the payload.
    #[must_use]
    pub fn message(&self) -> &str {
        let payload: &(dyn Any + Send) = &*self.0;
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        }
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicPayload").field(&self.message()).finish()
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Handle to the eventual result of a submitted task.
#[must_use = "dropping a handle discards the task's result"]
#[derive(Debug)]
pub struct TaskHandle<T> {
    /// `None` when the pool rejected the task at submission.
    rx: Option<oneshot::Receiver<thread::Result<T>>>,
}

impl<T> TaskHandle<T> {
    fn rejected() -> Self {
        Self { rx: None }
    }

    /// Waits for the task without blocking the async runtime.
    ///
    /// # Errors
    ///
    /// Returns the task's panic, a rejection, or a cancellation.
    pub async fn join(self) -> Result<T, TaskError> {
        let Some(rx) = self.rx else {
            return Err(TaskError::Rejected);
        };
        Self::resolve(rx.await)
    }

    /// Blocks the current thread until the task finishes.
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub fn blocking_join(self) -> Result<T, TaskError> {
        let Some(rx) = self.rx else {
            return Err(TaskError::Rejected);
        };
        Self::resolve(rx.blocking_recv())
    }

    fn resolve(
        received: Result<thread::Result<T>, oneshot::error::RecvError>,
    ) -> Result<T, TaskError> {
        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(TaskError::Panicked(PanicPayload(payload))),
            Err(_) => Err(TaskError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerThreadPool
// ---------------------------------------------------------------------------

/// A fixed set of named worker threads fed by a bounded queue.
///
/// Lifecycle:
/// 1. `start()` -- spawns the workers
/// 2. `submit()` -- enqueues tasks; a full queue applies the `RejectionPolicy`
/// 3. `shutdown()` -- closes the queue, lets workers drain it, joins them
///
/// Dropping the pool closes the queue without waiting; workers finish the
/// queued tasks and exit on their own.
pub struct WorkerThreadPool {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    config: PoolConfig,
}

impl WorkerThreadPool {
    /// Spawns `config.workers` threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration asks for zero workers or a
    /// zero-capacity queue, or if the OS refuses to spawn a thread.
    pub fn start(config: PoolConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(config.workers > 0, "worker pool needs at least one worker");
        anyhow::ensure!(
            config.queue_capacity > 0,
            "worker pool queue capacity must be positive"
        );

        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.workers);
        for index in 1..=config.workers {
            let name = format!("{}{index}", config.thread_name_prefix);
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&rx))
                .with_context(|| format!("failed to spawn worker thread {name}"))?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            prefix = %config.thread_name_prefix,
            "Worker pool started"
        );

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of worker threads still owned by the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Enqueues `work` and returns a handle to its result.
    pub fn submit<F, T>(&self, work: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work));
            // The receiver is gone if the caller dropped the handle.
            let _ = tx.send(outcome);
        });

        let Some(sender) = self.sender.read().clone() else {
            debug!("Worker pool is shut down, rejecting task");
            return TaskHandle::rejected();
        };

        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => match self.config.rejection {
                RejectionPolicy::CallerRuns => run_on_caller(job),
                RejectionPolicy::Abort => {
                    warn!(
                        queue_capacity = self.config.queue_capacity,
                        "Worker queue full, rejecting task"
                    );
                    return TaskHandle::rejected();
                }
            },
            Err(TrySendError::Closed(_)) => return TaskHandle::rejected(),
        }

        TaskHandle { rx: Some(rx) }
    }

    /// Closes the queue and waits up to `config.await_termination` for the
    /// workers to finish queued and running tasks.
    ///
    /// Returns `true` if every worker exited in time. Later submissions are
    /// rejected either way.
    pub async fn shutdown(&self) -> bool {
        let workers = self.close();
        let count = workers.len();
        let timeout = self.config.await_termination;

        let join = tokio::task::spawn_blocking(move || {
            for worker in workers {
                // Tasks never unwind out of the worker loop.
                let _ = worker.join();
            }
        });

        if let Ok(joined) = tokio::time::timeout(timeout, join).await {
            if joined.is_ok() {
                info!(workers = count, "Worker pool shut down");
                return true;
            }
        }
        warn!(
            timeout_secs = timeout.as_secs(),
            "Worker pool did not terminate in time"
        );
        false
    }

    /// Closes the queue and blocks until every worker has exited.
    pub fn shutdown_blocking(&self) {
        for worker in self.close() {
            let _ = worker.join();
        }
    }

    fn close(&self) -> Vec<thread::JoinHandle<()>> {
        self.sender.write().take();
        std::mem::take(&mut *self.workers.lock())
    }
}

impl Drop for WorkerThreadPool {
    fn drop(&mut self) {
        self.sender.write().take();
    }
}

impl fmt::Debug for WorkerThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThreadPool")
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .field("config", &self.config)
            .finish()
    }
}

impl WorkerPool for WorkerThreadPool {
    type Handle<T: Send + 'static> = TaskHandle<T>;

    fn submit<F, T>(&self, work: F) -> Self::Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        WorkerThreadPool::submit(self, work)
    }
}

/// Runs an overflow job for the submitter without stalling an async runtime.
///
/// Outside a runtime the job runs inline. On a multi-thread runtime it runs
/// inline under `block_in_place`, so the worker's other tasks move to another
/// thread meanwhile. A current-thread runtime cannot do that, so the job goes
/// to its blocking pool instead; the handle resolves the same way.
fn run_on_caller(job: Job) {
    match Handle::try_current() {
        Err(_) => {
            debug!("Worker queue full, running task on the caller thread");
            job();
        }
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            debug!("Worker queue full, running task on the caller thread in block_in_place");
            tokio::task::block_in_place(job);
        }
        Ok(handle) => {
            debug!("Worker queue full, running task on the runtime's blocking pool");
            drop(handle.spawn_blocking(job));
        }
    }
}

/// Pulls jobs until the queue is closed and drained.
fn worker_loop(rx: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        // The lock is released before the job runs.
        let job = rx.lock().blocking_recv();
        match job {
            Some(job) => job(),
            None => break,
        }
    }
    debug!("Worker thread exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    use super::*;

    fn config(workers: usize, queue_capacity: usize) -> PoolConfig {
        PoolConfig {
            workers,
            queue_capacity,
            thread_name_prefix: "test-worker-".to_string(),
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = WorkerThreadPool::start(config(2, 16)).unwrap();
        let count = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let count = Arc::clone(&count);
                pool.submit(move || count.fetch_add(1, Ordering::SeqCst))
            })
            .collect();
        for handle in handles {
            handle.join().await.unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(pool.shutdown().await);
    }

    #[tokio::test]
    async fn workers_are_named_with_prefix() {
        let pool = WorkerThreadPool::start(config(1, 4)).unwrap();
        let name = pool
            .submit(|| thread::current().name().map(str::to_owned))
            .join()
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-1"));
    }

    #[tokio::test]
    async fn panic_is_reported_and_worker_survives() {
        let pool = WorkerThreadPool::start(config(1, 4)).unwrap();

        let err = pool
            .submit(|| -> u32 { panic!("task exploded") })
            .join()
            .await
            .unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "task panicked: task exploded");
        let payload = err.into_panic().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"task exploded"));

        // The single worker is still alive.
        let value = pool.submit(|| 7).join().await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = WorkerThreadPool::start(config(1, 4)).unwrap();
        assert!(pool.shutdown().await);
        assert!(pool.is_shut_down());

        let err = pool.submit(|| 1).join().await.unwrap_err();
        assert!(matches!(err, TaskError::Rejected));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let pool = WorkerThreadPool::start(config(1, 8)).unwrap();
        let count = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let count = Arc::clone(&count);
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        assert!(pool.shutdown().await);
        assert_eq!(count.load(Ordering::SeqCst), 4);
        for handle in handles {
            handle.join().await.unwrap();
        }
    }

    #[test]
    fn caller_runs_when_queue_is_full() {
        let pool = WorkerThreadPool::start(config(1, 1)).unwrap();
        let gate = Arc::new(Barrier::new(2));

        // Occupy the only worker, then fill the single queue slot.
        let blocker = {
            let gate = Arc::clone(&gate);
            pool.submit(move || {
                gate.wait();
            })
        };
        while pool.queued() > 0 {
            thread::yield_now();
        }
        let queued = pool.submit(|| thread::current().name().map(str::to_owned));

        let caller = thread::current().name().map(str::to_owned);
        let overflow = pool
            .submit(|| thread::current().name().map(str::to_owned))
            .blocking_join()
            .unwrap();
        assert_eq!(overflow, caller);

        gate.wait();
        blocker.blocking_join().unwrap();
        assert_eq!(
            queued.blocking_join().unwrap().as_deref(),
            Some("test-worker-1")
        );
        pool.shutdown_blocking();
    }

    #[test]
    fn abort_rejects_when_queue_is_full() {
        let pool = WorkerThreadPool::start(PoolConfig {
            rejection: RejectionPolicy::Abort,
            ..config(1, 1)
        })
        .unwrap();
        let gate = Arc::new(Barrier::new(2));

        let blocker = {
            let gate = Arc::clone(&gate);
            pool.submit(move || {
                gate.wait();
            })
        };
        while pool.queued() > 0 {
            thread::yield_now();
        }
        let queued = pool.submit(|| 1);
        assert_eq!(pool.queued(), 1);

        let err = pool.submit(|| 2).blocking_join().unwrap_err();
        assert!(matches!(err, TaskError::Rejected));

        gate.wait();
        blocker.blocking_join().unwrap();
        assert_eq!(queued.blocking_join().unwrap(), 1);
        pool.shutdown_blocking();
    }

    /// Fills a 1-worker, 1-slot pool: the worker waits for `release`, the
    /// slot holds a no-op. The next submission overflows.
    async fn saturated_pool() -> (
        Arc<WorkerThreadPool>,
        std::sync::mpsc::Sender<()>,
        Vec<TaskHandle<()>>,
    ) {
        let pool = Arc::new(WorkerThreadPool::start(config(1, 1)).unwrap());
        let (release, hold) = std::sync::mpsc::channel::<()>();
        let blocker = pool.submit(move || {
            let _ = hold.recv();
        });
        while pool.queued() > 0 {
            tokio::task::yield_now().await;
        }
        let queued = pool.submit(|| ());
        (pool, release, vec![blocker, queued])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn caller_runs_does_not_stall_runtime_worker() {
        let (pool, release, pending) = saturated_pool().await;
        let ticks = Arc::new(AtomicU32::new(0));

        // Both tasks share the single runtime worker.
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let submitter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(|| thread::sleep(Duration::from_millis(300)))
                    .join()
                    .await
            })
        };

        submitter.await.unwrap().unwrap();
        ticker.abort();
        assert!(
            ticks.load(Ordering::SeqCst) >= 5,
            "ticker stalled while the overflow task ran"
        );

        release.send(()).unwrap();
        for handle in pending {
            handle.join().await.unwrap();
        }
    }

    #[tokio::test]
    async fn caller_runs_on_current_thread_runtime_returns_immediately() {
        let (pool, release, pending) = saturated_pool().await;

        let started = std::time::Instant::now();
        let overflow = pool.submit(|| {
            thread::sleep(Duration::from_millis(200));
            thread::current().name().map(str::to_owned)
        });
        assert!(started.elapsed() < Duration::from_millis(150));

        // The runtime thread is free to run other work meanwhile.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let ran_on = overflow.join().await.unwrap();
        assert_ne!(ran_on, thread::current().name().map(str::to_owned));

        release.send(()).unwrap();
        for handle in pending {
            handle.join().await.unwrap();
        }
    }

    #[test]
    fn config_is_kept_as_started() {
        let pool = WorkerThreadPool::start(config(2, 3)).unwrap();
        assert_eq!(pool.config().workers, 2);
        assert_eq!(pool.config().queue_capacity, 3);
        assert_eq!(pool.config().rejection, RejectionPolicy::CallerRuns);
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown_blocking();
    }

    #[test]
    fn start_rejects_empty_pool() {
        assert!(WorkerThreadPool::start(config(0, 4)).is_err());
        assert!(WorkerThreadPool::start(config(1, 0)).is_err());
    }

    #[test]
    fn dropped_task_reports_cancelled() {
        let (tx, rx) = oneshot::channel::<thread::Result<u32>>();
        drop(tx);
        let handle = TaskHandle { rx: Some(rx) };
        assert!(matches!(handle.blocking_join(), Err(TaskError::Cancelled)));
    }
}
