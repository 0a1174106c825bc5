//! Submission seam between context propagation and a worker pool.
//!
//! The core needs exactly one thing from a pool: accept a unit of work and
//! hand back something that resolves to its result. [`WorkerPool`] names
//! that contract; [`ContextExecutor`] decorates any pool so every submission
//! carries a copy of the submitter's context.

use std::thread;

use crate::cell::ContextCell;

/// A pool that runs submitted closures on some thread and returns a handle
/// to the eventual result.
pub trait WorkerPool {
    /// Handle returned for a submission producing `T`.
    type Handle<T: Send + 'static>;

    /// Schedules `work` for execution.
    fn submit<F, T>(&self, work: F) -> Self::Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static;
}

/// Runs every submission on a freshly spawned OS thread.
///
/// Threads are never reused, so this pool cannot leak context between
/// tasks even without propagation; it exists for tools and tests that
/// want the submit contract without a pool's lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPerTask;

impl WorkerPool for ThreadPerTask {
    type Handle<T: Send + 'static> = thread::JoinHandle<T>;

    fn submit<F, T>(&self, work: F) -> Self::Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        thread::spawn(work)
    }
}

/// Wraps a [`WorkerPool`] so that submitted work runs under a copy of the
/// submitting thread's context.
///
/// Capture happens synchronously inside [`submit`](Self::submit), on the
/// caller's thread. The executing thread's own context is restored when
/// the work returns or panics.
#[derive(Debug, Clone)]
pub struct ContextExecutor<P> {
    pool: P,
    cell: ContextCell,
}

impl<P: WorkerPool> ContextExecutor<P> {
    /// Wraps `pool`, propagating through the default cell.
    #[must_use]
    pub fn new(pool: P) -> Self {
        Self::with_cell(pool, ContextCell::new())
    }

    #[must_use]
    pub fn with_cell(pool: P, cell: ContextCell) -> Self {
        Self { pool, cell }
    }

    #[must_use]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    #[must_use]
    pub fn cell(&self) -> ContextCell {
        self.cell
    }

    /// Captures the current context and submits `work` to the pool.
    pub fn submit<F, T>(&self, work: F) -> P::Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = self.cell.propagate(work);
        self.pool.submit(move || task.run())
    }

    /// Submits `work` without propagation: it sees whatever the executing
    /// thread already holds (normally nothing, or a lazy default).
    pub fn submit_detached<F, T>(&self, work: F) -> P::Handle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SystemContext;

    #[test]
    fn thread_per_task_runs_work() {
        let handle = ThreadPerTask.submit(|| 21 * 2);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn submit_propagates_a_copy() {
        let executor = ContextExecutor::new(ThreadPerTask);
        let cell = executor.cell();
        cell.set(
            SystemContext::create_default()
                .with_client_ip("10.0.0.1")
                .with_user_id("u1"),
        );

        let handle = executor.submit(move || {
            let seen = (cell.client_ip(), cell.user_id());
            cell.set_user_id("u2");
            seen
        });
        let (ip, user) = handle.join().unwrap();

        assert_eq!(ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(user.as_deref(), Some("u1"));
        assert_eq!(cell.user_id().as_deref(), Some("u1"));
    }

    #[test]
    fn capture_happens_at_submission() {
        let executor = ContextExecutor::new(ThreadPerTask);
        let cell = executor.cell();
        cell.set(SystemContext::new().with_username("before"));

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let handle = executor.submit(move || {
            rx.recv().unwrap();
            cell.username()
        });
        cell.set_username("after");
        tx.send(()).unwrap();

        assert_eq!(handle.join().unwrap().as_deref(), Some("before"));
    }

    #[test]
    fn detached_submission_sees_no_request_context() {
        let executor = ContextExecutor::new(ThreadPerTask);
        let cell = executor.cell();
        cell.set(SystemContext::new().with_username("alice"));

        let seen = executor
            .submit_detached(move || cell.peek())
            .join()
            .unwrap();

        assert!(seen.is_none());
    }

    #[test]
    fn panic_reaches_the_handle() {
        let executor = ContextExecutor::new(ThreadPerTask);
        let handle = executor.submit(|| -> u32 { panic!("worker failed") });

        let payload = handle.join().unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker failed"));
    }
}
