//! Capture, install, and restore: moving a context copy across threads.
//!
//! Propagation has three phases:
//!
//! 1. **Capture** on the submitting thread: [`ContextCell::capture`] clones
//!    the current record into an owned [`Snapshot`].
//! 2. **Install** on the executing thread: [`Snapshot::install`] swaps the
//!    snapshot into that thread's slot and remembers what was there.
//! 3. **Restore**: dropping the returned [`InstallGuard`] puts the previous
//!    slot contents back (or empties the slot). Drop also runs during panic
//!    unwinding, so a failing task cannot leave its context behind on a
//!    pooled thread.
//!
//! [`Propagated`] applies the phases around a closure, [`ContextScope`]
//! around every poll of a future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::debug;

use crate::cell::ContextCell;
use crate::context::SystemContext;

impl ContextCell {
    /// Captures an independent copy of the current thread's context.
    #[must_use]
    pub fn capture(&self) -> Snapshot {
        Snapshot::new(*self, self.get())
    }

    /// Captures the current context and wraps `work` so that it runs with
    /// that copy installed, wherever it ends up executing.
    #[must_use]
    pub fn propagate<F, R>(&self, work: F) -> Propagated<F>
    where
        F: FnOnce() -> R,
    {
        self.capture().wrap(work)
    }

    /// Captures the current context and wraps `fut` so that every poll
    /// runs with that copy installed.
    #[must_use]
    pub fn propagate_future<F: Future>(&self, fut: F) -> ContextScope<F> {
        self.capture().scope(fut)
    }

    /// Runs `fut` with `ctx` as its context. Used at request ingress, where
    /// the record is built from the request rather than captured.
    #[must_use]
    pub fn scope<F: Future>(&self, ctx: SystemContext, fut: F) -> ContextScope<F> {
        Snapshot::new(*self, ctx).scope(fut)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An owned context copy bound to the cell it will be installed into.
#[derive(Debug, Clone)]
pub struct Snapshot {
    cell: ContextCell,
    ctx: SystemContext,
}

impl Snapshot {
    #[must_use]
    pub fn new(cell: ContextCell, ctx: SystemContext) -> Self {
        Self { cell, ctx }
    }

    #[must_use]
    pub fn context(&self) -> &SystemContext {
        &self.ctx
    }

    #[must_use]
    pub fn into_context(self) -> SystemContext {
        self.ctx
    }

    /// Installs the snapshot into the current thread's slot.
    ///
    /// The slot's previous contents are restored when the guard drops.
    pub fn install(self) -> InstallGuard {
        let previous = self.cell.replace(Some(self.ctx));
        InstallGuard {
            cell: self.cell,
            previous: Some(previous),
        }
    }

    /// Wraps a closure with install-and-restore.
    #[must_use]
    pub fn wrap<F, R>(self, work: F) -> Propagated<F>
    where
        F: FnOnce() -> R,
    {
        Propagated {
            snapshot: self,
            work,
        }
    }

    /// Wraps a future with per-poll install-and-restore.
    #[must_use]
    pub fn scope<F: Future>(self, fut: F) -> ContextScope<F> {
        ContextScope {
            cell: self.cell,
            ctx: Some(self.ctx),
            inner: Box::pin(fut),
        }
    }
}

// ---------------------------------------------------------------------------
// InstallGuard
// ---------------------------------------------------------------------------

/// Restores a thread's previous context when dropped.
#[must_use = "dropping the guard immediately restores the previous context"]
#[derive(Debug)]
pub struct InstallGuard {
    cell: ContextCell,
    /// `Some` until restored; the inner option is the prior slot contents.
    previous: Option<Option<SystemContext>>,
}

impl InstallGuard {
    /// Restores the previous context now and returns the record that was
    /// installed, including any in-place changes made while it was.
    pub fn finish(mut self) -> Option<SystemContext> {
        let previous = self.previous.take().unwrap_or(None);
        self.cell.replace(previous)
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.cell.replace(previous);
        }
    }
}

// ---------------------------------------------------------------------------
// Propagated
// ---------------------------------------------------------------------------

/// A closure paired with the context it must run under.
///
/// `Propagated<F>` is `Send` whenever `F` is, so it can be handed to any
/// pool; the context it carries is an owned copy.
#[derive(Debug)]
pub struct Propagated<F> {
    snapshot: Snapshot,
    work: F,
}

impl<F> Propagated<F> {
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Runs the work with the captured context installed on the calling
    /// thread, then restores that thread's previous context. A panic in
    /// the work propagates after the restore.
    pub fn run<R>(self) -> R
    where
        F: FnOnce() -> R,
    {
        let Self { snapshot, work } = self;
        debug!(context = %snapshot.ctx, "Running propagated task");
        let _guard = snapshot.install();
        work()
    }
}

// ---------------------------------------------------------------------------
// ContextScope
// ---------------------------------------------------------------------------

/// Future adapter that runs each poll of the inner future with its own
/// context installed.
///
/// A task may move between runtime threads at every `.await`, so the record
/// lives in the adapter between polls and only occupies a thread's slot
/// while that thread is polling it. Changes made during one poll are
/// carried into the next.
#[must_use = "futures do nothing unless polled"]
pub struct ContextScope<F> {
    cell: ContextCell,
    ctx: Option<SystemContext>,
    inner: Pin<Box<F>>,
}

impl<F> ContextScope<F> {
    /// The record as of the end of the last poll.
    #[must_use]
    pub fn context(&self) -> Option<&SystemContext> {
        self.ctx.as_ref()
    }
}

impl<F> std::fmt::Debug for ContextScope<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextScope")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl<F: Future> Future for ContextScope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Only empty if a previous poll panicked; the record went with it.
        let ctx = this.ctx.take().unwrap_or_else(SystemContext::create_default);
        let guard = Snapshot::new(this.cell, ctx).install();
        let poll = this.inner.as_mut().poll(cx);
        this.ctx = guard.finish();
        poll
    }
}
