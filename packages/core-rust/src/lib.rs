//! Baton Core: request context record, thread-affine context cell, and
//! propagation of context copies onto worker threads.
//!
//! ```
//! use baton_core::{ContextExecutor, SystemContext, ThreadPerTask};
//!
//! let executor = ContextExecutor::new(ThreadPerTask);
//! let cell = executor.cell();
//! cell.set(SystemContext::create_default().with_user_id("u1"));
//!
//! let handle = executor.submit(move || cell.user_id());
//! assert_eq!(handle.join().unwrap().as_deref(), Some("u1"));
//! ```

pub mod cell;
pub mod context;
pub mod executor;
pub mod propagate;

pub use cell::{ContextCell, ContextSlot};
pub use context::{generate_request_id, SystemContext};
pub use executor::{ContextExecutor, ThreadPerTask, WorkerPool};
pub use propagate::{ContextScope, InstallGuard, Propagated, Snapshot};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
