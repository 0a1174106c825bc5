//! Thread-affine storage for the current [`SystemContext`].
//!
//! A [`ContextCell`] is a `Copy` handle naming a thread-local slot. Every
//! thread sees its own slot, so the cell needs no locking: concurrency
//! safety comes from never sharing a record between threads, not from
//! synchronizing access to one.
//!
//! Rust cannot hand out references into thread-local storage, so reads
//! return owned copies and in-place mutation goes through [`ContextCell::with`].

use std::cell::RefCell;
use std::thread::LocalKey;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::SystemContext;

/// Storage behind one thread's slot: zero or one record.
pub type ContextSlot = RefCell<Option<SystemContext>>;

/// Declares a thread-local [`ContextSlot`] that a [`ContextCell`] can bind to.
///
/// ```
/// baton_core::context_slot!(static AUDIT_SLOT);
///
/// let cell = baton_core::ContextCell::with_slot(&AUDIT_SLOT);
/// assert!(!cell.is_set());
/// ```
#[macro_export]
macro_rules! context_slot {
    ($(#[$attr:meta])* $vis:vis static $name:ident) => {
        ::std::thread_local! {
            $(#[$attr])*
            $vis static $name: $crate::ContextSlot = const { ::std::cell::RefCell::new(None) };
        }
    };
}

context_slot!(static DEFAULT_SLOT);

/// Handle to a per-thread context slot.
///
/// Cheap to copy and pass around; two handles bound to the same slot
/// observe the same per-thread state. The closure passed to [`with`] must
/// not call back into a cell bound to the same slot (the slot is borrowed
/// mutably for the duration of the closure).
///
/// [`with`]: ContextCell::with
#[derive(Debug, Clone, Copy)]
pub struct ContextCell {
    slot: &'static LocalKey<ContextSlot>,
}

impl ContextCell {
    /// Returns a cell bound to the crate's default slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: &DEFAULT_SLOT,
        }
    }

    /// Returns a cell bound to a slot declared with [`context_slot!`].
    #[must_use]
    pub fn with_slot(slot: &'static LocalKey<ContextSlot>) -> Self {
        Self { slot }
    }

    /// Installs `ctx` as the current thread's context.
    ///
    /// Passing `None` leaves any existing context untouched and logs a warning.
    pub fn set(&self, ctx: impl Into<Option<SystemContext>>) {
        let Some(ctx) = ctx.into() else {
            warn!("Attempting to set an empty system context, ignoring");
            return;
        };
        debug!(context = %ctx, "Set system context");
        self.slot.with(|slot| *slot.borrow_mut() = Some(ctx));
    }

    /// Returns a copy of the current thread's context, installing a default
    /// record first if the slot is empty. Never fails.
    #[must_use]
    pub fn get(&self) -> SystemContext {
        self.with(|ctx| ctx.clone())
    }

    /// Runs `f` against the current thread's record in place, installing a
    /// default record first if the slot is empty.
    pub fn with<R>(&self, f: impl FnOnce(&mut SystemContext) -> R) -> R {
        self.slot.with(|slot| {
            let mut slot = slot.borrow_mut();
            let ctx = slot.get_or_insert_with(|| {
                debug!("System context is empty, creating default context");
                SystemContext::create_default()
            });
            f(ctx)
        })
    }

    /// Returns a copy of the slot contents without the lazy default.
    #[must_use]
    pub fn peek(&self) -> Option<SystemContext> {
        self.slot.with(|slot| slot.borrow().clone())
    }

    /// Returns true if the current thread has a context installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot.with(|slot| slot.borrow().is_some())
    }

    /// Removes and returns the current thread's context.
    pub fn take(&self) -> Option<SystemContext> {
        self.slot.with(|slot| slot.borrow_mut().take())
    }

    /// Removes the current thread's context. Idempotent.
    pub fn clear(&self) {
        if let Some(ctx) = self.take() {
            debug!(context = %ctx, "Clearing system context");
        }
    }

    /// Swaps the slot contents with `ctx`, returning what was there.
    ///
    /// Unlike [`set`](Self::set), `None` really empties the slot; this is
    /// the primitive the propagation guards restore with.
    pub(crate) fn replace(&self, ctx: Option<SystemContext>) -> Option<SystemContext> {
        self.slot
            .with(|slot| std::mem::replace(&mut *slot.borrow_mut(), ctx))
    }

    /// Logs the current context at info level.
    pub fn log_current(&self) {
        self.with(|ctx| info!("Current system context: {ctx}"));
    }

    // -- field accessors ----------------------------------------------------

    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        self.with(|ctx| ctx.client_ip().map(str::to_owned))
    }

    pub fn set_client_ip(&self, client_ip: impl Into<String>) {
        self.with(|ctx| ctx.set_client_ip(client_ip));
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.with(|ctx| ctx.user_id().map(str::to_owned))
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.with(|ctx| ctx.set_user_id(user_id));
    }

    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.with(|ctx| ctx.username().map(str::to_owned))
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.with(|ctx| ctx.set_username(username));
    }

    /// Returns the current request id, generating and storing one on first
    /// access so later reads on this record agree.
    #[must_use]
    pub fn request_id(&self) -> String {
        self.with(|ctx| {
            let (id, generated) = ctx.request_id_or_generate();
            if generated {
                debug!(request_id = id, "Generated new request id");
            }
            id.to_owned()
        })
    }

    pub fn set_request_id(&self, request_id: impl Into<String>) {
        self.with(|ctx| ctx.set_request_id(request_id));
    }

    #[must_use]
    pub fn request_path(&self) -> Option<String> {
        self.with(|ctx| ctx.request_path().map(str::to_owned))
    }

    pub fn set_request_path(&self, request_path: impl Into<String>) {
        self.with(|ctx| ctx.set_request_path(request_path));
    }

    #[must_use]
    pub fn request_method(&self) -> Option<String> {
        self.with(|ctx| ctx.request_method().map(str::to_owned))
    }

    pub fn set_request_method(&self, request_method: impl Into<String>) {
        self.with(|ctx| ctx.set_request_method(request_method));
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<String> {
        self.with(|ctx| ctx.user_agent().map(str::to_owned))
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.with(|ctx| ctx.set_user_agent(user_agent));
    }

    #[must_use]
    pub fn request_time(&self) -> Option<DateTime<Utc>> {
        self.with(|ctx| ctx.request_time())
    }

    pub fn set_request_time(&self, request_time: DateTime<Utc>) {
        self.with(|ctx| ctx.set_request_time(request_time));
    }

    #[must_use]
    pub fn create_time(&self) -> DateTime<Utc> {
        self.with(|ctx| ctx.create_time())
    }
}

impl Default for ContextCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    context_slot!(static OTHER_SLOT);

    fn sample() -> SystemContext {
        SystemContext::create_default()
            .with_client_ip("192.168.1.100")
            .with_user_id("user123")
            .with_username("testuser")
    }

    #[test]
    fn get_installs_default_when_empty() {
        let cell = ContextCell::new();
        assert!(!cell.is_set());

        let ctx = cell.get();
        assert!(cell.is_set());
        assert!(ctx.client_ip().is_none());
        assert!(ctx.request_time().is_some());
        // The installed default is the one returned.
        assert_eq!(cell.create_time(), ctx.create_time());
    }

    #[test]
    fn set_then_read_fields() {
        let cell = ContextCell::new();
        cell.set(sample());

        assert_eq!(cell.client_ip().as_deref(), Some("192.168.1.100"));
        assert_eq!(cell.user_id().as_deref(), Some("user123"));
        assert_eq!(cell.username().as_deref(), Some("testuser"));

        cell.clear();
        assert!(!cell.is_set());
    }

    #[test]
    fn set_none_keeps_existing_context() {
        let cell = ContextCell::new();
        let ctx = sample();
        cell.set(ctx.clone());

        cell.set(None);

        assert_eq!(cell.get(), ctx);
    }

    #[test]
    fn set_none_on_empty_slot_stays_empty() {
        let cell = ContextCell::new();
        cell.set(None);
        assert!(cell.peek().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let cell = ContextCell::new();
        cell.clear();
        cell.set(sample());
        cell.clear();
        cell.clear();
        assert!(cell.peek().is_none());
    }

    #[test]
    fn setters_mutate_in_place() {
        let cell = ContextCell::new();
        cell.set(sample());
        let create_time = cell.create_time();

        cell.set_username("renamed");
        cell.set_request_path("/api/orders");
        cell.set_request_method("POST");
        cell.set_user_agent("test-agent");

        let ctx = cell.get();
        assert_eq!(ctx.username(), Some("renamed"));
        assert_eq!(ctx.request_path(), Some("/api/orders"));
        assert_eq!(ctx.request_method(), Some("POST"));
        assert_eq!(ctx.user_agent(), Some("test-agent"));
        assert_eq!(ctx.create_time(), create_time);
    }

    #[test]
    fn request_id_is_generated_once() {
        let cell = ContextCell::new();
        cell.set(sample());

        let first = cell.request_id();
        let second = cell.request_id();
        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(cell.peek().unwrap().request_id(), Some(first.as_str()));
    }

    #[test]
    fn request_id_on_empty_slot_is_stable() {
        let cell = ContextCell::new();
        let first = cell.request_id();
        assert_eq!(cell.request_id(), first);
    }

    #[test]
    fn peek_does_not_install_default() {
        let cell = ContextCell::new();
        assert!(cell.peek().is_none());
        assert!(!cell.is_set());
    }

    #[test]
    fn get_returns_a_copy() {
        let cell = ContextCell::new();
        cell.set(sample());

        let mut copy = cell.get();
        copy.set_user_id("someone-else");

        assert_eq!(cell.user_id().as_deref(), Some("user123"));
    }

    #[test]
    fn cells_on_different_slots_are_independent() {
        let default_cell = ContextCell::new();
        let other = ContextCell::with_slot(&OTHER_SLOT);

        default_cell.set(sample());
        assert!(!other.is_set());

        other.set(SystemContext::new().with_user_id("other"));
        assert_eq!(default_cell.user_id().as_deref(), Some("user123"));
        assert_eq!(other.user_id().as_deref(), Some("other"));
    }

    #[test]
    fn context_is_not_visible_on_another_thread() {
        let cell = ContextCell::new();
        cell.set(sample());

        let seen = thread::spawn(move || cell.peek()).join().unwrap();

        assert!(seen.is_none());
        assert!(cell.is_set());
    }

    #[test]
    fn replace_returns_previous_contents() {
        let cell = ContextCell::new();
        assert!(cell.replace(Some(sample())).is_none());
        let previous = cell.replace(None);
        assert_eq!(previous.unwrap().user_id(), Some("user123"));
        assert!(!cell.is_set());
    }
}
