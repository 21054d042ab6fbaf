//! Bounded waiting for the transport to go quiet.
//!
//! Only one flush runs at a time. Callers that arrive while another flush is
//! in progress do not queue behind it; they return
//! [`FlushResult::AlreadyFlushing`] straight away.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use courier_common::internal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Everything queued was delivered (or dropped) before the deadline.
    Success,
    TimedOut,
    /// Another flush owns the coordinator.
    AlreadyFlushing,
}

/// Something a [`FlushCoordinator`] can wait on.
pub trait Flushable {
    /// Nothing in flight and nothing queued.
    fn is_drained(&self) -> bool;

    /// Ask for queued work to be attempted now.
    fn request_drain(&self);

    /// Block until drained or `deadline`, returning whether it drained.
    fn wait_until_drained(&self, deadline: Instant) -> bool;
}

#[derive(Debug, Default)]
pub struct FlushCoordinator {
    flushing: AtomicBool,
}

/// Releases ownership of the coordinator when the owning flush returns.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FlushCoordinator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flushing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for `target` to drain.
    ///
    /// A timed out flush leaves any in-flight attempt running.
    pub fn flush<F: Flushable + ?Sized>(&self, target: &F, timeout: Duration) -> FlushResult {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            internal!(level = DEBUG, "Flush already in progress");
            return FlushResult::AlreadyFlushing;
        }

        let _guard = FlushGuard(&self.flushing);

        if target.is_drained() {
            return FlushResult::Success;
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)));

        target.request_drain();

        if target.wait_until_drained(deadline) {
            internal!(level = DEBUG, "Flush completed");
            FlushResult::Success
        } else {
            internal!(level = WARN, "Flush timed out after {timeout:?}");
            FlushResult::TimedOut
        }
    }
}
