//! Portable manual-reset event.
//!
//! The barrier releases each phase through one of two of these events. The
//! event stays signaled once set until explicitly reset, so every waiter of
//! a released phase observes the set state no matter when it checks.
//!
//! The blocking wait honors an optional timeout and an optional
//! [`CancelToken`]; a waiter registers with the token for the duration of
//! the wait so a cancel can wake it out of the condvar.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::cancel::CancelToken;

/// Why a blocking wait returned without the event being set.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The timeout elapsed before the event was set.
    #[error("wait timed out")]
    Timeout,
    /// The cancellation token fired before the event was set.
    #[error("wait canceled")]
    Canceled,
}

/// Shared state behind a [`ManualResetEvent`].
///
/// Kept behind an `Arc` so cancellation tokens can hold weak references to
/// the condvar they may need to wake.
pub(crate) struct EventShared {
    set: Mutex<bool>,
    cond: Condvar,
}

impl EventShared {
    /// Wakes every thread blocked on this event without changing its state.
    ///
    /// The lock is taken first so a waiter between its canceled-check and
    /// its sleep cannot miss the wakeup.
    pub(crate) fn wake_all(&self) {
        let _guard = self.set.lock();
        self.cond.notify_all();
    }
}

/// A manual-reset event: once set, stays set until reset.
pub struct ManualResetEvent {
    shared: Arc<EventShared>,
}

impl ManualResetEvent {
    /// Creates an event in the given initial state.
    #[must_use]
    pub fn new(initially_set: bool) -> Self {
        Self {
            shared: Arc::new(EventShared {
                set: Mutex::new(initially_set),
                cond: Condvar::new(),
            }),
        }
    }

    /// Signals the event, waking all current waiters.
    pub fn set(&self) {
        let mut set = self.shared.set.lock();
        *set = true;
        self.shared.cond.notify_all();
    }

    /// Returns the event to the unsignaled state.
    pub fn reset(&self) {
        *self.shared.set.lock() = false;
    }

    /// Returns whether the event is currently signaled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.shared.set.lock()
    }

    /// Blocks until the event is set, the timeout elapses, or the token is
    /// canceled.
    ///
    /// `None` timeout waits indefinitely. A zero timeout polls: it returns
    /// [`WaitError::Timeout`] immediately when the event is unset. A set
    /// event wins over a simultaneously elapsed timeout or fired token.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] or [`WaitError::Canceled`] when the wait
    /// ended without the event being set.
    pub fn wait(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), WaitError> {
        // A duration too large for the clock degrades to an infinite wait.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let _registration = cancel.map(|token| token.register(&self.shared));

        let mut set = self.shared.set.lock();
        loop {
            if *set {
                return Ok(());
            }
            if cancel.is_some_and(CancelToken::is_canceled) {
                return Err(WaitError::Canceled);
            }
            match deadline {
                None => self.shared.cond.wait(&mut set),
                Some(deadline) => {
                    let timed_out = self.shared.cond.wait_until(&mut set, deadline).timed_out();
                    if timed_out && !*set {
                        if cancel.is_some_and(CancelToken::is_canceled) {
                            return Err(WaitError::Canceled);
                        }
                        return Err(WaitError::Timeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
impl ManualResetEvent {
    pub(crate) fn shared_for_tests(&self) -> Arc<EventShared> {
        Arc::clone(&self.shared)
    }
}

impl std::fmt::Debug for ManualResetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualResetEvent")
            .field("set", &self.is_set())
            .finish()
    }
}
