//! Cooperative cancellation for blocking waits.
//!
//! A [`CancelToken`] is a clonable handle to shared cancellation state.
//! Any clone may cancel; all clones observe it. Event waits register
//! themselves with the token so a cancel can reach into the condvar they
//! are sleeping on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::event::EventShared;

struct TokenState {
    canceled: AtomicBool,
    /// Registered waiters, keyed by registration id so two waits on the
    /// same event deregister independently.
    waiters: Mutex<Vec<(u64, Weak<EventShared>)>>,
    next_registration: AtomicU64,
}

/// A clonable cancellation token.
///
/// Cancel is one-way and idempotent: once fired the token stays canceled.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Creates a token in the not-canceled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                canceled: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
                next_registration: AtomicU64::new(0),
            }),
        }
    }

    /// Fires the token and wakes every registered waiter.
    pub fn cancel(&self) {
        if self.state.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let waiters = std::mem::take(&mut *self.state.waiters.lock());
        for (_, waiter) in waiters {
            if let Some(event) = waiter.upgrade() {
                event.wake_all();
            }
        }
    }

    /// Returns whether the token has fired.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::SeqCst)
    }

    /// Registers an event wait with this token; deregistered on drop.
    ///
    /// Waiters that register after the token fired are not woken through
    /// the registry, so callers must re-check [`is_canceled`] before every
    /// sleep. [`ManualResetEvent::wait`] does.
    ///
    /// [`is_canceled`]: Self::is_canceled
    /// [`ManualResetEvent::wait`]: super::event::ManualResetEvent::wait
    pub(crate) fn register(&self, event: &Arc<EventShared>) -> Registration {
        let id = self.state.next_registration.fetch_add(1, Ordering::Relaxed);
        self.state
            .waiters
            .lock()
            .push((id, Arc::downgrade(event)));
        Registration {
            state: Arc::clone(&self.state),
            id,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Removes the owning wait's registry entry when the wait ends.
pub(crate) struct Registration {
    state: Arc<TokenState>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state
            .waiters
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_is_not_canceled() {
        assert!(!CancelToken::new().is_canceled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_canceled());
    }

    #[test]
    fn test_registration_deregisters_on_drop() {
        let token = CancelToken::new();
        let event = crate::sync::ManualResetEvent::new(false);

        let registration = token.register(&event.shared_for_tests());
        assert_eq!(token.state.waiters.lock().len(), 1);
        drop(registration);
        assert!(token.state.waiters.lock().is_empty());
    }

    #[test]
    fn test_same_event_registrations_are_independent() {
        let token = CancelToken::new();
        let event = crate::sync::ManualResetEvent::new(false);

        let first = token.register(&event.shared_for_tests());
        let second = token.register(&event.shared_for_tests());
        drop(first);
        assert_eq!(token.state.waiters.lock().len(), 1);
        drop(second);
        assert!(token.state.waiters.lock().is_empty());
    }
}
