//! Stable per-thread identity.
//!
//! The reentry guard stores the id of the thread running the post-phase
//! action, with 0 meaning "no thread". Ids are handed out from a global
//! counter starting at 1, so a real thread id is never 0.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Returns a stable nonzero identifier for the calling OS thread.
pub(crate) fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_id_is_nonzero_and_stable() {
        let first = current_thread_id();
        assert_ne!(first, 0);
        assert_eq!(first, current_thread_id());
    }

    #[test]
    fn test_ids_differ_across_threads() {
        let here = current_thread_id();
        let there = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
        assert_ne!(there, 0);
    }
}
