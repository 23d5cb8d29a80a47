//! Low-level synchronization building blocks.
//!
//! The barrier itself only contends on a single packed atomic word; these
//! primitives cover everything around it:
//!
//! - [`ManualResetEvent`] — the per-sense release gate
//! - [`CancelToken`] — cooperative cancellation of blocking waits
//! - [`thread_id`] — stable per-thread identity for the reentry guard
//! - [`backoff`] — bounded spin between CAS retries

pub mod backoff;
pub mod cancel;
pub mod event;
pub mod thread_id;

pub use cancel::CancelToken;
pub use event::{ManualResetEvent, WaitError};
