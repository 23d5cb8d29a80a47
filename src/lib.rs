//! `lockstep` — a phased, sense-reversing barrier.
//!
//! A [`Barrier`] coordinates a dynamically sized group of threads that
//! repeatedly meet at a rendezvous point and move through numbered phases
//! in lock-step. An optional post-phase action runs exactly once per
//! phase, on the last thread to arrive, before anyone moves on.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use lockstep::Barrier;
//!
//! let barrier = Arc::new(Barrier::new(2)?);
//! let peer = {
//!     let barrier = Arc::clone(&barrier);
//!     thread::spawn(move || barrier.signal_and_wait())
//! };
//!
//! barrier.signal_and_wait()?;
//! peer.join().unwrap()?;
//! assert_eq!(barrier.current_phase(), 1);
//! # Ok::<(), lockstep::Error>(())
//! ```

pub mod barrier;
pub mod error;
pub mod observability;
pub mod sync;

pub use barrier::{Barrier, MAX_PARTICIPANTS, PostPhaseResult};
pub use error::{Error, PostPhaseError, Result};
pub use sync::{CancelToken, ManualResetEvent, WaitError};
