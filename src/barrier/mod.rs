//! Phased barrier
//!
//! - [`state`] — the packed atomic `(sense, current, total)` word every
//!   transition goes through
//! - [`engine`] — [`Barrier`]: arrival, release, dynamic registration,
//!   post-phase execution
//!
//! # Architecture
//!
//! Arrivals contend on a single 32-bit word by compare-and-swap; no lock is
//! held across a participant-visible wait. Release goes through two
//! alternating manual-reset events selected by the sense bit, which is what
//! lets a phase finish while the previous phase's waiters are still
//! draining.

pub mod engine;
pub mod state;

pub use engine::{Barrier, PostPhaseResult};
pub use state::{MAX_PARTICIPANTS, Sense};
