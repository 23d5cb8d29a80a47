//! Error types for `lockstep`
//!
//! One variant per observable failure mode of the barrier. A failed
//! post-phase action is carried in a cheap-to-clone [`PostPhaseError`] so
//! the same failure can be surfaced to every participant released by the
//! phase that produced it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::barrier::MAX_PARTICIPANTS;

/// Top-level error type for barrier operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A numeric argument was out of range (zero bulk count, or a
    /// participant count above [`MAX_PARTICIPANTS`] at construction).
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// The barrier has been disposed.
    #[error("barrier has been disposed")]
    Disposed,

    /// A mutating operation was invoked from within the post-phase action
    /// by the thread executing it.
    #[error("operation not permitted from within the post-phase action")]
    PostPhaseReentry,

    /// Adding the requested participants would exceed the maximum.
    #[error("adding {requested} participant(s) would exceed the maximum of {max}")]
    Overflow {
        /// Number of participants the caller tried to add.
        requested: usize,
        /// The hard participant limit ([`MAX_PARTICIPANTS`]).
        max: usize,
    },

    /// The removal count exceeds the registered participant count.
    #[error("cannot remove {requested} participant(s); only {registered} registered")]
    OutOfRange {
        /// Number of participants the caller tried to remove.
        requested: usize,
        /// Participants currently registered.
        registered: usize,
    },

    /// The removal would reduce the total below the number of participants
    /// that have already arrived in the current phase.
    #[error(
        "cannot remove {requested} participant(s); \
         {arrived} of {registered} have already arrived"
    )]
    WouldOrphan {
        /// Number of participants the caller tried to remove.
        requested: usize,
        /// Participants currently registered.
        registered: usize,
        /// Arrivals already counted in the current phase.
        arrived: usize,
    },

    /// `signal_and_wait` was called with no registered participants.
    #[error("the barrier has no registered participants")]
    ZeroParticipants,

    /// More threads entered `signal_and_wait` than are registered.
    ///
    /// Detection is best-effort: the extra arrival is only observable in
    /// the window between the last arrival's sense flip and the phase
    /// counter advance.
    #[error("more threads arrived at the barrier than are registered")]
    ParticipantOverflow,

    /// The cancellation token fired before the phase completed.
    #[error("the wait was canceled")]
    Canceled,

    /// The post-phase action failed; delivered to the thread that ran the
    /// action and to every participant released by that phase.
    #[error("post-phase action failed")]
    PostPhase(#[source] PostPhaseError),
}

/// Result type alias for barrier operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) const fn overflow(requested: usize) -> Self {
        Self::Overflow {
            requested,
            max: MAX_PARTICIPANTS,
        }
    }
}

/// Failure produced by a post-phase action.
///
/// Wraps the original error (or rendered panic payload) in an `Arc` so one
/// failure can be cloned into the result of every participant woken by the
/// finished phase.
#[derive(Clone)]
pub struct PostPhaseError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl PostPhaseError {
    /// Wraps an error returned by a post-phase action.
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self(Arc::from(source.into()))
    }

    /// Borrows the wrapped error.
    #[must_use]
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Converts a caught panic payload into a carried failure.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "opaque panic payload".to_owned())
            },
            |s| (*s).to_owned(),
        );
        Self::new(PostPhasePanic { message })
    }
}

impl fmt::Display for PostPhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PostPhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PostPhaseError").field(&self.0).finish()
    }
}

impl std::error::Error for PostPhaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Panic raised inside a post-phase action, rendered to its message.
#[derive(Debug, Error)]
#[error("post-phase action panicked: {message}")]
struct PostPhasePanic {
    message: String,
}
