//! The barrier itself.
//!
//! Participants call [`Barrier::signal_and_wait`]; each arrival contends on
//! the packed state word by compare-and-swap. The last arrival of a phase
//! swaps in `(0, total, !sense)`, runs the post-phase action if one is
//! registered, then advances the phase counter and flips the two release
//! events. Everyone else blocks on the event matching the sense they
//! arrived under.
//!
//! Two alternating manual-reset events (instead of one condvar generation)
//! keep a fast thread of phase `p + 1` from overrunning phase `p`'s
//! waiters: `p + 1` releases through the other event, and that event is
//! reset before `p`'s is set.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, PostPhaseError, Result};
use crate::observability;
use crate::sync::backoff::Backoff;
use crate::sync::thread_id::current_thread_id;
use crate::sync::{CancelToken, ManualResetEvent, WaitError};

use super::state::{MAX_PARTICIPANTS, Sense, StateWord};

/// Outcome of a post-phase action.
pub type PostPhaseResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type PostPhaseAction = Box<dyn Fn(&Barrier) -> PostPhaseResult + Send + Sync>;

/// A registered post-phase action plus the span it was captured under.
struct PostPhase {
    action: PostPhaseAction,
    /// Entered around every invocation so the action observes the tracing
    /// context that was current at construction.
    span: tracing::Span,
}

/// A phased barrier: a rendezvous point a dynamically sized group of
/// threads passes through repeatedly, in lock-step.
///
/// Each cycle is a numbered *phase*. A phase completes when the last
/// registered participant arrives; an optional post-phase action then runs
/// exactly once, on that thread, before anyone is released into the next
/// phase.
///
/// All operations except [`dispose`](Self::dispose) are safe to call
/// concurrently from any number of threads.
pub struct Barrier {
    /// Packed `(sense, current, total)` word; the only contended state.
    state: StateWord,
    /// Completed-phase counter. Advances strictly between the state word's
    /// sense flip and the release events' flip.
    phase: AtomicU64,
    even_event: ManualResetEvent,
    odd_event: ManualResetEvent,
    post_phase: Option<PostPhase>,
    /// Id of the thread currently running the post-phase action; 0 if none.
    executor: AtomicU64,
    /// Failure from the most recent post-phase action, surfaced to every
    /// participant released by that phase.
    carried: Mutex<Option<PostPhaseError>>,
    disposed: AtomicBool,
}

impl Barrier {
    /// Creates a barrier expecting `participants` arrivals per phase.
    ///
    /// A zero count is valid; participants are then expected to register
    /// through [`add_participants`](Self::add_participants) before anyone
    /// signals.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `participants` exceeds
    /// [`MAX_PARTICIPANTS`].
    pub fn new(participants: usize) -> Result<Self> {
        Self::build(participants, None)
    }

    /// Creates a barrier with a post-phase action.
    ///
    /// The action runs exactly once per completed phase, on the last
    /// arriving thread, after the sense flip and before anyone is
    /// released. It is invoked inside the tracing span that was current
    /// when this constructor ran. A failure (returned error or panic) is
    /// delivered as [`Error::PostPhase`] to the executing thread and to
    /// every participant released by that phase.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `participants` exceeds
    /// [`MAX_PARTICIPANTS`].
    pub fn with_post_phase<F>(participants: usize, action: F) -> Result<Self>
    where
        F: Fn(&Self) -> PostPhaseResult + Send + Sync + 'static,
    {
        Self::build(
            participants,
            Some(PostPhase {
                action: Box::new(action),
                span: tracing::Span::current(),
            }),
        )
    }

    fn build(participants: usize, post_phase: Option<PostPhase>) -> Result<Self> {
        if participants > MAX_PARTICIPANTS {
            return Err(Error::InvalidArgument {
                reason: "participant count exceeds the maximum",
            });
        }
        Ok(Self {
            state: StateWord::new(participants),
            phase: AtomicU64::new(0),
            // Phase 0 waiters block on the even event; the odd event starts
            // set so the first flip finds it in the released state.
            even_event: ManualResetEvent::new(false),
            odd_event: ManualResetEvent::new(true),
            post_phase,
            executor: AtomicU64::new(0),
            carried: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Number of registered participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.state.load().total
    }

    /// Number of registered participants that have not yet arrived in the
    /// current phase.
    #[must_use]
    pub fn participants_remaining(&self) -> usize {
        let snapshot = self.state.load();
        snapshot.total - snapshot.current
    }

    /// Number of the phase participants are currently rendezvousing in.
    #[must_use]
    pub fn current_phase(&self) -> u64 {
        self.phase.load(Ordering::SeqCst)
    }

    /// Registers one additional participant.
    ///
    /// # Errors
    ///
    /// See [`add_participants`](Self::add_participants).
    pub fn add_participant(&self) -> Result<u64> {
        self.add_participants(1)
    }

    /// Registers `count` additional participants and returns the number of
    /// the first phase they participate in.
    ///
    /// When the current phase's last arrival is mid-completion, the new
    /// participants belong to the *next* phase, and this call blocks until
    /// the release events have flipped so a joining thread cannot slip
    /// into the finishing phase.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after [`dispose`](Self::dispose)
    /// - [`Error::PostPhaseReentry`] from within the post-phase action
    /// - [`Error::InvalidArgument`] for a zero `count`
    /// - [`Error::Overflow`] past [`MAX_PARTICIPANTS`]
    pub fn add_participants(&self, count: usize) -> Result<u64> {
        self.ensure_live()?;
        self.ensure_outside_post_phase()?;
        if count == 0 {
            return Err(Error::InvalidArgument {
                reason: "must add at least one participant",
            });
        }

        let mut backoff = Backoff::new();
        loop {
            let snapshot = self.state.load();
            if count > MAX_PARTICIPANTS - snapshot.total {
                return Err(Error::overflow(count));
            }
            if !self
                .state
                .try_store(snapshot, snapshot.current, snapshot.total + count, snapshot.sense)
            {
                backoff.snooze();
                continue;
            }

            let phase = self.current_phase();
            if snapshot.sense == Sense::of_phase(phase) {
                // Joining the current phase. Its release event may still be
                // set from two phases ago if the flip is racing us; a set
                // event here would let the newcomers fall straight through.
                let event = self.event_for(snapshot.sense);
                if event.is_set() {
                    event.reset();
                }
                trace!(target: observability::PHASE_EVENT, count, phase, "participants joined");
                return Ok(phase);
            }

            // The sense has flipped but the phase counter has not: the last
            // arrival is mid-completion. The newcomers join the next phase,
            // and must not observe its release event before it is reset.
            // The opposite event is set immediately after that reset.
            let _released = self.event_for(snapshot.sense.flip()).wait(None, None);
            trace!(
                target: observability::PHASE_EVENT,
                count,
                phase = phase + 1,
                "participants joined after in-flight phase"
            );
            return Ok(phase + 1);
        }
    }

    /// Deregisters one participant.
    ///
    /// # Errors
    ///
    /// See [`remove_participants`](Self::remove_participants).
    pub fn remove_participant(&self) -> Result<()> {
        self.remove_participants(1)
    }

    /// Deregisters `count` participants.
    ///
    /// When the removal makes the already-arrived count equal to the new
    /// total, it completes the current phase exactly as a last arrival
    /// would, including running the post-phase action on this thread.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after [`dispose`](Self::dispose)
    /// - [`Error::PostPhaseReentry`] from within the post-phase action
    /// - [`Error::InvalidArgument`] for a zero `count`
    /// - [`Error::OutOfRange`] if `count` exceeds the registered total
    /// - [`Error::WouldOrphan`] if the removal would drop the total below
    ///   the arrivals already counted
    /// - [`Error::PostPhase`] if the removal completed the phase and the
    ///   post-phase action failed
    pub fn remove_participants(&self, count: usize) -> Result<()> {
        self.ensure_live()?;
        self.ensure_outside_post_phase()?;
        if count == 0 {
            return Err(Error::InvalidArgument {
                reason: "must remove at least one participant",
            });
        }

        let mut backoff = Backoff::new();
        loop {
            let snapshot = self.state.load();
            if count > snapshot.total {
                return Err(Error::OutOfRange {
                    requested: count,
                    registered: snapshot.total,
                });
            }
            let remaining = snapshot.total - count;
            if remaining < snapshot.current {
                return Err(Error::WouldOrphan {
                    requested: count,
                    registered: snapshot.total,
                    arrived: snapshot.current,
                });
            }

            if remaining > 0 && snapshot.current == remaining {
                // Everyone still registered has already arrived: the
                // removal completes the phase.
                if self
                    .state
                    .try_store(snapshot, 0, remaining, snapshot.sense.flip())
                {
                    return self.finish_phase(snapshot.sense);
                }
            } else if self
                .state
                .try_store(snapshot, snapshot.current, remaining, snapshot.sense)
            {
                return Ok(());
            }
            backoff.snooze();
        }
    }

    /// Signals arrival and blocks until every participant has arrived.
    ///
    /// # Errors
    ///
    /// See [`signal_and_wait_with`](Self::signal_and_wait_with).
    pub fn signal_and_wait(&self) -> Result<()> {
        self.signal_and_wait_with(None, None).map(|_| ())
    }

    /// Signals arrival and waits at most `timeout` for the phase to
    /// complete. Returns `false` on timeout, with the arrival undone.
    ///
    /// # Errors
    ///
    /// See [`signal_and_wait_with`](Self::signal_and_wait_with).
    pub fn signal_and_wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.signal_and_wait_with(Some(timeout), None)
    }

    /// Signals arrival and waits for the phase to complete, bounded by an
    /// optional timeout and an optional cancellation token.
    ///
    /// Returns `Ok(true)` when released by phase completion and
    /// `Ok(false)` when the timeout elapsed first (the arrival is backed
    /// out, leaving other waiters undisturbed). A cancel or timeout that
    /// loses the race against the completing phase is suppressed: the
    /// phase completed, so the call reports release.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after [`dispose`](Self::dispose)
    /// - [`Error::PostPhaseReentry`] from within the post-phase action
    /// - [`Error::ZeroParticipants`] when no participants are registered
    /// - [`Error::ParticipantOverflow`] when more threads arrive than are
    ///   registered (best-effort detection)
    /// - [`Error::Canceled`] when the token fired before release
    /// - [`Error::PostPhase`] when the phase's post-phase action failed
    pub fn signal_and_wait_with(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        self.ensure_live()?;
        self.ensure_outside_post_phase()?;
        if cancel.is_some_and(CancelToken::is_canceled) {
            return Err(Error::Canceled);
        }

        let mut backoff = Backoff::new();
        let (phase, sense) = loop {
            let snapshot = self.state.load();
            if snapshot.total == 0 {
                return Err(Error::ZeroParticipants);
            }
            let phase = self.current_phase();
            if snapshot.current == 0 && snapshot.sense != Sense::of_phase(phase) {
                // The previous phase's last arrival has flipped the sense
                // but not yet advanced the counter; only an over-registered
                // arrival can observe this window.
                return Err(Error::ParticipantOverflow);
            }

            if snapshot.current + 1 == snapshot.total {
                // Last arrival: complete the phase in one swap.
                if self
                    .state
                    .try_store(snapshot, 0, snapshot.total, snapshot.sense.flip())
                {
                    self.finish_phase(snapshot.sense)?;
                    return Ok(true);
                }
            } else if self.state.try_store(
                snapshot,
                snapshot.current + 1,
                snapshot.total,
                snapshot.sense,
            ) {
                break (phase, snapshot.sense);
            }
            backoff.snooze();
        };

        match self.event_for(sense).wait(timeout, cancel) {
            Ok(()) => self.surface_carried().map(|()| true),
            Err(wait_error) => self.back_out(phase, sense, wait_error),
        }
    }

    /// Undoes an arrival whose wait ended in timeout or cancellation.
    fn back_out(&self, phase: u64, sense: Sense, wait_error: WaitError) -> Result<bool> {
        let mut backoff = Backoff::new();
        loop {
            let snapshot = self.state.load();
            if self.current_phase() != phase || snapshot.sense != sense {
                // The phase completed while the wait was failing; the
                // timeout or cancel lost the race. Block out the remainder
                // of the release (the event is set or about to be) so this
                // thread cannot re-enter ahead of it.
                trace!(target: observability::PHASE_EVENT, phase, "backout lost the race");
                let _released = self.event_for(sense).wait(None, None);
                return self.surface_carried().map(|()| true);
            }

            debug_assert!(snapshot.current > 0, "arrival vanished without a sense flip");
            if self
                .state
                .try_store(snapshot, snapshot.current - 1, snapshot.total, sense)
            {
                return match wait_error {
                    WaitError::Canceled => Err(Error::Canceled),
                    WaitError::Timeout => Ok(false),
                };
            }
            backoff.snooze();
        }
    }

    /// Runs the post-phase action (if any), then advances the phase counter
    /// and flips the release events. Called by whichever thread completed
    /// the phase: the last arrival, or a removal that drained it.
    fn finish_phase(&self, observed_sense: Sense) -> Result<()> {
        observability::phase_finished(self.current_phase(), observed_sense);

        let Some(post_phase) = &self.post_phase else {
            self.set_reset_events(observed_sense);
            return Ok(());
        };

        self.executor.store(current_thread_id(), Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            post_phase.span.in_scope(|| (post_phase.action)(self))
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(PostPhaseError::new(source)),
            Err(payload) => Some(PostPhaseError::from_panic(payload.as_ref())),
        };

        // The slot write precedes the event flip, which publishes it to
        // every waiter released below. The events must flip even on
        // failure, or the phase's waiters would never wake.
        *self.carried.lock() = failure.clone();
        self.executor.store(0, Ordering::SeqCst);
        self.set_reset_events(observed_sense);

        failure.map_or(Ok(()), |failure| Err(Error::PostPhase(failure)))
    }

    /// Advances the phase counter, then flips the events.
    ///
    /// Reset-before-set: the next phase's event must already be reset by
    /// the time the first released participant can arrive and consult it.
    fn set_reset_events(&self, observed_sense: Sense) {
        self.phase.fetch_add(1, Ordering::SeqCst);
        match observed_sense {
            Sense::Even => {
                self.odd_event.reset();
                self.even_event.set();
            }
            Sense::Odd => {
                self.even_event.reset();
                self.odd_event.set();
            }
        }
    }

    /// Surfaces the carried post-phase failure to a released participant.
    fn surface_carried(&self) -> Result<()> {
        self.carried
            .lock()
            .clone()
            .map_or(Ok(()), |failure| Err(Error::PostPhase(failure)))
    }

    /// Releases the barrier's events and marks it disposed. Subsequent
    /// operations fail with [`Error::Disposed`].
    ///
    /// Not thread-safe with respect to other operations: the caller must
    /// ensure no participant is inside a barrier call.
    ///
    /// # Errors
    ///
    /// [`Error::PostPhaseReentry`] from within the post-phase action.
    pub fn dispose(&self) -> Result<()> {
        self.ensure_outside_post_phase()?;
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.even_event.set();
            self.odd_event.set();
        }
        Ok(())
    }

    const fn event_for(&self, sense: Sense) -> &ManualResetEvent {
        match sense {
            Sense::Even => &self.even_event,
            Sense::Odd => &self.odd_event,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    fn ensure_outside_post_phase(&self) -> Result<()> {
        if self.executor.load(Ordering::SeqCst) == current_thread_id() {
            return Err(Error::PostPhaseReentry);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.state.load();
        f.debug_struct("Barrier")
            .field("participants", &snapshot.total)
            .field("arrived", &snapshot.current)
            .field("phase", &self.current_phase())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        // Mirrors dispose: leave both events released.
        self.even_event.set();
        self.odd_event.set();
    }
}
