//! Structured trace events for phase transitions.
//!
//! Phase completions are emitted under a const target so subscribers can
//! filter the barrier's lifecycle events without touching the rest of the
//! process's tracing output.

use crate::barrier::Sense;

/// Target for barrier phase lifecycle events.
pub const PHASE_EVENT: &str = "lockstep_phase";

/// Emits the phase-finished event.
///
/// Fired by the thread that completed the phase, after the state word's
/// sense flip and before the release events change.
pub(crate) fn phase_finished(phase: u64, sense: Sense) {
    let sense = match sense {
        Sense::Even => "even",
        Sense::Odd => "odd",
    };
    tracing::event!(
        target: PHASE_EVENT,
        tracing::Level::DEBUG,
        phase,
        sense,
        "phase finished"
    );
}
