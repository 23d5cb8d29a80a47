//! Packed barrier state.
//!
//! All arrival bookkeeping lives in one 32-bit word updated by
//! compare-and-swap, so a phase transition is a single atomic step:
//!
//! ```text
//! bit 31     sense     0 = even, 1 = odd (selects the release event)
//! bits 30..16 current  arrivals observed in the current phase
//! bit 15     reserved
//! bits 14..0 total     registered participant count
//! ```
//!
//! Between transitions `0 <= current <= total <= MAX_PARTICIPANTS` always
//! holds; the last arrival swaps in `(0, total, !sense)` in the same step
//! that completes the phase.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hard limit on registered participants (15 bits).
pub const MAX_PARTICIPANTS: usize = 0x7FFF;

const SENSE_BIT: u32 = 1 << 31;
const CURRENT_SHIFT: u32 = 16;
const CURRENT_MASK: u32 = (MAX_PARTICIPANTS as u32) << CURRENT_SHIFT;
const TOTAL_MASK: u32 = MAX_PARTICIPANTS as u32;

/// Phase parity bit. Selects which of the two release events a phase's
/// participants block on; flips once per completed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// Even-parity phases; released through the even event.
    Even,
    /// Odd-parity phases; released through the odd event.
    Odd,
}

impl Sense {
    /// The opposite sense.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }

    /// The sense matching a phase number's parity.
    #[must_use]
    pub const fn of_phase(phase: u64) -> Self {
        if phase % 2 == 0 { Self::Even } else { Self::Odd }
    }
}

/// One decoded observation of the state word.
///
/// Carries the raw `word` it was decoded from so a later `try_store`
/// compares against exactly what the caller saw.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    /// The raw word this snapshot was decoded from.
    pub word: u32,
    /// Arrivals observed so far in the current phase.
    pub current: usize,
    /// Registered participant count.
    pub total: usize,
    /// The current sense bit.
    pub sense: Sense,
}

/// The packed atomic state word.
pub struct StateWord(AtomicU32);

impl StateWord {
    /// Creates the word for a fresh barrier: no arrivals, even sense.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self(AtomicU32::new(encode(0, total, Sense::Even)))
    }

    /// Atomically reads and decodes the current state.
    #[must_use]
    pub fn load(&self) -> Snapshot {
        decode(self.0.load(Ordering::SeqCst))
    }

    /// Encodes `(current, total, sense)` and compare-and-swaps it in
    /// against `expected`. Returns whether the swap took effect.
    pub fn try_store(&self, expected: Snapshot, current: usize, total: usize, sense: Sense) -> bool {
        debug_assert!(current <= total && total <= MAX_PARTICIPANTS);
        self.0
            .compare_exchange(
                expected.word,
                encode(current, total, sense),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn encode(current: usize, total: usize, sense: Sense) -> u32 {
    let sense_bit = match sense {
        Sense::Even => 0,
        Sense::Odd => SENSE_BIT,
    };
    sense_bit | ((current as u32) << CURRENT_SHIFT) | (total as u32)
}

const fn decode(word: u32) -> Snapshot {
    Snapshot {
        word,
        current: ((word & CURRENT_MASK) >> CURRENT_SHIFT) as usize,
        total: (word & TOTAL_MASK) as usize,
        sense: if word & SENSE_BIT == 0 {
            Sense::Even
        } else {
            Sense::Odd
        },
    }
}
