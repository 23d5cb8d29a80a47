//! Registration changes while a phase is in flight.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use lockstep::{Barrier, Error, ManualResetEvent};

use common::eventually;

#[test]
fn joiner_participates_in_the_phase_in_progress() {
    let barrier = Arc::new(Barrier::new(2).unwrap());

    let first = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || barrier.signal_and_wait())
    };
    assert!(eventually(Duration::from_secs(5), || {
        barrier.participants_remaining() == 1
    }));

    // The phase is mid-flight; the new participant still joins phase 0.
    assert_eq!(barrier.add_participant().unwrap(), 0);
    assert_eq!(barrier.participant_count(), 3);

    thread::scope(|scope| {
        let second = scope.spawn(|| barrier.signal_and_wait());
        let third = scope.spawn(|| barrier.signal_and_wait());
        second.join().unwrap().unwrap();
        third.join().unwrap().unwrap();
    });

    first.join().unwrap().unwrap();
    assert_eq!(barrier.current_phase(), 1);
}

#[test]
fn joiner_during_post_phase_waits_for_the_flip() {
    let gate = Arc::new(ManualResetEvent::new(false));
    let running = Arc::new(ManualResetEvent::new(false));

    let barrier = {
        let gate = Arc::clone(&gate);
        let running = Arc::clone(&running);
        Arc::new(
            Barrier::with_post_phase(2, move |_| {
                running.set();
                gate.wait(None, None).unwrap();
                Ok(())
            })
            .unwrap(),
        )
    };

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.signal_and_wait())
        })
        .collect();
    running.wait(None, None).unwrap();

    // Both arrived; the action is mid-run, so the joiner belongs to the
    // next phase and must block inside the call until the events flip.
    let returned = Arc::new(AtomicBool::new(false));
    let joiner = {
        let barrier = Arc::clone(&barrier);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let phase = barrier.add_participant();
            returned.store(true, Ordering::SeqCst);
            phase
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst), "joiner returned mid-action");

    gate.set();
    assert_eq!(joiner.join().unwrap().unwrap(), 1);
    for waiter in waiters {
        waiter.join().unwrap().unwrap();
    }
    assert_eq!(barrier.current_phase(), 1);
    assert_eq!(barrier.participant_count(), 3);
}

#[test]
fn removal_of_the_missing_participant_completes_the_phase() {
    let barrier = Arc::new(Barrier::new(2).unwrap());

    let waiter = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || barrier.signal_and_wait())
    };
    assert!(eventually(Duration::from_secs(5), || {
        barrier.participants_remaining() == 1
    }));

    // One arrived out of two; dropping the absentee finishes the phase.
    barrier.remove_participant().unwrap();
    waiter.join().unwrap().unwrap();
    assert_eq!(barrier.current_phase(), 1);
    assert_eq!(barrier.participant_count(), 1);
}

#[test]
fn removal_cannot_orphan_arrived_participants() {
    let barrier = Arc::new(Barrier::new(3).unwrap());

    let waiter = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || barrier.signal_and_wait_timeout(Duration::from_secs(5)))
    };
    assert!(eventually(Duration::from_secs(5), || {
        barrier.participants_remaining() == 2
    }));

    let err = barrier.remove_participants(3).unwrap_err();
    assert!(matches!(
        err,
        Error::WouldOrphan {
            requested: 3,
            registered: 3,
            arrived: 1
        }
    ));

    // Removing down to the arrived count instead completes the phase.
    barrier.remove_participants(2).unwrap();
    assert!(waiter.join().unwrap().unwrap());
    assert_eq!(barrier.current_phase(), 1);
}
