//! Lock-step progression through numbered phases.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use lockstep::Barrier;

#[test]
fn two_thread_ping_pong_advances_five_phases() {
    let barrier = Arc::new(Barrier::new(2).unwrap());
    let stop = Arc::new(AtomicBool::new(false));

    // A third thread samples the phase counter; it must never observe it
    // going backwards.
    let observer = {
        let barrier = Arc::clone(&barrier);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut last = 0;
            while !stop.load(Ordering::SeqCst) {
                let phase = barrier.current_phase();
                assert!(phase >= last, "phase counter went backwards");
                last = phase;
                thread::sleep(Duration::from_millis(1));
            }
            last
        })
    };

    thread::scope(|scope| {
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                for _ in 0..5 {
                    barrier.signal_and_wait().unwrap();
                }
            });
        }
    });

    stop.store(true, Ordering::SeqCst);
    let observed = observer.join().unwrap();
    assert!(observed <= 5);
    assert_eq!(barrier.current_phase(), 5);
}

#[test]
fn every_participant_sees_strictly_ascending_phases() {
    const THREADS: usize = 4;
    const ROUNDS: u64 = 8;

    let barrier = Barrier::new(THREADS).unwrap();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    let mut seen = Vec::new();
                    for _ in 0..ROUNDS {
                        barrier.signal_and_wait().unwrap();
                        seen.push(barrier.current_phase());
                    }
                    seen
                })
            })
            .collect();

        for handle in handles {
            let seen = handle.join().unwrap();
            // A release from phase p happens only after the counter moved
            // past p, and nobody can finish phase p + 1 without us.
            let expected: Vec<u64> = (1..=ROUNDS).collect();
            assert_eq!(seen, expected);
        }
    });

    assert_eq!(barrier.current_phase(), ROUNDS);
}

#[test]
fn post_phase_action_runs_once_per_phase() {
    const THREADS: usize = 3;
    const ROUNDS: usize = 4;

    let invocations = Arc::new(AtomicUsize::new(0));
    let barrier = {
        let invocations = Arc::clone(&invocations);
        Barrier::with_post_phase(THREADS, move |_| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
    };

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    barrier.signal_and_wait().unwrap();
                }
            });
        }
    });

    assert_eq!(invocations.load(Ordering::SeqCst), ROUNDS);
    assert_eq!(barrier.current_phase(), ROUNDS as u64);
}
