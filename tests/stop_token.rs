//! Concurrency tests for the stop-request substrate: winner-takes-all
//! transitions, callback fan-out, and the deregistration protocol.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stop_thread::{StopCallback, StopSource};

#[test]
fn request_stop_wins_exactly_once_across_threads() {
    const CONTENDERS: usize = 20;

    let source = StopSource::new();
    let invoked = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&invoked);
    let _callback = StopCallback::new(&source.token(), move || {
        counter.fetch_add(1, Ordering::AcqRel);
    });

    let wins = Arc::new(AtomicUsize::new(0));
    let mut contenders = Vec::with_capacity(CONTENDERS);
    for _ in 0..CONTENDERS {
        let source = source.clone();
        let wins = Arc::clone(&wins);
        contenders.push(thread::spawn(move || {
            if source.request_stop() {
                wins.fetch_add(1, Ordering::AcqRel);
            }
        }));
    }
    if source.request_stop() {
        wins.fetch_add(1, Ordering::AcqRel);
    }
    for contender in contenders {
        contender.join().expect("contender should join cleanly");
    }

    assert_eq!(wins.load(Ordering::Acquire), 1);
    assert_eq!(invoked.load(Ordering::Acquire), 1);
}

#[test]
fn callbacks_run_in_reverse_registration_order() {
    let source = StopSource::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let push = |tag: u32| {
        let order = Arc::clone(&order);
        StopCallback::new(&source.token(), move || order.lock().push(tag))
    };
    let _first = push(1);
    let _second = push(2);
    let _third = push(3);

    assert!(source.request_stop());
    assert_eq!(*order.lock(), vec![3, 2, 1]);
}

#[test]
fn callback_registered_after_stop_runs_before_new_returns() {
    let source = StopSource::new();
    source.request_stop();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let _callback = StopCallback::new(&source.token(), move || {
        flag.store(true, Ordering::Release);
    });
    assert!(fired.load(Ordering::Acquire));
}

#[test]
fn reentrant_deregistration_neither_deadlocks_nor_double_invokes() {
    let source = StopSource::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<StopCallback>>> = Arc::new(Mutex::new(None));

    // Registered first, so the reverse-order fan-out reaches it after the
    // reentrant callback: proves the loop carries on past the reentrancy.
    let after = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&after);
    let _survivor = StopCallback::new(&source.token(), move || {
        flag.store(true, Ordering::Release);
    });

    let counter = Arc::clone(&invoked);
    let own_slot = Arc::clone(&slot);
    let callback = StopCallback::new(&source.token(), move || {
        counter.fetch_add(1, Ordering::AcqRel);
        // Drop our own registration from inside the callback.
        *own_slot.lock() = None;
    });
    *slot.lock() = Some(callback);

    assert!(source.request_stop());
    assert_eq!(invoked.load(Ordering::Acquire), 1);
    assert!(slot.lock().is_none());
    assert!(after.load(Ordering::Acquire));
}

#[test]
fn cross_thread_deregistration_waits_for_the_callback() {
    let source = StopSource::new();

    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let callback = {
        let entered = Arc::clone(&entered);
        let finished = Arc::clone(&finished);
        StopCallback::new(&source.token(), move || {
            entered.store(true, Ordering::Release);
            thread::sleep(Duration::from_millis(200));
            finished.store(true, Ordering::Release);
        })
    };

    let requester = {
        let source = source.clone();
        thread::spawn(move || source.request_stop())
    };

    // Once the callback is running elsewhere, its destructor must block
    // until the callback has completed.
    while !entered.load(Ordering::Acquire) {
        thread::yield_now();
    }
    drop(callback);
    assert!(finished.load(Ordering::Acquire));

    assert!(requester.join().expect("requester should join cleanly"));
}

#[test]
fn deregistration_before_stop_prevents_invocation_under_contention() {
    // Register-and-drop racing request_stop: however the race lands, a
    // deregistered callback must never fire after its drop has returned.
    for _ in 0..50 {
        let source = StopSource::new();
        let gone = Arc::new(AtomicBool::new(false));
        let fired_after_drop = Arc::new(AtomicBool::new(false));

        let callback = {
            let gone = Arc::clone(&gone);
            let fired_after_drop = Arc::clone(&fired_after_drop);
            StopCallback::new(&source.token(), move || {
                if gone.load(Ordering::Acquire) {
                    fired_after_drop.store(true, Ordering::Release);
                }
            })
        };

        let requester = {
            let source = source.clone();
            thread::spawn(move || {
                source.request_stop();
            })
        };

        drop(callback);
        gone.store(true, Ordering::Release);

        requester.join().expect("requester should join cleanly");
        assert!(!fired_after_drop.load(Ordering::Acquire));
    }
}

#[test]
fn fan_out_latency_is_bounded_by_the_longest_callback() {
    let source = StopSource::new();

    let _slow = StopCallback::new(&source.token(), || {
        thread::sleep(Duration::from_millis(100));
    });

    let started = Instant::now();
    assert!(source.request_stop());
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(
        elapsed < Duration::from_secs(2),
        "fan-out took {elapsed:?}, expected roughly the callback's runtime"
    );
}
