//! Conformance tests for the bounded concurrency gate.
//!
//! Covers the concurrency bound across queues, FIFO fairness of blocked and
//! deferred acquirers, cancellation of deferred acquisitions, close
//! semantics, and capacity forgetting.

mod common;
use common::*;

use seriate::{CancelKind, Error};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

#[test]
fn gate_bounds_concurrency_across_queues() {
    init_test("gate_bounds_concurrency_across_queues");
    let runtime = wide_runtime(8);
    let alpha = runtime.concurrent_queue("alpha");
    let beta = runtime.concurrent_queue("beta");
    let gate = runtime.gate(2);

    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let queue = if i % 2 == 0 { &alpha } else { &beta };
            let gate = gate.clone();
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            queue.submit(move || {
                let permit = gate.acquire().unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().is_ok());
    }

    let seen = peak.load(Ordering::SeqCst);
    assert_with_log!(
        seen >= 1 && seen <= 2,
        "gate limit 2 was breached, peak {}",
        seen
    );
    let snapshot = runtime.metrics();
    assert_eq!(snapshot.gate_acquires, 20);
    assert!(snapshot.gate_holders_peak <= 2);
    assert_eq!(snapshot.gate_holders, 0);
    assert_eq!(gate.available(), 2);
    assert!(runtime.shutdown(Duration::from_secs(5)));
    test_complete!("gate_bounds_concurrency_across_queues");
}

#[test]
fn a_limit_three_gate_saturates_at_exactly_three() {
    init_test("a_limit_three_gate_saturates_at_exactly_three");
    let runtime = wide_runtime(6);
    let queue = runtime.concurrent_queue("brief-jobs");
    let gate = runtime.gate(3);

    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    // The first three holders park here until the peak is confirmed, so the
    // gate is provably full at least once. Later jobs find the flag already
    // raised and fall through.
    let saturated = Arc::new(AtomicBool::new(false));

    test_section!("sixteen brief jobs contend for three permits");
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.clone();
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            let saturated = Arc::clone(&saturated);
            queue.submit(move || {
                let permit = gate.acquire().unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let start = Instant::now();
                while !saturated.load(Ordering::SeqCst)
                    && start.elapsed() < Duration::from_secs(5)
                {
                    thread::sleep(Duration::from_millis(1));
                }
                thread::sleep(Duration::from_millis(1));
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            })
        })
        .collect();

    assert!(
        wait_for(Duration::from_secs(5), || {
            peak.load(Ordering::SeqCst) == 3
        }),
        "three permits never ended up held at once"
    );
    saturated.store(true, Ordering::SeqCst);
    for handle in handles {
        assert!(handle.join().is_ok());
    }

    test_section!("the observed maximum is the limit, no more and no less");
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    let snapshot = runtime.metrics();
    assert_eq!(snapshot.gate_acquires, 16);
    assert_eq!(snapshot.gate_holders_peak, 3);
    assert_eq!(gate.available(), 3);
    assert!(runtime.shutdown(Duration::from_secs(5)));
    test_complete!("a_limit_three_gate_saturates_at_exactly_three");
}

#[test]
fn a_fully_subscribed_gate_reports_its_high_water_mark() {
    init_test("a_fully_subscribed_gate_reports_its_high_water_mark");
    let runtime = test_runtime();
    let gate = runtime.gate(3);

    let holders: Vec<_> = (0..3).map(|_| gate.acquire().unwrap()).collect();
    assert_eq!(gate.available(), 0);
    assert!(matches!(gate.try_acquire(), Err(Error::NoPermits)));

    let snapshot = runtime.metrics();
    assert_eq!(snapshot.gate_holders, 3);
    assert_eq!(snapshot.gate_holders_peak, 3);

    drop(holders);
    assert_eq!(gate.available(), 3);
    assert_eq!(runtime.metrics().gate_holders, 0);
    assert_eq!(runtime.metrics().gate_holders_peak, 3);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn blocked_acquirers_are_served_in_fifo_order() {
    init_test("blocked_acquirers_are_served_in_fifo_order");
    let runtime = test_runtime();
    let gate = runtime.gate(1);
    let holder = gate.acquire().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for k in 1..=3_usize {
        let waiter_gate = gate.clone();
        let order = Arc::clone(&order);
        waiters.push(thread::spawn(move || {
            let permit = waiter_gate.acquire().unwrap();
            order.lock().unwrap().push(k);
            drop(permit);
        }));
        // Pin this waiter's FIFO position before starting the next.
        assert!(wait_for(Duration::from_secs(5), || gate.waiting() == k));
    }

    drop(holder);
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn acquire_timeout_expires_under_contention_then_succeeds() {
    init_test("acquire_timeout_expires_under_contention_then_succeeds");
    let runtime = test_runtime();
    let gate = runtime.gate(1);

    let permit = gate.acquire().unwrap();
    assert!(matches!(
        gate.acquire_timeout(Duration::from_millis(20)),
        Err(Error::NoPermits)
    ));

    drop(permit);
    let reacquired = gate.acquire_timeout(Duration::from_millis(500)).unwrap();
    drop(reacquired);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn deferred_acquisitions_chain_in_fifo_order() {
    init_test("deferred_acquisitions_chain_in_fifo_order");
    let runtime = wide_runtime(2);
    let queue = runtime.concurrent_queue("gated");
    let gate = runtime.gate(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let o = Arc::clone(&order);
    let first = gate.acquire_then(&queue, move |_cx, permit| {
        o.lock().unwrap().push(0);
        release_rx.recv().ok();
        drop(permit);
    });

    let mut rest = Vec::new();
    for k in 1..=3 {
        let o = Arc::clone(&order);
        rest.push(gate.acquire_then(&queue, move |_cx, _permit| {
            o.lock().unwrap().push(k);
        }));
    }

    release_tx.send(()).unwrap();
    assert!(first.join().is_ok());
    for handle in rest {
        assert!(handle.join().is_ok());
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    let snapshot = runtime.metrics();
    assert_eq!(snapshot.gate_acquires, 4);
    assert_eq!(snapshot.gate_contended, 3);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn a_serial_admission_queue_keeps_gated_work_in_order() {
    init_test("a_serial_admission_queue_keeps_gated_work_in_order");
    let runtime = wide_runtime(3);
    let admission = runtime.serial_queue("admission");
    let work = runtime.concurrent_queue("gated-work");
    let gate = runtime.gate(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    // The serial queue fixes the registration order, so grants arrive in
    // submission order even though the work queue itself is concurrent.
    let mut admitted = Vec::new();
    for k in 0..6 {
        let gate = gate.clone();
        let work = work.clone();
        let order = Arc::clone(&order);
        admitted.push(admission.submit(move || {
            gate.acquire_then(&work, move |_cx, _permit| {
                order.lock().unwrap().push(k);
            })
        }));
    }

    let work_handles: Vec<_> = admitted
        .into_iter()
        .map(|handle| assert_outcome_ok!(handle.join()))
        .collect();
    for handle in work_handles {
        assert!(handle.join().is_ok());
    }

    assert_eq!(*order.lock().unwrap(), (0..6).collect::<Vec<_>>());
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn cancelled_deferred_acquisition_skips_the_body_and_frees_the_permit() {
    init_test("cancelled_deferred_acquisition_skips_the_body_and_frees_the_permit");
    let runtime = test_runtime();
    let queue = runtime.concurrent_queue("cancel-gated");
    let gate = runtime.gate(1);
    let holder = gate.acquire().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let victim = gate.acquire_then(&queue, move |_cx, _permit| {
        flag.store(true, Ordering::SeqCst);
    });
    assert_eq!(gate.waiting(), 1);

    victim.cancel();
    drop(holder);

    let reason = assert_outcome_cancelled!(victim.join());
    assert_eq!(reason.kind(), CancelKind::User);
    assert!(!ran.load(Ordering::SeqCst));

    // The permit handed to the skipped body comes straight back.
    assert!(wait_for(Duration::from_secs(5), || gate.available() == 1));
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn closing_the_gate_fails_every_waiter_but_spares_holders() {
    init_test("closing_the_gate_fails_every_waiter_but_spares_holders");
    let runtime = test_runtime();
    let queue = runtime.concurrent_queue("closing-gate");
    let gate = runtime.gate(1);
    let holder = gate.acquire().unwrap();

    test_section!("one blocked thread, one deferred continuation");
    let blocked = {
        let gate = gate.clone();
        thread::spawn(move || gate.acquire().map(drop))
    };
    assert!(wait_for(Duration::from_secs(5), || gate.waiting() == 1));
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let deferred = gate.acquire_then(&queue, move |_cx, _permit| {
        flag.store(true, Ordering::SeqCst);
    });
    assert_eq!(gate.waiting(), 2);

    test_section!("close and observe the failures");
    gate.close();
    assert!(gate.is_closed());
    assert!(matches!(blocked.join().unwrap(), Err(Error::GateClosed)));
    let reason = assert_outcome_cancelled!(deferred.join());
    assert_eq!(reason.kind(), CancelKind::GateClosed);
    assert!(!ran.load(Ordering::SeqCst));

    assert!(matches!(gate.acquire(), Err(Error::GateClosed)));
    assert!(matches!(gate.try_acquire(), Err(Error::GateClosed)));

    // The holder releases into the closed gate without incident.
    drop(holder);
    assert_eq!(gate.available(), 1);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn forget_shrinks_capacity_for_the_life_of_the_gate() {
    init_test("forget_shrinks_capacity_for_the_life_of_the_gate");
    let runtime = test_runtime();
    let gate = runtime.gate(2);
    assert_eq!(gate.limit(), 2);

    let permit = gate.acquire().unwrap();
    permit.forget();
    assert_eq!(gate.available(), 1);

    let second = gate.acquire().unwrap();
    assert!(matches!(gate.try_acquire(), Err(Error::NoPermits)));
    drop(second);

    assert_eq!(gate.available(), 1);
    assert_eq!(runtime.metrics().gate_holders, 1);
    assert!(runtime.shutdown(Duration::from_secs(5)));
}
