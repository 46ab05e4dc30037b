//! Producer thread integration tests
//!
//! Tests work handed to the loop from other threads through RemoteHandle
//! and Completer while the loop runs on the test thread.

use event_runtime::{Deferred, EventLoop, LoopExit};
use loop_types::Instant;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Test: Each producer's tasks run in the order it sent them
#[test]
fn test_many_producers_keep_per_producer_order() {
    let mut event_loop = EventLoop::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    crossbeam::scope(|scope| {
        for producer in 0..4 {
            let remote = event_loop.remote();
            let log = Arc::clone(&log);
            scope.spawn(move |_| {
                for seq in 0..25 {
                    let log = Arc::clone(&log);
                    remote
                        .schedule_macrotask(Duration::ZERO, move || log.lock().push((producer, seq)))
                        .unwrap();
                }
            });
        }
        assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    })
    .unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 100);
    for producer in 0..4 {
        let seqs: Vec<_> = log.iter().filter(|(p, _)| *p == producer).map(|(_, s)| *s).collect();
        assert_eq!(seqs, (0..25).collect::<Vec<_>>());
    }
    assert_eq!(event_loop.stats().macrotasks_run, 100);
}

/// Test: Completions arriving out of order still combine in input order
#[test]
fn test_completions_combine_with_all() {
    let mut event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let mut inputs = Vec::new();
    let mut workers = Vec::new();
    for i in 0..3u64 {
        let (deferred, completer) = event_loop.completion::<u64, String>();
        inputs.push(deferred);
        workers.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(2 * (3 - i)));
            completer.resolve(i * 10).unwrap();
        }));
    }
    let all = Deferred::all(&handle, inputs);

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(all.value(), Some(vec![0, 10, 20]));
}

/// Test: A remote stop ends run_forever while an interval keeps the loop busy
#[test]
fn test_remote_stop_interrupts_interval() {
    let mut event_loop = EventLoop::new();
    let ticks = Arc::new(AtomicUsize::new(0));

    let t = Arc::clone(&ticks);
    event_loop
        .set_interval(Duration::from_millis(1), move || {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let remote = event_loop.remote();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.stop().unwrap();
    });

    assert_eq!(event_loop.run_forever(), LoopExit::Stopped);
    stopper.join().unwrap();
    assert!(ticks.load(Ordering::SeqCst) > 0);
}

/// Test: A completer dropped without completing releases the loop
#[test]
fn test_abandoned_completer_leaves_deferred_pending() {
    let mut event_loop = EventLoop::new();
    let (deferred, completer) = event_loop.completion::<(), String>();

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(2));
        drop(completer);
    });

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert!(deferred.is_pending());
    assert_eq!(event_loop.producers(), 0);
}

/// Test: Remote delays are measured on the loop's virtual clock
#[test]
fn test_remote_delay_on_virtual_clock() {
    let mut event_loop = EventLoop::deterministic();
    let remote = event_loop.remote();
    let fired_at = Arc::new(Mutex::new(None));

    let f = Arc::clone(&fired_at);
    let producer = thread::spawn(move || {
        remote
            .schedule_macrotask(Duration::from_millis(50), move || *f.lock() = Some(()))
            .unwrap();
    });

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    producer.join().unwrap();
    assert!(fired_at.lock().is_some());
    assert_eq!(event_loop.now(), Instant::from_millis(50));
}
