//! End-to-end event loop tests
//!
//! Exercises queues, deferreds, timers and diagnostics together through the
//! public event_runtime API.

use event_runtime::{Deferred, EventLoop, LoopConfig, LoopExit};
use loop_types::{Instant, TaskError};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

type Log = Rc<RefCell<Vec<String>>>;

/// Test: The ordering law holds on the wall clock too
#[test]
fn test_e2e_ordering_on_wall_clock() {
    let mut event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let log: Log = Rc::default();

    let (l, h) = (log.clone(), handle.clone());
    handle
        .schedule_macrotask(Duration::from_millis(1), move || {
            l.borrow_mut().push("A".into());
            let l = l.clone();
            h.queue_microtask(move || l.borrow_mut().push("M1".into())).unwrap();
        })
        .unwrap();
    let l = log.clone();
    handle
        .schedule_macrotask(Duration::from_millis(1), move || l.borrow_mut().push("B".into()))
        .unwrap();

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["A", "M1", "B"]);
}

/// Test: The 42 -> 43 scenario from inside a macrotask
#[test]
fn test_e2e_reaction_before_second_macrotask() {
    let mut event_loop = EventLoop::deterministic();
    let log: Log = Rc::default();

    let l = log.clone();
    event_loop.run_main(move |handle| {
        let (l, h) = (l.clone(), handle.clone());
        handle
            .schedule_macrotask(Duration::ZERO, move || {
                l.borrow_mut().push("cb_a".into());
                let l2 = l.clone();
                let answer: Deferred<i32, String> = Deferred::new(&h, |resolve, _| {
                    resolve.resolve(42);
                });
                let _ = answer.map(move |v| l2.borrow_mut().push((v + 1).to_string()));
                let l3 = l.clone();
                h.schedule_macrotask(Duration::ZERO, move || l3.borrow_mut().push("cb_b".into()))
                    .unwrap();
            })
            .unwrap();
    });

    assert_eq!(*log.borrow(), vec!["cb_a", "43", "cb_b"]);
}

/// Test: A simulated request pipeline with a timeout and a fallback
#[test]
fn test_e2e_request_pipeline() {
    let config = LoopConfig::from_json_str(r#"{ "clock": "virtual", "macrotask_capacity": 16 }"#).unwrap();
    let mut event_loop = EventLoop::from_config(&config);
    let handle = event_loop.handle();

    let fetch = |ms: u64, body: &'static str| {
        Deferred::<&'static str, String>::resolve_after(&handle, Duration::from_millis(ms), body).unwrap()
    };

    let fast = fetch(10, "profile");
    let slow = fetch(500, "recommendations")
        .timeout(Duration::from_millis(100), "recommendations timed out".into())
        .unwrap()
        .catch(|_| Ok::<_, String>("cached recommendations"));
    let page = Deferred::all(&handle, vec![fast, slow]).map(|parts| parts.join(" + "));

    event_loop.run_for(Duration::from_millis(200));
    assert_eq!(page.value(), Some("profile + cached recommendations".to_string()));
    assert_eq!(event_loop.now(), Instant::from_millis(200));

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(event_loop.now(), Instant::from_millis(500));
    assert_eq!(event_loop.stats().unhandled_rejections, 0);
}

/// Test: Diagnostics from every source arrive through the hooks
#[test]
fn test_e2e_diagnostics() {
    let mut event_loop = EventLoop::deterministic();
    let handle = event_loop.handle();
    let diagnostics = Rc::new(RefCell::new(Vec::<TaskError>::new()));

    let d = diagnostics.clone();
    event_loop.on_task_error(move |err| d.borrow_mut().push(err.clone()));
    let d = diagnostics.clone();
    event_loop.on_unhandled_rejection(move |err| d.borrow_mut().push(err.clone()));

    let h = handle.clone();
    handle
        .schedule_macrotask(Duration::from_millis(5), move || {
            let _ = Deferred::<(), String>::resolved(&h, ()).and_then(|_| Err::<(), String>("step failed".to_string()));
            h.queue_microtask(|| panic!("microtask failed")).unwrap();
        })
        .unwrap();

    event_loop.run_until_idle();
    let diagnostics = diagnostics.borrow();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().any(TaskError::is_unhandled_rejection));
    assert!(diagnostics
        .iter()
        .any(|err| err.to_string() == "microtask callback panicked: microtask failed"));
    assert_eq!(event_loop.stats().task_errors, 1);
    assert_eq!(event_loop.stats().unhandled_rejections, 1);
}
