//! Unit tests for EventLoop

use event_runtime::{ClockMode, Deferred, EventLoop, LoopConfig, LoopExit, LoopState};
use loop_types::{Instant, QueueError, TaskError, TaskHandle, TaskKind};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn recorder() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(vec![]))
}

fn push(log: &Rc<RefCell<Vec<String>>>, entry: &str) -> impl FnOnce() + 'static {
    let log = log.clone();
    let entry = entry.to_string();
    move || log.borrow_mut().push(entry)
}

#[test]
fn new_event_loop_has_empty_queues() {
    let event_loop = EventLoop::new();
    assert!(event_loop.is_task_queue_empty());
    assert!(event_loop.is_microtask_queue_empty());
    assert_eq!(event_loop.producers(), 0);
}

#[test]
fn run_until_idle_on_empty_loop_returns_immediately() {
    let mut event_loop = EventLoop::new();
    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(event_loop.state(), LoopState::Idle);
}

#[test]
fn timers_run_in_due_time_order_on_virtual_clock() {
    let mut event_loop = EventLoop::deterministic();
    let log = recorder();

    event_loop.schedule_macrotask(Duration::from_millis(30), push(&log, "30")).unwrap();
    event_loop.schedule_macrotask(Duration::from_millis(10), push(&log, "10")).unwrap();
    event_loop.schedule_macrotask(Duration::from_millis(20), push(&log, "20")).unwrap();

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["10", "20", "30"]);
    assert_eq!(event_loop.now(), Instant::from_millis(30));
}

#[test]
fn wall_clock_loop_waits_for_timers() {
    let mut event_loop = EventLoop::new();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    event_loop
        .schedule_macrotask(Duration::from_millis(5), move || f.set(true))
        .unwrap();

    let started = std::time::Instant::now();
    event_loop.run_until_idle();
    assert!(fired.get());
    assert!(started.elapsed() >= Duration::from_millis(5));
}

#[test]
fn entry_work_runs_first_with_its_microtasks() {
    let mut event_loop = EventLoop::deterministic();
    let log = recorder();

    event_loop.schedule_macrotask(Duration::ZERO, push(&log, "task")).unwrap();
    let l = log.clone();
    event_loop.enter(move |handle| {
        l.borrow_mut().push("entry".into());
        handle.queue_microtask(push(&l, "micro")).unwrap();
    });

    event_loop.run_until_idle();
    assert_eq!(*log.borrow(), vec!["entry", "micro", "task"]);
}

#[test]
fn entry_work_runs_only_once() {
    let mut event_loop = EventLoop::deterministic();
    let runs = Rc::new(Cell::new(0));

    let r = runs.clone();
    event_loop.run_main(move |_| r.set(r.get() + 1));
    event_loop.run_until_idle();
    assert_eq!(runs.get(), 1);
}

#[test]
fn run_ready_does_not_move_the_clock() {
    let mut event_loop = EventLoop::deterministic();
    let log = recorder();

    event_loop.schedule_macrotask(Duration::ZERO, push(&log, "now")).unwrap();
    event_loop.schedule_macrotask(Duration::from_millis(10), push(&log, "later")).unwrap();

    assert_eq!(event_loop.run_ready(), LoopExit::Pending);
    assert_eq!(*log.borrow(), vec!["now"]);
    assert_eq!(event_loop.now(), Instant::ZERO);

    event_loop.advance_by(Duration::from_millis(10));
    assert_eq!(event_loop.run_ready(), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["now", "later"]);
}

#[test]
fn run_for_stops_at_deadline() {
    let mut event_loop = EventLoop::deterministic();
    let log = recorder();

    event_loop.schedule_macrotask(Duration::from_millis(10), push(&log, "10")).unwrap();
    event_loop.schedule_macrotask(Duration::from_millis(25), push(&log, "25")).unwrap();
    event_loop.schedule_macrotask(Duration::from_millis(40), push(&log, "40")).unwrap();

    assert_eq!(event_loop.run_for(Duration::from_millis(25)), LoopExit::Deadline);
    assert_eq!(*log.borrow(), vec!["10", "25"]);
    assert_eq!(event_loop.now(), Instant::from_millis(25));

    assert_eq!(event_loop.run_for(Duration::from_millis(100)), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["10", "25", "40"]);
    assert_eq!(event_loop.now(), Instant::from_millis(125));
}

#[test]
fn run_turns_limits_macrotasks() {
    let mut event_loop = EventLoop::deterministic();
    let log = recorder();
    for name in ["a", "b", "c"] {
        event_loop.schedule_macrotask(Duration::ZERO, push(&log, name)).unwrap();
    }

    assert_eq!(event_loop.run_turns(2), LoopExit::TurnLimit);
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(event_loop.run_turns(5), LoopExit::Idle);
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn stop_from_callback_ends_the_run() {
    let mut event_loop = EventLoop::deterministic();
    let handle = event_loop.handle();
    let log = recorder();

    let (h, l) = (handle.clone(), log.clone());
    handle
        .schedule_macrotask(Duration::ZERO, move || {
            l.borrow_mut().push("stopper".into());
            h.stop();
            h.queue_microtask(push(&l, "still drained")).unwrap();
        })
        .unwrap();
    handle.schedule_macrotask(Duration::ZERO, push(&log, "next")).unwrap();

    assert_eq!(event_loop.run_until_idle(), LoopExit::Stopped);
    assert_eq!(event_loop.state(), LoopState::Stopped);
    assert_eq!(*log.borrow(), vec!["stopper", "still drained"]);

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["stopper", "still drained", "next"]);
}

#[test]
fn stop_before_run_returns_stopped() {
    let mut event_loop = EventLoop::deterministic();
    let ran = Rc::new(Cell::new(false));
    let r = ran.clone();
    event_loop.schedule_macrotask(Duration::ZERO, move || r.set(true)).unwrap();

    event_loop.stop();
    assert_eq!(event_loop.run_forever(), LoopExit::Stopped);
    assert!(!ran.get());
}

#[test]
fn interval_repeats_until_deadline() {
    let mut event_loop = EventLoop::deterministic();
    let hits = Rc::new(Cell::new(0));

    let h = hits.clone();
    event_loop
        .set_interval(Duration::from_millis(10), move || h.set(h.get() + 1))
        .unwrap();

    assert_eq!(event_loop.run_for(Duration::from_millis(35)), LoopExit::Deadline);
    assert_eq!(hits.get(), 3);
    assert_eq!(event_loop.now(), Instant::from_millis(35));
    assert_eq!(event_loop.next_due_time(), Some(Instant::from_millis(40)));
}

#[test]
fn interval_can_cancel_itself() {
    let mut event_loop = EventLoop::deterministic();
    let handle = event_loop.handle();
    let hits = Rc::new(Cell::new(0));
    let own: Rc<Cell<Option<TaskHandle>>> = Rc::new(Cell::new(None));

    let (h, o, loop_handle) = (hits.clone(), own.clone(), handle.clone());
    let interval = handle
        .set_interval(Duration::from_millis(5), move || {
            h.set(h.get() + 1);
            if h.get() == 3 {
                if let Some(task) = o.get() {
                    loop_handle.cancel_macrotask(task);
                }
            }
        })
        .unwrap();
    own.set(Some(interval));

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(hits.get(), 3);
    assert_eq!(event_loop.now(), Instant::from_millis(15));
    assert_eq!(event_loop.stats().cancelled_tasks, 1);
}

#[test]
fn interval_period_is_clamped_to_minimum() {
    let config = LoopConfig::new()
        .with_clock(ClockMode::Virtual)
        .with_min_interval(Duration::from_millis(4));
    let event_loop = EventLoop::from_config(&config);

    event_loop.set_interval(Duration::ZERO, || {}).unwrap();
    assert_eq!(event_loop.next_due_time(), Some(Instant::from_millis(4)));
}

#[test]
fn panicking_macrotask_does_not_stop_the_loop() {
    let mut event_loop = EventLoop::deterministic();
    let errors = Rc::new(RefCell::new(vec![]));
    let log = recorder();

    let e = errors.clone();
    event_loop.on_task_error(move |err| e.borrow_mut().push(err.clone()));
    event_loop
        .schedule_macrotask(Duration::ZERO, || panic!("timer exploded"))
        .unwrap();
    event_loop.schedule_macrotask(Duration::ZERO, push(&log, "survivor")).unwrap();

    assert_eq!(event_loop.run_until_idle(), LoopExit::Idle);
    assert_eq!(*log.borrow(), vec!["survivor"]);
    assert_eq!(
        *errors.borrow(),
        vec![TaskError::CallbackPanic {
            kind: TaskKind::Macrotask,
            message: "timer exploded".into()
        }]
    );

    let stats = event_loop.stats();
    assert_eq!(stats.macrotasks_run, 2);
    assert_eq!(stats.task_errors, 1);
}

#[test]
fn panicking_entry_work_is_reported() {
    let mut event_loop = EventLoop::deterministic();
    let errors = Rc::new(Cell::new(0));
    let e = errors.clone();
    event_loop.on_task_error(move |_| e.set(e.get() + 1));

    assert_eq!(event_loop.run_main(|_| panic!("bad main")), LoopExit::Idle);
    assert_eq!(errors.get(), 1);
}

#[test]
fn macrotask_capacity_from_config() {
    let config = LoopConfig::new()
        .with_clock(ClockMode::Virtual)
        .with_macrotask_capacity(1);
    let event_loop = EventLoop::from_config(&config);

    let first = event_loop.schedule_macrotask(Duration::ZERO, || {}).unwrap();
    assert_eq!(
        event_loop.schedule_macrotask(Duration::ZERO, || {}),
        Err(QueueError::QueueOverflow {
            kind: TaskKind::Macrotask,
            capacity: 1
        })
    );

    assert!(event_loop.cancel_macrotask(first));
    assert!(event_loop.schedule_macrotask(Duration::ZERO, || {}).is_ok());
}

#[test]
fn microtask_capacity_does_not_refuse_reactions() {
    let config = LoopConfig::new()
        .with_clock(ClockMode::Virtual)
        .with_microtask_capacity(1);
    let mut event_loop = EventLoop::from_config(&config);
    let handle = event_loop.handle();

    event_loop.queue_microtask(|| {}).unwrap();
    assert!(event_loop.queue_microtask(|| {}).is_err());

    let source: Deferred<i32, String> = Deferred::resolved(&handle, 1);
    let a = source.map(|v| v + 1);
    let b = source.map(|v| v + 2);
    assert_eq!(handle.pending_microtasks(), 3);

    event_loop.run_until_idle();
    assert_eq!(a.value(), Some(2));
    assert_eq!(b.value(), Some(3));
    assert_eq!(event_loop.stats().microtasks_run, 3);
}

#[test]
fn run_for_on_virtual_clock_returns_with_idle_producers() {
    let mut event_loop = EventLoop::deterministic();
    let _remote = event_loop.remote();
    let (_deferred, _completer) = event_loop.completion::<i32, String>();
    assert_eq!(event_loop.producers(), 2);

    assert_eq!(event_loop.run_for(Duration::from_millis(10)), LoopExit::Deadline);
    assert_eq!(event_loop.now(), Instant::from_millis(10));
}

#[test]
fn run_for_on_virtual_clock_ingests_handed_over_work() {
    let mut event_loop = EventLoop::deterministic();
    let remote = event_loop.remote();
    let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    let r = ran.clone();
    remote
        .schedule_macrotask(Duration::from_millis(5), move || {
            r.store(true, std::sync::atomic::Ordering::SeqCst)
        })
        .unwrap();

    assert_eq!(event_loop.run_for(Duration::from_millis(10)), LoopExit::Deadline);
    assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(event_loop.now(), Instant::from_millis(10));
}

#[test]
fn dropping_the_loop_frees_unfinished_work() {
    let event_loop = EventLoop::deterministic();
    let handle = event_loop.handle();
    let sentinel = Rc::new(());
    let weak = Rc::downgrade(&sentinel);

    let (h, s) = (handle.clone(), sentinel.clone());
    handle
        .schedule_macrotask(Duration::from_millis(10), move || {
            let _ = (&h, &s);
        })
        .unwrap();
    let (h, s) = (handle.clone(), sentinel.clone());
    handle
        .set_interval(Duration::from_millis(5), move || {
            let _ = (&h, &s);
        })
        .unwrap();
    let (h, s) = (handle.clone(), sentinel);
    handle
        .queue_microtask(move || {
            let _ = (&h, &s);
        })
        .unwrap();

    drop(handle);
    drop(event_loop);
    assert!(weak.upgrade().is_none());
}
