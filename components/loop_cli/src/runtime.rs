//! Runtime orchestration for the demonstration scenarios
//!
//! The Runtime builds a fresh [`EventLoop`] per scenario from its
//! [`LoopConfig`], installs diagnostic hooks that write into the scenario's
//! [`Trace`], runs the scenario to completion and returns a [`Report`].

use crate::cli::Scenario;
use crate::error::{CliError, CliResult};
use event_runtime::{ClockMode, Deferred, EventLoop, LoopConfig, LoopStats};
use loop_types::{QueueError, TaskHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Ordered log of what a scenario did.
///
/// Cloning shares the log. It is `Send`, so worker threads can hand lines
/// to the loop inside remote macrotasks.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    /// Creates an empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line
    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    /// Snapshot of every line so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Scenario name
    pub scenario: String,
    /// Lines logged by the scenario and by the loop's diagnostic hooks
    pub trace: Vec<String>,
    /// Loop counters at the end of the run
    pub stats: LoopStats,
}

impl Report {
    /// Formats the report for the terminal
    ///
    /// # Errors
    /// Returns `CliError::ConfigError` if the statistics cannot be serialized
    pub fn render(&self, with_stats: bool) -> CliResult<String> {
        let mut out = format!("== {} ==\n", self.scenario);
        for line in &self.trace {
            out.push_str(line);
            out.push('\n');
        }
        if with_stats {
            out.push_str(&format!("stats: {}\n", serde_json::to_string(&self.stats)?));
        }
        Ok(out)
    }
}

/// Runs demonstration scenarios on freshly configured event loops
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    config: LoopConfig,
}

impl Runtime {
    /// Create a new runtime instance
    ///
    /// # Example
    /// ```
    /// use event_runtime::{ClockMode, LoopConfig};
    /// use loop_cli::{Runtime, Scenario};
    ///
    /// let runtime = Runtime::new(LoopConfig::new().with_clock(ClockMode::Virtual));
    /// let reports = runtime.run(Scenario::Ordering).unwrap();
    /// assert_eq!(reports[0].trace[0], "script start");
    /// ```
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    /// Create a runtime from a JSON configuration file
    ///
    /// # Errors
    /// Returns `CliError` if the file cannot be read or parsed
    pub fn from_config_file(path: &str) -> CliResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::new(LoopConfig::from_json_str(&json)?))
    }

    /// Force the virtual clock on, whatever the configuration says
    pub fn with_virtual_time(mut self, enabled: bool) -> Self {
        if enabled {
            self.config.clock = ClockMode::Virtual;
        }
        self
    }

    /// The configuration every scenario's loop is built from
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run a scenario, or every scenario for [`Scenario::All`]
    ///
    /// # Errors
    /// Returns `CliError` if a scenario cannot schedule its work or does not
    /// reach its expected end state
    pub fn run(&self, scenario: Scenario) -> CliResult<Vec<Report>> {
        match scenario {
            Scenario::All => Scenario::EACH.iter().map(|&each| self.run_one(each)).collect(),
            single => Ok(vec![self.run_one(single)?]),
        }
    }

    fn run_one(&self, scenario: Scenario) -> CliResult<Report> {
        tracing::info!(scenario = %scenario, clock = ?self.config.clock, "running scenario");
        let mut event_loop = EventLoop::from_config(&self.config);
        let trace = Trace::new();

        let t = trace.clone();
        event_loop.on_task_error(move |err| t.push(format!("task error: {}", err)));
        let t = trace.clone();
        event_loop.on_unhandled_rejection(move |err| t.push(err.to_string()));

        match scenario {
            Scenario::Ordering => ordering(&mut event_loop, &trace)?,
            Scenario::Chain => chain(&mut event_loop, &trace)?,
            Scenario::Timers => timers(&mut event_loop, &trace)?,
            Scenario::Rejection => rejection(&mut event_loop, &trace)?,
            Scenario::Remote => remote(&mut event_loop, &trace)?,
            Scenario::All => return Err(CliError::UnknownScenario(scenario.to_string())),
        }

        Ok(Report {
            scenario: scenario.to_string(),
            trace: trace.lines(),
            stats: event_loop.stats(),
        })
    }
}

fn failed(scenario: Scenario, reason: impl Into<String>) -> CliError {
    CliError::ScenarioFailed {
        scenario: scenario.to_string(),
        reason: reason.into(),
    }
}

/// Synchronous code first, then reactions in FIFO order, then timers.
fn ordering(event_loop: &mut EventLoop, trace: &Trace) -> CliResult<()> {
    let handle = event_loop.handle();
    trace.push("script start");

    let t = trace.clone();
    handle.schedule_macrotask(Duration::ZERO, move || t.push("macrotask: timer"))?;

    let (t1, t2) = (trace.clone(), trace.clone());
    let _reactions = Deferred::<(), ()>::resolved(&handle, ())
        .map(move |_| t1.push("microtask: reaction 1"))
        .map(move |_| t2.push("microtask: reaction 2"));

    let t = trace.clone();
    handle.queue_microtask(move || t.push("microtask: queued"))?;

    trace.push("script end");
    event_loop.run_until_idle();
    Ok(())
}

fn chain(event_loop: &mut EventLoop, trace: &Trace) -> CliResult<()> {
    let handle = event_loop.handle();
    let (t1, t2, t3, t4) = (trace.clone(), trace.clone(), trace.clone(), trace.clone());

    let done = Deferred::<u32, String>::resolve_after(&handle, Duration::from_millis(10), 1)?
        .map(move |v| {
            t1.push(format!("step 1: got {}", v));
            v * 2
        })
        .and_then(move |v| -> Result<u32, String> {
            t2.push(format!("step 2: got {}", v));
            Err(format!("refusing {}", v))
        })
        .catch(move |e| {
            t3.push(format!("recovered from: {}", e));
            Ok::<_, String>(0)
        })
        .finally(move || t4.push("finally"));

    event_loop.run_until_idle();
    let value = done
        .value()
        .ok_or_else(|| failed(Scenario::Chain, "chain never settled"))?;
    trace.push(format!("result: {}", value));
    Ok(())
}

fn timers(event_loop: &mut EventLoop, trace: &Trace) -> CliResult<()> {
    let handle = event_loop.handle();

    let ticks = Rc::new(Cell::new(0));
    let own: Rc<Cell<Option<TaskHandle>>> = Rc::new(Cell::new(None));
    let (t, o, h) = (trace.clone(), Rc::clone(&own), handle.clone());
    let interval = handle.set_interval(Duration::from_millis(10), move || {
        ticks.set(ticks.get() + 1);
        t.push(format!("interval tick {}", ticks.get()));
        if ticks.get() == 3 {
            if let Some(task) = o.take() {
                h.cancel_macrotask(task);
                t.push("interval cleared");
            }
        }
    })?;
    own.set(Some(interval));

    let t = trace.clone();
    let doomed = handle.schedule_macrotask(Duration::from_millis(15), move || t.push("cancelled timer ran"))?;
    handle.cancel_macrotask(doomed);

    let t = trace.clone();
    handle.schedule_macrotask(Duration::from_millis(25), move || t.push("timer at 25ms"))?;

    let slow = Deferred::<&'static str, String>::resolve_after(&handle, Duration::from_millis(50), "slow result")?;
    let (ok, err) = (trace.clone(), trace.clone());
    let _outcome = slow.timeout(Duration::from_millis(35), "gave up after 35ms".into())?.then_either(
        move |v| {
            ok.push(format!("finished: {}", v));
            Ok::<(), ()>(())
        },
        move |e| {
            err.push(format!("timed out: {}", e));
            Ok(())
        },
    );

    event_loop.run_until_idle();
    Ok(())
}

fn rejection(event_loop: &mut EventLoop, trace: &Trace) -> CliResult<()> {
    let handle = event_loop.handle();

    let _ignored = Deferred::<u32, String>::rejected(&handle, "nobody listens".into());

    let t = trace.clone();
    let _handled = Deferred::<u32, String>::rejected(&handle, "somebody listens".into()).catch(move |e| {
        t.push(format!("caught: {}", e));
        Ok::<_, String>(0)
    });

    handle.schedule_macrotask(Duration::ZERO, || panic!("boom"))?;

    let late = Deferred::<u32, String>::rejected(&handle, "caught too late".into());
    let t = trace.clone();
    handle.schedule_macrotask(Duration::from_millis(5), move || {
        t.push("attaching late handler");
        let t = t.clone();
        let _ = late.catch(move |e| {
            t.push(format!("caught: {}", e));
            Ok::<_, String>(0)
        });
    })?;

    event_loop.run_until_idle();
    Ok(())
}

fn remote(event_loop: &mut EventLoop, trace: &Trace) -> CliResult<()> {
    let remote = event_loop.remote();
    let (sum, completer) = event_loop.completion::<u64, String>();

    let (ok, err) = (trace.clone(), trace.clone());
    let _printed = sum.then_either(
        move |v| {
            ok.push(format!("worker result: {}", v));
            Ok::<(), ()>(())
        },
        move |e| {
            err.push(format!("worker failed: {}", e));
            Ok(())
        },
    );

    let t = trace.clone();
    let worker = thread::spawn(move || -> Result<(), QueueError> {
        remote.schedule_macrotask(Duration::ZERO, move || t.push("hello from worker thread"))?;
        thread::sleep(Duration::from_millis(5));
        completer.resolve((1..=100u64).sum())
    });

    event_loop.run_until_idle();
    worker
        .join()
        .map_err(|_| failed(Scenario::Remote, "worker thread panicked"))??;

    if sum.is_pending() {
        return Err(failed(Scenario::Remote, "completion never arrived"));
    }
    Ok(())
}
