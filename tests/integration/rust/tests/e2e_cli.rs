//! End-to-End CLI Integration Tests
//!
//! Runs the demonstration scenarios through the loop_cli Runtime API, the
//! same path the `corten-loop` binary takes.

use event_runtime::{ClockMode, LoopConfig};
use loop_cli::{Runtime, Scenario};

/// Test: Every scenario renders with statistics
#[test]
fn test_e2e_all_scenarios_render() {
    let runtime = Runtime::new(LoopConfig::new().with_clock(ClockMode::Virtual));
    let reports = runtime.run(Scenario::All).expect("scenarios failed");
    assert_eq!(reports.len(), Scenario::EACH.len());

    for report in &reports {
        let text = report.render(true).expect("render failed");
        assert!(text.starts_with(&format!("== {} ==\n", report.scenario)));
        assert!(text.contains("stats: {\"macrotasks_run\":"));
    }
}

/// Test: Scenario statistics reflect the work done
#[test]
fn test_e2e_scenario_stats() {
    let runtime = Runtime::default().with_virtual_time(true);

    let ordering = runtime.run(Scenario::Ordering).unwrap().remove(0);
    assert_eq!(ordering.stats.macrotasks_run, 1);
    assert_eq!(ordering.stats.microtasks_run, 3);

    let timers = runtime.run(Scenario::Timers).unwrap().remove(0);
    assert_eq!(timers.stats.cancelled_tasks, 2);
}
