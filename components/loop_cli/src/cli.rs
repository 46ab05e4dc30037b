//! Command-line arguments

use clap::{Parser, ValueEnum};
use std::fmt;

/// Runs demonstration scenarios on the cooperative event loop
#[derive(Parser, Debug)]
#[command(name = "corten-loop", version, long_about = None)]
pub struct Cli {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value_t = Scenario::All)]
    pub scenario: Scenario,

    /// Use a virtual clock, so timers fire instantly and deterministically
    #[arg(long)]
    pub virtual_time: bool,

    /// Path to a JSON loop configuration
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print loop statistics as JSON after each scenario
    #[arg(long)]
    pub stats: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// A named demonstration scenario
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Synchronous code, then microtasks, then macrotasks
    Ordering,
    /// A deferred chain with a failing step and recovery
    Chain,
    /// Intervals, cancellation and a timeout
    Timers,
    /// Unhandled rejections and panicking callbacks
    Rejection,
    /// Work handed over from a worker thread
    Remote,
    /// Every scenario in turn
    All,
}

impl Scenario {
    /// Every runnable scenario, in the order `All` runs them.
    pub const EACH: [Scenario; 5] = [
        Scenario::Ordering,
        Scenario::Chain,
        Scenario::Timers,
        Scenario::Rejection,
        Scenario::Remote,
    ];

    /// The scenario's command-line name.
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Ordering => "ordering",
            Scenario::Chain => "chain",
            Scenario::Timers => "timers",
            Scenario::Rejection => "rejection",
            Scenario::Remote => "remote",
            Scenario::All => "all",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
