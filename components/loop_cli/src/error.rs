//! Error types for the CLI

use loop_types::QueueError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// File I/O error
    #[error("File error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    ConfigError(#[from] serde_json::Error),

    /// Work could not be scheduled on the event loop
    #[error("Scheduling error: {0}")]
    QueueError(#[from] QueueError),

    /// No scenario has the given name
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// A scenario finished without reaching its expected end state
    #[error("Scenario '{scenario}' failed: {reason}")]
    ScenarioFailed {
        /// Scenario name
        scenario: String,
        /// What went wrong
        reason: String,
    },
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Routes panic messages through the log subscriber at `error` level.
///
/// Callback panics are also caught by the loop and reported through its
/// hooks, so they appear twice; panics anywhere else are only seen here.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| tracing::error!(%info, "panicked")));
}
