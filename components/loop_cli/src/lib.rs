//! Event loop demonstration CLI library
//!
//! Provides the Runtime struct and supporting modules for the `corten-loop`
//! binary, which runs named scenarios on the event loop and prints their
//! execution trace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runtime;

pub use cli::{Cli, Scenario};
pub use error::{install_panic_hook, CliError, CliResult};
pub use runtime::{Report, Runtime, Trace};
