//! Corten event loop CLI
//!
//! Entry point for the scenario runner. Parses CLI arguments, installs the
//! log subscriber and delegates to the Runtime.

use clap::Parser as ClapParser;
use loop_cli::{install_panic_hook, Cli, CliError, Runtime};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    install_panic_hook();

    let runtime = match &cli.config {
        Some(path) => Runtime::from_config_file(path),
        None => Ok(Runtime::default()),
    }
    .map(|runtime| runtime.with_virtual_time(cli.virtual_time));

    let result = runtime.and_then(|runtime| {
        for report in runtime.run(cli.scenario)? {
            print!("{}", report.render(cli.stats)?);
        }
        Ok(())
    });

    match result {
        Ok(()) => {}
        Err(CliError::IoError(e)) => {
            eprintln!("Error: Could not read config file: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
