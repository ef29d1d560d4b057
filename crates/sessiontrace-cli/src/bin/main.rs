//! Session trace CLI
//!
//! # Usage
//!
//! ```bash
//! # Show the configuration the pipeline would run with
//! sessiontrace config --config trace.toml --format yaml
//!
//! # Check that the search cluster accepts writes
//! sessiontrace health --config trace.toml
//!
//! # Push 50 synthetic sessions through an in-memory store
//! sessiontrace simulate --sessions 50 --steps 8 --level debug --fail-at 5 --dry-run
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Store unreachable or unhealthy
//! - 3: Invalid configuration or arguments
//! - 4: File not found or inaccessible
//! - 10: Internal error

use clap::Parser;
use sessiontrace_cli::{run_cli, TraceCli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = TraceCli::parse();

    let directive = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let exit_code = run_cli(cli).await;
    std::process::exit(exit_code.into());
}
