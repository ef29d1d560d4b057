//! Command-line tools for the session trace pipeline.
//!
//! - `config` prints the effective pipeline configuration
//! - `health` probes the configured bulk store
//! - `simulate` drives synthetic sessions through a real pipeline

pub mod cli;

pub use cli::{run_cli, ExitCode, TraceCli, TraceCommands};
