//! CLI for the session trace pipeline

pub mod commands;
pub mod output;
pub mod simulate;

pub use commands::{LevelArg, TraceCli, TraceCommands};
pub use output::OutputFormat;
pub use simulate::{SimulationPlan, SimulationReport};

use colored::Colorize;
use sessiontrace_core::PipelineError;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Store unreachable, unhealthy, or spans were lost
    StoreUnavailable = 1,
    /// Invalid configuration or arguments
    InvalidInput = 3,
    /// File not found or inaccessible
    FileError = 4,
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Map a command failure to its exit code
    pub fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<PipelineError>() {
            Some(PipelineError::Config(_)) => ExitCode::InvalidInput,
            Some(PipelineError::Io(_)) => ExitCode::FileError,
            Some(e) if e.is_retryable() => ExitCode::StoreUnavailable,
            _ => ExitCode::InternalError,
        }
    }
}

/// Run a parsed command
pub async fn run(cli: TraceCli) -> anyhow::Result<ExitCode> {
    match cli.command {
        TraceCommands::Config { config, format } => commands::execute_config(config, format),
        TraceCommands::Health { config, format } => commands::execute_health(config, format).await,
        TraceCommands::Simulate {
            config,
            sessions,
            steps,
            level,
            fail_at,
            dry_run,
            format,
        } => {
            let plan = SimulationPlan {
                sessions,
                steps,
                level: level.into(),
                fail_at,
            };
            commands::execute_simulate(config, plan, dry_run, format).await
        }
    }
}

/// Run the CLI and report failures on stderr
pub async fn run_cli(cli: TraceCli) -> ExitCode {
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from_error(&e)
        }
    }
}
