//! CLI command definitions and handlers

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sessiontrace_core::{BulkStore, HttpBulkStore, MemoryStore, PipelineConfig, PipelineError};
use sessiontrace_span::LoggingLevel;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::output::{print_output, ConfigView, HealthReport, OutputFormat};
use super::simulate::{run_simulation, SimulationPlan};
use super::ExitCode;

/// Session trace CLI
///
/// Inspect the pipeline configuration, probe the bulk store and run
/// synthetic sessions through the tracing pipeline.
#[derive(Parser, Debug)]
#[command(name = "sessiontrace")]
#[command(about = "Session trace pipeline tools", long_about = None)]
#[command(version)]
pub struct TraceCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: TraceCommands,
}

#[derive(Subcommand, Debug)]
pub enum TraceCommands {
    /// Print the effective configuration
    ///
    /// Values are read from the file (if any), then overridden by
    /// SESSIONTRACE_* environment variables, then validated.
    Config {
        /// Path to a TOML or YAML configuration file
        #[arg(short, long, env = "SESSIONTRACE_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Check that the configured store is reachable
    Health {
        /// Path to a TOML or YAML configuration file
        #[arg(short, long, env = "SESSIONTRACE_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Run synthetic sessions through the pipeline
    ///
    /// Every session executes a chain of nested steps. With --fail-at the
    /// step at that index fails and the session completes with errors.
    Simulate {
        /// Path to a TOML or YAML configuration file
        #[arg(short, long, env = "SESSIONTRACE_CONFIG")]
        config: Option<PathBuf>,

        /// Number of concurrent sessions
        #[arg(long, default_value_t = 10)]
        sessions: usize,

        /// Steps per session
        #[arg(long, default_value_t = 5)]
        steps: usize,

        /// Verbosity tier applied to every session
        #[arg(long, value_enum, default_value = "debug")]
        level: LevelArg,

        /// Zero-based index of the step that fails
        #[arg(long)]
        fail_at: Option<usize>,

        /// Write to an in-memory store instead of the configured endpoint
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

/// Tracing tier accepted on the command line
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum LevelArg {
    Off,
    Error,
    Info,
    Debug,
}

impl From<LevelArg> for LoggingLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Off => LoggingLevel::Off,
            LevelArg::Error => LoggingLevel::Error,
            LevelArg::Info => LoggingLevel::Info,
            LevelArg::Debug => LoggingLevel::Debug,
        }
    }
}

/// Load the file (if any), apply environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .with_env_overrides(),
        None => PipelineConfig::from_env(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub fn execute_config(path: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let config = load_config(path.as_deref())?;
    print_output(&ConfigView::redacted(config), format)?;
    Ok(ExitCode::Success)
}

pub async fn execute_health(path: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let config = load_config(path.as_deref())?;
    let store = HttpBulkStore::new(config.store.clone())?;
    tracing::info!(endpoint = %store.endpoint(), "Probing store");

    let report = match store.health_check().await {
        Ok(healthy) => HealthReport::new(store.name(), store.endpoint(), healthy, None),
        Err(e) => HealthReport::new(store.name(), store.endpoint(), false, Some(e.to_string())),
    };
    print_output(&report, format)?;

    Ok(if report.healthy {
        ExitCode::Success
    } else {
        ExitCode::StoreUnavailable
    })
}

pub async fn execute_simulate(
    path: Option<PathBuf>,
    plan: SimulationPlan,
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let config = load_config(path.as_deref())?;
    if plan.fail_at.map_or(false, |step| step >= plan.steps) {
        return Err(PipelineError::config(format!(
            "--fail-at {} is outside the {} simulated steps",
            plan.fail_at.unwrap_or_default(),
            plan.steps
        ))
        .into());
    }

    let report = if dry_run {
        let memory = MemoryStore::new();
        let mut report = run_simulation(config.clone(), plan, Arc::new(memory.clone())).await?;
        report.stored_documents = Some(memory.count(&config.index_name));
        report
    } else {
        let store = HttpBulkStore::new(config.store.clone())?;
        run_simulation(config, plan, Arc::new(store)).await?
    };
    print_output(&report, format)?;

    Ok(if report.stats.lost > 0 {
        ExitCode::StoreUnavailable
    } else {
        ExitCode::Success
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition() {
        TraceCli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = TraceCli::try_parse_from([
            "sessiontrace",
            "-vv",
            "simulate",
            "--sessions",
            "3",
            "--steps",
            "4",
            "--level",
            "error",
            "--fail-at",
            "2",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            TraceCommands::Simulate {
                sessions,
                steps,
                level,
                fail_at,
                dry_run,
                ..
            } => {
                assert_eq!(sessions, 3);
                assert_eq!(steps, 4);
                assert_eq!(LoggingLevel::from(level), LoggingLevel::Error);
                assert_eq!(fail_at, Some(2));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_level() {
        let result = TraceCli::try_parse_from(["sessiontrace", "simulate", "--level", "verbose"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "queue_capacity = 42\nindex_name = \"traces\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.queue_capacity, 42);
        assert_eq!(config.index_name, "traces");
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "sampling_probability: 2.5").unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_simulate_rejects_fail_at_past_last_step() {
        let plan = SimulationPlan {
            sessions: 1,
            steps: 3,
            level: LoggingLevel::Error,
            fail_at: Some(3),
        };

        let error = tokio_test::block_on(execute_simulate(None, plan, true, OutputFormat::Json))
            .unwrap_err();
        assert_eq!(ExitCode::from_error(&error), ExitCode::InvalidInput);
        assert!(error.to_string().contains("--fail-at 3"));
    }
}
