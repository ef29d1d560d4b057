//! Output formatting for the CLI
//!
//! Every report renders as JSON, YAML, TOML or a human-readable table.

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use sessiontrace_core::{PipelineConfig, PipelineStats};

use super::simulate::SimulationReport;

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table format with colors
    #[default]
    Table,
    /// JSON format for machine processing
    Json,
    /// YAML format
    Yaml,
    /// TOML format, loadable with --config
    Toml,
}

/// Reports that know how to print themselves as a table
pub trait TableOutput {
    fn to_table(&self) -> String;
}

pub fn render<T: Serialize + TableOutput>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Table => value.to_table(),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Toml => toml::to_string_pretty(value)?,
    })
}

pub fn print_output<T: Serialize + TableOutput>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render(value, format)?);
    Ok(())
}

fn row(out: &mut String, name: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("  {:<32} {}\n", name, value));
}

/// Configuration with credentials masked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigView(pub PipelineConfig);

impl ConfigView {
    pub fn redacted(mut config: PipelineConfig) -> Self {
        if config.store.password.is_some() {
            config.store.password = Some("********".to_string());
        }
        Self(config)
    }
}

impl TableOutput for ConfigView {
    fn to_table(&self) -> String {
        let c = &self.0;
        let mut out = format!("{}\n", "Pipeline configuration".bold());
        row(&mut out, "queue_capacity", c.queue_capacity);
        row(&mut out, "queue_max_bytes", c.queue_max_bytes);
        row(&mut out, "bulk_request_max_bytes", c.bulk_request_max_bytes);
        row(&mut out, "single_payload_threshold_bytes", c.single_payload_threshold_bytes);
        row(&mut out, "batch_element_threshold", c.batch_element_threshold);
        row(&mut out, "drain_batch_size", c.drain_batch_size);
        row(&mut out, "min_bulk_batch_len", c.min_bulk_batch_len);
        row(&mut out, "min_retry_delay_ms", c.min_retry_delay_ms);
        row(&mut out, "max_retry_delay_ms", c.max_retry_delay_ms);
        row(&mut out, "max_write_retries", c.max_write_retries);
        row(&mut out, "sampling_probability", c.sampling_probability);
        row(&mut out, "index_name", &c.index_name);
        out.push_str(&format!("{}\n", "Store".bold()));
        row(&mut out, "endpoint", &c.store.endpoint);
        row(&mut out, "timeout_ms", c.store.timeout_ms);
        row(&mut out, "username", c.store.username.as_deref().unwrap_or("-"));
        row(&mut out, "password", c.store.password.as_deref().unwrap_or("-"));
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub store: String,
    pub endpoint: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn new(store: &str, endpoint: &str, healthy: bool, error: Option<String>) -> Self {
        Self {
            store: store.to_string(),
            endpoint: endpoint.to_string(),
            healthy,
            error,
        }
    }
}

impl TableOutput for HealthReport {
    fn to_table(&self) -> String {
        let status = if self.healthy {
            "HEALTHY".green().bold()
        } else {
            "UNAVAILABLE".red().bold()
        };
        let mut out = format!("{} {}\n", status, self.endpoint);
        row(&mut out, "store", &self.store);
        if let Some(error) = &self.error {
            row(&mut out, "error", error.red());
        }
        out
    }
}

fn stats_rows(out: &mut String, stats: &PipelineStats) {
    row(out, "scheduled", stats.scheduled);
    row(out, "flushed", stats.flushed);
    let dropped = if stats.dropped > 0 {
        stats.dropped.to_string().yellow()
    } else {
        stats.dropped.to_string().normal()
    };
    row(out, "dropped", dropped);
    let lost = if stats.lost > 0 {
        stats.lost.to_string().red()
    } else {
        stats.lost.to_string().normal()
    };
    row(out, "lost", lost);
    row(out, "skipped", stats.skipped);
    row(out, "queued_bytes", stats.queued_bytes);
    row(out, "active_sessions", stats.active_sessions);
}

impl TableOutput for SimulationReport {
    fn to_table(&self) -> String {
        let mut out = format!("{}\n", "Simulation".bold());
        row(&mut out, "sessions", self.sessions);
        row(&mut out, "steps_per_session", self.steps_per_session);
        row(&mut out, "level", self.level);
        row(&mut out, "sampled_sessions", self.sampled_sessions);
        row(&mut out, "elapsed_ms", self.elapsed_ms);
        if let Some(stored) = self.stored_documents {
            row(&mut out, "stored_documents", stored);
        }
        out.push_str(&format!("{}\n", "Pipeline".bold()));
        stats_rows(&mut out, &self.stats);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_redacts_password() {
        let mut config = PipelineConfig::default();
        config.store.password = Some("hunter2".to_string());

        let view = ConfigView::redacted(config);
        let json = render(&view, OutputFormat::Json).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(view.to_table().contains("********"));
    }

    #[test]
    fn test_config_toml_round_trips() {
        let view = ConfigView::redacted(PipelineConfig::default());
        let rendered = render(&view, OutputFormat::Toml).unwrap();
        let parsed: PipelineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, PipelineConfig::default());
    }

    #[test]
    fn test_health_report_formats() {
        let report = HealthReport::new("http", "http://localhost:9200", false, Some("refused".into()));
        let yaml = render(&report, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("healthy: false"));
        assert!(report.to_table().contains("refused"));
    }
}
