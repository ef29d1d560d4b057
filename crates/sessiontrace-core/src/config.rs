//! Pipeline configuration
//!
//! Defaults suit a single engine node writing to one search cluster. Values
//! can come from a TOML or YAML file, from `SESSIONTRACE_*` environment
//! variables, or both (environment wins).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PipelineError, Result};

const ENV_PREFIX: &str = "SESSIONTRACE_";

/// Connection settings for the bulk store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the search cluster
    pub endpoint: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,

    /// Basic-auth user, if the cluster requires one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9200".to_string(),
            timeout_ms: 10_000,
            username: None,
            password: None,
        }
    }
}

/// Configuration for the tracing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of spans waiting in the write queue
    pub queue_capacity: usize,

    /// Watermark for the summed estimated size of queued spans
    pub queue_max_bytes: usize,

    /// Maximum accumulated payload of one bulk request
    pub bulk_request_max_bytes: usize,

    /// A serialized span larger than this is sent in its own request
    pub single_payload_threshold_bytes: usize,

    /// Maximum number of spans in one bulk request
    pub batch_element_threshold: usize,

    /// Maximum number of spans the writer drains per cycle
    pub drain_batch_size: usize,

    /// Drained batches shorter than this are sent span by span
    pub min_bulk_batch_len: usize,

    /// First non-zero backoff delay in milliseconds
    pub min_retry_delay_ms: u64,

    /// Backoff cap in milliseconds
    pub max_retry_delay_ms: u64,

    /// Retry attempts per sub-batch before it is dropped
    pub max_write_retries: u32,

    /// Probability that an INFO/DEBUG session is traced
    pub sampling_probability: f64,

    /// Target index for span documents
    pub index_name: String,

    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            queue_max_bytes: 128 * 1024 * 1024,
            bulk_request_max_bytes: 10 * 1024 * 1024,
            single_payload_threshold_bytes: 2 * 1024 * 1024,
            batch_element_threshold: 500,
            drain_batch_size: 1_000,
            min_bulk_batch_len: 2,
            min_retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
            max_write_retries: 5,
            sampling_probability: 1.0,
            index_name: "sessions".to_string(),
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Defaults overridden by `SESSIONTRACE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a TOML (`.toml`) or YAML (`.yaml`/`.yml`) file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config: Self = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| PipelineError::config(format!("TOML error: {}", e)))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| PipelineError::config(format!("YAML error: {}", e)))?,
            _ => {
                return Err(PipelineError::config(format!(
                    "unsupported config file extension: {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of this configuration
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source. Unparsable values
    /// keep the current setting.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_into<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
                *target = parsed;
            }
        }
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        parse_into(var("QUEUE_CAPACITY"), &mut self.queue_capacity);
        parse_into(var("QUEUE_MAX_BYTES"), &mut self.queue_max_bytes);
        parse_into(var("BULK_REQUEST_MAX_BYTES"), &mut self.bulk_request_max_bytes);
        parse_into(
            var("SINGLE_PAYLOAD_THRESHOLD_BYTES"),
            &mut self.single_payload_threshold_bytes,
        );
        parse_into(var("BATCH_ELEMENT_THRESHOLD"), &mut self.batch_element_threshold);
        parse_into(var("DRAIN_BATCH_SIZE"), &mut self.drain_batch_size);
        parse_into(var("MIN_BULK_BATCH_LEN"), &mut self.min_bulk_batch_len);
        parse_into(var("MIN_RETRY_DELAY_MS"), &mut self.min_retry_delay_ms);
        parse_into(var("MAX_RETRY_DELAY_MS"), &mut self.max_retry_delay_ms);
        parse_into(var("MAX_WRITE_RETRIES"), &mut self.max_write_retries);
        parse_into(var("SAMPLING_PROBABILITY"), &mut self.sampling_probability);
        if let Some(index) = var("INDEX_NAME") {
            self.index_name = index;
        }
        if let Some(endpoint) = var("STORE_ENDPOINT") {
            self.store.endpoint = endpoint;
        }
        parse_into(var("STORE_TIMEOUT_MS"), &mut self.store.timeout_ms);
        if let Some(username) = var("STORE_USERNAME") {
            self.store.username = Some(username);
        }
        if let Some(password) = var("STORE_PASSWORD") {
            self.store.password = Some(password);
        }
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::config("queue_capacity must be positive"));
        }
        if self.queue_max_bytes == 0 {
            return Err(PipelineError::config("queue_max_bytes must be positive"));
        }
        if self.batch_element_threshold == 0 || self.drain_batch_size == 0 {
            return Err(PipelineError::config(
                "batch_element_threshold and drain_batch_size must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.sampling_probability) {
            return Err(PipelineError::config(format!(
                "sampling_probability must be within [0, 1], got {}",
                self.sampling_probability
            )));
        }
        if self.min_retry_delay_ms > self.max_retry_delay_ms {
            return Err(PipelineError::config(
                "min_retry_delay_ms must not exceed max_retry_delay_ms",
            ));
        }
        if self.bulk_request_max_bytes < self.single_payload_threshold_bytes {
            return Err(PipelineError::config(
                "bulk_request_max_bytes must be at least single_payload_threshold_bytes",
            ));
        }
        if self.index_name.is_empty() {
            return Err(PipelineError::config("index_name must not be empty"));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn queue_max_bytes(mut self, bytes: usize) -> Self {
        self.config.queue_max_bytes = bytes;
        self
    }

    /// Set both request-size thresholds
    pub fn request_limits(mut self, bulk_max_bytes: usize, single_threshold_bytes: usize) -> Self {
        self.config.bulk_request_max_bytes = bulk_max_bytes;
        self.config.single_payload_threshold_bytes = single_threshold_bytes;
        self
    }

    pub fn batch_element_threshold(mut self, count: usize) -> Self {
        self.config.batch_element_threshold = count;
        self
    }

    pub fn drain_batch_size(mut self, count: usize) -> Self {
        self.config.drain_batch_size = count;
        self
    }

    pub fn min_bulk_batch_len(mut self, len: usize) -> Self {
        self.config.min_bulk_batch_len = len;
        self
    }

    /// Set retry configuration
    pub fn retry_config(mut self, max_retries: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.max_write_retries = max_retries;
        self.config.min_retry_delay_ms = min_delay_ms;
        self.config.max_retry_delay_ms = max_delay_ms;
        self
    }

    pub fn sampling_probability(mut self, probability: f64) -> Self {
        self.config.sampling_probability = probability;
        self
    }

    pub fn index_name(mut self, index: impl Into<String>) -> Self {
        self.config.index_name = index.into();
        self
    }

    pub fn store_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.store.endpoint = endpoint.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.max_write_retries, 5);
        assert_eq!(config.sampling_probability, 1.0);
        assert_eq!(config.index_name, "sessions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::builder()
            .queue_capacity(64)
            .queue_max_bytes(4096)
            .request_limits(2048, 512)
            .batch_element_threshold(10)
            .retry_config(2, 5, 50)
            .sampling_probability(0.25)
            .index_name("traces")
            .build()
            .unwrap();

        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.queue_max_bytes, 4096);
        assert_eq!(config.bulk_request_max_bytes, 2048);
        assert_eq!(config.single_payload_threshold_bytes, 512);
        assert_eq!(config.max_write_retries, 2);
        assert_eq!(config.min_retry_delay_ms, 5);
        assert_eq!(config.index_name, "traces");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(PipelineConfig::builder().queue_capacity(0).build().is_err());
        assert!(PipelineConfig::builder()
            .sampling_probability(1.5)
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .retry_config(3, 1000, 10)
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .request_limits(100, 1000)
            .build()
            .is_err());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SESSIONTRACE_QUEUE_CAPACITY", "42"),
            ("SESSIONTRACE_SAMPLING_PROBABILITY", "0.5"),
            ("SESSIONTRACE_STORE_ENDPOINT", "http://search:9200"),
            ("SESSIONTRACE_MAX_WRITE_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::default()
            .with_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.queue_capacity, 42);
        assert_eq!(config.sampling_probability, 0.5);
        assert_eq!(config.store.endpoint, "http://search:9200");
        assert_eq!(config.max_write_retries, 5);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "queue_capacity = 256\nindex_name = \"chain-sessions\"\n\n[store]\nendpoint = \"http://es:9200\""
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.index_name, "chain-sessions");
        assert_eq!(config.store.endpoint, "http://es:9200");
        assert_eq!(config.batch_element_threshold, 500);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "sampling_probability: 0.1\nmax_write_retries: 7").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sampling_probability, 0.1);
        assert_eq!(config.max_write_retries, 7);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
