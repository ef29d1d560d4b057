//! Execution tracing and telemetry persistence for integration-chain sessions.
//!
//! The routing engine calls four hooks on a shared [`TracePipeline`]:
//! session start, span before, span after and session finish. The pipeline
//! decides per session how much to keep (see [`policy`]), caches spans in
//! memory while the session runs, and hands finished spans to a bounded
//! write queue. A single background writer batches them into bulk requests
//! against a [`store::BulkStore`].
//!
//! # Flow
//!
//! ```text
//! hook call ─▶ SessionRegistry ─▶ WriteQueue ─▶ BatchWriter ─▶ BulkStore
//!              (span caches)      (byte budget)  (backoff)
//! ```
//!
//! Telemetry is lossy under pressure: a full queue drops spans, and a store
//! that keeps failing eventually loses them. Neither ever surfaces to the
//! hook caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sessiontrace_core::{PipelineConfig, StaticPolicy, TracePipeline};
//! use sessiontrace_core::store::MemoryStore;
//! use sessiontrace_span::{LoggingLevel, SessionStart};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = TracePipeline::start(
//!         PipelineConfig::from_env(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(StaticPolicy::new(LoggingLevel::Debug)),
//!     )?;
//!     pipeline.on_session_start(SessionStart::new("s-1", "chain-1", "Orders"));
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod resolve;
pub mod stats;
pub mod store;
pub mod writer;

pub use config::{PipelineConfig, PipelineConfigBuilder, StoreConfig};
pub use error::{PipelineError, Result};
pub use pipeline::TracePipeline;
pub use policy::{LoggingPolicy, Sampler, StaticPolicy, TrackingMode};
pub use queue::{ScheduleOutcome, WriteQueue};
pub use registry::{CacheOutcome, SessionEntry, SessionRegistry};
pub use stats::PipelineStats;
pub use store::{BulkDocument, BulkResponse, BulkStore, HttpBulkStore, MemoryStore};

/// Store error reasons logged verbatim per failed request; the rest are counted.
pub const MAX_LOGGED_ERROR_REASONS: usize = 5;
