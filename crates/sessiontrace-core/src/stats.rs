//! Pipeline counters
//!
//! Shared between producers and the writer; read through
//! [`crate::TracePipeline::stats`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) scheduled: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) flushed: AtomicU64,
    pub(crate) lost: AtomicU64,
    pub(crate) skipped: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Increment `dropped` and return the previous value.
    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed)
    }
}

/// Point-in-time view of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Spans accepted by the write queue
    pub scheduled: u64,
    /// Spans refused by the write queue
    pub dropped: u64,
    /// Spans acknowledged by the store
    pub flushed: u64,
    /// Spans abandoned after store failures
    pub lost: u64,
    /// Spans that could not be serialized
    pub skipped: u64,
    /// Estimated bytes currently queued
    pub queued_bytes: usize,
    pub active_sessions: usize,
}

impl PipelineStats {
    pub(crate) fn collect(
        counters: &PipelineCounters,
        queued_bytes: usize,
        active_sessions: usize,
    ) -> Self {
        Self {
            scheduled: counters.scheduled.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            flushed: counters.flushed.load(Ordering::Relaxed),
            lost: counters.lost.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            queued_bytes,
            active_sessions,
        }
    }
}
