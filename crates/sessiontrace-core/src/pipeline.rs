//! Hook entry points
//!
//! [`TracePipeline`] owns the registry, the write queue and the writer task.
//! It is built once at process start and shared by handle with every hook
//! call site. Hooks are synchronous and never fail: problems are logged and
//! the affected telemetry is discarded.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sessiontrace_span::{
    ElementDescriptor, ElementSpan, ExecutionStatus, LoggingLevel, ParentHint, PayloadSnapshot,
    Session, SessionStart, SpanOutcome, SpanRef,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::policy::{LoggingPolicy, Sampler, TrackingMode};
use crate::queue::{write_queue, ScheduleOutcome, WriteQueue};
use crate::registry::{CacheOutcome, SessionRegistry};
use crate::stats::{PipelineCounters, PipelineStats};
use crate::store::BulkStore;
use crate::writer::BatchWriter;

struct WriterHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct TracePipeline {
    config: PipelineConfig,
    policy: Arc<dyn LoggingPolicy>,
    sampler: Sampler,
    registry: SessionRegistry,
    queue: WriteQueue,
    counters: Arc<PipelineCounters>,
    store: Arc<dyn BulkStore>,
    writer: Mutex<Option<WriterHandle>>,
}

impl TracePipeline {
    /// Validate the configuration and spawn the writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        store: Arc<dyn BulkStore>,
        policy: Arc<dyn LoggingPolicy>,
    ) -> Result<Self> {
        config.validate()?;

        let counters = Arc::new(PipelineCounters::default());
        let (queue, receiver) = write_queue(
            config.queue_capacity,
            config.queue_max_bytes,
            Arc::clone(&counters),
        );
        let writer = BatchWriter::new(&config, Arc::clone(&store), Arc::clone(&counters));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(writer.run(receiver, shutdown_rx));

        tracing::info!(
            store = store.name(),
            index = %config.index_name,
            queue_capacity = config.queue_capacity,
            queue_max_bytes = config.queue_max_bytes,
            sampling_probability = config.sampling_probability,
            "Trace pipeline started"
        );

        Ok(Self {
            sampler: Sampler::new(config.sampling_probability),
            config,
            policy,
            registry: SessionRegistry::new(),
            queue,
            counters,
            store,
            writer: Mutex::new(Some(WriterHandle { shutdown, task })),
        })
    }

    /// Register a session. Returns the sampling decision.
    ///
    /// Sessions whose chain resolves to [`LoggingLevel::Off`] are not
    /// registered and report `false`.
    pub fn on_session_start(&self, start: SessionStart) -> bool {
        let level = self.policy.session_level(&start.chain_id);
        if level == LoggingLevel::Off {
            tracing::trace!(session_id = %start.session_id, "Tracing off for chain");
            return false;
        }

        let sampled = self.sampler.sample();
        tracing::trace!(
            session_id = %start.session_id,
            chain_id = %start.chain_id,
            level = %level,
            sampled,
            "Session started"
        );
        self.registry.put(Session::new(start, level, sampled));
        sampled
    }

    /// Open a span for one element execution.
    ///
    /// The returned handle must be passed to [`Self::on_span_after`]. A
    /// handle is returned even when the span is not tracked.
    pub fn on_span_before(
        &self,
        session_id: &str,
        element: &ElementDescriptor,
        parent: Option<&ParentHint>,
        before: PayloadSnapshot,
    ) -> SpanRef {
        let span_ref = SpanRef {
            session_id: session_id.to_string(),
            span_id: Uuid::new_v4().to_string(),
        };

        let Some(entry) = self.registry.get(session_id) else {
            return span_ref;
        };
        let session = entry.read();
        let mode = TrackingMode::resolve(session.logging_level, session.sampled, entry.failure_seen());
        if mode == TrackingMode::Skip {
            return span_ref;
        }

        let parent_id = parent.and_then(|hint| self.registry.resolve_parent(session_id, hint));
        let capture = self
            .policy
            .capture_payload(&session.chain_id, &element.chain_element_id);
        let mut span = ElementSpan::new(
            span_ref.span_id.clone(),
            session_id,
            element,
            parent_id,
            Utc::now(),
            session.stamp(),
        );
        span.before = before.filtered(session.logging_level, capture);
        self.registry
            .record_execution(session_id, element.execution_key(), &span.id);

        match mode {
            TrackingMode::Full => {
                if let CacheOutcome::SessionClosed(span) = self.registry.upsert_span(session_id, span) {
                    self.schedule_cancelled(span);
                }
            }
            TrackingMode::LastOnly => {
                self.registry.put_last_span(session_id, span);
            }
            TrackingMode::Skip => {}
        }
        span_ref
    }

    /// Close a span opened by [`Self::on_span_before`].
    pub fn on_span_after(&self, span_ref: &SpanRef, after: PayloadSnapshot, outcome: SpanOutcome) {
        let session_id = span_ref.session_id.as_str();
        let span_id = span_ref.span_id.as_str();

        let Some(entry) = self.registry.get(session_id) else {
            return;
        };
        let session = entry.read();
        if !self.registry.is_registered(session_id) {
            tracing::debug!(session_id, span_id, "Span completed after its session finished");
            return;
        }

        let level = session.logging_level;
        let failed = outcome.is_failure();
        let finished_at = Utc::now();
        let complete = |span: &mut ElementSpan| {
            let capture = self
                .policy
                .capture_payload(&session.chain_id, &span.chain_element_id);
            span.complete(after.filtered(level, capture), outcome, finished_at);
            span.clone()
        };

        if self.registry.spans().contains(session_id, span_id) {
            if let Some(span) = self.registry.spans().update(session_id, span_id, complete) {
                self.schedule(span);
            }
            return;
        }

        if !failed {
            self.registry.last_spans().update(session_id, span_id, complete);
            return;
        }

        if let Some(mut held) = self.registry.last_spans().take_if(session_id, span_id) {
            entry.mark_failure();
            let span = complete(&mut held);
            if let CacheOutcome::SessionClosed(_) = self.registry.upsert_span(session_id, held) {
                tracing::debug!(session_id, span_id, "Session closed before failure was cached");
            }
            tracing::debug!(session_id, span_id, "Failure recorded, switching to full tracking");
            self.schedule(span);
        } else if level == LoggingLevel::Error {
            entry.mark_failure();
            if let Some(promoted) = self.registry.promote_to_full_cache(session_id) {
                if let Some(span) = self.registry.spans().get(session_id, &promoted) {
                    self.schedule(span);
                }
            }
        }
    }

    /// Finalize a session: stamp its outcome onto every cached span, persist
    /// them and drop all per-session state.
    ///
    /// Spans still in progress are persisted as
    /// [`ExecutionStatus::CancelledOrUnknown`].
    pub fn on_session_finish(
        &self,
        session_id: &str,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        let Some(entry) = self.registry.get(session_id) else {
            tracing::debug!(session_id, "Finish for unknown session ignored");
            return;
        };
        let mut session = entry.write();
        if !self.registry.is_registered(session_id) {
            return;
        }

        session.finish(status, finished_at, duration_ms);
        if status == ExecutionStatus::CompletedWithErrors
            && session.logging_level == LoggingLevel::Error
            && entry.mark_failure()
        {
            self.registry.promote_to_full_cache(session_id);
        }

        let stamp = session.stamp();
        let spans: Vec<ElementSpan> = match self.registry.spans().all_for_session(session_id) {
            Some(mut cached) => cached
                .values_mut()
                .map(|span| {
                    span.stamp_session(stamp.clone());
                    span.abandon();
                    span.clone()
                })
                .collect(),
            None => Vec::new(),
        };
        self.registry.clear(session_id);
        drop(session);

        tracing::trace!(
            session_id,
            status = %status,
            spans = spans.len(),
            "Session finished"
        );
        for span in spans {
            self.schedule(span);
        }
    }

    /// Attach a correlation id that finalize will stamp onto every span.
    pub fn set_correlation_id(&self, session_id: &str, correlation_id: impl Into<String>) -> bool {
        let Some(entry) = self.registry.get(session_id) else {
            return false;
        };
        let mut session = entry.write();
        if !self.registry.is_registered(session_id) {
            return false;
        }
        session.correlation_id = Some(correlation_id.into());
        true
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::collect(&self.counters, self.queue.queued_bytes(), self.registry.len())
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Check that the backing store is reachable
    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }

    /// Stop the writer after it has flushed everything already queued.
    ///
    /// Spans scheduled after this call are discarded.
    pub async fn shutdown(&self) {
        let handle = self.writer.lock().take();
        let Some(WriterHandle { shutdown, task }) = handle else {
            return;
        };
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Span writer task failed");
        }
        tracing::info!(stats = ?self.stats(), "Trace pipeline stopped");
    }

    fn schedule(&self, span: ElementSpan) -> ScheduleOutcome {
        self.queue.schedule(span)
    }

    fn schedule_cancelled(&self, mut span: ElementSpan) {
        span.abandon();
        tracing::debug!(
            session_id = %span.session_id,
            span_id = %span.id,
            "Span arrived for a finished session, persisting as cancelled"
        );
        self.schedule(span);
    }
}
