//! Batching writer
//!
//! The single consumer of the write queue. Each wake-up takes one element,
//! drains whatever else is already queued, collapses repeated span ids to
//! their latest version and flushes the result to the [`BulkStore`].
//!
//! Flushing has two paths. Oversized documents, and every document of a
//! batch too small to be worth coalescing, go out as one-document requests.
//! Everything else is accumulated into bulk requests bounded by element
//! count and byte size. Failed requests are retried with an adaptive delay;
//! once the retry ceiling is reached the documents are abandoned and the
//! loss is logged. Nothing here is ever reported back to hook callers.

use sessiontrace_span::{ElementSpan, QueueElement};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::PipelineConfig;
use crate::queue::QueueReceiver;
use crate::stats::PipelineCounters;
use crate::store::{BulkDocument, BulkStore};
use crate::MAX_LOGGED_ERROR_REASONS;

/// Adaptive delay applied before every store request.
///
/// Starts at zero. A failure moves it to the minimum, or doubles it up to
/// the maximum. A success halves it, and once it falls below the minimum it
/// returns to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: Duration::ZERO,
            min,
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn increase(&mut self) {
        self.current = if self.current.is_zero() {
            self.min
        } else {
            self.current.saturating_mul(2).min(self.max)
        };
    }

    pub fn decrease(&mut self) {
        let half = self.current / 2;
        self.current = if half < self.min { Duration::ZERO } else { half };
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// Collapse repeated span ids, keeping the first position and the latest content.
pub fn dedup_latest(elements: impl IntoIterator<Item = QueueElement>) -> Vec<ElementSpan> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut spans: Vec<ElementSpan> = Vec::new();
    for element in elements {
        let existing = positions.get(element.id()).copied();
        match existing {
            Some(index) => spans[index] = element.span,
            None => {
                positions.insert(element.span.id.clone(), spans.len());
                spans.push(element.span);
            }
        }
    }
    spans
}

pub struct BatchWriter {
    store: Arc<dyn BulkStore>,
    index: String,
    drain_batch_size: usize,
    min_bulk_batch_len: usize,
    single_payload_threshold: usize,
    bulk_request_max_bytes: usize,
    batch_element_threshold: usize,
    max_write_retries: u32,
    backoff: Backoff,
    counters: Arc<PipelineCounters>,
}

impl BatchWriter {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn BulkStore>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            store,
            index: config.index_name.clone(),
            drain_batch_size: config.drain_batch_size,
            min_bulk_batch_len: config.min_bulk_batch_len,
            single_payload_threshold: config.single_payload_threshold_bytes,
            bulk_request_max_bytes: config.bulk_request_max_bytes,
            batch_element_threshold: config.batch_element_threshold,
            max_write_retries: config.max_write_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.min_retry_delay_ms),
                Duration::from_millis(config.max_retry_delay_ms),
            ),
            counters,
        }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Consume the queue until shutdown is signalled or every producer is
    /// gone, then flush whatever is still queued.
    pub async fn run(mut self, mut receiver: QueueReceiver, mut shutdown: oneshot::Receiver<()>) {
        tracing::info!(
            store = self.store.name(),
            index = %self.index,
            "Span writer started"
        );
        let mut batch: Vec<QueueElement> = Vec::with_capacity(self.drain_batch_size);

        loop {
            let first = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                element = receiver.recv() => match element {
                    Some(element) => element,
                    None => break,
                },
            };
            batch.push(first);
            receiver.drain_into(&mut batch, self.drain_batch_size);
            self.process(&receiver, &mut batch).await;
        }

        receiver.close();
        loop {
            receiver.drain_into(&mut batch, self.drain_batch_size);
            if batch.is_empty() {
                break;
            }
            self.process(&receiver, &mut batch).await;
        }

        tracing::info!(store = self.store.name(), "Span writer stopped");
    }

    async fn process(&mut self, receiver: &QueueReceiver, batch: &mut Vec<QueueElement>) {
        for element in batch.iter() {
            receiver.release(element);
        }
        let drained = batch.len();
        let spans = dedup_latest(batch.drain(..));
        tracing::trace!(drained, unique = spans.len(), "Flushing drained spans");
        self.flush(spans).await;
    }

    /// Serialize and send a deduplicated batch.
    pub async fn flush(&mut self, spans: Vec<ElementSpan>) {
        let batch_len = spans.len();
        let mut pending: Vec<BulkDocument> = Vec::new();
        let mut pending_bytes = 0usize;

        for span in &spans {
            let document = match BulkDocument::from_span(span) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(
                        span_id = %span.id,
                        session_id = %span.session_id,
                        error = %e,
                        "Failed to serialize span, skipping"
                    );
                    PipelineCounters::add(&self.counters.skipped, 1);
                    self.backoff.reset();
                    continue;
                }
            };

            if batch_len < self.min_bulk_batch_len
                || document.len() > self.single_payload_threshold
            {
                self.send_with_retry(vec![document]).await;
                continue;
            }

            if !pending.is_empty() && pending_bytes + document.len() > self.bulk_request_max_bytes {
                self.send_with_retry(std::mem::take(&mut pending)).await;
                pending_bytes = 0;
            }

            pending_bytes += document.len();
            pending.push(document);

            if pending.len() >= self.batch_element_threshold
                || pending_bytes >= self.bulk_request_max_bytes
            {
                self.send_with_retry(std::mem::take(&mut pending)).await;
                pending_bytes = 0;
            }
        }

        if !pending.is_empty() {
            self.send_with_retry(pending).await;
        }
    }

    async fn send_with_retry(&mut self, mut documents: Vec<BulkDocument>) {
        let mut attempts = 0u32;
        let mut reasons: Vec<String> = Vec::new();
        let mut error_count = 0usize;

        loop {
            let delay = self.backoff.current();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let sent = documents.len();
            match self.store.bulk_index(&self.index, &documents).await {
                Ok(response) if !response.has_failures() => {
                    PipelineCounters::add(&self.counters.flushed, sent);
                    self.backoff.decrease();
                    tracing::debug!(documents = sent, attempts = attempts + 1, "Bulk write succeeded");
                    return;
                }
                Ok(response) => {
                    let mut retry_ids: HashSet<String> = HashSet::new();
                    let mut failed = 0usize;
                    let mut permanent = 0usize;
                    for item in response.failures() {
                        failed += 1;
                        error_count += 1;
                        if reasons.len() < MAX_LOGGED_ERROR_REASONS {
                            reasons.push(format!(
                                "{} ({}): {}",
                                item.id,
                                item.status,
                                item.error.as_deref().unwrap_or("unknown")
                            ));
                        }
                        if item.is_retryable() {
                            retry_ids.insert(item.id.clone());
                        } else {
                            permanent += 1;
                        }
                    }

                    PipelineCounters::add(&self.counters.flushed, sent.saturating_sub(failed));
                    if permanent > 0 {
                        PipelineCounters::add(&self.counters.lost, permanent);
                        tracing::error!(
                            lost = permanent,
                            reasons = ?reasons,
                            "Store rejected documents, not retrying"
                        );
                    }

                    documents.retain(|doc| retry_ids.contains(&doc.id));
                    if documents.is_empty() {
                        self.backoff.decrease();
                        return;
                    }
                    self.backoff.increase();
                }
                Err(e) => {
                    error_count += 1;
                    if reasons.len() < MAX_LOGGED_ERROR_REASONS {
                        reasons.push(e.to_string());
                    }
                    if !e.is_retryable() {
                        PipelineCounters::add(&self.counters.lost, sent);
                        tracing::error!(
                            lost = sent,
                            error = %e,
                            "Bulk write failed with a non-retryable error, documents lost"
                        );
                        return;
                    }
                    self.backoff.increase();
                }
            }

            attempts += 1;
            if attempts > self.max_write_retries {
                PipelineCounters::add(&self.counters.lost, documents.len());
                tracing::error!(
                    lost = documents.len(),
                    attempts,
                    errors = error_count,
                    reasons = ?reasons,
                    "Bulk write retries exhausted, documents lost"
                );
                return;
            }
            tracing::warn!(
                remaining = documents.len(),
                attempt = attempts,
                delay_ms = self.backoff.current().as_millis() as u64,
                "Bulk write failed, retrying"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use sessiontrace_span::{
        ElementDescriptor, LoggingLevel, PayloadSnapshot, Session, SessionStart,
    };
    use std::sync::atomic::Ordering;

    fn span(id: &str, body_len: usize) -> ElementSpan {
        let session = Session::new(
            SessionStart::new("s-1", "chain-1", "Orders"),
            LoggingLevel::Debug,
            true,
        );
        let mut span = ElementSpan::new(
            id,
            "s-1",
            &ElementDescriptor::new("el-1", "Step", "script"),
            None,
            Utc::now(),
            session.stamp(),
        );
        if body_len > 0 {
            span.before = Some(PayloadSnapshot::default().with_body("x".repeat(body_len)));
        }
        span
    }

    fn writer(config: PipelineConfig, store: &MemoryStore) -> (BatchWriter, Arc<PipelineCounters>) {
        let counters = Arc::new(PipelineCounters::default());
        let writer = BatchWriter::new(&config, Arc::new(store.clone()), Arc::clone(&counters));
        (writer, counters)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .retry_config(2, 1, 4)
            .batch_element_threshold(3)
            .request_limits(100_000, 10_000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_backoff_progression() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.current(), Duration::ZERO);

        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_millis(100));
        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_millis(200));
        backoff.increase();
        assert_eq!(backoff.current(), Duration::from_millis(350));

        backoff.decrease();
        assert_eq!(backoff.current(), Duration::from_millis(175));
        backoff.decrease();
        assert_eq!(backoff.current(), Duration::ZERO);
    }

    #[test]
    fn test_dedup_keeps_latest() {
        let mut updated = span("a", 0);
        updated.element_name = "Updated".to_string();
        let elements = vec![
            QueueElement::new(span("a", 0)),
            QueueElement::new(span("b", 0)),
            QueueElement::new(updated),
        ];

        let spans = dedup_latest(elements);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].id, "a");
        assert_eq!(spans[0].element_name, "Updated");
        assert_eq!(spans[1].id, "b");
    }

    #[tokio::test]
    async fn test_flush_batches_by_count() {
        let store = MemoryStore::new();
        let (mut writer, counters) = writer(fast_config(), &store);

        let spans = (0..7).map(|i| span(&format!("sp-{i}"), 10)).collect();
        writer.flush(spans).await;

        assert_eq!(store.request_sizes(), vec![3, 3, 1]);
        assert_eq!(store.count("sessions"), 7);
        assert_eq!(counters.flushed.load(Ordering::Relaxed), 7);
    }

    #[tokio::test]
    async fn test_flush_sends_large_payload_alone() {
        let store = MemoryStore::new();
        let config = PipelineConfig::builder()
            .retry_config(2, 1, 4)
            .batch_element_threshold(10)
            .request_limits(100_000, 2_000)
            .build()
            .unwrap();
        let (mut writer, _) = writer(config, &store);

        writer
            .flush(vec![span("small-1", 10), span("big", 5_000), span("small-2", 10)])
            .await;

        assert_eq!(store.request_sizes(), vec![1, 2]);
        assert_eq!(store.count("sessions"), 3);
    }

    #[tokio::test]
    async fn test_flush_small_batch_sends_individually() {
        let store = MemoryStore::new();
        let (mut writer, _) = writer(fast_config(), &store);

        writer.flush(vec![span("only", 10)]).await;
        assert_eq!(store.request_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_flush_respects_byte_limit() {
        let store = MemoryStore::new();
        let config = PipelineConfig::builder()
            .retry_config(2, 1, 4)
            .batch_element_threshold(100)
            .request_limits(3_000, 2_000)
            .build()
            .unwrap();
        let (mut writer, _) = writer(config, &store);

        let spans = (0..4).map(|i| span(&format!("sp-{i}"), 1_000)).collect();
        writer.flush(spans).await;

        let sizes = store.request_sizes();
        assert!(sizes.len() >= 2, "expected several requests, got {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 4);
        assert_eq!(store.count("sessions"), 4);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = MemoryStore::new();
        store.fail_next_requests(2);
        let (mut writer, counters) = writer(fast_config(), &store);

        writer.flush(vec![span("a", 0), span("b", 0)]).await;

        assert_eq!(store.request_count(), 3);
        assert_eq!(store.count("sessions"), 2);
        assert_eq!(counters.flushed.load(Ordering::Relaxed), 2);
        assert_eq!(counters.lost.load(Ordering::Relaxed), 0);
        assert!(writer.backoff().current() < Duration::from_millis(4));
    }

    #[tokio::test]
    async fn test_retries_exhausted_loses_documents() {
        let store = MemoryStore::new();
        store.fail_next_requests(10);
        let (mut writer, counters) = writer(fast_config(), &store);

        writer.flush(vec![span("a", 0), span("b", 0)]).await;

        // one initial attempt plus two retries
        assert_eq!(store.request_count(), 3);
        assert_eq!(store.count("sessions"), 0);
        assert_eq!(counters.lost.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_partial_failures_retry_only_retryable() {
        let store = MemoryStore::new();
        store.fail_document("throttled", 429);
        store.fail_document("bad", 400);
        let (mut writer, counters) = writer(fast_config(), &store);

        writer
            .flush(vec![span("ok", 0), span("throttled", 0), span("bad", 0)])
            .await;

        assert_eq!(store.request_sizes(), vec![3, 1, 1]);
        assert_eq!(counters.flushed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.lost.load(Ordering::Relaxed), 2);
        assert!(store.document("sessions", "ok").is_some());
    }
}
