//! Backpressured write queue
//!
//! A bounded channel of [`QueueElement`]s plus a shared running total of
//! their estimated payload bytes. Producers never wait: a span that would
//! push the total past the watermark, or that finds the channel full, is
//! dropped and logged. The writer releases bytes as it drains.

use sessiontrace_span::{ElementSpan, QueueElement};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::stats::PipelineCounters;

/// Drop warnings are emitted for the first drop and then once per this many.
const DROP_LOG_INTERVAL: u64 = 100;

/// Result of offering a span to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Queued,
    /// The byte watermark would have been exceeded
    DroppedOverWatermark,
    /// The bounded channel had no free slot
    DroppedQueueFull,
    /// The writer has shut down
    Closed,
}

/// Running total of queued bytes with a hard ceiling.
#[derive(Debug)]
pub struct ByteBudget {
    used: AtomicUsize,
    capacity: usize,
}

impl ByteBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Reserve `bytes` unless that would exceed the capacity.
    pub fn try_acquire(&self, bytes: usize) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Producer side of the write queue
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::Sender<QueueElement>,
    budget: Arc<ByteBudget>,
    counters: Arc<PipelineCounters>,
}

/// Consumer side of the write queue, owned by the writer
pub struct QueueReceiver {
    receiver: mpsc::Receiver<QueueElement>,
    budget: Arc<ByteBudget>,
}

/// Create a queue holding at most `capacity` spans and `max_bytes` bytes.
pub fn write_queue(
    capacity: usize,
    max_bytes: usize,
    counters: Arc<PipelineCounters>,
) -> (WriteQueue, QueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    let budget = Arc::new(ByteBudget::new(max_bytes));
    (
        WriteQueue {
            sender,
            budget: Arc::clone(&budget),
            counters,
        },
        QueueReceiver { receiver, budget },
    )
}

impl WriteQueue {
    /// Offer a span for persistence without blocking.
    pub fn schedule(&self, span: ElementSpan) -> ScheduleOutcome {
        let element = QueueElement::new(span);
        let size = element.size;

        if !self.budget.try_acquire(size) {
            self.log_drop(&element, "queue byte watermark exceeded");
            return ScheduleOutcome::DroppedOverWatermark;
        }

        match self.sender.try_send(element) {
            Ok(()) => {
                self.counters
                    .scheduled
                    .fetch_add(1, Ordering::Relaxed);
                ScheduleOutcome::Queued
            }
            Err(TrySendError::Full(element)) => {
                self.budget.release(size);
                self.log_drop(&element, "write queue is full");
                ScheduleOutcome::DroppedQueueFull
            }
            Err(TrySendError::Closed(element)) => {
                self.budget.release(size);
                tracing::debug!(span_id = %element.id(), "Write queue closed, span discarded");
                ScheduleOutcome::Closed
            }
        }
    }

    pub fn queued_bytes(&self) -> usize {
        self.budget.used()
    }

    pub fn max_bytes(&self) -> usize {
        self.budget.capacity()
    }

    fn log_drop(&self, element: &QueueElement, reason: &'static str) {
        let previous = self.counters.record_drop();
        if previous % DROP_LOG_INTERVAL == 0 {
            tracing::warn!(
                span_id = %element.id(),
                session_id = %element.span.session_id,
                bytes = element.size,
                queued_bytes = self.budget.used(),
                dropped_total = previous + 1,
                reason,
                "Dropping span, telemetry is lossy under backpressure"
            );
        }
    }
}

impl QueueReceiver {
    /// Wait for the next element. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<QueueElement> {
        self.receiver.recv().await
    }

    /// Take up to `max` already-queued elements without waiting.
    pub fn drain_into(&mut self, batch: &mut Vec<QueueElement>, max: usize) {
        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(element) => batch.push(element),
                Err(_) => break,
            }
        }
    }

    /// Return the bytes of a drained element to the budget.
    pub fn release(&self, element: &QueueElement) {
        self.budget.release(element.size);
    }

    /// Stop accepting new elements; already-queued ones stay drainable.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
