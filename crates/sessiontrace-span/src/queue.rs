//! Write-queue wrapper carrying a precomputed size.

use crate::span::ElementSpan;

/// An [`ElementSpan`] handed to the write queue together with its estimated
/// payload size, so the backpressure counter can be released without sizing
/// the span again.
#[derive(Debug, Clone)]
pub struct QueueElement {
    pub span: ElementSpan,
    pub size: usize,
}

impl QueueElement {
    pub fn new(span: ElementSpan) -> Self {
        let size = span.estimated_bytes();
        Self { span, size }
    }

    pub fn id(&self) -> &str {
        &self.span.id
    }
}
