//! In-memory bulk store for tests and dry runs.
//!
//! Documents are parsed back into JSON and kept per `(index, id)`, so a
//! second write of the same id overwrites the first just as a search
//! cluster would. Failures can be injected per request or per document.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{BulkDocument, BulkItemResult, BulkResponse, BulkStore};
use crate::error::{PipelineError, Result};

#[derive(Default)]
struct MemoryInner {
    documents: DashMap<(String, String), serde_json::Value>,
    /// Document count of every request that reached the store.
    requests: Mutex<Vec<usize>>,
    failing_requests: AtomicUsize,
    failing_documents: DashMap<String, u16>,
    latency: Mutex<Option<Duration>>,
}

/// Thread-safe in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` requests with a retryable server error.
    pub fn fail_next_requests(&self, count: usize) {
        self.inner.failing_requests.store(count, Ordering::SeqCst);
    }

    /// Reject a document id with the given item status on every request.
    pub fn fail_document(&self, id: impl Into<String>, status: u16) {
        self.inner.failing_documents.insert(id.into(), status);
    }

    pub fn clear_document_failures(&self) {
        self.inner.failing_documents.clear();
    }

    /// Delay every request, to simulate a slow cluster.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    pub fn document(&self, index: &str, id: &str) -> Option<serde_json::Value> {
        self.inner
            .documents
            .get(&(index.to_string(), id.to_string()))
            .map(|doc| doc.value().clone())
    }

    pub fn documents(&self, index: &str) -> Vec<serde_json::Value> {
        self.inner
            .documents
            .iter()
            .filter(|entry| entry.key().0 == index)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count(&self, index: &str) -> usize {
        self.inner
            .documents
            .iter()
            .filter(|entry| entry.key().0 == index)
            .count()
    }

    /// Sizes of the requests received so far, in arrival order.
    pub fn request_sizes(&self) -> Vec<usize> {
        self.inner.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl BulkStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn bulk_index(&self, index: &str, documents: &[BulkDocument]) -> Result<BulkResponse> {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.inner.requests.lock().push(documents.len());

        let failing = self.inner.failing_requests.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner
                .failing_requests
                .store(failing - 1, Ordering::SeqCst);
            return Err(PipelineError::Server("injected failure".to_string()));
        }

        let mut items = Vec::with_capacity(documents.len());
        for doc in documents {
            if let Some(status) = self.inner.failing_documents.get(&doc.id) {
                items.push(BulkItemResult::failed(
                    doc.id.clone(),
                    *status,
                    "injected document failure",
                ));
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(&doc.body) {
                Ok(value) => value,
                Err(e) => {
                    items.push(BulkItemResult::failed(doc.id.clone(), 400, e.to_string()));
                    continue;
                }
            };
            self.inner
                .documents
                .insert((index.to_string(), doc.id.clone()), value);
            items.push(BulkItemResult::ok(doc.id.clone()));
        }
        Ok(BulkResponse { items })
    }
}
