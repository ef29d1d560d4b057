//! Bulk document stores
//!
//! The pipeline treats its store as an at-least-once, overwrite-by-id sink:
//! one bulk request carries many `(id, document)` pairs and the response
//! reports per-document success or failure.
//!
//! - `http` - Elasticsearch/OpenSearch `_bulk` API over HTTP
//! - `memory` - in-process store for tests and dry runs

pub mod http;
pub mod memory;

pub use http::HttpBulkStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use sessiontrace_span::ElementSpan;

use crate::error::Result;

/// A serialized span ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    pub id: String,
    pub body: String,
}

impl BulkDocument {
    pub fn from_span(span: &ElementSpan) -> Result<Self> {
        Ok(Self {
            id: span.id.clone(),
            body: serde_json::to_string(span)?,
        })
    }

    /// Serialized size in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Outcome of one document within a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub id: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 200,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Throttling and server-side failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !self.is_success() && (self.status == 429 || self.status >= 500)
    }
}

/// Per-document outcomes of a bulk request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn all_ok<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            items: ids.into_iter().map(BulkItemResult::ok).collect(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|item| !item.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Sink for span documents.
#[async_trait::async_trait]
pub trait BulkStore: Send + Sync {
    /// Returns the name of this store, for logs
    fn name(&self) -> &str;

    /// Index (insert or overwrite by id) every document into `index`.
    ///
    /// `Err` means the request as a whole failed; per-document failures are
    /// reported in the response.
    async fn bulk_index(&self, index: &str, documents: &[BulkDocument]) -> Result<BulkResponse>;

    /// Check whether the store is reachable and accepting writes
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_retry_classification() {
        assert!(!BulkItemResult::ok("a").is_retryable());
        assert!(BulkItemResult::failed("a", 429, "es_rejected_execution_exception").is_retryable());
        assert!(BulkItemResult::failed("a", 503, "unavailable_shards_exception").is_retryable());
        assert!(!BulkItemResult::failed("a", 400, "mapper_parsing_exception").is_retryable());
    }

    #[test]
    fn test_response_failures() {
        let response = BulkResponse {
            items: vec![
                BulkItemResult::ok("a"),
                BulkItemResult::failed("b", 400, "bad"),
            ],
        };
        assert!(response.has_failures());
        assert_eq!(response.failures().count(), 1);
        assert!(!BulkResponse::all_ok(["a", "b"]).has_failures());
    }
}
