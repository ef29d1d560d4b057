//! Search-cluster bulk client
//!
//! Speaks the Elasticsearch/OpenSearch `_bulk` NDJSON protocol: one action
//! line followed by one document line per span. Retrying is the writer's
//! job; this client performs exactly one request per call.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{BulkDocument, BulkItemResult, BulkResponse, BulkStore};
use crate::config::StoreConfig;
use crate::error::{PipelineError, Result};

/// Raw `_bulk` response body
#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkApiItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Cluster health response
#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
}

/// HTTP client for the bulk store
pub struct HttpBulkStore {
    client: Client,
    config: StoreConfig,
}

impl HttpBulkStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }
}

/// Build the NDJSON body for a bulk request
pub fn ndjson_body(index: &str, documents: &[BulkDocument]) -> Result<String> {
    let mut body = String::with_capacity(documents.iter().map(|d| d.len() + 64).sum());
    for doc in documents {
        let action = serde_json::json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&doc.body);
        body.push('\n');
    }
    Ok(body)
}

fn error_reason(error: &serde_json::Value) -> String {
    match error.get("reason").and_then(|r| r.as_str()) {
        Some(reason) => match error.get("type").and_then(|t| t.as_str()) {
            Some(kind) => format!("{}: {}", kind, reason),
            None => reason.to_string(),
        },
        None => error.to_string(),
    }
}

fn into_bulk_response(api: BulkApiResponse, documents: &[BulkDocument]) -> BulkResponse {
    let mut items = api
        .items
        .into_iter()
        .zip(documents)
        .map(|(mut entry, doc)| {
            // Each entry is keyed by its action name, `index` here.
            let item = entry.remove("index").or_else(|| entry.into_values().next());
            match item {
                Some(item) => {
                    let id = item.id.unwrap_or_else(|| doc.id.clone());
                    match item.error {
                        Some(error) => BulkItemResult::failed(id, item.status, error_reason(&error)),
                        None if item.status >= 300 => {
                            BulkItemResult::failed(id, item.status, "unexpected item status")
                        }
                        None => BulkItemResult {
                            id,
                            status: item.status,
                            error: None,
                        },
                    }
                }
                None => BulkItemResult::failed(doc.id.clone(), 500, "missing bulk item"),
            }
        })
        .collect::<Vec<_>>();

    if items.len() < documents.len() {
        tracing::warn!(
            expected = documents.len(),
            received = items.len(),
            errors = api.errors,
            "Bulk response shorter than request"
        );
        for doc in &documents[items.len()..] {
            items.push(BulkItemResult::failed(doc.id.clone(), 500, "missing bulk item"));
        }
    }
    BulkResponse { items }
}

#[async_trait::async_trait]
impl BulkStore for HttpBulkStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn bulk_index(&self, index: &str, documents: &[BulkDocument]) -> Result<BulkResponse> {
        if documents.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = ndjson_body(index, documents)?;

        let response = self
            .with_auth(self.client.post(self.url("_bulk")))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let api: BulkApiResponse = response
                .json()
                .await
                .map_err(|e| PipelineError::Transport(format!("Failed to parse response: {}", e)))?;
            Ok(into_bulk_response(api, documents))
        } else if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
            let error_text = response.text().await.unwrap_or_default();
            Err(PipelineError::Rejected(format!("{}: {}", status, error_text)))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(PipelineError::Authentication(status.to_string()))
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PipelineError::Server(status.to_string()))
        } else {
            Err(PipelineError::Transport(format!("Unexpected status: {}", status)))
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let response = match self
            .with_auth(self.client.get(self.url("_cluster/health")))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %self.config.endpoint, "Health check failed");
                return Ok(false);
            }
        };
        if !response.status().is_success() {
            return Ok(false);
        }
        let health: ClusterHealth = response
            .json()
            .await
            .unwrap_or(ClusterHealth {
                status: "unknown".to_string(),
            });
        Ok(health.status == "green" || health.status == "yellow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn docs() -> Vec<BulkDocument> {
        vec![
            BulkDocument {
                id: "a".to_string(),
                body: "{\"id\":\"a\"}".to_string(),
            },
            BulkDocument {
                id: "b".to_string(),
                body: "{\"id\":\"b\"}".to_string(),
            },
        ]
    }

    fn store_for(server: &MockServer) -> HttpBulkStore {
        HttpBulkStore::new(StoreConfig {
            endpoint: server.uri(),
            timeout_ms: 2_000,
            username: None,
            password: None,
        })
        .unwrap()
    }

    #[test]
    fn test_ndjson_body_layout() {
        let body = ndjson_body("sessions", &docs()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "sessions");
        assert_eq!(action["index"]["_id"], "a");
        assert_eq!(lines[1], r#"{"id":"a"}"#);
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_bulk_index_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .and(body_string_contains("\"_index\":\"sessions\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "took": 3,
                "errors": false,
                "items": [
                    { "index": { "_id": "a", "status": 201 } },
                    { "index": { "_id": "b", "status": 200 } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = store_for(&server).bulk_index("sessions", &docs()).await.unwrap();
        assert_eq!(response.items.len(), 2);
        assert!(!response.has_failures());
    }

    #[tokio::test]
    async fn test_bulk_index_item_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": true,
                "items": [
                    { "index": { "_id": "a", "status": 201 } },
                    { "index": { "_id": "b", "status": 429, "error": {
                        "type": "es_rejected_execution_exception",
                        "reason": "queue full"
                    } } }
                ]
            })))
            .mount(&server)
            .await;

        let response = store_for(&server).bulk_index("sessions", &docs()).await.unwrap();
        let failures: Vec<_> = response.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "b");
        assert!(failures[0].is_retryable());
        assert_eq!(
            failures[0].error.as_deref(),
            Some("es_rejected_execution_exception: queue full")
        );
    }

    #[tokio::test]
    async fn test_bulk_index_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = store_for(&server).bulk_index("sessions", &docs()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Server(_)));
        assert!(err.is_retryable());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("illegal_argument_exception"))
            .mount(&server)
            .await;
        let err = store_for(&server).bulk_index("sessions", &docs()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(_)));
        assert!(!err.is_retryable());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let err = store_for(&server).bulk_index("sessions", &docs()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "yellow" })),
            )
            .mount(&server)
            .await;
        assert!(store_for(&server).health_check().await.unwrap());

        let unreachable = HttpBulkStore::new(StoreConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            username: None,
            password: None,
        })
        .unwrap();
        assert!(!unreachable.health_check().await.unwrap());
    }
}
