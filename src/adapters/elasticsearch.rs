//! Elasticsearch Search Adapter
//!
//! Implements the `SearchIndex` port against the Elasticsearch REST API.
//!
//! - upsert: `PUT /{index}/_doc/{id}`
//! - remove: `DELETE /{index}/_doc/{id}`
//! - search: `POST /{index}/_search` with a `multi_match` query

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::domain::ports::{ProductId, SearchDocument, SearchField, SearchIndex};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Elasticsearch adapter
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster
    pub url: String,

    /// Index holding product documents
    pub index: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Maximum hits returned by a search
    pub max_results: usize,

    /// Ask Elasticsearch to refresh after each write
    pub refresh_on_write: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "products".to_string(),
            request_timeout: Duration::from_secs(5),
            max_results: 100,
            refresh_on_write: false,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: SearchDocument,
}

// =============================================================================
// Adapter
// =============================================================================

/// Elasticsearch-backed search index.
pub struct ElasticsearchIndex {
    config: ElasticsearchConfig,
    client: Client,
}

impl ElasticsearchIndex {
    /// Create a new adapter
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Get the adapter configuration
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn doc_url(&self, id: ProductId) -> String {
        format!("{}/{}/_doc/{}", self.base_url(), self.config.index, id)
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url(), self.config.index)
    }

    fn refresh_param(&self) -> &'static str {
        if self.config.refresh_on_write {
            "true"
        } else {
            "false"
        }
    }
}

impl std::fmt::Debug for ElasticsearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchIndex")
            .field("url", &self.config.url)
            .field("index", &self.config.index)
            .finish()
    }
}

/// Build the `_search` request body.
fn search_body(query: &str, fields: &[SearchField], size: usize) -> Value {
    let fields: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
    json!({
        "size": size,
        "query": {
            "multi_match": {
                "query": query,
                "fields": fields,
            }
        }
    })
}

fn connection_error(operation: &str, e: reqwest::Error) -> Error {
    Error::IndexFailure(format!("{} request failed: {}", operation, e))
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    #[instrument(skip(self, document), fields(product_id = %document.id))]
    async fn index(&self, document: &SearchDocument) -> Result<()> {
        let response = self
            .client
            .put(self.doc_url(document.id))
            .query(&[("refresh", self.refresh_param())])
            .json(document)
            .send()
            .await
            .map_err(|e| connection_error("index", e))?;

        if !response.status().is_success() {
            return Err(Error::IndexFailure(format!(
                "index request for {} failed with status: {}",
                document.id,
                response.status()
            )));
        }

        debug!("Indexed product {}", document.id);
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn remove(&self, id: ProductId) -> Result<bool> {
        let response = self
            .client
            .delete(self.doc_url(id))
            .query(&[("refresh", self.refresh_param())])
            .send()
            .await
            .map_err(|e| connection_error("delete", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::IndexFailure(format!(
                "delete request for {} failed with status: {}",
                id, status
            ))),
        }
    }

    #[instrument(skip(self, fields))]
    async fn search(&self, query: &str, fields: &[SearchField]) -> Result<Vec<SearchDocument>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = search_body(query, fields, self.config.max_results);
        let response = self
            .client
            .post(self.search_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| connection_error("search", e))?;

        // Nothing has been indexed yet
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Index {} does not exist yet", self.config.index);
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            return Err(Error::IndexFailure(format!(
                "search failed with status: {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::IndexFailure(format!("malformed search response: {}", e)))?;

        Ok(parsed.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/_cluster/health", self.base_url());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_error("health", e))?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn unreachable_config() -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: "http://localhost:19999/".to_string(), // Non-existent port
            request_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_urls() {
        let index = ElasticsearchIndex::new(unreachable_config()).unwrap();

        assert_eq!(
            index.doc_url(ProductId::new(7)),
            "http://localhost:19999/products/_doc/7"
        );
        assert_eq!(index.search_url(), "http://localhost:19999/products/_search");
    }

    #[test]
    fn test_search_body() {
        let body = search_body("blue pen", &SearchField::CATALOG, 25);

        assert_eq!(body["size"], 25);
        assert_eq!(body["query"]["multi_match"]["query"], "blue pen");
        assert_eq!(
            body["query"]["multi_match"]["fields"],
            json!(["name", "category", "description"])
        );
    }

    #[test]
    fn test_parse_search_response() {
        let raw = json!({
            "took": 3,
            "hits": {
                "total": { "value": 1, "relation": "eq" },
                "hits": [{
                    "_index": "products",
                    "_id": "1",
                    "_score": 1.2,
                    "_source": { "id": 1, "name": "Pen", "category": "office" }
                }]
            }
        });

        let parsed: SearchResponse = serde_json::from_value(raw).unwrap();
        let doc = &parsed.hits.hits[0].source;
        assert_eq!(doc.id, ProductId::new(1));
        assert_eq!(doc.name, "Pen");
        assert_eq!(doc.description, "");
    }

    #[tokio::test]
    async fn test_index_connection_refused() {
        let index = ElasticsearchIndex::new(unreachable_config()).unwrap();
        let doc = SearchDocument {
            id: ProductId::new(1),
            name: "Pen".into(),
            description: String::new(),
            category: String::new(),
            price: 1.5,
            stock: 100,
        };

        assert_matches!(index.index(&doc).await, Err(Error::IndexFailure(_)));
        assert_matches!(
            index.search("pen", &SearchField::CATALOG).await,
            Err(Error::IndexFailure(_))
        );
    }

    #[tokio::test]
    async fn test_blank_query_skips_request() {
        let index = ElasticsearchIndex::new(unreachable_config()).unwrap();
        let hits = index.search("   ", &SearchField::CATALOG).await.unwrap();
        assert!(hits.is_empty());
    }
}
