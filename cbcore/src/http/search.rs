//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The full-text search service.

use super::{common_http_error, HttpEnvelope};
use crate::error::Error;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// A search request against one index.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Index to query.
    pub index_name: String,
    /// The query tree, in the service's JSON query syntax.
    pub query: Value,
    /// Maximum hits to return.
    pub limit: Option<u32>,
    /// Hits to skip.
    pub skip: Option<u32>,
    /// Include scoring explanations.
    pub explain: bool,
    /// Stored fields to include with each hit.
    pub fields: Vec<String>,
    /// Facet definitions by name.
    pub facets: Map<String, Value>,
    /// Request-level timeout override.
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    /// Creates a request with the given query tree.
    #[must_use]
    pub fn new(index_name: impl Into<String>, query: Value) -> Self {
        Self {
            index_name: index_name.into(),
            query,
            limit: None,
            skip: None,
            explain: false,
            fields: Vec::new(),
            facets: Map::new(),
            timeout: None,
        }
    }

    /// Builds the HTTP envelope for `/api/index/{name}/query`.
    pub fn encode(&self, timeout: Duration) -> Result<HttpEnvelope, Error> {
        if self.index_name.is_empty() {
            return Err(Error::InvalidArgument {
                message: "search index name is empty".to_string(),
            });
        }
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.clone());
        if let Some(limit) = self.limit {
            body.insert("size".to_string(), json!(limit));
        }
        if let Some(skip) = self.skip {
            body.insert("from".to_string(), json!(skip));
        }
        if self.explain {
            body.insert("explain".to_string(), json!(true));
        }
        if !self.fields.is_empty() {
            body.insert("fields".to_string(), json!(self.fields));
        }
        if !self.facets.is_empty() {
            body.insert("facets".to_string(), Value::Object(self.facets.clone()));
        }
        body.insert(
            "ctl".to_string(),
            json!({ "timeout": timeout.as_millis() as u64 }),
        );
        let body = serde_json::to_vec(&Value::Object(body)).map_err(|e| {
            Error::EncodingFailure {
                message: format!("search body: {e}"),
            }
        })?;
        Ok(HttpEnvelope::post_json(
            format!("/api/index/{}/query", self.index_name),
            body,
        ))
    }
}

/// One hit of a search response.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    /// Index partition the hit came from.
    #[serde(default)]
    pub index: String,
    /// Document id.
    pub id: String,
    /// Relevance score.
    #[serde(default)]
    pub score: f64,
    /// Requested stored fields.
    #[serde(default)]
    pub fields: Option<Value>,
    /// Scoring explanation when requested.
    #[serde(default)]
    pub explanation: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireSearchStatus {
    #[serde(default)]
    failed: u64,
    #[serde(default)]
    successful: u64,
}

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    status: WireSearchStatus,
    #[serde(default)]
    hits: Vec<SearchHit>,
    #[serde(default, rename = "total_hits")]
    total_hits: u64,
    #[serde(default, rename = "max_score")]
    max_score: f64,
    #[serde(default)]
    facets: Option<Value>,
}

/// A decoded search response.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Hits in relevance order.
    pub hits: Vec<SearchHit>,
    /// Total matching documents.
    pub total_hits: u64,
    /// Highest score in the result set.
    pub max_score: f64,
    /// Facet results when requested.
    pub facets: Option<Value>,
    /// Index partitions that answered.
    pub successful_partitions: u64,
    /// Index partitions that failed.
    pub failed_partitions: u64,
}

impl SearchResponse {
    /// Decodes `(status, body)` into a typed response or the uniform error.
    pub fn decode(status: u16, body: &[u8]) -> Result<Self, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => {}
            400 => {
                let text = String::from_utf8_lossy(body);
                return Err(if text.contains("index not found") {
                    Error::IndexNotFound
                } else {
                    Error::InvalidArgument {
                        message: text.into_owned(),
                    }
                });
            }
            _ => return Err(Error::InternalServerFailure),
        }
        let wire: WireSearchResponse =
            serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
                message: format!("search response: {e}"),
            })?;
        if wire.status.successful == 0 && wire.status.failed > 0 {
            return Err(Error::IndexFailure);
        }
        Ok(Self {
            hits: wire.hits,
            total_hits: wire.total_hits,
            max_score: wire.max_score,
            facets: wire.facets,
            successful_partitions: wire.status.successful,
            failed_partitions: wire.status.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_and_body() {
        let mut req = SearchRequest::new("beers", json!({"match": "ipa", "field": "name"}));
        req.limit = Some(10);
        req.fields = vec!["name".to_string()];
        let envelope = req.encode(Duration::from_secs(30)).unwrap();
        assert_eq!(envelope.path, "/api/index/beers/query");
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["query"]["match"], "ipa");
        assert_eq!(body["size"], 10);
        assert_eq!(body["ctl"]["timeout"], 30000);
    }

    #[test]
    fn test_decode_hits() {
        let body = r#"{
            "status": {"total": 2, "failed": 0, "successful": 2},
            "hits": [{"id": "beer-1", "score": 1.5}],
            "total_hits": 1,
            "max_score": 1.5
        }"#;
        let resp = SearchResponse::decode(200, body.as_bytes()).unwrap();
        assert_eq!(resp.hits.len(), 1);
        assert_eq!(resp.hits[0].id, "beer-1");
        assert_eq!(resp.total_hits, 1);
    }

    #[test]
    fn test_decode_index_not_found() {
        let body = b"rest_index: Query, indexName: beers, err: index not found";
        assert!(matches!(
            SearchResponse::decode(400, body),
            Err(Error::IndexNotFound)
        ));
    }

    #[test]
    fn test_decode_all_partitions_failed() {
        let body = r#"{"status": {"total": 2, "failed": 2, "successful": 0}, "hits": []}"#;
        assert!(matches!(
            SearchResponse::decode(200, body.as_bytes()),
            Err(Error::IndexFailure)
        ));
    }
}
