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

//! The map/reduce view service.
//!
//! Simple queries ride the query string of a GET; a non-empty `keys` filter
//! switches to POST with the keys in a JSON body, which keeps arbitrarily
//! large key sets off the request line.

use super::{common_http_error, HttpEnvelope};
use crate::error::Error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Design document namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesignDocumentNamespace {
    /// Live documents.
    #[default]
    Production,
    /// `dev_`-prefixed documents under development.
    Development,
}

/// A view query.
#[derive(Debug, Clone)]
pub struct ViewQuery {
    /// Bucket holding the design document.
    pub bucket: String,
    /// Design document name, without the `dev_` prefix.
    pub design_document: String,
    /// View name.
    pub view: String,
    /// Namespace the design document lives in.
    pub namespace: DesignDocumentNamespace,
    /// Maximum rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Return rows in descending key order.
    pub descending: bool,
    /// Run the reduce function.
    pub reduce: Option<bool>,
    /// Group reduced rows by key.
    pub group: bool,
    /// Group reduced rows to this key depth.
    pub group_level: Option<u32>,
    /// Single key filter, as JSON.
    pub key: Option<Value>,
    /// Multi-key filter, as JSON; forces a POST.
    pub keys: Vec<Value>,
    /// Range start key, as JSON.
    pub start_key: Option<Value>,
    /// Range end key, as JSON.
    pub end_key: Option<Value>,
    /// Whether the end key is included in the range.
    pub inclusive_end: Option<bool>,
    /// Request-level timeout override.
    pub timeout: Option<Duration>,
}

impl ViewQuery {
    /// Creates a query with default options.
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        design_document: impl Into<String>,
        view: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            design_document: design_document.into(),
            view: view.into(),
            namespace: DesignDocumentNamespace::Production,
            limit: None,
            skip: None,
            descending: false,
            reduce: None,
            group: false,
            group_level: None,
            key: None,
            keys: Vec::new(),
            start_key: None,
            end_key: None,
            inclusive_end: None,
            timeout: None,
        }
    }

    /// Builds the HTTP envelope for
    /// `/{bucket}/_design/{ddoc}/_view/{view}`.
    pub fn encode(&self) -> Result<HttpEnvelope, Error> {
        if self.bucket.is_empty() || self.design_document.is_empty() || self.view.is_empty() {
            return Err(Error::InvalidArgument {
                message: "view query needs bucket, design document and view".to_string(),
            });
        }
        let ddoc = match self.namespace {
            DesignDocumentNamespace::Production => self.design_document.clone(),
            DesignDocumentNamespace::Development => format!("dev_{}", self.design_document),
        };

        let mut params: Vec<String> = Vec::new();
        let mut push_json = |name: &str, value: &Value| -> Result<(), Error> {
            let encoded = serde_json::to_string(value).map_err(|e| Error::EncodingFailure {
                message: format!("view parameter {name}: {e}"),
            })?;
            params.push(format!("{name}={}", urlencode(&encoded)));
            Ok(())
        };
        if let Some(key) = &self.key {
            push_json("key", key)?;
        }
        if let Some(start) = &self.start_key {
            push_json("startkey", start)?;
        }
        if let Some(end) = &self.end_key {
            push_json("endkey", end)?;
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        if let Some(skip) = self.skip {
            params.push(format!("skip={skip}"));
        }
        if self.descending {
            params.push("descending=true".to_string());
        }
        if let Some(reduce) = self.reduce {
            params.push(format!("reduce={reduce}"));
        }
        if self.group {
            params.push("group=true".to_string());
        }
        if let Some(level) = self.group_level {
            params.push(format!("group_level={level}"));
        }
        if let Some(inclusive) = self.inclusive_end {
            params.push(format!("inclusive_end={inclusive}"));
        }

        let mut path = format!("/{}/_design/{ddoc}/_view/{}", self.bucket, self.view);
        if !params.is_empty() {
            path.push('?');
            path.push_str(&params.join("&"));
        }

        if self.keys.is_empty() {
            Ok(HttpEnvelope::get(path))
        } else {
            let body = serde_json::to_vec(&json!({ "keys": self.keys })).map_err(|e| {
                Error::EncodingFailure {
                    message: format!("view keys: {e}"),
                }
            })?;
            Ok(HttpEnvelope::post_json(path, body))
        }
    }
}

/// One row of a view result.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewRow {
    /// Source document id; absent on reduced rows.
    #[serde(default)]
    pub id: Option<String>,
    /// Emitted key.
    #[serde(default)]
    pub key: Value,
    /// Emitted value.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
struct WireViewResponse {
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    rows: Vec<ViewRow>,
    #[serde(default)]
    error: Option<String>,
}

/// A decoded view response.
#[derive(Debug, Clone)]
pub struct ViewResponse {
    /// Total rows in the index (before limit/skip).
    pub total_rows: u64,
    /// Result rows.
    pub rows: Vec<ViewRow>,
}

impl ViewResponse {
    /// Decodes `(status, body)` into a typed response or the uniform error.
    pub fn decode(status: u16, body: &[u8]) -> Result<Self, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        if status == 404 {
            return Err(Error::IndexNotFound);
        }
        let wire: WireViewResponse =
            serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
                message: format!("view response: {e}"),
            })?;
        if let Some(error) = wire.error {
            return Err(if error == "not_found" {
                Error::IndexNotFound
            } else {
                Error::InternalServerFailure
            });
        }
        Ok(Self {
            total_rows: wire.total_rows,
            rows: wire.rows,
        })
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path_with_params() {
        let mut query = ViewQuery::new("beer-sample", "beers", "by_name");
        query.limit = Some(10);
        query.descending = true;
        query.start_key = Some(json!("a"));
        let envelope = query.encode().unwrap();
        assert_eq!(envelope.method, super::super::Method::Get);
        assert!(envelope.path.starts_with("/beer-sample/_design/beers/_view/by_name?"));
        assert!(envelope.path.contains("limit=10"));
        assert!(envelope.path.contains("descending=true"));
        assert!(envelope.path.contains("startkey=%22a%22"));
    }

    #[test]
    fn test_dev_namespace_prefix() {
        let mut query = ViewQuery::new("b", "d", "v");
        query.namespace = DesignDocumentNamespace::Development;
        let envelope = query.encode().unwrap();
        assert!(envelope.path.starts_with("/b/_design/dev_d/_view/v"));
    }

    #[test]
    fn test_keys_switch_to_post() {
        let mut query = ViewQuery::new("b", "d", "v");
        query.keys = vec![json!("k1"), json!("k2")];
        let envelope = query.encode().unwrap();
        assert_eq!(envelope.method, super::super::Method::Post);
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["keys"][1], "k2");
    }

    #[test]
    fn test_decode_rows() {
        let body = r#"{
            "total_rows": 3,
            "rows": [
                {"id": "beer-1", "key": "Old Rasputin", "value": null},
                {"id": "beer-2", "key": "Pliny", "value": 2}
            ]
        }"#;
        let resp = ViewResponse::decode(200, body.as_bytes()).unwrap();
        assert_eq!(resp.total_rows, 3);
        assert_eq!(resp.rows.len(), 2);
        assert_eq!(resp.rows[0].id.as_deref(), Some("beer-1"));
    }

    #[test]
    fn test_decode_missing_design_doc() {
        assert!(matches!(
            ViewResponse::decode(404, b"{}"),
            Err(Error::IndexNotFound)
        ));
        let body = r#"{"error": "not_found", "reason": "missing"}"#;
        assert!(matches!(
            ViewResponse::decode(200, body.as_bytes()),
            Err(Error::IndexNotFound)
        ));
    }
}
