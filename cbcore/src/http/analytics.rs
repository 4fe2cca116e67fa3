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

//! The analytics service.

use super::{common_http_error, HttpEnvelope};
use crate::error::Error;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// An analytics request.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsRequest {
    /// The statement to execute.
    pub statement: String,
    /// Named parameters, addressed as `$name`.
    pub named_parameters: HashMap<String, Value>,
    /// Positional parameters.
    pub positional_parameters: Vec<Value>,
    /// Reject mutating statements.
    pub readonly: bool,
    /// Run with elevated scheduling priority.
    pub priority: bool,
    /// Correlation id echoed in the response; generated when absent.
    pub client_context_id: Option<String>,
    /// Request-level timeout override.
    pub timeout: Option<Duration>,
}

impl AnalyticsRequest {
    /// Creates a request for a statement.
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }

    /// Builds the HTTP envelope for `/analytics/service`.
    pub fn encode(&self, context_id: &str, timeout: Duration) -> Result<HttpEnvelope, Error> {
        if self.statement.is_empty() {
            return Err(Error::InvalidArgument {
                message: "analytics statement is empty".to_string(),
            });
        }
        let mut body = Map::new();
        body.insert("statement".to_string(), json!(self.statement));
        body.insert(
            "timeout".to_string(),
            json!(format!("{}ms", timeout.as_millis())),
        );
        body.insert("client_context_id".to_string(), json!(context_id));
        if self.readonly {
            body.insert("readonly".to_string(), json!(true));
        }
        for (name, value) in &self.named_parameters {
            let key = if name.starts_with('$') {
                name.clone()
            } else {
                format!("${name}")
            };
            body.insert(key, value.clone());
        }
        if !self.positional_parameters.is_empty() {
            body.insert("args".to_string(), json!(self.positional_parameters));
        }
        let body = serde_json::to_vec(&Value::Object(body)).map_err(|e| {
            Error::EncodingFailure {
                message: format!("analytics body: {e}"),
            }
        })?;
        Ok(HttpEnvelope::post_json("/analytics/service", body))
    }
}

#[derive(Debug, Deserialize)]
struct AnalyticsError {
    code: i64,
    msg: String,
}

/// Metrics section of an analytics response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsMetrics {
    /// Total time as reported by the server.
    #[serde(default, rename = "elapsedTime")]
    pub elapsed_time: String,
    /// Number of result rows.
    #[serde(default, rename = "resultCount")]
    pub result_count: u64,
    /// Total result size in bytes.
    #[serde(default, rename = "resultSize")]
    pub result_size: u64,
    /// Number of objects processed.
    #[serde(default, rename = "processedObjects")]
    pub processed_objects: u64,
}

#[derive(Debug, Deserialize)]
struct WireAnalyticsResponse {
    #[serde(default, rename = "requestID")]
    request_id: Option<String>,
    #[serde(default)]
    signature: Option<Value>,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<AnalyticsError>,
    #[serde(default)]
    metrics: Option<AnalyticsMetrics>,
}

/// A decoded analytics response.
#[derive(Debug, Clone)]
pub struct AnalyticsResponse {
    /// Server request id.
    pub request_id: Option<String>,
    /// Result schema signature.
    pub signature: Option<Value>,
    /// Result rows.
    pub results: Vec<Value>,
    /// Final status string.
    pub status: String,
    /// Metrics section.
    pub metrics: Option<AnalyticsMetrics>,
}

impl AnalyticsResponse {
    /// Decodes `(status, body)` into a typed response or the uniform error.
    pub fn decode(status: u16, body: &[u8]) -> Result<Self, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        let wire: WireAnalyticsResponse =
            serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
                message: format!("analytics response: {e}"),
            })?;
        if wire.status != "success" || !wire.errors.is_empty() {
            let err = wire
                .errors
                .first()
                .map(|e| error_from_code(e.code, &e.msg))
                .unwrap_or(Error::InternalServerFailure);
            return Err(err);
        }
        Ok(Self {
            request_id: wire.request_id,
            signature: wire.signature,
            results: wire.results,
            status: wire.status,
            metrics: wire.metrics,
        })
    }
}

fn error_from_code(code: i64, msg: &str) -> Error {
    match code {
        21002 => Error::UnambiguousTimeout {
            elapsed: Duration::ZERO,
            attempts: 1,
            reasons: Vec::new(),
        },
        20000 | 20001 => Error::AuthenticationFailure {
            message: msg.to_string(),
        },
        23000 | 23003 => Error::TemporaryFailure,
        23007 => Error::JobQueueFull,
        24000 | 24001 => Error::CompilationFailure,
        24006 => Error::LinkNotFound,
        24025 | 24044 | 24045 => Error::DatasetNotFound,
        24047 => Error::IndexNotFound,
        24048 => Error::IndexExists,
        _ => Error::InternalServerFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_body() {
        let mut req = AnalyticsRequest::new("SELECT VALUE 1");
        req.readonly = true;
        let envelope = req.encode("ctx", Duration::from_secs(75)).unwrap();
        assert_eq!(envelope.path, "/analytics/service");
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["statement"], "SELECT VALUE 1");
        assert_eq!(body["readonly"], true);
    }

    #[test]
    fn test_decode_success() {
        let body = r#"{"status": "success", "results": [1, 2], "metrics": {"resultCount": 2}}"#;
        let resp = AnalyticsResponse::decode(200, body.as_bytes()).unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.metrics.unwrap().result_count, 2);
    }

    #[test]
    fn test_error_code_table() {
        assert!(matches!(error_from_code(23007, ""), Error::JobQueueFull));
        assert!(matches!(
            error_from_code(24000, ""),
            Error::CompilationFailure
        ));
        assert!(matches!(error_from_code(24044, ""), Error::DatasetNotFound));
        assert!(matches!(error_from_code(24006, ""), Error::LinkNotFound));
        assert!(matches!(
            error_from_code(99999, ""),
            Error::InternalServerFailure
        ));
    }

    #[test]
    fn test_decode_error_payload() {
        let body = r#"{"status": "fatal", "errors": [{"code": 24000, "msg": "syntax"}]}"#;
        assert!(matches!(
            AnalyticsResponse::decode(400, body.as_bytes()),
            Err(Error::CompilationFailure)
        ));
    }
}
