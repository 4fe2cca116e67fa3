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

//! The query (N1QL) service.
//!
//! The request body is a JSON object built field by field — statement,
//! consistency, parameters, tuning knobs — and posted to `/query/service`.
//! Scan vectors for read-your-writes are derived from the mutation tokens
//! the caller collected into a [`MutationState`].

use super::{common_http_error, HttpEnvelope};
use crate::error::Error;
use crate::operations::MutationToken;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Query consistency requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanConsistency {
    /// No consistency guarantee; use whatever the indexer has.
    #[default]
    NotBounded,
    /// Wait for the indexer to catch up to the request time.
    RequestPlus,
}

/// Profiling detail requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileMode {
    /// No profile section.
    #[default]
    Off,
    /// Phase summaries.
    Phases,
    /// Full operator timings.
    Timings,
}

impl ProfileMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Phases => "phases",
            Self::Timings => "timings",
        }
    }
}

/// Mutation tokens accumulated for read-your-writes consistency.
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    tokens: Vec<MutationToken>,
}

impl MutationState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token; later tokens for the same partition supersede earlier
    /// ones with lower sequence numbers.
    pub fn add(&mut self, token: MutationToken) {
        if let Some(existing) = self.tokens.iter_mut().find(|t| {
            t.bucket_name == token.bucket_name && t.partition_id == token.partition_id
        }) {
            if token.sequence_number > existing.sequence_number {
                *existing = token;
            }
            return;
        }
        self.tokens.push(token);
    }

    /// Returns `true` when no tokens were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Builds the `scan_vectors` JSON: per bucket, a sparse map of
    /// partition → `[seqno, partition-uuid]`.
    #[must_use]
    pub fn scan_vectors(&self) -> Value {
        let mut buckets: Map<String, Value> = Map::new();
        for token in &self.tokens {
            let entry = buckets
                .entry(token.bucket_name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(partitions) = entry {
                partitions.insert(
                    token.partition_id.to_string(),
                    json!([
                        token.sequence_number,
                        token.partition_uuid.to_string()
                    ]),
                );
            }
        }
        Value::Object(buckets)
    }
}

/// A query request.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// The statement to execute.
    pub statement: String,
    /// Index consistency requirement.
    pub scan_consistency: ScanConsistency,
    /// Read-your-writes tokens; overrides `scan_consistency` with `at_plus`.
    pub consistent_with: Option<MutationState>,
    /// Named parameters, addressed as `$name` in the statement.
    pub named_parameters: HashMap<String, Value>,
    /// Positional parameters, addressed as `$1`, `$2`, ….
    pub positional_parameters: Vec<Value>,
    /// Reject statements that would mutate data.
    pub readonly: bool,
    /// Profiling detail.
    pub profile: ProfileMode,
    /// Maximum index scan parallelism.
    pub max_parallelism: Option<u32>,
    /// Operator pipeline batch size.
    pub pipeline_batch: Option<u32>,
    /// Operator pipeline cap.
    pub pipeline_cap: Option<u32>,
    /// Indexer scan buffer cap.
    pub scan_cap: Option<u32>,
    /// Correlation id echoed in the response; generated when absent.
    pub client_context_id: Option<String>,
    /// Request-level timeout override.
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    /// Creates a request for a statement.
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }

    /// Builds the HTTP envelope for `/query/service`.
    pub fn encode(&self, context_id: &str, timeout: Duration) -> Result<HttpEnvelope, Error> {
        if self.statement.is_empty() {
            return Err(Error::InvalidArgument {
                message: "query statement is empty".to_string(),
            });
        }
        let mut body = Map::new();
        body.insert("statement".to_string(), json!(self.statement));
        body.insert(
            "timeout".to_string(),
            json!(format!("{}ms", timeout.as_millis())),
        );
        body.insert("client_context_id".to_string(), json!(context_id));

        match &self.consistent_with {
            Some(state) if !state.is_empty() => {
                body.insert("scan_consistency".to_string(), json!("at_plus"));
                body.insert("scan_vectors".to_string(), state.scan_vectors());
            }
            _ => match self.scan_consistency {
                ScanConsistency::NotBounded => {
                    body.insert("scan_consistency".to_string(), json!("not_bounded"));
                }
                ScanConsistency::RequestPlus => {
                    body.insert("scan_consistency".to_string(), json!("request_plus"));
                }
            },
        }

        if !self.named_parameters.is_empty() && !self.positional_parameters.is_empty() {
            return Err(Error::InvalidArgument {
                message: "named and positional parameters are mutually exclusive".to_string(),
            });
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

        if self.readonly {
            body.insert("readonly".to_string(), json!(true));
        }
        if self.profile != ProfileMode::Off {
            body.insert("profile".to_string(), json!(self.profile.as_str()));
        }
        if let Some(n) = self.max_parallelism {
            body.insert("max_parallelism".to_string(), json!(n.to_string()));
        }
        if let Some(n) = self.pipeline_batch {
            body.insert("pipeline_batch".to_string(), json!(n.to_string()));
        }
        if let Some(n) = self.pipeline_cap {
            body.insert("pipeline_cap".to_string(), json!(n.to_string()));
        }
        if let Some(n) = self.scan_cap {
            body.insert("scan_cap".to_string(), json!(n.to_string()));
        }

        let body = serde_json::to_vec(&Value::Object(body)).map_err(|e| {
            Error::EncodingFailure {
                message: format!("query body: {e}"),
            }
        })?;
        Ok(HttpEnvelope::post_json("/query/service", body))
    }
}

/// Metrics section of a query response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryMetrics {
    /// Total time as reported by the server.
    #[serde(default, rename = "elapsedTime")]
    pub elapsed_time: String,
    /// Execution time as reported by the server.
    #[serde(default, rename = "executionTime")]
    pub execution_time: String,
    /// Number of result rows.
    #[serde(default, rename = "resultCount")]
    pub result_count: u64,
    /// Total result size in bytes.
    #[serde(default, rename = "resultSize")]
    pub result_size: u64,
    /// Number of mutations performed by a DML statement.
    #[serde(default, rename = "mutationCount")]
    pub mutation_count: u64,
    /// Number of errors.
    #[serde(default, rename = "errorCount")]
    pub error_count: u64,
    /// Number of warnings.
    #[serde(default, rename = "warningCount")]
    pub warning_count: u64,
}

/// One warning from the query engine.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryWarning {
    /// Engine warning code.
    pub code: i64,
    /// Warning text.
    pub msg: String,
}

#[derive(Debug, Deserialize)]
struct QueryError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct WireQueryResponse {
    #[serde(default, rename = "requestID")]
    request_id: Option<String>,
    #[serde(default, rename = "clientContextID")]
    client_context_id: Option<String>,
    #[serde(default)]
    signature: Option<Value>,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<QueryError>,
    #[serde(default)]
    warnings: Vec<QueryWarning>,
    #[serde(default)]
    metrics: Option<QueryMetrics>,
    #[serde(default)]
    profile: Option<Value>,
}

/// A decoded query response.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Server request id.
    pub request_id: Option<String>,
    /// Echoed client context id.
    pub client_context_id: Option<String>,
    /// Result schema signature.
    pub signature: Option<Value>,
    /// Result rows.
    pub results: Vec<Value>,
    /// Final status string (`success`, …).
    pub status: String,
    /// Warnings, when any.
    pub warnings: Vec<QueryWarning>,
    /// Metrics section.
    pub metrics: Option<QueryMetrics>,
    /// Profile section when profiling was requested.
    pub profile: Option<Value>,
}

impl QueryResponse {
    /// Decodes `(status, body)` into a typed response or the uniform error.
    pub fn decode(status: u16, body: &[u8]) -> Result<Self, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        let wire: WireQueryResponse =
            serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
                message: format!("query response: {e}"),
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
            client_context_id: wire.client_context_id,
            signature: wire.signature,
            results: wire.results,
            status: wire.status,
            warnings: wire.warnings,
            metrics: wire.metrics,
            profile: wire.profile,
        })
    }
}

/// Maps a query engine error code into the uniform namespace.
///
/// The code space is documented per error family; anything unmapped is a
/// server-originated internal failure and is never retried.
fn error_from_code(code: i64, msg: &str) -> Error {
    match code {
        1065 | 3014 => Error::InvalidArgument {
            message: msg.to_string(),
        },
        1080 => Error::UnambiguousTimeout {
            elapsed: Duration::ZERO,
            attempts: 1,
            reasons: Vec::new(),
        },
        3000 => Error::ParsingFailure {
            message: msg.to_string(),
        },
        4010 | 4020 | 4025 | 4035 | 4040 | 4050 | 4060 | 4070 | 4080 | 4090 => {
            Error::PreparedStatementFailure
        }
        4100..=4199 => Error::PlanningFailure,
        4300 => Error::IndexExists,
        12004 | 12016 => Error::IndexNotFound,
        12009 => {
            if msg.contains("CAS mismatch") {
                Error::CasMismatch
            } else {
                Error::DmlFailure
            }
        }
        13014 => Error::AuthenticationFailure {
            message: msg.to_string(),
        },
        code if (5000..6000).contains(&code) => Error::InternalServerFailure,
        code if (12000..13000).contains(&code) => Error::IndexFailure,
        _ => Error::InternalServerFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_statement_body() {
        let req = QueryRequest::new("SELECT \"ruby rules\" AS greeting");
        let envelope = req.encode("ctx-1", Duration::from_secs(75)).unwrap();
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["statement"], "SELECT \"ruby rules\" AS greeting");
        assert_eq!(body["timeout"], "75000ms");
        assert_eq!(body["client_context_id"], "ctx-1");
        assert_eq!(body["scan_consistency"], "not_bounded");
        assert!(body.get("readonly").is_none());
    }

    #[test]
    fn test_positional_and_named_are_exclusive() {
        let mut req = QueryRequest::new("SELECT 1");
        req.positional_parameters = vec![json!(1)];
        req.named_parameters.insert("a".to_string(), json!(2));
        assert!(req.encode("c", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_named_parameters_get_dollar_prefix() {
        let mut req = QueryRequest::new("SELECT $type");
        req.named_parameters.insert("type".to_string(), json!("airline"));
        let envelope = req.encode("c", Duration::from_secs(1)).unwrap();
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["$type"], "airline");
    }

    #[test]
    fn test_consistent_with_builds_scan_vectors() {
        let mut state = MutationState::new();
        state.add(MutationToken {
            partition_id: 512,
            partition_uuid: 0xdead,
            sequence_number: 9,
            bucket_name: "travel".to_string(),
        });
        let mut req = QueryRequest::new("SELECT 1");
        req.consistent_with = Some(state);
        let envelope = req.encode("c", Duration::from_secs(1)).unwrap();
        let body: Value = serde_json::from_slice(envelope.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["scan_consistency"], "at_plus");
        assert_eq!(body["scan_vectors"]["travel"]["512"][0], 9);
        assert_eq!(
            body["scan_vectors"]["travel"]["512"][1],
            0xdeadu64.to_string()
        );
    }

    #[test]
    fn test_mutation_state_keeps_highest_seqno() {
        let token = |seqno| MutationToken {
            partition_id: 1,
            partition_uuid: 7,
            sequence_number: seqno,
            bucket_name: "b".to_string(),
        };
        let mut state = MutationState::new();
        state.add(token(5));
        state.add(token(3));
        state.add(token(9));
        let vectors = state.scan_vectors();
        assert_eq!(vectors["b"]["1"][0], 9);
    }

    #[test]
    fn test_decode_success() {
        let body = r#"{
            "requestID": "r1",
            "clientContextID": "c1",
            "results": [{"greeting": "ruby rules"}],
            "status": "success",
            "metrics": {"resultCount": 1, "elapsedTime": "2ms"}
        }"#;
        let resp = QueryResponse::decode(200, body.as_bytes()).unwrap();
        assert_eq!(resp.status, "success");
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0]["greeting"], "ruby rules");
        assert_eq!(resp.metrics.unwrap().result_count, 1);
    }

    #[test]
    fn test_decode_server_error() {
        let body = r#"{
            "status": "errors",
            "errors": [{"code": 3000, "msg": "syntax error"}]
        }"#;
        assert!(matches!(
            QueryResponse::decode(400, body.as_bytes()),
            Err(Error::ParsingFailure { .. })
        ));
    }

    #[test]
    fn test_readonly_violation_is_internal_server_failure() {
        // The engine rejects the mutation with a code outside every mapped
        // family; that lands on internal_server_failure and is not retried.
        let body = r#"{
            "status": "errors",
            "errors": [{"code": 1000, "msg": "not allowed in readonly mode"}]
        }"#;
        let err = QueryResponse::decode(500, body.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InternalServerFailure));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_code_table() {
        assert!(matches!(
            error_from_code(12004, ""),
            Error::IndexNotFound
        ));
        assert!(matches!(error_from_code(4300, ""), Error::IndexExists));
        assert!(matches!(
            error_from_code(4040, ""),
            Error::PreparedStatementFailure
        ));
        assert!(matches!(
            error_from_code(12009, "CAS mismatch detected"),
            Error::CasMismatch
        ));
        assert!(matches!(error_from_code(12009, "other"), Error::DmlFailure));
        assert!(matches!(
            error_from_code(5000, ""),
            Error::InternalServerFailure
        ));
    }
}
