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

//! HTTP service plane.
//!
//! Query, analytics, search, views and management all ride plain HTTP.
//! Requests are described as transport-free [`HttpEnvelope`] values built by
//! the per-service encoders; [`HttpServiceClient`] executes an envelope
//! against a chosen node with basic auth and a per-request timeout, and the
//! per-service decoders turn `(status, body)` back into typed responses.

pub mod analytics;
pub mod mgmt;
pub mod query;
pub mod search;
pub mod views;

pub use analytics::{AnalyticsRequest, AnalyticsResponse};
pub use mgmt::ManagementOperation;
pub use query::{MutationState, ProfileMode, QueryRequest, QueryResponse, ScanConsistency};
pub use search::{SearchRequest, SearchResponse};
pub use views::{ViewQuery, ViewResponse};

use crate::auth::Credentials;
use crate::config::ClusterOptions;
use crate::error::Error;
use crate::transport::Endpoint;
use bytes::Bytes;
use std::time::Duration;

/// HTTP verb of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
}

/// A service request, independent of any HTTP client.
#[derive(Debug, Clone)]
pub struct HttpEnvelope {
    /// Verb.
    pub method: Method,
    /// Absolute path including any query string.
    pub path: String,
    /// Content type of `body`, when a body is present.
    pub content_type: Option<&'static str>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpEnvelope {
    /// A body-less GET.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            content_type: None,
            body: None,
        }
    }

    /// A POST with a JSON body.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            content_type: Some("application/json"),
            body: Some(body),
        }
    }

    /// A POST with a form-encoded body, as the management API expects.
    #[must_use]
    pub fn post_form(path: impl Into<String>, body: String) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            content_type: Some("application/x-www-form-urlencoded"),
            body: Some(body.into_bytes()),
        }
    }

    /// A PUT with a form-encoded body.
    #[must_use]
    pub fn put_form(path: impl Into<String>, body: String) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            content_type: Some("application/x-www-form-urlencoded"),
            body: Some(body.into_bytes()),
        }
    }

    /// A body-less DELETE.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            content_type: None,
            body: None,
        }
    }
}

/// A decoded service reply.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body.
    pub body: Bytes,
}

/// Executes envelopes against cluster nodes.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: reqwest::Client,
    credentials: Credentials,
    tls: bool,
}

impl HttpServiceClient {
    /// Builds the pooled client shared by all services of a cluster.
    pub fn new(credentials: Credentials, options: &ClusterOptions) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16);
        if let Some(path) = &options.trust_certificate {
            let pem = std::fs::read(path).map_err(|e| Error::InvalidArgument {
                message: format!("trust_certificate {}: {e}", path.display()),
            })?;
            let cert =
                reqwest::Certificate::from_pem(&pem).map_err(|e| Error::InvalidArgument {
                    message: format!("trust_certificate {}: {e}", path.display()),
                })?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(|e| Error::InvalidArgument {
            message: format!("http client: {e}"),
        })?;
        Ok(Self {
            client,
            credentials,
            tls: options.enable_tls,
        })
    }

    /// Executes one envelope against one node.
    ///
    /// Connection-level failures surface as `ServiceNotAvailable` so the
    /// dispatcher can classify them for retry; HTTP-level failures come back
    /// as a normal [`HttpResponse`] for the service decoder to interpret.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        envelope: &HttpEnvelope,
        timeout: Duration,
    ) -> Result<HttpResponse, Error> {
        let scheme = if self.tls { "https" } else { "http" };
        let url = format!("{scheme}://{endpoint}{}", envelope.path);

        let mut request = match envelope.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        request = request
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .timeout(timeout);
        if let (Some(content_type), Some(body)) = (envelope.content_type, &envelope.body) {
            request = request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(false, timeout, 1, Vec::new())
            } else {
                Error::ServiceNotAvailable {
                    service: format!("http ({e})"),
                }
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::DecodingFailure {
                message: format!("reading response body: {e}"),
            })?;
        Ok(HttpResponse { status, body })
    }
}

/// Shared status handling for service decoders: authentication and rate
/// limit statuses mean the same thing on every service.
pub(crate) fn common_http_error(status: u16) -> Option<Error> {
    match status {
        401 | 403 => Some(Error::AuthenticationFailure {
            message: format!("http status {status}"),
        }),
        429 => Some(Error::RateLimited),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_constructors() {
        let env = HttpEnvelope::post_json("/query/service", b"{}".to_vec());
        assert_eq!(env.method, Method::Post);
        assert_eq!(env.content_type, Some("application/json"));

        let env = HttpEnvelope::get("/pools/default/buckets");
        assert!(env.body.is_none());

        let env = HttpEnvelope::post_form("/pools/default/buckets", "name=b".to_string());
        assert_eq!(env.content_type, Some("application/x-www-form-urlencoded"));
        assert_eq!(env.body.as_deref(), Some(&b"name=b"[..]));
    }

    #[test]
    fn test_common_errors() {
        assert!(matches!(
            common_http_error(401),
            Some(Error::AuthenticationFailure { .. })
        ));
        assert!(matches!(common_http_error(429), Some(Error::RateLimited)));
        assert!(common_http_error(200).is_none());
        assert!(common_http_error(500).is_none());
    }
}
