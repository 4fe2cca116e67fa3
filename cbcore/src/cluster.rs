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

//! The top-level coordinator.
//!
//! A cluster handle bootstraps from a connection string (with DNS-SRV
//! expansion of bare single-host seeds), keeps the global topology snapshot,
//! opens buckets on demand, and dispatches query/analytics/search/view/
//! management requests to an eligible node — round-robin across nodes
//! advertising the service, with a sticky preference for the node that last
//! answered the same client context id.

use crate::auth::Credentials;
use crate::bucket::Bucket;
use crate::config::{ClusterConfig, ClusterOptions, ConnectionString, Network, ServiceType};
use crate::error::Error;
use crate::http::{
    AnalyticsRequest, AnalyticsResponse, HttpEnvelope, HttpResponse, HttpServiceClient,
    ManagementOperation, QueryRequest, QueryResponse, SearchRequest, SearchResponse, ViewQuery,
    ViewResponse,
};
use crate::retry::{RetryContext, RetryDecision, RetryOrchestrator, RetryReason};
use crate::session::{Session, SessionConfig};
use crate::transport::{dns, tls, Endpoint};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

const DEFAULT_KV_PORT: u16 = 11210;
const DEFAULT_KV_TLS_PORT: u16 = 11207;

/// A connected cluster.
pub struct Cluster {
    options: ClusterOptions,
    credentials: Credentials,
    tls: Option<TlsConnector>,
    seeds: Vec<Endpoint>,
    default_bucket: Option<String>,
    global_config: RwLock<Arc<ClusterConfig>>,
    global_session: Mutex<Option<Arc<Session>>>,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    http: HttpServiceClient,
    round_robin: AtomicUsize,
    sticky: Mutex<HashMap<String, Endpoint>>,
    orchestrator: RetryOrchestrator,
}

impl Cluster {
    /// Connects to a cluster described by a connection string.
    ///
    /// Seeds are tried in order until one yields a cluster config; the
    /// default bucket named in the connection string (if any) is opened
    /// lazily by [`bucket`](Self::bucket).
    pub async fn connect(
        connection_string: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Arc<Self>, Error> {
        let parsed = ConnectionString::parse(connection_string)?;
        let credentials = Credentials::new(username, password);
        let options = parsed.options.clone();

        let connector = if options.enable_tls {
            Some(match &options.trust_certificate {
                Some(path) => tls::connector_with_trust_certificate(path)?,
                None => tls::connector_with_native_roots()?,
            })
        } else {
            None
        };

        let seeds = Self::expand_seeds(&parsed, options.enable_tls).await?;
        info!(?seeds, "bootstrapping cluster");

        // Cluster-level session: authenticates without selecting a bucket
        // and serves the global config.
        let mut last_error = Error::ServiceNotAvailable {
            service: "key_value".to_string(),
        };
        let (config_tx, mut config_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut global = None;
        for seed in &seeds {
            let config = SessionConfig::from_options(&options, credentials.clone(), None);
            match Session::connect(seed.clone(), config, connector.clone(), Some(config_tx.clone()))
                .await
            {
                Ok(session) => match session.initial_config().cloned() {
                    Some(config) => {
                        global = Some((session, config));
                        break;
                    }
                    None => {
                        warn!(%seed, "seed served no global config, trying next");
                        session.close();
                    }
                },
                Err(err) => {
                    warn!(%seed, %err, "seed failed, trying next");
                    last_error = err;
                }
            }
        }
        let Some((session, config)) = global else {
            return Err(last_error);
        };

        let http = HttpServiceClient::new(credentials.clone(), &options)?;
        let cluster = Arc::new(Self {
            options,
            credentials,
            tls: connector,
            seeds,
            default_bucket: parsed.bucket,
            global_config: RwLock::new(Arc::new(config)),
            global_session: Mutex::new(Some(session)),
            buckets: Mutex::new(HashMap::new()),
            http,
            round_robin: AtomicUsize::new(0),
            sticky: Mutex::new(HashMap::new()),
            orchestrator: RetryOrchestrator::default(),
        });

        // Server-pushed topology updates observed by the cluster session
        // keep the global snapshot current.
        let weak = Arc::downgrade(&cluster);
        tokio::spawn(async move {
            while let Some(config) = config_rx.recv().await {
                let Some(cluster) = weak.upgrade() else { return };
                cluster.install_config(config);
            }
        });

        Ok(cluster)
    }

    async fn expand_seeds(
        parsed: &ConnectionString,
        tls: bool,
    ) -> Result<Vec<Endpoint>, Error> {
        let default_port = if tls { DEFAULT_KV_TLS_PORT } else { DEFAULT_KV_PORT };
        if parsed.srv_eligible() {
            let host = &parsed.hosts[0].0;
            match dns::srv_expand(host, tls).await {
                Ok(records) if !records.is_empty() => {
                    return Ok(records
                        .into_iter()
                        .map(|(host, port)| Endpoint::new(host, port))
                        .collect());
                }
                Ok(_) => debug!(%host, "no srv records, using the seed host directly"),
                Err(err) => warn!(%host, %err, "srv expansion failed, using the seed host"),
            }
        }
        Ok(parsed
            .hosts
            .iter()
            .map(|(host, port)| Endpoint::new(host.clone(), port.unwrap_or(default_port)))
            .collect())
    }

    /// Bucket named in the connection string, when one was given.
    #[must_use]
    pub fn default_bucket_name(&self) -> Option<&str> {
        self.default_bucket.as_deref()
    }

    /// The current global topology snapshot.
    #[must_use]
    pub fn config_snapshot(&self) -> Arc<ClusterConfig> {
        self.global_config.read().clone()
    }

    /// Opens (or returns the already-open) bucket.
    pub async fn bucket(&self, name: &str) -> Result<Arc<Bucket>, Error> {
        if let Some(bucket) = self.buckets.lock().get(name) {
            return Ok(bucket.clone());
        }

        // Prefer the freshest kv endpoints from the global config; fall back
        // to the bootstrap seeds.
        let config = self.config_snapshot();
        let mut seeds: Vec<Endpoint> =
            config.endpoints_for_service(ServiceType::KeyValue, self.tls.is_some(), self.network());
        if seeds.is_empty() {
            seeds = self.seeds.clone();
        }

        let bucket = Bucket::open(
            name.to_string(),
            seeds,
            self.credentials.clone(),
            self.options.clone(),
            self.tls.clone(),
        )
        .await?;

        let mut buckets = self.buckets.lock();
        match buckets.get(name) {
            // Another caller opened the same bucket concurrently.
            Some(existing) => {
                bucket.close();
                Ok(existing.clone())
            }
            None => {
                buckets.insert(name.to_string(), bucket.clone());
                Ok(bucket)
            }
        }
    }

    /// Runs a query.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, Error> {
        let context_id = request
            .client_context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = effective_timeout(request.timeout, self.options.query_timeout);
        let envelope = request.encode(&context_id, timeout)?;
        let (status, body) = self
            .service_request(
                ServiceType::Query,
                &envelope,
                timeout,
                Some(&context_id),
                request.readonly,
            )
            .await?;
        QueryResponse::decode(status, &body)
    }

    /// Runs an analytics statement.
    pub async fn analytics(
        &self,
        request: AnalyticsRequest,
    ) -> Result<AnalyticsResponse, Error> {
        let context_id = request
            .client_context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timeout = effective_timeout(request.timeout, self.options.query_timeout);
        let envelope = request.encode(&context_id, timeout)?;
        let (status, body) = self
            .service_request(
                ServiceType::Analytics,
                &envelope,
                timeout,
                Some(&context_id),
                request.readonly,
            )
            .await?;
        AnalyticsResponse::decode(status, &body)
    }

    /// Runs a full-text search.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, Error> {
        let timeout = effective_timeout(request.timeout, self.options.query_timeout);
        let envelope = request.encode(timeout)?;
        let (status, body) = self
            .service_request(ServiceType::Search, &envelope, timeout, None, true)
            .await?;
        SearchResponse::decode(status, &body)
    }

    /// Runs a view query.
    pub async fn view_query(&self, request: ViewQuery) -> Result<ViewResponse, Error> {
        let timeout = effective_timeout(request.timeout, self.options.query_timeout);
        let envelope = request.encode()?;
        let (status, body) = self
            .service_request(ServiceType::Views, &envelope, timeout, None, true)
            .await?;
        ViewResponse::decode(status, &body)
    }

    /// Runs a typed management operation.
    pub async fn manage<O: ManagementOperation>(&self, operation: O) -> Result<O::Output, Error> {
        let timeout = self.options.management_timeout;
        let envelope = operation.encode()?;
        let (status, body) = self
            .service_request(ServiceType::Management, &envelope, timeout, None, false)
            .await?;
        operation.decode(status, &body)
    }

    /// Dispatches an envelope to a node advertising the service, retrying
    /// eligible failures on other nodes until the deadline.
    async fn service_request(
        &self,
        service: ServiceType,
        envelope: &HttpEnvelope,
        timeout: Duration,
        context_id: Option<&str>,
        idempotent: bool,
    ) -> Result<(u16, bytes::Bytes), Error> {
        let mut ctx = RetryContext::new(timeout);
        loop {
            let endpoint = self.pick_endpoint(service, context_id)?;
            match self
                .http
                .execute(&endpoint, envelope, ctx.remaining())
                .await
            {
                Ok(HttpResponse { status, body }) => {
                    if let Some(ctx_id) = context_id {
                        self.sticky
                            .lock()
                            .insert(ctx_id.to_string(), endpoint);
                    }
                    return Ok((status, body));
                }
                Err(err @ Error::ServiceNotAvailable { .. }) => {
                    if let Some(ctx_id) = context_id {
                        self.sticky.lock().remove(ctx_id);
                    }
                    debug!(%endpoint, %err, "service dispatch failed");
                    match self
                        .orchestrator
                        .plan(&mut ctx, RetryReason::ServiceNotAvailable, idempotent)
                    {
                        RetryDecision::RetryAfter(delay) => tokio::time::sleep(delay).await,
                        RetryDecision::GiveUp => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn network(&self) -> Network {
        self.options.network
    }

    fn pick_endpoint(
        &self,
        service: ServiceType,
        context_id: Option<&str>,
    ) -> Result<Endpoint, Error> {
        let config = self.config_snapshot();
        let endpoints = config.endpoints_for_service(service, self.tls.is_some(), self.network());
        if endpoints.is_empty() {
            return Err(Error::ServiceNotAvailable {
                service: service.name().to_string(),
            });
        }
        if let Some(ctx_id) = context_id {
            if let Some(preferred) = self.sticky.lock().get(ctx_id) {
                if endpoints.contains(preferred) {
                    return Ok(preferred.clone());
                }
            }
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Ok(endpoints[index].clone())
    }

    /// Installs a newer global config snapshot. Returns `true` when
    /// replaced.
    pub fn install_config(&self, candidate: ClusterConfig) -> bool {
        let mut guard = self.global_config.write();
        if !candidate.is_newer_than(&guard) {
            return false;
        }
        debug!(old_rev = guard.rev, new_rev = candidate.rev, "installing global config");
        *guard = Arc::new(candidate);
        true
    }

    /// Closes every bucket and the cluster-level session.
    pub fn close(&self) {
        let buckets: Vec<Arc<Bucket>> = {
            let mut map = self.buckets.lock();
            map.drain().map(|(_, b)| b).collect()
        };
        for bucket in buckets {
            bucket.close();
        }
        if let Some(session) = self.global_session.lock().take() {
            session.close();
        }
        info!("cluster closed");
    }
}

fn effective_timeout(request: Option<Duration>, configured: Duration) -> Duration {
    match request {
        Some(explicit) => explicit.min(configured),
        None => configured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout_is_minimum() {
        let configured = Duration::from_secs(75);
        assert_eq!(effective_timeout(None, configured), configured);
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(5)), configured),
            Duration::from_secs(5)
        );
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(100)), configured),
            configured
        );
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DEFAULT_KV_PORT, 11210);
        assert_eq!(DEFAULT_KV_TLS_PORT, 11207);
    }
}
