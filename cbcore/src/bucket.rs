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

//! Key/value dispatch for one bucket.
//!
//! The bucket owns the current [`ClusterConfig`] snapshot and a session per
//! key/value node. Dispatch maps key → partition → master (or replica) →
//! session, encodes, and submits; every classified failure goes through the
//! retry orchestrator until the operation deadline. Config snapshots are
//! replaced atomically and only by strictly newer revisions, whether they
//! arrive from NOT_MY_VBUCKET payloads, server pushes, or bootstraps.

use crate::auth::Credentials;
use crate::config::{BucketType, ClusterConfig, ClusterOptions, Network};
use crate::error::Error;
use crate::operations::{DecodeContext, EncodeContext, KeyValueOperation};
use crate::protocol::{Feature, Status};
use crate::retry::{RetryContext, RetryDecision, RetryOrchestrator, RetryReason};
use crate::session::{Session, SessionConfig, SessionState};
use crate::transport::{Endpoint, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Key/value access to one bucket.
pub struct Bucket {
    name: String,
    options: ClusterOptions,
    credentials: Credentials,
    tls: Option<TlsConnector>,
    config: RwLock<Arc<ClusterConfig>>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config_tx: mpsc::UnboundedSender<ClusterConfig>,
    orchestrator: RetryOrchestrator,
    installer: Mutex<Option<JoinHandle<()>>>,
}

impl Bucket {
    /// Opens the bucket by bootstrapping a session against each seed in turn
    /// until one yields a config.
    pub async fn open(
        name: String,
        seeds: Vec<Endpoint>,
        credentials: Credentials,
        options: ClusterOptions,
        tls: Option<TlsConnector>,
    ) -> Result<Arc<Self>, Error> {
        let (config_tx, config_rx) = mpsc::unbounded_channel();

        let mut last_error = Error::ServiceNotAvailable {
            service: "key_value".to_string(),
        };
        for seed in seeds {
            let session_config = SessionConfig::from_options(
                &options,
                credentials.clone(),
                Some(name.clone()),
            );
            let session = match Session::connect(
                seed.clone(),
                session_config,
                tls.clone(),
                Some(config_tx.clone()),
            )
            .await
            {
                Ok(session) => session,
                Err(err) => {
                    warn!(%seed, %err, "seed failed, trying next");
                    last_error = err;
                    continue;
                }
            };
            let Some(config) = session.initial_config().cloned() else {
                warn!(%seed, "seed produced no bucket config, trying next");
                session.close();
                continue;
            };

            let bucket = Arc::new(Self {
                name,
                options,
                credentials,
                tls,
                config: RwLock::new(Arc::new(config)),
                sessions: Mutex::new(HashMap::from([(
                    session.endpoint().to_string(),
                    session,
                )])),
                config_tx,
                orchestrator: RetryOrchestrator::default(),
                installer: Mutex::new(None),
            });

            let installer = tokio::spawn(config_installer(Arc::downgrade(&bucket), config_rx));
            *bucket.installer.lock() = Some(installer);
            info!(bucket = %bucket.name, rev = bucket.config_snapshot().rev, "bucket open");
            return Ok(bucket);
        }
        Err(last_error)
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current topology snapshot.
    #[must_use]
    pub fn config_snapshot(&self) -> Arc<ClusterConfig> {
        self.config.read().clone()
    }

    /// Computes the partition for a key: `CRC32(key) & 0xFFFF`, modulo the
    /// partition count.
    #[must_use]
    pub fn partition_for_key(key: &[u8], partition_count: u16) -> u16 {
        ((crc32fast::hash(key) & 0xffff) % u32::from(partition_count)) as u16
    }

    /// Dispatches a key/value operation with retry until its deadline.
    pub async fn execute<O: KeyValueOperation>(&self, op: O) -> Result<O::Response, Error> {
        op.document_id().validate()?;
        let timeout = match op.timeout() {
            Some(explicit) => explicit.min(self.options.key_value_timeout),
            None => self.options.key_value_timeout,
        };
        let mut ctx = RetryContext::new(timeout);
        let mut ambiguous = false;

        loop {
            match self.attempt(&op, &mut ctx, &mut ambiguous).await {
                Ok(response) => return Ok(response),
                Err(Attempt::Fail(err)) => return Err(self.surface(err, &ctx, ambiguous)),
                Err(Attempt::Retry {
                    reason,
                    error,
                    server_delay,
                }) => {
                    debug!(%reason, %error, attempts = ctx.attempts, "dispatch retry");
                    let decision =
                        self.orchestrator
                            .plan_with(&mut ctx, reason, op.idempotent(), server_delay);
                    match decision {
                        RetryDecision::RetryAfter(delay) => tokio::time::sleep(delay).await,
                        RetryDecision::GiveUp => {
                            return Err(self.surface(error, &ctx, ambiguous))
                        }
                    }
                }
            }
        }
    }

    /// Installs a config snapshot if it is strictly newer than the current
    /// one. Returns `true` when the snapshot was replaced.
    pub fn install_config(&self, candidate: ClusterConfig) -> bool {
        {
            let mut guard = self.config.write();
            if !candidate.is_newer_than(&guard) {
                return false;
            }
            debug!(
                bucket = %self.name,
                old_rev = guard.rev,
                new_rev = candidate.rev,
                "installing config"
            );
            *guard = Arc::new(candidate);
        }

        // Collection ids are only meaningful against the config that
        // produced them.
        let snapshot = self.config_snapshot();
        let valid: HashSet<String> = (0..snapshot.server_list.len())
            .filter_map(|i| snapshot.kv_endpoint(i, self.tls.is_some(), self.network()))
            .map(|e| e.to_string())
            .collect();
        let mut sessions = self.sessions.lock();
        sessions.retain(|key, session| {
            if valid.contains(key) {
                session.invalidate_collections();
                true
            } else {
                debug!(endpoint = %key, "draining session for removed node");
                session.close();
                false
            }
        });
        true
    }

    /// Closes every session and stops config installation.
    pub fn close(&self) {
        if let Some(installer) = self.installer.lock().take() {
            installer.abort();
        }
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
        info!(bucket = %self.name, "bucket closed");
    }

    async fn attempt<O: KeyValueOperation>(
        &self,
        op: &O,
        ctx: &mut RetryContext,
        ambiguous: &mut bool,
    ) -> Result<O::Response, Attempt> {
        let config = self.config_snapshot();
        if config.bucket_type == Some(BucketType::Memcached) {
            return Err(Attempt::Fail(Error::UnsupportedOperation));
        }
        let Some(partition_map) = config.partition_map.as_ref() else {
            return Err(Attempt::retry(
                RetryReason::ConfigNotUpdated,
                Error::ServiceNotAvailable {
                    service: "key_value".to_string(),
                },
            ));
        };

        let id = op.document_id();
        let partition = Self::partition_for_key(id.key.as_bytes(), partition_map.partition_count());
        let server_index = match op.replica_index() {
            None => partition_map.master(partition),
            Some(replica) => {
                if replica >= config.num_replicas as usize {
                    return Err(Attempt::Fail(Error::InvalidArgument {
                        message: format!(
                            "replica {replica} out of range, bucket has {}",
                            config.num_replicas
                        ),
                    }));
                }
                partition_map.replica(partition, replica)
            }
        };
        let Some(server_index) = server_index else {
            // Vacant chain slot: the map is mid-rebalance and a newer config
            // should assign an owner.
            return Err(Attempt::retry(
                RetryReason::ConfigNotUpdated,
                Error::ServiceNotAvailable {
                    service: "key_value".to_string(),
                },
            ));
        };
        let Some(endpoint) =
            config.kv_endpoint(server_index, self.tls.is_some(), self.network())
        else {
            return Err(Attempt::retry(
                RetryReason::ConfigNotUpdated,
                Error::ServiceNotAvailable {
                    service: "key_value".to_string(),
                },
            ));
        };

        let session = match self.session_for(endpoint).await {
            Ok(session) => session,
            Err(err) => return Err(Attempt::retry(RetryReason::NotReady, err)),
        };
        if let Err(err) = session.wait_until_ready(ctx.remaining()).await {
            return Err(Attempt::retry(stall_reason(session.state()), err));
        }

        // Collections: resolve the id through the session cache. The default
        // collection is id 0 without a lookup.
        let collection_id = if session.negotiated(Feature::Collections) {
            if id.is_default_collection() {
                Some(0)
            } else {
                match session
                    .resolve_collection_id(&id.collection_path(), ctx.remaining())
                    .await
                {
                    Ok(cid) => Some(cid),
                    Err(err @ Error::CollectionNotFound) => {
                        return Err(Attempt::retry(RetryReason::CollectionUnknown, err));
                    }
                    Err(err) => return Err(Attempt::Fail(err)),
                }
            }
        } else {
            if !id.is_default_collection() {
                return Err(Attempt::Fail(Error::FeatureNotAvailable {
                    feature: "collections".to_string(),
                }));
            }
            None
        };

        let encode_ctx = EncodeContext {
            vbucket: partition,
            collection_id,
            snappy: session.negotiated(Feature::Snappy),
            alt_request: session.negotiated(Feature::AltRequest),
            preserve_expiry: session.negotiated(Feature::PreserveTtl),
        };
        let frame = match op.encode(&encode_ctx) {
            Ok(frame) => frame,
            Err(err) => return Err(Attempt::Fail(err)),
        };
        *ambiguous = frame.opcode.is_mutation();

        let reply = match session.execute(frame, ctx.remaining()).await {
            Ok(reply) => reply,
            Err(err @ Error::Transport(TransportError::Closed)) => {
                self.forget_session(&session);
                return Err(Attempt::retry(RetryReason::SocketClosedInFlight, err));
            }
            Err(err) => return Err(Attempt::Fail(err)),
        };

        match reply.status {
            Status::NotMyVbucket => {
                // The session already forwarded the attached config to the
                // installer; installing synchronously here as well makes the
                // new map visible before the retry routes.
                if !reply.value.is_empty() {
                    if let Ok(config) =
                        ClusterConfig::parse(&reply.value, &session.endpoint().host)
                    {
                        self.install_config(config);
                    }
                }
                Err(Attempt::retry(
                    RetryReason::NotMyVbucket,
                    Error::RequestCanceled {
                        reason: "not my vbucket".to_string(),
                    },
                ))
            }
            Status::UnknownCollection | Status::NoCollectionsManifest => {
                session.invalidate_collections();
                Err(Attempt::retry(
                    RetryReason::CollectionUnknown,
                    Error::CollectionNotFound,
                ))
            }
            Status::Locked => Err(Attempt::retry(
                RetryReason::Locked,
                Error::DocumentLocked,
            )),
            Status::TemporaryFailure | Status::Busy | Status::OutOfMemory => Err(Attempt::retry(
                RetryReason::TemporaryFailure,
                Error::TemporaryFailure,
            )),
            Status::Unknown(code) => {
                // Statuses the client has no static knowledge of defer to
                // the session error map, including its retry pacing.
                let entry = session.error_map().and_then(|map| map.get(code));
                match entry {
                    Some(entry) if entry.is_retryable() => Err(Attempt::Retry {
                        reason: RetryReason::TemporaryFailure,
                        error: Error::TemporaryFailure,
                        server_delay: entry
                            .retry
                            .as_ref()
                            .map(|spec| spec.delay(ctx.attempts)),
                    }),
                    _ => {
                        let decode_ctx = self.decode_context(&session, partition);
                        op.decode(&reply, &decode_ctx).map_err(Attempt::Fail)
                    }
                }
            }
            _ => {
                let decode_ctx = self.decode_context(&session, partition);
                op.decode(&reply, &decode_ctx).map_err(Attempt::Fail)
            }
        }
    }

    fn network(&self) -> Network {
        self.options.network
    }

    fn decode_context(&self, session: &Session, partition: u16) -> DecodeContext {
        DecodeContext {
            snappy: session.negotiated(Feature::Snappy),
            vbucket: partition,
            bucket: self.name.clone(),
        }
    }

    async fn session_for(&self, endpoint: Endpoint) -> Result<Arc<Session>, Error> {
        let key = endpoint.to_string();
        {
            let mut sessions = self.sessions.lock();
            match sessions.get(&key) {
                Some(session) if session.state() != SessionState::Stopped => {
                    return Ok(session.clone());
                }
                Some(_) => {
                    sessions.remove(&key);
                }
                None => {}
            }
        }

        let session_config = SessionConfig::from_options(
            &self.options,
            self.credentials.clone(),
            Some(self.name.clone()),
        );
        let session = Session::connect(
            endpoint,
            session_config,
            self.tls.clone(),
            Some(self.config_tx.clone()),
        )
        .await?;

        let mut sessions = self.sessions.lock();
        match sessions.get(&key) {
            // Another dispatch raced us to the same node; keep theirs.
            Some(existing) if existing.state() != SessionState::Stopped => {
                session.close();
                Ok(existing.clone())
            }
            _ => {
                sessions.insert(key, session.clone());
                Ok(session)
            }
        }
    }

    fn forget_session(&self, session: &Arc<Session>) {
        let key = session.endpoint().to_string();
        let mut sessions = self.sessions.lock();
        if let Some(current) = sessions.get(&key) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(&key);
            }
        }
        session.close();
    }

    fn surface(&self, error: Error, ctx: &RetryContext, ambiguous: bool) -> Error {
        if ctx.remaining().is_zero() || error.is_timeout() {
            return Error::timeout(ambiguous, ctx.elapsed(), ctx.attempts + 1, ctx.reasons.clone());
        }
        error
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        if let Some(installer) = self.installer.lock().take() {
            installer.abort();
        }
    }
}

enum Attempt {
    Retry {
        reason: RetryReason,
        error: Error,
        server_delay: Option<std::time::Duration>,
    },
    Fail(Error),
}

impl Attempt {
    fn retry(reason: RetryReason, error: Error) -> Self {
        Self::Retry {
            reason,
            error,
            server_delay: None,
        }
    }
}

/// Retry classification for a session that cannot take the command yet.
/// Authentication still in flight is its own retry class; anything earlier
/// in the lifecycle is plain not-ready.
fn stall_reason(state: SessionState) -> RetryReason {
    match state {
        SessionState::Negotiating(_) => RetryReason::AuthPending,
        _ => RetryReason::NotReady,
    }
}

async fn config_installer(
    bucket: std::sync::Weak<Bucket>,
    mut config_rx: mpsc::UnboundedReceiver<ClusterConfig>,
) {
    while let Some(config) = config_rx.recv().await {
        let Some(bucket) = bucket.upgrade() else {
            return;
        };
        bucket.install_config(config);
    }
}
