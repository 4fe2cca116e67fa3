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

//! The per-node session.
//!
//! A session owns one stream to one node and drives it through the
//! bootstrap ladder — connect, HELLO, error map, SASL, select-bucket,
//! get-config — before admitting user commands. Once ready, a writer task
//! serializes outgoing frames in submission order while a reader task
//! demultiplexes responses by opaque, so out-of-order completion from the
//! server is handled naturally.
//!
//! Teardown is single-shot and total: whichever side observes the failure
//! moves the state to `Stopped` and drains the pending table, so every
//! submitted command sees exactly one completion.

mod opaque;
mod pending;

pub use opaque::OpaqueGenerator;
pub use pending::PendingCommands;

use crate::auth::{plain_payload, select_mechanism, Credentials, Mechanism, ScramClient};
use crate::config::{ClusterOptions, ClusterConfig};
use crate::error::Error;
use crate::protocol::frame::{read_frame, write_frame};
use crate::protocol::{
    features, maybe_decompress, ErrorMap, Feature, Magic, Opcode, RequestFrame, ResponseFrame,
    Status,
};
use crate::transport::{Endpoint, Stream, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Phases of the bootstrap negotiation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Feature negotiation.
    Hello,
    /// Error map fetch.
    ErrorMap,
    /// SASL exchange.
    Sasl,
    /// Bucket selection (bucket-bound sessions only).
    SelectBucket,
    /// Initial cluster config fetch.
    GetConfig,
}

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing attempted yet.
    Disconnected,
    /// Resolving the node's address.
    Resolving,
    /// TCP (and TLS) establishment.
    Connecting,
    /// Bootstrap ladder.
    Negotiating(NegotiationPhase),
    /// Admitting user commands.
    Ready,
    /// Terminal; every pending command has been drained.
    Stopped,
}

/// Static configuration of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Credentials for SASL.
    pub credentials: Credentials,
    /// Bucket to select, `None` for cluster-level sessions.
    pub bucket: Option<String>,
    /// Features offered in HELLO.
    pub wanted_features: Vec<Feature>,
    /// Permit SASL PLAIN without TLS.
    pub allow_plain_without_tls: bool,
    /// Enable TCP keepalive.
    pub tcp_keepalive: bool,
    /// Budget for the whole bootstrap ladder.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Builds a session config from cluster options.
    #[must_use]
    pub fn from_options(
        options: &ClusterOptions,
        credentials: Credentials,
        bucket: Option<String>,
    ) -> Self {
        let mut wanted = vec![
            Feature::Datatype,
            Feature::TcpNodelay,
            Feature::Xattr,
            Feature::Xerror,
            Feature::SelectBucket,
            Feature::Snappy,
            Feature::Json,
            Feature::Duplex,
            Feature::ClustermapChangeNotification,
            Feature::Tracing,
            Feature::AltRequest,
            Feature::SyncReplication,
            Feature::Collections,
            Feature::PreserveTtl,
        ];
        if options.enable_mutation_tokens {
            wanted.push(Feature::MutationSeqno);
        }
        if options.enable_unordered_execution {
            wanted.push(Feature::UnorderedExecution);
        }
        Self {
            credentials,
            bucket,
            wanted_features: wanted,
            allow_plain_without_tls: options.allow_plain_without_tls,
            tcp_keepalive: options.enable_tcp_keepalive,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One authenticated connection to one node.
pub struct Session {
    endpoint: Endpoint,
    bucket: Option<String>,
    features: HashSet<Feature>,
    error_map: Option<ErrorMap>,
    initial_config: Option<ClusterConfig>,
    opaque: OpaqueGenerator,
    pending: Arc<PendingCommands>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    collections: Mutex<HashMap<String, u32>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Connects, negotiates, and returns a ready session.
    ///
    /// `tls` selects the secure flavor; `config_sink` receives every cluster
    /// config this session observes — the bootstrap config, configs attached
    /// to NOT_MY_VBUCKET responses, and server-pushed clustermap updates.
    pub async fn connect(
        endpoint: Endpoint,
        config: SessionConfig,
        tls: Option<TlsConnector>,
        config_sink: Option<mpsc::UnboundedSender<ClusterConfig>>,
    ) -> Result<Arc<Self>, Error> {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let result = tokio::time::timeout(
            config.connect_timeout,
            Self::bootstrap(&endpoint, &config, tls.as_ref(), &state_tx),
        )
        .await;

        let bootstrap = match result {
            Ok(Ok(bootstrap)) => bootstrap,
            Ok(Err(err)) => {
                let _ = state_tx.send(SessionState::Stopped);
                return Err(err);
            }
            Err(_) => {
                let _ = state_tx.send(SessionState::Stopped);
                return Err(Error::timeout(
                    false,
                    config.connect_timeout,
                    1,
                    Vec::new(),
                ));
            }
        };

        let Bootstrap {
            stream,
            granted,
            error_map,
            initial_config,
        } = bootstrap;

        if let (Some(sink), Some(cfg)) = (&config_sink, &initial_config) {
            let _ = sink.send(cfg.clone());
        }

        let snappy = granted.contains(&Feature::Snappy);
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingCommands::new());

        let reader = tokio::spawn(reader_loop(
            read_half,
            pending.clone(),
            state_tx.clone(),
            config_sink,
            endpoint.host.clone(),
            snappy,
        ));
        let writer = tokio::spawn(writer_loop(
            write_half,
            write_rx,
            pending.clone(),
            state_tx.clone(),
        ));

        let _ = state_tx.send(SessionState::Ready);
        info!(%endpoint, bucket = ?config.bucket, "session ready");

        Ok(Arc::new(Self {
            endpoint,
            bucket: config.bucket,
            features: granted,
            error_map,
            initial_config,
            opaque: OpaqueGenerator::new(),
            pending,
            write_tx,
            state_tx,
            state_rx,
            collections: Mutex::new(HashMap::new()),
            reader,
            writer,
        }))
    }

    async fn bootstrap(
        endpoint: &Endpoint,
        config: &SessionConfig,
        tls: Option<&TlsConnector>,
        state_tx: &watch::Sender<SessionState>,
    ) -> Result<Bootstrap, Error> {
        let _ = state_tx.send(SessionState::Resolving);
        let _ = state_tx.send(SessionState::Connecting);
        let mut stream = match tls {
            Some(connector) => Stream::connect_tls(endpoint, connector).await?,
            None => Stream::connect_plain(endpoint).await?,
        };
        stream.set_options(config.tcp_keepalive)?;

        let mut negotiator = Negotiator { stream: &mut stream };

        // HELLO
        let _ = state_tx.send(SessionState::Negotiating(NegotiationPhase::Hello));
        let mut hello = RequestFrame::new(Opcode::Hello);
        hello.key = Bytes::from(format!("cbcore/{}", env!("CARGO_PKG_VERSION")));
        hello.value = features::encode_features(&config.wanted_features);
        let reply = negotiator.roundtrip(hello).await?;
        if let Some(err) = reply.status.to_error() {
            return Err(err);
        }
        let granted = features::decode_features(reply.value);
        debug!(%endpoint, ?granted, "hello negotiated");

        // Error map v2
        let _ = state_tx.send(SessionState::Negotiating(NegotiationPhase::ErrorMap));
        let error_map = if granted.contains(&Feature::Xerror) {
            let mut req = RequestFrame::new(Opcode::GetErrorMap);
            req.value = Bytes::copy_from_slice(&2u16.to_be_bytes());
            let reply = negotiator.roundtrip(req).await?;
            match reply.status.to_error() {
                None => Some(ErrorMap::parse(&reply.value)?),
                Some(_) => {
                    warn!(%endpoint, "server advertised xerror but refused the error map");
                    None
                }
            }
        } else {
            None
        };

        // SASL
        let _ = state_tx.send(SessionState::Negotiating(NegotiationPhase::Sasl));
        negotiator
            .authenticate(config, tls.is_some())
            .await?;

        // Select bucket
        if let Some(bucket) = &config.bucket {
            let _ = state_tx.send(SessionState::Negotiating(NegotiationPhase::SelectBucket));
            let mut req = RequestFrame::new(Opcode::SelectBucket);
            req.key = Bytes::from(bucket.clone());
            let reply = negotiator.roundtrip(req).await?;
            if let Some(err) = reply.status.to_error() {
                return Err(match err {
                    Error::DocumentNotFound => Error::BucketNotFound {
                        name: bucket.clone(),
                    },
                    other => other,
                });
            }
        }

        // Initial config
        let _ = state_tx.send(SessionState::Negotiating(NegotiationPhase::GetConfig));
        let reply = negotiator
            .roundtrip(RequestFrame::new(Opcode::GetClusterConfig))
            .await?;
        let initial_config = match reply.status.to_error() {
            None if !reply.value.is_empty() => {
                let body = maybe_decompress(
                    reply.datatype,
                    granted.contains(&Feature::Snappy),
                    reply.value.to_vec(),
                )?;
                Some(ClusterConfig::parse(&body, &endpoint.host)?)
            }
            None => None,
            Some(err) => {
                // Pre-6.5 servers only serve configs on bucket sessions.
                debug!(%endpoint, %err, "no cluster config from this session");
                None
            }
        };

        Ok(Bootstrap {
            stream,
            granted,
            error_map,
            initial_config,
        })
    }

    /// Submits an encoded-ready frame and awaits its response.
    ///
    /// The opaque is stamped here; `deadline` bounds the wait, and on expiry
    /// the command is canceled so a late response is discarded by the
    /// reader. Mutations time out ambiguously, reads unambiguously.
    pub async fn execute(
        &self,
        mut frame: RequestFrame,
        deadline: Duration,
    ) -> Result<ResponseFrame, Error> {
        let ambiguous = frame.opcode.is_mutation();
        frame.opaque = self.opaque.next();
        let wire = frame.encode()?;

        let rx = self.pending.register(frame.opaque);
        if self.write_tx.send(wire).is_err() {
            self.pending.cancel(frame.opaque);
            return Err(Error::Transport(TransportError::Closed));
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport(TransportError::Closed)),
            Err(_) => {
                self.pending.cancel(frame.opaque);
                Err(Error::timeout(ambiguous, deadline, 1, Vec::new()))
            }
        }
    }

    /// Resolves a collection path (`scope.collection`) to its id, through
    /// the per-session cache.
    pub async fn resolve_collection_id(
        &self,
        path: &str,
        deadline: Duration,
    ) -> Result<u32, Error> {
        if let Some(cid) = self.collections.lock().get(path) {
            return Ok(*cid);
        }
        let mut frame = RequestFrame::new(Opcode::GetCollectionId);
        frame.value = Bytes::from(path.to_string());
        let reply = self.execute(frame, deadline).await?;
        if let Some(err) = reply.status.to_error() {
            return Err(err);
        }
        if reply.extras.len() < 12 {
            return Err(Error::DecodingFailure {
                message: "get-collection-id extras truncated".to_string(),
            });
        }
        let cid = u32::from_be_bytes(reply.extras[8..12].try_into().map_err(|_| {
            Error::DecodingFailure {
                message: "collection id truncated".to_string(),
            }
        })?);
        self.collections.lock().insert(path.to_string(), cid);
        Ok(cid)
    }

    /// Drops every cached collection id; called on config change.
    pub fn invalidate_collections(&self) {
        self.collections.lock().clear();
    }

    /// Returns `true` when the server granted the feature.
    #[must_use]
    pub fn negotiated(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// The error map published by this node, when one was served.
    #[must_use]
    pub fn error_map(&self) -> Option<&ErrorMap> {
        self.error_map.as_ref()
    }

    /// The config fetched at the end of bootstrap, when the node served one.
    #[must_use]
    pub fn initial_config(&self) -> Option<&ClusterConfig> {
        self.initial_config.as_ref()
    }

    /// The node this session is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bucket selected on this session, if any.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Waits until the session is ready, or fails when it stops or the
    /// timeout elapses first.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), Error> {
        let mut rx = self.state_rx.clone();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| {
                matches!(state, SessionState::Ready | SessionState::Stopped)
            }),
        )
        .await;
        match waited {
            Ok(Ok(state)) if *state == SessionState::Ready => Ok(()),
            Ok(_) => Err(Error::Transport(TransportError::Closed)),
            Err(_) => Err(Error::timeout(false, timeout, 0, Vec::new())),
        }
    }

    /// Number of commands currently awaiting responses.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Stops the session: every pending command is drained with a
    /// not-connected error and the state becomes terminal.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        let _ = self.state_tx.send(SessionState::Stopped);
        self.pending.drain();
        debug!(endpoint = %self.endpoint, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.pending.drain();
    }
}

struct Bootstrap {
    stream: Stream,
    granted: HashSet<Feature>,
    error_map: Option<ErrorMap>,
    initial_config: Option<ClusterConfig>,
}

/// Sequential frame exchange used before the demux tasks exist.
struct Negotiator<'a> {
    stream: &'a mut Stream,
}

impl Negotiator<'_> {
    async fn roundtrip(&mut self, frame: RequestFrame) -> Result<ResponseFrame, Error> {
        let wire = frame.encode()?;
        write_frame(self.stream, &wire).await?;
        let (header, body) = read_frame(self.stream).await?;
        let reply = ResponseFrame::decode(&header, body)?;
        if reply.opaque != frame.opaque {
            return Err(Error::DecodingFailure {
                message: "bootstrap response out of sequence".to_string(),
            });
        }
        Ok(reply)
    }

    async fn authenticate(&mut self, config: &SessionConfig, tls: bool) -> Result<(), Error> {
        let reply = self
            .roundtrip(RequestFrame::new(Opcode::SaslListMechs))
            .await?;
        if let Some(err) = reply.status.to_error() {
            return Err(err);
        }
        let server_mechs = String::from_utf8_lossy(&reply.value).into_owned();
        let mechanism =
            select_mechanism(&server_mechs, tls, config.allow_plain_without_tls)?;
        debug!(mechanism = mechanism.name(), "sasl mechanism selected");

        match mechanism {
            Mechanism::Plain => {
                let mut req = RequestFrame::new(Opcode::SaslAuth);
                req.key = Bytes::from_static(b"PLAIN");
                req.value = Bytes::from(plain_payload(&config.credentials));
                let reply = self.roundtrip(req).await?;
                match reply.status {
                    Status::Success => Ok(()),
                    _ => Err(Error::AuthenticationFailure {
                        message: "plain authentication rejected".to_string(),
                    }),
                }
            }
            scram => {
                let mut client = ScramClient::new(scram, config.credentials.clone())?;

                let mut req = RequestFrame::new(Opcode::SaslAuth);
                req.key = Bytes::from_static(scram.name().as_bytes());
                req.value = Bytes::from(client.client_first());
                let reply = self.roundtrip(req).await?;
                if reply.status != Status::AuthContinue {
                    return Err(Error::AuthenticationFailure {
                        message: format!(
                            "server aborted scram after client-first ({:?})",
                            reply.status
                        ),
                    });
                }
                let server_first = String::from_utf8_lossy(&reply.value).into_owned();
                let client_final = client.handle_server_first(&server_first)?;

                let mut req = RequestFrame::new(Opcode::SaslStep);
                req.key = Bytes::from_static(scram.name().as_bytes());
                req.value = Bytes::from(client_final);
                let reply = self.roundtrip(req).await?;
                if reply.status != Status::Success {
                    return Err(Error::AuthenticationFailure {
                        message: "credentials rejected".to_string(),
                    });
                }
                let server_final = String::from_utf8_lossy(&reply.value).into_owned();
                client.verify_server_final(&server_final)
            }
        }
    }
}

async fn reader_loop(
    mut read_half: ReadHalf<Stream>,
    pending: Arc<PendingCommands>,
    state_tx: watch::Sender<SessionState>,
    config_sink: Option<mpsc::UnboundedSender<ClusterConfig>>,
    origin_host: String,
    snappy: bool,
) {
    loop {
        let (header, body) = match read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "session read loop ending");
                break;
            }
        };

        // Server-initiated requests on duplex connections. The only one the
        // client acts on is the clustermap change notification, whose value
        // carries the new config.
        if header.magic == Magic::ServerRequest {
            if header.opcode == 0x01 {
                let offset =
                    header.framing_len as usize + header.ext_len as usize + header.key_len as usize;
                let value = body.slice(offset.min(body.len())..);
                publish_config(&config_sink, &value, header.datatype, snappy, &origin_host);
            }
            continue;
        }

        let frame = match ResponseFrame::decode(&header, body) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "invalid frame, closing session");
                break;
            }
        };

        // A NOT_MY_VBUCKET response carries the corrected config; deliver it
        // before completing the command so the retry sees the new map.
        if frame.status == Status::NotMyVbucket && !frame.value.is_empty() {
            publish_config(&config_sink, &frame.value, frame.datatype, snappy, &origin_host);
        }

        let opaque = frame.opaque;
        if !pending.complete(opaque, frame) {
            debug!(opaque, "response without a pending command, discarding");
        }
    }
    let _ = state_tx.send(SessionState::Stopped);
    pending.drain();
}

async fn writer_loop(
    mut write_half: WriteHalf<Stream>,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<PendingCommands>,
    state_tx: watch::Sender<SessionState>,
) {
    while let Some(wire) = write_rx.recv().await {
        if let Err(err) = write_frame(&mut write_half, &wire).await {
            debug!(%err, "session write loop ending");
            break;
        }
    }
    let _ = state_tx.send(SessionState::Stopped);
    pending.drain();
    let _ = write_half.shutdown().await;
}

fn publish_config(
    sink: &Option<mpsc::UnboundedSender<ClusterConfig>>,
    body: &Bytes,
    datatype: u8,
    snappy: bool,
    origin_host: &str,
) {
    let Some(sink) = sink else { return };
    let body = match maybe_decompress(datatype, snappy, body.to_vec()) {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, "dropping undecodable config body");
            return;
        }
    };
    match ClusterConfig::parse(&body, origin_host) {
        Ok(config) => {
            let _ = sink.send(config);
        }
        Err(err) => warn!(%err, "dropping unparsable config body"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_features_follow_options() {
        let options = ClusterOptions::default();
        let config = SessionConfig::from_options(
            &options,
            Credentials::new("u", "p"),
            Some("b".to_string()),
        );
        assert!(config.wanted_features.contains(&Feature::Snappy));
        assert!(config.wanted_features.contains(&Feature::Collections));
        assert!(config
            .wanted_features
            .contains(&Feature::UnorderedExecution));

        let mut options = ClusterOptions::default();
        options.enable_unordered_execution = false;
        let config =
            SessionConfig::from_options(&options, Credentials::new("u", "p"), None);
        assert!(!config
            .wanted_features
            .contains(&Feature::UnorderedExecution));
    }

    #[test]
    fn test_state_is_copy_and_comparable() {
        let state = SessionState::Negotiating(NegotiationPhase::Sasl);
        assert_eq!(state, SessionState::Negotiating(NegotiationPhase::Sasl));
        assert_ne!(state, SessionState::Ready);
    }
}
