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

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # cbcore — Couchbase-compatible client core
//!
//! cbcore is the cluster session of a Couchbase-compatible driver: it takes
//! high-level key/value and service requests, resolves them against a live
//! sharded topology, multiplexes them over persistent authenticated
//! connections, and returns typed results against one uniform error
//! namespace.
//!
//! ## Architecture
//!
//! The crate is layered, lowest first:
//!
//! - **[`protocol`]**: bit-exact binary codec — headers, frames, framing
//!   extras, sub-document specs, HELLO features, the server error map
//! - **[`transport`]**: plain-TCP and TLS byte streams plus DNS (including
//!   SRV expansion of connection strings)
//! - **[`auth`]**: SASL mechanism selection and the SCRAM exchange
//! - **[`config`]**: immutable topology snapshots and connection string
//!   parsing
//! - **[`session`]**: the per-node connection engine — bootstrap ladder,
//!   opaque demultiplexing, deadlines, teardown draining
//! - **[`bucket`]**: key → partition → node routing with automatic config
//!   refresh on NOT_MY_VBUCKET
//! - **[`cluster`]**: bootstrap, bucket registry, and HTTP service dispatch
//! - **[`operations`]**: pure encode/decode pairs for every key/value
//!   operation
//! - **[`http`]**: the query/analytics/search/views/management planes
//! - **[`retry`]**: reason-classified retry with capped exponential backoff
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cbcore::operations::{Get, Upsert, DocumentId};
//! use cbcore::Cluster;
//!
//! # async fn example() -> Result<(), cbcore::Error> {
//! let cluster = Cluster::connect(
//!     "couchbase://db1.example.com,db2.example.com/travel",
//!     "app",
//!     "secret",
//! )
//! .await?;
//! let bucket = cluster.bucket("travel").await?;
//!
//! let id = DocumentId::new("travel", "airline_10");
//! bucket
//!     .execute(Upsert::new(id.clone(), br#"{"name":"cbair"}"#.to_vec()))
//!     .await?;
//! let doc = bucket.execute(Get::new(id)).await?;
//! println!("cas={} value={}", doc.cas, String::from_utf8_lossy(&doc.value));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Everything runs on the caller's tokio runtime. Each session owns a reader
//! and a writer task; state that crosses tasks is either message-passed or
//! guarded by short non-suspending critical sections. Writes on one session
//! go out in submission order; responses complete in whatever order the
//! server produces them, matched by opaque. Topology snapshots are immutable
//! `Arc`s swapped under a lock, so a dispatch in flight keeps the snapshot
//! it started with.
//!
//! ## Errors
//!
//! Every failure surfaces as exactly one [`Error`]. Conditions the retry
//! orchestrator can clear (wrong vbucket, temporary failure, locked
//! documents, lost sockets for idempotent work) never reach the caller;
//! deadline exhaustion arrives as an ambiguous or unambiguous timeout
//! carrying the trace of retry reasons that led there.

pub mod auth;
pub mod bucket;
pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod operations;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod transport;

pub use auth::Credentials;
pub use bucket::Bucket;
pub use cluster::Cluster;
pub use config::{ClusterConfig, ClusterOptions, ConnectionString, Network, ServiceType};
pub use error::Error;
pub use http::{
    AnalyticsRequest, AnalyticsResponse, MutationState, QueryRequest, QueryResponse,
    SearchRequest, SearchResponse, ViewQuery, ViewResponse,
};
pub use operations::{DocumentId, MutationToken};
pub use retry::{BackoffPolicy, RetryOrchestrator, RetryReason};
pub use session::{Session, SessionState};
pub use transport::{Endpoint, TransportError};
