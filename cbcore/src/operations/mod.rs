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

//! Typed key/value operations.
//!
//! Every operation is a request struct plus a response struct and two pure
//! functions between them and the wire: `encode` builds a [`RequestFrame`]
//! from the request and the dispatch context, `decode` turns the matched
//! [`ResponseFrame`] back into the typed response. No I/O happens here; the
//! bucket drives dispatch and the session drives bytes.

pub mod get;
pub mod mutation;
pub mod subdoc;

pub use get::{Exists, ExistsResponse, Get, GetAndLock, GetAndTouch, GetReplica, GetResponse};
pub use mutation::{
    Append, Counter, CounterResponse, Insert, MutationResponse, Prepend, Remove, Replace, Touch,
    TouchResponse, Unlock, UnlockResponse, Upsert,
};
pub use subdoc::{LookupIn, LookupInResponse, MutateIn, MutateInResponse, StoreSemantics};

use crate::error::Error;
use crate::protocol::{encode_collection_prefix, RequestFrame, ResponseFrame};
use bytes::Bytes;
use std::time::Duration;

/// Longest key the server accepts, in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Name of the default scope and collection.
pub const DEFAULT_NAME: &str = "_default";

/// Fully qualified document address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    /// Bucket name.
    pub bucket: String,
    /// Scope name.
    pub scope: String,
    /// Collection name.
    pub collection: String,
    /// Document key, at most [`MAX_KEY_LENGTH`] bytes.
    pub key: String,
}

impl DocumentId {
    /// Addresses a document in the default scope and collection.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            scope: DEFAULT_NAME.to_string(),
            collection: DEFAULT_NAME.to_string(),
            key: key.into(),
        }
    }

    /// Addresses a document in an explicit scope and collection.
    #[must_use]
    pub fn in_collection(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Returns `true` for the default scope/collection pair.
    #[must_use]
    pub fn is_default_collection(&self) -> bool {
        self.scope == DEFAULT_NAME && self.collection == DEFAULT_NAME
    }

    /// Path used for collection id resolution: `scope.collection`.
    #[must_use]
    pub fn collection_path(&self) -> String {
        format!("{}.{}", self.scope, self.collection)
    }

    /// Validates key constraints before dispatch.
    pub fn validate(&self) -> Result<(), Error> {
        if self.key.is_empty() {
            return Err(Error::InvalidArgument {
                message: "document key is empty".to_string(),
            });
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Err(Error::InvalidArgument {
                message: format!(
                    "document key is {} bytes, maximum is {MAX_KEY_LENGTH}",
                    self.key.len()
                ),
            });
        }
        Ok(())
    }
}

/// Proof of a mutation, consumable for read-your-writes queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationToken {
    /// Partition the mutation landed on.
    pub partition_id: u16,
    /// Uuid of that partition's history branch.
    pub partition_uuid: u64,
    /// Sequence number of the mutation.
    pub sequence_number: u64,
    /// Bucket the mutation belongs to.
    pub bucket_name: String,
}

/// Durability requirement attached to a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityLevel {
    /// Replicate to a majority of nodes.
    Majority,
    /// Majority, plus persist on the active node.
    MajorityAndPersistActive,
    /// Persist on a majority of nodes.
    PersistToMajority,
}

impl DurabilityLevel {
    /// Wire value used in the durability frame info.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Majority => 1,
            Self::MajorityAndPersistActive => 2,
            Self::PersistToMajority => 3,
        }
    }
}

/// Everything an encoder needs from the dispatch site.
#[derive(Debug, Clone)]
pub struct EncodeContext {
    /// Target partition.
    pub vbucket: u16,
    /// Resolved collection id, present once collections were negotiated and
    /// the id cache answered.
    pub collection_id: Option<u32>,
    /// Snappy negotiated on the session.
    pub snappy: bool,
    /// Alt-request (framing extras) negotiated on the session.
    pub alt_request: bool,
    /// Preserve-expiry negotiated on the session.
    pub preserve_expiry: bool,
}

/// Everything a decoder needs from the dispatch site.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// Snappy negotiated on the session.
    pub snappy: bool,
    /// Partition the request was routed to, for mutation tokens.
    pub vbucket: u16,
    /// Bucket name, for mutation tokens.
    pub bucket: String,
}

/// A typed key/value operation: pure encode and decode around the wire
/// frames.
pub trait KeyValueOperation: Send + Sync {
    /// Typed response produced by `decode`.
    type Response: Send + 'static;

    /// The document this operation addresses.
    fn document_id(&self) -> &DocumentId;

    /// Whether a retry may re-dispatch this operation even when a previous
    /// attempt might have reached the server.
    fn idempotent(&self) -> bool {
        false
    }

    /// Operation-level timeout override; the effective deadline is the
    /// minimum of this and the cluster default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Explicit replica to read from, for replica reads.
    fn replica_index(&self) -> Option<usize> {
        None
    }

    /// Builds the wire frame. The opaque is stamped later by the session.
    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error>;

    /// Interprets the matched response.
    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error>;
}

/// Encodes a document key with its collection id prefix where negotiated.
#[must_use]
pub fn wire_key(id: &DocumentId, ctx: &EncodeContext) -> Bytes {
    match ctx.collection_id {
        Some(cid) => {
            let mut key = encode_collection_prefix(cid);
            key.extend_from_slice(id.key.as_bytes());
            Bytes::from(key)
        }
        None => Bytes::from(id.key.as_bytes().to_vec()),
    }
}

/// Extracts the mutation token from a mutation response's extras, published
/// as `{partition_uuid, sequence_number}` when mutation tokens were
/// negotiated.
#[must_use]
pub fn decode_mutation_token(frame: &ResponseFrame, ctx: &DecodeContext) -> Option<MutationToken> {
    if frame.extras.len() < 16 {
        return None;
    }
    let uuid = u64::from_be_bytes(frame.extras[0..8].try_into().ok()?);
    let seqno = u64::from_be_bytes(frame.extras[8..16].try_into().ok()?);
    Some(MutationToken {
        partition_id: ctx.vbucket,
        partition_uuid: uuid,
        sequence_number: seqno,
        bucket_name: ctx.bucket.clone(),
    })
}

/// Maps a non-success response status to the uniform error, the shared first
/// step of every decoder.
pub fn fail_on_status(frame: &ResponseFrame) -> Result<(), Error> {
    match frame.status.to_error() {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
