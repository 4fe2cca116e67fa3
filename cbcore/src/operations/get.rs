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

//! Read-side operations: get and friends, existence checks, replica reads.

use super::{
    fail_on_status, wire_key, DecodeContext, DocumentId, EncodeContext, KeyValueOperation,
};
use crate::error::Error;
use crate::protocol::{maybe_decompress, Opcode, RequestFrame, ResponseFrame};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Response shared by the get family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Document CAS at read time.
    pub cas: u64,
    /// Caller flags stored with the document.
    pub flags: u32,
    /// Document body, decompressed.
    pub value: Vec<u8>,
}

fn decode_get_like(frame: &ResponseFrame, ctx: &DecodeContext) -> Result<GetResponse, Error> {
    fail_on_status(frame)?;
    if frame.extras.len() < 4 {
        return Err(Error::DecodingFailure {
            message: "get response lacks flags extras".to_string(),
        });
    }
    let flags = u32::from_be_bytes(frame.extras[0..4].try_into().map_err(|_| {
        Error::DecodingFailure {
            message: "get response flags truncated".to_string(),
        }
    })?);
    let value = maybe_decompress(frame.datatype, ctx.snappy, frame.value.to_vec())?;
    Ok(GetResponse {
        cas: frame.cas,
        flags,
        value,
    })
}

/// Fetches a document.
#[derive(Debug, Clone)]
pub struct Get {
    /// Document address.
    pub id: DocumentId,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Get {
    /// Creates a get for `id`.
    #[must_use]
    pub fn new(id: DocumentId) -> Self {
        Self { id, timeout: None }
    }
}

impl KeyValueOperation for Get {
    type Response = GetResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::Get);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_get_like(frame, ctx)
    }
}

/// Fetches a document and write-locks it for `lock_time`.
#[derive(Debug, Clone)]
pub struct GetAndLock {
    /// Document address.
    pub id: DocumentId,
    /// How long the server holds the lock.
    pub lock_time: Duration,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for GetAndLock {
    type Response = GetResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::GetAndLock);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        let mut extras = BytesMut::with_capacity(4);
        extras.put_u32(self.lock_time.as_secs() as u32);
        frame.extras = extras.freeze();
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_get_like(frame, ctx)
    }
}

/// Fetches a document and refreshes its expiry in one round trip.
#[derive(Debug, Clone)]
pub struct GetAndTouch {
    /// Document address.
    pub id: DocumentId,
    /// New expiry in seconds-from-now (or absolute epoch seconds past 30
    /// days, per server convention).
    pub expiry: u32,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for GetAndTouch {
    type Response = GetResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::GetAndTouch);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        let mut extras = BytesMut::with_capacity(4);
        extras.put_u32(self.expiry);
        frame.extras = extras.freeze();
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_get_like(frame, ctx)
    }
}

/// Reads a document from an explicit replica instead of the master.
#[derive(Debug, Clone)]
pub struct GetReplica {
    /// Document address.
    pub id: DocumentId,
    /// 0-based replica index.
    pub replica: usize,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for GetReplica {
    type Response = GetResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn replica_index(&self) -> Option<usize> {
        Some(self.replica)
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::GetReplica);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_get_like(frame, ctx)
    }
}

/// Existence metadata without the document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsResponse {
    /// `true` when the document exists and is not a tombstone.
    pub exists: bool,
    /// CAS at observation time; 0 when absent.
    pub cas: u64,
    /// Sequence number of the last mutation.
    pub sequence_number: u64,
}

/// Checks whether a document exists, via its metadata.
#[derive(Debug, Clone)]
pub struct Exists {
    /// Document address.
    pub id: DocumentId,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for Exists {
    type Response = ExistsResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::GetMeta);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        // Version 2 of the metadata format, which includes the datatype.
        frame.extras = Bytes::from_static(&[2]);
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, _ctx: &DecodeContext) -> Result<Self::Response, Error> {
        if frame.status == crate::protocol::Status::KeyNotFound {
            return Ok(ExistsResponse {
                exists: false,
                cas: 0,
                sequence_number: 0,
            });
        }
        fail_on_status(frame)?;
        if frame.extras.len() < 20 {
            return Err(Error::DecodingFailure {
                message: "get-meta response extras truncated".to_string(),
            });
        }
        let deleted = u32::from_be_bytes(frame.extras[0..4].try_into().unwrap_or_default());
        let seqno = u64::from_be_bytes(frame.extras[12..20].try_into().unwrap_or_default());
        Ok(ExistsResponse {
            exists: deleted == 0,
            cas: frame.cas,
            sequence_number: seqno,
        })
    }
}
