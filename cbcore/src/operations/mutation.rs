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

//! Write-side operations.
//!
//! Insert/upsert/replace share one frame shape (flags + expiry extras, value
//! body) and differ only in opcode and CAS handling. Durability rides in the
//! framing extras and therefore requires the alt-request feature; requesting
//! it against a server that did not negotiate the feature is an error, while
//! preserve-expiry is silently dropped in that case.

use super::{
    decode_mutation_token, fail_on_status, wire_key, DecodeContext, DocumentId, DurabilityLevel,
    EncodeContext, KeyValueOperation, MutationToken,
};
use crate::error::Error;
use crate::protocol::{maybe_compress, FrameInfo, Opcode, RequestFrame, ResponseFrame, Status};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Response of every plain mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResponse {
    /// CAS after the mutation.
    pub cas: u64,
    /// Mutation token when negotiated.
    pub mutation_token: Option<MutationToken>,
}

fn decode_mutation(frame: &ResponseFrame, ctx: &DecodeContext) -> Result<MutationResponse, Error> {
    fail_on_status(frame)?;
    Ok(MutationResponse {
        cas: frame.cas,
        mutation_token: decode_mutation_token(frame, ctx),
    })
}

fn durability_framing(
    durability: Option<DurabilityLevel>,
    preserve_expiry: bool,
    ctx: &EncodeContext,
) -> Result<Vec<FrameInfo>, Error> {
    let mut framing = Vec::new();
    if let Some(level) = durability {
        if !ctx.alt_request {
            return Err(Error::FeatureNotAvailable {
                feature: "sync-replication (alt-request not negotiated)".to_string(),
            });
        }
        framing.push(FrameInfo::Durability {
            level: level.to_u8(),
            timeout_ms: None,
        });
    }
    // Servers that never advertised preserve-expiry would reject the frame
    // info; the flag is dropped instead, matching pre-7.0 behavior.
    if preserve_expiry && ctx.alt_request && ctx.preserve_expiry {
        framing.push(FrameInfo::PreserveExpiry);
    }
    Ok(framing)
}

fn store_frame(
    opcode: Opcode,
    id: &DocumentId,
    value: &[u8],
    flags: u32,
    expiry: u32,
    cas: u64,
    durability: Option<DurabilityLevel>,
    preserve_expiry: bool,
    ctx: &EncodeContext,
) -> Result<RequestFrame, Error> {
    let mut frame = RequestFrame::new(opcode);
    frame.vbucket = ctx.vbucket;
    frame.cas = cas;
    frame.key = wire_key(id, ctx);
    frame.framing = durability_framing(durability, preserve_expiry, ctx)?;
    let mut extras = BytesMut::with_capacity(8);
    extras.put_u32(flags);
    extras.put_u32(expiry);
    frame.extras = extras.freeze();
    let (datatype, body) = maybe_compress(ctx.snappy, value.to_vec());
    frame.datatype = datatype;
    frame.value = Bytes::from(body);
    Ok(frame)
}

/// Creates a document, failing if it already exists.
#[derive(Debug, Clone)]
pub struct Insert {
    /// Document address.
    pub id: DocumentId,
    /// Document body.
    pub value: Vec<u8>,
    /// Caller flags stored with the document.
    pub flags: u32,
    /// Expiry in seconds (0 = never).
    pub expiry: u32,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Insert {
    /// Creates an insert with no expiry and default flags.
    #[must_use]
    pub fn new(id: DocumentId, value: Vec<u8>) -> Self {
        Self {
            id,
            value,
            flags: 0,
            expiry: 0,
            durability: None,
            timeout: None,
        }
    }
}

impl KeyValueOperation for Insert {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        store_frame(
            Opcode::Add,
            &self.id,
            &self.value,
            self.flags,
            self.expiry,
            0,
            self.durability,
            false,
            ctx,
        )
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_mutation(frame, ctx)
    }
}

/// Stores a document regardless of whether it exists.
#[derive(Debug, Clone)]
pub struct Upsert {
    /// Document address.
    pub id: DocumentId,
    /// Document body.
    pub value: Vec<u8>,
    /// Caller flags stored with the document.
    pub flags: u32,
    /// Expiry in seconds (0 = never).
    pub expiry: u32,
    /// Keep the document's current expiry instead of resetting it.
    pub preserve_expiry: bool,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Upsert {
    /// Creates an upsert with no expiry and default flags.
    #[must_use]
    pub fn new(id: DocumentId, value: Vec<u8>) -> Self {
        Self {
            id,
            value,
            flags: 0,
            expiry: 0,
            preserve_expiry: false,
            durability: None,
            timeout: None,
        }
    }
}

impl KeyValueOperation for Upsert {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        store_frame(
            Opcode::Set,
            &self.id,
            &self.value,
            self.flags,
            self.expiry,
            0,
            self.durability,
            self.preserve_expiry,
            ctx,
        )
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_mutation(frame, ctx)
    }
}

/// Replaces an existing document, optionally guarded by CAS.
#[derive(Debug, Clone)]
pub struct Replace {
    /// Document address.
    pub id: DocumentId,
    /// New document body.
    pub value: Vec<u8>,
    /// Caller flags stored with the document.
    pub flags: u32,
    /// Expiry in seconds (0 = never).
    pub expiry: u32,
    /// Keep the document's current expiry instead of resetting it.
    pub preserve_expiry: bool,
    /// CAS precondition (0 = unconditional).
    pub cas: u64,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Replace {
    /// Creates an unconditional replace.
    #[must_use]
    pub fn new(id: DocumentId, value: Vec<u8>) -> Self {
        Self {
            id,
            value,
            flags: 0,
            expiry: 0,
            preserve_expiry: false,
            cas: 0,
            durability: None,
            timeout: None,
        }
    }
}

impl KeyValueOperation for Replace {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn idempotent(&self) -> bool {
        // A CAS-guarded replace either applies once or fails with a
        // mismatch; re-dispatching it is safe.
        self.cas != 0
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        store_frame(
            Opcode::Replace,
            &self.id,
            &self.value,
            self.flags,
            self.expiry,
            self.cas,
            self.durability,
            self.preserve_expiry,
            ctx,
        )
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        // KeyExists on a CAS-guarded write is the server saying the compare
        // failed, not that the document exists.
        if self.cas != 0 && frame.status == Status::KeyExists {
            return Err(Error::CasMismatch);
        }
        decode_mutation(frame, ctx)
    }
}

/// Removes a document, optionally guarded by CAS.
#[derive(Debug, Clone)]
pub struct Remove {
    /// Document address.
    pub id: DocumentId,
    /// CAS precondition (0 = unconditional).
    pub cas: u64,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Remove {
    /// Creates an unconditional remove.
    #[must_use]
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            cas: 0,
            durability: None,
            timeout: None,
        }
    }
}

impl KeyValueOperation for Remove {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn idempotent(&self) -> bool {
        self.cas != 0
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::Delete);
        frame.vbucket = ctx.vbucket;
        frame.cas = self.cas;
        frame.key = wire_key(&self.id, ctx);
        frame.framing = durability_framing(self.durability, false, ctx)?;
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        if self.cas != 0 && frame.status == Status::KeyExists {
            return Err(Error::CasMismatch);
        }
        decode_mutation(frame, ctx)
    }
}

/// Appends raw bytes to a document body.
#[derive(Debug, Clone)]
pub struct Append {
    /// Document address.
    pub id: DocumentId,
    /// Bytes to append.
    pub value: Vec<u8>,
    /// CAS precondition (0 = unconditional).
    pub cas: u64,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for Append {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::Append);
        frame.vbucket = ctx.vbucket;
        frame.cas = self.cas;
        frame.key = wire_key(&self.id, ctx);
        frame.framing = durability_framing(self.durability, false, ctx)?;
        frame.value = Bytes::from(self.value.clone());
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_mutation(frame, ctx)
    }
}

/// Prepends raw bytes to a document body.
#[derive(Debug, Clone)]
pub struct Prepend {
    /// Document address.
    pub id: DocumentId,
    /// Bytes to prepend.
    pub value: Vec<u8>,
    /// CAS precondition (0 = unconditional).
    pub cas: u64,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for Prepend {
    type Response = MutationResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::Prepend);
        frame.vbucket = ctx.vbucket;
        frame.cas = self.cas;
        frame.key = wire_key(&self.id, ctx);
        frame.framing = durability_framing(self.durability, false, ctx)?;
        frame.value = Bytes::from(self.value.clone());
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        decode_mutation(frame, ctx)
    }
}

/// Response of a counter operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterResponse {
    /// CAS after the mutation.
    pub cas: u64,
    /// Counter value after the operation.
    pub content: u64,
    /// Mutation token when negotiated.
    pub mutation_token: Option<MutationToken>,
}

/// Atomically adjusts a numeric document.
#[derive(Debug, Clone)]
pub struct Counter {
    /// Document address.
    pub id: DocumentId,
    /// Signed adjustment; negative values decrement.
    pub delta: i64,
    /// Initial value when the document does not exist.
    pub initial: Option<u64>,
    /// Expiry applied when the document is created.
    pub expiry: u32,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl Counter {
    /// Creates a counter adjustment.
    #[must_use]
    pub fn new(id: DocumentId, delta: i64) -> Self {
        Self {
            id,
            delta,
            initial: None,
            expiry: 0,
            durability: None,
            timeout: None,
        }
    }
}

impl KeyValueOperation for Counter {
    type Response = CounterResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let opcode = if self.delta >= 0 {
            Opcode::Increment
        } else {
            Opcode::Decrement
        };
        let mut frame = RequestFrame::new(opcode);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        frame.framing = durability_framing(self.durability, false, ctx)?;
        let mut extras = BytesMut::with_capacity(20);
        extras.put_u64(self.delta.unsigned_abs());
        extras.put_u64(self.initial.unwrap_or(0));
        // All-ones expiry tells the server not to create the document.
        extras.put_u32(if self.initial.is_some() {
            self.expiry
        } else {
            u32::MAX
        });
        frame.extras = extras.freeze();
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        fail_on_status(frame)?;
        if frame.value.len() < 8 {
            return Err(Error::DecodingFailure {
                message: "counter response lacks value".to_string(),
            });
        }
        let content = u64::from_be_bytes(frame.value[0..8].try_into().map_err(|_| {
            Error::DecodingFailure {
                message: "counter value truncated".to_string(),
            }
        })?);
        Ok(CounterResponse {
            cas: frame.cas,
            content,
            mutation_token: decode_mutation_token(frame, ctx),
        })
    }
}

/// Response of a touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchResponse {
    /// CAS after the expiry update.
    pub cas: u64,
}

/// Updates a document's expiry without reading or writing its body.
#[derive(Debug, Clone)]
pub struct Touch {
    /// Document address.
    pub id: DocumentId,
    /// New expiry in seconds (0 = never).
    pub expiry: u32,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for Touch {
    type Response = TouchResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        let mut frame = RequestFrame::new(Opcode::Touch);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        let mut extras = BytesMut::with_capacity(4);
        extras.put_u32(self.expiry);
        frame.extras = extras.freeze();
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, _ctx: &DecodeContext) -> Result<Self::Response, Error> {
        fail_on_status(frame)?;
        Ok(TouchResponse { cas: frame.cas })
    }
}

/// Response of an unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockResponse {
    /// CAS after the unlock.
    pub cas: u64,
}

/// Releases a lock taken by get-and-lock.
#[derive(Debug, Clone)]
pub struct Unlock {
    /// Document address.
    pub id: DocumentId,
    /// CAS returned by the locking read; mandatory.
    pub cas: u64,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl KeyValueOperation for Unlock {
    type Response = UnlockResponse;

    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn encode(&self, ctx: &EncodeContext) -> Result<RequestFrame, Error> {
        if self.cas == 0 {
            return Err(Error::InvalidArgument {
                message: "unlock requires the lock cas".to_string(),
            });
        }
        let mut frame = RequestFrame::new(Opcode::Unlock);
        frame.vbucket = ctx.vbucket;
        frame.cas = self.cas;
        frame.key = wire_key(&self.id, ctx);
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, _ctx: &DecodeContext) -> Result<Self::Response, Error> {
        fail_on_status(frame)?;
        Ok(UnlockResponse { cas: frame.cas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc() -> EncodeContext {
        EncodeContext {
            vbucket: 512,
            collection_id: None,
            snappy: false,
            alt_request: true,
            preserve_expiry: true,
        }
    }

    fn dec() -> DecodeContext {
        DecodeContext {
            snappy: false,
            vbucket: 512,
            bucket: "travel".to_string(),
        }
    }

    fn mutation_response(cas: u64) -> ResponseFrame {
        let mut extras = BytesMut::new();
        extras.put_u64(0x1111_2222_3333_4444);
        extras.put_u64(9);
        ResponseFrame {
            opcode: Opcode::Set,
            datatype: 0,
            status: Status::Success,
            opaque: 1,
            cas,
            extras: extras.freeze(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    #[test]
    fn test_upsert_frame_layout() {
        let mut op = Upsert::new(DocumentId::new("travel", "airline_10"), b"{}".to_vec());
        op.flags = 0x2000000;
        op.expiry = 300;
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.opcode, Opcode::Set);
        assert_eq!(frame.vbucket, 512);
        assert_eq!(&frame.extras[0..4], &0x2000000u32.to_be_bytes());
        assert_eq!(&frame.extras[4..8], &300u32.to_be_bytes());
        assert_eq!(frame.value, Bytes::from_static(b"{}"));
        assert!(frame.framing.is_empty());
    }

    #[test]
    fn test_mutation_token_decoding() {
        let op = Upsert::new(DocumentId::new("travel", "k"), b"{}".to_vec());
        let resp = op.decode(&mutation_response(5), &dec()).unwrap();
        assert_eq!(resp.cas, 5);
        let token = resp.mutation_token.unwrap();
        assert_eq!(token.partition_id, 512);
        assert_eq!(token.partition_uuid, 0x1111_2222_3333_4444);
        assert_eq!(token.sequence_number, 9);
        assert_eq!(token.bucket_name, "travel");
    }

    #[test]
    fn test_insert_uses_add_opcode() {
        let op = Insert::new(DocumentId::new("b", "k"), b"{}".to_vec());
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.opcode, Opcode::Add);
        assert_eq!(frame.cas, 0);
    }

    #[test]
    fn test_replace_carries_cas_and_is_idempotent_with_it() {
        let mut op = Replace::new(DocumentId::new("b", "k"), b"{}".to_vec());
        assert!(!op.idempotent());
        op.cas = 42;
        assert!(op.idempotent());
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.cas, 42);
    }

    #[test]
    fn test_durability_requires_alt_request() {
        let mut ctx = enc();
        ctx.alt_request = false;
        let mut op = Remove::new(DocumentId::new("b", "k"));
        op.durability = Some(DurabilityLevel::Majority);
        assert!(matches!(
            op.encode(&ctx),
            Err(Error::FeatureNotAvailable { .. })
        ));
    }

    #[test]
    fn test_preserve_expiry_dropped_when_not_negotiated() {
        let mut ctx = enc();
        ctx.preserve_expiry = false;
        let mut op = Upsert::new(DocumentId::new("b", "k"), b"{}".to_vec());
        op.preserve_expiry = true;
        let frame = op.encode(&ctx).unwrap();
        assert!(frame.framing.is_empty());

        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.framing, vec![FrameInfo::PreserveExpiry]);
    }

    #[test]
    fn test_counter_encoding() {
        let mut op = Counter::new(DocumentId::new("b", "visits"), 3);
        op.initial = Some(1);
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.opcode, Opcode::Increment);
        assert_eq!(&frame.extras[0..8], &3u64.to_be_bytes());
        assert_eq!(&frame.extras[8..16], &1u64.to_be_bytes());
        assert_eq!(&frame.extras[16..20], &0u32.to_be_bytes());

        let op = Counter::new(DocumentId::new("b", "visits"), -2);
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.opcode, Opcode::Decrement);
        assert_eq!(&frame.extras[0..8], &2u64.to_be_bytes());
        // No initial: the server must not create the document.
        assert_eq!(&frame.extras[16..20], &u32::MAX.to_be_bytes());
    }

    #[test]
    fn test_counter_decode() {
        let op = Counter::new(DocumentId::new("b", "visits"), 1);
        let mut frame = mutation_response(8);
        frame.value = Bytes::copy_from_slice(&13u64.to_be_bytes());
        let resp = op.decode(&frame, &dec()).unwrap();
        assert_eq!(resp.content, 13);
        assert!(resp.mutation_token.is_some());
    }

    #[test]
    fn test_unlock_requires_cas() {
        let op = Unlock {
            id: DocumentId::new("b", "k"),
            cas: 0,
            timeout: None,
        };
        assert!(matches!(
            op.encode(&enc()),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_cas_mismatch_surfaces() {
        let mut frame = mutation_response(0);
        frame.status = Status::KeyExists;

        // Without a CAS the status keeps its document-exists meaning.
        let op = Replace::new(DocumentId::new("b", "k"), b"{}".to_vec());
        assert!(matches!(op.decode(&frame, &dec()), Err(Error::DocumentExists)));

        // With a CAS it is a failed compare.
        let mut op = Replace::new(DocumentId::new("b", "k"), b"{}".to_vec());
        op.cas = 41;
        assert!(matches!(op.decode(&frame, &dec()), Err(Error::CasMismatch)));
    }
}
