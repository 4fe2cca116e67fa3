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

//! Sub-document multi-path operations.
//!
//! The spec ordering dance (xattr first on the wire, caller order in the
//! response) lives in the protocol layer; these operations re-derive the
//! same deterministic order on decode, so retries re-encode identically and
//! no state needs to travel between encode and decode.

use super::{
    decode_mutation_token, fail_on_status, wire_key, DecodeContext, DocumentId, DurabilityLevel,
    EncodeContext, KeyValueOperation, MutationToken,
};
use crate::error::Error;
use crate::protocol::subdoc::{
    decode_lookup_fields, decode_mutate_fields, doc_flags, encode_lookup_specs,
    encode_mutate_specs, LookupInSpec, MutateInSpec, SubdocField,
};
use crate::protocol::{FrameInfo, Opcode, RequestFrame, ResponseFrame, Status};
use bytes::{BufMut, BytesMut};
use std::time::Duration;

/// Reads one or more paths inside a document.
#[derive(Debug, Clone)]
pub struct LookupIn {
    /// Document address.
    pub id: DocumentId,
    /// Paths to read, in the order results are wanted.
    pub specs: Vec<LookupInSpec>,
    /// Read from a deleted (tombstone) document.
    pub access_deleted: bool,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl LookupIn {
    /// Creates a lookup with the given specs.
    #[must_use]
    pub fn new(id: DocumentId, specs: Vec<LookupInSpec>) -> Self {
        Self {
            id,
            specs,
            access_deleted: false,
            timeout: None,
        }
    }
}

/// Typed result of a lookup.
#[derive(Debug, Clone)]
pub struct LookupInResponse {
    /// Document CAS at read time.
    pub cas: u64,
    /// Per-spec results, in the caller's spec order.
    pub fields: Vec<SubdocField>,
    /// Whether the document itself is a tombstone.
    pub deleted: bool,
}

impl KeyValueOperation for LookupIn {
    type Response = LookupInResponse;

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
        if self.specs.is_empty() {
            return Err(Error::InvalidArgument {
                message: "lookup-in needs at least one spec".to_string(),
            });
        }
        let mut frame = RequestFrame::new(Opcode::SubdocMultiLookup);
        frame.vbucket = ctx.vbucket;
        frame.key = wire_key(&self.id, ctx);
        if self.access_deleted {
            let mut extras = BytesMut::with_capacity(1);
            extras.put_u8(doc_flags::ACCESS_DELETED);
            frame.extras = extras.freeze();
        }
        let (value, _) = encode_lookup_specs(&self.specs);
        frame.value = value;
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, _ctx: &DecodeContext) -> Result<Self::Response, Error> {
        // Multi-path failure still carries per-field statuses worth
        // surfacing; everything else fails wholesale here.
        if !frame.status.is_success() && frame.status != Status::SubdocMultiPathFailure {
            fail_on_status(frame)?;
        }
        let (_, order) = encode_lookup_specs(&self.specs);
        let fields = decode_lookup_fields(frame.value.clone(), &order)?;
        Ok(LookupInResponse {
            cas: frame.cas,
            fields,
            deleted: frame.status == Status::SubdocSuccessDeleted,
        })
    }
}

/// What a mutate-in does when the document does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreSemantics {
    /// Mutate an existing document only.
    #[default]
    Replace,
    /// Create the document when missing.
    Upsert,
    /// Create the document, failing when it exists.
    Insert,
}

/// Mutates one or more paths inside a document atomically.
#[derive(Debug, Clone)]
pub struct MutateIn {
    /// Document address.
    pub id: DocumentId,
    /// Mutations to apply, in the order results are wanted.
    pub specs: Vec<MutateInSpec>,
    /// Document creation semantics.
    pub store_semantics: StoreSemantics,
    /// CAS precondition (0 = unconditional).
    pub cas: u64,
    /// Expiry applied to the document.
    pub expiry: Option<u32>,
    /// Mutate a deleted (tombstone) document.
    pub access_deleted: bool,
    /// Durability requirement.
    pub durability: Option<DurabilityLevel>,
    /// Operation-level timeout override.
    pub timeout: Option<Duration>,
}

impl MutateIn {
    /// Creates a mutate-in with the given specs and replace semantics.
    #[must_use]
    pub fn new(id: DocumentId, specs: Vec<MutateInSpec>) -> Self {
        Self {
            id,
            specs,
            store_semantics: StoreSemantics::Replace,
            cas: 0,
            expiry: None,
            access_deleted: false,
            durability: None,
            timeout: None,
        }
    }
}

/// Typed result of a mutate-in.
#[derive(Debug, Clone)]
pub struct MutateInResponse {
    /// CAS after the mutation.
    pub cas: u64,
    /// Per-spec results, in the caller's spec order.
    pub fields: Vec<SubdocField>,
    /// Mutation token when negotiated.
    pub mutation_token: Option<MutationToken>,
}

impl KeyValueOperation for MutateIn {
    type Response = MutateInResponse;

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
        if self.specs.is_empty() {
            return Err(Error::InvalidArgument {
                message: "mutate-in needs at least one spec".to_string(),
            });
        }
        let mut frame = RequestFrame::new(Opcode::SubdocMultiMutation);
        frame.vbucket = ctx.vbucket;
        frame.cas = self.cas;
        frame.key = wire_key(&self.id, ctx);

        let mut flags = match self.store_semantics {
            StoreSemantics::Replace => 0,
            StoreSemantics::Upsert => doc_flags::MKDOC,
            StoreSemantics::Insert => doc_flags::ADD,
        };
        if self.access_deleted {
            flags |= doc_flags::ACCESS_DELETED;
        }
        let mut extras = BytesMut::with_capacity(5);
        if let Some(expiry) = self.expiry {
            extras.put_u32(expiry);
        }
        if flags != 0 {
            extras.put_u8(flags);
        }
        frame.extras = extras.freeze();

        if let Some(level) = self.durability {
            if !ctx.alt_request {
                return Err(Error::FeatureNotAvailable {
                    feature: "sync-replication (alt-request not negotiated)".to_string(),
                });
            }
            frame.framing = vec![FrameInfo::Durability {
                level: level.to_u8(),
                timeout_ms: None,
            }];
        }

        let (value, _) = encode_mutate_specs(&self.specs);
        frame.value = value;
        Ok(frame)
    }

    fn decode(&self, frame: &ResponseFrame, ctx: &DecodeContext) -> Result<Self::Response, Error> {
        if self.cas != 0 && frame.status == Status::KeyExists {
            return Err(Error::CasMismatch);
        }
        let (_, order) = encode_mutate_specs(&self.specs);
        if frame.status == Status::SubdocMultiPathFailure
            || frame.status == Status::SubdocMultiPathFailureDeleted
        {
            let fields = decode_mutate_fields(frame.value.clone(), &order)?;
            // Surface the first failing path's error as the operation error.
            let failing = fields
                .iter()
                .find(|f| !f.status.is_success())
                .and_then(|f| f.status.to_error());
            return Err(failing.unwrap_or(Error::DecodingFailure {
                message: "multi-path failure without failing field".to_string(),
            }));
        }
        fail_on_status(frame)?;
        let fields = decode_mutate_fields(frame.value.clone(), &order)?;
        Ok(MutateInResponse {
            cas: frame.cas,
            fields,
            mutation_token: decode_mutation_token(frame, ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn enc() -> EncodeContext {
        EncodeContext {
            vbucket: 7,
            collection_id: None,
            snappy: false,
            alt_request: true,
            preserve_expiry: false,
        }
    }

    fn dec() -> DecodeContext {
        DecodeContext {
            snappy: false,
            vbucket: 7,
            bucket: "b".to_string(),
        }
    }

    #[test]
    fn test_lookup_mixed_order_round_trip() {
        let op = LookupIn::new(
            DocumentId::new("b", "doc"),
            vec![
                LookupInSpec::get("$XTOC").xattr(),
                LookupInSpec::get("foo"),
                LookupInSpec::get("meta.rev").xattr(),
            ],
        );
        let frame = op.encode(&enc()).unwrap();
        // Wire order: the two xattr paths, then the body path.
        let body = frame.value.clone();
        let first_path_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        assert_eq!(&body[4..4 + first_path_len], b"$XTOC");

        // Server answers in wire order; decode restores caller order.
        let mut wire = BytesMut::new();
        for payload in [&b"1"[..], &b"2"[..], &b"3"[..]] {
            wire.put_u16(0);
            wire.put_u32(payload.len() as u32);
            wire.put_slice(payload);
        }
        let response = ResponseFrame {
            opcode: Opcode::SubdocMultiLookup,
            datatype: 0,
            status: Status::Success,
            opaque: 0,
            cas: 3,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: wire.freeze(),
        };
        let decoded = op.decode(&response, &dec()).unwrap();
        // Wire [1, 2, 3] = [$XTOC, meta.rev, foo] → caller order
        // [$XTOC, foo, meta.rev] = [1, 3, 2].
        assert_eq!(decoded.fields[0].value, Bytes::from_static(b"1"));
        assert_eq!(decoded.fields[1].value, Bytes::from_static(b"3"));
        assert_eq!(decoded.fields[2].value, Bytes::from_static(b"2"));
    }

    #[test]
    fn test_lookup_rejects_empty_specs() {
        let op = LookupIn::new(DocumentId::new("b", "doc"), Vec::new());
        assert!(op.encode(&enc()).is_err());
    }

    #[test]
    fn test_mutate_extras_layout() {
        let mut op = MutateIn::new(
            DocumentId::new("b", "doc"),
            vec![MutateInSpec::upsert("a", &b"1"[..])],
        );
        op.store_semantics = StoreSemantics::Upsert;
        op.expiry = Some(60);
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(frame.extras.len(), 5);
        assert_eq!(&frame.extras[0..4], &60u32.to_be_bytes());
        assert_eq!(frame.extras[4], doc_flags::MKDOC);
    }

    #[test]
    fn test_mutate_failure_maps_field_error() {
        let op = MutateIn::new(
            DocumentId::new("b", "doc"),
            vec![MutateInSpec::replace("missing", &b"1"[..])],
        );
        let mut wire = BytesMut::new();
        wire.put_u8(0);
        wire.put_u16(Status::SubdocPathNotFound.to_u16());
        let response = ResponseFrame {
            opcode: Opcode::SubdocMultiMutation,
            datatype: 0,
            status: Status::SubdocMultiPathFailure,
            opaque: 0,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: wire.freeze(),
        };
        assert!(matches!(
            op.decode(&response, &dec()),
            Err(Error::PathNotFound)
        ));
    }

    #[test]
    fn test_mutate_durability_framing() {
        let mut op = MutateIn::new(
            DocumentId::new("b", "doc"),
            vec![MutateInSpec::upsert("a", &b"1"[..])],
        );
        op.durability = Some(DurabilityLevel::PersistToMajority);
        let frame = op.encode(&enc()).unwrap();
        assert_eq!(
            frame.framing,
            vec![FrameInfo::Durability {
                level: 3,
                timeout_ms: None
            }]
        );

        let mut ctx = enc();
        ctx.alt_request = false;
        assert!(matches!(
            op.encode(&ctx),
            Err(Error::FeatureNotAvailable { .. })
        ));
    }
}
