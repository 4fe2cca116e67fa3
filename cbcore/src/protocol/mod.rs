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

//! Binary key/value wire codec.
//!
//! This module implements bit-exact encode/decode of the memcached-style
//! binary protocol: the fixed 24-byte header, classic and alternative
//! ("framing extras") magics, per-opcode request and response bodies,
//! sub-document multi-path specs, HELLO feature negotiation payloads, SASL
//! envelopes, and the server error map.
//!
//! # Frame layout
//!
//! ```text
//! +--------+--------+----------------+--------+----------+
//! | magic  | opcode | key length     | extras | datatype |
//! +--------+--------+----------------+--------+----------+
//! | vbucket id (request) / status (response)             |
//! +------------------------------------------------------+
//! | total body length                                    |
//! +------------------------------------------------------+
//! | opaque                                               |
//! +------------------------------------------------------+
//! | cas                                                  |
//! +------------------------------------------------------+
//! | framing extras | extras | key | value                |
//! +------------------------------------------------------+
//! ```
//!
//! With the alternative magics (0x08 request / 0x18 response) the two key
//! length bytes are re-purposed: the first carries the framing-extras length
//! and the second the (single-byte) key length.

pub mod errmap;
pub mod features;
pub mod frame;
pub mod header;
pub mod subdoc;

pub use errmap::{ErrorMap, ErrorMapEntry, RetrySpec};
pub use features::Feature;
pub use frame::{FrameInfo, RequestFrame, ResponseFrame};
pub use header::{Header, HEADER_SIZE};

use crate::error::Error;

/// Frame magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// Client request, classic framing.
    Request,
    /// Server response, classic framing.
    Response,
    /// Client request with framing extras.
    AltRequest,
    /// Server response with framing extras.
    AltResponse,
    /// Server-initiated request (duplex connections).
    ServerRequest,
    /// Client reply to a server-initiated request.
    ServerResponse,
}

impl Magic {
    /// Decodes a magic byte. Unknown magics invalidate the whole stream, so
    /// there is no lenient fallback.
    pub fn from_u8(byte: u8) -> Result<Self, Error> {
        match byte {
            0x80 => Ok(Self::Request),
            0x81 => Ok(Self::Response),
            0x08 => Ok(Self::AltRequest),
            0x18 => Ok(Self::AltResponse),
            0x82 => Ok(Self::ServerRequest),
            0x83 => Ok(Self::ServerResponse),
            other => Err(Error::DecodingFailure {
                message: format!("invalid magic byte 0x{other:02x}"),
            }),
        }
    }

    /// Wire value of this magic.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Request => 0x80,
            Self::Response => 0x81,
            Self::AltRequest => 0x08,
            Self::AltResponse => 0x18,
            Self::ServerRequest => 0x82,
            Self::ServerResponse => 0x83,
        }
    }

    /// Returns `true` for the framing-extras magics.
    #[must_use]
    pub const fn is_alt(self) -> bool {
        matches!(self, Self::AltRequest | Self::AltResponse)
    }

    /// Returns `true` for the response magics.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(self, Self::Response | Self::AltResponse | Self::ServerResponse)
    }
}

/// Client opcodes used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    Noop,
    Version,
    Append,
    Prepend,
    Touch,
    GetAndTouch,
    Hello,
    SaslListMechs,
    SaslAuth,
    SaslStep,
    GetReplica,
    SelectBucket,
    ObserveSeqno,
    GetAndLock,
    Unlock,
    GetMeta,
    GetClusterConfig,
    GetCollectionsManifest,
    GetCollectionId,
    SubdocMultiLookup,
    SubdocMultiMutation,
    GetErrorMap,
}

impl Opcode {
    /// Wire value of this opcode.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Get => 0x00,
            Self::Set => 0x01,
            Self::Add => 0x02,
            Self::Replace => 0x03,
            Self::Delete => 0x04,
            Self::Increment => 0x05,
            Self::Decrement => 0x06,
            Self::Noop => 0x0a,
            Self::Version => 0x0b,
            Self::Append => 0x0e,
            Self::Prepend => 0x0f,
            Self::Touch => 0x1c,
            Self::GetAndTouch => 0x1d,
            Self::Hello => 0x1f,
            Self::SaslListMechs => 0x20,
            Self::SaslAuth => 0x21,
            Self::SaslStep => 0x22,
            Self::GetReplica => 0x83,
            Self::SelectBucket => 0x89,
            Self::ObserveSeqno => 0x91,
            Self::GetAndLock => 0x94,
            Self::Unlock => 0x95,
            Self::GetMeta => 0xa0,
            Self::GetClusterConfig => 0xb5,
            Self::GetCollectionsManifest => 0xba,
            Self::GetCollectionId => 0xbb,
            Self::SubdocMultiLookup => 0xd0,
            Self::SubdocMultiMutation => 0xd1,
            Self::GetErrorMap => 0xfe,
        }
    }

    /// Decodes an opcode byte.
    pub fn from_u8(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0x00 => Self::Get,
            0x01 => Self::Set,
            0x02 => Self::Add,
            0x03 => Self::Replace,
            0x04 => Self::Delete,
            0x05 => Self::Increment,
            0x06 => Self::Decrement,
            0x0a => Self::Noop,
            0x0b => Self::Version,
            0x0e => Self::Append,
            0x0f => Self::Prepend,
            0x1c => Self::Touch,
            0x1d => Self::GetAndTouch,
            0x1f => Self::Hello,
            0x20 => Self::SaslListMechs,
            0x21 => Self::SaslAuth,
            0x22 => Self::SaslStep,
            0x83 => Self::GetReplica,
            0x89 => Self::SelectBucket,
            0x91 => Self::ObserveSeqno,
            0x94 => Self::GetAndLock,
            0x95 => Self::Unlock,
            0xa0 => Self::GetMeta,
            0xb5 => Self::GetClusterConfig,
            0xba => Self::GetCollectionsManifest,
            0xbb => Self::GetCollectionId,
            0xd0 => Self::SubdocMultiLookup,
            0xd1 => Self::SubdocMultiMutation,
            0xfe => Self::GetErrorMap,
            other => {
                return Err(Error::DecodingFailure {
                    message: format!("unknown opcode 0x{other:02x}"),
                })
            }
        })
    }

    /// Returns `true` when a timed-out command of this opcode may already
    /// have taken effect on the server.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Set
                | Self::Add
                | Self::Replace
                | Self::Delete
                | Self::Increment
                | Self::Decrement
                | Self::Append
                | Self::Prepend
                | Self::Touch
                | Self::Unlock
                | Self::SubdocMultiMutation
        )
    }
}

/// Datatype bit-set carried in the header.
pub mod datatype {
    /// Body is JSON.
    pub const JSON: u8 = 0x01;
    /// Body is snappy compressed.
    pub const SNAPPY: u8 = 0x02;
    /// Body carries extended attributes.
    pub const XATTR: u8 = 0x04;
}

/// Server status codes, decoded from the response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    NotStored,
    DeltaBadValue,
    NotMyVbucket,
    NoBucket,
    Locked,
    AuthStale,
    AuthError,
    AuthContinue,
    RangeError,
    Rollback,
    NoAccess,
    NotInitialized,
    RateLimitedNetworkIngress,
    RateLimitedNetworkEgress,
    RateLimitedMaxConnections,
    RateLimitedMaxCommands,
    QuotaLimited,
    UnknownFrameInfo,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    XattrInvalid,
    UnknownCollection,
    NoCollectionsManifest,
    CannotApplyCollectionsManifest,
    UnknownScope,
    DurabilityInvalidLevel,
    DurabilityImpossible,
    SyncWriteInProgress,
    SyncWriteAmbiguous,
    SyncWriteReCommitInProgress,
    SubdocPathNotFound,
    SubdocPathMismatch,
    SubdocPathInvalid,
    SubdocPathTooBig,
    SubdocDocTooDeep,
    SubdocValueCannotInsert,
    SubdocDocNotJson,
    SubdocNumRange,
    SubdocDeltaInvalid,
    SubdocPathExists,
    SubdocValueTooDeep,
    SubdocInvalidCombo,
    SubdocMultiPathFailure,
    SubdocSuccessDeleted,
    SubdocXattrInvalidFlagCombo,
    SubdocXattrInvalidKeyCombo,
    SubdocXattrUnknownMacro,
    SubdocXattrUnknownVattr,
    SubdocXattrCannotModifyVattr,
    SubdocMultiPathFailureDeleted,
    /// A status the client has no static knowledge of; classification falls
    /// back to the server error map.
    Unknown(u16),
}

impl Status {
    /// Decodes a status from its 16-bit wire value.
    #[must_use]
    pub fn from_u16(code: u16) -> Self {
        match code {
            0x0000 => Self::Success,
            0x0001 => Self::KeyNotFound,
            0x0002 => Self::KeyExists,
            0x0003 => Self::ValueTooLarge,
            0x0004 => Self::InvalidArguments,
            0x0005 => Self::NotStored,
            0x0006 => Self::DeltaBadValue,
            0x0007 => Self::NotMyVbucket,
            0x0008 => Self::NoBucket,
            0x0009 => Self::Locked,
            0x001f => Self::AuthStale,
            0x0020 => Self::AuthError,
            0x0021 => Self::AuthContinue,
            0x0022 => Self::RangeError,
            0x0023 => Self::Rollback,
            0x0024 => Self::NoAccess,
            0x0025 => Self::NotInitialized,
            0x0030 => Self::RateLimitedNetworkIngress,
            0x0031 => Self::RateLimitedNetworkEgress,
            0x0032 => Self::RateLimitedMaxConnections,
            0x0033 => Self::RateLimitedMaxCommands,
            0x0034 => Self::QuotaLimited,
            0x0080 => Self::UnknownFrameInfo,
            0x0081 => Self::UnknownCommand,
            0x0082 => Self::OutOfMemory,
            0x0083 => Self::NotSupported,
            0x0084 => Self::InternalError,
            0x0085 => Self::Busy,
            0x0086 => Self::TemporaryFailure,
            0x0087 => Self::XattrInvalid,
            0x0088 => Self::UnknownCollection,
            0x0089 => Self::NoCollectionsManifest,
            0x008a => Self::CannotApplyCollectionsManifest,
            0x008c => Self::UnknownScope,
            0x00a0 => Self::DurabilityInvalidLevel,
            0x00a1 => Self::DurabilityImpossible,
            0x00a2 => Self::SyncWriteInProgress,
            0x00a3 => Self::SyncWriteAmbiguous,
            0x00a4 => Self::SyncWriteReCommitInProgress,
            0x00c0 => Self::SubdocPathNotFound,
            0x00c1 => Self::SubdocPathMismatch,
            0x00c2 => Self::SubdocPathInvalid,
            0x00c3 => Self::SubdocPathTooBig,
            0x00c4 => Self::SubdocDocTooDeep,
            0x00c5 => Self::SubdocValueCannotInsert,
            0x00c6 => Self::SubdocDocNotJson,
            0x00c7 => Self::SubdocNumRange,
            0x00c8 => Self::SubdocDeltaInvalid,
            0x00c9 => Self::SubdocPathExists,
            0x00ca => Self::SubdocValueTooDeep,
            0x00cb => Self::SubdocInvalidCombo,
            0x00cc => Self::SubdocMultiPathFailure,
            0x00cd => Self::SubdocSuccessDeleted,
            0x00ce => Self::SubdocXattrInvalidFlagCombo,
            0x00cf => Self::SubdocXattrInvalidKeyCombo,
            0x00d0 => Self::SubdocXattrUnknownMacro,
            0x00d1 => Self::SubdocXattrUnknownVattr,
            0x00d2 => Self::SubdocXattrCannotModifyVattr,
            0x00d3 => Self::SubdocMultiPathFailureDeleted,
            other => Self::Unknown(other),
        }
    }

    /// Wire value of this status.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Success => 0x0000,
            Self::KeyNotFound => 0x0001,
            Self::KeyExists => 0x0002,
            Self::ValueTooLarge => 0x0003,
            Self::InvalidArguments => 0x0004,
            Self::NotStored => 0x0005,
            Self::DeltaBadValue => 0x0006,
            Self::NotMyVbucket => 0x0007,
            Self::NoBucket => 0x0008,
            Self::Locked => 0x0009,
            Self::AuthStale => 0x001f,
            Self::AuthError => 0x0020,
            Self::AuthContinue => 0x0021,
            Self::RangeError => 0x0022,
            Self::Rollback => 0x0023,
            Self::NoAccess => 0x0024,
            Self::NotInitialized => 0x0025,
            Self::RateLimitedNetworkIngress => 0x0030,
            Self::RateLimitedNetworkEgress => 0x0031,
            Self::RateLimitedMaxConnections => 0x0032,
            Self::RateLimitedMaxCommands => 0x0033,
            Self::QuotaLimited => 0x0034,
            Self::UnknownFrameInfo => 0x0080,
            Self::UnknownCommand => 0x0081,
            Self::OutOfMemory => 0x0082,
            Self::NotSupported => 0x0083,
            Self::InternalError => 0x0084,
            Self::Busy => 0x0085,
            Self::TemporaryFailure => 0x0086,
            Self::XattrInvalid => 0x0087,
            Self::UnknownCollection => 0x0088,
            Self::NoCollectionsManifest => 0x0089,
            Self::CannotApplyCollectionsManifest => 0x008a,
            Self::UnknownScope => 0x008c,
            Self::DurabilityInvalidLevel => 0x00a0,
            Self::DurabilityImpossible => 0x00a1,
            Self::SyncWriteInProgress => 0x00a2,
            Self::SyncWriteAmbiguous => 0x00a3,
            Self::SyncWriteReCommitInProgress => 0x00a4,
            Self::SubdocPathNotFound => 0x00c0,
            Self::SubdocPathMismatch => 0x00c1,
            Self::SubdocPathInvalid => 0x00c2,
            Self::SubdocPathTooBig => 0x00c3,
            Self::SubdocDocTooDeep => 0x00c4,
            Self::SubdocValueCannotInsert => 0x00c5,
            Self::SubdocDocNotJson => 0x00c6,
            Self::SubdocNumRange => 0x00c7,
            Self::SubdocDeltaInvalid => 0x00c8,
            Self::SubdocPathExists => 0x00c9,
            Self::SubdocValueTooDeep => 0x00ca,
            Self::SubdocInvalidCombo => 0x00cb,
            Self::SubdocMultiPathFailure => 0x00cc,
            Self::SubdocSuccessDeleted => 0x00cd,
            Self::SubdocXattrInvalidFlagCombo => 0x00ce,
            Self::SubdocXattrInvalidKeyCombo => 0x00cf,
            Self::SubdocXattrUnknownMacro => 0x00d0,
            Self::SubdocXattrUnknownVattr => 0x00d1,
            Self::SubdocXattrCannotModifyVattr => 0x00d2,
            Self::SubdocMultiPathFailureDeleted => 0x00d3,
            Self::Unknown(code) => code,
        }
    }

    /// Returns `true` for the two statuses that signal overall success of a
    /// sub-document or regular command.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SubdocSuccessDeleted)
    }

    /// Maps a non-success status into the uniform error namespace.
    ///
    /// Returns `None` for success statuses.
    #[must_use]
    pub fn to_error(self) -> Option<Error> {
        Some(match self {
            Self::Success | Self::SubdocSuccessDeleted => return None,
            Self::KeyNotFound => Error::DocumentNotFound,
            Self::KeyExists => Error::DocumentExists,
            Self::ValueTooLarge => Error::ValueTooLarge,
            Self::InvalidArguments => Error::InvalidArgument {
                message: "rejected by server".to_string(),
            },
            Self::NotStored => Error::DocumentExists,
            Self::DeltaBadValue => Error::ValueInvalid,
            Self::NotMyVbucket => Error::RequestCanceled {
                reason: "not my vbucket".to_string(),
            },
            Self::UnknownCollection
            | Self::NoCollectionsManifest
            | Self::CannotApplyCollectionsManifest => Error::CollectionNotFound,
            Self::UnknownScope => Error::ScopeNotFound,
            Self::NoBucket => Error::BucketNotFound {
                name: "(none selected)".to_string(),
            },
            Self::Locked => Error::DocumentLocked,
            Self::AuthStale | Self::AuthError => Error::AuthenticationFailure {
                message: "rejected by server".to_string(),
            },
            Self::RangeError => Error::InvalidArgument {
                message: "value out of range".to_string(),
            },
            Self::NoAccess => Error::AuthenticationFailure {
                message: "no access".to_string(),
            },
            Self::RateLimitedNetworkIngress
            | Self::RateLimitedNetworkEgress
            | Self::RateLimitedMaxConnections
            | Self::RateLimitedMaxCommands => Error::RateLimited,
            Self::QuotaLimited => Error::QuotaLimited,
            Self::UnknownFrameInfo | Self::UnknownCommand | Self::NotSupported => {
                Error::UnsupportedOperation
            }
            Self::OutOfMemory | Self::Busy | Self::TemporaryFailure | Self::NotInitialized => {
                Error::TemporaryFailure
            }
            Self::InternalError | Self::Rollback => Error::InternalServerFailure,
            Self::XattrInvalid => Error::XattrInvalidKeyCombo,
            Self::DurabilityInvalidLevel => Error::DurabilityLevelInvalid,
            Self::DurabilityImpossible => Error::DurabilityImpossible,
            Self::SyncWriteInProgress => Error::DurableWriteInProgress,
            Self::SyncWriteAmbiguous => Error::DurabilityAmbiguous,
            Self::SyncWriteReCommitInProgress => Error::DurableWriteReCommitInProgress,
            Self::SubdocPathNotFound => Error::PathNotFound,
            Self::SubdocPathMismatch => Error::PathMismatch,
            Self::SubdocPathInvalid => Error::PathInvalid,
            Self::SubdocPathTooBig => Error::PathTooBig,
            Self::SubdocPathExists => Error::PathExists,
            Self::SubdocDocTooDeep | Self::SubdocValueTooDeep => Error::ValueTooLarge,
            Self::SubdocValueCannotInsert
            | Self::SubdocDocNotJson
            | Self::SubdocNumRange
            | Self::SubdocDeltaInvalid
            | Self::SubdocInvalidCombo => Error::ValueInvalid,
            Self::SubdocMultiPathFailure | Self::SubdocMultiPathFailureDeleted => {
                // Callers inspect per-field statuses for the real cause.
                Error::ValueInvalid
            }
            Self::SubdocXattrInvalidFlagCombo => Error::XattrInvalidFlagCombo,
            Self::SubdocXattrInvalidKeyCombo => Error::XattrInvalidKeyCombo,
            Self::SubdocXattrUnknownMacro => Error::XattrUnknownMacro,
            Self::SubdocXattrUnknownVattr => Error::XattrUnknownVirtualAttribute,
            Self::SubdocXattrCannotModifyVattr => Error::XattrCannotModifyVirtualAttribute,
            Self::AuthContinue => Error::AuthenticationFailure {
                message: "unexpected continue".to_string(),
            },
            Self::Unknown(code) => Error::DecodingFailure {
                message: format!("unclassified status 0x{code:04x}"),
            },
        })
    }
}

/// Encodes a collection id as unsigned LEB128, the prefix format applied to
/// document keys once collections have been negotiated.
#[must_use]
pub fn encode_collection_prefix(collection_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    let mut value = collection_id;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

/// Decodes an unsigned LEB128 collection id prefix, returning the id and the
/// number of bytes consumed.
pub fn decode_collection_prefix(buf: &[u8]) -> Result<(u32, usize), Error> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().enumerate().take(5) {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::DecodingFailure {
        message: "unterminated collection id prefix".to_string(),
    })
}

/// Decompresses a snappy body when the datatype bit says so and the session
/// negotiated the feature; otherwise the body passes through untouched.
pub fn maybe_decompress(datatype_bits: u8, snappy_negotiated: bool, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    if datatype_bits & datatype::SNAPPY == 0 {
        return Ok(body);
    }
    if !snappy_negotiated {
        return Err(Error::DecodingFailure {
            message: "server sent snappy body without negotiation".to_string(),
        });
    }
    snap::raw::Decoder::new()
        .decompress_vec(&body)
        .map_err(|e| Error::DecodingFailure {
            message: format!("snappy: {e}"),
        })
}

/// Compresses a mutation body when snappy is negotiated and compression
/// actually pays for itself. Returns the datatype bits to OR in and the body
/// to put on the wire.
#[must_use]
pub fn maybe_compress(snappy_negotiated: bool, body: Vec<u8>) -> (u8, Vec<u8>) {
    const MIN_COMPRESSIBLE: usize = 32;
    if !snappy_negotiated || body.len() < MIN_COMPRESSIBLE {
        return (0, body);
    }
    let compressed = snap::raw::Encoder::new().compress_vec(&body);
    match compressed {
        Ok(c) if c.len() < body.len() => (datatype::SNAPPY, c),
        _ => (0, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_round_trip() {
        for magic in [
            Magic::Request,
            Magic::Response,
            Magic::AltRequest,
            Magic::AltResponse,
            Magic::ServerRequest,
            Magic::ServerResponse,
        ] {
            assert_eq!(Magic::from_u8(magic.to_u8()).unwrap(), magic);
        }
        assert!(Magic::from_u8(0x42).is_err());
    }

    #[test]
    fn test_opcode_round_trip() {
        for byte in 0u8..=255 {
            if let Ok(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte);
            }
        }
    }

    #[test]
    fn test_mutation_classification() {
        assert!(Opcode::Set.is_mutation());
        assert!(Opcode::SubdocMultiMutation.is_mutation());
        assert!(!Opcode::Get.is_mutation());
        assert!(!Opcode::SubdocMultiLookup.is_mutation());
    }

    #[test]
    fn test_status_round_trip() {
        for code in 0u16..=0x00ff {
            let status = Status::from_u16(code);
            assert_eq!(status.to_u16(), code);
        }
        assert_eq!(Status::from_u16(0xbeef), Status::Unknown(0xbeef));
    }

    #[test]
    fn test_status_to_error() {
        assert!(Status::Success.to_error().is_none());
        assert!(matches!(
            Status::KeyNotFound.to_error(),
            Some(Error::DocumentNotFound)
        ));
        assert!(matches!(
            Status::KeyExists.to_error(),
            Some(Error::DocumentExists)
        ));
        assert!(matches!(
            Status::TemporaryFailure.to_error(),
            Some(Error::TemporaryFailure)
        ));
    }

    #[test]
    fn test_collection_prefix_single_byte() {
        assert_eq!(encode_collection_prefix(0), vec![0x00]);
        assert_eq!(encode_collection_prefix(0x7f), vec![0x7f]);
    }

    #[test]
    fn test_collection_prefix_multi_byte() {
        let encoded = encode_collection_prefix(0x1234);
        let (decoded, used) = decode_collection_prefix(&encoded).unwrap();
        assert_eq!(decoded, 0x1234);
        assert_eq!(used, encoded.len());

        let encoded = encode_collection_prefix(u32::MAX);
        let (decoded, used) = decode_collection_prefix(&encoded).unwrap();
        assert_eq!(decoded, u32::MAX);
        assert_eq!(used, 5);
    }

    #[test]
    fn test_decompress_passthrough_without_bit() {
        let body = b"plain".to_vec();
        let out = maybe_decompress(datatype::JSON, true, body.clone()).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_compress_round_trip() {
        let body = vec![b'a'; 4096];
        let (bits, wire) = maybe_compress(true, body.clone());
        assert_eq!(bits, datatype::SNAPPY);
        assert!(wire.len() < body.len());
        let back = maybe_decompress(bits, true, wire).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn test_compress_skips_tiny_bodies() {
        let body = b"tiny".to_vec();
        let (bits, wire) = maybe_compress(true, body.clone());
        assert_eq!(bits, 0);
        assert_eq!(wire, body);
    }
}
