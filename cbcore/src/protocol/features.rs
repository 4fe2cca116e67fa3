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

//! HELLO feature negotiation.
//!
//! The first frame of every session advertises the feature set the client
//! wants; the server replies with the subset it granted. Everything the
//! session does afterwards (snappy bodies, collection-prefixed keys, extended
//! error codes, alt-magic requests) is gated on that granted set.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;

/// Features the client understands, by their 16-bit wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Feature {
    Datatype,
    TcpNodelay,
    MutationSeqno,
    Xattr,
    Xerror,
    SelectBucket,
    Snappy,
    Json,
    Duplex,
    ClustermapChangeNotification,
    UnorderedExecution,
    Tracing,
    AltRequest,
    SyncReplication,
    Collections,
    PreserveTtl,
}

impl Feature {
    /// Wire code of this feature.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Datatype => 0x0001,
            Self::TcpNodelay => 0x0003,
            Self::MutationSeqno => 0x0004,
            Self::Xattr => 0x0006,
            Self::Xerror => 0x0007,
            Self::SelectBucket => 0x0008,
            Self::Snappy => 0x000a,
            Self::Json => 0x000b,
            Self::Duplex => 0x000c,
            Self::ClustermapChangeNotification => 0x000d,
            Self::UnorderedExecution => 0x000e,
            Self::Tracing => 0x000f,
            Self::AltRequest => 0x0010,
            Self::SyncReplication => 0x0011,
            Self::Collections => 0x0012,
            Self::PreserveTtl => 0x0014,
        }
    }

    /// Decodes a feature code; unknown codes are dropped by the caller.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => Self::Datatype,
            0x0003 => Self::TcpNodelay,
            0x0004 => Self::MutationSeqno,
            0x0006 => Self::Xattr,
            0x0007 => Self::Xerror,
            0x0008 => Self::SelectBucket,
            0x000a => Self::Snappy,
            0x000b => Self::Json,
            0x000c => Self::Duplex,
            0x000d => Self::ClustermapChangeNotification,
            0x000e => Self::UnorderedExecution,
            0x000f => Self::Tracing,
            0x0010 => Self::AltRequest,
            0x0011 => Self::SyncReplication,
            0x0012 => Self::Collections,
            0x0014 => Self::PreserveTtl,
            _ => return None,
        })
    }
}

/// Encodes a HELLO request value: the feature codes, big-endian, in order.
#[must_use]
pub fn encode_features(features: &[Feature]) -> Bytes {
    let mut buf = BytesMut::with_capacity(features.len() * 2);
    for feature in features {
        buf.put_u16(feature.to_u16());
    }
    buf.freeze()
}

/// Decodes a HELLO response value into the granted feature set. Codes the
/// client does not know are ignored.
#[must_use]
pub fn decode_features(mut value: Bytes) -> HashSet<Feature> {
    let mut granted = HashSet::new();
    while value.remaining() >= 2 {
        if let Some(feature) = Feature::from_u16(value.get_u16()) {
            granted.insert(feature);
        }
    }
    granted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_codes_round_trip() {
        for code in 0u16..=0x20 {
            if let Some(feature) = Feature::from_u16(code) {
                assert_eq!(feature.to_u16(), code);
            }
        }
    }

    #[test]
    fn test_encode_decode() {
        let wanted = [Feature::Xerror, Feature::Snappy, Feature::Collections];
        let wire = encode_features(&wanted);
        assert_eq!(wire.len(), 6);
        let granted = decode_features(wire);
        assert_eq!(granted.len(), 3);
        assert!(granted.contains(&Feature::Snappy));
    }

    #[test]
    fn test_decode_skips_unknown_codes() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x0007);
        buf.put_u16(0x7fff); // unknown to this client
        buf.put_u16(0x0012);
        let granted = decode_features(buf.freeze());
        assert_eq!(granted.len(), 2);
    }
}
