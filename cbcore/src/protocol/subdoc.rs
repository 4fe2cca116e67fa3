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

//! Sub-document multi-path specs.
//!
//! The server requires every xattr spec to precede every body spec inside a
//! multi-path command, but callers are promised results in the order they
//! wrote their specs. Encoding therefore stably reorders the entries
//! (xattr first) while remembering each entry's original index; decoding
//! restores caller order before the typed response is assembled.

use super::Status;
use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Sub-document command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SubdocOpcode {
    Get,
    Exists,
    DictAdd,
    DictUpsert,
    Delete,
    Replace,
    ArrayPushLast,
    ArrayPushFirst,
    ArrayInsert,
    ArrayAddUnique,
    Counter,
    GetCount,
    /// Whole-document get, usable inside a lookup alongside xattr paths.
    GetDoc,
    /// Whole-document set, usable inside a mutation alongside xattr paths.
    SetDoc,
}

impl SubdocOpcode {
    /// Wire value of this opcode.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::GetDoc => 0x00,
            Self::SetDoc => 0x01,
            Self::Get => 0xc5,
            Self::Exists => 0xc6,
            Self::DictAdd => 0xc7,
            Self::DictUpsert => 0xc8,
            Self::Delete => 0xc9,
            Self::Replace => 0xca,
            Self::ArrayPushLast => 0xcb,
            Self::ArrayPushFirst => 0xcc,
            Self::ArrayInsert => 0xcd,
            Self::ArrayAddUnique => 0xce,
            Self::Counter => 0xcf,
            Self::GetCount => 0xd2,
        }
    }
}

/// Per-path flags.
pub mod path_flags {
    /// Create intermediate JSON containers on the way to the path.
    pub const CREATE_PARENTS: u8 = 0x01;
    /// The path addresses an extended attribute.
    pub const XATTR: u8 = 0x04;
    /// Expand server-side macros in the value.
    pub const EXPAND_MACROS: u8 = 0x10;
}

/// Document-level flags carried in the command extras.
pub mod doc_flags {
    /// Create the document if it does not exist.
    pub const MKDOC: u8 = 0x01;
    /// Fail if the document already exists.
    pub const ADD: u8 = 0x02;
    /// Operate on a deleted (tombstone) document.
    pub const ACCESS_DELETED: u8 = 0x04;
}

/// One entry of a multi-lookup request.
#[derive(Debug, Clone)]
pub struct LookupInSpec {
    /// Sub-document opcode; [`SubdocOpcode::Get`], [`SubdocOpcode::Exists`],
    /// [`SubdocOpcode::GetCount`] or [`SubdocOpcode::GetDoc`].
    pub opcode: SubdocOpcode,
    /// Per-path flags.
    pub flags: u8,
    /// JSON path ("" for the whole document).
    pub path: String,
}

impl LookupInSpec {
    /// Fetches the value at `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            opcode: SubdocOpcode::Get,
            flags: 0,
            path: path.into(),
        }
    }

    /// Checks for existence of `path`.
    #[must_use]
    pub fn exists(path: impl Into<String>) -> Self {
        Self {
            opcode: SubdocOpcode::Exists,
            flags: 0,
            path: path.into(),
        }
    }

    /// Counts the members of the container at `path`.
    #[must_use]
    pub fn count(path: impl Into<String>) -> Self {
        Self {
            opcode: SubdocOpcode::GetCount,
            flags: 0,
            path: path.into(),
        }
    }

    /// Marks this spec as addressing an extended attribute.
    #[must_use]
    pub fn xattr(mut self) -> Self {
        self.flags |= path_flags::XATTR;
        self
    }

    fn is_xattr(&self) -> bool {
        self.flags & path_flags::XATTR != 0
    }
}

/// One entry of a multi-mutation request.
#[derive(Debug, Clone)]
pub struct MutateInSpec {
    /// Sub-document opcode.
    pub opcode: SubdocOpcode,
    /// Per-path flags.
    pub flags: u8,
    /// JSON path.
    pub path: String,
    /// JSON-encoded value ("" for delete).
    pub value: Vec<u8>,
}

impl MutateInSpec {
    /// Upserts `value` at `path` inside the document.
    #[must_use]
    pub fn upsert(path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: SubdocOpcode::DictUpsert,
            flags: 0,
            path: path.into(),
            value: value.into(),
        }
    }

    /// Inserts `value` at `path`, failing if the path exists.
    #[must_use]
    pub fn insert(path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: SubdocOpcode::DictAdd,
            flags: 0,
            path: path.into(),
            value: value.into(),
        }
    }

    /// Replaces the value at `path`, failing if the path is missing.
    #[must_use]
    pub fn replace(path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: SubdocOpcode::Replace,
            flags: 0,
            path: path.into(),
            value: value.into(),
        }
    }

    /// Removes the value at `path`.
    #[must_use]
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            opcode: SubdocOpcode::Delete,
            flags: 0,
            path: path.into(),
            value: Vec::new(),
        }
    }

    /// Adds `delta` to the counter at `path`.
    #[must_use]
    pub fn counter(path: impl Into<String>, delta: i64) -> Self {
        Self {
            opcode: SubdocOpcode::Counter,
            flags: 0,
            path: path.into(),
            value: delta.to_string().into_bytes(),
        }
    }

    /// Appends `value` to the array at `path`.
    #[must_use]
    pub fn array_append(path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: SubdocOpcode::ArrayPushLast,
            flags: 0,
            path: path.into(),
            value: value.into(),
        }
    }

    /// Marks this spec as addressing an extended attribute.
    #[must_use]
    pub fn xattr(mut self) -> Self {
        self.flags |= path_flags::XATTR;
        self
    }

    /// Creates missing intermediate containers.
    #[must_use]
    pub fn create_path(mut self) -> Self {
        self.flags |= path_flags::CREATE_PARENTS;
        self
    }

    fn is_xattr(&self) -> bool {
        self.flags & path_flags::XATTR != 0
    }
}

/// Reorders spec indexes so xattr entries come first, stably.
///
/// Returns for each wire position the caller's original index. The encoders
/// below use it, and the decoders take it back to restore caller order.
fn xattr_first_order(is_xattr: impl Fn(usize) -> bool, len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|&i| !is_xattr(i));
    order
}

/// Encodes the value section of a multi-lookup request.
///
/// Returns the encoded body and the wire-position → original-index map the
/// response decoder needs.
#[must_use]
pub fn encode_lookup_specs(specs: &[LookupInSpec]) -> (Bytes, Vec<usize>) {
    let order = xattr_first_order(|i| specs[i].is_xattr(), specs.len());
    let mut buf = BytesMut::new();
    for &idx in &order {
        let spec = &specs[idx];
        buf.put_u8(spec.opcode.to_u8());
        buf.put_u8(spec.flags);
        buf.put_u16(spec.path.len() as u16);
        buf.put_slice(spec.path.as_bytes());
    }
    (buf.freeze(), order)
}

/// Encodes the value section of a multi-mutation request.
#[must_use]
pub fn encode_mutate_specs(specs: &[MutateInSpec]) -> (Bytes, Vec<usize>) {
    let order = xattr_first_order(|i| specs[i].is_xattr(), specs.len());
    let mut buf = BytesMut::new();
    for &idx in &order {
        let spec = &specs[idx];
        buf.put_u8(spec.opcode.to_u8());
        buf.put_u8(spec.flags);
        buf.put_u16(spec.path.len() as u16);
        buf.put_u32(spec.value.len() as u32);
        buf.put_slice(spec.path.as_bytes());
        buf.put_slice(&spec.value);
    }
    (buf.freeze(), order)
}

/// One decoded field of a multi-path response, already back in caller order.
#[derive(Debug, Clone)]
pub struct SubdocField {
    /// Index the caller used for this spec.
    pub original_index: usize,
    /// Per-path status.
    pub status: Status,
    /// Whether the path exists (lookups).
    pub exists: bool,
    /// Raw JSON value, empty where the opcode returns none.
    pub value: Bytes,
}

/// Decodes a multi-lookup response value.
///
/// The server replies with one `{status, length, value}` triple per spec in
/// wire order; `order` maps wire positions back to the caller's indexes.
pub fn decode_lookup_fields(mut value: Bytes, order: &[usize]) -> Result<Vec<SubdocField>, Error> {
    let mut fields = Vec::with_capacity(order.len());
    for &original_index in order {
        if value.remaining() < 6 {
            return Err(Error::DecodingFailure {
                message: "truncated lookup-in response".to_string(),
            });
        }
        let status = Status::from_u16(value.get_u16());
        let len = value.get_u32() as usize;
        if value.remaining() < len {
            return Err(Error::DecodingFailure {
                message: "truncated lookup-in field value".to_string(),
            });
        }
        let field_value = value.split_to(len);
        fields.push(SubdocField {
            original_index,
            status,
            exists: status.is_success(),
            value: field_value,
        });
    }
    fields.sort_by_key(|f| f.original_index);
    Ok(fields)
}

/// Decodes a multi-mutation response value.
///
/// On success the server only reports fields with result payloads (counter
/// results); on failure it reports the first failing wire index and status.
/// Either way the caller receives one entry per spec, in caller order.
pub fn decode_mutate_fields(mut value: Bytes, order: &[usize]) -> Result<Vec<SubdocField>, Error> {
    let mut by_wire_index: Vec<SubdocField> = order
        .iter()
        .map(|&original_index| SubdocField {
            original_index,
            // A failing entry is overwritten below; entries the server
            // never reached keep Success, matching their not-executed state.
            status: Status::Success,
            exists: true,
            value: Bytes::new(),
        })
        .collect();

    while value.remaining() >= 3 {
        let wire_index = value.get_u8() as usize;
        let status = Status::from_u16(value.get_u16());
        let field_value = if status.is_success() && value.remaining() >= 4 {
            let len = value.get_u32() as usize;
            if value.remaining() < len {
                return Err(Error::DecodingFailure {
                    message: "truncated mutate-in field value".to_string(),
                });
            }
            value.split_to(len)
        } else {
            Bytes::new()
        };
        let slot = by_wire_index
            .get_mut(wire_index)
            .ok_or_else(|| Error::DecodingFailure {
                message: format!("mutate-in field index {wire_index} out of range"),
            })?;
        slot.status = status;
        slot.exists = status.is_success();
        slot.value = field_value;
    }

    by_wire_index.sort_by_key(|f| f.original_index);
    Ok(by_wire_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xattr_specs_move_to_front_stably() {
        let specs = vec![
            LookupInSpec::get("$XTOC").xattr(),
            LookupInSpec::get("foo"),
            LookupInSpec::get("meta.rev").xattr(),
            LookupInSpec::get("bar"),
        ];
        let (_, order) = encode_lookup_specs(&specs);
        // xattrs (0, 2) first in original relative order, then body (1, 3)
        assert_eq!(order, vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_lookup_encoding_layout() {
        let specs = vec![LookupInSpec::get("foo.bar")];
        let (body, order) = encode_lookup_specs(&specs);
        assert_eq!(order, vec![0]);
        assert_eq!(body[0], SubdocOpcode::Get.to_u8());
        assert_eq!(body[1], 0);
        assert_eq!(&body[2..4], &7u16.to_be_bytes());
        assert_eq!(&body[4..], b"foo.bar");
    }

    #[test]
    fn test_lookup_fields_restore_caller_order() {
        let specs = vec![
            LookupInSpec::get("$XTOC").xattr(),
            LookupInSpec::get("foo"),
            LookupInSpec::get("meta.rev").xattr(),
        ];
        let (_, order) = encode_lookup_specs(&specs);
        assert_eq!(order, vec![0, 2, 1]);

        // Server replies in wire order: $XTOC, meta.rev, foo.
        let mut wire = BytesMut::new();
        for payload in [&b"[\"_sync\"]"[..], &b"\"1-abc\""[..], &b"42"[..]] {
            wire.put_u16(0);
            wire.put_u32(payload.len() as u32);
            wire.put_slice(payload);
        }
        let fields = decode_lookup_fields(wire.freeze(), &order).unwrap();
        assert_eq!(fields[0].value, Bytes::from_static(b"[\"_sync\"]"));
        assert_eq!(fields[1].value, Bytes::from_static(b"42"));
        assert_eq!(fields[2].value, Bytes::from_static(b"\"1-abc\""));
        assert!(fields.iter().all(|f| f.exists));
    }

    #[test]
    fn test_lookup_partial_failure() {
        let specs = vec![LookupInSpec::get("present"), LookupInSpec::get("absent")];
        let (_, order) = encode_lookup_specs(&specs);

        let mut wire = BytesMut::new();
        wire.put_u16(0);
        wire.put_u32(4);
        wire.put_slice(b"true");
        wire.put_u16(Status::SubdocPathNotFound.to_u16());
        wire.put_u32(0);
        let fields = decode_lookup_fields(wire.freeze(), &order).unwrap();
        assert!(fields[0].exists);
        assert!(!fields[1].exists);
        assert_eq!(fields[1].status, Status::SubdocPathNotFound);
    }

    #[test]
    fn test_mutate_encoding_layout() {
        let specs = vec![MutateInSpec::upsert("a.b", &b"1"[..]).create_path()];
        let (body, _) = encode_mutate_specs(&specs);
        assert_eq!(body[0], SubdocOpcode::DictUpsert.to_u8());
        assert_eq!(body[1], path_flags::CREATE_PARENTS);
        assert_eq!(&body[2..4], &3u16.to_be_bytes());
        assert_eq!(&body[4..8], &1u32.to_be_bytes());
        assert_eq!(&body[8..11], b"a.b");
        assert_eq!(&body[11..], b"1");
    }

    #[test]
    fn test_mutate_counter_results() {
        let specs = vec![
            MutateInSpec::upsert("touched", &b"1"[..]),
            MutateInSpec::counter("visits", 1),
        ];
        let (_, order) = encode_mutate_specs(&specs);

        // Only the counter (wire index 1) carries a result payload.
        let mut wire = BytesMut::new();
        wire.put_u8(1);
        wire.put_u16(0);
        wire.put_u32(2);
        wire.put_slice(b"12");
        let fields = decode_mutate_fields(wire.freeze(), &order).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].value, Bytes::from_static(b"12"));
        assert!(fields[0].value.is_empty());
    }

    #[test]
    fn test_mutate_failure_reports_failing_entry() {
        let specs = vec![
            MutateInSpec::upsert("ok", &b"1"[..]),
            MutateInSpec::replace("missing", &b"2"[..]),
        ];
        let (_, order) = encode_mutate_specs(&specs);

        let mut wire = BytesMut::new();
        wire.put_u8(1);
        wire.put_u16(Status::SubdocPathNotFound.to_u16());
        let fields = decode_mutate_fields(wire.freeze(), &order).unwrap();
        assert_eq!(fields[1].status, Status::SubdocPathNotFound);
        assert!(!fields[1].exists);
    }
}
