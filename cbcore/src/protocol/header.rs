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

//! The fixed 24-byte frame header.

use super::Magic;
use crate::error::Error;
use bytes::{Buf, BufMut};

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Decoded form of the 24-byte header shared by requests and responses.
///
/// The `vbucket_or_status` field carries the vbucket id on requests and the
/// status code on responses; the magic disambiguates. For the alternative
/// magics `framing_len` is non-zero and the key length is limited to a single
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame magic.
    pub magic: Magic,
    /// Raw opcode byte.
    pub opcode: u8,
    /// Length of the framing extras section (alt magics only).
    pub framing_len: u8,
    /// Length of the key section.
    pub key_len: u16,
    /// Length of the extras section.
    pub ext_len: u8,
    /// Datatype bit-set.
    pub datatype: u8,
    /// Vbucket id (requests) or status (responses).
    pub vbucket_or_status: u16,
    /// Total body length: framing extras + extras + key + value.
    pub body_len: u32,
    /// Per-session correlator echoed by the server.
    pub opaque: u32,
    /// Compare-and-swap value.
    pub cas: u64,
}

impl Header {
    /// Encodes the header into `buf`.
    ///
    /// Alt-magic headers pack the framing-extras length and a single-byte key
    /// length into the two bytes classic headers use for the 16-bit key
    /// length; encoding an alt-magic header with a key longer than 255 bytes
    /// is a caller bug surfaced as `EncodingFailure`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), Error> {
        buf.put_u8(self.magic.to_u8());
        buf.put_u8(self.opcode);
        if self.magic.is_alt() {
            if self.key_len > u16::from(u8::MAX) {
                return Err(Error::EncodingFailure {
                    message: format!("key length {} exceeds alt-magic limit", self.key_len),
                });
            }
            buf.put_u8(self.framing_len);
            buf.put_u8(self.key_len as u8);
        } else {
            buf.put_u16(self.key_len);
        }
        buf.put_u8(self.ext_len);
        buf.put_u8(self.datatype);
        buf.put_u16(self.vbucket_or_status);
        buf.put_u32(self.body_len);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
        Ok(())
    }

    /// Decodes a header from exactly [`HEADER_SIZE`] bytes.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::DecodingFailure {
                message: format!(
                    "header needs {HEADER_SIZE} bytes, got {}",
                    buf.remaining()
                ),
            });
        }
        let magic = Magic::from_u8(buf.get_u8())?;
        let opcode = buf.get_u8();
        let (framing_len, key_len) = if magic.is_alt() {
            (buf.get_u8(), u16::from(buf.get_u8()))
        } else {
            (0, buf.get_u16())
        };
        let ext_len = buf.get_u8();
        let datatype = buf.get_u8();
        let vbucket_or_status = buf.get_u16();
        let body_len = buf.get_u32();
        let opaque = buf.get_u32();
        let cas = buf.get_u64();

        let sections = u32::from(framing_len) + u32::from(ext_len) + u32::from(key_len);
        if body_len < sections {
            return Err(Error::DecodingFailure {
                message: format!(
                    "body length {body_len} shorter than declared sections {sections}"
                ),
            });
        }

        Ok(Self {
            magic,
            opcode,
            framing_len,
            key_len,
            ext_len,
            datatype,
            vbucket_or_status,
            body_len,
            opaque,
            cas,
        })
    }

    /// Length of the value section implied by the header.
    #[must_use]
    pub fn value_len(&self) -> usize {
        self.body_len as usize
            - self.framing_len as usize
            - self.ext_len as usize
            - self.key_len as usize
    }
}
