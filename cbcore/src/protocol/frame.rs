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

//! Whole-frame encode/decode and async frame I/O.
//!
//! A [`RequestFrame`] is built by the operation layer, stamped with an opaque
//! by the session, and serialized in one buffer. A [`ResponseFrame`] is read
//! off the stream by the session's reader task and routed by opaque. Both
//! directions are implemented symmetrically so tests can stand up a mock node
//! with the same codec the client uses.

use super::header::{Header, HEADER_SIZE};
use super::{Magic, Opcode, Status};
use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body (20 MB, the server-side default).
pub const MAX_FRAME_SIZE: u32 = 20 * 1024 * 1024;

/// Frame info entries carried in the framing-extras section of alt-magic
/// requests.
///
/// Each entry is a 4-bit id and 4-bit length nibble followed by the payload;
/// ids or lengths of 15 would use escape bytes, but none of the infos the
/// client emits need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameInfo {
    /// Do not reorder this command across its neighbours.
    Barrier,
    /// Durability requirement: level plus optional timeout in milliseconds.
    Durability {
        /// Durability level byte (1 = majority, 2 = majority-and-persist,
        /// 3 = persist-to-majority).
        level: u8,
        /// Server-side durability timeout.
        timeout_ms: Option<u16>,
    },
    /// Execute on behalf of the named user.
    ImpersonateUser(String),
    /// Keep the document's current expiry on mutation.
    PreserveExpiry,
}

impl FrameInfo {
    const ID_BARRIER: u8 = 0;
    const ID_DURABILITY: u8 = 1;
    const ID_IMPERSONATE: u8 = 4;
    const ID_PRESERVE_EXPIRY: u8 = 5;

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Barrier => buf.put_u8(Self::ID_BARRIER << 4),
            Self::Durability { level, timeout_ms } => {
                let len = if timeout_ms.is_some() { 3 } else { 1 };
                buf.put_u8((Self::ID_DURABILITY << 4) | len);
                buf.put_u8(*level);
                if let Some(timeout) = timeout_ms {
                    buf.put_u16(*timeout);
                }
            }
            Self::ImpersonateUser(user) => {
                // Names longer than 14 bytes need the length escape byte.
                let name = user.as_bytes();
                if name.len() < 15 {
                    buf.put_u8((Self::ID_IMPERSONATE << 4) | name.len() as u8);
                } else {
                    buf.put_u8((Self::ID_IMPERSONATE << 4) | 0x0f);
                    buf.put_u8((name.len() - 15) as u8);
                }
                buf.put_slice(name);
            }
            Self::PreserveExpiry => buf.put_u8(Self::ID_PRESERVE_EXPIRY << 4),
        }
    }
}

/// A client request ready for the wire.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// Command opcode.
    pub opcode: Opcode,
    /// Datatype bit-set for the value.
    pub datatype: u8,
    /// Target vbucket (0 where not applicable).
    pub vbucket: u16,
    /// Correlator; stamped by the session just before the write.
    pub opaque: u32,
    /// CAS precondition (0 = none).
    pub cas: u64,
    /// Framing extras; non-empty forces the alternative magic.
    pub framing: Vec<FrameInfo>,
    /// Extras section.
    pub extras: Bytes,
    /// Key section.
    pub key: Bytes,
    /// Value section.
    pub value: Bytes,
}

impl RequestFrame {
    /// Creates a frame with empty sections for the given opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            datatype: 0,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            framing: Vec::new(),
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Serializes header and body into a single buffer.
    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut framing = BytesMut::new();
        for info in &self.framing {
            info.encode(&mut framing);
        }
        let magic = if framing.is_empty() {
            Magic::Request
        } else {
            Magic::AltRequest
        };
        let body_len = framing.len() + self.extras.len() + self.key.len() + self.value.len();
        if body_len as u32 > MAX_FRAME_SIZE {
            return Err(Error::EncodingFailure {
                message: format!("frame body {body_len} exceeds maximum {MAX_FRAME_SIZE}"),
            });
        }
        let header = Header {
            magic,
            opcode: self.opcode.to_u8(),
            framing_len: framing.len() as u8,
            key_len: self.key.len() as u16,
            ext_len: self.extras.len() as u8,
            datatype: self.datatype,
            vbucket_or_status: self.vbucket,
            body_len: body_len as u32,
            opaque: self.opaque,
            cas: self.cas,
        };
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        header.encode(&mut buf)?;
        buf.put_slice(&framing);
        buf.put_slice(&self.extras);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        Ok(buf.freeze())
    }

    /// Decodes a request frame from header plus body bytes.
    ///
    /// The client itself never decodes requests; this is the server half of
    /// the codec used by the loopback test node and by duplex streams.
    pub fn decode(header: &Header, mut body: Bytes) -> Result<Self, Error> {
        if header.magic.is_response() {
            return Err(Error::DecodingFailure {
                message: "expected a request magic".to_string(),
            });
        }
        if body.len() != header.body_len as usize {
            return Err(Error::DecodingFailure {
                message: format!(
                    "body length mismatch: header says {}, got {}",
                    header.body_len,
                    body.len()
                ),
            });
        }
        // Framing extras are opaque to the decoder; they are skipped rather
        // than reified.
        body.advance(header.framing_len as usize);
        let extras = body.split_to(header.ext_len as usize);
        let key = body.split_to(header.key_len as usize);
        Ok(Self {
            opcode: Opcode::from_u8(header.opcode)?,
            datatype: header.datatype,
            vbucket: header.vbucket_or_status,
            opaque: header.opaque,
            cas: header.cas,
            framing: Vec::new(),
            extras,
            key,
            value: body,
        })
    }
}

/// A decoded server response.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// Command opcode echoed by the server.
    pub opcode: Opcode,
    /// Datatype bit-set of the value.
    pub datatype: u8,
    /// Response status.
    pub status: Status,
    /// Correlator echoed from the request.
    pub opaque: u32,
    /// CAS of the document after the operation.
    pub cas: u64,
    /// Extras section.
    pub extras: Bytes,
    /// Key section.
    pub key: Bytes,
    /// Value section.
    pub value: Bytes,
}

impl ResponseFrame {
    /// Decodes a response from header plus body bytes.
    pub fn decode(header: &Header, mut body: Bytes) -> Result<Self, Error> {
        if !header.magic.is_response() {
            return Err(Error::DecodingFailure {
                message: "expected a response magic".to_string(),
            });
        }
        if body.len() != header.body_len as usize {
            return Err(Error::DecodingFailure {
                message: format!(
                    "body length mismatch: header says {}, got {}",
                    header.body_len,
                    body.len()
                ),
            });
        }
        body.advance(header.framing_len as usize);
        let extras = body.split_to(header.ext_len as usize);
        let key = body.split_to(header.key_len as usize);
        Ok(Self {
            opcode: Opcode::from_u8(header.opcode)?,
            datatype: header.datatype,
            status: Status::from_u16(header.vbucket_or_status),
            opaque: header.opaque,
            cas: header.cas,
            extras,
            key,
            value: body,
        })
    }

    /// Serializes the response. Used by the mock node in tests; the client
    /// only ever decodes responses.
    pub fn encode(&self) -> Result<Bytes, Error> {
        let body_len = self.extras.len() + self.key.len() + self.value.len();
        let header = Header {
            magic: Magic::Response,
            opcode: self.opcode.to_u8(),
            framing_len: 0,
            key_len: self.key.len() as u16,
            ext_len: self.extras.len() as u8,
            datatype: self.datatype,
            vbucket_or_status: self.status.to_u16(),
            body_len: body_len as u32,
            opaque: self.opaque,
            cas: self.cas,
        };
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        header.encode(&mut buf)?;
        buf.put_slice(&self.extras);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        Ok(buf.freeze())
    }
}

/// Reads one frame (header + body) off an async reader.
///
/// Returns the decoded header and the raw body; the caller picks the request
/// or response decoder based on the magic. A body length above
/// [`MAX_FRAME_SIZE`] poisons the stream and is reported as a decode failure.
pub async fn read_frame<R>(reader: &mut R) -> Result<(Header, Bytes), Error>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_bytes)
        .await
        .map_err(|e| Error::DecodingFailure {
            message: format!("reading frame header: {e}"),
        })?;
    let header = Header::decode(&mut &header_bytes[..])?;
    if header.body_len > MAX_FRAME_SIZE {
        return Err(Error::DecodingFailure {
            message: format!("frame body {} exceeds maximum {MAX_FRAME_SIZE}", header.body_len),
        });
    }
    let mut body = vec![0u8; header.body_len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::DecodingFailure {
            message: format!("reading frame body: {e}"),
        })?;
    Ok((header, Bytes::from(body)))
}

/// Writes pre-encoded frame bytes and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| Error::RequestCanceled {
            reason: format!("write failed: {e}"),
        })?;
    writer.flush().await.map_err(|e| Error::RequestCanceled {
        reason: format!("flush failed: {e}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let mut req = RequestFrame::new(Opcode::Set);
        req.vbucket = 12;
        req.opaque = 99;
        req.cas = 0xfeed;
        req.extras = Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 0]);
        req.key = Bytes::from_static(b"greeting");
        req.value = Bytes::from_static(b"{\"hello\":\"world\"}");
        let wire = req.encode().unwrap();

        let mut cursor = wire.clone();
        let header = Header::decode(&mut cursor).unwrap();
        assert_eq!(header.magic, Magic::Request);
        let decoded = RequestFrame::decode(&header, cursor).unwrap();
        assert_eq!(decoded.opcode, Opcode::Set);
        assert_eq!(decoded.vbucket, 12);
        assert_eq!(decoded.opaque, 99);
        assert_eq!(decoded.cas, 0xfeed);
        assert_eq!(decoded.key, req.key);
        assert_eq!(decoded.value, req.value);
    }

    #[test]
    fn test_framing_extras_force_alt_magic() {
        let mut req = RequestFrame::new(Opcode::Set);
        req.key = Bytes::from_static(b"k");
        req.framing = vec![FrameInfo::Durability {
            level: 1,
            timeout_ms: None,
        }];
        let wire = req.encode().unwrap();
        assert_eq!(wire[0], Magic::AltRequest.to_u8());
        // framing length nibble-encodes id 1, length 1, then the level byte
        assert_eq!(wire[2], 2); // framing extras length
        assert_eq!(wire[HEADER_SIZE], 0x11);
        assert_eq!(wire[HEADER_SIZE + 1], 1);
    }

    #[test]
    fn test_preserve_expiry_is_empty_frame_info() {
        let mut req = RequestFrame::new(Opcode::Set);
        req.key = Bytes::from_static(b"k");
        req.framing = vec![FrameInfo::PreserveExpiry];
        let wire = req.encode().unwrap();
        assert_eq!(wire[2], 1);
        assert_eq!(wire[HEADER_SIZE], 0x50);
    }

    #[test]
    fn test_response_round_trip() {
        let resp = ResponseFrame {
            opcode: Opcode::Get,
            datatype: super::super::datatype::JSON,
            status: Status::Success,
            opaque: 7,
            cas: 1234,
            extras: Bytes::from_static(&[0, 0, 0, 1]),
            key: Bytes::new(),
            value: Bytes::from_static(b"{}"),
        };
        let wire = resp.encode().unwrap();
        let mut cursor = wire.clone();
        let header = Header::decode(&mut cursor).unwrap();
        let decoded = ResponseFrame::decode(&header, cursor).unwrap();
        assert_eq!(decoded.status, Status::Success);
        assert_eq!(decoded.cas, 1234);
        assert_eq!(decoded.extras, resp.extras);
        assert_eq!(decoded.value, resp.value);
    }

    #[tokio::test]
    async fn test_async_frame_io() {
        let mut req = RequestFrame::new(Opcode::Get);
        req.key = Bytes::from_static(b"doc-1");
        req.opaque = 42;
        let wire = req.encode().unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &wire).await.unwrap();

        let mut reader = &buf[..];
        let (header, body) = read_frame(&mut reader).await.unwrap();
        let decoded = RequestFrame::decode(&header, body).unwrap();
        assert_eq!(decoded.opaque, 42);
        assert_eq!(decoded.key, Bytes::from_static(b"doc-1"));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversize() {
        let header = Header {
            magic: Magic::Response,
            opcode: 0,
            framing_len: 0,
            key_len: 0,
            ext_len: 0,
            datatype: 0,
            vbucket_or_status: 0,
            body_len: MAX_FRAME_SIZE + 1,
            opaque: 0,
            cas: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        let bytes = buf.freeze().to_vec();
        let mut reader = &bytes[..];
        assert!(read_frame(&mut reader).await.is_err());
    }
}
