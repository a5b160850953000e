// Copyright 2026 the fastcgi-runtime contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The FastCGI 1.0 wire format: header encode/decode, name-value pair
//! length encoding, and the record types and status codes defined by the
//! protocol.
//!
//! Content length and padding length are independently bounded; a
//! well-formed record is always a multiple of 8 bytes on the wire
//! (`HEADER_LEN + content_length + padding_length`).

use std::mem::size_of;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// FastCGI protocol version 1, the only version this crate speaks.
pub const VERSION_1: u8 = 1;

/// Maximum content length representable in one record.
pub const MAX_CONTENT_LEN: usize = 0xffff;

/// Content size used when emitting outbound stream records (STDOUT/STDERR),
/// chosen so header + content stays comfortably inside `MAX_CONTENT_LEN`
/// while keeping padding arithmetic simple (`65535` rounded down to a
/// multiple of 8).
pub const OUTBOUND_CHUNK_LEN: usize = 65_528;

/// Size in bytes of the fixed FastCGI record header.
pub const HEADER_LEN: usize = size_of::<RawHeader>();

/// Request id reserved for management records (`GET_VALUES`, etc).
pub const MANAGEMENT_REQUEST_ID: u16 = 0;

#[repr(C)]
struct RawHeader {
    version: u8,
    r#type: u8,
    request_id: u16,
    content_length: u16,
    padding_length: u8,
    reserved: u8,
}

/// FastCGI record types, as defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    /// Converts a raw type byte, if it maps to a known record type.
    pub fn from_u8(u: u8) -> Option<Self> {
        Some(match u {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            _ => return None,
        })
    }
}

/// FastCGI application roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl Role {
    pub fn from_u16(u: u16) -> Option<Self> {
        Some(match u {
            1 => Role::Responder,
            2 => Role::Authorizer,
            3 => Role::Filter,
            _ => return None,
        })
    }
}

/// FastCGI protocol status codes, carried in `END_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    pub fn from_u8(u: u8) -> Self {
        match u {
            0 => ProtocolStatus::RequestComplete,
            1 => ProtocolStatus::CantMpxConn,
            2 => ProtocolStatus::Overloaded,
            _ => ProtocolStatus::UnknownRole,
        }
    }
}

/// Bit 0 of the `BEGIN_REQUEST` flags byte.
pub const FLAG_KEEP_CONN: u8 = 1;

/// A decoded record header, with its content still unread (the caller reads
/// `content_length` bytes from the stream, then the codec skips padding).
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub r#type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

/// Error raised while decoding the wire format. Any of these close the
/// connection (§4.4/§7): malformed records are not recoverable mid-stream.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("FastCGI protocol version mismatch: expected 1, got {0}")]
    UnsupportedVersion(u8),

    #[error("unrecognized FastCGI record type byte {0}")]
    UnknownType(u8),

    #[error("record type {0:?} is not allowed for request id {1}")]
    DisallowedForRequestId(Option<RecordType>, u16),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn padding_for(content_length: usize) -> u8 {
    ((8 - (content_length % 8)) % 8) as u8
}

impl Header {
    /// Reads one header off the wire. Returns `Ok(None)` on a clean EOF
    /// before any byte of a new header was read (the peer closed between
    /// records); any other short read is a transport error.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Header>, CodecError> {
        let mut buf = [0u8; HEADER_LEN];
        let mut read = 0;
        while read < HEADER_LEN {
            let n = reader.read(&mut buf[read..]).await?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(CodecError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-header",
                )));
            }
            read += n;
        }

        let version = buf[0];
        if version != VERSION_1 {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let r#type =
            RecordType::from_u8(buf[1]).ok_or(CodecError::UnknownType(buf[1]))?;
        let request_id = u16::from_be_bytes([buf[2], buf[3]]);
        let content_length = u16::from_be_bytes([buf[4], buf[5]]);
        let padding_length = buf[6];

        Ok(Some(Header {
            version,
            r#type,
            request_id,
            content_length,
            padding_length,
        }))
    }

    /// Like [`Header::read`], but surfaces an unknown type byte instead of
    /// erroring, so callers that must reply `UNKNOWN_TYPE` can do so.
    pub async fn read_permissive<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<Option<RawRecordHead>, CodecError> {
        let mut buf = [0u8; HEADER_LEN];
        let mut read = 0;
        while read < HEADER_LEN {
            let n = reader.read(&mut buf[read..]).await?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(CodecError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-header",
                )));
            }
            read += n;
        }
        let version = buf[0];
        if version != VERSION_1 {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let request_id = u16::from_be_bytes([buf[2], buf[3]]);
        let content_length = u16::from_be_bytes([buf[4], buf[5]]);
        let padding_length = buf[6];
        Ok(Some(RawRecordHead {
            type_byte: buf[1],
            request_id,
            content_length,
            padding_length,
        }))
    }

    /// Reads this header's content (strictly: short reads are an error) and
    /// discards its padding. The decoder never holds more than one content
    /// buffer at a time.
    pub async fn read_content<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Vec<u8>, CodecError> {
        let mut content = vec![0u8; self.content_length as usize];
        reader.read_exact(&mut content).await?;
        if self.padding_length > 0 {
            let mut padding = [0u8; 255];
            reader
                .read_exact(&mut padding[..self.padding_length as usize])
                .await?;
        }
        Ok(content)
    }

    /// Writes a single record (header + content + padding) to the stream.
    /// `content` must be `<= MAX_CONTENT_LEN` bytes; callers chunk larger
    /// payloads themselves (see [`write_stream_chunk`]).
    pub async fn write<W: AsyncWrite + Unpin>(
        writer: &mut W,
        r#type: RecordType,
        request_id: u16,
        content: &[u8],
    ) -> io::Result<()> {
        debug_assert!(content.len() <= MAX_CONTENT_LEN);
        let content_length = content.len() as u16;
        let padding_length = padding_for(content.len());

        let mut buf = [0u8; HEADER_LEN];
        buf[0] = VERSION_1;
        buf[1] = r#type as u8;
        buf[2..4].copy_from_slice(&request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&content_length.to_be_bytes());
        buf[6] = padding_length;
        buf[7] = 0;

        writer.write_all(&buf).await?;
        writer.write_all(content).await?;
        if padding_length > 0 {
            writer.write_all(&[0u8; 8][..padding_length as usize]).await?;
        }
        Ok(())
    }
}

/// A header read without rejecting an unrecognized type byte, used by the
/// reader loop so it can answer management `UNKNOWN_TYPE` without treating
/// the record as a protocol error.
#[derive(Debug, Clone)]
pub struct RawRecordHead {
    pub type_byte: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RawRecordHead {
    pub fn known_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.type_byte)
    }

    pub async fn read_content<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Vec<u8>, CodecError> {
        let mut content = vec![0u8; self.content_length as usize];
        reader.read_exact(&mut content).await?;
        if self.padding_length > 0 {
            let mut padding = [0u8; 255];
            reader
                .read_exact(&mut padding[..self.padding_length as usize])
                .await?;
        }
        Ok(content)
    }
}

/// Writes a byte stream (STDOUT, STDERR, STDIN, DATA, PARAMS) as a sequence
/// of records of at most [`OUTBOUND_CHUNK_LEN`] content bytes each, WITHOUT
/// the empty terminator record -- callers emit that separately so they
/// control exactly when the stream closes.
pub async fn write_stream_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    r#type: RecordType,
    request_id: u16,
    content: &[u8],
) -> io::Result<()> {
    for chunk in content.chunks(OUTBOUND_CHUNK_LEN) {
        Header::write(writer, r#type, request_id, chunk).await?;
    }
    Ok(())
}

/// Emits the empty record that terminates a stream record type. Per §4.1,
/// zero-length content records are reserved for this purpose and must
/// never be sent spontaneously otherwise.
pub async fn write_stream_end<W: AsyncWrite + Unpin>(
    writer: &mut W,
    r#type: RecordType,
    request_id: u16,
) -> io::Result<()> {
    Header::write(writer, r#type, request_id, &[]).await
}

/// `BEGIN_REQUEST` record body.
#[derive(Debug, Clone, Copy)]
pub struct BeginRequestBody {
    pub role: Role,
    pub keep_conn: bool,
}

impl BeginRequestBody {
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < 8 {
            return None;
        }
        let role_num = u16::from_be_bytes([content[0], content[1]]);
        let role = Role::from_u16(role_num)?;
        let flags = content[2];
        Some(BeginRequestBody {
            role,
            keep_conn: flags & FLAG_KEEP_CONN != 0,
        })
    }

    /// Raw role value, kept even when it doesn't map to a known [`Role`],
    /// so the engine can still reply `UNKNOWN_ROLE` (vs. a protocol error).
    pub fn raw_role(content: &[u8]) -> Option<u16> {
        if content.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([content[0], content[1]]))
    }

    pub fn keep_conn_flag(content: &[u8]) -> bool {
        content.get(2).is_some_and(|f| f & FLAG_KEEP_CONN != 0)
    }
}

/// Writes an `END_REQUEST` record.
pub async fn write_end_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request_id: u16,
    app_status: u32,
    protocol_status: ProtocolStatus,
) -> io::Result<()> {
    let mut content = [0u8; 8];
    content[0..4].copy_from_slice(&app_status.to_be_bytes());
    content[4] = protocol_status as u8;
    Header::write(writer, RecordType::EndRequest, request_id, &content).await
}

/// Writes an `UNKNOWN_TYPE` management reply.
pub async fn write_unknown_type<W: AsyncWrite + Unpin>(
    writer: &mut W,
    unknown_type: u8,
) -> io::Result<()> {
    let mut content = [0u8; 8];
    content[0] = unknown_type;
    Header::write(
        writer,
        RecordType::UnknownType,
        MANAGEMENT_REQUEST_ID,
        &content,
    )
    .await
}

/// Name-value pair length encoding used by `PARAMS`, `GET_VALUES` and
/// `GET_VALUES_RESULT`: one byte if `length <= 127`, otherwise four bytes
/// big-endian with the top bit of the first byte set.
pub fn encode_nv_length(len: usize, out: &mut Vec<u8>) {
    if len <= 0x7f {
        out.push(len as u8);
    } else {
        let marked = (len as u32) | 0x8000_0000;
        out.extend_from_slice(&marked.to_be_bytes());
    }
}

/// Encodes one name-value pair (as used by `PARAMS`) into `out`.
pub fn encode_nv_pair(name: &[u8], value: &[u8], out: &mut Vec<u8>) {
    encode_nv_length(name.len(), out);
    encode_nv_length(value.len(), out);
    out.extend_from_slice(name);
    out.extend_from_slice(value);
}

/// Decodes the length prefix at `buf[pos..]`, returning `(length, bytes_consumed)`.
fn decode_nv_length(buf: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *buf.get(pos)?;
    if first & 0x80 == 0 {
        Some((first as usize, 1))
    } else {
        let b = buf.get(pos..pos + 4)?;
        let raw = u32::from_be_bytes([b[0] & 0x7f, b[1], b[2], b[3]]);
        Some((raw as usize, 4))
    }
}

/// Decodes a buffer of concatenated name-value pairs (a terminated `PARAMS`
/// stream, or a `GET_VALUES`/`GET_VALUES_RESULT` body) into `(name, value)`
/// byte-slice pairs, in wire order.
pub fn decode_nv_pairs(buf: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let Some((name_len, name_hdr)) = decode_nv_length(buf, pos) else {
            break;
        };
        pos += name_hdr;
        let Some((value_len, value_hdr)) = decode_nv_length(buf, pos) else {
            break;
        };
        pos += value_hdr;
        if pos + name_len + value_len > buf.len() {
            break;
        }
        let name = buf[pos..pos + name_len].to_vec();
        pos += name_len;
        let value = buf[pos..pos + value_len].to_vec();
        pos += value_len;
        pairs.push((name, value));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv_length_threshold() {
        let mut out = Vec::new();
        encode_nv_length(0, &mut out);
        assert_eq!(out, vec![0]);

        let mut out = Vec::new();
        encode_nv_length(127, &mut out);
        assert_eq!(out, vec![127]);

        let mut out = Vec::new();
        encode_nv_length(128, &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0] & 0x80, 0x80);

        let mut out = Vec::new();
        encode_nv_length(70_000, &mut out);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn nv_pair_round_trip() {
        let mut buf = Vec::new();
        encode_nv_pair(b"REQUEST_METHOD", b"GET", &mut buf);
        encode_nv_pair(b"SCRIPT_NAME", &vec![b'x'; 200], &mut buf);

        let pairs = decode_nv_pairs(&buf);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, b"REQUEST_METHOD");
        assert_eq!(pairs[0].1, b"GET");
        assert_eq!(pairs[1].0, b"SCRIPT_NAME");
        assert_eq!(pairs[1].1, vec![b'x'; 200]);
    }

    #[tokio::test]
    async fn header_round_trip() {
        let mut buf = Vec::new();
        Header::write(&mut buf, RecordType::Stdout, 7, b"hello").await.unwrap();
        assert_eq!(buf.len() % 8, 0);

        let mut cursor = &buf[..];
        let header = Header::read(&mut cursor).await.unwrap().unwrap();
        assert_eq!(header.request_id, 7);
        assert!(matches!(header.r#type, RecordType::Stdout));
        let content = header.read_content(&mut cursor).await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn empty_record_is_terminator() {
        let mut buf = Vec::new();
        write_stream_end(&mut buf, RecordType::Stdout, 1).await.unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        let mut cursor = &buf[..];
        let header = Header::read(&mut cursor).await.unwrap().unwrap();
        assert_eq!(header.content_length, 0);
    }

    #[tokio::test]
    async fn rejects_bad_version() {
        let mut buf = vec![2u8, 6, 0, 1, 0, 0, 0, 0];
        let mut cursor = &buf[..];
        let err = Header::read(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(2)));
        buf.clear();
    }
}
