//! Binary protocol codec
//!
//! Encoding and decoding functions for the binary wire protocol.
//!
//! ## Header Format (24 bytes, network byte order)
//! ```text
//! ┌───────────┬────────────┬────────────────┬───────────────┐
//! │ Magic (1) │ Opcode (1) │ Key Length (2)                 │
//! ├───────────┼────────────┼────────────────┴───────────────┤
//! │ Extras(1) │ DataType(1)│ VBucket / Status (2)           │
//! ├───────────┴────────────┴────────────────────────────────┤
//! │ Total Body Length (4)                                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Opaque (4)                                              │
//! ├─────────────────────────────────────────────────────────┤
//! │ CAS (8)                                                 │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! followed by `extras | key | value`, whose combined length is the total
//! body length.
//!
//! ### Extras by Command
//! - SET/ADD/REPLACE: flags (4) + expiration (4)
//! - INCR/DECR:       delta (8) + initial (8) + expiration (4)
//! - TOUCH/FLUSH:     expiration (4)
//! - others:          none

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{McrouteError, Result};
use crate::network::Transport;

use super::{ArithmeticOp, Command, Opcode, Request, Response, Status, StoreMode};

/// Fixed header size
pub const HEADER_SIZE: usize = 24;

/// Magic byte of a request
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte of a response
pub const RESPONSE_MAGIC: u8 = 0x81;

/// The only data type defined by the protocol
pub const RAW_BYTES: u8 = 0x00;

/// Maximum body size accepted from a node (16 MB)
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Header
// =============================================================================

/// The fixed 24-byte header shared by requests and responses
///
/// `vbucket` holds the reserved/vbucket field in requests and the status
/// in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// Parse a header from the first `HEADER_SIZE` bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(McrouteError::ProtocolError(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let b = bytes;
        Ok(Self {
            magic: b[0],
            opcode: b[1],
            key_len: u16::from_be_bytes([b[2], b[3]]),
            extras_len: b[4],
            data_type: b[5],
            vbucket: u16::from_be_bytes([b[6], b[7]]),
            body_len: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            opaque: u32::from_be_bytes([b[12], b[13], b[14], b[15]]),
            cas: u64::from_be_bytes([
                b[16], b[17], b[18], b[19], b[20], b[21], b[22], b[23],
            ]),
        })
    }

    /// Append the header in wire order
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key_len);
        buf.put_u8(self.extras_len);
        buf.put_u8(self.data_type);
        buf.put_u16(self.vbucket);
        buf.put_u32(self.body_len);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
    }

    /// Check the declared lengths against each other and the size limit
    fn check_body(&self) -> Result<()> {
        if self.body_len > MAX_BODY_SIZE {
            return Err(McrouteError::ProtocolError(format!(
                "Body too large: {} bytes (max {})",
                self.body_len, MAX_BODY_SIZE
            )));
        }
        if (self.extras_len as u32) + (self.key_len as u32) > self.body_len {
            return Err(McrouteError::ProtocolError(format!(
                "Body length {} shorter than extras {} + key {}",
                self.body_len, self.extras_len, self.key_len
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Frame
// =============================================================================

/// An encoded request as ordered byte segments
///
/// The first segment is the header (with extras); the namespace prefix,
/// key and value follow as their own segments when non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    segments: Vec<Bytes>,
}

impl Frame {
    pub(crate) fn from_segments(segments: Vec<Bytes>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Total bytes across all segments
    pub fn len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the segments into one buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        for segment in &self.segments {
            buf.extend_from_slice(segment);
        }
        buf.freeze()
    }
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request into header, prefix, key and value segments
///
/// The body length is computed from the segments. The key length must fit
/// the 16-bit field; the key validator guarantees this for every public
/// operation.
pub fn encode_request(request: &Request) -> Frame {
    let (extras, value, cas) = command_body(&request.command);

    let key_len = request.key_len();
    assert!(
        key_len <= u16::MAX as usize,
        "key length {} exceeds the 16-bit header field",
        key_len
    );

    let body_len = extras.len() + key_len + value.len();
    let header = Header {
        magic: REQUEST_MAGIC,
        opcode: request.command.opcode() as u8,
        key_len: key_len as u16,
        extras_len: extras.len() as u8,
        data_type: RAW_BYTES,
        vbucket: 0,
        body_len: body_len as u32,
        opaque: request.opaque,
        cas,
    };

    let mut head = BytesMut::with_capacity(HEADER_SIZE + extras.len());
    header.put(&mut head);
    head.extend_from_slice(&extras);

    let mut segments = Vec::with_capacity(4);
    segments.push(head.freeze());
    for segment in [&request.prefix, &request.key, &value] {
        if !segment.is_empty() {
            segments.push(segment.clone());
        }
    }

    let frame = Frame::from_segments(segments);
    debug_assert_eq!(frame.len(), HEADER_SIZE + body_len);
    frame
}

/// Extras, value and CAS for a command
fn command_body(command: &Command) -> (BytesMut, Bytes, u64) {
    let mut extras = BytesMut::new();
    match command {
        Command::Store {
            mode,
            value,
            flags,
            expiration,
            cas,
        } => {
            if matches!(mode, StoreMode::Set | StoreMode::Add | StoreMode::Replace) {
                extras.put_u32(*flags);
                extras.put_u32(*expiration);
            }
            return (extras, value.clone(), *cas);
        }
        Command::Arithmetic {
            delta,
            initial,
            expiration,
            ..
        } => {
            extras.put_u64(*delta);
            extras.put_u64(*initial);
            extras.put_u32(*expiration);
        }
        Command::Touch { expiration } | Command::Flush { expiration } => {
            extras.put_u32(*expiration);
        }
        Command::Get | Command::Delete | Command::Version | Command::Noop => {}
    }
    (extras, Bytes::new(), 0)
}

/// Decode a complete request frame
///
/// The key is returned whole in `Request::key`; a node cannot tell the
/// namespace apart from the caller key.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let header = Header::parse(bytes)?;
    if header.magic != REQUEST_MAGIC {
        return Err(McrouteError::ProtocolError(format!(
            "Bad request magic: 0x{:02x}",
            header.magic
        )));
    }
    header.check_body()?;

    let body = body_slice(bytes, &header)?;
    let (extras, key, value) = split_body(body, &header);

    let opcode = Opcode::from_u8(header.opcode).ok_or_else(|| {
        McrouteError::ProtocolError(format!("Unknown opcode: 0x{:02x}", header.opcode))
    })?;

    let command = match opcode {
        Opcode::Get => Command::Get,
        Opcode::Delete => Command::Delete,
        Opcode::Version => Command::Version,
        Opcode::Noop => Command::Noop,
        Opcode::Set | Opcode::Add | Opcode::Replace => {
            let extras = fixed_extras::<8>(extras, opcode)?;
            Command::Store {
                mode: match opcode {
                    Opcode::Set => StoreMode::Set,
                    Opcode::Add => StoreMode::Add,
                    _ => StoreMode::Replace,
                },
                value: Bytes::copy_from_slice(value),
                flags: be_u32(&extras[0..4]),
                expiration: be_u32(&extras[4..8]),
                cas: header.cas,
            }
        }
        Opcode::Append | Opcode::Prepend => Command::Store {
            mode: if opcode == Opcode::Append {
                StoreMode::Append
            } else {
                StoreMode::Prepend
            },
            value: Bytes::copy_from_slice(value),
            flags: 0,
            expiration: 0,
            cas: header.cas,
        },
        Opcode::Increment | Opcode::Decrement => {
            let extras = fixed_extras::<20>(extras, opcode)?;
            Command::Arithmetic {
                op: if opcode == Opcode::Increment {
                    ArithmeticOp::Increment
                } else {
                    ArithmeticOp::Decrement
                },
                delta: be_u64(&extras[0..8]),
                initial: be_u64(&extras[8..16]),
                expiration: be_u32(&extras[16..20]),
            }
        }
        Opcode::Touch => {
            let extras = fixed_extras::<4>(extras, opcode)?;
            Command::Touch {
                expiration: be_u32(&extras),
            }
        }
        Opcode::Flush => Command::Flush {
            expiration: if extras.len() >= 4 {
                be_u32(&extras[0..4])
            } else {
                0
            },
        },
    };

    Ok(Request {
        command,
        prefix: Bytes::new(),
        key: Bytes::copy_from_slice(key),
        opaque: header.opaque,
    })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Bytes {
    let body_len = response.extras.len() + response.key.len() + response.value.len();
    let header = Header {
        magic: RESPONSE_MAGIC,
        opcode: response.opcode as u8,
        key_len: response.key.len() as u16,
        extras_len: response.extras.len() as u8,
        data_type: RAW_BYTES,
        vbucket: response.status as u16,
        body_len: body_len as u32,
        opaque: response.opaque,
        cas: response.cas,
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
    header.put(&mut buf);
    buf.extend_from_slice(&response.extras);
    buf.extend_from_slice(&response.key);
    buf.extend_from_slice(&response.value);
    buf.freeze()
}

/// Decode a response and check it answers `request`
///
/// A wrong magic, opcode or opaque token is a protocol error.
pub fn decode_response(bytes: &[u8], request: &Request) -> Result<Response> {
    let header = Header::parse(bytes)?;
    check_response_header(&header, request)?;

    let body = body_slice(bytes, &header)?;
    response_from_parts(&header, body)
}

fn check_response_header(header: &Header, request: &Request) -> Result<()> {
    if header.magic != RESPONSE_MAGIC {
        return Err(McrouteError::ProtocolError(format!(
            "Bad response magic: 0x{:02x}",
            header.magic
        )));
    }
    if header.opaque != request.opaque {
        return Err(McrouteError::ProtocolError(format!(
            "Opaque mismatch: expected {}, got {}",
            request.opaque, header.opaque
        )));
    }
    let expected = request.command.opcode() as u8;
    if header.opcode != expected {
        return Err(McrouteError::ProtocolError(format!(
            "Opcode mismatch: expected 0x{:02x}, got 0x{:02x}",
            expected, header.opcode
        )));
    }
    header.check_body()
}

fn response_from_parts(header: &Header, body: &[u8]) -> Result<Response> {
    let opcode = Opcode::from_u8(header.opcode).ok_or_else(|| {
        McrouteError::ProtocolError(format!("Unknown opcode: 0x{:02x}", header.opcode))
    })?;
    let status = Status::from_u16(header.vbucket).ok_or_else(|| {
        McrouteError::ProtocolError(format!("Unknown response status: 0x{:04x}", header.vbucket))
    })?;

    let (extras, key, value) = split_body(body, header);
    Ok(Response {
        opcode,
        status,
        opaque: header.opaque,
        cas: header.cas,
        extras: Bytes::copy_from_slice(extras),
        key: Bytes::copy_from_slice(key),
        value: Bytes::copy_from_slice(value),
    })
}

// =============================================================================
// Transport helpers
// =============================================================================

/// Send an encoded frame as one vectored write
pub fn write_frame<T: Transport + ?Sized>(transport: &mut T, frame: &Frame) -> std::io::Result<()> {
    transport.send(frame.segments())
}

/// Read exactly one response and check it answers `request`
///
/// Blocks until the header and the declared body have arrived.
pub fn read_response<T: Transport + ?Sized>(transport: &mut T, request: &Request) -> Result<Response> {
    let mut head = [0u8; HEADER_SIZE];
    transport
        .recv_exact(&mut head)
        .map_err(|e| McrouteError::ProtocolError(format!("Failed to read response header: {}", e)))?;

    let header = Header::parse(&head)?;
    check_response_header(&header, request)?;

    let mut body = vec![0u8; header.body_len as usize];
    if !body.is_empty() {
        transport
            .recv_exact(&mut body)
            .map_err(|e| McrouteError::ProtocolError(format!("Failed to read response body: {}", e)))?;
    }

    response_from_parts(&header, &body)
}

// =============================================================================
// Helpers
// =============================================================================

fn body_slice<'a>(bytes: &'a [u8], header: &Header) -> Result<&'a [u8]> {
    let total_len = HEADER_SIZE + header.body_len as usize;
    if bytes.len() < total_len {
        return Err(McrouteError::ProtocolError(format!(
            "Incomplete body: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }
    Ok(&bytes[HEADER_SIZE..total_len])
}

/// Split a body into extras, key and value (lengths already checked)
fn split_body<'a>(body: &'a [u8], header: &Header) -> (&'a [u8], &'a [u8], &'a [u8]) {
    let extras_end = header.extras_len as usize;
    let key_end = extras_end + header.key_len as usize;
    (&body[..extras_end], &body[extras_end..key_end], &body[key_end..])
}

fn fixed_extras<const N: usize>(extras: &[u8], opcode: Opcode) -> Result<[u8; N]> {
    extras.try_into().map_err(|_| {
        McrouteError::ProtocolError(format!(
            "{:?} carries {} bytes of extras (expected {})",
            opcode,
            extras.len(),
            N
        ))
    })
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
