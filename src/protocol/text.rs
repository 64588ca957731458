//! Legacy text protocol
//!
//! Line-oriented framing for contexts with the binary flag off. Replies are
//! mapped onto the same `Response`/`Status` shape the binary codec produces,
//! so the executor and the replication layer never see the difference.
//!
//! ## Request Lines
//! ```text
//! get <key>\r\n
//! <set|add|replace|append|prepend> <key> <flags> <exp> <bytes>\r\n<data>\r\n
//! cas <key> <flags> <exp> <bytes> <cas>\r\n<data>\r\n
//! delete <key>\r\n
//! <incr|decr> <key> <delta>\r\n
//! flush_all [<exp>]\r\n
//! version\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{McrouteError, Result};
use crate::network::Transport;

use super::codec::Frame;
use super::{ArithmeticOp, Command, Request, Response, Status, StoreMode};

/// Longest reply line accepted before the line is treated as garbage
pub const MAX_LINE_LEN: usize = 2048;

const CRLF: &[u8] = b"\r\n";

// =============================================================================
// Request Encoding
// =============================================================================

/// Encode a request as text protocol segments
pub fn encode_text_request(request: &Request) -> Result<Frame> {
    let mut segments: Vec<Bytes> = Vec::with_capacity(6);
    let push_key = |segments: &mut Vec<Bytes>| {
        if !request.prefix.is_empty() {
            segments.push(request.prefix.clone());
        }
        segments.push(request.key.clone());
    };

    match &request.command {
        Command::Get => {
            segments.push(Bytes::from_static(b"get "));
            push_key(&mut segments);
            segments.push(Bytes::from_static(CRLF));
        }
        Command::Store {
            mode,
            value,
            flags,
            expiration,
            cas,
        } => {
            let verb: &'static [u8] = match mode {
                StoreMode::Set if *cas != 0 => b"cas ",
                StoreMode::Set => b"set ",
                StoreMode::Add => b"add ",
                StoreMode::Replace => b"replace ",
                StoreMode::Append => b"append ",
                StoreMode::Prepend => b"prepend ",
            };
            segments.push(Bytes::from_static(verb));
            push_key(&mut segments);

            let tail = if *mode == StoreMode::Set && *cas != 0 {
                format!(" {} {} {} {}\r\n", flags, expiration, value.len(), cas)
            } else {
                format!(" {} {} {}\r\n", flags, expiration, value.len())
            };
            segments.push(Bytes::from(tail));
            if !value.is_empty() {
                segments.push(value.clone());
            }
            segments.push(Bytes::from_static(CRLF));
        }
        Command::Delete => {
            segments.push(Bytes::from_static(b"delete "));
            push_key(&mut segments);
            segments.push(Bytes::from_static(CRLF));
        }
        Command::Arithmetic { op, delta, .. } => {
            segments.push(Bytes::from_static(match op {
                ArithmeticOp::Increment => b"incr ",
                ArithmeticOp::Decrement => b"decr ",
            }));
            push_key(&mut segments);
            segments.push(Bytes::from(format!(" {}\r\n", delta)));
        }
        Command::Flush { expiration } => {
            let line = if *expiration == 0 {
                "flush_all\r\n".to_string()
            } else {
                format!("flush_all {}\r\n", expiration)
            };
            segments.push(Bytes::from(line));
        }
        Command::Version => segments.push(Bytes::from_static(b"version\r\n")),
        Command::Touch { .. } | Command::Noop => {
            return Err(McrouteError::UnsupportedOperation(format!(
                "{:?} requires the binary protocol",
                request.command.opcode()
            )));
        }
    }

    Ok(Frame::from_segments(segments))
}

// =============================================================================
// Response Reading
// =============================================================================

/// Read exactly one reply to `request`
pub fn read_text_response<T: Transport + ?Sized>(
    transport: &mut T,
    request: &Request,
) -> Result<Response> {
    let opcode = request.command.opcode();
    let line = read_line(transport)?;
    let reply = |status| Response::new(opcode, status, request.opaque);

    if let Some(status) = error_status(&line)? {
        return Ok(reply(status));
    }

    match &request.command {
        Command::Get => {
            if line == b"END" {
                return Ok(reply(Status::KeyNotFound));
            }
            let (key, flags, len, cas) = parse_value_line(&line)?;
            if key != request.full_key().as_slice() {
                return Err(McrouteError::ProtocolError(format!(
                    "reply for key '{}' does not match request key '{}'",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(&request.full_key())
                )));
            }

            let mut data = vec![0u8; len + CRLF.len()];
            transport.recv_exact(&mut data).map_err(|e| {
                McrouteError::ProtocolError(format!("Failed to read value block: {}", e))
            })?;
            if !data.ends_with(CRLF) {
                return Err(McrouteError::ProtocolError(
                    "value block not terminated by CRLF".to_string(),
                ));
            }
            data.truncate(len);

            let end = read_line(transport)?;
            if end != b"END" {
                return Err(McrouteError::ProtocolError(format!(
                    "expected END after value, got '{}'",
                    String::from_utf8_lossy(&end)
                )));
            }

            Ok(reply(Status::NoError)
                .with_extras(flags.to_be_bytes().to_vec())
                .with_value(data)
                .with_cas(cas))
        }
        Command::Store { .. } => match line.as_slice() {
            b"STORED" => Ok(reply(Status::NoError)),
            b"NOT_STORED" => Ok(reply(Status::ItemNotStored)),
            b"EXISTS" => Ok(reply(Status::KeyExists)),
            b"NOT_FOUND" => Ok(reply(Status::KeyNotFound)),
            _ => Err(unexpected(&line)),
        },
        Command::Delete => match line.as_slice() {
            b"DELETED" => Ok(reply(Status::NoError)),
            b"NOT_FOUND" => Ok(reply(Status::KeyNotFound)),
            _ => Err(unexpected(&line)),
        },
        Command::Arithmetic { .. } => {
            if line == b"NOT_FOUND" {
                return Ok(reply(Status::KeyNotFound));
            }
            let value = parse_number::<u64>(&line)?;
            Ok(reply(Status::NoError).with_value(value.to_be_bytes().to_vec()))
        }
        Command::Flush { .. } => match line.as_slice() {
            b"OK" => Ok(reply(Status::NoError)),
            _ => Err(unexpected(&line)),
        },
        Command::Version => match line.strip_prefix(b"VERSION ") {
            Some(version) => Ok(reply(Status::NoError).with_value(version.to_vec())),
            None => Err(unexpected(&line)),
        },
        Command::Touch { .. } | Command::Noop => Err(McrouteError::UnsupportedOperation(
            format!("{:?} requires the binary protocol", opcode),
        )),
    }
}

/// Read one CRLF-terminated line, without the terminator
fn read_line<T: Transport + ?Sized>(transport: &mut T) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        transport
            .recv_exact(&mut byte)
            .map_err(|e| McrouteError::ProtocolError(format!("Failed to read reply line: {}", e)))?;
        line.push(byte[0]);

        if line.ends_with(CRLF) {
            line.truncate(line.len() - CRLF.len());
            return Ok(line);
        }
        if line.len() > MAX_LINE_LEN {
            return Err(McrouteError::ProtocolError(format!(
                "reply line longer than {} bytes",
                MAX_LINE_LEN
            )));
        }
    }
}

/// Map the generic error replies onto statuses
fn error_status(line: &[u8]) -> Result<Option<Status>> {
    if line == b"ERROR" {
        return Ok(Some(Status::UnknownCommand));
    }
    if let Some(message) = line.strip_prefix(b"CLIENT_ERROR") {
        let message = String::from_utf8_lossy(message);
        if message.contains("non-numeric") {
            return Ok(Some(Status::NonNumeric));
        }
        return Ok(Some(Status::InvalidArguments));
    }
    if let Some(message) = line.strip_prefix(b"SERVER_ERROR") {
        let message = String::from_utf8_lossy(message);
        if message.contains("out of memory") {
            return Ok(Some(Status::OutOfMemory));
        }
        if message.contains("too large") {
            return Ok(Some(Status::ValueTooLarge));
        }
        return Err(McrouteError::ProtocolError(format!(
            "server error:{}",
            message
        )));
    }
    Ok(None)
}

/// Parse `VALUE <key> <flags> <bytes> [<cas>]`
fn parse_value_line(line: &[u8]) -> Result<(&[u8], u32, usize, u64)> {
    let text = std::str::from_utf8(line).map_err(|_| unexpected(line))?;
    let mut parts = text.split(' ');
    if parts.next() != Some("VALUE") {
        return Err(unexpected(line));
    }
    let key = parts.next().ok_or_else(|| unexpected(line))?;
    let flags = parse_number::<u32>(parts.next().ok_or_else(|| unexpected(line))?.as_bytes())?;
    let len = parse_number::<usize>(parts.next().ok_or_else(|| unexpected(line))?.as_bytes())?;
    let cas = match parts.next() {
        Some(cas) => parse_number::<u64>(cas.as_bytes())?,
        None => 0,
    };
    Ok((key.as_bytes(), flags, len, cas))
}

fn parse_number<N: std::str::FromStr>(bytes: &[u8]) -> Result<N> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<N>().ok())
        .ok_or_else(|| unexpected(bytes))
}

fn unexpected(line: &[u8]) -> McrouteError {
    McrouteError::ProtocolError(format!(
        "unexpected reply '{}'",
        String::from_utf8_lossy(line)
    ))
}

// =============================================================================
// Node Side
// =============================================================================

/// Parse one complete text command (line plus data block, if any)
pub fn decode_text_request(bytes: &[u8]) -> Result<Request> {
    let line_end = bytes
        .windows(2)
        .position(|w| w == CRLF)
        .ok_or_else(|| McrouteError::ProtocolError("command line not terminated".to_string()))?;
    let line = std::str::from_utf8(&bytes[..line_end]).map_err(|_| unexpected(&bytes[..line_end]))?;
    let data = &bytes[line_end + CRLF.len()..];

    let parts: Vec<&str> = line.split(' ').filter(|p| !p.is_empty()).collect();
    let verb = parts.first().copied().unwrap_or_default();
    let arg = |i: usize| -> Result<&str> {
        parts
            .get(i)
            .copied()
            .ok_or_else(|| McrouteError::ProtocolError(format!("'{}' is missing arguments", verb)))
    };

    let keyed = |command: Command, key: &str| {
        Request::new(command, Bytes::new(), Bytes::copy_from_slice(key.as_bytes()))
    };

    let request = match verb {
        "get" => keyed(Command::Get, arg(1)?),
        "delete" => keyed(Command::Delete, arg(1)?),
        "incr" | "decr" => keyed(
            Command::Arithmetic {
                op: if verb == "incr" {
                    ArithmeticOp::Increment
                } else {
                    ArithmeticOp::Decrement
                },
                delta: parse_number(arg(2)?.as_bytes())?,
                initial: 0,
                expiration: super::NO_AUTO_CREATE,
            },
            arg(1)?,
        ),
        "set" | "add" | "replace" | "append" | "prepend" | "cas" => {
            let len: usize = parse_number(arg(4)?.as_bytes())?;
            if data.len() < len + CRLF.len() || &data[len..len + CRLF.len()] != CRLF {
                return Err(McrouteError::ProtocolError("bad data chunk".to_string()));
            }
            let mode = match verb {
                "add" => StoreMode::Add,
                "replace" => StoreMode::Replace,
                "append" => StoreMode::Append,
                "prepend" => StoreMode::Prepend,
                _ => StoreMode::Set,
            };
            let cas = if verb == "cas" {
                parse_number(arg(5)?.as_bytes())?
            } else {
                0
            };
            keyed(
                Command::Store {
                    mode,
                    value: Bytes::copy_from_slice(&data[..len]),
                    flags: parse_number(arg(2)?.as_bytes())?,
                    expiration: parse_number(arg(3)?.as_bytes())?,
                    cas,
                },
                arg(1)?,
            )
        }
        "flush_all" => Request::keyless(Command::Flush {
            expiration: match parts.get(1) {
                Some(exp) => parse_number(exp.as_bytes())?,
                None => 0,
            },
        }),
        "version" => Request::keyless(Command::Version),
        _ => {
            return Err(McrouteError::ProtocolError(format!(
                "unknown command '{}'",
                verb
            )))
        }
    };

    Ok(request)
}

/// Encode the text reply a node sends for `response`
pub fn encode_text_response(request: &Request, response: &Response) -> Bytes {
    let mut buf = BytesMut::new();
    let mut line = |text: &[u8]| {
        buf.put_slice(text);
        buf.put_slice(CRLF);
    };

    match (response.status, &request.command) {
        (Status::NoError, Command::Get) => {
            let head = format!(
                "VALUE {} {} {} {}",
                String::from_utf8_lossy(&request.key),
                response.flags(),
                response.value.len(),
                response.cas
            );
            line(head.as_bytes());
            line(&response.value);
            line(b"END");
        }
        (Status::KeyNotFound, Command::Get) => line(b"END"),
        (Status::NoError, Command::Store { .. }) => line(b"STORED"),
        (Status::NoError, Command::Delete) => line(b"DELETED"),
        (Status::NoError, Command::Arithmetic { .. }) => {
            let value = response.counter().unwrap_or_default();
            line(value.to_string().as_bytes());
        }
        (Status::NoError, Command::Flush { .. }) => line(b"OK"),
        (Status::NoError, Command::Version) => {
            let mut version = b"VERSION ".to_vec();
            version.extend_from_slice(&response.value);
            line(&version);
        }
        (Status::KeyNotFound, _) => line(b"NOT_FOUND"),
        (Status::KeyExists, _) => line(b"EXISTS"),
        (Status::ItemNotStored, _) => line(b"NOT_STORED"),
        (Status::NonNumeric, _) => {
            line(b"CLIENT_ERROR cannot increment or decrement non-numeric value")
        }
        (Status::ValueTooLarge, _) => line(b"SERVER_ERROR object too large for cache"),
        (Status::OutOfMemory, _) => line(b"SERVER_ERROR out of memory storing object"),
        (Status::InvalidArguments, _) => line(b"CLIENT_ERROR bad command line format"),
        _ => line(b"ERROR"),
    }

    buf.freeze()
}
