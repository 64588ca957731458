//! Text Protocol Tests
//!
//! Tests for the legacy line-oriented framing.

use bytes::Bytes;
use mcroute::network::{LoopbackNode, Transport};
use mcroute::protocol::text::{
    decode_text_request, encode_text_request, encode_text_response, read_text_response,
};
use mcroute::protocol::{
    write_frame, ArithmeticOp, Command, Opcode, Request, Response, Status, StoreMode,
    NO_AUTO_CREATE,
};
use mcroute::McrouteError;

fn keyed(command: Command, key: &'static [u8]) -> Request {
    Request::new(command, Bytes::from_static(b"ns:"), Bytes::from_static(key))
}

/// Replays fixed reply bytes and swallows requests
struct Canned {
    reply: Vec<u8>,
    pos: usize,
}

impl Transport for Canned {
    fn send(&mut self, _segments: &[Bytes]) -> std::io::Result<()> {
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.reply.len() {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.copy_from_slice(&self.reply[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

fn set(value: &'static [u8], cas: u64) -> Command {
    Command::Store {
        mode: StoreMode::Set,
        value: Bytes::from_static(value),
        flags: 5,
        expiration: 30,
        cas,
    }
}

// =============================================================================
// Request Encoding Tests
// =============================================================================

#[test]
fn test_get_line() {
    let frame = encode_text_request(&keyed(Command::Get, b"foo")).unwrap();
    assert_eq!(frame.to_bytes().as_ref(), b"get ns:foo\r\n");
}

#[test]
fn test_set_line_and_data() {
    let frame = encode_text_request(&keyed(set(b"bar", 0), b"foo")).unwrap();
    assert_eq!(frame.to_bytes().as_ref(), b"set ns:foo 5 30 3\r\nbar\r\n");
}

#[test]
fn test_set_with_cas_uses_cas_verb() {
    let frame = encode_text_request(&keyed(set(b"bar", 99), b"foo")).unwrap();
    assert_eq!(frame.to_bytes().as_ref(), b"cas ns:foo 5 30 3 99\r\nbar\r\n");
}

#[test]
fn test_incr_and_flush_lines() {
    let incr = keyed(
        Command::Arithmetic {
            op: ArithmeticOp::Increment,
            delta: 3,
            initial: 0,
            expiration: NO_AUTO_CREATE,
        },
        b"hits",
    );
    assert_eq!(
        encode_text_request(&incr).unwrap().to_bytes().as_ref(),
        b"incr ns:hits 3\r\n"
    );

    let flush = Request::keyless(Command::Flush { expiration: 0 });
    assert_eq!(
        encode_text_request(&flush).unwrap().to_bytes().as_ref(),
        b"flush_all\r\n"
    );
}

#[test]
fn test_touch_has_no_text_form() {
    let result = encode_text_request(&keyed(Command::Touch { expiration: 60 }, b"foo"));
    assert!(matches!(result, Err(McrouteError::UnsupportedOperation(_))));
}

#[test]
fn test_decode_text_store() {
    let request = decode_text_request(b"append ns:foo 0 0 4\r\ntail\r\n").unwrap();
    assert_eq!(request.key.as_ref(), b"ns:foo");
    match request.command {
        Command::Store { mode, value, .. } => {
            assert_eq!(mode, StoreMode::Append);
            assert_eq!(value.as_ref(), b"tail");
        }
        other => panic!("Expected store command, got {:?}", other),
    }
}

#[test]
fn test_decode_text_rejects_short_data() {
    let result = decode_text_request(b"set foo 0 0 10\r\nabc\r\n");
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}

// =============================================================================
// Reply Tests
// =============================================================================

#[test]
fn test_encode_get_reply() {
    let request = Request::new(Command::Get, Bytes::new(), Bytes::from_static(b"foo"));
    let response = Response::new(Opcode::Get, Status::NoError, 0)
        .with_extras(7u32.to_be_bytes().to_vec())
        .with_value(Bytes::from_static(b"bar"))
        .with_cas(12);

    let reply = encode_text_response(&request, &response);
    assert_eq!(reply.as_ref(), b"VALUE foo 7 3 12\r\nbar\r\nEND\r\n");
}

#[test]
fn test_encode_miss_replies() {
    let get = Request::new(Command::Get, Bytes::new(), Bytes::from_static(b"foo"));
    let delete = Request::new(Command::Delete, Bytes::new(), Bytes::from_static(b"foo"));

    let miss = |opcode| Response::new(opcode, Status::KeyNotFound, 0);
    assert_eq!(encode_text_response(&get, &miss(Opcode::Get)).as_ref(), b"END\r\n");
    assert_eq!(
        encode_text_response(&delete, &miss(Opcode::Delete)).as_ref(),
        b"NOT_FOUND\r\n"
    );
}

#[test]
fn test_read_text_round_trip_through_node() {
    let node = LoopbackNode::new();
    let mut conn = node.connect().unwrap();

    let store = keyed(set(b"bar", 0), b"foo").with_opaque(3);
    write_frame(&mut conn, &encode_text_request(&store).unwrap()).unwrap();
    let stored = read_text_response(&mut conn, &store).unwrap();
    assert_eq!(stored.status, Status::NoError);
    assert_eq!(stored.opaque, 3);

    let get = keyed(Command::Get, b"foo").with_opaque(4);
    write_frame(&mut conn, &encode_text_request(&get).unwrap()).unwrap();
    let fetched = read_text_response(&mut conn, &get).unwrap();
    assert_eq!(fetched.status, Status::NoError);
    assert_eq!(fetched.value.as_ref(), b"bar");
    assert_eq!(fetched.flags(), 5);
    assert_eq!(conn.pending(), 0);
}

#[test]
fn test_read_text_not_stored() {
    let node = LoopbackNode::new();
    let mut conn = node.connect().unwrap();

    let replace = keyed(
        Command::Store {
            mode: StoreMode::Replace,
            value: Bytes::from_static(b"x"),
            flags: 0,
            expiration: 0,
            cas: 0,
        },
        b"absent",
    );
    write_frame(&mut conn, &encode_text_request(&replace).unwrap()).unwrap();
    let reply = read_text_response(&mut conn, &replace).unwrap();
    assert_eq!(reply.status, Status::ItemNotStored);
}

#[test]
fn test_read_text_non_numeric() {
    let node = LoopbackNode::new();
    node.insert(b"ns:word", b"abc");
    let mut conn = node.connect().unwrap();

    let incr = keyed(
        Command::Arithmetic {
            op: ArithmeticOp::Increment,
            delta: 1,
            initial: 0,
            expiration: NO_AUTO_CREATE,
        },
        b"word",
    );
    write_frame(&mut conn, &encode_text_request(&incr).unwrap()).unwrap();
    let reply = read_text_response(&mut conn, &incr).unwrap();
    assert_eq!(reply.status, Status::NonNumeric);
}

#[test]
fn test_read_text_value_for_other_key_is_rejected() {
    let get = keyed(Command::Get, b"foo");

    let mut matching = Canned {
        reply: b"VALUE ns:foo 0 3\r\nbar\r\nEND\r\n".to_vec(),
        pos: 0,
    };
    let reply = read_text_response(&mut matching, &get).unwrap();
    assert_eq!(reply.value.as_ref(), b"bar");

    let mut other = Canned {
        reply: b"VALUE ns:bar 0 3\r\nxyz\r\nEND\r\n".to_vec(),
        pos: 0,
    };
    let result = read_text_response(&mut other, &get);
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}
