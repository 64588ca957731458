//! Codec Tests
//!
//! Tests for binary request and response encoding/decoding.

use bytes::Bytes;
use mcroute::network::LoopbackNode;
use mcroute::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_response,
    write_frame, ArithmeticOp, Command, Header, Opcode, Request, Response, Status, StoreMode,
    HEADER_SIZE, NO_AUTO_CREATE, REQUEST_MAGIC,
};
use mcroute::McrouteError;

fn touch_request() -> Request {
    Request::new(
        Command::Touch { expiration: 60 },
        Bytes::from_static(b"ns:"),
        Bytes::from_static(b"foo"),
    )
    .with_opaque(7)
}

// =============================================================================
// Request Encoding Tests
// =============================================================================

#[test]
fn test_touch_frame_bytes() {
    let frame = encode_request(&touch_request());

    let expected: Vec<u8> = vec![
        0x80, 0x1c, 0x00, 0x06, // magic, opcode, key length
        0x04, 0x00, 0x00, 0x00, // extras length, data type, vbucket
        0x00, 0x00, 0x00, 0x0a, // body length
        0x00, 0x00, 0x00, 0x07, // opaque
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cas
        0x00, 0x00, 0x00, 0x3c, // expiration
        b'n', b's', b':', b'f', b'o', b'o',
    ];
    assert_eq!(frame.to_bytes().as_ref(), expected.as_slice());
}

#[test]
fn test_touch_frame_segments() {
    let frame = encode_request(&touch_request());
    let segments = frame.segments();

    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].len(), HEADER_SIZE + 4);
    assert_eq!(segments[1].as_ref(), b"ns:");
    assert_eq!(segments[2].as_ref(), b"foo");
    assert_eq!(frame.len(), HEADER_SIZE + 10);
}

#[test]
fn test_empty_prefix_is_not_a_segment() {
    let request = Request::new(Command::Get, Bytes::new(), Bytes::from_static(b"key"));
    let frame = encode_request(&request);

    assert_eq!(frame.segments().len(), 2);
    let header = Header::parse(&frame.to_bytes()).unwrap();
    assert_eq!(header.key_len, 3);
    assert_eq!(header.extras_len, 0);
    assert_eq!(header.body_len, 3);
}

#[test]
fn test_body_length_covers_extras_key_value() {
    let request = Request::new(
        Command::Store {
            mode: StoreMode::Set,
            value: Bytes::from_static(b"hello world"),
            flags: 3,
            expiration: 100,
            cas: 42,
        },
        Bytes::from_static(b"app:"),
        Bytes::from_static(b"greeting"),
    );
    let bytes = encode_request(&request).to_bytes();
    let header = Header::parse(&bytes).unwrap();

    assert_eq!(header.magic, REQUEST_MAGIC);
    assert_eq!(header.opcode, Opcode::Set as u8);
    assert_eq!(header.extras_len, 8);
    assert_eq!(header.key_len, 12);
    assert_eq!(header.body_len, 8 + 12 + 11);
    assert_eq!(header.cas, 42);
    assert_eq!(bytes.len(), HEADER_SIZE + header.body_len as usize);
}

#[test]
fn test_append_carries_no_extras() {
    let request = Request::new(
        Command::Store {
            mode: StoreMode::Append,
            value: Bytes::from_static(b"tail"),
            flags: 9,
            expiration: 9,
            cas: 0,
        },
        Bytes::new(),
        Bytes::from_static(b"k"),
    );
    let header = Header::parse(&encode_request(&request).to_bytes()).unwrap();

    assert_eq!(header.extras_len, 0);
    assert_eq!(header.body_len, 1 + 4);
}

#[test]
fn test_decode_request_joins_prefix_and_key() {
    let decoded = decode_request(&encode_request(&touch_request()).to_bytes()).unwrap();

    assert_eq!(decoded.command, Command::Touch { expiration: 60 });
    assert_eq!(decoded.key.as_ref(), b"ns:foo");
    assert!(decoded.prefix.is_empty());
    assert_eq!(decoded.opaque, 7);
}

#[test]
fn test_decode_arithmetic_extras() {
    let request = Request::new(
        Command::Arithmetic {
            op: ArithmeticOp::Decrement,
            delta: 5,
            initial: 10,
            expiration: NO_AUTO_CREATE,
        },
        Bytes::new(),
        Bytes::from_static(b"counter"),
    );
    let bytes = encode_request(&request).to_bytes();
    let header = Header::parse(&bytes).unwrap();
    assert_eq!(header.extras_len, 20);

    let decoded = decode_request(&bytes).unwrap();
    assert_eq!(decoded.command, request.command);
}

#[test]
fn test_decode_request_rejects_truncated_body() {
    let bytes = encode_request(&touch_request()).to_bytes();
    let result = decode_request(&bytes[..bytes.len() - 2]);
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}

#[test]
fn test_decode_request_rejects_bad_extras() {
    let mut bytes = encode_request(&touch_request()).to_bytes().to_vec();
    // Claim 3 bytes of extras instead of 4
    bytes[4] = 3;
    let result = decode_request(&bytes);
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_response_correlates_with_request() {
    let request = touch_request();
    let response = Response::new(Opcode::Touch, Status::NoError, 7).with_cas(11);
    let decoded = decode_response(&encode_response(&response), &request).unwrap();

    assert_eq!(decoded, response);
}

#[test]
fn test_response_opaque_mismatch() {
    let request = touch_request();
    let response = Response::new(Opcode::Touch, Status::NoError, 8);
    let result = decode_response(&encode_response(&response), &request);

    match result {
        Err(McrouteError::ProtocolError(msg)) => assert!(msg.contains("Opaque")),
        other => panic!("Expected opaque mismatch, got {:?}", other),
    }
}

#[test]
fn test_response_opcode_mismatch() {
    let request = touch_request();
    let response = Response::new(Opcode::Get, Status::NoError, 7);
    let result = decode_response(&encode_response(&response), &request);
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}

#[test]
fn test_response_bad_magic() {
    let request = touch_request();
    let mut bytes = encode_response(&Response::new(Opcode::Touch, Status::NoError, 7)).to_vec();
    bytes[0] = REQUEST_MAGIC;
    let result = decode_response(&bytes, &request);
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}

#[test]
fn test_status_into_result() {
    let miss = Response::new(Opcode::Touch, Status::KeyNotFound, 1);
    assert!(matches!(miss.into_result(), Err(McrouteError::NotFound)));

    let exists = Response::new(Opcode::Set, Status::KeyExists, 1);
    assert!(matches!(
        exists.into_result(),
        Err(McrouteError::Server(Status::KeyExists))
    ));

    let ok = Response::new(Opcode::Set, Status::NoError, 1);
    assert!(ok.into_result().is_ok());
}

#[test]
fn test_counter_value() {
    let response = Response::new(Opcode::Increment, Status::NoError, 1)
        .with_value(42u64.to_be_bytes().to_vec());
    assert_eq!(response.counter().unwrap(), 42);

    let short = Response::new(Opcode::Increment, Status::NoError, 1).with_value(vec![1, 2]);
    assert!(short.counter().is_err());
}

// =============================================================================
// Transport Tests
// =============================================================================

#[test]
fn test_write_frame_and_read_response() {
    let node = LoopbackNode::new();
    node.insert(b"ns:foo", b"bar");
    let mut conn = node.connect().unwrap();

    let request = touch_request();
    write_frame(&mut conn, &encode_request(&request)).unwrap();
    let response = read_response(&mut conn, &request).unwrap();

    assert_eq!(response.status, Status::NoError);
    assert_eq!(response.opaque, 7);
    assert_eq!(conn.pending(), 0);
    assert_eq!(node.item(b"ns:foo").unwrap().expiration, 60);
}

#[test]
fn test_read_response_without_reply() {
    let node = LoopbackNode::new();
    let mut conn = node.connect().unwrap();

    let result = read_response(&mut conn, &touch_request());
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
}
