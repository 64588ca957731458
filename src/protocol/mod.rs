//! Protocol Module
//!
//! Defines the wire framing between the client and cache nodes.
//!
//! ## Binary Protocol
//!
//! ```text
//! ┌────────────────────────┬────────┬─────────────────┬──────────┐
//! │      Header (24)       │ Extras │ Prefix + Key    │  Value   │
//! └────────────────────────┴────────┴─────────────────┴──────────┘
//! ```
//!
//! A request is kept as ordered segments (header with extras, prefix, key,
//! value) so the namespace and caller buffers are sent without being joined.
//!
//! ### Status Codes
//! - 0x0000: NO_ERROR
//! - 0x0001: KEY_NOT_FOUND
//! - 0x0002: KEY_EXISTS
//! - 0x0003: VALUE_TOO_LARGE
//! - 0x0004: INVALID_ARGUMENTS
//! - 0x0005: ITEM_NOT_STORED
//! - 0x0006: NON_NUMERIC
//! - 0x0081: UNKNOWN_COMMAND
//! - 0x0082: OUT_OF_MEMORY
//!
//! ## Text Protocol
//!
//! Line-oriented legacy framing, see [`text`].

mod command;
mod response;
mod codec;
pub mod text;

pub use command::{ArithmeticOp, Command, Opcode, Request, StoreMode, NO_AUTO_CREATE};
pub use response::{Item, Response, Status};
pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_response,
    write_frame, Frame, Header, HEADER_SIZE, MAX_BODY_SIZE, RAW_BYTES, REQUEST_MAGIC,
    RESPONSE_MAGIC,
};
