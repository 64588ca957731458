//! Response definitions
//!
//! Replies from a node, correlated to exactly one request.

use bytes::Bytes;

use crate::error::{McrouteError, Result};

use super::Opcode;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    NonNumeric = 0x0006,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
}

impl Status {
    /// Map a wire status back to a known code
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            0x0000 => Status::NoError,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::NonNumeric,
            0x0081 => Status::UnknownCommand,
            0x0082 => Status::OutOfMemory,
            _ => return None,
        };
        Some(status)
    }
}

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub status: Status,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Response {
    /// Create an empty reply with the given status
    pub fn new(opcode: Opcode, status: Status, opaque: u32) -> Self {
        Self {
            opcode,
            status,
            opaque,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Attach extras
    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }

    /// Attach a value
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Attach a CAS token
    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::NoError
    }

    /// Turn a negative reply into its error
    ///
    /// `KeyNotFound` becomes `NotFound`; callers translate that into a
    /// negative success.
    pub fn into_result(self) -> Result<Response> {
        match self.status {
            Status::NoError => Ok(self),
            Status::KeyNotFound => Err(McrouteError::NotFound),
            other => Err(McrouteError::Server(other)),
        }
    }

    /// Item flags carried in the extras of a get reply
    pub fn flags(&self) -> u32 {
        match self.extras.get(..4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    /// Counter value of an increment/decrement reply
    pub fn counter(&self) -> Result<u64> {
        let bytes: [u8; 8] = self.value.as_ref().try_into().map_err(|_| {
            McrouteError::ProtocolError(format!(
                "counter reply carries {} bytes (expected 8)",
                self.value.len()
            ))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }
}

/// A cached value as returned to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Caller key, without the namespace prefix
    pub key: Bytes,
    pub value: Bytes,
    pub flags: u32,
    pub cas: u64,
}

impl Item {
    /// Build an item from a successful get reply
    pub fn from_response(key: Bytes, response: &Response) -> Self {
        Self {
            key,
            value: response.value.clone(),
            flags: response.flags(),
            cas: response.cas,
        }
    }

    /// Keep at most the first `len` bytes of the value
    pub fn truncate(&mut self, len: usize) {
        self.value.truncate(len);
    }
}
