//! Command definitions
//!
//! Logical commands and the requests that carry them to a node.

use bytes::Bytes;

/// Binary protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Flush = 0x08,
    Noop = 0x0a,
    Version = 0x0b,
    Append = 0x0e,
    Prepend = 0x0f,
    Touch = 0x1c,
}

impl Opcode {
    /// Map a wire byte back to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x05 => Opcode::Increment,
            0x06 => Opcode::Decrement,
            0x08 => Opcode::Flush,
            0x0a => Opcode::Noop,
            0x0b => Opcode::Version,
            0x0e => Opcode::Append,
            0x0f => Opcode::Prepend,
            0x1c => Opcode::Touch,
            _ => return None,
        };
        Some(opcode)
    }
}

/// Which storage command a `Store` performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

/// Counter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Increment,
    Decrement,
}

/// Expiration that makes increment/decrement fail on a missing key
/// instead of seeding it with the initial value
pub const NO_AUTO_CREATE: u32 = 0xffff_ffff;

/// A logical command, independent of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a value
    Get,

    /// Store a value; `cas` of 0 means unconditional
    Store {
        mode: StoreMode,
        value: Bytes,
        flags: u32,
        expiration: u32,
        cas: u64,
    },

    /// Remove a key
    Delete,

    /// Reset a key's expiration
    Touch { expiration: u32 },

    /// Adjust a 64-bit counter
    Arithmetic {
        op: ArithmeticOp,
        delta: u64,
        initial: u64,
        expiration: u32,
    },

    /// Invalidate every item on the node
    Flush { expiration: u32 },

    /// Ask for the node's version string
    Version,

    /// No operation
    Noop,
}

impl Command {
    /// Get the binary opcode
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Get => Opcode::Get,
            Command::Store { mode, .. } => match mode {
                StoreMode::Set => Opcode::Set,
                StoreMode::Add => Opcode::Add,
                StoreMode::Replace => Opcode::Replace,
                StoreMode::Append => Opcode::Append,
                StoreMode::Prepend => Opcode::Prepend,
            },
            Command::Delete => Opcode::Delete,
            Command::Touch { .. } => Opcode::Touch,
            Command::Arithmetic { op, .. } => match op {
                ArithmeticOp::Increment => Opcode::Increment,
                ArithmeticOp::Decrement => Opcode::Decrement,
            },
            Command::Flush { .. } => Opcode::Flush,
            Command::Version => Opcode::Version,
            Command::Noop => Opcode::Noop,
        }
    }

    /// Whether the command addresses a key
    pub fn has_key(&self) -> bool {
        !matches!(
            self,
            Command::Flush { .. } | Command::Version | Command::Noop
        )
    }

    /// Whether the command exists only in the binary protocol
    pub fn binary_only(&self) -> bool {
        matches!(self, Command::Touch { .. } | Command::Noop)
    }
}

/// A command bound to a key and a correlation token
///
/// The key travels as two segments, namespace prefix then caller key, so
/// neither is copied into a joined buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub prefix: Bytes,
    pub key: Bytes,
    pub opaque: u32,
}

impl Request {
    /// Request for a keyed command
    pub fn new(command: Command, prefix: Bytes, key: Bytes) -> Self {
        Self {
            command,
            prefix,
            key,
            opaque: 0,
        }
    }

    /// Request for a command without a key
    pub fn keyless(command: Command) -> Self {
        Self::new(command, Bytes::new(), Bytes::new())
    }

    /// Set the correlation token
    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    /// Key length on the wire, prefix included
    pub fn key_len(&self) -> usize {
        self.prefix.len() + self.key.len()
    }

    /// Namespaced key as one buffer
    pub fn full_key(&self) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.key_len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(&self.key);
        full
    }
}
