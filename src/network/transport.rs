//! Transport abstraction
//!
//! The client core never touches sockets directly. A `Connector` opens a
//! `Transport` for a server address; the transport performs one vectored
//! send per request and exact-length receives for the reply. Timeouts are
//! the transport's business and surface as I/O errors.

use std::io;

use bytes::Bytes;

use crate::config::ServerAddr;

/// One established connection to a cache node
pub trait Transport: Send {
    /// Send the segments back to back as a single request
    fn send(&mut self, segments: &[Bytes]) -> io::Result<()>;

    /// Fill `buf` completely, blocking until the bytes arrive
    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Opens connections to cache nodes
pub trait Connector: Send + Sync {
    fn connect(&self, server: &ServerAddr) -> io::Result<Box<dyn Transport>>;
}
