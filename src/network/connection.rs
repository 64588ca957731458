//! TCP Transport
//!
//! Blocking TCP connection to a single cache node.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::config::{Config, ServerAddr};

use super::{Connector, Transport};

/// A connection to one node over TCP
pub struct TcpTransport {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered so segments leave as one write)
    writer: BufWriter<TcpStream>,

    /// Peer address for logging
    peer_addr: String,
}

impl TcpTransport {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            peer_addr,
        })
    }

    /// Configure connection timeouts
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> io::Result<()> {
        let read_stream = self.reader.get_ref();
        let write_stream = self.writer.get_ref();

        if read_ms > 0 {
            read_stream.set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            write_stream.set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }

        Ok(())
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, segments: &[Bytes]) -> io::Result<()> {
        for segment in segments {
            self.writer.write_all(segment)?;
        }
        self.writer.flush()?;
        tracing::trace!(
            "Sent {} bytes in {} segments to {}",
            segments.iter().map(Bytes::len).sum::<usize>(),
            segments.len(),
            self.peer_addr
        );
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }
}

/// Opens `TcpTransport`s with the configured timeouts
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout_ms: u64,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

impl TcpConnector {
    pub fn new(connect_timeout_ms: u64, read_timeout_ms: u64, write_timeout_ms: u64) -> Self {
        Self {
            connect_timeout_ms,
            read_timeout_ms,
            write_timeout_ms,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.connect_timeout_ms,
            config.read_timeout_ms,
            config.write_timeout_ms,
        )
    }
}

impl Connector for TcpConnector {
    fn connect(&self, server: &ServerAddr) -> io::Result<Box<dyn Transport>> {
        let mut last_error = None;

        for addr in (server.host.as_str(), server.port).to_socket_addrs()? {
            let attempt = if self.connect_timeout_ms > 0 {
                TcpStream::connect_timeout(&addr, Duration::from_millis(self.connect_timeout_ms))
            } else {
                TcpStream::connect(addr)
            };

            match attempt {
                Ok(stream) => {
                    let mut transport = TcpTransport::new(stream)?;
                    transport.set_timeouts(self.read_timeout_ms, self.write_timeout_ms)?;
                    tracing::debug!("Connected to {} ({})", server, transport.peer_addr());
                    return Ok(Box::new(transport));
                }
                Err(e) => {
                    tracing::debug!("Connect to {} via {} failed: {}", server, addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", server),
            )
        }))
    }
}
