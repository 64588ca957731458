//! Loopback cache node
//!
//! An in-process node that speaks both protocols, for tests, benchmarks and
//! dry runs without a live pool. Each node keeps its items behind a shared
//! lock; every connection opened to it has its own reply buffer, so a
//! connection that is dropped takes its unread replies with it.
//!
//! ## Fault Injection
//! - `fail_connect`: refuse new connections
//! - `fail_sends`: every send errors
//! - `stale_reply_on_failure`: a failing send still queues the reply, the
//!   way a half-written exchange leaves bytes on a real socket
//! - `fail_recvs`: every receive times out
//! - `corrupt_opaque`: replies echo the wrong correlation token

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::config::ServerAddr;
use crate::error::Result;
use crate::protocol::{
    decode_request, encode_response, text, ArithmeticOp, Command, Request, Response, Status,
    StoreMode, NO_AUTO_CREATE, REQUEST_MAGIC,
};

use super::{Connector, Transport};

/// Version string reported by loopback nodes
pub const LOOPBACK_VERSION: &str = "1.6.0-loopback";

/// An item held by a loopback node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub value: Bytes,
    pub flags: u32,
    pub expiration: u32,
    pub cas: u64,
}

/// Counters kept by a loopback node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Connections opened
    pub connections: u64,
    /// Send calls, failed or not
    pub sends: u64,
    /// Requests executed against the store
    pub requests: u64,
    /// Receive calls
    pub recvs: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_connect: bool,
    fail_sends: bool,
    stale_reply_on_failure: bool,
    fail_recvs: bool,
    corrupt_opaque: bool,
}

#[derive(Debug, Default)]
struct NodeState {
    items: HashMap<Vec<u8>, StoredItem>,
    next_cas: u64,
    faults: Faults,
    stats: NodeStats,
}

/// Handle to one loopback node; clones share the node
#[derive(Debug, Clone, Default)]
pub struct LoopbackNode {
    state: Arc<Mutex<NodeState>>,
}

impl LoopbackNode {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Fault Knobs
    // =========================================================================

    pub fn set_fail_connect(&self, enabled: bool) {
        self.state.lock().faults.fail_connect = enabled;
    }

    pub fn set_fail_sends(&self, enabled: bool) {
        self.state.lock().faults.fail_sends = enabled;
    }

    pub fn set_stale_reply_on_failure(&self, enabled: bool) {
        self.state.lock().faults.stale_reply_on_failure = enabled;
    }

    pub fn set_fail_recvs(&self, enabled: bool) {
        self.state.lock().faults.fail_recvs = enabled;
    }

    pub fn set_corrupt_opaque(&self, enabled: bool) {
        self.state.lock().faults.corrupt_opaque = enabled;
    }

    /// Fail every connect, send and receive
    pub fn set_unreachable(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.faults.fail_connect = enabled;
        state.faults.fail_sends = enabled;
        state.faults.fail_recvs = enabled;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn stats(&self) -> NodeStats {
        self.state.lock().stats
    }

    /// Item stored under the full (namespaced) key
    pub fn item(&self, key: &[u8]) -> Option<StoredItem> {
        self.state.lock().items.get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.lock().items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an item directly, bypassing the protocol
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        let mut state = self.state.lock();
        state.next_cas += 1;
        let cas = state.next_cas;
        state.items.insert(
            key.to_vec(),
            StoredItem {
                value: Bytes::copy_from_slice(value),
                flags: 0,
                expiration: 0,
                cas,
            },
        );
    }

    // =========================================================================
    // Connections and Requests
    // =========================================================================

    /// Open a connection to this node
    pub fn connect(&self) -> io::Result<LoopbackTransport> {
        let mut state = self.state.lock();
        if state.faults.fail_connect {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "loopback node refuses connections",
            ));
        }
        state.stats.connections += 1;
        Ok(LoopbackTransport {
            node: self.clone(),
            inbox: VecDeque::new(),
        })
    }

    /// Execute one complete request frame and return the reply bytes
    ///
    /// Frames starting with the binary request magic are binary; anything
    /// else is parsed as a text command.
    pub fn handle(&self, frame: &[u8]) -> Result<Bytes> {
        let mut state = self.state.lock();
        Self::handle_locked(&mut state, frame)
    }

    fn handle_locked(state: &mut NodeState, frame: &[u8]) -> Result<Bytes> {
        let binary = frame.first() == Some(&REQUEST_MAGIC);
        let request = if binary {
            decode_request(frame)?
        } else {
            text::decode_text_request(frame)?
        };

        state.stats.requests += 1;
        let mut response = Self::apply(state, &request);
        if state.faults.corrupt_opaque {
            response.opaque = response.opaque.wrapping_add(1);
        }

        if binary {
            Ok(encode_response(&response))
        } else {
            Ok(text::encode_text_response(&request, &response))
        }
    }

    /// Run a request against the item map
    fn apply(state: &mut NodeState, request: &Request) -> Response {
        let key = request.full_key();
        let reply = |status| Response::new(request.command.opcode(), status, request.opaque);

        match &request.command {
            Command::Get => match state.items.get(&key) {
                Some(item) => reply(Status::NoError)
                    .with_extras(item.flags.to_be_bytes().to_vec())
                    .with_value(item.value.clone())
                    .with_cas(item.cas),
                None => reply(Status::KeyNotFound),
            },
            Command::Store {
                mode,
                value,
                flags,
                expiration,
                cas,
            } => {
                let existing = state.items.get(&key);
                if *cas != 0 {
                    match existing {
                        None => return reply(Status::KeyNotFound),
                        Some(item) if item.cas != *cas => return reply(Status::KeyExists),
                        Some(_) => {}
                    }
                }

                let (value, flags, expiration) = match (mode, existing) {
                    (StoreMode::Add, Some(_)) => return reply(Status::ItemNotStored),
                    (StoreMode::Replace | StoreMode::Append | StoreMode::Prepend, None) => {
                        return reply(Status::ItemNotStored)
                    }
                    (StoreMode::Append, Some(item)) => {
                        let mut joined = BytesMut::from(&item.value[..]);
                        joined.extend_from_slice(value);
                        (joined.freeze(), item.flags, item.expiration)
                    }
                    (StoreMode::Prepend, Some(item)) => {
                        let mut joined = BytesMut::from(&value[..]);
                        joined.extend_from_slice(&item.value);
                        (joined.freeze(), item.flags, item.expiration)
                    }
                    _ => (value.clone(), *flags, *expiration),
                };

                state.next_cas += 1;
                let cas = state.next_cas;
                state.items.insert(
                    key,
                    StoredItem {
                        value,
                        flags,
                        expiration,
                        cas,
                    },
                );
                reply(Status::NoError).with_cas(cas)
            }
            Command::Delete => match state.items.remove(&key) {
                Some(_) => reply(Status::NoError),
                None => reply(Status::KeyNotFound),
            },
            Command::Touch { expiration } => match state.items.get_mut(&key) {
                Some(item) => {
                    item.expiration = *expiration;
                    reply(Status::NoError).with_cas(item.cas)
                }
                None => reply(Status::KeyNotFound),
            },
            Command::Arithmetic {
                op,
                delta,
                initial,
                expiration,
            } => {
                let current = match state.items.get(&key) {
                    Some(item) => {
                        let parsed = std::str::from_utf8(&item.value)
                            .ok()
                            .and_then(|s| s.trim().parse::<u64>().ok());
                        match parsed {
                            Some(n) => match op {
                                ArithmeticOp::Increment => n.wrapping_add(*delta),
                                ArithmeticOp::Decrement => n.saturating_sub(*delta),
                            },
                            None => return reply(Status::NonNumeric),
                        }
                    }
                    None if *expiration == NO_AUTO_CREATE => return reply(Status::KeyNotFound),
                    None => *initial,
                };

                let (flags, expiration) = match state.items.get(&key) {
                    Some(item) => (item.flags, item.expiration),
                    None => (0, *expiration),
                };
                state.next_cas += 1;
                let cas = state.next_cas;
                state.items.insert(
                    key,
                    StoredItem {
                        value: Bytes::from(current.to_string()),
                        flags,
                        expiration,
                        cas,
                    },
                );
                reply(Status::NoError)
                    .with_value(current.to_be_bytes().to_vec())
                    .with_cas(cas)
            }
            Command::Flush { .. } => {
                state.items.clear();
                reply(Status::NoError)
            }
            Command::Version => reply(Status::NoError).with_value(LOOPBACK_VERSION),
            Command::Noop => reply(Status::NoError),
        }
    }
}

/// A connection to a `LoopbackNode`
pub struct LoopbackTransport {
    node: LoopbackNode,
    /// Reply bytes not yet received
    inbox: VecDeque<u8>,
}

impl LoopbackTransport {
    /// Reply bytes waiting on this connection
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, segments: &[Bytes]) -> io::Result<()> {
        let mut frame = BytesMut::new();
        for segment in segments {
            frame.extend_from_slice(segment);
        }

        let mut state = self.node.state.lock();
        state.stats.sends += 1;

        if state.faults.fail_sends {
            if state.faults.stale_reply_on_failure {
                if let Ok(reply) = LoopbackNode::handle_locked(&mut state, &frame) {
                    self.inbox.extend(reply.iter());
                }
            }
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback node dropped the request",
            ));
        }

        let reply = LoopbackNode::handle_locked(&mut state, &frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.inbox.extend(reply.iter());
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        {
            let mut state = self.node.state.lock();
            state.stats.recvs += 1;
            if state.faults.fail_recvs {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "loopback node did not answer",
                ));
            }
        }

        let wanted = buf.len();
        if self.inbox.len() < wanted {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "wanted {} bytes, {} pending",
                    wanted,
                    self.inbox.len()
                ),
            ));
        }
        for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..wanted)) {
            *slot = byte;
        }
        Ok(())
    }
}

/// A pool of loopback nodes addressed as `loopback-<n>:11211`
#[derive(Debug, Clone)]
pub struct LoopbackPool {
    nodes: Vec<(ServerAddr, LoopbackNode)>,
}

impl LoopbackPool {
    pub fn new(count: usize) -> Self {
        let nodes = (0..count)
            .map(|i| {
                (
                    ServerAddr::new(format!("loopback-{}", i), crate::config::DEFAULT_PORT),
                    LoopbackNode::new(),
                )
            })
            .collect();
        Self { nodes }
    }

    /// Addresses in server-index order
    pub fn servers(&self) -> Vec<ServerAddr> {
        self.nodes.iter().map(|(addr, _)| addr.clone()).collect()
    }

    pub fn node(&self, index: usize) -> &LoopbackNode {
        &self.nodes[index].1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indexes of nodes holding `full_key`
    pub fn holders(&self, full_key: &[u8]) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, (_, node))| node.contains(full_key))
            .map(|(i, _)| i)
            .collect()
    }

    /// Total send calls across all nodes
    pub fn total_sends(&self) -> u64 {
        self.nodes.iter().map(|(_, node)| node.stats().sends).sum()
    }
}

impl Connector for LoopbackPool {
    fn connect(&self, server: &ServerAddr) -> io::Result<Box<dyn Transport>> {
        let node = self
            .nodes
            .iter()
            .find(|(addr, _)| addr == server)
            .map(|(_, node)| node)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no loopback node at {}", server),
                )
            })?;
        Ok(Box::new(node.connect()?))
    }
}
