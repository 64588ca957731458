//! Server instances
//!
//! One addressable node: its place in the server list, its liveness, and
//! its connection state.

use std::io;
use std::time::{Duration, Instant};

use crate::config::{Config, ServerAddr};

use super::{Connector, Transport};

/// A cache node as seen by one client context
pub struct ServerInstance {
    /// Position in the configured server list
    index: usize,

    addr: ServerAddr,

    /// Open connection, if any; dropped on every failure
    conn: Option<Box<dyn Transport>>,

    /// Consecutive failed exchanges
    failures: u32,

    /// Set while the server is marked down
    down_until: Option<Instant>,

    /// Number of times the connection was discarded after a failure
    resets: u64,
}

impl ServerInstance {
    pub fn new(index: usize, addr: ServerAddr) -> Self {
        Self {
            index,
            addr,
            conn: None,
            failures: 0,
            down_until: None,
            resets: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Whether the server may be selected at `now`
    pub fn is_available(&self, now: Instant) -> bool {
        match self.down_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Mark down until `until`
    pub fn mark_down(&mut self, until: Instant) {
        self.down_until = Some(until);
    }

    /// Clear the down mark and the failure count
    pub fn mark_up(&mut self) {
        self.down_until = None;
        self.failures = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Count a failed exchange; returns true if this marked the server down
    pub fn record_failure(&mut self, config: &Config) -> bool {
        self.failures = self.failures.saturating_add(1);
        if config.auto_eject_hosts && self.failures >= config.server_failure_limit {
            let retry = Duration::from_millis(config.retry_timeout_ms);
            self.mark_down(Instant::now() + retry);
            return true;
        }
        false
    }

    /// Count a successful exchange
    ///
    /// A down mark stays until it expires or `mark_up` clears it.
    pub fn record_success(&mut self) {
        self.failures = 0;
        if self.down_until.is_some_and(|until| Instant::now() >= until) {
            self.down_until = None;
        }
    }

    // =========================================================================
    // Connection State
    // =========================================================================

    /// The open connection, connecting first if there is none
    pub fn connection(&mut self, connector: &dyn Connector) -> io::Result<&mut Box<dyn Transport>> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => connector.connect(&self.addr)?,
        };
        Ok(self.conn.insert(conn))
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Discard the connection and any protocol state buffered on it
    pub fn reset(&mut self) {
        if self.conn.take().is_some() {
            tracing::warn!("Reset connection to {}", self.addr);
        }
        self.resets += 1;
    }

    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}
