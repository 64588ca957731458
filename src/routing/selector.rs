//! Server Selector
//!
//! Maps a group key to one server index, probing alternates when the mapped
//! server is marked down.
//!
//! ## Probe State Machine
//! ```text
//!   Strategy(candidate, attempt) ──live──▶ Found(index)
//!        │ down, attempt < max
//!        ├──────────────▶ Strategy(next candidate, attempt + 1)
//!        │ down, attempt == max
//!        ▼
//!   Sweep(start, offset) ──live──▶ Found(index)
//!        │ offset == server count
//!        ▼
//!   Exhausted ─▶ NoServerAvailable
//! ```
//! The strategy phase is bounded by `max_probes`, the sweep by the server
//! count, so an all-down pool fails after at most `max_probes + 1 + n`
//! liveness checks. Every step depends only on the key and the liveness
//! snapshot, so two calls with the same inputs pick the same server.

use std::fmt;
use std::str::FromStr;

use crate::error::{McrouteError, Result};

use super::{Candidate, Ring};

/// Picks the next candidate after a probe landed on a down server
pub trait Redistribution: Send + Sync {
    /// Candidate for probe number `attempt` (1-based) after `previous`
    /// mapped to a down server. Must be deterministic.
    fn next_candidate(&self, ring: &Ring, key: &[u8], previous: Candidate, attempt: usize) -> Candidate;

    /// Strategy name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Re-hash the key salted with the attempt number
#[derive(Debug, Clone, Copy, Default)]
pub struct Rehash;

impl Redistribution for Rehash {
    fn next_candidate(&self, ring: &Ring, key: &[u8], _previous: Candidate, attempt: usize) -> Candidate {
        let mut salted = Vec::with_capacity(key.len() + 8);
        salted.extend_from_slice(key);
        salted.extend_from_slice(format!("-{}", attempt).as_bytes());
        let hash = ring.hash(&salted);
        Candidate {
            hash,
            index: ring.locate(hash),
        }
    }

    fn name(&self) -> &'static str {
        "rehash"
    }
}

/// Walk to the next server along the ring
#[derive(Debug, Clone, Copy, Default)]
pub struct NextServer;

impl Redistribution for NextServer {
    fn next_candidate(&self, ring: &Ring, _key: &[u8], previous: Candidate, _attempt: usize) -> Candidate {
        ring.next_after(previous)
    }

    fn name(&self) -> &'static str {
        "next-server"
    }
}

/// Built-in strategies, selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedistributionKind {
    #[default]
    Rehash,
    NextServer,
}

impl RedistributionKind {
    pub fn strategy(&self) -> Box<dyn Redistribution> {
        match self {
            RedistributionKind::Rehash => Box::new(Rehash),
            RedistributionKind::NextServer => Box::new(NextServer),
        }
    }
}

impl fmt::Display for RedistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy().name())
    }
}

impl FromStr for RedistributionKind {
    type Err = McrouteError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rehash" => Ok(RedistributionKind::Rehash),
            "next-server" | "next" => Ok(RedistributionKind::NextServer),
            other => Err(McrouteError::Config(format!(
                "unknown redistribution strategy '{}'",
                other
            ))),
        }
    }
}

/// One state of a redistribution probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Strategy { candidate: Candidate, attempt: usize },
    Sweep { start: usize, offset: usize },
    Found(usize),
    Exhausted,
}

/// A bounded walk over candidate servers for one key
pub struct Probe<'a> {
    ring: &'a Ring,
    strategy: &'a dyn Redistribution,
    key: &'a [u8],
    max_probes: usize,
    state: ProbeState,
    steps: usize,
}

impl<'a> Probe<'a> {
    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Liveness checks performed so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Advance one state given the liveness snapshot
    pub fn step(&mut self, live: &[bool]) -> ProbeState {
        let n = self.ring.server_count();
        let is_live = |index: usize| live.get(index).copied().unwrap_or(false);

        self.state = match self.state {
            ProbeState::Strategy { candidate, attempt } => {
                self.steps += 1;
                if is_live(candidate.index) {
                    ProbeState::Found(candidate.index)
                } else if attempt < self.max_probes {
                    let next = self
                        .strategy
                        .next_candidate(self.ring, self.key, candidate, attempt + 1);
                    ProbeState::Strategy {
                        candidate: next,
                        attempt: attempt + 1,
                    }
                } else {
                    ProbeState::Sweep {
                        start: (candidate.index + 1) % n,
                        offset: 0,
                    }
                }
            }
            ProbeState::Sweep { start, offset } => {
                if offset >= n {
                    ProbeState::Exhausted
                } else {
                    self.steps += 1;
                    let index = (start + offset) % n;
                    if is_live(index) {
                        ProbeState::Found(index)
                    } else {
                        ProbeState::Sweep {
                            start,
                            offset: offset + 1,
                        }
                    }
                }
            }
            done @ (ProbeState::Found(_) | ProbeState::Exhausted) => done,
        };
        self.state
    }
}

/// Resolves keys to server indexes
pub struct ServerSelector {
    ring: Ring,
    strategy: Box<dyn Redistribution>,
    max_probes: usize,
}

impl ServerSelector {
    pub fn new(ring: Ring, strategy: Box<dyn Redistribution>, max_probes: usize) -> Self {
        Self {
            ring,
            strategy,
            max_probes,
        }
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Replace the redistribution strategy
    pub fn set_strategy(&mut self, strategy: Box<dyn Redistribution>) {
        self.strategy = strategy;
    }

    /// Primary mapping for a key, ignoring liveness
    pub fn select(&self, key: &[u8]) -> Result<usize> {
        match self.ring.server_count() {
            0 => Err(McrouteError::NoServerAvailable),
            1 => Ok(0),
            _ => Ok(self.ring.candidate(key).index),
        }
    }

    /// Start a probe for a key
    ///
    /// On an empty ring the probe starts out exhausted.
    pub fn probe<'a>(&'a self, key: &'a [u8]) -> Probe<'a> {
        let state = if self.ring.server_count() == 0 {
            ProbeState::Exhausted
        } else {
            ProbeState::Strategy {
                candidate: self.ring.candidate(key),
                attempt: 0,
            }
        };
        Probe {
            ring: &self.ring,
            strategy: self.strategy.as_ref(),
            key,
            max_probes: self.max_probes,
            state,
            steps: 0,
        }
    }

    /// Mapping for a key that skips servers marked down in `live`
    ///
    /// A single-server pool always resolves to that server.
    pub fn select_with_redistribution(&self, key: &[u8], live: &[bool]) -> Result<usize> {
        match self.ring.server_count() {
            0 => return Err(McrouteError::NoServerAvailable),
            1 => return Ok(0),
            _ => {}
        }

        let mut probe = self.probe(key);
        loop {
            match probe.step(live) {
                ProbeState::Found(index) => {
                    if probe.steps() > 1 {
                        tracing::debug!(
                            "Redistributed key after {} probes ({}) to server {}",
                            probe.steps(),
                            self.strategy.name(),
                            index
                        );
                    }
                    return Ok(index);
                }
                ProbeState::Exhausted => return Err(McrouteError::NoServerAvailable),
                ProbeState::Strategy { .. } | ProbeState::Sweep { .. } => {}
            }
        }
    }
}
