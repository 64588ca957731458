//! Hash-to-server reduction
//!
//! `Modula` takes the hash modulo the server count. `Consistent` builds a
//! sorted continuum of points per server and maps a hash to the first point
//! at or after it, wrapping at the end, so adding or removing one server
//! moves only the keys on its arcs.

use std::fmt;
use std::str::FromStr;

use crate::config::ServerAddr;
use crate::error::McrouteError;

use super::HashAlgorithm;

/// Continuum points contributed by each server
pub const POINTS_PER_SERVER: usize = 100;

/// How a hash value becomes a server index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    #[default]
    Modula,
    Consistent,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Modula => f.write_str("modula"),
            Distribution::Consistent => f.write_str("consistent"),
        }
    }
}

impl FromStr for Distribution {
    type Err = McrouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "modula" => Ok(Distribution::Modula),
            "consistent" | "ketama" => Ok(Distribution::Consistent),
            other => Err(McrouteError::Config(format!(
                "unknown distribution '{}'",
                other
            ))),
        }
    }
}

/// A hash and the server it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub hash: u32,
    pub index: usize,
}

/// Immutable mapping from hash values to server indexes
#[derive(Debug, Clone)]
pub struct Ring {
    algorithm: HashAlgorithm,
    distribution: Distribution,
    server_count: usize,
    /// (point hash, server index), sorted by hash; empty for `Modula`
    points: Vec<(u32, usize)>,
}

impl Ring {
    /// Build the mapping for a server list
    pub fn build(servers: &[ServerAddr], algorithm: HashAlgorithm, distribution: Distribution) -> Self {
        let mut points = Vec::new();
        if distribution == Distribution::Consistent {
            points.reserve(servers.len() * POINTS_PER_SERVER);
            for (index, server) in servers.iter().enumerate() {
                for point in 0..POINTS_PER_SERVER {
                    let label = format!("{}-{}", server, point);
                    points.push((algorithm.hash(label.as_bytes()), index));
                }
            }
            points.sort_unstable();
        }

        Self {
            algorithm,
            distribution,
            server_count: servers.len(),
            points,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn server_count(&self) -> usize {
        self.server_count
    }

    /// Hash a key with the configured algorithm
    pub fn hash(&self, key: &[u8]) -> u32 {
        self.algorithm.hash(key)
    }

    /// Server owning `hash` (requires at least one server)
    pub fn locate(&self, hash: u32) -> usize {
        match self.distribution {
            Distribution::Modula => hash as usize % self.server_count,
            Distribution::Consistent => self.points[self.point_at(hash)].1,
        }
    }

    /// Candidate for a key
    pub fn candidate(&self, key: &[u8]) -> Candidate {
        let hash = self.hash(key);
        Candidate {
            hash,
            index: self.locate(hash),
        }
    }

    /// The next server along the ring from `candidate`
    ///
    /// Modula steps to the next index; the continuum steps to the next point
    /// owned by a different server.
    pub fn next_after(&self, candidate: Candidate) -> Candidate {
        match self.distribution {
            Distribution::Modula => Candidate {
                hash: candidate.hash,
                index: (candidate.index + 1) % self.server_count,
            },
            Distribution::Consistent => {
                let start = self.point_at(candidate.hash);
                let len = self.points.len();
                for step in 1..=len {
                    let (hash, index) = self.points[(start + step) % len];
                    if index != candidate.index {
                        return Candidate { hash, index };
                    }
                }
                candidate
            }
        }
    }

    /// Position of the first point at or after `hash`, wrapping to 0
    fn point_at(&self, hash: u32) -> usize {
        let pos = self.points.partition_point(|&(point, _)| point < hash);
        if pos == self.points.len() {
            0
        } else {
            pos
        }
    }
}
