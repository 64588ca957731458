//! Replica sets
//!
//! A key's replica set is its primary server followed by the next
//! `replicas` servers in list order, wrapping around. It is computed on
//! demand from the server count; nothing is stored.

use rand::seq::SliceRandom;
use rand::Rng;

/// Ordered server indexes holding copies of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    members: Vec<usize>,
}

impl ReplicaSet {
    /// Replica set for `primary` in a pool of `server_count` servers
    ///
    /// Never larger than the pool; a pool of one yields just the primary.
    pub fn new(primary: usize, replicas: usize, server_count: usize) -> Self {
        let size = (replicas + 1).min(server_count.max(1));
        let members = (0..size)
            .map(|offset| (primary + offset) % server_count.max(1))
            .collect();
        Self { members }
    }

    /// The primary server
    pub fn primary(&self) -> usize {
        self.members[0]
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members.contains(&index)
    }

    /// Members in a fresh random order
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut order = self.members.clone();
        order.shuffle(rng);
        order
    }
}
