//! Routing Module
//!
//! Decides which cache node owns a key.
//!
//! ## Pipeline
//! ```text
//!  group key ──▶ HashAlgorithm ──▶ Ring (modula | continuum) ──▶ candidate
//!                                                                  │
//!                         liveness snapshot ──▶ ServerSelector ◀───┘
//!                                                   │
//!                                                   ▼
//!                                       primary ──▶ ReplicaSet
//! ```

mod hash;
mod ring;
mod selector;
mod replica;

pub use hash::HashAlgorithm;
pub use ring::{Candidate, Distribution, Ring, POINTS_PER_SERVER};
pub use selector::{
    NextServer, Probe, ProbeState, Redistribution, RedistributionKind, Rehash, ServerSelector,
};
pub use replica::ReplicaSet;
