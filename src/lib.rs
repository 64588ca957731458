//! # mcroute
//!
//! A memcached client core with:
//! - Key validation for the binary and legacy text protocols
//! - Binary protocol framing with vectored sends
//! - Hash-ring server selection with pluggable redistribution
//! - Replica-aware writes and randomized replica reads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Client (context)                        │
//! │        validate key ─▶ resolve server ─▶ encode request      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │   Routing   │          │ Replication  │
//!   │ (Ring/Probe)│          │ (fan-out,    │
//!   └─────────────┘          │  fallback)   │
//!                            └──────┬───────┘
//!                                   │
//!                                   ▼
//!                           ┌──────────────┐
//!                           │   Network    │
//!                           │ (Transport)  │
//!                           └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mcroute::{Client, Config};
//! use mcroute::client::StoreOptions;
//!
//! let config = Config::builder()
//!     .servers(["10.0.0.1:11211", "10.0.0.2:11211"])
//!     .prefix_key("app:")
//!     .build()?;
//! let mut client = Client::new(config);
//!
//! client.set(b"user:42", b"alice", StoreOptions::expiring(300))?;
//! client.touch(b"user:42", 600)?;
//! # Ok::<(), mcroute::McrouteError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod key;

pub mod protocol;
pub mod routing;
pub mod network;
pub mod replication;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{McrouteError, Result};
pub use config::{Config, ServerAddr};
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mcroute
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
