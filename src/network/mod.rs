//! Network Module
//!
//! Server instances and the transports that reach them.
//!
//! ## Architecture
//! - `Connector` opens a `Transport` per server on first use
//! - `ServerInstance` owns that transport and drops it on any failure
//! - `TcpConnector` for real nodes, `LoopbackPool` for in-process nodes

mod transport;
mod connection;
mod server;
mod loopback;

pub use transport::{Connector, Transport};
pub use connection::{TcpConnector, TcpTransport};
pub use server::ServerInstance;
pub use loopback::{
    LoopbackNode, LoopbackPool, LoopbackTransport, NodeStats, StoredItem, LOOPBACK_VERSION,
};
