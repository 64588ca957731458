//! Error types for mcroute
//!
//! Provides a unified error type for all client operations.

use thiserror::Error;

use crate::protocol::Status;

/// Result type alias using McrouteError
pub type Result<T> = std::result::Result<T, McrouteError>;

/// Unified error type for mcroute operations
#[derive(Debug, Error)]
pub enum McrouteError {
    // -------------------------------------------------------------------------
    // Pre-network Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("No server available")]
    NoServerAvailable,

    // -------------------------------------------------------------------------
    // Exchange Errors
    // -------------------------------------------------------------------------
    #[error("Write failure on {server}: {source}")]
    WriteFailure {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Skipped without contact because the server is marked down
    #[error("Server {server} is marked down")]
    ServerDown { server: String },

    /// Well-formed negative reply. Public operations turn this into
    /// `Ok(None)` / `Ok(false)`.
    #[error("Key not found")]
    NotFound,

    #[error("Server replied {0:?}")]
    Server(Status),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("Replication partially failed: {failed} of {attempted} replicas failed")]
    PartialReplicationFailure { failed: usize, attempted: usize },

    #[error("Replication exhausted after {attempts} attempts")]
    ReplicationExhausted { attempts: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl McrouteError {
    /// Whether this error is a fault on one server (transport, framing or
    /// a down mark), as opposed to a caller error or a logical reply.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            McrouteError::WriteFailure { .. }
                | McrouteError::ProtocolError(_)
                | McrouteError::ServerDown { .. }
        )
    }
}
