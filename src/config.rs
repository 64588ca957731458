//! Configuration for mcroute
//!
//! Centralized client configuration with sensible defaults. Parsing server
//! lists out of files or option strings is left to the caller; this module
//! only holds and checks the values.

use std::fmt;
use std::str::FromStr;

use crate::error::{McrouteError, Result};
use crate::key::{self, ProtocolMode};
use crate::replication::WriteQuorum;
use crate::routing::{Distribution, HashAlgorithm, RedistributionKind};

/// Port used when a server address omits one
pub const DEFAULT_PORT: u16 = 11211;

/// Longest namespace prefix accepted
pub const MAX_PREFIX_KEY_LEN: usize = 128;

/// Address of one cache node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = McrouteError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(McrouteError::Config("empty server address".to_string()));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    McrouteError::Config(format!("invalid port in server address '{}'", s))
                })?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(McrouteError::Config(format!(
                "missing host in server address '{}'",
                s
            ))),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

/// Main configuration for a client context
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Topology
    // -------------------------------------------------------------------------
    /// Cache nodes, in the order that defines their server index
    pub servers: Vec<ServerAddr>,

    /// Number of extra copies kept for each key (0 = no replication).
    /// A key's replica set is its primary plus the next `replicas` servers.
    pub replicas: usize,

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------
    /// Hash function applied to group keys
    pub hash: HashAlgorithm,

    /// How a hash value is reduced to a server index
    pub distribution: Distribution,

    /// How alternates are probed when the mapped server is down
    pub redistribution: RedistributionKind,

    /// Strategy probes attempted before falling back to a full sweep
    pub max_redistribution_probes: usize,

    // -------------------------------------------------------------------------
    // Keys and Protocol
    // -------------------------------------------------------------------------
    /// Namespace prepended to every key on the wire
    pub prefix_key: Vec<u8>,

    /// Include the namespace when hashing group keys
    pub hash_with_prefix_key: bool,

    /// Binary protocol (true) or legacy text protocol (false)
    pub binary_protocol: bool,

    /// Reject text protocol keys with control or whitespace bytes
    pub verify_key: bool,

    // -------------------------------------------------------------------------
    // Replication
    // -------------------------------------------------------------------------
    /// Shuffle the replica set before each read
    pub randomize_replica_read: bool,

    /// Seed for the replica read shuffle; random when unset
    pub replica_read_seed: Option<u64>,

    /// Acknowledgements a fan-out write needs to succeed
    pub write_quorum: WriteQuorum,

    // -------------------------------------------------------------------------
    // Failure Handling
    // -------------------------------------------------------------------------
    /// Mark servers down after `server_failure_limit` consecutive failures
    pub auto_eject_hosts: bool,

    /// Consecutive failures before a server is marked down
    pub server_failure_limit: u32,

    /// How long a server stays marked down (milliseconds)
    pub retry_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            replicas: 0,
            hash: HashAlgorithm::Default,
            distribution: Distribution::Modula,
            redistribution: RedistributionKind::Rehash,
            max_redistribution_probes: 8,
            prefix_key: Vec::new(),
            hash_with_prefix_key: false,
            binary_protocol: true,
            verify_key: true,
            randomize_replica_read: true,
            replica_read_seed: None,
            write_quorum: WriteQuorum::Any,
            auto_eject_hosts: true,
            server_failure_limit: 2,
            retry_timeout_ms: 2000,
            connect_timeout_ms: 4000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Protocol mode implied by the binary flag
    pub fn mode(&self) -> ProtocolMode {
        if self.binary_protocol {
            ProtocolMode::Binary
        } else {
            ProtocolMode::Text
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    bad_servers: Vec<String>,
}

impl ConfigBuilder {
    /// Add one server
    pub fn server(mut self, addr: ServerAddr) -> Self {
        self.config.servers.push(addr);
        self
    }

    /// Add servers from `host[:port]` strings; bad entries fail `build()`
    pub fn servers<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addr in addrs {
            match addr.as_ref().parse::<ServerAddr>() {
                Ok(server) => self.config.servers.push(server),
                Err(_) => self.bad_servers.push(addr.as_ref().to_string()),
            }
        }
        self
    }

    /// Set the replica count
    pub fn replicas(mut self, count: usize) -> Self {
        self.config.replicas = count;
        self
    }

    /// Set the hash algorithm
    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.config.hash = hash;
        self
    }

    /// Set the distribution
    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.config.distribution = distribution;
        self
    }

    /// Set the redistribution strategy
    pub fn redistribution(mut self, kind: RedistributionKind) -> Self {
        self.config.redistribution = kind;
        self
    }

    /// Set the number of strategy probes before the full sweep
    pub fn max_redistribution_probes(mut self, probes: usize) -> Self {
        self.config.max_redistribution_probes = probes;
        self
    }

    /// Set the key namespace prefix
    pub fn prefix_key(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.config.prefix_key = prefix.into();
        self
    }

    /// Hash group keys together with the prefix
    pub fn hash_with_prefix_key(mut self, enabled: bool) -> Self {
        self.config.hash_with_prefix_key = enabled;
        self
    }

    /// Select binary (true) or text (false) protocol
    pub fn binary_protocol(mut self, enabled: bool) -> Self {
        self.config.binary_protocol = enabled;
        self
    }

    /// Enable or disable the text protocol key content check
    pub fn verify_key(mut self, enabled: bool) -> Self {
        self.config.verify_key = enabled;
        self
    }

    /// Shuffle replicas before each read
    pub fn randomize_replica_read(mut self, enabled: bool) -> Self {
        self.config.randomize_replica_read = enabled;
        self
    }

    /// Fix the replica read shuffle seed
    pub fn replica_read_seed(mut self, seed: u64) -> Self {
        self.config.replica_read_seed = Some(seed);
        self
    }

    /// Set the write quorum
    pub fn write_quorum(mut self, quorum: WriteQuorum) -> Self {
        self.config.write_quorum = quorum;
        self
    }

    /// Enable or disable marking failing servers down
    pub fn auto_eject_hosts(mut self, enabled: bool) -> Self {
        self.config.auto_eject_hosts = enabled;
        self
    }

    /// Set the consecutive failure limit
    pub fn server_failure_limit(mut self, limit: u32) -> Self {
        self.config.server_failure_limit = limit;
        self
    }

    /// Set the retry timeout (in milliseconds)
    pub fn retry_timeout_ms(mut self, ms: u64) -> Self {
        self.config.retry_timeout_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Check and return the config
    pub fn build(self) -> Result<Config> {
        if let Some(bad) = self.bad_servers.first() {
            return Err(McrouteError::Config(format!(
                "invalid server address '{}'",
                bad
            )));
        }

        let config = self.config;
        if config.prefix_key.len() > MAX_PREFIX_KEY_LEN {
            return Err(McrouteError::Config(format!(
                "prefix key is {} bytes (max {})",
                config.prefix_key.len(),
                MAX_PREFIX_KEY_LEN
            )));
        }
        if !config.prefix_key.is_empty() {
            key::validate_content(&config.prefix_key, config.mode())
                .map_err(|e| McrouteError::Config(format!("prefix key rejected: {}", e)))?;
        }

        Ok(config)
    }
}
