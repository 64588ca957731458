//! Client Module
//!
//! The client context: owns the configuration, the server list and their
//! connections, and runs every public operation.
//!
//! ## Execution Steps
//! Each step gates the next; steps 1-3 never touch the network.
//! 1. Protocol-mode prerequisite (`UnsupportedOperation`)
//! 2. Key validation (`InvalidKey`)
//! 3. Server resolution with redistribution (`NoServerAvailable`)
//! 4. Request encoding (binary or text)
//! 5. Vectored send through the server's transport
//! 6. On send failure: reset that server's connection, `WriteFailure`
//! 7. Exactly one blocking receive, decoded and correlated
//!    (`ProtocolError`, also resetting the connection)
//!
//! Operations that touch a replica set hand steps 4-7 per member to the
//! replication coordinator.
//!
//! ## Concurrency Model
//! A `Client` is used from one thread at a time (`&mut self` everywhere).
//! Requests on a connection are strictly one-at-a-time.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{Config, ServerAddr};
use crate::error::{McrouteError, Result};
use crate::key::{KeySpec, ProtocolMode};
use crate::network::{Connector, ServerInstance, TcpConnector};
use crate::protocol::{
    encode_request, read_response, text, write_frame, ArithmeticOp, Command, Item, Request,
    Response, StoreMode, NO_AUTO_CREATE,
};
use crate::replication::{self, Exchange};
use crate::routing::{Redistribution, ReplicaSet, Ring, ServerSelector};

/// Arguments shared by the storage commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub expiration: u32,
    pub flags: u32,
    /// Only store if the item's CAS token still matches (0 = unconditional)
    pub cas: u64,
}

impl StoreOptions {
    pub fn expiring(expiration: u32) -> Self {
        Self {
            expiration,
            ..Self::default()
        }
    }
}

/// How an operation uses the replica set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Primary server only
    Primary,
    /// Every replica, quorum applies
    FanOut,
    /// Replicas one at a time until a hit
    Fallback,
}

/// A client context for a pool of cache nodes
pub struct Client {
    /// Client configuration
    config: Config,

    /// Namespace prefix, shared by every request
    prefix: Bytes,

    /// Server instances in configured order
    servers: Vec<ServerInstance>,

    /// Key-to-server mapping
    selector: ServerSelector,

    /// Opens connections on first use and after resets
    connector: Box<dyn Connector>,

    /// Replica read ordering
    rng: StdRng,

    /// Next correlation token
    next_opaque: u32,

    /// Reply to the last successful exchange
    last_result: Option<Response>,
}

impl Client {
    /// Create a client that connects over TCP
    pub fn new(config: Config) -> Self {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, Box::new(connector))
    }

    /// Create a client with a custom connector
    pub fn with_connector(config: Config, connector: Box<dyn Connector>) -> Self {
        let ring = Ring::build(&config.servers, config.hash, config.distribution);
        let selector = ServerSelector::new(
            ring,
            config.redistribution.strategy(),
            config.max_redistribution_probes,
        );
        let servers = config
            .servers
            .iter()
            .enumerate()
            .map(|(index, addr)| ServerInstance::new(index, addr.clone()))
            .collect();
        let rng = match config.replica_read_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::debug!(
            "Client created: {} servers, hash={}, distribution={}, replicas={}, binary={}",
            config.servers.len(),
            config.hash,
            config.distribution,
            config.replicas,
            config.binary_protocol
        );

        Self {
            prefix: Bytes::copy_from_slice(&config.prefix_key),
            config,
            servers,
            selector,
            connector,
            rng,
            next_opaque: 1,
            last_result: None,
        }
    }

    /// Replace the redistribution strategy
    pub fn set_redistribution(&mut self, strategy: Box<dyn Redistribution>) {
        self.selector.set_strategy(strategy);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Item>> {
        self.get_by_key(key, key)
    }

    /// Get a value placed by `group_key`
    pub fn get_by_key(&mut self, group_key: &[u8], key: &[u8]) -> Result<Option<Item>> {
        let spec = KeySpec::grouped(group_key, key);
        let response = self.execute(spec, Command::Get, Route::Fallback)?;
        let item = found(response.into_result())?
            .map(|r| Item::from_response(Bytes::copy_from_slice(key), &r));
        Ok(item)
    }

    /// Get several values; misses are left out of the map
    ///
    /// Every key is validated before any request is sent. A key whose
    /// replicas all fail ends the call with that error.
    pub fn mget<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<HashMap<Bytes, Item>> {
        self.mget_inner(None, keys)
    }

    /// Get several values that share `group_key`
    pub fn mget_by_key<K: AsRef<[u8]>>(
        &mut self,
        group_key: &[u8],
        keys: &[K],
    ) -> Result<HashMap<Bytes, Item>> {
        self.mget_inner(Some(group_key), keys)
    }

    /// Get at most the first `len` bytes of a value
    ///
    /// The whole value is fetched; truncation happens on the client.
    pub fn get_len(&mut self, key: &[u8], len: usize) -> Result<Option<Item>> {
        let mut item = self.get(key)?;
        if let Some(item) = item.as_mut() {
            item.truncate(len);
        }
        Ok(item)
    }

    /// `mget` with every value cut to at most `len` bytes
    pub fn mget_len<K: AsRef<[u8]>>(
        &mut self,
        keys: &[K],
        len: usize,
    ) -> Result<HashMap<Bytes, Item>> {
        let mut items = self.mget(keys)?;
        for item in items.values_mut() {
            item.truncate(len);
        }
        Ok(items)
    }

    fn mget_inner<K: AsRef<[u8]>>(
        &mut self,
        group_key: Option<&[u8]>,
        keys: &[K],
    ) -> Result<HashMap<Bytes, Item>> {
        let mode = self.config.mode();
        for key in keys {
            let spec = KeySpec {
                group_key,
                key: key.as_ref(),
            };
            spec.validate_with(self.prefix.len(), mode, self.config.verify_key)?;
        }

        let mut items = HashMap::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            let spec = KeySpec {
                group_key,
                key,
            };
            let response = self.execute(spec, Command::Get, Route::Fallback)?;
            if let Some(response) = found(response.into_result())? {
                let key = Bytes::copy_from_slice(key);
                items.insert(key.clone(), Item::from_response(key, &response));
            }
        }
        Ok(items)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value unconditionally
    pub fn set(&mut self, key: &[u8], value: &[u8], options: StoreOptions) -> Result<()> {
        self.store_by_key(StoreMode::Set, key, key, value, options)
    }

    pub fn set_by_key(
        &mut self,
        group_key: &[u8],
        key: &[u8],
        value: &[u8],
        options: StoreOptions,
    ) -> Result<()> {
        self.store_by_key(StoreMode::Set, group_key, key, value, options)
    }

    /// Store only if the key is absent
    pub fn add(&mut self, key: &[u8], value: &[u8], options: StoreOptions) -> Result<()> {
        self.store_by_key(StoreMode::Add, key, key, value, options)
    }

    pub fn add_by_key(
        &mut self,
        group_key: &[u8],
        key: &[u8],
        value: &[u8],
        options: StoreOptions,
    ) -> Result<()> {
        self.store_by_key(StoreMode::Add, group_key, key, value, options)
    }

    /// Store only if the key is present
    pub fn replace(&mut self, key: &[u8], value: &[u8], options: StoreOptions) -> Result<()> {
        self.store_by_key(StoreMode::Replace, key, key, value, options)
    }

    pub fn replace_by_key(
        &mut self,
        group_key: &[u8],
        key: &[u8],
        value: &[u8],
        options: StoreOptions,
    ) -> Result<()> {
        self.store_by_key(StoreMode::Replace, group_key, key, value, options)
    }

    /// Store if the item is unchanged since `cas` was read
    pub fn cas(
        &mut self,
        key: &[u8],
        value: &[u8],
        expiration: u32,
        flags: u32,
        cas: u64,
    ) -> Result<()> {
        let options = StoreOptions {
            expiration,
            flags,
            cas,
        };
        self.store_by_key(StoreMode::Set, key, key, value, options)
    }

    /// Append to an existing value
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.store_by_key(StoreMode::Append, key, key, value, StoreOptions::default())
    }

    pub fn append_by_key(&mut self, group_key: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.store_by_key(StoreMode::Append, group_key, key, value, StoreOptions::default())
    }

    /// Prepend to an existing value
    pub fn prepend(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.store_by_key(StoreMode::Prepend, key, key, value, StoreOptions::default())
    }

    pub fn prepend_by_key(&mut self, group_key: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.store_by_key(StoreMode::Prepend, group_key, key, value, StoreOptions::default())
    }

    fn store_by_key(
        &mut self,
        mode: StoreMode,
        group_key: &[u8],
        key: &[u8],
        value: &[u8],
        options: StoreOptions,
    ) -> Result<()> {
        let command = Command::Store {
            mode,
            value: Bytes::copy_from_slice(value),
            flags: options.flags,
            expiration: options.expiration,
            cas: options.cas,
        };
        let response = self.execute(KeySpec::grouped(group_key, key), command, Route::FanOut)?;
        response.into_result().map(|_| ())
    }

    /// Delete a key; returns false if it was not present
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.delete_by_key(key, key)
    }

    pub fn delete_by_key(&mut self, group_key: &[u8], key: &[u8]) -> Result<bool> {
        let spec = KeySpec::grouped(group_key, key);
        let response = self.execute(spec, Command::Delete, Route::FanOut)?;
        Ok(found(response.into_result())?.is_some())
    }

    /// Set a new expiration on an existing key (binary protocol only)
    ///
    /// Returns false if the key was not present.
    pub fn touch(&mut self, key: &[u8], expiration: u32) -> Result<bool> {
        self.touch_by_key(key, key, expiration)
    }

    pub fn touch_by_key(&mut self, group_key: &[u8], key: &[u8], expiration: u32) -> Result<bool> {
        let command = Command::Touch { expiration };
        let response = self.execute(KeySpec::grouped(group_key, key), command, Route::FanOut)?;
        Ok(found(response.into_result())?.is_some())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Increment a counter; `None` if the key is absent
    pub fn increment(&mut self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.arithmetic(ArithmeticOp::Increment, key, delta, 0, NO_AUTO_CREATE)
    }

    /// Decrement a counter (saturating at zero); `None` if the key is absent
    pub fn decrement(&mut self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.arithmetic(ArithmeticOp::Decrement, key, delta, 0, NO_AUTO_CREATE)
    }

    /// Increment, creating the counter at `initial` if absent (binary only)
    pub fn increment_with_initial(
        &mut self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
    ) -> Result<Option<u64>> {
        self.require_binary("increment with initial value")?;
        self.arithmetic(ArithmeticOp::Increment, key, delta, initial, expiration)
    }

    /// Decrement, creating the counter at `initial` if absent (binary only)
    pub fn decrement_with_initial(
        &mut self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
    ) -> Result<Option<u64>> {
        self.require_binary("decrement with initial value")?;
        self.arithmetic(ArithmeticOp::Decrement, key, delta, initial, expiration)
    }

    fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
    ) -> Result<Option<u64>> {
        let command = Command::Arithmetic {
            op,
            delta,
            initial,
            expiration,
        };
        let response = self.execute(KeySpec::new(key), command, Route::Primary)?;
        match found(response.into_result())? {
            Some(response) => Ok(Some(response.counter()?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Server-wide Commands
    // =========================================================================

    /// Invalidate every item on every server
    ///
    /// All live servers are tried; the first failure, or a server skipped
    /// while marked down, is returned afterwards.
    pub fn flush_all(&mut self, expiration: u32) -> Result<()> {
        let request = Request::keyless(Command::Flush { expiration });
        let mut first_error = None;
        for index in 0..self.servers.len() {
            let result = self
                .broadcast(index, &request)
                .and_then(Response::into_result);
            if let Err(e) = result {
                tracing::warn!("Flush failed on {}: {}", self.servers[index].addr(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Version string of every server; servers marked down are not asked
    pub fn version(&mut self) -> Vec<(ServerAddr, Result<String>)> {
        let request = Request::keyless(Command::Version);
        (0..self.servers.len())
            .map(|index| {
                let result = self
                    .broadcast(index, &request)
                    .and_then(Response::into_result)
                    .map(|r| String::from_utf8_lossy(&r.value).into_owned());
                (self.servers[index].addr().clone(), result)
            })
            .collect()
    }

    // =========================================================================
    // Servers
    // =========================================================================

    /// Mark a server down until `mark_server_up` or the retry timeout
    pub fn mark_server_down(&mut self, index: usize) -> Result<()> {
        let retry = std::time::Duration::from_millis(self.config.retry_timeout_ms);
        let server = self.server_mut(index)?;
        server.mark_down(Instant::now() + retry);
        tracing::warn!("Server {} marked down", server.addr());
        Ok(())
    }

    /// Make a server selectable again
    pub fn mark_server_up(&mut self, index: usize) -> Result<()> {
        let server = self.server_mut(index)?;
        server.mark_up();
        tracing::debug!("Server {} marked up", server.addr());
        Ok(())
    }

    pub fn server(&self, index: usize) -> Option<&ServerInstance> {
        self.servers.get(index)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Server a key resolves to right now, redistribution included
    pub fn server_for_key(&self, group_key: &[u8]) -> Result<usize> {
        let placement = self.placement(group_key);
        self.selector
            .select_with_redistribution(&placement, &self.live_snapshot())
    }

    /// Replica set a key resolves to right now
    pub fn replica_set_for_key(&self, group_key: &[u8]) -> Result<ReplicaSet> {
        let primary = self.server_for_key(group_key)?;
        Ok(ReplicaSet::new(primary, self.config.replicas, self.servers.len()))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Reply to the last successful exchange
    pub fn last_result(&self) -> Option<&Response> {
        self.last_result.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn selector(&self) -> &ServerSelector {
        &self.selector
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Steps 1-3, then the route
    fn execute(&mut self, spec: KeySpec<'_>, command: Command, route: Route) -> Result<Response> {
        let mode = self.config.mode();
        if command.binary_only() && mode != ProtocolMode::Binary {
            return Err(McrouteError::UnsupportedOperation(format!(
                "{:?} requires the binary protocol",
                command.opcode()
            )));
        }

        spec.validate_with(self.prefix.len(), mode, self.config.verify_key)?;

        let primary = self.server_for_key(spec.placement())?;
        let set = ReplicaSet::new(primary, self.config.replicas, self.servers.len());
        let request = Request::new(command, self.prefix.clone(), Bytes::copy_from_slice(spec.key));

        tracing::debug!(
            "{:?} routed to server {} (replica set {:?})",
            request.command.opcode(),
            primary,
            set.members()
        );

        if route == Route::Primary || set.len() == 1 {
            return self.exchange(primary, &request);
        }

        match route {
            Route::FanOut => {
                let quorum = self.config.write_quorum;
                let report = replication::fan_out(self, set.members(), &request, quorum)?;
                report
                    .reconcile()
                    .cloned()
                    .ok_or(McrouteError::ReplicationExhausted {
                        attempts: report.attempted(),
                    })
            }
            Route::Fallback => {
                let order = if self.config.randomize_replica_read {
                    set.shuffled(&mut self.rng)
                } else {
                    set.members().to_vec()
                };
                let outcome = replication::read_with_fallback(self, &order, &request)?;
                Ok(outcome.response)
            }
            Route::Primary => self.exchange(primary, &request),
        }
    }

    /// Exchange for server-wide commands, skipping servers marked down
    fn broadcast(&mut self, index: usize, request: &Request) -> Result<Response> {
        if !self.is_available(index) {
            let server = self
                .servers
                .get(index)
                .map(|s| s.addr().to_string())
                .unwrap_or_default();
            return Err(McrouteError::ServerDown { server });
        }
        self.exchange(index, request)
    }

    fn require_binary(&self, what: &str) -> Result<()> {
        if self.config.binary_protocol {
            Ok(())
        } else {
            Err(McrouteError::UnsupportedOperation(format!(
                "{} requires the binary protocol",
                what
            )))
        }
    }

    /// Bytes hashed for placement
    fn placement(&self, group_key: &[u8]) -> Vec<u8> {
        if self.config.hash_with_prefix_key {
            let mut placement = Vec::with_capacity(self.prefix.len() + group_key.len());
            placement.extend_from_slice(&self.prefix);
            placement.extend_from_slice(group_key);
            placement
        } else {
            group_key.to_vec()
        }
    }

    fn live_snapshot(&self) -> Vec<bool> {
        let now = Instant::now();
        self.servers.iter().map(|s| s.is_available(now)).collect()
    }

    fn server_mut(&mut self, index: usize) -> Result<&mut ServerInstance> {
        let count = self.servers.len();
        self.servers.get_mut(index).ok_or_else(|| {
            McrouteError::Config(format!("server index {} out of range ({} servers)", index, count))
        })
    }

    fn take_opaque(&mut self) -> u32 {
        let opaque = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1).max(1);
        opaque
    }
}

impl Exchange for Client {
    /// Steps 4-7 against one server
    fn exchange(&mut self, index: usize, request: &Request) -> Result<Response> {
        let request = request.clone().with_opaque(self.take_opaque());
        let binary = self.config.binary_protocol;
        let frame = if binary {
            encode_request(&request)
        } else {
            text::encode_text_request(&request)?
        };

        let server = self
            .servers
            .get_mut(index)
            .ok_or(McrouteError::NoServerAvailable)?;

        let sent = server
            .connection(self.connector.as_ref())
            .and_then(|conn| write_frame(conn.as_mut(), &frame));
        if let Err(source) = sent {
            server.reset();
            if server.record_failure(&self.config) {
                tracing::warn!("Server {} marked down after repeated failures", server.addr());
            }
            return Err(McrouteError::WriteFailure {
                server: server.addr().to_string(),
                source,
            });
        }

        let received = match server.connection(self.connector.as_ref()) {
            Ok(conn) if binary => read_response(conn.as_mut(), &request),
            Ok(conn) => text::read_text_response(conn.as_mut(), &request),
            Err(e) => Err(McrouteError::ProtocolError(format!("connection lost: {}", e))),
        };

        match received {
            Ok(response) => {
                server.record_success();
                tracing::trace!(
                    "{:?} on {} -> {:?} (opaque {})",
                    response.opcode,
                    server.addr(),
                    response.status,
                    response.opaque
                );
                self.last_result = Some(response.clone());
                Ok(response)
            }
            Err(e) => {
                server.reset();
                if server.record_failure(&self.config) {
                    tracing::warn!("Server {} marked down after repeated failures", server.addr());
                }
                Err(e)
            }
        }
    }

    fn is_available(&self, index: usize) -> bool {
        self.servers
            .get(index)
            .is_some_and(|server| server.is_available(Instant::now()))
    }
}

/// Fold `NotFound` into a negative success
fn found(result: Result<Response>) -> Result<Option<Response>> {
    match result {
        Ok(response) => Ok(Some(response)),
        Err(McrouteError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}
