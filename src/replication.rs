//! Replication Coordinator
//!
//! Runs one logical operation against a replica set instead of one node.
//!
//! ## Phases
//! ```text
//!  Dispatch ─▶ AwaitPrimary ─┬─ hit ──────────────▶ Success ─┐
//!                            └─ fault / miss ─▶ FailoverToReplica
//!                                                   │        │
//!                               next member ◀───────┘        ▼
//!                                                        Reconcile ─▶ Done
//! ```
//!
//! ## Write Path
//! The request goes to every member in order. A member that fails, or is
//! skipped because it is marked down, is recorded and the remaining members
//! are still tried. With `WriteQuorum::Any` one answer is enough;
//! `WriteQuorum::All` needs every member to answer with the reconciled
//! status and otherwise fails with `PartialReplicationFailure`.
//!
//! ## Read Path
//! Members are tried one at a time in the order given (randomized per call
//! by the client). A fault, a miss or a down member moves on to the next
//! member; a hit ends the walk. Each member is tried once, so the walk ends after at
//! most `members.len()` attempts.

use crate::error::{McrouteError, Result};
use crate::protocol::{Request, Response, Status};

/// Acknowledgements a fan-out write needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteQuorum {
    /// At least one replica
    #[default]
    Any,
    /// Every replica
    All,
}

/// One request/response exchange with one server
pub trait Exchange {
    fn exchange(&mut self, server: usize, request: &Request) -> Result<Response>;

    /// Whether `server` may be contacted now
    fn is_available(&self, _server: usize) -> bool {
        true
    }
}

/// Exchange with `server` unless it is marked down
fn exchange_live<E: Exchange + ?Sized>(
    exchange: &mut E,
    server: usize,
    request: &Request,
) -> Result<Response> {
    if !exchange.is_available(server) {
        tracing::debug!("Skipping replica {}: marked down", server);
        return Err(McrouteError::ServerDown {
            server: server.to_string(),
        });
    }
    exchange.exchange(server, request)
}

/// Coordinator phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaPhase {
    Dispatch,
    AwaitPrimary,
    FailoverToReplica,
    Success,
    Reconcile,
    Done,
}

// =============================================================================
// Write Path
// =============================================================================

/// Result of one member's exchange
#[derive(Debug)]
pub struct ReplicaOutcome {
    pub server: usize,
    pub result: Result<Response>,
}

/// Per-replica record of a fan-out
#[derive(Debug)]
pub struct FanOut {
    pub outcomes: Vec<ReplicaOutcome>,
}

impl FanOut {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Members that answered, whatever the status
    pub fn acknowledged(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.acknowledged()
    }

    /// Members that answered with a status other than the reconciled one
    pub fn dissenting(&self) -> usize {
        let agreed = match self.reconcile() {
            Some(response) => response.status,
            None => return 0,
        };
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(r) if r.status != agreed))
            .count()
    }

    /// The reply callers see: the first success, else the first answer
    pub fn reconcile(&self) -> Option<&Response> {
        let mut answers = self.outcomes.iter().filter_map(|o| o.result.as_ref().ok());
        let first = answers.clone().next();
        answers.find(|r| r.status == Status::NoError).or(first)
    }
}

/// Send `request` to every member and apply the quorum
pub fn fan_out<E: Exchange + ?Sized>(
    exchange: &mut E,
    members: &[usize],
    request: &Request,
    quorum: WriteQuorum,
) -> Result<FanOut> {
    if members.is_empty() {
        return Err(McrouteError::NoServerAvailable);
    }

    let mut outcomes = Vec::with_capacity(members.len());
    for &server in members {
        let result = exchange_live(exchange, server, request);
        match result {
            Err(McrouteError::ServerDown { .. }) | Ok(_) => {}
            Err(ref e) => {
                tracing::warn!("Replica {} failed {:?}: {}", server, request.command.opcode(), e)
            }
        }
        outcomes.push(ReplicaOutcome { server, result });
    }
    let mut report = FanOut { outcomes };

    let attempted = report.attempted();
    let failed = report.failed();
    if failed == attempted {
        // A lone member's failure is reported as-is
        if attempted == 1 {
            if let Some(ReplicaOutcome { result: Err(e), .. }) = report.outcomes.pop() {
                return Err(e);
            }
        }
        return Err(McrouteError::ReplicationExhausted { attempts: attempted });
    }

    match quorum {
        WriteQuorum::Any => {
            if failed > 0 {
                tracing::debug!(
                    "Write acknowledged by {} of {} replicas",
                    attempted - failed,
                    attempted
                );
            }
            Ok(report)
        }
        WriteQuorum::All => {
            // A refusal on one member while another stored counts as a failure
            let failed = failed + report.dissenting();
            if failed == 0 {
                Ok(report)
            } else {
                Err(McrouteError::PartialReplicationFailure { failed, attempted })
            }
        }
    }
}

// =============================================================================
// Read Path
// =============================================================================

/// A finished replica read
#[derive(Debug)]
pub struct ReadOutcome {
    /// The hit, or the not-found reply of the last member that answered
    pub response: Response,
    /// Server that produced `response`
    pub server: usize,
    /// Members tried
    pub attempts: usize,
}

/// Try members in order until one returns a hit
///
/// Returns the hit, or a not-found reply when every member that answered
/// missed. `ReplicationExhausted` only when no member answered at all.
/// Errors other than server faults (a rejected request, say) end the walk.
pub fn read_with_fallback<E: Exchange + ?Sized>(
    exchange: &mut E,
    order: &[usize],
    request: &Request,
) -> Result<ReadOutcome> {
    let mut phase = ReplicaPhase::Dispatch;
    let mut cursor = 0;
    let mut attempts = 0;
    let mut hit: Option<(usize, Response)> = None;
    let mut miss: Option<(usize, Response)> = None;

    loop {
        phase = match phase {
            ReplicaPhase::Dispatch => {
                if order.is_empty() {
                    return Err(McrouteError::NoServerAvailable);
                }
                ReplicaPhase::AwaitPrimary
            }
            ReplicaPhase::AwaitPrimary => {
                let server = order[cursor];
                attempts += 1;
                match exchange_live(exchange, server, request) {
                    Ok(response) if response.status == Status::KeyNotFound => {
                        tracing::debug!("Replica {} missed", server);
                        miss = Some((server, response));
                        ReplicaPhase::FailoverToReplica
                    }
                    Ok(response) => {
                        hit = Some((server, response));
                        ReplicaPhase::Success
                    }
                    Err(e) if e.is_server_fault() => {
                        tracing::warn!("Replica {} read failed: {}", server, e);
                        ReplicaPhase::FailoverToReplica
                    }
                    Err(e) => return Err(e),
                }
            }
            ReplicaPhase::FailoverToReplica => {
                cursor += 1;
                if cursor < order.len() {
                    ReplicaPhase::AwaitPrimary
                } else {
                    ReplicaPhase::Reconcile
                }
            }
            ReplicaPhase::Success => ReplicaPhase::Reconcile,
            ReplicaPhase::Reconcile => ReplicaPhase::Done,
            ReplicaPhase::Done => {
                return match hit.or(miss) {
                    Some((server, response)) => Ok(ReadOutcome {
                        response,
                        server,
                        attempts,
                    }),
                    None => Err(McrouteError::ReplicationExhausted { attempts }),
                };
            }
        };
    }
}
