//! Failure Tests
//!
//! Connection resets, correlation after failures and server ejection.

use std::time::Instant;

use mcroute::client::StoreOptions;
use mcroute::network::LoopbackPool;
use mcroute::replication::WriteQuorum;
use mcroute::McrouteError;

use super::{client_for, owner};

// =============================================================================
// Send/Receive Failure Tests
// =============================================================================

#[test]
fn test_send_failure_resets_connection() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b.auto_eject_hosts(false));

    client.set(b"k", b"v", StoreOptions::default()).unwrap();
    assert!(client.server(0).unwrap().is_connected());

    pool.node(0).set_fail_sends(true);
    let result = client.touch(b"k", 30);
    assert!(matches!(result, Err(McrouteError::WriteFailure { .. })));

    let server = client.server(0).unwrap();
    assert!(!server.is_connected());
    assert_eq!(server.reset_count(), 1);
    assert_eq!(server.failure_count(), 1);
}

#[test]
fn test_stale_reply_is_discarded_with_connection() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b.auto_eject_hosts(false));
    let node = pool.node(0);

    client.set(b"k", b"v1", StoreOptions::default()).unwrap();

    // The node answers a request whose send failed
    node.set_fail_sends(true);
    node.set_stale_reply_on_failure(true);
    let result = client.touch(b"k", 30);
    assert!(matches!(result, Err(McrouteError::WriteFailure { .. })));

    node.set_fail_sends(false);
    let item = client.get(b"k").unwrap().unwrap();
    assert_eq!(item.value.as_ref(), b"v1");

    // One connection before the failure, one after
    assert_eq!(node.stats().connections, 2);
    assert!(client.server(0).unwrap().is_connected());
    assert_eq!(client.server(0).unwrap().failure_count(), 0);
}

#[test]
fn test_connect_failure_is_write_failure() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b);

    pool.node(0).set_fail_connect(true);
    match client.get(b"k") {
        Err(McrouteError::WriteFailure { server, .. }) => {
            assert_eq!(server, "loopback-0:11211");
        }
        other => panic!("Expected write failure, got {:?}", other),
    }
    assert_eq!(pool.total_sends(), 0);
}

#[test]
fn test_corrupt_opaque_is_protocol_error() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b.auto_eject_hosts(false));
    let node = pool.node(0);

    node.set_corrupt_opaque(true);
    let result = client.set(b"k", b"v", StoreOptions::default());
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
    assert!(!client.server(0).unwrap().is_connected());

    node.set_corrupt_opaque(false);
    client.set(b"k", b"v", StoreOptions::default()).unwrap();
}

#[test]
fn test_receive_timeout_is_protocol_error() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b);

    pool.node(0).set_fail_recvs(true);
    let result = client.get(b"k");
    assert!(matches!(result, Err(McrouteError::ProtocolError(_))));
    assert_eq!(client.server(0).unwrap().reset_count(), 1);
}

// =============================================================================
// Liveness Tests
// =============================================================================

#[test]
fn test_failing_server_is_ejected() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b.server_failure_limit(1).retry_timeout_ms(60_000));

    let key = b"ejected-key";
    let primary = owner(&client, key);
    pool.node(primary).set_unreachable(true);

    let result = client.set(key, b"v", StoreOptions::default());
    assert!(matches!(result, Err(McrouteError::WriteFailure { .. })));
    assert!(!client.server(primary).unwrap().is_available(Instant::now()));

    // The key now lands on a live server
    let fallback = owner(&client, key);
    assert_ne!(fallback, primary);
    client.set(key, b"v", StoreOptions::default()).unwrap();
    assert_eq!(pool.holders(key), vec![fallback]);

    pool.node(primary).set_unreachable(false);
    client.mark_server_up(primary).unwrap();
    assert_eq!(owner(&client, key), primary);
}

#[test]
fn test_failure_limit_counts_consecutive_failures() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b.server_failure_limit(3));

    let key = b"counted";
    let primary = owner(&client, key);
    pool.node(primary).set_fail_recvs(true);

    for _ in 0..2 {
        assert!(client.get(key).is_err());
    }
    assert!(client.server(primary).unwrap().is_available(Instant::now()));

    assert!(client.get(key).is_err());
    assert!(!client.server(primary).unwrap().is_available(Instant::now()));
}

#[test]
fn test_mark_server_down_and_up() {
    let pool = LoopbackPool::new(4);
    let mut client = client_for(&pool, |b| b.retry_timeout_ms(60_000));

    let key = b"movable";
    let primary = owner(&client, key);
    client.mark_server_down(primary).unwrap();
    assert_ne!(owner(&client, key), primary);

    client.mark_server_up(primary).unwrap();
    assert_eq!(owner(&client, key), primary);

    assert!(matches!(client.mark_server_down(9), Err(McrouteError::Config(_))));
}

#[test]
fn test_all_servers_down() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b.retry_timeout_ms(60_000));

    client.mark_server_down(0).unwrap();
    client.mark_server_down(1).unwrap();
    assert!(matches!(client.get(b"k"), Err(McrouteError::NoServerAvailable)));
    assert_eq!(pool.total_sends(), 0);
}

#[test]
fn test_single_server_used_while_down() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b.retry_timeout_ms(60_000));

    client.mark_server_down(0).unwrap();
    client.set(b"k", b"v", StoreOptions::default()).unwrap();
    assert!(pool.node(0).contains(b"k"));
}

#[test]
fn test_replica_marked_down_is_skipped_and_stays_down() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b.replicas(2).retry_timeout_ms(60_000));

    let key = b"replicated";
    let primary = owner(&client, key);
    let down = (primary + 1) % 3;
    client.mark_server_down(down).unwrap();

    client.set(key, b"v", StoreOptions::default()).unwrap();
    assert_eq!(pool.node(down).stats().sends, 0);
    assert!(!pool.node(down).contains(key));
    assert!(!client.server(down).unwrap().is_available(Instant::now()));

    assert_eq!(client.get(key).unwrap().unwrap().value.as_ref(), b"v");
    assert!(client.delete(key).unwrap());
    assert_eq!(pool.node(down).stats().connections, 0);
    assert!(!client.server(down).unwrap().is_available(Instant::now()));
}

#[test]
fn test_server_wide_commands_skip_down_servers() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b.retry_timeout_ms(60_000));
    client.mark_server_down(1).unwrap();

    let versions = client.version();
    assert!(versions[0].1.is_ok());
    assert!(matches!(versions[1].1, Err(McrouteError::ServerDown { .. })));

    let result = client.flush_all(0);
    assert!(matches!(result, Err(McrouteError::ServerDown { .. })));
    assert_eq!(pool.node(1).stats().sends, 0);
    assert!(!client.server(1).unwrap().is_available(Instant::now()));
}

#[test]
fn test_quorum_all_rejects_refused_replica() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b.replicas(1).write_quorum(WriteQuorum::All));

    let key = b"contested";
    let replica = 1 - owner(&client, key);
    pool.node(replica).insert(key, b"old");

    let result = client.add(key, b"new", StoreOptions::default());
    assert!(matches!(
        result,
        Err(McrouteError::PartialReplicationFailure {
            failed: 1,
            attempted: 2
        })
    ));

    // Agreeing replicas still satisfy the quorum
    client.set(key, b"same", StoreOptions::default()).unwrap();
    assert_eq!(pool.holders(key), vec![0, 1]);
}
