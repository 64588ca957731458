//! Operation Tests
//!
//! Storage, retrieval, counter and server-wide commands.

use mcroute::client::StoreOptions;
use mcroute::network::{LoopbackPool, LOOPBACK_VERSION};
use mcroute::protocol::Status;
use mcroute::McrouteError;

use super::{client_for, owner};

// =============================================================================
// Get/Set Tests
// =============================================================================

#[test]
fn test_set_then_get() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b.prefix_key("app:"));

    let options = StoreOptions {
        expiration: 0,
        flags: 17,
        cas: 0,
    };
    client.set(b"user:1", b"alice", options).unwrap();

    let item = client.get(b"user:1").unwrap().unwrap();
    assert_eq!(item.key.as_ref(), b"user:1");
    assert_eq!(item.value.as_ref(), b"alice");
    assert_eq!(item.flags, 17);
    assert_ne!(item.cas, 0);

    // Stored under the namespaced key, on the owning node only
    let primary = owner(&client, b"user:1");
    assert_eq!(pool.holders(b"app:user:1"), vec![primary]);
}

#[test]
fn test_get_miss() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);
    assert!(client.get(b"missing").unwrap().is_none());
}

#[test]
fn test_mget() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b);

    client.set(b"a", b"1", StoreOptions::default()).unwrap();
    client.set(b"c", b"3", StoreOptions::default()).unwrap();

    let items = client.mget(&[&b"a"[..], b"b", b"c"]).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[&b"a"[..]].value.as_ref(), b"1");
    assert_eq!(items[&b"c"[..]].value.as_ref(), b"3");
    assert!(!items.contains_key(&b"b"[..]));
}

#[test]
fn test_get_len() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b.prefix_key("app:"));

    let options = StoreOptions {
        expiration: 0,
        flags: 9,
        cas: 0,
    };
    client.set(b"greeting", b"hello world", options).unwrap();

    let item = client.get_len(b"greeting", 5).unwrap().unwrap();
    assert_eq!(item.value.as_ref(), b"hello");
    assert_eq!(item.flags, 9);

    // Longer than the value: returned whole
    let item = client.get_len(b"greeting", 64).unwrap().unwrap();
    assert_eq!(item.value.as_ref(), b"hello world");

    assert!(client.get_len(b"missing", 5).unwrap().is_none());

    // The stored value is untouched
    assert_eq!(client.get(b"greeting").unwrap().unwrap().value.as_ref(), b"hello world");
}

#[test]
fn test_mget_len() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b);

    client.set(b"a", b"abcdef", StoreOptions::default()).unwrap();
    client.set(b"c", b"xy", StoreOptions::default()).unwrap();

    let items = client.mget_len(&[&b"a"[..], b"b", b"c"], 3).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[&b"a"[..]].value.as_ref(), b"abc");
    assert_eq!(items[&b"c"[..]].value.as_ref(), b"xy");

    let empty = client.mget_len(&[&b"a"[..]], 0).unwrap();
    assert!(empty[&b"a"[..]].value.is_empty());
}

#[test]
fn test_by_key_colocates() {
    let pool = LoopbackPool::new(4);
    let mut client = client_for(&pool, |b| b);

    for key in [&b"profile"[..], b"settings", b"avatar"] {
        client
            .set_by_key(b"user:9", key, b"v", StoreOptions::default())
            .unwrap();
    }

    let group_owner = owner(&client, b"user:9");
    for key in [&b"profile"[..], b"settings", b"avatar"] {
        assert_eq!(pool.holders(key), vec![group_owner]);
    }

    let items = client
        .mget_by_key(b"user:9", &[&b"profile"[..], b"avatar"])
        .unwrap();
    assert_eq!(items.len(), 2);
    assert!(client.get_by_key(b"user:9", b"settings").unwrap().is_some());
}

#[test]
fn test_hash_with_prefix_key() {
    let pool = LoopbackPool::new(5);
    let client = client_for(&pool, |b| b.prefix_key("ns:").hash_with_prefix_key(true));

    for i in 0..50 {
        let key = format!("k{}", i);
        let prefixed = format!("ns:{}", key);
        assert_eq!(
            client.server_for_key(key.as_bytes()).unwrap(),
            client.selector().select(prefixed.as_bytes()).unwrap()
        );
    }
}

// =============================================================================
// Conditional Store Tests
// =============================================================================

#[test]
fn test_add_and_replace() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    let result = client.replace(b"k", b"v", StoreOptions::default());
    assert!(matches!(result, Err(McrouteError::Server(Status::ItemNotStored))));

    client.add(b"k", b"v1", StoreOptions::default()).unwrap();
    let result = client.add(b"k", b"v2", StoreOptions::default());
    assert!(matches!(result, Err(McrouteError::Server(Status::ItemNotStored))));

    client.replace(b"k", b"v3", StoreOptions::default()).unwrap();
    assert_eq!(client.get(b"k").unwrap().unwrap().value.as_ref(), b"v3");
}

#[test]
fn test_cas() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    client.set(b"k", b"v1", StoreOptions::default()).unwrap();
    let cas = client.get(b"k").unwrap().unwrap().cas;

    let result = client.cas(b"k", b"stale", 0, 0, cas + 100);
    assert!(matches!(result, Err(McrouteError::Server(Status::KeyExists))));

    client.cas(b"k", b"v2", 0, 0, cas).unwrap();
    assert_eq!(client.get(b"k").unwrap().unwrap().value.as_ref(), b"v2");
}

#[test]
fn test_append_and_prepend() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    assert!(client.append(b"log", b"x").is_err());

    client.set(b"log", b"mid", StoreOptions::default()).unwrap();
    client.append(b"log", b"-end").unwrap();
    client.prepend(b"log", b"start-").unwrap();
    assert_eq!(
        client.get(b"log").unwrap().unwrap().value.as_ref(),
        b"start-mid-end"
    );
}

// =============================================================================
// Delete/Touch Tests
// =============================================================================

#[test]
fn test_delete() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    client.set(b"k", b"v", StoreOptions::default()).unwrap();
    assert!(client.delete(b"k").unwrap());
    assert!(!client.delete(b"k").unwrap());
    assert!(client.get(b"k").unwrap().is_none());
}

#[test]
fn test_touch() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b.prefix_key("ns:"));

    assert!(!client.touch(b"foo", 60).unwrap());

    client.set(b"foo", b"bar", StoreOptions::expiring(10)).unwrap();
    assert!(client.touch(b"foo", 60).unwrap());

    let primary = owner(&client, b"foo");
    assert_eq!(pool.node(primary).item(b"ns:foo").unwrap().expiration, 60);
    assert_eq!(client.last_result().unwrap().status, Status::NoError);
}

#[test]
fn test_touch_by_key() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b);

    client
        .set_by_key(b"group", b"member", b"v", StoreOptions::default())
        .unwrap();
    assert!(client.touch_by_key(b"group", b"member", 99).unwrap());

    let node = pool.node(owner(&client, b"group"));
    assert_eq!(node.item(b"member").unwrap().expiration, 99);
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_increment_decrement() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    assert_eq!(client.increment(b"hits", 1).unwrap(), None);

    client.set(b"hits", b"10", StoreOptions::default()).unwrap();
    assert_eq!(client.increment(b"hits", 5).unwrap(), Some(15));
    assert_eq!(client.decrement(b"hits", 20).unwrap(), Some(0));
}

#[test]
fn test_increment_with_initial() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b);

    assert_eq!(client.increment_with_initial(b"c", 1, 100, 0).unwrap(), Some(100));
    assert_eq!(client.increment_with_initial(b"c", 1, 100, 0).unwrap(), Some(101));
    assert_eq!(client.decrement_with_initial(b"d", 1, 7, 0).unwrap(), Some(7));
}

#[test]
fn test_increment_non_numeric() {
    let pool = LoopbackPool::new(1);
    let mut client = client_for(&pool, |b| b);

    client.set(b"word", b"abc", StoreOptions::default()).unwrap();
    let result = client.increment(b"word", 1);
    assert!(matches!(result, Err(McrouteError::Server(Status::NonNumeric))));
}

// =============================================================================
// Server-wide Tests
// =============================================================================

#[test]
fn test_flush_all() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b);

    for i in 0..30 {
        let key = format!("k{}", i);
        client.set(key.as_bytes(), b"v", StoreOptions::default()).unwrap();
    }
    client.flush_all(0).unwrap();
    assert!((0..3).all(|i| pool.node(i).is_empty()));
}

#[test]
fn test_version() {
    let pool = LoopbackPool::new(3);
    let mut client = client_for(&pool, |b| b);

    let versions = client.version();
    assert_eq!(versions.len(), 3);
    for (i, (addr, version)) in versions.into_iter().enumerate() {
        assert_eq!(addr, pool.servers()[i]);
        assert_eq!(version.unwrap(), LOOPBACK_VERSION);
    }
}

// =============================================================================
// Text Protocol Tests
// =============================================================================

#[test]
fn test_text_protocol_operations() {
    let pool = LoopbackPool::new(2);
    let mut client = client_for(&pool, |b| b.binary_protocol(false).prefix_key("t:"));

    client.set(b"k", b"hello", StoreOptions::default()).unwrap();
    assert_eq!(client.get(b"k").unwrap().unwrap().value.as_ref(), b"hello");

    client.set(b"n", b"1", StoreOptions::default()).unwrap();
    assert_eq!(client.increment(b"n", 2).unwrap(), Some(3));
    assert_eq!(client.increment(b"missing", 2).unwrap(), None);

    assert!(client.delete(b"k").unwrap());
    assert!(client.get(b"k").unwrap().is_none());
    assert_eq!(pool.holders(b"t:n").len(), 1);
}
