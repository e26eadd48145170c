//! End-to-end scenarios over `VsiStore`, exercised at the store level
//! rather than at a single module.

use std::sync::Arc;
use std::time::Duration;
use vsi_core::error::VsiError;
use vsi_core::{StoreConfig, VsiStore};

fn test_config(tag: &str) -> StoreConfig {
    let dir = std::env::temp_dir().join(format!("vsi-store-tests-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    StoreConfig {
        user_region_path: dir.join("user.shm"),
        sys_region_path: dir.join("sys.shm"),
        user_region_size: 4 * 1024 * 1024,
        sys_region_size: 1024 * 1024,
        btree_min_degree: 8,
        sys_node_count: 512,
    }
}

#[test]
fn insert_then_fetch_round_trips_one_signal() {
    let store = VsiStore::open(&test_config("roundtrip"), false).unwrap();
    store.insert(1, 100, b"hello").unwrap();
    let body = store.fetch(1, 100, 64, false).unwrap();
    assert_eq!(body, b"hello");
}

#[test]
fn fetch_on_empty_list_without_wait_returns_no_data() {
    let store = VsiStore::open(&test_config("nodata"), false).unwrap();
    let err = store.fetch(7, 7, 64, false).unwrap_err();
    assert!(matches!(err, VsiError::NoData { domain: 7, key: 7 }));
}

#[test]
fn fetch_preserves_fifo_order() {
    let store = VsiStore::open(&test_config("fifo"), false).unwrap();
    store.insert(2, 5, b"one").unwrap();
    store.insert(2, 5, b"two").unwrap();
    store.insert(2, 5, b"three").unwrap();

    assert_eq!(store.fetch(2, 5, 64, false).unwrap(), b"one");
    assert_eq!(store.fetch(2, 5, 64, false).unwrap(), b"two");
    assert_eq!(store.fetch(2, 5, 64, false).unwrap(), b"three");
    assert!(store.fetch(2, 5, 64, false).is_err());
}

#[test]
fn fetch_newest_reads_tail_without_removing() {
    let store = VsiStore::open(&test_config("newest"), false).unwrap();
    store.insert(3, 9, b"old").unwrap();
    store.insert(3, 9, b"new").unwrap();

    assert_eq!(store.fetch_newest(3, 9, 64, false).unwrap(), b"new");
    assert_eq!(store.fetch_newest(3, 9, 64, false).unwrap(), b"new");
    assert_eq!(store.signal_count(3, 9), 2);

    assert_eq!(store.fetch(3, 9, 64, false).unwrap(), b"old");
    assert_eq!(store.fetch(3, 9, 64, false).unwrap(), b"new");
}

#[test]
fn flush_discards_every_queued_signal() {
    let store = VsiStore::open(&test_config("flush"), false).unwrap();
    store.insert(4, 1, b"a").unwrap();
    store.insert(4, 1, b"b").unwrap();
    store.flush(4, 1).unwrap();
    assert_eq!(store.signal_count(4, 1), 0);
    assert!(store.fetch(4, 1, 64, false).is_err());
}

/// A single `post` wakes every blocked waiter, not just one. Two readers
/// block on an empty list, one insert arrives, and both must return it —
/// `fetch_newest` never removes the record, so there is nothing for the
/// two waiters to race over.
#[test]
fn blocking_fetch_newest_wakes_every_waiter_from_one_insert() {
    let store = Arc::new(VsiStore::open(&test_config("broadcast"), false).unwrap());
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || store.fetch_newest(5, 2, 64, true).unwrap())
        })
        .collect();

    std::thread::sleep(Duration::from_millis(100));
    store.insert(5, 2, b"X").unwrap();

    let results: Vec<Vec<u8>> = waiters.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|r| r == b"X"));
}

/// A single `post` also wakes multiple `fetch` waiters blocked on the same
/// list; only one of them claims the record (the other legitimately
/// observes the list empty again and keeps waiting), so this checks that
/// none of them is left stuck forever rather than asserting who wins.
#[test]
fn blocking_fetch_wakes_every_waiter_though_only_one_claims_the_record() {
    let store = Arc::new(VsiStore::open(&test_config("wait"), false).unwrap());
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || store.fetch(5, 2, 64, true).unwrap())
        })
        .collect();

    std::thread::sleep(Duration::from_millis(100));
    for _ in 0..3 {
        store.insert(5, 2, b"woke").unwrap();
    }

    let results: Vec<Vec<u8>> = waiters.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().all(|r| r == b"woke"));
}

/// A consumer blocked in `fetch` must not hang forever once `flush` runs.
///
/// `flush` on an already-empty list only re-releases a waiter so it can
/// re-check the (still empty) list and loop — it cannot hand back a value
/// on its own — so this still needs the trailing `insert` to observe a
/// returned value. The join is bounded by a channel with `recv_timeout`
/// rather than a bare `join().unwrap()` so a regression (a `flush` that
/// wakes the condition variable without also unblocking the waiter's
/// underlying wait condition) fails this test instead of hanging the
/// whole suite; `BroadcastSemaphore::wake_all` has its own dedicated,
/// `flush`-independent regression test in `locks.rs`.
#[test]
fn flush_wakes_a_blocked_waiter() {
    let store = Arc::new(VsiStore::open(&test_config("flushwake"), false).unwrap());
    let (tx, rx) = std::sync::mpsc::channel();
    {
        let store = store.clone();
        std::thread::spawn(move || {
            let result = store.fetch(6, 3, 64, true);
            let _ = tx.send(result);
        });
    }

    std::thread::sleep(Duration::from_millis(100));
    store.flush(6, 3).unwrap();
    store.insert(6, 3, b"after-flush").unwrap();

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("flush followed by insert must unblock the waiter");
    assert_eq!(result.unwrap(), b"after-flush");
}

/// `create_new = true` discards whatever was there before, even a
/// previously populated store.
#[test]
fn open_with_create_new_discards_prior_contents() {
    let config = test_config("createnew");
    {
        let store = VsiStore::open(&config, false).unwrap();
        store.insert(8, 1, b"stale").unwrap();
    }

    let store = VsiStore::open(&config, true).unwrap();
    assert!(store.fetch(8, 1, 64, false).is_err());
}

#[test]
fn registry_entries_lists_every_domain_key_pair_with_its_depth() {
    let store = VsiStore::open(&test_config("registry"), false).unwrap();
    store.insert(9, 1, b"a").unwrap();
    store.insert(9, 1, b"b").unwrap();
    store.insert(9, 2, b"c").unwrap();

    let mut entries = store.registry_entries();
    entries.sort();
    assert_eq!(entries, vec![(9, 1, 2), (9, 2, 1)]);
}

#[test]
fn close_flushes_without_error() {
    let store = VsiStore::open(&test_config("close"), false).unwrap();
    store.insert(10, 1, b"a").unwrap();
    store.close().unwrap();
}
