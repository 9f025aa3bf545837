//! Concurrency guarantees: linearization of conditional stores, atomic
//! arithmetic, and the deferred-completion contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use engine::{
    Cookie, EngineError, EngineHandle, EngineResult, EngineV1, ServerApi, Status, StoreOperation,
    create_instance,
};

const COOKIE: Cookie = Cookie::new(1);

struct Sink;

impl ServerApi for Sink {
    fn notify_io_complete(&self, _cookie: Cookie, _status: Status) {}
}

/// Records completions for the deferred-path tests.
#[derive(Default)]
struct Recorder {
    notifications: Mutex<Vec<(Cookie, Status)>>,
}

impl ServerApi for Recorder {
    fn notify_io_complete(&self, cookie: Cookie, status: Status) {
        self.notifications.lock().unwrap().push((cookie, status));
    }
}

impl Recorder {
    fn wait_for(&self, cookie: Cookie, timeout: Duration) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(&(_, status)) = self
                .notifications
                .lock()
                .unwrap()
                .iter()
                .find(|(c, _)| *c == cookie)
            {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

fn engine_with(config: &str) -> EngineHandle {
    let handle = create_instance(1, Arc::new(Sink)).expect("create_instance");
    handle.initialize(config).expect("initialize");
    handle
}

fn store_with(
    handle: &EngineHandle,
    cookie: Cookie,
    key: &[u8],
    value: &[u8],
    operation: StoreOperation,
    cas: u64,
) -> EngineResult<u64> {
    let mut item = handle.allocate(cookie, key, value.len(), 0, 0)?;
    item.value_mut().expect("detached item").copy_from_slice(value);
    if cas != 0 {
        item.set_cas(cas);
    }
    handle.store(cookie, &item, operation)
}

#[test]
fn concurrent_adds_admit_exactly_one() {
    let handle = engine_with("cache_size=4194304");
    let threads = 8;
    let barrier = Barrier::new(threads);
    let successes = AtomicU64::new(0);

    std::thread::scope(|scope| {
        for i in 0..threads {
            let handle = &handle;
            let barrier = &barrier;
            let successes = &successes;
            scope.spawn(move || {
                let value = format!("writer_{i}");
                barrier.wait();
                match store_with(
                    handle,
                    Cookie::new(i as u64),
                    b"contended",
                    value.as_bytes(),
                    StoreOperation::Add,
                    0,
                ) {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(EngineError::NotStored) | Err(EngineError::KeyExists) => {}
                    Err(e) => panic!("unexpected add outcome: {e:?}"),
                }
            });
        }
    });

    assert_eq!(successes.load(Ordering::Relaxed), 1);
    let item = handle.get(COOKIE, b"contended").expect("get");
    assert!(item.value().starts_with(b"writer_"));
    drop(item);
    handle.destroy();
}

#[test]
fn concurrent_cas_linearizes() {
    let handle = engine_with("cache_size=4194304");

    for round in 0..20 {
        let key = format!("cas_{round}");
        let cas = store_with(&handle, COOKIE, key.as_bytes(), b"base", StoreOperation::Set, 0)
            .expect("seed");

        let barrier = Barrier::new(2);
        let successes = AtomicU64::new(0);
        let conflicts = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for i in 0..2 {
                let handle = &handle;
                let key = key.as_bytes();
                let barrier = &barrier;
                let successes = &successes;
                let conflicts = &conflicts;
                scope.spawn(move || {
                    let value = format!("cas_writer_{i}");
                    barrier.wait();
                    match store_with(
                        handle,
                        Cookie::new(100 + i as u64),
                        key,
                        value.as_bytes(),
                        StoreOperation::Cas,
                        cas,
                    ) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(EngineError::KeyExists) => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected cas outcome: {e:?}"),
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::Relaxed), 1, "round {round}");
        assert_eq!(conflicts.load(Ordering::Relaxed), 1, "round {round}");
    }
    handle.destroy();
}

#[test]
fn concurrent_arithmetic_is_atomic() {
    let handle = engine_with("cache_size=4194304");
    store_with(&handle, COOKIE, b"counter", b"0", StoreOperation::Set, 0).expect("seed");

    let threads = 8;
    let per_thread = 500;

    std::thread::scope(|scope| {
        for i in 0..threads {
            let handle = &handle;
            scope.spawn(move || {
                let cookie = Cookie::new(200 + i as u64);
                for _ in 0..per_thread {
                    // Optimistic retries can exhaust under heavy
                    // contention; re-driving is always safe because a
                    // failed arithmetic commits nothing.
                    loop {
                        match handle.arithmetic(cookie, b"counter", true, false, 1, 0, 0) {
                            Ok(_) => break,
                            Err(EngineError::Failed) => continue,
                            Err(e) => panic!("unexpected arithmetic outcome: {e:?}"),
                        }
                    }
                }
            });
        }
    });

    let item = handle.get(COOKIE, b"counter").expect("get");
    let total: u64 = std::str::from_utf8(item.value()).unwrap().parse().unwrap();
    assert_eq!(total, threads as u64 * per_thread as u64);
    drop(item);
    handle.destroy();
}

#[test]
fn readers_always_see_consistent_snapshots() {
    let handle = engine_with("cache_size=8388608");
    let keys = 64;
    for k in 0..keys {
        let key = format!("key_{k}");
        let value = format!("key_{k}:0");
        store_with(&handle, COOKIE, key.as_bytes(), value.as_bytes(), StoreOperation::Set, 0)
            .expect("seed");
    }

    std::thread::scope(|scope| {
        // Writers rewrite values, keeping the key-derived prefix.
        for w in 0..4u64 {
            let handle = &handle;
            scope.spawn(move || {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(w);
                for round in 0..2000 {
                    let k = rng.gen_range(0..keys);
                    let key = format!("key_{k}");
                    let value = format!("key_{k}:{round}");
                    store_with(
                        handle,
                        Cookie::new(300 + w),
                        key.as_bytes(),
                        value.as_bytes(),
                        StoreOperation::Set,
                        0,
                    )
                    .expect("set");
                }
            });
        }
        // Readers verify every observed value belongs to its key.
        for r in 0..4u64 {
            let handle = &handle;
            scope.spawn(move || {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(1000 + r);
                for _ in 0..2000 {
                    let k = rng.gen_range(0..keys);
                    let key = format!("key_{k}");
                    if let Ok(item) = handle.get(Cookie::new(400 + r), key.as_bytes()) {
                        let value = item.value().to_vec();
                        let prefix = format!("key_{k}:");
                        assert!(
                            value.starts_with(prefix.as_bytes()),
                            "torn read for {key}: {:?}",
                            String::from_utf8_lossy(&value)
                        );
                    }
                }
            });
        }
    });
    handle.destroy();
}

#[test]
fn pinned_cache_defers_and_notifies() {
    let recorder = Arc::new(Recorder::default());
    let server: Arc<dyn ServerApi> = recorder.clone();
    let handle = create_instance(1, server).expect("create");
    handle
        .initialize("cache_size=1048576;item_size_max=4096")
        .expect("initialize");

    let value = vec![b'p'; 1000];
    let mut guards = Vec::new();
    let mut deferred_cookie = None;

    // Fill the cache while pinning every stored item; eventually an
    // allocation finds nothing but pinned candidates and defers.
    for i in 0..2000u64 {
        let key = format!("pin_{i:04}");
        let cookie = Cookie::new(10_000 + i);
        match store_with(&handle, cookie, key.as_bytes(), &value, StoreOperation::Set, 0) {
            Ok(_) => {
                guards.push(handle.get(cookie, key.as_bytes()).expect("pin"));
            }
            Err(EngineError::WouldBlock) => {
                deferred_cookie = Some(cookie);
                break;
            }
            Err(e) => panic!("unexpected store outcome: {e:?}"),
        }
    }
    let cookie = deferred_cookie.expect("expected a deferred operation");

    // Nothing can complete while every candidate is pinned.
    assert!(recorder.wait_for(cookie, Duration::from_millis(50)).is_none());

    // Unpin and the maintenance thread finishes the reclaim.
    guards.clear();
    let status = recorder
        .wait_for(cookie, Duration::from_secs(3))
        .expect("deferred completion never arrived");
    assert_eq!(status, Status::Success);

    // The re-driven request now succeeds synchronously.
    let key = b"pin_redrive";
    store_with(&handle, cookie, key, &value, StoreOperation::Set, 0).expect("re-drive");
    assert!(handle.get(cookie, key).is_ok());

    // Exactly one notification for the cookie.
    let count = recorder
        .notifications
        .lock()
        .unwrap()
        .iter()
        .filter(|(c, _)| *c == cookie)
        .count();
    assert_eq!(count, 1);
    handle.destroy();
}

#[test]
fn forgotten_cookie_is_never_notified() {
    let recorder = Arc::new(Recorder::default());
    let server: Arc<dyn ServerApi> = recorder.clone();
    let handle = create_instance(1, server).expect("create");
    handle
        .initialize("cache_size=1048576;item_size_max=4096")
        .expect("initialize");

    let value = vec![b'q'; 1000];
    let mut guards = Vec::new();
    let mut deferred_cookie = None;

    for i in 0..2000u64 {
        let key = format!("fgt_{i:04}");
        let cookie = Cookie::new(20_000 + i);
        match store_with(&handle, cookie, key.as_bytes(), &value, StoreOperation::Set, 0) {
            Ok(_) => guards.push(handle.get(cookie, key.as_bytes()).expect("pin")),
            Err(EngineError::WouldBlock) => {
                deferred_cookie = Some(cookie);
                break;
            }
            Err(e) => panic!("unexpected store outcome: {e:?}"),
        }
    }
    let cookie = deferred_cookie.expect("expected a deferred operation");

    // The connection goes away before the reclaim can finish.
    handle.forget_cookie(cookie);
    guards.clear();

    assert!(
        recorder.wait_for(cookie, Duration::from_millis(800)).is_none(),
        "cancelled cookie was notified"
    );
    handle.destroy();
}

#[test]
fn table_growth_under_concurrent_stores() {
    let handle = engine_with("cache_size=8388608;hash_power=4");

    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let handle = &handle;
            scope.spawn(move || {
                for i in 0..500 {
                    let key = format!("grow_{t}_{i}");
                    store_with(
                        handle,
                        Cookie::new(500 + t),
                        key.as_bytes(),
                        b"v",
                        StoreOperation::Set,
                        0,
                    )
                    .expect("set");
                }
            });
        }
    });

    // Everything inserted during growth is still reachable.
    for t in 0..4u64 {
        for i in 0..500 {
            let key = format!("grow_{t}_{i}");
            assert!(
                handle.get(COOKIE, key.as_bytes()).is_ok(),
                "lost {key} during table growth"
            );
        }
    }
    handle.destroy();
}
