use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hashflow::{KvLocker, Locker, MemoryKvStore, ThreadLocker, TransactionManager};

/// Hammer one transaction manager from many threads and record every
/// overlap violation: a second concurrent writer, or a reader observing
/// an active writer.
fn hammer(locker: Arc<dyn Locker>) -> (usize, usize) {
    let manager = Arc::new(TransactionManager::with_limits(
        locker,
        Duration::from_millis(1),
        5_000,
    ));
    let store: Arc<Mutex<HashMap<String, i64>>> = Arc::new(Mutex::new(HashMap::new()));
    let writers_active = Arc::new(AtomicI64::new(0));
    let readers_active = Arc::new(AtomicI64::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let manager = manager.clone();
            let store = store.clone();
            let writers_active = writers_active.clone();
            let readers_active = readers_active.clone();
            let violations = violations.clone();
            let writes = writes.clone();
            thread::spawn(move || {
                for round in 0..40 {
                    let key = format!("key-{}", (worker + round) % 4);
                    let token = manager
                        .reserve_write_or_read(&key, |k| {
                            Ok(store.lock().unwrap().contains_key(k))
                        })
                        .unwrap();
                    if token.is_read() {
                        manager
                            .release_read(token, |k| {
                                readers_active.fetch_add(1, Ordering::SeqCst);
                                if writers_active.load(Ordering::SeqCst) > 0 {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                                thread::sleep(Duration::from_micros(50));
                                let value = store.lock().unwrap().get(k).copied();
                                readers_active.fetch_sub(1, Ordering::SeqCst);
                                assert!(value.is_some());
                                Ok(())
                            })
                            .unwrap();
                    } else {
                        manager
                            .release_write(token, worker as i64, |k, v| {
                                if writers_active.fetch_add(1, Ordering::SeqCst) > 0 {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                                if readers_active.load(Ordering::SeqCst) > 0 {
                                    violations.fetch_add(1, Ordering::SeqCst);
                                }
                                thread::sleep(Duration::from_micros(50));
                                store.lock().unwrap().insert(k.to_string(), v);
                                writers_active.fetch_sub(1, Ordering::SeqCst);
                                writes.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    (
        violations.load(Ordering::SeqCst),
        writes.load(Ordering::SeqCst),
    )
}

#[test]
fn test_thread_locker_serializes_writers() {
    let (violations, writes) = hammer(Arc::new(ThreadLocker::new()));
    assert_eq!(violations, 0);
    // exactly one write wins per key
    assert_eq!(writes, 4);
}

#[test]
fn test_kv_locker_serializes_writers() {
    let locker = KvLocker::new(MemoryKvStore::new(), "hammer").unwrap();
    let (violations, writes) = hammer(Arc::new(locker));
    assert_eq!(violations, 0);
    assert_eq!(writes, 4);
}
