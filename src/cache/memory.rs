//! In-memory cache backend.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::cache::transactions::TransactionManager;
use crate::cache::CacheBackend;
use crate::engine::NodeHash;
use crate::errors::{Error, Result};
use crate::storage::{Locker, ThreadLocker};
use crate::value::Value;

/// A process-local cache: a mutex-guarded map accessed only through the
/// transaction protocol.
pub struct MemoryCache {
    entries: Mutex<AHashMap<String, Value>>,
    transactions: TransactionManager,
}

impl MemoryCache {
    /// `size` bounds are not supported; pass `None`.
    pub fn new(size: Option<usize>) -> Result<Self> {
        if size.is_some() {
            return Err(Error::Backend(
                "size-bounded memory cache is not supported".into(),
            ));
        }
        Ok(Self::with_locker(Arc::new(ThreadLocker::new())))
    }

    pub fn with_locker(locker: Arc<dyn Locker>) -> Self {
        MemoryCache {
            entries: Mutex::new(AHashMap::new()),
            transactions: TransactionManager::new(locker),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

impl CacheBackend for MemoryCache {
    fn contains(&self, key: &NodeHash) -> Result<bool> {
        Ok(self.has(&key.hex()))
    }

    fn get(&self, key: &NodeHash) -> Result<Value> {
        let key = key.hex();
        let token = self
            .transactions
            .reserve_write_or_read(&key, |k| Ok(self.has(k)))?;
        if !token.is_read() {
            // the entry vanished between the probe and the reservation
            self.transactions.fail(token)?;
            return Err(Error::Backend(format!("no cached entry for key {key}")));
        }
        self.transactions.release_read(token, |k| {
            self.entries
                .lock()
                .unwrap()
                .get(k)
                .cloned()
                .ok_or_else(|| Error::Backend(format!("entry vanished for key {k}")))
        })
    }

    fn set(&self, key: &NodeHash, value: Value) -> Result<()> {
        let key = key.hex();
        let token = self
            .transactions
            .reserve_write_or_read(&key, |k| Ok(self.has(k)))?;
        if token.is_read() {
            // someone else finished first; the value is already there
            return self.transactions.release_read(token, |_| Ok(()));
        }
        self.transactions.release_write(token, value, |k, v| {
            self.entries.lock().unwrap().insert(k.to_string(), v);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(payload: i64) -> NodeHash {
        NodeHash::from_leaf(Value::from(payload))
    }

    #[test]
    fn test_round_trip() {
        let cache = MemoryCache::new(None).unwrap();
        assert!(!cache.contains(&key(1)).unwrap());
        cache.set(&key(1), Value::from("stored")).unwrap();
        assert!(cache.contains(&key(1)).unwrap());
        assert_eq!(cache.get(&key(1)).unwrap(), Value::from("stored"));
    }

    #[test]
    fn test_get_on_absent_key_fails() {
        let cache = MemoryCache::new(None).unwrap();
        assert!(cache.get(&key(9)).is_err());
    }

    #[test]
    fn test_double_set_keeps_the_first_value() {
        let cache = MemoryCache::new(None).unwrap();
        cache.set(&key(1), Value::from("first")).unwrap();
        cache.set(&key(1), Value::from("second")).unwrap();
        assert_eq!(cache.get(&key(1)).unwrap(), Value::from("first"));
    }

    #[test]
    fn test_size_bound_is_rejected() {
        assert!(MemoryCache::new(Some(128)).is_err());
    }
}
