//! On-disk cache backend.
//!
//! Values are serialized through a pluggable [`Serializer`] and stored
//! under the hex digest of their hash, sharded by the first two digest
//! characters. Concurrent access goes through the transaction protocol,
//! so a shared-KV locker makes this safe across processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::transactions::TransactionManager;
use crate::cache::CacheBackend;
use crate::engine::NodeHash;
use crate::errors::{Error, Result};
use crate::storage::Locker;
use crate::value::Value;

/// Symmetric value <-> bytes codec. Round trips must be deterministic;
/// canonical form across versions is not required.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON codec over the crate's value model.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A directory of serialized values keyed by hex digests.
pub struct DiskCache {
    root: PathBuf,
    serializer: Box<dyn Serializer>,
    transactions: TransactionManager,
}

impl DiskCache {
    pub fn new(
        root: impl Into<PathBuf>,
        serializer: impl Serializer + 'static,
        locker: Arc<dyn Locker>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DiskCache {
            root,
            serializer: Box::new(serializer),
            transactions: TransactionManager::new(locker),
        })
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(&digest[..2]).join(&digest[2..])
    }

    fn exists(&self, digest: &str) -> bool {
        self.path_for(digest).exists()
    }

    fn read_value(&self, path: &Path) -> Result<Value> {
        let bytes = fs::read(path)?;
        self.serializer.deserialize(&bytes)
    }
}

impl CacheBackend for DiskCache {
    fn contains(&self, key: &NodeHash) -> Result<bool> {
        Ok(self.exists(&key.hex()))
    }

    fn get(&self, key: &NodeHash) -> Result<Value> {
        let digest = key.hex();
        let token = self
            .transactions
            .reserve_write_or_read(&digest, |d| Ok(self.exists(d)))?;
        if !token.is_read() {
            self.transactions.fail(token)?;
            return Err(Error::Backend(format!("no cached entry for key {digest}")));
        }
        self.transactions
            .release_read(token, |d| self.read_value(&self.path_for(d)))
    }

    fn set(&self, key: &NodeHash, value: Value) -> Result<()> {
        let digest = key.hex();
        let token = self
            .transactions
            .reserve_write_or_read(&digest, |d| Ok(self.exists(d)))?;
        if token.is_read() {
            return self.transactions.release_read(token, |_| Ok(()));
        }
        self.transactions.release_write(token, value, |d, v| {
            let path = self.path_for(d);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = self.serializer.serialize(&v)?;
            // write to a sibling first so readers never observe a torn file
            let staging = path.with_extension("tmp");
            fs::write(&staging, bytes)?;
            fs::rename(&staging, &path)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ThreadLocker;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> DiskCache {
        DiskCache::new(
            dir.path().join("cache"),
            JsonSerializer,
            Arc::new(ThreadLocker::new()),
        )
        .unwrap()
    }

    fn key(payload: &str) -> NodeHash {
        NodeHash::from_leaf(Value::from(payload))
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let value = Value::map(vec![(Value::from("n"), Value::from(3))]);
        cache.set(&key("a"), value.clone()).unwrap();
        assert!(cache.contains(&key("a")).unwrap());
        assert_eq!(cache.get(&key("a")).unwrap(), value);
    }

    #[test]
    fn test_entries_survive_reopening() {
        let dir = TempDir::new().unwrap();
        cache(&dir).set(&key("a"), Value::from(42)).unwrap();
        let reopened = cache(&dir);
        assert_eq!(reopened.get(&key("a")).unwrap(), Value::from(42));
    }

    #[test]
    fn test_json_serializer_round_trips() {
        let value = Value::Seq(vec![Value::from(1), Value::from("x"), Value::Null]);
        let bytes = JsonSerializer.serialize(&value).unwrap();
        assert_eq!(JsonSerializer.deserialize(&bytes).unwrap(), value);
    }
}
