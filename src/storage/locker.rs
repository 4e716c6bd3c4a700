//! Coordination primitives mediating exclusive writes and shared reads.

use std::sync::Mutex;

use ahash::AHashMap;

use crate::errors::{Error, Result};
use crate::storage::kv::{
    CoordinationStore, Script, ScriptId, ACQUIRE_READ_SCRIPT, RELEASE_READ_SCRIPT,
    RELEASE_WRITE_SCRIPT,
};

/// Per-key reservation primitives. `start_*` operations are non-blocking
/// try-acquires; blocking and retry live in the transaction layer.
pub trait Locker: Send + Sync {
    /// Try to reserve a read slot. Readers share; writers exclude.
    fn start_reading(&self, key: &str) -> Result<bool>;
    fn stop_reading(&self, key: &str) -> Result<()>;

    /// Try to reserve the write slot. Fails while readers or another
    /// writer hold the key.
    fn start_writing(&self, key: &str) -> Result<bool>;
    fn stop_writing(&self, key: &str) -> Result<()>;

    /// Whether this locker maintains a volume counter for the store it
    /// guards.
    fn track_size(&self) -> bool {
        false
    }

    fn volume(&self) -> Result<i64> {
        Err(Error::Backend("volume tracking is not supported".into()))
    }

    fn set_volume(&self, _volume: i64) -> Result<()> {
        Err(Error::Backend("volume tracking is not supported".into()))
    }

    fn add_volume(&self, _delta: i64) -> Result<()> {
        Err(Error::Backend("volume tracking is not supported".into()))
    }
}

/// Grants everything; for single-threaded use and tests.
pub struct DummyLocker;

impl Locker for DummyLocker {
    fn start_reading(&self, _key: &str) -> Result<bool> {
        Ok(true)
    }

    fn stop_reading(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn start_writing(&self, _key: &str) -> Result<bool> {
        Ok(true)
    }

    fn stop_writing(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Registry {
    reading: AHashMap<String, i64>,
    writing: AHashMap<String, i64>,
}

impl Registry {
    fn read_count(&self, key: &str) -> i64 {
        let count = self.reading.get(key).copied().unwrap_or(0);
        assert!(count >= 0, "negative read count for {key}: {count}");
        count
    }

    fn write_count(&self, key: &str) -> i64 {
        let count = self.writing.get(key).copied().unwrap_or(0);
        assert!(
            (0..=1).contains(&count),
            "invalid write count for {key}: {count}"
        );
        count
    }

    fn start_reading(&mut self, key: &str) -> bool {
        if self.write_count(key) > 0 {
            return false;
        }
        *self.reading.entry(key.to_string()).or_insert(0) += 1;
        true
    }

    fn stop_reading(&mut self, key: &str) {
        let count = self.read_count(key);
        assert!(count >= 1, "read released but never reserved for {key}");
        if count == 1 {
            self.reading.remove(key);
        } else {
            self.reading.insert(key.to_string(), count - 1);
        }
    }

    fn start_writing(&mut self, key: &str) -> bool {
        if self.read_count(key) > 0 || self.write_count(key) > 0 {
            return false;
        }
        self.writing.insert(key.to_string(), 1);
        true
    }

    fn stop_writing(&mut self, key: &str) {
        let count = self.write_count(key);
        assert!(count == 1, "write released but never reserved for {key}");
        self.writing.remove(key);
    }
}

/// In-process locker: one mutex over two integer maps.
#[derive(Default)]
pub struct ThreadLocker {
    registry: Mutex<Registry>,
}

impl ThreadLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for ThreadLocker {
    fn start_reading(&self, key: &str) -> Result<bool> {
        Ok(self.registry.lock().unwrap().start_reading(key))
    }

    fn stop_reading(&self, key: &str) -> Result<()> {
        self.registry.lock().unwrap().stop_reading(key);
        Ok(())
    }

    fn start_writing(&self, key: &str) -> Result<bool> {
        Ok(self.registry.lock().unwrap().start_writing(key))
    }

    fn stop_writing(&self, key: &str) -> Result<()> {
        self.registry.lock().unwrap().stop_writing(key);
        Ok(())
    }
}

/// Locker over an external coordination store, safe across processes.
///
/// One hash holds the lock states: `key -> -1` while writing, `key -> n`
/// with `n >= 1` readers. Writer acquisition is a bare set-if-absent;
/// every other transition runs as an atomic script preloaded by content
/// hash. An extra counter tracks the volume of the guarded store.
pub struct KvLocker<S> {
    store: S,
    lock_key: String,
    volume_key: String,
    acquire_read: ScriptId,
    release_read: ScriptId,
    release_write: ScriptId,
}

impl<S: CoordinationStore> KvLocker<S> {
    pub fn new(store: S, prefix: &str) -> Result<Self> {
        let acquire_read = store.load_script(Script::new(ACQUIRE_READ_SCRIPT))?;
        let release_read = store.load_script(Script::new(RELEASE_READ_SCRIPT))?;
        let release_write = store.load_script(Script::new(RELEASE_WRITE_SCRIPT))?;
        Ok(KvLocker {
            store,
            lock_key: format!("{prefix}.L"),
            volume_key: format!("{prefix}.V"),
            acquire_read,
            release_read,
            release_write,
        })
    }
}

impl<S: CoordinationStore> Locker for KvLocker<S> {
    fn start_reading(&self, key: &str) -> Result<bool> {
        let granted = self
            .store
            .eval_script(&self.acquire_read, &self.lock_key, key)?;
        Ok(granted == 1)
    }

    fn stop_reading(&self, key: &str) -> Result<()> {
        self.store
            .eval_script(&self.release_read, &self.lock_key, key)?;
        Ok(())
    }

    fn start_writing(&self, key: &str) -> Result<bool> {
        self.store.set_if_absent(&self.lock_key, key, -1)
    }

    fn stop_writing(&self, key: &str) -> Result<()> {
        self.store
            .eval_script(&self.release_write, &self.lock_key, key)?;
        Ok(())
    }

    fn track_size(&self) -> bool {
        true
    }

    fn volume(&self) -> Result<i64> {
        self.store.counter_get(&self.volume_key)
    }

    fn set_volume(&self, volume: i64) -> Result<()> {
        self.store.counter_set(&self.volume_key, volume)
    }

    fn add_volume(&self, delta: i64) -> Result<()> {
        self.store.counter_add(&self.volume_key, delta)?;
        Ok(())
    }
}
