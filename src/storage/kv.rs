//! The coordination-store interface consumed by [`KvLocker`].
//!
//! An external store (Redis and friends) must offer three primitives:
//! atomic set-if-absent on a hash field, atomic evaluation of a preloaded
//! script against a single key, and atomic counters. Scripts are
//! preloaded by content hash and invoked by that hash; the sources below
//! are the contract a real backend executes verbatim.
//!
//! [`MemoryKvStore`] is the in-process reference implementation: it
//! recognizes the preloaded scripts by id and applies the equivalent
//! transition natively. Concurrency tests run against it.
//!
//! [`KvLocker`]: crate::storage::KvLocker

use std::sync::Mutex;

use ahash::{AHashMap, AHashSet};

use crate::errors::{Error, Result};

// language=Lua
pub const ACQUIRE_READ_SCRIPT: &str = "\
if redis.call('hget', KEYS[1], ARGV[1]) == '-1' then
    return 0 else redis.call('hincrby', KEYS[1], ARGV[1], 1); return 1
end";

// language=Lua
pub const RELEASE_READ_SCRIPT: &str = "\
local lock = redis.call('hget', KEYS[1], ARGV[1])
if lock == '1' then
    redis.call('hdel', KEYS[1], ARGV[1])
elseif tonumber(lock) < 1 then
    error('')
else
    redis.call('hincrby', KEYS[1], ARGV[1], -1)
end";

// language=Lua
pub const RELEASE_WRITE_SCRIPT: &str = "\
if redis.call('hget', KEYS[1], ARGV[1]) == '-1' then
    redis.call('hdel', KEYS[1], ARGV[1]) else error('')
end";

/// An atomic program executed by the store against one hash field.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    source: &'static str,
}

impl Script {
    pub fn new(source: &'static str) -> Self {
        Script { source }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Content hash the store preloads and invokes the script by.
    pub fn id(&self) -> ScriptId {
        ScriptId(blake3::hash(self.source.as_bytes()).to_hex().to_string())
    }
}

/// Content id of a preloaded script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The minimal atomic surface an external key-value store must provide.
pub trait CoordinationStore: Send + Sync {
    /// Atomically set `field` of `hash` to `value` if absent; true when
    /// the field was set.
    fn set_if_absent(&self, hash: &str, field: &str, value: i64) -> Result<bool>;

    /// Preload a script; returns its content id.
    fn load_script(&self, script: Script) -> Result<ScriptId>;

    /// Run a preloaded script atomically against one field of `hash`.
    fn eval_script(&self, id: &ScriptId, hash: &str, field: &str) -> Result<i64>;

    fn counter_get(&self, key: &str) -> Result<i64>;
    fn counter_set(&self, key: &str, value: i64) -> Result<()>;
    fn counter_add(&self, key: &str, delta: i64) -> Result<i64>;
}

/// In-process reference store.
#[derive(Default)]
pub struct MemoryKvStore {
    hashes: Mutex<AHashMap<String, AHashMap<String, i64>>>,
    counters: Mutex<AHashMap<String, i64>>,
    loaded: Mutex<AHashSet<ScriptId>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationStore for MemoryKvStore {
    fn set_if_absent(&self, hash: &str, field: &str, value: i64) -> Result<bool> {
        let mut hashes = self.hashes.lock().unwrap();
        let fields = hashes.entry(hash.to_string()).or_default();
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_string(), value);
        Ok(true)
    }

    fn load_script(&self, script: Script) -> Result<ScriptId> {
        let id = script.id();
        self.loaded.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    fn eval_script(&self, id: &ScriptId, hash: &str, field: &str) -> Result<i64> {
        if !self.loaded.lock().unwrap().contains(id) {
            return Err(Error::Backend(format!(
                "script {} was never loaded",
                id.as_str()
            )));
        }
        let mut hashes = self.hashes.lock().unwrap();
        let fields = hashes.entry(hash.to_string()).or_default();
        let current = fields.get(field).copied();

        if *id == Script::new(ACQUIRE_READ_SCRIPT).id() {
            if current == Some(-1) {
                return Ok(0);
            }
            let next = current.unwrap_or(0) + 1;
            fields.insert(field.to_string(), next);
            return Ok(1);
        }
        if *id == Script::new(RELEASE_READ_SCRIPT).id() {
            return match current {
                Some(1) => {
                    fields.remove(field);
                    Ok(0)
                }
                Some(n) if n > 1 => {
                    fields.insert(field.to_string(), n - 1);
                    Ok(n - 1)
                }
                _ => Err(Error::Backend(format!(
                    "read released but never reserved for {field}"
                ))),
            };
        }
        if *id == Script::new(RELEASE_WRITE_SCRIPT).id() {
            return match current {
                Some(-1) => {
                    fields.remove(field);
                    Ok(0)
                }
                _ => Err(Error::Backend(format!(
                    "write released but never reserved for {field}"
                ))),
            };
        }
        Err(Error::Backend(format!("unknown script {}", id.as_str())))
    }

    fn counter_get(&self, key: &str) -> Result<i64> {
        Ok(self.counters.lock().unwrap().get(key).copied().unwrap_or(0))
    }

    fn counter_set(&self, key: &str, value: i64) -> Result<()> {
        self.counters.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn counter_add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut counters = self.counters.lock().unwrap();
        let next = counters.get(key).copied().unwrap_or(0) + delta;
        counters.insert(key.to_string(), next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_ids_are_content_hashes() {
        let a = Script::new(ACQUIRE_READ_SCRIPT).id();
        let b = Script::new(RELEASE_READ_SCRIPT).id();
        assert_ne!(a, b);
        assert_eq!(a, Script::new(ACQUIRE_READ_SCRIPT).id());
    }

    #[test]
    fn test_unloaded_scripts_are_rejected() {
        let store = MemoryKvStore::new();
        let id = Script::new(ACQUIRE_READ_SCRIPT).id();
        assert!(store.eval_script(&id, "h", "k").is_err());
    }

    #[test]
    fn test_set_if_absent_is_once() {
        let store = MemoryKvStore::new();
        assert!(store.set_if_absent("h", "k", -1).unwrap());
        assert!(!store.set_if_absent("h", "k", -1).unwrap());
    }

    #[test]
    fn test_reader_counting_transitions() {
        let store = MemoryKvStore::new();
        let acquire = store.load_script(Script::new(ACQUIRE_READ_SCRIPT)).unwrap();
        let release = store.load_script(Script::new(RELEASE_READ_SCRIPT)).unwrap();

        assert_eq!(store.eval_script(&acquire, "h", "k").unwrap(), 1);
        assert_eq!(store.eval_script(&acquire, "h", "k").unwrap(), 1);
        assert_eq!(store.eval_script(&release, "h", "k").unwrap(), 1);
        assert_eq!(store.eval_script(&release, "h", "k").unwrap(), 0);
        assert!(store.eval_script(&release, "h", "k").is_err());
    }

    #[test]
    fn test_writer_blocks_readers_at_the_store_level() {
        let store = MemoryKvStore::new();
        let acquire = store.load_script(Script::new(ACQUIRE_READ_SCRIPT)).unwrap();
        let release_write = store
            .load_script(Script::new(RELEASE_WRITE_SCRIPT))
            .unwrap();

        assert!(store.set_if_absent("h", "k", -1).unwrap());
        assert_eq!(store.eval_script(&acquire, "h", "k").unwrap(), 0);
        store.eval_script(&release_write, "h", "k").unwrap();
        assert_eq!(store.eval_script(&acquire, "h", "k").unwrap(), 1);
    }
}
