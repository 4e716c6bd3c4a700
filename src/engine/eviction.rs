//! Reference-counted per-call storage.
//!
//! One evaluation owns two of these — one for hashes, one for values —
//! seeded with the call's inputs and drained as the evaluator sweeps the
//! parents of every completed node. Entries are armed with a consultation
//! count computed at graph compile time and dropped the moment the count
//! reaches zero, so intermediates are freed as early as possible.

use std::sync::Arc;

use ahash::AHashMap;

struct Entry<V> {
    value: V,
    remaining: usize,
}

/// Keyed store with a countdown per entry. Keys are tree-node ids.
pub struct EvictionCache<V> {
    counts: Arc<AHashMap<u64, usize>>,
    entries: AHashMap<u64, Entry<V>>,
}

impl<V> EvictionCache<V> {
    pub(crate) fn new(counts: Arc<AHashMap<u64, usize>>) -> Self {
        EvictionCache {
            counts,
            entries: AHashMap::new(),
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    /// Store a value, arming its countdown from the compile-time count.
    /// A key with no recorded count is stored with a zero countdown and
    /// dies on the next evict.
    pub fn insert(&mut self, key: u64, value: V) {
        let remaining = self.counts.get(&key).copied().unwrap_or(0);
        self.entries.insert(key, Entry { value, remaining });
    }

    /// Plain read; consultation accounting happens in [`evict`].
    ///
    /// An absent key here indicates a counting bug in the caller.
    ///
    /// [`evict`]: EvictionCache::evict
    pub fn get(&self, key: u64) -> Option<&V> {
        self.entries.get(&key).map(|entry| &entry.value)
    }

    /// Count one consultation down; drop the entry at zero. Absent keys
    /// are skipped — edges that never requested a parent still sweep it,
    /// which keeps the static accounting aligned.
    pub fn evict(&mut self, key: u64) {
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.remaining <= 1 {
                self.entries.remove(&key);
            } else {
                entry.remaining -= 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
