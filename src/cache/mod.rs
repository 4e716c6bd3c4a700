//! Cache backends and the transaction protocol that guards them.

pub mod disk;
pub mod memory;
pub mod transactions;

pub use disk::{DiskCache, JsonSerializer, Serializer};
pub use memory::MemoryCache;
pub use transactions::{Reservation, TransactionManager};

use crate::engine::NodeHash;
use crate::errors::Result;
use crate::value::Value;

/// A keyed store of computed values, consulted by cache edges.
///
/// Keys are structural hashes; implementations store them by hex digest.
/// Every backend in this crate wraps its accesses in the transaction
/// protocol, which is what makes a shared backend safe under concurrent
/// evaluations.
pub trait CacheBackend: Send + Sync {
    fn contains(&self, key: &NodeHash) -> Result<bool>;
    fn get(&self, key: &NodeHash) -> Result<Value>;
    fn set(&self, key: &NodeHash, value: Value) -> Result<()>;
}
