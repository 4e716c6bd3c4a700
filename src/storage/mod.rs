//! Lockers and the coordination-store interface behind the shared-KV
//! variant.

pub mod kv;
pub mod locker;

pub use kv::{CoordinationStore, MemoryKvStore, Script, ScriptId};
pub use locker::{DummyLocker, KvLocker, Locker, ThreadLocker};
