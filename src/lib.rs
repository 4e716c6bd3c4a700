//! # hashflow
//!
//! Hashflow is a content-addressed, cacheable dataflow computation
//! engine.
//!
//! Layers of named transformations compose into chains; each chain
//! compiles into a directed acyclic graph. Evaluating a requested output
//! lazily computes only the necessary inputs, identifies every
//! intermediate by a structural hash, and consults pluggable caches (in
//! memory or on disk) to short-circuit recomputation.
//!
//! ## Features
//!
//! - Two-phase evaluation: hashes first, values only where needed — a
//!   cache hit skips the whole subtree behind it
//! - Structural hashing with a closed kind algebra, stable enough to key
//!   persistent caches
//! - Reference-counted per-call stores that free intermediates as soon as
//!   they are no longer consulted
//! - A read/write transaction protocol making shared backends safe across
//!   threads and, with a shared-KV locker, across processes
//! - Group-by and switch transformations over identifier-keyed datasets
//!
//! ## Example
//!
//! ```
//! use hashflow::{TransformLayer, Value};
//!
//! # fn main() -> hashflow::Result<()> {
//! let layer = TransformLayer::builder()
//!     .output("sum", &["x", "y"], |args| {
//!         Ok(Value::Int(
//!             args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0),
//!         ))
//!     })
//!     .output("squared", &["x"], |args| {
//!         let x = args[0].as_int().unwrap_or(0);
//!         Ok(Value::Int(x * x))
//!     })
//!     .build()?;
//!
//! let sum = layer.forward_method("sum")?;
//! assert_eq!(
//!     sum.call_positional(&[Value::from(1), Value::from(2)])?,
//!     Value::from(3)
//! );
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod errors;
pub mod layers;
pub mod storage;
pub mod value;

// Re-export commonly used types for convenience
pub use cache::{
    CacheBackend, DiskCache, JsonSerializer, MemoryCache, Serializer, TransactionManager,
};
pub use engine::{BoundEdge, DynFunction, EvalState, Graph, HashKind, Node, NodeHash, TreeNode};
pub use errors::{Error, Result};
pub use layers::{
    pipeline, CacheLayer, EdgesBag, GroupLayer, MultiGroupLayer, SwitchLayer, TransformLayer,
    Wrapper,
};
pub use storage::{CoordinationStore, DummyLocker, KvLocker, Locker, MemoryKvStore, ThreadLocker};
pub use value::Value;
