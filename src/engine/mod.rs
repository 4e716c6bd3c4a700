//! The dataflow core: hashes, edges, compilation, evaluation.

pub mod edge;
pub mod edges;
pub mod eviction;
pub mod graph;
pub mod node_hash;

pub use edge::{
    BoundEdge, Edge, Flow, FlowStep, HashOutput, Mask, MaskedEdge, Node, Payload, Reply, Request,
    RequestKind, TreeNode, FULL_MASK,
};
pub use edges::{
    CacheEdge, Comparator, ConstantEdge, DynFunction, FunctionEdge, GroupingEdge, HashMappingEdge,
    IdentityEdge, KeyedSwitchEdge, MappingEdge, ProductEdge, ProjectionEdge, SwitchEdge,
};
pub use eviction::EvictionCache;
pub use graph::{EvalState, Graph};
pub use node_hash::{HashKind, NodeHash};
