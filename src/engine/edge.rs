//! The edge protocol: how nodes are wired and how edges talk to the
//! evaluator.
//!
//! An edge computes in two phases — hash, then value — and in each phase
//! it runs as an explicit state machine (a [`Flow`]): the driver calls
//! `resume(None)` once, then answers every [`Request`] the flow emits
//! with the parent hash or parent value it asked for. The flow decides
//! mid-computation what it still needs, which is what lets a cache edge
//! conclude from a hash alone that a whole subtree never has to run.
//!
//! Most edges follow the same template — collect all parent hashes,
//! derive an output hash and a [`Mask`], later request exactly the masked
//! parent values. That template is [`MaskedEdge`]; implementing it yields
//! the full [`Edge`] protocol for free.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::engine::node_hash::NodeHash;
use crate::errors::{Error, Result};
use crate::value::Value;

/// What a flow wants from the driver for one of its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Hash,
    Value,
}

/// A single parent request.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub index: usize,
    pub kind: RequestKind,
}

/// The driver's answer to a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Hash(NodeHash),
    Value(Value),
}

/// One step of a suspended edge computation.
pub enum FlowStep<T> {
    Ask(Request),
    Done(T),
}

impl<T: std::fmt::Debug> std::fmt::Debug for FlowStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStep::Ask(req) => f.debug_tuple("Ask").field(req).finish(),
            FlowStep::Done(val) => f.debug_tuple("Done").field(val).finish(),
        }
    }
}

/// An explicit state machine standing in for a coroutine. The driver
/// calls `resume(None)` first and thereafter feeds exactly one reply per
/// emitted request.
pub trait Flow: Send {
    type Output;
    fn resume(&mut self, reply: Option<Reply>) -> Result<FlowStep<Self::Output>>;
}

/// Parent indices an edge needs materialized during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mask {
    Full,
    Indices(Vec<usize>),
}

/// All parents are required.
pub const FULL_MASK: Mask = Mask::Full;

impl Mask {
    /// No values needed at all (a cache hit, a memoized mapping).
    pub fn none() -> Self {
        Mask::Indices(Vec::new())
    }

    pub fn indices(&self, arity: usize) -> Vec<usize> {
        match self {
            Mask::Full => (0..arity).collect(),
            Mask::Indices(indices) => indices.clone(),
        }
    }
}

/// Opaque state an edge carries from its hash phase to its value phase.
#[derive(Debug, Clone)]
pub enum Payload {
    None,
    Mask(Mask),
    Branch(usize),
}

/// Result of a completed hash phase.
pub type HashOutput = (NodeHash, Payload);

/// A hyperedge from an ordered list of parents to one child node.
pub trait Edge: Send + Sync {
    fn arity(&self) -> usize;

    /// Whether parent hashes suffice for hashing this edge's output. When
    /// false, the output hash depends on concrete parent values.
    fn uses_hash(&self) -> bool;

    /// Start the hash phase.
    fn compute_hash(&self) -> Box<dyn Flow<Output = HashOutput> + '_>;

    /// Start the value phase with the hash phase's results.
    fn evaluate(&self, output: &NodeHash, payload: Payload) -> Box<dyn Flow<Output = Value> + '_>;

    /// Pure graph-shape hash, independent of inputs. Used to derive
    /// persistent cache identifiers.
    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash;
}

/// The common edge template: hash from all parent hashes, evaluate from
/// the masked parent values.
pub trait MaskedEdge: Send + Sync {
    fn arity(&self) -> usize;
    fn uses_hash(&self) -> bool;

    /// Derive the output hash and the set of parents whose values the
    /// value phase will need.
    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)>;

    /// Compute the value from the masked arguments, in mask order.
    fn evaluate_masked(&self, args: Vec<Value>, mask: &Mask, output: &NodeHash) -> Result<Value>;

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash;
}

/// The template's hash flow: collect every parent hash, then derive the
/// output hash and mask.
pub(crate) fn masked_compute_hash<E: MaskedEdge + ?Sized>(
    edge: &E,
) -> Box<dyn Flow<Output = HashOutput> + '_> {
    Box::new(CollectHashes {
        edge,
        hashes: Vec::with_capacity(edge.arity()),
    })
}

/// The template's value flow: request exactly the masked parent values.
pub(crate) fn masked_evaluate<'e, E: MaskedEdge + ?Sized>(
    edge: &'e E,
    output: &NodeHash,
    payload: Payload,
) -> Box<dyn Flow<Output = Value> + 'e> {
    let mask = match payload {
        Payload::Mask(mask) => mask,
        _ => Mask::Full,
    };
    let wanted = mask.indices(edge.arity());
    Box::new(CollectValues {
        edge,
        output: output.clone(),
        mask,
        wanted,
        args: Vec::new(),
    })
}

/// Wires a [`MaskedEdge`] implementation into the full [`Edge`] protocol
/// through the template flows.
macro_rules! impl_edge_via_mask {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::engine::edge::Edge for $ty {
            fn arity(&self) -> usize {
                $crate::engine::edge::MaskedEdge::arity(self)
            }

            fn uses_hash(&self) -> bool {
                $crate::engine::edge::MaskedEdge::uses_hash(self)
            }

            fn compute_hash(
                &self,
            ) -> Box<dyn $crate::engine::edge::Flow<Output = $crate::engine::edge::HashOutput> + '_>
            {
                $crate::engine::edge::masked_compute_hash(self)
            }

            fn evaluate(
                &self,
                output: &$crate::engine::node_hash::NodeHash,
                payload: $crate::engine::edge::Payload,
            ) -> Box<dyn $crate::engine::edge::Flow<Output = $crate::value::Value> + '_> {
                $crate::engine::edge::masked_evaluate(self, output, payload)
            }

            fn hash_graph(
                &self,
                inputs: &[$crate::engine::node_hash::NodeHash],
            ) -> $crate::engine::node_hash::NodeHash {
                $crate::engine::edge::MaskedEdge::hash_graph(self, inputs)
            }
        }
    )+};
}

pub(crate) use impl_edge_via_mask;

struct CollectHashes<'e, E: ?Sized> {
    edge: &'e E,
    hashes: Vec<NodeHash>,
}

impl<E: MaskedEdge + ?Sized> Flow for CollectHashes<'_, E> {
    type Output = HashOutput;

    fn resume(&mut self, reply: Option<Reply>) -> Result<FlowStep<HashOutput>> {
        match reply {
            Some(Reply::Hash(hash)) => self.hashes.push(hash),
            Some(Reply::Value(_)) => {
                return Err(Error::evaluation("protocol violation: expected a hash reply"))
            }
            None => {}
        }
        let next = self.hashes.len();
        if next < self.edge.arity() {
            return Ok(FlowStep::Ask(Request {
                index: next,
                kind: RequestKind::Hash,
            }));
        }
        let (output, mask) = self.edge.process_hashes(&self.hashes)?;
        Ok(FlowStep::Done((output, Payload::Mask(mask))))
    }
}

struct CollectValues<'e, E: ?Sized> {
    edge: &'e E,
    output: NodeHash,
    mask: Mask,
    wanted: Vec<usize>,
    args: Vec<Value>,
}

impl<E: MaskedEdge + ?Sized> Flow for CollectValues<'_, E> {
    type Output = Value;

    fn resume(&mut self, reply: Option<Reply>) -> Result<FlowStep<Value>> {
        match reply {
            Some(Reply::Value(value)) => self.args.push(value),
            Some(Reply::Hash(_)) => {
                return Err(Error::evaluation("protocol violation: expected a value reply"))
            }
            None => {}
        }
        let next = self.args.len();
        if next < self.wanted.len() {
            return Ok(FlowStep::Ask(Request {
                index: self.wanted[next],
                kind: RequestKind::Value,
            }));
        }
        let args = std::mem::take(&mut self.args);
        let value = self.edge.evaluate_masked(args, &self.mask, &self.output)?;
        Ok(FlowStep::Done(value))
    }
}

static NODE_IDS: AtomicU64 = AtomicU64::new(1);

/// A named vertex in a user graph. Pure declaration; holds no values.
/// Identity is the id, which is stable for the life of the process;
/// clones share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    id: u64,
    name: String,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            id: NODE_IDS.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's in-process identity. Compiled structures key on it.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// An edge bound to its parent nodes and its output node.
#[derive(Clone)]
pub struct BoundEdge {
    pub(crate) edge: Arc<dyn Edge>,
    pub(crate) inputs: Vec<Node>,
    pub(crate) output: Node,
}

impl BoundEdge {
    pub fn new(edge: Arc<dyn Edge>, inputs: Vec<Node>, output: Node) -> Result<Self> {
        if edge.arity() != inputs.len() {
            return Err(Error::Structural(format!(
                "edge arity {} does not match {} bound parents for `{}`",
                edge.arity(),
                inputs.len(),
                output.name()
            )));
        }
        Ok(BoundEdge {
            edge,
            inputs,
            output,
        })
    }

    pub fn edge(&self) -> &Arc<dyn Edge> {
        &self.edge
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn output(&self) -> &Node {
        &self.output
    }
}

impl std::fmt::Debug for BoundEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEdge")
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

/// The compiled form of a node in one graph: the node plus its inbound
/// edge plus its parent tree nodes. Inputs are the leaves.
pub struct TreeNode {
    name: String,
    id: u64,
    link: Option<(Arc<dyn Edge>, Vec<Arc<TreeNode>>)>,
}


impl TreeNode {
    /// A leaf tree node: an input, or a declared input no edge mentions.
    pub fn leaf(node: &Node) -> Arc<TreeNode> {
        Arc::new(TreeNode {
            name: node.name().to_string(),
            id: node.id(),
            link: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.link.is_none()
    }

    pub(crate) fn link(&self) -> Option<&(Arc<dyn Edge>, Vec<Arc<TreeNode>>)> {
        self.link.as_ref()
    }

    pub fn parents(&self) -> &[Arc<TreeNode>] {
        match &self.link {
            Some((_, parents)) => parents,
            None => &[],
        }
    }

    /// Compile a set of bound edges into tree nodes, one per node id.
    /// Nodes that no edge produces become leaves. Fails on a node with
    /// two inbound edges or on a cycle.
    pub fn from_edges(edges: &[BoundEdge]) -> Result<AHashMap<u64, Arc<TreeNode>>> {
        let mut by_output: AHashMap<u64, &BoundEdge> = AHashMap::new();
        for bound in edges {
            if by_output.insert(bound.output.id(), bound).is_some() {
                return Err(Error::Structural(format!(
                    "node `{}` has more than one inbound edge",
                    bound.output.name()
                )));
            }
        }

        let mut done: AHashMap<u64, Arc<TreeNode>> = AHashMap::new();
        let mut gray: AHashSet<u64> = AHashSet::new();
        for bound in edges {
            build(&bound.output, &by_output, &mut done, &mut gray)?;
            for input in &bound.inputs {
                build(input, &by_output, &mut done, &mut gray)?;
            }
        }
        Ok(done)
    }
}

fn build(
    node: &Node,
    by_output: &AHashMap<u64, &BoundEdge>,
    done: &mut AHashMap<u64, Arc<TreeNode>>,
    gray: &mut AHashSet<u64>,
) -> Result<Arc<TreeNode>> {
    if let Some(tree) = done.get(&node.id()) {
        return Ok(tree.clone());
    }
    if !gray.insert(node.id()) {
        return Err(Error::Structural(format!(
            "cycle through node `{}`",
            node.name()
        )));
    }
    let tree = match by_output.get(&node.id()) {
        None => TreeNode::leaf(node),
        Some(bound) => {
            let mut parents = Vec::with_capacity(bound.inputs.len());
            for input in &bound.inputs {
                parents.push(build(input, by_output, done, gray)?);
            }
            Arc::new(TreeNode {
                name: node.name().to_string(),
                id: node.id(),
                link: Some((bound.edge.clone(), parents)),
            })
        }
    };
    gray.remove(&node.id());
    done.insert(node.id(), tree.clone());
    Ok(tree)
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("leaf", &self.is_leaf())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::edges::IdentityEdge;

    #[test]
    fn test_bind_checks_arity() {
        let a = Node::new("a");
        let b = Node::new("b");
        let out = Node::new("out");
        let err = BoundEdge::new(Arc::new(IdentityEdge), vec![a, b], out);
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_inbound_edges_rejected() {
        let a = Node::new("a");
        let b = Node::new("b");
        let out = Node::new("out");
        let edges = vec![
            BoundEdge::new(Arc::new(IdentityEdge), vec![a], out.clone()).unwrap(),
            BoundEdge::new(Arc::new(IdentityEdge), vec![b], out).unwrap(),
        ];
        assert!(TreeNode::from_edges(&edges).is_err());
    }

    #[test]
    fn test_cycle_detection() {
        let a = Node::new("a");
        let b = Node::new("b");
        let edges = vec![
            BoundEdge::new(Arc::new(IdentityEdge), vec![a.clone()], b.clone()).unwrap(),
            BoundEdge::new(Arc::new(IdentityEdge), vec![b], a).unwrap(),
        ];
        let err = TreeNode::from_edges(&edges).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_leaves_are_materialized() {
        let a = Node::new("a");
        let out = Node::new("out");
        let edges = vec![BoundEdge::new(Arc::new(IdentityEdge), vec![a.clone()], out.clone()).unwrap()];
        let tree = TreeNode::from_edges(&edges).unwrap();
        assert!(tree[&a.id()].is_leaf());
        assert!(!tree[&out.id()].is_leaf());
        assert_eq!(tree[&out.id()].parents().len(), 1);
    }
}
