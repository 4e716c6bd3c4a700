//! Graph compilation and the two-pass evaluator.
//!
//! A call makes two passes over the tree, both driven through the edge
//! flows on a shared pair of eviction caches:
//!
//! 1. hash every node reachable from the output,
//! 2. evaluate the nodes whose values are actually requested.
//!
//! An edge may request parent *values* already during the hash pass (a
//! keyed switch needs its key to pick a branch); the shared caches honor
//! that. After a node's hash flow completes, every parent slot's hash is
//! swept; after its value flow completes, every parent slot is swept from
//! both caches — including parents the flow never asked for, which is
//! what keeps the static counts and the dynamic behavior aligned.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::engine::edge::{Flow, FlowStep, Payload, Reply, RequestKind, TreeNode};
use crate::engine::eviction::EvictionCache;
use crate::engine::node_hash::NodeHash;
use crate::errors::{Error, Result};
use crate::value::Value;

// One consultation per pass.
const PASS_MULTIPLIER: usize = 2;

/// The per-call evaluation state: hashes and values, reference-counted.
pub struct EvalState {
    hashes: EvictionCache<(NodeHash, Payload)>,
    values: EvictionCache<Value>,
}

impl EvalState {
    /// Whether both caches have drained. Holds after a full evaluation;
    /// lazily skipped subtrees may legitimately leave entries behind, and
    /// those die with this state.
    pub fn is_drained(&self) -> bool {
        self.hashes.is_empty() && self.values.is_empty()
    }
}

/// A compiled graph: validated, counted, with a deterministic call
/// signature over its live inputs.
pub struct Graph {
    inputs: Vec<Arc<TreeNode>>,
    output: Arc<TreeNode>,
    hash_counts: Arc<AHashMap<u64, usize>>,
    value_counts: Arc<AHashMap<u64, usize>>,
    shape: OnceCell<NodeHash>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("hash_counts", &self.hash_counts)
            .field("value_counts", &self.value_counts)
            .finish()
    }
}

impl Graph {
    pub fn new(inputs: Vec<Arc<TreeNode>>, output: Arc<TreeNode>) -> Result<Self> {
        validate(&inputs, &output)?;
        let (hash_counts, value_counts) = count_slots(&output);
        let mut inputs: Vec<Arc<TreeNode>> = inputs
            .into_iter()
            .filter(|node| hash_counts.get(&node.id()).copied().unwrap_or(0) > 0)
            .collect();
        inputs.sort_by(|a, b| a.name().cmp(b.name()));
        debug!(
            output = output.name(),
            inputs = inputs.len(),
            nodes = hash_counts.len(),
            "compiled graph"
        );
        Ok(Graph {
            inputs,
            output,
            hash_counts: Arc::new(hash_counts),
            value_counts: Arc::new(value_counts),
            shape: OnceCell::new(),
        })
    }

    /// The live input names, in binding order (alphabetical).
    pub fn signature(&self) -> Vec<&str> {
        self.inputs.iter().map(|node| node.name()).collect()
    }

    /// Call with named arguments.
    pub fn call(&self, arguments: &[(&str, Value)]) -> Result<Value> {
        let mut positional = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let found = arguments
                .iter()
                .find(|(name, _)| *name == input.name())
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    Error::Structural(format!("missing argument `{}`", input.name()))
                })?;
            positional.push(found);
        }
        for (name, _) in arguments {
            if !self.inputs.iter().any(|input| input.name() == *name) {
                return Err(Error::Structural(format!("unexpected argument `{name}`")));
            }
        }
        self.call_positional(&positional)
    }

    /// Call with positional arguments, in signature order.
    pub fn call_positional(&self, args: &[Value]) -> Result<Value> {
        let mut state = self.seed(args)?;
        self.get_value(&mut state)
    }

    /// Run the hash pass only; returns the output hash and the evaluation
    /// state for a later [`get_value`].
    ///
    /// [`get_value`]: Graph::get_value
    pub fn get_hash(&self, args: &[Value]) -> Result<(NodeHash, EvalState)> {
        let mut state = self.seed(args)?;
        let (hash, _) = compute_hash_node(&self.output, &mut state)?;
        Ok((hash, state))
    }

    /// Run the value pass and consume the output's root slots. One shot:
    /// the state is drained of the output afterwards.
    pub fn get_value(&self, state: &mut EvalState) -> Result<Value> {
        let value = evaluate_node(&self.output, state)?;
        // the caller's consultations: one hash read per pass, one value read
        for _ in 0..PASS_MULTIPLIER {
            state.hashes.evict(self.output.id());
        }
        state.values.evict(self.output.id());
        Ok(value)
    }

    /// Hash of the graph shape, with a shared placeholder at every input.
    /// Identifies the graph independently of input values; memoized.
    pub fn shape_hash(&self) -> NodeHash {
        self.shape
            .get_or_init(|| {
                let mut memo: AHashMap<u64, NodeHash> = AHashMap::new();
                for input in &self.inputs {
                    memo.insert(input.id(), NodeHash::input_placeholder());
                }
                NodeHash::from_graph(shape_visit(&self.output, &mut memo))
            })
            .clone()
    }

    fn seed(&self, args: &[Value]) -> Result<EvalState> {
        if args.len() != self.inputs.len() {
            return Err(Error::Structural(format!(
                "expected {} arguments, got {}",
                self.inputs.len(),
                args.len()
            )));
        }
        let mut state = EvalState {
            hashes: EvictionCache::new(self.hash_counts.clone()),
            values: EvictionCache::new(self.value_counts.clone()),
        };
        for (input, value) in self.inputs.iter().zip(args) {
            state.hashes.insert(
                input.id(),
                (NodeHash::from_leaf(value.clone()), Payload::None),
            );
            state.values.insert(input.id(), value.clone());
        }
        Ok(state)
    }
}

fn shape_visit(node: &Arc<TreeNode>, memo: &mut AHashMap<u64, NodeHash>) -> NodeHash {
    if let Some(hash) = memo.get(&node.id()) {
        return hash.clone();
    }
    let hash = match node.link() {
        // validation guarantees reachable leaves are inputs; stray leaves
        // hash like inputs
        None => NodeHash::input_placeholder(),
        Some((edge, parents)) => {
            let parent_hashes: Vec<NodeHash> = parents
                .iter()
                .map(|parent| shape_visit(parent, memo))
                .collect();
            edge.hash_graph(&parent_hashes)
        }
    };
    memo.insert(node.id(), hash.clone());
    hash
}

fn validate(inputs: &[Arc<TreeNode>], output: &Arc<TreeNode>) -> Result<()> {
    let declared: AHashSet<u64> = inputs.iter().map(|node| node.id()).collect();
    let mut visited: AHashSet<u64> = AHashSet::new();
    visit_reachable(output, &declared, &mut visited)
}

fn visit_reachable(
    node: &Arc<TreeNode>,
    declared: &AHashSet<u64>,
    visited: &mut AHashSet<u64>,
) -> Result<()> {
    if !visited.insert(node.id()) || declared.contains(&node.id()) {
        return Ok(());
    }
    if node.is_leaf() {
        return Err(Error::Structural(format!(
            "leaf `{}` is not a declared input",
            node.name()
        )));
    }
    for parent in node.parents() {
        visit_reachable(parent, declared, visited)?;
    }
    Ok(())
}

/// Consultation counts per consumer slot, each consumer visited once.
///
/// A consumer sweeps its parents' hashes after each of its two flows and
/// their values after the value flow only, so on a full evaluation a hash
/// entry sees two sweeps per slot and a value entry one. The output
/// carries the caller's root consultations on top.
fn count_slots(output: &Arc<TreeNode>) -> (AHashMap<u64, usize>, AHashMap<u64, usize>) {
    let mut hash_counts: AHashMap<u64, usize> = AHashMap::new();
    let mut value_counts: AHashMap<u64, usize> = AHashMap::new();
    let mut visited: AHashSet<u64> = AHashSet::new();
    count_visit(output, &mut hash_counts, &mut value_counts, &mut visited);
    *hash_counts.entry(output.id()).or_insert(0) += PASS_MULTIPLIER;
    *value_counts.entry(output.id()).or_insert(0) += 1;
    (hash_counts, value_counts)
}

fn count_visit(
    node: &Arc<TreeNode>,
    hash_counts: &mut AHashMap<u64, usize>,
    value_counts: &mut AHashMap<u64, usize>,
    visited: &mut AHashSet<u64>,
) {
    if !visited.insert(node.id()) {
        return;
    }
    for parent in node.parents() {
        *hash_counts.entry(parent.id()).or_insert(0) += PASS_MULTIPLIER;
        *value_counts.entry(parent.id()).or_insert(0) += 1;
        count_visit(parent, hash_counts, value_counts, visited);
    }
}

fn compute_hash_node(node: &Arc<TreeNode>, state: &mut EvalState) -> Result<(NodeHash, Payload)> {
    if !state.hashes.contains(node.id()) {
        let Some((edge, parents)) = node.link() else {
            return Err(Error::evaluation("no hash for input").attributed_to(node.name()));
        };
        let mut flow = edge.compute_hash();
        let entry = drive(node.name(), parents, flow.as_mut(), state)?;
        drop(flow);
        for parent in parents {
            state.hashes.evict(parent.id());
        }
        state.hashes.insert(node.id(), entry);
    }
    state
        .hashes
        .get(node.id())
        .cloned()
        .ok_or_else(|| Error::evaluation("hash evicted too early").attributed_to(node.name()))
}

fn evaluate_node(node: &Arc<TreeNode>, state: &mut EvalState) -> Result<Value> {
    if !state.values.contains(node.id()) {
        let (output, payload) = compute_hash_node(node, state)?;
        let Some((edge, parents)) = node.link() else {
            return Err(Error::evaluation("no value for input").attributed_to(node.name()));
        };
        let mut flow = edge.evaluate(&output, payload);
        let value = drive(node.name(), parents, flow.as_mut(), state)?;
        drop(flow);
        sweep(parents, state);
        state.values.insert(node.id(), value);
    }
    state
        .values
        .get(node.id())
        .cloned()
        .ok_or_else(|| Error::evaluation("value evicted too early").attributed_to(node.name()))
}

fn drive<T>(
    node_name: &str,
    parents: &[Arc<TreeNode>],
    flow: &mut dyn Flow<Output = T>,
    state: &mut EvalState,
) -> Result<T> {
    let mut reply = None;
    loop {
        let step = flow
            .resume(reply.take())
            .map_err(|err| err.attributed_to(node_name))?;
        match step {
            FlowStep::Done(result) => return Ok(result),
            FlowStep::Ask(request) => {
                let parent = parents.get(request.index).ok_or_else(|| Error::Evaluation {
                    node: node_name.to_string(),
                    message: format!("request index {} out of range", request.index),
                })?;
                reply = Some(match request.kind {
                    RequestKind::Hash => Reply::Hash(compute_hash_node(parent, state)?.0),
                    RequestKind::Value => Reply::Value(evaluate_node(parent, state)?),
                });
            }
        }
    }
}

// The value flow's sweep covers both caches; the hash flow sweeps hashes
// only, since parent values may not exist yet (and their counts assume one
// sweep per slot).
fn sweep(parents: &[Arc<TreeNode>], state: &mut EvalState) {
    for parent in parents {
        state.hashes.evict(parent.id());
        state.values.evict(parent.id());
    }
}
