//! The built-in edge set.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cache::CacheBackend;
use crate::engine::edge::{
    impl_edge_via_mask, Edge, Flow, FlowStep, HashOutput, Mask, MaskedEdge, Payload, Reply,
    Request, RequestKind,
};
use crate::engine::graph::Graph;
use crate::engine::node_hash::{HashKind, NodeHash};
use crate::errors::{Error, Result};
use crate::value::{value_digest, Value};

impl_edge_via_mask!(
    IdentityEdge,
    FunctionEdge,
    ProductEdge,
    ConstantEdge,
    CacheEdge,
    SwitchEdge,
    ProjectionEdge,
    MappingEdge,
    GroupingEdge,
    HashMappingEdge,
);

/// A shared function object with an explicit hash identity.
///
/// Closures have no stable content identity, so the label stands in for
/// the function when hashing: two computations with the same label are
/// the same computation as far as caches are concerned.
#[derive(Clone)]
pub struct DynFunction {
    label: String,
    func: Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>,
}

impl DynFunction {
    pub fn new(
        label: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        DynFunction {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    fn leaf(&self) -> NodeHash {
        NodeHash::from_leaf(Value::Str(self.label.clone()))
    }
}

/// An equivalence test between two grouping keys, with a hash identity.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

fn nothing_in_hashes(hashes: &[NodeHash]) -> bool {
    hashes.iter().any(NodeHash::is_nothing)
}

fn nothing_in_values(args: &[Value]) -> bool {
    args.iter().any(Value::is_nothing)
}

/// Passes its single argument through unchanged.
pub struct IdentityEdge;

impl MaskedEdge for IdentityEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        false
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        Ok((hashes[0].clone(), Mask::Full))
    }

    fn evaluate_masked(&self, mut args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        Ok(args.swap_remove(0))
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        inputs[0].clone()
    }
}

/// Applies a function to all parent values. `Nothing` in any argument —
/// hash or value — short-circuits to `Nothing`.
pub struct FunctionEdge {
    function: DynFunction,
    arity: usize,
}

impl FunctionEdge {
    pub fn new(function: DynFunction, arity: usize) -> Self {
        FunctionEdge { function, arity }
    }
}

impl MaskedEdge for FunctionEdge {
    fn arity(&self) -> usize {
        self.arity
    }

    fn uses_hash(&self) -> bool {
        false
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        if nothing_in_hashes(hashes) {
            return Ok((NodeHash::nothing(), Mask::Full));
        }
        let mut children = Vec::with_capacity(hashes.len() + 1);
        children.push(self.function.leaf());
        children.extend_from_slice(hashes);
        Ok((NodeHash::from_parts(HashKind::Function, children), Mask::Full))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        if nothing_in_values(&args) {
            return Ok(Value::Nothing);
        }
        self.function.call(&args)
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        let mut children = Vec::with_capacity(inputs.len() + 1);
        children.push(self.function.leaf());
        children.extend_from_slice(inputs);
        NodeHash::from_parts(HashKind::Function, children)
    }
}

/// Gathers all parent values into a sequence.
pub struct ProductEdge {
    arity: usize,
}

impl ProductEdge {
    pub fn new(arity: usize) -> Self {
        ProductEdge { arity }
    }
}

impl MaskedEdge for ProductEdge {
    fn arity(&self) -> usize {
        self.arity
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        Ok((
            NodeHash::from_parts(HashKind::Product, hashes.to_vec()),
            Mask::Full,
        ))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        Ok(Value::Seq(args))
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::from_parts(HashKind::Product, inputs.to_vec())
    }
}

/// Produces a fixed value; arity zero.
pub struct ConstantEdge {
    value: Value,
}

impl ConstantEdge {
    pub fn new(value: Value) -> Self {
        ConstantEdge { value }
    }
}

impl MaskedEdge for ConstantEdge {
    fn arity(&self) -> usize {
        0
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, _hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        Ok((NodeHash::from_leaf(self.value.clone()), Mask::Full))
    }

    fn evaluate_masked(&self, _args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        Ok(self.value.clone())
    }

    fn hash_graph(&self, _inputs: &[NodeHash]) -> NodeHash {
        NodeHash::from_leaf(self.value.clone())
    }
}

/// Consults a backend keyed by the parent's hash. On a hit the parent
/// subtree is never evaluated; on a miss the computed value is stored.
pub struct CacheEdge {
    backend: Arc<dyn CacheBackend>,
}

impl CacheEdge {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        CacheEdge { backend }
    }
}

impl MaskedEdge for CacheEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        let output = hashes[0].clone();
        let hit = self.backend.contains(&output)?;
        debug!(key = %&output.hex()[..12], hit, "cache probe");
        let mask = if hit { Mask::none() } else { Mask::Full };
        Ok((output, mask))
    }

    fn evaluate_masked(&self, mut args: Vec<Value>, _mask: &Mask, output: &NodeHash) -> Result<Value> {
        // no arguments means the value is cached
        if args.is_empty() {
            return self.backend.get(output);
        }
        let value = args.swap_remove(0);
        if value.is_nothing() {
            return Ok(value);
        }
        self.backend.set(output, value.clone())?;
        Ok(value)
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        inputs[0].clone()
    }
}

/// Replaces the output hash with the `Nothing` leaf when the selector
/// rejects the parent's payload; evaluation then short-circuits.
pub struct SwitchEdge {
    selector: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl SwitchEdge {
    pub fn new(selector: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        SwitchEdge {
            selector: Arc::new(selector),
        }
    }
}

impl MaskedEdge for SwitchEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        let hash = &hashes[0];
        let Some(data) = hash.data() else {
            return Err(Error::evaluation("switch selector needs a leaf hash"));
        };
        if !(self.selector)(data) {
            return Ok((NodeHash::nothing(), Mask::Full));
        }
        Ok((hash.clone(), Mask::Full))
    }

    fn evaluate_masked(&self, mut args: Vec<Value>, _mask: &Mask, output: &NodeHash) -> Result<Value> {
        if output.is_nothing() {
            return Ok(Value::Nothing);
        }
        Ok(args.swap_remove(0))
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::from_parts(HashKind::Switch, inputs.to_vec())
    }
}

/// Picks the unique non-`Nothing` branch out of a product.
pub struct ProjectionEdge;

impl MaskedEdge for ProjectionEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        let live: Vec<&NodeHash> = hashes[0]
            .children()
            .iter()
            .filter(|child| !child.is_nothing())
            .collect();
        if live.len() != 1 {
            return Err(Error::evaluation(format!(
                "projection expects exactly one live branch, found {}",
                live.len()
            )));
        }
        Ok((live[0].clone(), Mask::Full))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        let Some(items) = args[0].as_seq() else {
            return Err(Error::evaluation("projection expects a sequence argument"));
        };
        let live: Vec<&Value> = items.iter().filter(|item| !item.is_nothing()).collect();
        if live.len() != 1 {
            return Err(Error::evaluation(format!(
                "projection expects exactly one live value, found {}",
                live.len()
            )));
        }
        Ok(live[0].clone())
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::merge(inputs.to_vec())
    }
}

/// Routes by a key value to one of several branches. Parent 0 is the key;
/// parents 1..=n are the branches. Only the selected branch is ever
/// hashed or evaluated.
pub struct KeyedSwitchEdge {
    index: Vec<(Value, usize)>,
    branches: usize,
}

impl KeyedSwitchEdge {
    pub fn new(index: Vec<(Value, usize)>, branches: usize) -> Self {
        KeyedSwitchEdge { index, branches }
    }

    fn branch_for(&self, key: &Value) -> Result<usize> {
        self.index
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, at)| *at)
            .ok_or_else(|| Error::Identifier(format!("{key:?}")))
    }
}

enum KeyedHashState {
    Start,
    AwaitKey,
    AwaitBranch(usize),
}

struct KeyedSwitchHashFlow<'e> {
    edge: &'e KeyedSwitchEdge,
    state: KeyedHashState,
}

impl Flow for KeyedSwitchHashFlow<'_> {
    type Output = HashOutput;

    fn resume(&mut self, reply: Option<Reply>) -> Result<FlowStep<HashOutput>> {
        let state = std::mem::replace(&mut self.state, KeyedHashState::Start);
        match (state, reply) {
            (KeyedHashState::Start, None) => {
                self.state = KeyedHashState::AwaitKey;
                Ok(FlowStep::Ask(Request {
                    index: 0,
                    kind: RequestKind::Value,
                }))
            }
            (KeyedHashState::AwaitKey, Some(Reply::Value(key))) => {
                let branch = self.edge.branch_for(&key)?;
                self.state = KeyedHashState::AwaitBranch(branch);
                Ok(FlowStep::Ask(Request {
                    index: branch + 1,
                    kind: RequestKind::Hash,
                }))
            }
            (KeyedHashState::AwaitBranch(branch), Some(Reply::Hash(hash))) => {
                Ok(FlowStep::Done((hash, Payload::Branch(branch))))
            }
            _ => Err(Error::evaluation("protocol violation in keyed switch")),
        }
    }
}

struct KeyedSwitchValueFlow {
    branch: usize,
    asked: bool,
}

impl Flow for KeyedSwitchValueFlow {
    type Output = Value;

    fn resume(&mut self, reply: Option<Reply>) -> Result<FlowStep<Value>> {
        match reply {
            None if !self.asked => {
                self.asked = true;
                Ok(FlowStep::Ask(Request {
                    index: self.branch + 1,
                    kind: RequestKind::Value,
                }))
            }
            Some(Reply::Value(value)) => Ok(FlowStep::Done(value)),
            _ => Err(Error::evaluation("protocol violation in keyed switch")),
        }
    }
}

impl Edge for KeyedSwitchEdge {
    fn arity(&self) -> usize {
        1 + self.branches
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn compute_hash(&self) -> Box<dyn Flow<Output = HashOutput> + '_> {
        Box::new(KeyedSwitchHashFlow {
            edge: self,
            state: KeyedHashState::Start,
        })
    }

    fn evaluate(&self, _output: &NodeHash, payload: Payload) -> Box<dyn Flow<Output = Value> + '_> {
        let branch = match payload {
            Payload::Branch(branch) => branch,
            // the payload always comes from our own hash phase
            _ => 0,
        };
        Box::new(KeyedSwitchValueFlow {
            branch,
            asked: false,
        })
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::merge(inputs.to_vec())
    }
}

/// Builds `{subgraph(id) -> sorted member ids}` from a sequence of ids.
/// Memoized: after the first evaluation the edge reports an empty mask
/// and never requests its parent again.
pub struct MappingEdge {
    graph: Graph,
    memo: Mutex<Option<Value>>,
}

impl MappingEdge {
    pub fn new(graph: Graph) -> Self {
        MappingEdge {
            graph,
            memo: Mutex::new(None),
        }
    }
}

impl MaskedEdge for MappingEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        let output = NodeHash::from_parts(
            HashKind::Mapping,
            vec![hashes[0].clone(), self.graph.shape_hash()],
        );
        let mask = if self.memo.lock().unwrap().is_some() {
            Mask::none()
        } else {
            Mask::Full
        };
        Ok((output, mask))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        let mut memo = self.memo.lock().unwrap();
        if let Some(mapping) = memo.as_ref() {
            return Ok(mapping.clone());
        }
        let Some(ids) = args.first().and_then(Value::as_seq) else {
            return Err(Error::evaluation("mapping expects a sequence of ids"));
        };
        let mut groups: std::collections::BTreeMap<Value, Vec<Value>> = Default::default();
        for id in ids {
            let key = self.graph.call_positional(&[id.clone()])?;
            groups.entry(key).or_default().push(id.clone());
        }
        let mapping = Value::map(groups.into_iter().map(|(key, mut members)| {
            members.sort();
            (key, Value::Seq(members))
        }));
        *memo = Some(mapping.clone());
        Ok(mapping)
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::from_parts(
            HashKind::Mapping,
            vec![inputs[0].clone(), self.graph.shape_hash()],
        )
    }
}

/// Evaluates a subgraph for every member of one equivalence class.
/// Parent 0 is the class id, parent 1 the mapping.
pub struct GroupingEdge {
    graph: Graph,
}

impl GroupingEdge {
    pub fn new(graph: Graph) -> Self {
        GroupingEdge { graph }
    }
}

impl MaskedEdge for GroupingEdge {
    fn arity(&self) -> usize {
        2
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        Ok((
            NodeHash::from_parts(
                HashKind::Grouping,
                vec![hashes[0].clone(), hashes[1].clone(), self.graph.shape_hash()],
            ),
            Mask::Full,
        ))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        let class = &args[0];
        let members = args[1]
            .map_get(class)
            .ok_or_else(|| Error::Identifier(format!("{class:?}")))?;
        let Some(members) = members.as_seq() else {
            return Err(Error::evaluation("grouping expects sequences of member ids"));
        };
        let mut result = Vec::with_capacity(members.len());
        for member in members {
            result.push((member.clone(), self.graph.call_positional(&[member.clone()])?));
        }
        Ok(Value::map(result))
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        let mut children = inputs.to_vec();
        children.push(self.graph.shape_hash());
        NodeHash::from_parts(HashKind::Grouping, children)
    }
}

/// As [`MappingEdge`], but classes are formed by arbitrary equivalence
/// relations over the subgraph's keys, and class ids are synthesized by
/// double-hashing the sorted member ids.
pub struct HashMappingEdge {
    graph: Graph,
    comparators: Vec<(String, Comparator)>,
    memo: Mutex<Option<Value>>,
}

impl HashMappingEdge {
    pub fn new(graph: Graph, comparators: Vec<(String, Comparator)>) -> Self {
        HashMappingEdge {
            graph,
            comparators,
            memo: Mutex::new(None),
        }
    }

    fn hash_children(&self, input: &NodeHash) -> Vec<NodeHash> {
        let mut children = vec![input.clone()];
        for (label, _) in &self.comparators {
            children.push(NodeHash::from_leaf(Value::Str(label.clone())));
        }
        children.push(NodeHash::from_leaf(Value::Str("blake3".into())));
        children.push(self.graph.shape_hash());
        children
    }

    fn synthetic_key(members: &[Value]) -> Value {
        // double hashing lets us get rid of separators
        let mut outer = blake3::Hasher::new();
        for member in members {
            outer.update(value_digest(member).as_bytes());
        }
        Value::Str(outer.finalize().to_hex().to_string())
    }
}

impl MaskedEdge for HashMappingEdge {
    fn arity(&self) -> usize {
        1
    }

    fn uses_hash(&self) -> bool {
        true
    }

    fn process_hashes(&self, hashes: &[NodeHash]) -> Result<(NodeHash, Mask)> {
        let output = NodeHash::from_parts(HashKind::MultiMapping, self.hash_children(&hashes[0]));
        let mask = if self.memo.lock().unwrap().is_some() {
            Mask::none()
        } else {
            Mask::Full
        };
        Ok((output, mask))
    }

    fn evaluate_masked(&self, args: Vec<Value>, _mask: &Mask, _output: &NodeHash) -> Result<Value> {
        let mut memo = self.memo.lock().unwrap();
        if let Some(mapping) = memo.as_ref() {
            return Ok(mapping.clone());
        }
        let Some(ids) = args.first().and_then(Value::as_seq) else {
            return Err(Error::evaluation("mapping expects a sequence of ids"));
        };

        let mut groups: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        for id in ids {
            let keys = self.graph.call_positional(&[id.clone()])?;
            let Some(keys) = keys.as_seq() else {
                return Err(Error::evaluation("grouping keys must form a sequence"));
            };
            if keys.len() != self.comparators.len() {
                return Err(Error::evaluation(format!(
                    "expected {} grouping keys, found {}",
                    self.comparators.len(),
                    keys.len()
                )));
            }
            // either find a class for the id or start a new one
            let found = groups.iter_mut().find(|(entry, _)| {
                self.comparators
                    .iter()
                    .zip(entry.iter().zip(keys))
                    .all(|((_, compare), (have, want))| compare(have, want))
            });
            match found {
                Some((_, members)) => members.push(id.clone()),
                None => groups.push((keys.to_vec(), vec![id.clone()])),
            }
        }

        let mapping = Value::map(groups.into_iter().map(|(_, mut members)| {
            members.sort();
            (Self::synthetic_key(&members), Value::Seq(members))
        }));
        *memo = Some(mapping.clone());
        Ok(mapping)
    }

    fn hash_graph(&self, inputs: &[NodeHash]) -> NodeHash {
        NodeHash::from_parts(HashKind::MultiMapping, self.hash_children(&inputs[0]))
    }
}
