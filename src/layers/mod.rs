//! Layer composition: named transformations bundled into [`EdgesBag`]s,
//! chained into pipelines and rewritten by wrapper layers.

mod cache;
mod chain;
mod group;
mod switch;
mod transform;

pub use cache::CacheLayer;
pub use chain::pipeline;
pub use group::{GroupLayer, MultiGroupLayer};
pub use switch::SwitchLayer;
pub use transform::{TransformBuilder, TransformLayer};

use std::sync::Arc;

use ahash::AHashMap;

use crate::engine::{BoundEdge, Graph, Node, TreeNode};
use crate::errors::{Error, Result};

/// A self-contained bundle of nodes and edges with named inputs and
/// outputs, plus optional backward (inverse) nodes. The unit of layer
/// composition: pipelines connect bags by name, wrappers rewrite them.
#[derive(Clone, Default, Debug)]
pub struct EdgesBag {
    inputs: Vec<Node>,
    outputs: Vec<Node>,
    edges: Vec<BoundEdge>,
    backward_inputs: Vec<Node>,
    backward_outputs: Vec<Node>,
}

impl EdgesBag {
    pub fn new(inputs: Vec<Node>, outputs: Vec<Node>, edges: Vec<BoundEdge>) -> Self {
        EdgesBag {
            inputs,
            outputs,
            edges,
            backward_inputs: Vec::new(),
            backward_outputs: Vec::new(),
        }
    }

    pub fn with_backward(
        mut self,
        backward_inputs: Vec<Node>,
        backward_outputs: Vec<Node>,
    ) -> Self {
        self.backward_inputs = backward_inputs;
        self.backward_outputs = backward_outputs;
        self
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Node] {
        &self.outputs
    }

    pub fn edges(&self) -> &[BoundEdge] {
        &self.edges
    }

    pub(crate) fn backward_inputs(&self) -> &[Node] {
        &self.backward_inputs
    }

    pub(crate) fn backward_outputs(&self) -> &[Node] {
        &self.backward_outputs
    }

    pub(crate) fn has_backward(&self) -> bool {
        !self.backward_inputs.is_empty() || !self.backward_outputs.is_empty()
    }

    /// A copy with fresh node identities (edges stay shared). Lets one
    /// layer appear several times in a pipeline or switch without its
    /// nodes colliding.
    pub fn refresh(&self) -> Result<EdgesBag> {
        let mut remap: AHashMap<u64, Node> = AHashMap::new();
        let mut edges = Vec::with_capacity(self.edges.len());
        for bound in &self.edges {
            let inputs = bound
                .inputs()
                .iter()
                .map(|node| fresh(node, &mut remap))
                .collect();
            let output = fresh(bound.output(), &mut remap);
            edges.push(BoundEdge::new(bound.edge().clone(), inputs, output)?);
        }
        Ok(EdgesBag {
            inputs: relabel(&self.inputs, &mut remap),
            outputs: relabel(&self.outputs, &mut remap),
            edges,
            backward_inputs: relabel(&self.backward_inputs, &mut remap),
            backward_outputs: relabel(&self.backward_outputs, &mut remap),
        })
    }

    /// Compile the graph computing the named output from this bag's
    /// inputs.
    pub fn forward_method(&self, name: &str) -> Result<Graph> {
        let output = find_node(&self.outputs, name)?;
        self.compile(&self.inputs, output)
    }

    /// Compile the inverse transform for the named attribute.
    pub fn backward_method(&self, name: &str) -> Result<Graph> {
        let output = find_node(&self.backward_outputs, name)?;
        self.compile(&self.backward_inputs, output)
    }

    fn compile(&self, inputs: &[Node], output: &Node) -> Result<Graph> {
        let tree = TreeNode::from_edges(&self.edges)?;
        let pick = |node: &Node| -> Arc<TreeNode> {
            tree.get(&node.id())
                .cloned()
                .unwrap_or_else(|| TreeNode::leaf(node))
        };
        let tree_inputs = inputs.iter().map(pick).collect();
        let tree_output = pick(output);
        Graph::new(tree_inputs, tree_output)
    }
}

fn fresh(node: &Node, remap: &mut AHashMap<u64, Node>) -> Node {
    remap
        .entry(node.id())
        .or_insert_with(|| Node::new(node.name()))
        .clone()
}

fn relabel(nodes: &[Node], remap: &mut AHashMap<u64, Node>) -> Vec<Node> {
    nodes.iter().map(|node| fresh(node, remap)).collect()
}

pub(crate) fn find_node<'n>(nodes: &'n [Node], name: &str) -> Result<&'n Node> {
    nodes
        .iter()
        .find(|node| node.name() == name)
        .ok_or_else(|| Error::Structural(format!("no node named `{name}`")))
}

/// Layers that rewrite the bag produced by the previous stage.
pub trait Wrapper {
    fn wrap(&self, base: &EdgesBag) -> Result<EdgesBag>;
}
