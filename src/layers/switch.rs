//! Keyed routing across branch layers.

use std::sync::Arc;

use crate::engine::{BoundEdge, ConstantEdge, IdentityEdge, KeyedSwitchEdge, Node};
use crate::errors::{Error, Result};
use crate::layers::EdgesBag;
use crate::value::Value;

/// Routes every shared output through the branch selected by the input
/// identifier. Adds a constant output listing the known identifiers.
pub struct SwitchLayer;

impl SwitchLayer {
    /// `index` maps identifiers to branch positions in `layers`. Every
    /// branch must expose exactly one input, under the same name.
    pub fn new(
        index: Vec<(Value, usize)>,
        layers: &[EdgesBag],
        keys_name: &str,
    ) -> Result<EdgesBag> {
        // refreshed so the same layer can back several branches
        let layers: Vec<EdgesBag> = layers
            .iter()
            .map(EdgesBag::refresh)
            .collect::<Result<_>>()?;

        let mut branch_inputs = Vec::with_capacity(layers.len());
        let mut edges = Vec::new();
        for layer in &layers {
            let [input] = layer.inputs() else {
                return Err(Error::Structural(
                    "each branch must have exactly one input".into(),
                ));
            };
            branch_inputs.push(input.clone());
            edges.extend_from_slice(layer.edges());
        }

        let Some(first) = branch_inputs.first() else {
            return Err(Error::Structural("a switch needs at least one branch".into()));
        };
        if branch_inputs
            .iter()
            .any(|input| input.name() != first.name())
        {
            return Err(Error::Structural(
                "branch inputs must share the same name".into(),
            ));
        }

        for (_, at) in &index {
            if *at >= layers.len() {
                return Err(Error::Structural(format!(
                    "branch index {at} is out of range"
                )));
            }
        }

        let input = Node::new(first.name());
        for branch_input in &branch_inputs {
            edges.push(BoundEdge::new(
                Arc::new(IdentityEdge),
                vec![input.clone()],
                branch_input.clone(),
            )?);
        }

        // the outputs every branch agrees on, deterministically ordered
        let mut common: Vec<&str> = layers[0]
            .outputs()
            .iter()
            .map(Node::name)
            .filter(|name| *name != keys_name)
            .filter(|name| {
                layers[1..].iter().all(|layer| {
                    layer.outputs().iter().any(|node| node.name() == *name)
                })
            })
            .collect();
        common.sort_unstable();

        let mut outputs = Vec::with_capacity(common.len() + 1);
        for name in common {
            let output = Node::new(name);
            let mut parents = vec![input.clone()];
            for layer in &layers {
                parents.push(crate::layers::find_node(layer.outputs(), name)?.clone());
            }
            edges.push(BoundEdge::new(
                Arc::new(KeyedSwitchEdge::new(index.clone(), layers.len())),
                parents,
                output.clone(),
            )?);
            outputs.push(output);
        }

        let mut keys: Vec<Value> = index.iter().map(|(key, _)| key.clone()).collect();
        keys.sort();
        let keys_node = Node::new(keys_name);
        edges.push(BoundEdge::new(
            Arc::new(ConstantEdge::new(Value::Seq(keys))),
            Vec::new(),
            keys_node.clone(),
        )?);
        outputs.push(keys_node);

        Ok(EdgesBag::new(vec![input], outputs, edges))
    }
}
