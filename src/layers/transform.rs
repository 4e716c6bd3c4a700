//! Layers of named function transformations.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::engine::{BoundEdge, ConstantEdge, DynFunction, FunctionEdge, Node};
use crate::errors::{Error, Result};
use crate::layers::EdgesBag;
use crate::value::Value;

struct OutputSpec {
    name: String,
    args: Vec<String>,
    function: DynFunction,
}

/// Builds a transform layer: named outputs computed from named inputs,
/// optional constants, optional inverse transforms.
#[derive(Default)]
pub struct TransformBuilder {
    outputs: Vec<OutputSpec>,
    constants: Vec<(String, Value)>,
    inverses: Vec<OutputSpec>,
}

/// Entry point for building transform layers.
pub struct TransformLayer;

impl TransformLayer {
    pub fn builder() -> TransformBuilder {
        TransformBuilder::default()
    }
}

impl TransformBuilder {
    /// Declare an output computed from the named inputs. The output name
    /// doubles as the function's hash identity, so distinct computations
    /// must carry distinct names (or use [`output_labeled`]).
    ///
    /// [`output_labeled`]: TransformBuilder::output_labeled
    pub fn output(
        self,
        name: &str,
        args: &[&str],
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        let label = name.to_string();
        self.output_labeled(name, &label, args, f)
    }

    /// As [`output`], with an explicit hash identity label.
    ///
    /// [`output`]: TransformBuilder::output
    pub fn output_labeled(
        mut self,
        name: &str,
        label: &str,
        args: &[&str],
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            function: DynFunction::new(label, f),
        });
        self
    }

    /// Declare a constant output (arity zero).
    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.constants.push((name.to_string(), value));
        self
    }

    /// Declare an inverse transform: maps this layer's output space back
    /// toward its input space.
    pub fn inverse(
        mut self,
        name: &str,
        args: &[&str],
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.inverses.push(OutputSpec {
            name: name.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            function: DynFunction::new(format!("{name}~inverse"), f),
        });
        self
    }

    pub fn build(self) -> Result<EdgesBag> {
        let mut names = BTreeSet::new();
        for spec in &self.outputs {
            if !names.insert(spec.name.clone()) {
                return Err(Error::Structural(format!(
                    "duplicate output `{}`",
                    spec.name
                )));
            }
        }
        for (name, _) in &self.constants {
            if !names.insert(name.clone()) {
                return Err(Error::Structural(format!("duplicate output `{name}`")));
            }
        }

        // argument names refer to the previous stage
        let input_names: BTreeSet<&str> = self
            .outputs
            .iter()
            .flat_map(|spec| spec.args.iter().map(String::as_str))
            .collect();
        let inputs: Vec<Node> = input_names.iter().map(|name| Node::new(*name)).collect();

        let mut edges = Vec::new();
        let mut outputs = Vec::new();
        for spec in self.outputs {
            let node = Node::new(&spec.name);
            let parents = bind_args(&spec.args, &inputs)?;
            edges.push(BoundEdge::new(
                Arc::new(FunctionEdge::new(spec.function, parents.len())),
                parents,
                node.clone(),
            )?);
            outputs.push(node);
        }
        for (name, value) in self.constants {
            let node = Node::new(&name);
            edges.push(BoundEdge::new(
                Arc::new(ConstantEdge::new(value)),
                Vec::new(),
                node.clone(),
            )?);
            outputs.push(node);
        }

        // backward space mirrors the forward output names
        let backward_names: BTreeSet<&str> = self
            .inverses
            .iter()
            .flat_map(|spec| spec.args.iter().map(String::as_str))
            .collect();
        let backward_inputs: Vec<Node> =
            backward_names.iter().map(|name| Node::new(*name)).collect();
        let mut backward_outputs = Vec::new();
        for spec in self.inverses {
            let node = Node::new(&spec.name);
            let parents = bind_args(&spec.args, &backward_inputs)?;
            edges.push(BoundEdge::new(
                Arc::new(FunctionEdge::new(spec.function, parents.len())),
                parents,
                node.clone(),
            )?);
            backward_outputs.push(node);
        }

        Ok(EdgesBag::new(inputs, outputs, edges)
            .with_backward(backward_inputs, backward_outputs))
    }
}

fn bind_args(args: &[String], pool: &[Node]) -> Result<Vec<Node>> {
    args.iter()
        .map(|arg| {
            pool.iter()
                .find(|node| node.name() == arg.as_str())
                .cloned()
                .ok_or_else(|| Error::Structural(format!("unbound argument `{arg}`")))
        })
        .collect()
}
