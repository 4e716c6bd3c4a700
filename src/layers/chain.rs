//! Chaining layers into pipelines.

use std::sync::Arc;

use ahash::AHashMap;

use crate::engine::{BoundEdge, IdentityEdge, Node};
use crate::errors::{Error, Result};
use crate::layers::EdgesBag;

/// Chain layers left to right: each layer's inputs are wired to the
/// previous layer's outputs by name. Backward nodes chain right to left;
/// layers without backward nodes are backward-transparent. Layers are
/// refreshed on entry, so the same layer may appear more than once.
pub fn pipeline(layers: &[EdgesBag]) -> Result<EdgesBag> {
    let Some((first, rest)) = layers.split_first() else {
        return Err(Error::Structural("empty pipeline".into()));
    };
    let mut acc = first.refresh()?;
    for layer in rest {
        acc = connect(&acc, &layer.refresh()?)?;
    }
    Ok(acc)
}

fn node_to_dict(nodes: &[Node]) -> AHashMap<&str, &Node> {
    nodes.iter().map(|node| (node.name(), node)).collect()
}

fn connect(head: &EdgesBag, tail: &EdgesBag) -> Result<EdgesBag> {
    let mut edges = head.edges().to_vec();
    edges.extend_from_slice(tail.edges());

    let head_outputs = node_to_dict(head.outputs());
    for input in tail.inputs() {
        let previous = head_outputs.get(input.name()).ok_or_else(|| {
            Error::Structural(format!(
                "no output named `{}` to feed the next layer",
                input.name()
            ))
        })?;
        edges.push(BoundEdge::new(
            Arc::new(IdentityEdge),
            vec![(*previous).clone()],
            input.clone(),
        )?);
    }

    // backward flows right to left
    let (backward_inputs, backward_outputs) = match (head.has_backward(), tail.has_backward()) {
        (false, false) => (Vec::new(), Vec::new()),
        (true, false) => (
            head.backward_inputs().to_vec(),
            head.backward_outputs().to_vec(),
        ),
        (false, true) => (
            tail.backward_inputs().to_vec(),
            tail.backward_outputs().to_vec(),
        ),
        (true, true) => {
            let tail_backward = node_to_dict(tail.backward_outputs());
            for input in head.backward_inputs() {
                let previous = tail_backward.get(input.name()).ok_or_else(|| {
                    Error::Structural(format!(
                        "no backward output named `{}` to feed the previous layer",
                        input.name()
                    ))
                })?;
                edges.push(BoundEdge::new(
                    Arc::new(IdentityEdge),
                    vec![(*previous).clone()],
                    input.clone(),
                )?);
            }
            (
                tail.backward_inputs().to_vec(),
                head.backward_outputs().to_vec(),
            )
        }
    };

    Ok(
        EdgesBag::new(head.inputs().to_vec(), tail.outputs().to_vec(), edges)
            .with_backward(backward_inputs, backward_outputs),
    )
}
