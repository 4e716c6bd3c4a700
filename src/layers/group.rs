//! Group-by layers: remap an identifier-keyed dataset by an equivalence
//! relation computed from the previous stage.

use std::sync::Arc;

use crate::engine::{
    BoundEdge, Comparator, DynFunction, Edge, FunctionEdge, Graph, GroupingEdge, HashMappingEdge,
    MappingEdge, Node, ProductEdge, TreeNode,
};
use crate::errors::{Error, Result};
use crate::layers::{find_node, EdgesBag, Wrapper};
use crate::value::Value;

/// Groups the dataset by the values of one attribute: the grouped layer's
/// identifiers are that attribute's values, and every other attribute
/// becomes a per-group map `{member id -> value}`.
pub struct GroupLayer {
    name: String,
}

impl GroupLayer {
    pub fn new(name: &str) -> Self {
        GroupLayer {
            name: name.to_string(),
        }
    }
}

impl Wrapper for GroupLayer {
    fn wrap(&self, base: &EdgesBag) -> Result<EdgesBag> {
        let plan = GroupPlan::prepare(base)?;
        let key_output = find_node(base.outputs(), &self.name)?;
        let mapping_graph = plan.subgraph(key_output)?;
        plan.assemble(
            base,
            Arc::new(MappingEdge::new(mapping_graph)),
            &[self.name.as_str()],
        )
    }
}

/// As [`GroupLayer`], but classes are defined by arbitrary equivalence
/// relations over several attributes; class identifiers are synthesized
/// from the member ids.
pub struct MultiGroupLayer {
    comparators: Vec<(String, Comparator)>,
}

impl MultiGroupLayer {
    /// Comparators are sorted by attribute name; each label participates
    /// in the grouping's hash identity.
    pub fn new(comparators: Vec<(String, Comparator)>) -> Self {
        let mut comparators = comparators;
        comparators.sort_by(|(a, _), (b, _)| a.cmp(b));
        MultiGroupLayer { comparators }
    }
}

impl Wrapper for MultiGroupLayer {
    fn wrap(&self, base: &EdgesBag) -> Result<EdgesBag> {
        let mut plan = GroupPlan::prepare(base)?;

        // the compared attributes feed one product node
        let mut compared = Vec::with_capacity(self.comparators.len());
        for (name, _) in &self.comparators {
            compared.push(find_node(base.outputs(), name)?.clone());
        }
        let product = Node::new("$product");
        plan.extra_edges.push(BoundEdge::new(
            Arc::new(ProductEdge::new(compared.len())),
            compared,
            product.clone(),
        )?);

        let mapping_graph = plan.subgraph(&product)?;
        let grouped_names: Vec<&str> = self
            .comparators
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        plan.assemble(
            base,
            Arc::new(HashMappingEdge::new(
                mapping_graph,
                self.comparators.clone(),
            )),
            &grouped_names,
        )
    }
}

/// The wiring shared by both group layers: a mapping node fed by the
/// previous `ids`, one grouping edge per surviving output, and a fresh
/// `ids` derived from the mapping keys.
struct GroupPlan {
    source_edges: Vec<BoundEdge>,
    source_input: Node,
    ids_output: Node,
    extra_edges: Vec<BoundEdge>,
}

impl GroupPlan {
    fn prepare(base: &EdgesBag) -> Result<GroupPlan> {
        let [input] = base.inputs() else {
            return Err(Error::Structural(
                "grouping requires a single-input layer".into(),
            ));
        };
        let ids_output = find_node(base.outputs(), "ids")?.clone();
        Ok(GroupPlan {
            source_edges: base.edges().to_vec(),
            source_input: input.clone(),
            ids_output,
            extra_edges: Vec::new(),
        })
    }

    fn combined_edges(&self) -> Vec<BoundEdge> {
        let mut edges = self.source_edges.clone();
        edges.extend_from_slice(&self.extra_edges);
        edges
    }

    /// Compile the subgraph computing `output` from the source input.
    fn subgraph(&self, output: &Node) -> Result<Graph> {
        let tree = TreeNode::from_edges(&self.combined_edges())?;
        let tree_input = tree
            .get(&self.source_input.id())
            .cloned()
            .unwrap_or_else(|| TreeNode::leaf(&self.source_input));
        let tree_output = tree
            .get(&output.id())
            .cloned()
            .ok_or_else(|| Error::Structural(format!("no node named `{}`", output.name())))?;
        Graph::new(vec![tree_input], tree_output)
    }

    fn assemble(
        self,
        base: &EdgesBag,
        mapping_edge: Arc<dyn Edge>,
        consumed: &[&str],
    ) -> Result<EdgesBag> {
        let changed_input = Node::new("id");
        let mapping_node = Node::new("$mapping");
        let mut outputs = vec![changed_input.clone()];

        let mut edges = self.combined_edges();
        edges.push(BoundEdge::new(
            mapping_edge,
            vec![self.ids_output.clone()],
            mapping_node.clone(),
        )?);

        for output in base.outputs() {
            let name = output.name();
            if name == "id" || name == "ids" || consumed.contains(&name) {
                continue;
            }
            let grouped = Node::new(name);
            edges.push(BoundEdge::new(
                Arc::new(GroupingEdge::new(self.subgraph(output)?)),
                vec![changed_input.clone(), mapping_node.clone()],
                grouped.clone(),
            )?);
            outputs.push(grouped);
        }

        let new_ids = Node::new("ids");
        edges.push(BoundEdge::new(
            Arc::new(FunctionEdge::new(
                DynFunction::new("ids", |args: &[Value]| {
                    let Some(keys) = args[0].map_keys() else {
                        return Err(Error::evaluation("expected a mapping"));
                    };
                    Ok(Value::Seq(keys.cloned().collect()))
                }),
                1,
            )),
            vec![mapping_node],
            new_ids.clone(),
        )?);
        outputs.push(new_ids);

        Ok(EdgesBag::new(vec![changed_input], outputs, edges))
    }
}
