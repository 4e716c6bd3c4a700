//! Structural hashes identifying node values.
//!
//! A [`NodeHash`] is a content-addressed identifier for the value a tree
//! node will produce, given the graph shape and the inputs. Hashes form a
//! small algebra: leaves wrap concrete payloads, composites combine child
//! hashes under a kind tag. Equality is structural — kind, children and
//! payload digests — and child order is always significant.
//!
//! The evaluator traverses the hash tree independently of the value tree:
//! a projection or switch can pick a child hash without that child's value
//! ever being materialized, and a cache can probe its store with nothing
//! but a digest.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};

use crate::value::{value_digest, Value};

/// Kind tag of a hash node. The set is closed; commutativity is never
/// assumed for any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Leaf,
    Function,
    Product,
    Mapping,
    Grouping,
    MultiMapping,
    Switch,
    Merge,
    Graph,
}

impl HashKind {
    fn tag(self) -> u8 {
        match self {
            HashKind::Leaf => 0,
            HashKind::Function => 1,
            HashKind::Product => 2,
            HashKind::Mapping => 3,
            HashKind::Grouping => 4,
            HashKind::MultiMapping => 5,
            HashKind::Switch => 6,
            HashKind::Merge => 7,
            HashKind::Graph => 8,
        }
    }
}

struct Inner {
    kind: HashKind,
    children: Vec<NodeHash>,
    data: Option<Value>,
    digest: OnceCell<blake3::Hash>,
}

/// A structural, content-addressed hash. Cheap to clone; the digest is
/// computed lazily and memoized.
#[derive(Clone)]
pub struct NodeHash(Arc<Inner>);

static NOTHING: Lazy<NodeHash> = Lazy::new(|| NodeHash::from_leaf(Value::Nothing));

// Shared stand-in for every input when hashing graph shape. Content-stable
// so that shape hashes survive as persistent cache identifiers.
static PLACEHOLDER: Lazy<NodeHash> =
    Lazy::new(|| NodeHash::from_leaf(Value::Bytes(b"~input~".to_vec())));

impl NodeHash {
    /// Wrap a concrete payload.
    pub fn from_leaf(data: Value) -> Self {
        NodeHash(Arc::new(Inner {
            kind: HashKind::Leaf,
            children: Vec::new(),
            data: Some(data),
            digest: OnceCell::new(),
        }))
    }

    /// Combine child hashes under a kind tag.
    pub fn from_parts(kind: HashKind, children: Vec<NodeHash>) -> Self {
        NodeHash(Arc::new(Inner {
            kind,
            children,
            data: None,
            digest: OnceCell::new(),
        }))
    }

    /// Union of alternatives, used by switching layers.
    pub fn merge(children: Vec<NodeHash>) -> Self {
        NodeHash::from_parts(HashKind::Merge, children)
    }

    /// Wrap a graph-shape hash.
    pub fn from_graph(inner: NodeHash) -> Self {
        NodeHash::from_parts(HashKind::Graph, vec![inner])
    }

    /// The hash of the absent-branch sentinel.
    pub fn nothing() -> Self {
        NOTHING.clone()
    }

    pub(crate) fn input_placeholder() -> Self {
        PLACEHOLDER.clone()
    }

    pub fn kind(&self) -> HashKind {
        self.0.kind
    }

    pub fn children(&self) -> &[NodeHash] {
        &self.0.children
    }

    /// Leaf payload, if this is a leaf.
    pub fn data(&self) -> Option<&Value> {
        self.0.data.as_ref()
    }

    pub fn is_nothing(&self) -> bool {
        self.data() == Some(&Value::Nothing)
    }

    /// The memoized digest. Equality and hashing go through this.
    pub fn digest(&self) -> &blake3::Hash {
        self.0.digest.get_or_init(|| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&[self.0.kind.tag()]);
            if let Some(data) = &self.0.data {
                hasher.update(value_digest(data).as_bytes());
            }
            for child in &self.0.children {
                hasher.update(child.digest().as_bytes());
            }
            hasher.finalize()
        })
    }

    /// Hex form of the digest; the key persistent caches store under.
    pub fn hex(&self) -> String {
        self.digest().to_hex().to_string()
    }
}

impl PartialEq for NodeHash {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.digest() == other.digest()
    }
}

impl Eq for NodeHash {}

impl Hash for NodeHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.digest().as_bytes());
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({:?}, {})", self.0.kind, &self.hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_equality_is_by_payload() {
        assert_eq!(NodeHash::from_leaf(Value::from(1)), NodeHash::from_leaf(Value::from(1)));
        assert_ne!(NodeHash::from_leaf(Value::from(1)), NodeHash::from_leaf(Value::from(2)));
    }

    #[test]
    fn test_kinds_separate_digests() {
        let a = NodeHash::from_leaf(Value::from("x"));
        let b = NodeHash::from_leaf(Value::from("y"));
        let product = NodeHash::from_parts(HashKind::Product, vec![a.clone(), b.clone()]);
        let merge = NodeHash::merge(vec![a.clone(), b.clone()]);
        assert_ne!(product, merge);
    }

    #[test]
    fn test_child_order_matters() {
        let a = NodeHash::from_leaf(Value::from("x"));
        let b = NodeHash::from_leaf(Value::from("y"));
        let ab = NodeHash::from_parts(HashKind::Product, vec![a.clone(), b.clone()]);
        let ba = NodeHash::from_parts(HashKind::Product, vec![b, a]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_nothing_is_a_distinct_leaf() {
        assert!(NodeHash::nothing().is_nothing());
        assert_ne!(NodeHash::nothing(), NodeHash::from_leaf(Value::Null));
        assert_eq!(NodeHash::nothing(), NodeHash::from_leaf(Value::Nothing));
    }

    #[test]
    fn test_graph_wrapper_changes_digest() {
        let inner = NodeHash::from_leaf(Value::from(7));
        assert_ne!(NodeHash::from_graph(inner.clone()), inner);
    }
}
