//! Cache layers: wrap named outputs with cache edges over a shared
//! backend.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheBackend, DiskCache, MemoryCache, Serializer};
use crate::engine::{BoundEdge, CacheEdge, Node};
use crate::errors::{Error, Result};
use crate::layers::{EdgesBag, Wrapper};
use crate::storage::Locker;

/// Replaces each named output with a cached version of itself; other
/// outputs pass through untouched. Transparent: values and hashes are
/// unchanged, only recomputation is skipped.
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    names: Vec<String>,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, names: &[&str]) -> Self {
        CacheLayer {
            backend,
            names: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Cache the named outputs in memory.
    pub fn memory(names: &[&str]) -> Result<Self> {
        Ok(Self::new(Arc::new(MemoryCache::new(None)?), names))
    }

    /// Cache the named outputs on disk.
    pub fn disk(
        root: impl Into<PathBuf>,
        serializer: impl Serializer + 'static,
        locker: Arc<dyn Locker>,
        names: &[&str],
    ) -> Result<Self> {
        Ok(Self::new(
            Arc::new(DiskCache::new(root, serializer, locker)?),
            names,
        ))
    }
}

impl Wrapper for CacheLayer {
    fn wrap(&self, base: &EdgesBag) -> Result<EdgesBag> {
        for name in &self.names {
            if !base.outputs().iter().any(|node| node.name() == name) {
                return Err(Error::Structural(format!(
                    "no output named `{name}` to cache"
                )));
            }
        }

        let mut edges = base.edges().to_vec();
        let mut outputs = Vec::with_capacity(base.outputs().len());
        for output in base.outputs() {
            if self.names.iter().any(|name| name == output.name()) {
                let cached = Node::new(output.name());
                edges.push(BoundEdge::new(
                    Arc::new(CacheEdge::new(self.backend.clone())),
                    vec![output.clone()],
                    cached.clone(),
                )?);
                outputs.push(cached);
            } else {
                outputs.push(output.clone());
            }
        }

        Ok(EdgesBag::new(base.inputs().to_vec(), outputs, edges).with_backward(
            base.backward_inputs().to_vec(),
            base.backward_outputs().to_vec(),
        ))
    }
}
