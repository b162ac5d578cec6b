//! Persisted, content-addressed tree format
//!
//! A `RevTree` is either a leaf holding entries directly or a bucketed tree
//! holding child tree ids by bucket index (plus any entries pinned at that
//! level). Its id is a BLAKE3 hash over a canonical encoding of its content,
//! so the same entry set always produces the same id.

use crate::error::ClusterError;
use crate::graph::{ClusteringStrategy, DagStorageProvider, HeapDagStore};
use crate::node::{Node, NodeKind};
use crate::order::{CanonicalOrder, ClusteringOrder};
use crate::store::ObjectStore;
use crate::types::ObjectId;
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable persisted tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevTree {
    id: ObjectId,
    size: u64,
    entries: Vec<Node>,
    buckets: BTreeMap<u8, ObjectId>,
}

impl RevTree {
    /// Tree with the given content; entries must already be in canonical order.
    pub fn create(size: u64, entries: Vec<Node>, buckets: BTreeMap<u8, ObjectId>) -> Self {
        let id = compute_tree_id(size, &entries, &buckets);
        Self {
            id,
            size,
            entries,
            buckets,
        }
    }

    pub fn leaf(entries: Vec<Node>) -> Self {
        let size = entries.len() as u64;
        Self::create(size, entries, BTreeMap::new())
    }

    pub fn empty() -> Self {
        Self::create(0, Vec::new(), BTreeMap::new())
    }

    pub fn empty_id() -> ObjectId {
        compute_tree_id(0, &[], &BTreeMap::new())
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Recursive number of entries
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Direct entries: all of them for a leaf, pinned ones for a bucketed tree
    pub fn entries(&self) -> &[Node] {
        &self.entries
    }

    pub fn buckets(&self) -> &BTreeMap<u8, ObjectId> {
        &self.buckets
    }

    pub fn is_leaf(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.entries.is_empty() && self.buckets.is_empty()
    }
}

/// Compute the id of a tree from its content.
///
/// id = hash("tree" || size || entry_count || entries || bucket_count || buckets)
///
/// All integers are big-endian; variable-length fields are length-prefixed.
pub fn compute_tree_id(size: u64, entries: &[Node], buckets: &BTreeMap<u8, ObjectId>) -> ObjectId {
    let mut hasher = Hasher::new();

    hasher.update(b"tree");
    hasher.update(&size.to_be_bytes());

    hasher.update(&(entries.len() as u64).to_be_bytes());
    for node in entries {
        hash_node(&mut hasher, node);
    }

    hasher.update(&(buckets.len() as u64).to_be_bytes());
    for (index, tree_id) in buckets {
        hasher.update(&[*index]);
        hasher.update(tree_id.as_bytes());
    }

    ObjectId::new(*hasher.finalize().as_bytes())
}

fn hash_node(hasher: &mut Hasher, node: &Node) {
    let name = node.name.as_bytes();
    hasher.update(&(name.len() as u64).to_be_bytes());
    hasher.update(name);
    hasher.update(node.object_id.as_bytes());

    match node.metadata_id {
        Some(metadata_id) => {
            hasher.update(&[1]);
            hasher.update(metadata_id.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }

    hasher.update(match node.kind {
        NodeKind::Feature => b"f",
        NodeKind::Tree => b"t",
    });

    match node.bounds {
        Some(b) => {
            hasher.update(&[1]);
            for v in [b.min_x, b.min_y, b.max_x, b.max_y] {
                hasher.update(&v.to_bits().to_be_bytes());
            }
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Builds a canonical persisted tree from a set of entries.
///
/// Runs a clustering session over the empty tree, so the result has exactly
/// the layout any other session would produce for the same entries.
pub struct RevTreeBuilder {
    store: Arc<dyn ObjectStore>,
    order: Arc<dyn ClusteringOrder>,
    nodes: Vec<Node>,
}

impl RevTreeBuilder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            order: Arc::new(CanonicalOrder::new()),
            nodes: Vec::new(),
        }
    }

    pub fn with_order(mut self, order: Arc<dyn ClusteringOrder>) -> Self {
        self.order = order;
        self
    }

    pub fn put(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = Node>) -> &mut Self {
        self.nodes.extend(nodes);
        self
    }

    /// Build the tree and write every new subtree to the object store.
    pub fn build(&self) -> Result<RevTree, ClusterError> {
        let provider = DagStorageProvider::new(
            Arc::clone(&self.store),
            Arc::clone(&self.order),
            RevTree::empty_id(),
            Box::new(HeapDagStore::new()),
        );
        let mut strategy = ClusteringStrategy::new(Arc::clone(&self.order), provider);
        for node in &self.nodes {
            strategy.put(node.clone())?;
        }
        let tree = strategy.build()?;
        strategy.dispose();
        Ok(tree)
    }
}
