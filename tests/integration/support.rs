//! Shared helpers for integration tests

use canopy::graph::{ClusteringStrategy, DagStorageProvider};
use canopy::order::{CanonicalOrder, ClusteringOrder};
use canopy::store::{HeapObjectStore, ObjectStore};
use canopy::{Node, ObjectId, RevTree, RevTreeBuilder};
use std::sync::Arc;

pub fn feature(name: &str) -> Node {
    Node::feature(name, ObjectId::for_string(name))
}

/// Entry whose object id differs from [`feature`]'s for the same name
pub fn revised(name: &str) -> Node {
    Node::feature(name, ObjectId::for_string(&format!("{}@2", name)))
}

pub fn names(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("f{}", i)).collect()
}

pub fn heap_store() -> Arc<dyn ObjectStore> {
    Arc::new(HeapObjectStore::new())
}

/// Persist a tree holding `nodes` with the given order.
pub fn persist(
    store: &Arc<dyn ObjectStore>,
    order: &Arc<dyn ClusteringOrder>,
    nodes: impl IntoIterator<Item = Node>,
) -> RevTree {
    let mut builder = RevTreeBuilder::new(Arc::clone(store)).with_order(Arc::clone(order));
    builder.extend(nodes);
    builder.build().unwrap()
}

/// In-memory session over `original`
pub fn session(
    store: &Arc<dyn ObjectStore>,
    order: &Arc<dyn ClusteringOrder>,
    original: &RevTree,
) -> ClusteringStrategy {
    let provider = DagStorageProvider::heap(Arc::clone(store), Arc::clone(order), original.id());
    ClusteringStrategy::new(Arc::clone(order), provider)
}

pub fn canonical() -> Arc<dyn ClusteringOrder> {
    Arc::new(CanonicalOrder::new())
}

/// Small fan-out and leaf size so multi-level trees stay cheap to build
pub fn small(limit: usize) -> Arc<dyn ClusteringOrder> {
    Arc::new(CanonicalOrder::with_params(limit, 2, 1))
}

/// Every entry of a persisted tree, in canonical order
pub fn flatten_persisted(store: &Arc<dyn ObjectStore>, tree: &RevTree) -> Vec<Node> {
    let mut out = Vec::new();
    collect(store, tree, &mut out);
    out
}

fn collect(store: &Arc<dyn ObjectStore>, tree: &RevTree, out: &mut Vec<Node>) {
    out.extend(tree.entries().iter().cloned());
    for child in tree.buckets().values() {
        let child = store.get_tree_required(child).unwrap();
        collect(store, &child, out);
    }
}

/// Every entry a session currently holds, in iteration order
pub fn session_entries(strategy: &ClusteringStrategy) -> Vec<Node> {
    strategy
        .entries()
        .map(|entry| entry.unwrap().1)
        .collect()
}
