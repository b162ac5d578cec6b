//! Entries the ordering function cannot tell apart get pinned instead of
//! pushed deeper.

use super::support::*;
use canopy::graph::{ClusteringStrategy, DagStorageProvider, TreeId};
use canopy::order::ClusteringOrder;
use canopy::RevTree;
use std::sync::Arc;

/// Every name maps to the same key; buckets exist for two levels only.
#[derive(Debug)]
struct CollidingOrder;

impl ClusteringOrder for CollidingOrder {
    fn sort_key(&self, _name: &str) -> u64 {
        0
    }

    fn normalized_size_limit(&self, _depth: usize) -> usize {
        4
    }

    fn bucket_bits(&self, depth: usize) -> u32 {
        if depth < 2 {
            2
        } else {
            0
        }
    }
}

fn colliding() -> Arc<dyn ClusteringOrder> {
    Arc::new(CollidingOrder)
}

fn colliding_session(original: &RevTree, store: &Arc<dyn canopy::ObjectStore>) -> ClusteringStrategy {
    let order = colliding();
    let provider = DagStorageProvider::heap(Arc::clone(store), Arc::clone(&order), original.id());
    ClusteringStrategy::new(order, provider)
}

fn deepest() -> TreeId {
    TreeId::root().child(0).child(0)
}

#[test]
fn test_exhausted_keys_are_pinned() {
    let store = heap_store();
    let mut strategy = colliding_session(&RevTree::empty(), &store);
    for name in names(0..12) {
        assert!(strategy.put(feature(&name)).unwrap());
    }

    assert_eq!(strategy.size().unwrap(), 12);
    let bottom = strategy.get_tree(&deepest()).unwrap();
    assert_eq!(bottom.non_promotable_len(), 12);
    assert_eq!(bottom.buckets().map(|b| b.len()), Some(0));
    assert_eq!(bottom.child_count(), 12);

    let listed: Vec<_> = session_entries(&strategy);
    assert_eq!(listed.len(), 12);

    let tree = strategy.build().unwrap();
    assert_eq!(tree.size(), 12);
    assert_eq!(flatten_persisted(&store, &tree).len(), 12);
}

#[test]
fn test_pinned_entry_replaced_in_place() {
    let store = heap_store();
    let mut strategy = colliding_session(&RevTree::empty(), &store);
    for name in names(0..8) {
        strategy.put(feature(&name)).unwrap();
    }

    assert!(!strategy.put(revised("f3")).unwrap());
    assert_eq!(strategy.size().unwrap(), 8);
    let id = strategy.compute_id(&feature("f3"));
    assert!(strategy.get_tree(&deepest()).unwrap().is_pinned(&id));
    assert_eq!(strategy.get_node(&id).unwrap(), revised("f3"));
}

#[test]
fn test_pinned_layout_is_order_independent() {
    let store = heap_store();
    let all = names(0..20);

    let mut forward = colliding_session(&RevTree::empty(), &store);
    for name in &all {
        forward.put(feature(name)).unwrap();
    }
    let mut backward = colliding_session(&RevTree::empty(), &store);
    for name in all.iter().rev() {
        backward.put(feature(name)).unwrap();
    }
    assert_eq!(
        forward.build().unwrap().id(),
        backward.build().unwrap().id()
    );
}

#[test]
fn test_removing_pinned_entries_collapses() {
    let store = heap_store();
    let mut strategy = colliding_session(&RevTree::empty(), &store);
    let all = names(0..10);
    for name in &all {
        strategy.put(feature(name)).unwrap();
    }

    for name in &all[4..] {
        assert!(strategy.remove(name).unwrap());
    }
    let root = strategy.get_root().unwrap();
    assert!(root.is_leaf());
    assert_eq!(root.children().unwrap().len(), 4);
    assert_eq!(root.non_promotable_len(), 0);
    assert_eq!(strategy.depth().unwrap(), 0);
}

#[test]
fn test_pinned_entries_survive_reload() {
    let store = heap_store();
    let mut strategy = colliding_session(&RevTree::empty(), &store);
    for name in names(0..9) {
        strategy.put(feature(&name)).unwrap();
    }
    let tree = strategy.build().unwrap();

    let mut reloaded = colliding_session(&tree, &store);
    assert_eq!(reloaded.size().unwrap(), 9);
    assert_eq!(reloaded.depth().unwrap(), strategy.depth().unwrap());
    let fresh_bottom = strategy.get_tree(&deepest()).unwrap();
    let reloaded_bottom = reloaded.get_tree(&deepest()).unwrap();
    assert_eq!(reloaded_bottom.form(), fresh_bottom.form());
    assert_eq!(reloaded_bottom.non_promotable(), fresh_bottom.non_promotable());
    drop(strategy);

    let id = reloaded.compute_id(&feature("f5"));
    assert_eq!(reloaded.get_node(&id).unwrap(), feature("f5"));

    assert!(reloaded.remove("f5").unwrap());
    assert!(reloaded.put(feature("f9")).unwrap());
    assert_eq!(reloaded.size().unwrap(), 9);
    assert_eq!(session_entries(&reloaded).len(), 9);

    let mut expected = colliding_session(&RevTree::empty(), &store);
    for name in names(0..10).iter().filter(|n| n.as_str() != "f5") {
        expected.put(feature(name)).unwrap();
    }
    assert_eq!(
        reloaded.build().unwrap().id(),
        expected.build().unwrap().id()
    );
}
