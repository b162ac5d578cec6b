//! Property-based tests for determinism guarantees

use canopy::graph::{ClusteringStrategy, DagStorageProvider};
use canopy::order::{CanonicalOrder, ClusteringOrder};
use canopy::store::{HeapObjectStore, ObjectStore};
use canopy::{Node, ObjectId, RevTree, RevTreeBuilder};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Put(u16, u8),
    Remove(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u16..200, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
        1 => (0u16..200).prop_map(Op::Remove),
    ]
}

fn entry(key: u16, version: u8) -> Node {
    let name = format!("e{}", key);
    Node::feature(name.clone(), ObjectId::for_string(&format!("{}/{}", name, version)))
}

fn order() -> Arc<dyn ClusteringOrder> {
    Arc::new(CanonicalOrder::with_params(6, 2, 1))
}

fn fresh(store: &Arc<dyn ObjectStore>, order: &Arc<dyn ClusteringOrder>) -> ClusteringStrategy {
    let provider = DagStorageProvider::heap(Arc::clone(store), Arc::clone(order), RevTree::empty_id());
    ClusteringStrategy::new(Arc::clone(order), provider)
}

fn build_from(store: &Arc<dyn ObjectStore>, nodes: impl IntoIterator<Item = Node>) -> RevTree {
    let mut builder = RevTreeBuilder::new(Arc::clone(store)).with_order(order());
    builder.extend(nodes);
    builder.build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any op sequence builds the same tree as inserting its final set once.
    #[test]
    fn prop_edits_match_final_set(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let store: Arc<dyn ObjectStore> = Arc::new(HeapObjectStore::new());
        let order = order();
        let mut strategy = fresh(&store, &order);
        let mut model = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Put(k, v) => {
                    let added = strategy.put(entry(k, v)).unwrap();
                    prop_assert_eq!(added, model.insert(k, v).is_none());
                }
                Op::Remove(k) => {
                    let removed = strategy.remove(&format!("e{}", k)).unwrap();
                    prop_assert_eq!(removed, model.remove(&k).is_some());
                }
            }
        }

        prop_assert_eq!(strategy.size().unwrap(), model.len() as u64);
        let built = strategy.build().unwrap();
        let expected = build_from(&store, model.iter().map(|(k, v)| entry(*k, *v)));
        prop_assert_eq!(built.id(), expected.id());
        prop_assert_eq!(strategy.entries().count(), model.len());
    }

    /// Insertion order never changes the flattened tree.
    #[test]
    fn prop_insertion_order_independent(keys in prop::collection::btree_set(0u16..1000, 0..200)) {
        let store: Arc<dyn ObjectStore> = Arc::new(HeapObjectStore::new());
        let forward = build_from(&store, keys.iter().map(|k| entry(*k, 0)));
        let backward = build_from(&store, keys.iter().rev().map(|k| entry(*k, 0)));
        prop_assert_eq!(forward.id(), backward.id());
        prop_assert_eq!(forward.size(), keys.len() as u64);
    }

    /// A leaf root holds at most the limit; a bucket root holds more.
    #[test]
    fn prop_root_form_follows_count(count in 0usize..40) {
        let store: Arc<dyn ObjectStore> = Arc::new(HeapObjectStore::new());
        let order = order();
        let mut strategy = fresh(&store, &order);
        for k in 0..count {
            strategy.put(entry(k as u16, 0)).unwrap();
        }
        let root = strategy.get_root().unwrap();
        prop_assert_eq!(root.is_leaf(), count <= strategy.normalized_size_limit(0));
    }
}

/// Sort keys depend only on the NFC form of a name.
#[test]
fn test_sort_key_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let order = CanonicalOrder::new();

    runner
        .run(&any::<String>(), |name| {
            let nfc: String = canopy::order::normalize_name(&name);
            assert_eq!(order.sort_key(&name), order.sort_key(&nfc));
            assert_eq!(order.sort_key(&name), order.sort_key(&name.clone()));
            Ok(())
        })
        .unwrap();
}
