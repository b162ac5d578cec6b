//! Sessions staged in sled and trees persisted in sled

use super::support::*;
use canopy::config::{CanopyConfig, StorageBackend};
use canopy::graph::{ClusteringStrategy, DagStorageProvider};
use canopy::store::{ObjectStore, SledObjectStore};
use canopy::order::{CanonicalOrder, ClusteringOrder};
use canopy::RevTree;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_sled_staged_session_matches_heap() {
    let order = canonical();
    let all = names(0..1500);

    let heap = heap_store();
    let expected = persist(&heap, &order, all.iter().map(|n| feature(n)));

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(SledObjectStore::new(dir.path()).unwrap());
    let provider =
        DagStorageProvider::sled(Arc::clone(&store), Arc::clone(&order), RevTree::empty_id())
            .unwrap();
    let mut strategy = ClusteringStrategy::new(Arc::clone(&order), provider);
    for name in all.iter().rev() {
        strategy.put(feature(name)).unwrap();
    }
    assert_eq!(strategy.size().unwrap(), 1500);
    assert_eq!(strategy.depth().unwrap(), 1);

    let tree = strategy.build().unwrap();
    assert_eq!(tree.id(), expected.id());
    assert!(store.contains(&tree.id()).unwrap());
}

#[test]
fn test_persisted_tree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let order = canonical();

    let tree_id = {
        let sled = Arc::new(SledObjectStore::new(dir.path()).unwrap());
        let store: Arc<dyn ObjectStore> = Arc::clone(&sled) as Arc<dyn ObjectStore>;
        let tree = persist(&store, &order, names(0..2000).iter().map(|n| feature(n)));
        sled.flush().unwrap();
        tree.id()
    };

    let store: Arc<dyn ObjectStore> = Arc::new(SledObjectStore::new(dir.path()).unwrap());
    let tree = store.get_tree_required(&tree_id).unwrap();
    assert_eq!(tree.size(), 2000);

    let mut strategy = session(&store, &order, &tree);
    let id = order.node_id("f1999");
    assert_eq!(strategy.get_node(&id).unwrap(), feature("f1999"));

    strategy.remove("f1999").unwrap();
    strategy.put(revised("f0")).unwrap();
    let edited = strategy.build().unwrap();
    assert_eq!(edited.size(), 1999);
    let flattened = flatten_persisted(&store, &edited);
    assert!(flattened.contains(&revised("f0")));
    assert!(!flattened.iter().any(|n| n.name == "f1999"));
}

#[test]
fn test_session_from_config_selects_backend() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(SledObjectStore::new(dir.path()).unwrap());

    let mut config = CanopyConfig::default();
    config.storage.backend = StorageBackend::Sled;
    config.clustering.size_limit = 16;

    let mut strategy =
        ClusteringStrategy::from_config(&config, Arc::clone(&store), &RevTree::empty()).unwrap();
    assert_eq!(strategy.normalized_size_limit(0), 16);
    for name in names(0..100) {
        strategy.put(feature(&name)).unwrap();
    }
    let tree = strategy.build().unwrap();
    strategy.dispose();
    assert_eq!(strategy.storage().staged_tree_count().unwrap(), 0);

    let order: Arc<dyn ClusteringOrder> = Arc::new(CanonicalOrder::from_config(&config.clustering));
    let expected = persist(&heap_store(), &order, names(0..100).iter().map(|n| feature(n)));
    assert_eq!(tree.id(), expected.id());
}
