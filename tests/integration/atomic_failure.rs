//! Storage failures abort a put/remove without leaving partial structure

use super::support::*;
use canopy::graph::{
    ClusteringStrategy, Dag, DagStorageProvider, DagStore, HeapDagStore, NodeId, StagedChanges,
    TreeId,
};
use canopy::store::{HeapObjectStore, ObjectStore};
use canopy::{ClusterError, Node, ObjectId, RevTree, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn injected() -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        "injected failure",
    ))
}

/// Staging backend that can be told to fail every read below the root, or
/// every write that discards a position
struct FailingDagStore {
    inner: HeapDagStore,
    fail: Arc<AtomicBool>,
    fail_discards: Arc<AtomicBool>,
}

impl FailingDagStore {
    fn new(fail: &Arc<AtomicBool>, fail_discards: &Arc<AtomicBool>) -> Self {
        Self {
            inner: HeapDagStore::new(),
            fail: Arc::clone(fail),
            fail_discards: Arc::clone(fail_discards),
        }
    }
}

impl DagStore for FailingDagStore {
    fn get_tree(&self, id: &TreeId) -> Result<Option<Dag>, StorageError> {
        if self.fail.load(Ordering::SeqCst) && !id.is_root() {
            return Err(injected());
        }
        self.inner.get_tree(id)
    }

    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError> {
        self.inner.get_node(id)
    }

    fn apply(&self, changes: StagedChanges) -> Result<(), StorageError> {
        if self.fail_discards.load(Ordering::SeqCst) && !changes.remove_trees.is_empty() {
            return Err(injected());
        }
        self.inner.apply(changes)
    }

    fn tree_count(&self) -> Result<usize, StorageError> {
        self.inner.tree_count()
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear()
    }
}

/// Object store whose reads can be switched off
struct FlakyObjectStore {
    inner: HeapObjectStore,
    fail: Arc<AtomicBool>,
}

impl ObjectStore for FlakyObjectStore {
    fn get_tree(&self, id: &ObjectId) -> Result<Option<RevTree>, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.get_tree(id)
    }

    fn put_tree(&self, tree: &RevTree) -> Result<(), StorageError> {
        self.inner.put_tree(tree)
    }

    fn contains(&self, id: &ObjectId) -> Result<bool, StorageError> {
        self.inner.contains(id)
    }
}

#[test]
fn test_failure_mid_promotion_leaves_leaf_intact() {
    let store = heap_store();
    let order = small(4);
    let fail = Arc::new(AtomicBool::new(false));
    let staging = FailingDagStore::new(&fail, &Arc::new(AtomicBool::new(false)));
    let provider = DagStorageProvider::new(
        Arc::clone(&store),
        Arc::clone(&order),
        RevTree::empty_id(),
        Box::new(staging),
    );
    let mut strategy = ClusteringStrategy::new(Arc::clone(&order), provider);

    for name in names(0..4) {
        strategy.put(feature(&name)).unwrap();
    }

    fail.store(true, Ordering::SeqCst);
    let result = strategy.put(feature("f4"));
    assert!(matches!(result, Err(ClusterError::StorageUnavailable(_))));
    fail.store(false, Ordering::SeqCst);

    let root = strategy.get_root().unwrap();
    assert!(root.is_leaf());
    assert_eq!(root.children().unwrap().len(), 4);
    assert_eq!(root.child_count(), 4);
    assert_eq!(strategy.storage().staged_tree_count().unwrap(), 1);
    assert!(matches!(
        strategy.get_node(&order.node_id("f4")),
        Err(ClusterError::NodeNotFound(_))
    ));

    assert!(strategy.put(feature("f4")).unwrap());
    assert!(!strategy.get_root().unwrap().is_leaf());
    assert_eq!(strategy.size().unwrap(), 5);

    let expected = persist(&heap_store(), &order, names(0..5).iter().map(|n| feature(n)));
    assert_eq!(strategy.build().unwrap().id(), expected.id());
}

#[test]
fn test_mirroring_failure_aborts_remove() {
    let fail = Arc::new(AtomicBool::new(false));
    let flaky = Arc::new(FlakyObjectStore {
        inner: HeapObjectStore::new(),
        fail: Arc::clone(&fail),
    });
    let store: Arc<dyn ObjectStore> = flaky;
    let order = small(4);
    let original = persist(&store, &order, names(0..6).iter().map(|n| feature(n)));
    assert!(!original.is_leaf());

    let mut strategy = session(&store, &order, &original);
    let before = strategy.get_root().unwrap();

    fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        strategy.remove("f0"),
        Err(ClusterError::StorageUnavailable(StorageError::IoError(_)))
    ));
    fail.store(false, Ordering::SeqCst);

    let after = strategy.get_root().unwrap();
    assert_eq!(after, before);
    assert!(!after.is_changed());
    assert_eq!(strategy.size().unwrap(), 6);

    assert!(strategy.remove("f0").unwrap());
    assert_eq!(strategy.size().unwrap(), 5);
    assert!(strategy.remove("f1").unwrap());
    assert!(strategy.get_root().unwrap().is_leaf());

    let expected = persist(&heap_store(), &order, names(2..6).iter().map(|n| feature(n)));
    assert_eq!(strategy.build().unwrap().id(), expected.id());
}

#[test]
fn test_missing_persisted_tree_is_reported() {
    let store = heap_store();
    let order = canonical();
    let provider = DagStorageProvider::heap(
        Arc::clone(&store),
        Arc::clone(&order),
        ObjectId::for_string("never written"),
    );
    let mut strategy = ClusteringStrategy::new(order, provider);
    assert!(matches!(
        strategy.put(feature("a")),
        Err(ClusterError::StorageUnavailable(StorageError::TreeNotFound(_)))
    ));
}

#[test]
fn test_failed_commit_leaves_no_partial_demotion() {
    let store = heap_store();
    let order = small(4);
    let fail_discards = Arc::new(AtomicBool::new(false));
    let staging = FailingDagStore::new(&Arc::new(AtomicBool::new(false)), &fail_discards);
    let provider = DagStorageProvider::new(
        Arc::clone(&store),
        Arc::clone(&order),
        RevTree::empty_id(),
        Box::new(staging),
    );
    let mut strategy = ClusteringStrategy::new(Arc::clone(&order), provider);
    for name in names(0..5) {
        strategy.put(feature(&name)).unwrap();
    }
    let before = strategy.get_root().unwrap();
    let buckets = before.buckets().unwrap().clone();
    let staged = strategy.storage().staged_tree_count().unwrap();

    fail_discards.store(true, Ordering::SeqCst);
    assert!(matches!(
        strategy.remove("f0"),
        Err(ClusterError::StorageUnavailable(_))
    ));
    fail_discards.store(false, Ordering::SeqCst);

    assert_eq!(strategy.get_root().unwrap(), before);
    assert_eq!(strategy.storage().staged_tree_count().unwrap(), staged);
    let reachable: u64 = buckets
        .iter()
        .map(|b| strategy.get_tree(b).unwrap().child_count())
        .sum();
    assert_eq!(reachable, 5);
    assert_eq!(session_entries(&strategy).len(), 5);

    assert!(strategy.remove("f0").unwrap());
    assert!(strategy.get_root().unwrap().is_leaf());
    let expected = persist(&heap_store(), &order, names(1..5).iter().map(|n| feature(n)));
    assert_eq!(strategy.build().unwrap().id(), expected.id());
}
