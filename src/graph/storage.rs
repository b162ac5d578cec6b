//! Session storage for staged DAGs and entry values
//!
//! [`DagStorageProvider`] lazily mirrors the persisted tree a session starts
//! from, keeps local mutations visible to later reads, and flattens the
//! result into new persisted trees. Where the staged state physically lives
//! is delegated to a [`DagStore`] backend: in memory for ordinary sessions,
//! or a temporary sled database for sessions too large to keep resident.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::graph::dag::{Dag, DagForm, DagState};
use crate::graph::ids::{NodeId, TreeId};
use crate::node::Node;
use crate::order::ClusteringOrder;
use crate::revtree::RevTree;
use crate::store::ObjectStore;
use crate::types::ObjectId;
use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::Transactional;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// One batch of staging writes, applied all-or-nothing
#[derive(Debug, Default)]
pub struct StagedChanges {
    pub put_trees: Vec<Dag>,
    pub remove_trees: Vec<TreeId>,
    pub put_nodes: Vec<(NodeId, Node)>,
    pub remove_nodes: Vec<NodeId>,
}

impl StagedChanges {
    pub fn is_empty(&self) -> bool {
        self.put_trees.is_empty()
            && self.remove_trees.is_empty()
            && self.put_nodes.is_empty()
            && self.remove_nodes.is_empty()
    }
}

/// Backend holding a session's staged DAGs and entry values
pub trait DagStore: Send + Sync {
    fn get_tree(&self, id: &TreeId) -> Result<Option<Dag>, StorageError>;
    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError>;

    /// Apply every change in `changes`, or none of them. Removals run
    /// before insertions.
    fn apply(&self, changes: StagedChanges) -> Result<(), StorageError>;

    /// Number of staged DAGs
    fn tree_count(&self) -> Result<usize, StorageError>;

    /// Drop everything staged
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory staging backend
#[derive(Default)]
pub struct HeapDagStore {
    trees: RwLock<HashMap<TreeId, Dag>>,
    nodes: RwLock<HashMap<NodeId, Node>>,
}

impl HeapDagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DagStore for HeapDagStore {
    fn get_tree(&self, id: &TreeId) -> Result<Option<Dag>, StorageError> {
        Ok(self.trees.read().get(id).cloned())
    }

    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError> {
        Ok(self.nodes.read().get(id).cloned())
    }

    fn apply(&self, changes: StagedChanges) -> Result<(), StorageError> {
        // Lock order: trees, then nodes
        let mut trees = self.trees.write();
        let mut nodes = self.nodes.write();
        for id in &changes.remove_trees {
            trees.remove(id);
        }
        for dag in changes.put_trees {
            trees.insert(dag.id().clone(), dag);
        }
        for id in &changes.remove_nodes {
            nodes.remove(id);
        }
        nodes.extend(changes.put_nodes);
        Ok(())
    }

    fn tree_count(&self) -> Result<usize, StorageError> {
        Ok(self.trees.read().len())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut trees = self.trees.write();
        let mut nodes = self.nodes.write();
        trees.clear();
        nodes.clear();
        Ok(())
    }
}

/// Staging backend on a temporary sled database, removed when dropped
pub struct SledDagStore {
    _db: sled::Db,
    trees: sled::Tree,
    nodes: sled::Tree,
}

impl SledDagStore {
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open().map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open temporary staging database: {}", e),
            ))
        })?;
        let trees = db.open_tree("dags")?;
        let nodes = db.open_tree("nodes")?;
        Ok(Self {
            _db: db,
            trees,
            nodes,
        })
    }

    fn tree_key(id: &TreeId) -> Vec<u8> {
        // Prefixed so the root's empty path still makes a non-empty key
        let mut key = Vec::with_capacity(id.depth() + 1);
        key.push(b'/');
        key.extend_from_slice(id.path());
        key
    }
}

impl DagStore for SledDagStore {
    fn get_tree(&self, id: &TreeId) -> Result<Option<Dag>, StorageError> {
        match self.trees.get(Self::tree_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError> {
        match self.nodes.get(id.name().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn apply(&self, changes: StagedChanges) -> Result<(), StorageError> {
        // Encode up front; the transaction body may run more than once
        let removed_trees: Vec<Vec<u8>> =
            changes.remove_trees.iter().map(Self::tree_key).collect();
        let mut put_trees = Vec::with_capacity(changes.put_trees.len());
        for dag in &changes.put_trees {
            put_trees.push((Self::tree_key(dag.id()), bincode::serialize(dag)?));
        }
        let mut put_nodes = Vec::with_capacity(changes.put_nodes.len());
        for (id, node) in &changes.put_nodes {
            put_nodes.push((id.name().as_bytes().to_vec(), bincode::serialize(node)?));
        }

        (&self.trees, &self.nodes)
            .transaction(|(trees, nodes)| -> ConflictableTransactionResult<(), ()> {
                for key in &removed_trees {
                    trees.remove(key.as_slice())?;
                }
                for (key, value) in &put_trees {
                    trees.insert(key.as_slice(), value.as_slice())?;
                }
                for id in &changes.remove_nodes {
                    nodes.remove(id.name().as_bytes())?;
                }
                for (key, value) in &put_nodes {
                    nodes.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StorageError::from(e),
                TransactionError::Abort(()) => StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "staging transaction aborted",
                )),
            })
    }

    fn tree_count(&self) -> Result<usize, StorageError> {
        Ok(self.trees.len())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.trees.clear()?;
        self.nodes.clear()?;
        Ok(())
    }
}

/// Session-scoped mirror of a persisted tree plus its local mutations
pub struct DagStorageProvider {
    source: Arc<dyn ObjectStore>,
    order: Arc<dyn ClusteringOrder>,
    original_root: ObjectId,
    store: Box<dyn DagStore>,
}

impl DagStorageProvider {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        order: Arc<dyn ClusteringOrder>,
        original_root: ObjectId,
        store: Box<dyn DagStore>,
    ) -> Self {
        Self {
            source,
            order,
            original_root,
            store,
        }
    }

    /// Provider staging in memory
    pub fn heap(
        source: Arc<dyn ObjectStore>,
        order: Arc<dyn ClusteringOrder>,
        original_root: ObjectId,
    ) -> Self {
        Self::new(source, order, original_root, Box::new(HeapDagStore::new()))
    }

    /// Provider staging in a temporary sled database
    pub fn sled(
        source: Arc<dyn ObjectStore>,
        order: Arc<dyn ClusteringOrder>,
        original_root: ObjectId,
    ) -> Result<Self, StorageError> {
        Ok(Self::new(
            source,
            order,
            original_root,
            Box::new(SledDagStore::temporary()?),
        ))
    }

    /// Provider with the backend selected by `config`
    pub fn from_config(
        config: &StorageConfig,
        source: Arc<dyn ObjectStore>,
        order: Arc<dyn ClusteringOrder>,
        original_root: ObjectId,
    ) -> Result<Self, StorageError> {
        match config.backend {
            StorageBackend::Heap => Ok(Self::heap(source, order, original_root)),
            StorageBackend::Sled => Self::sled(source, order, original_root),
        }
    }

    /// Id of the persisted tree the session started from
    pub fn original_root(&self) -> ObjectId {
        self.original_root
    }

    pub fn source(&self) -> &Arc<dyn ObjectStore> {
        &self.source
    }

    /// Number of positions currently staged or mirrored
    pub fn staged_tree_count(&self) -> Result<usize, StorageError> {
        self.store.tree_count()
    }

    /// Return the DAG at `id`, mirroring it from the persisted tree on first
    /// access. Positions with no persisted counterpart come back empty.
    pub fn get_or_load_tree(&self, id: &TreeId) -> Result<Dag, StorageError> {
        let dag = match self.store.get_tree(id)? {
            Some(dag) => dag,
            None => match id.parent() {
                None => Dag::new(TreeId::root(), self.original_root),
                Some(parent) => {
                    // Mirroring the parent registers placeholders for its
                    // persisted buckets, so look again afterwards.
                    self.get_or_load_tree(&parent)?;
                    match self.store.get_tree(id)? {
                        Some(dag) => dag,
                        None => Dag::empty(id.clone()),
                    }
                }
            },
        };

        if dag.state() == DagState::Initialized {
            self.mirror(dag)
        } else {
            Ok(dag)
        }
    }

    /// Populate a placeholder from its persisted tree and cache it.
    fn mirror(&self, mut dag: Dag) -> Result<Dag, StorageError> {
        let original = dag.original_tree_id();
        if original == RevTree::empty_id() {
            dag.set_mirrored();
            self.store.apply(StagedChanges {
                put_trees: vec![dag.clone()],
                ..StagedChanges::default()
            })?;
            return Ok(dag);
        }

        let tree = self.source.get_tree_required(&original)?;
        trace!(
            tree = ?dag.id(),
            original = %original,
            size = tree.size(),
            buckets = tree.buckets().len(),
            "Mirroring persisted tree"
        );

        let mut changes = StagedChanges::default();
        changes.put_nodes.reserve(tree.entries().len());

        // A position holding only pinned entries flattens without buckets;
        // more entries than the limit means it was in bucket form.
        let limit = self.order.normalized_size_limit(dag.depth());
        let pinned_only = tree.is_leaf() && tree.entries().len() > limit;

        if tree.is_leaf() && !pinned_only {
            for node in tree.entries() {
                let node_id = self.order.compute_id(node);
                dag.add_child(node_id.clone());
                changes.put_nodes.push((node_id, node.clone()));
            }
        } else {
            dag.switch_to_buckets();
            for (index, child_tree) in tree.buckets() {
                let child_id = dag.id().child(*index);
                dag.add_bucket(child_id.clone());
                changes.put_trees.push(Dag::new(child_id, *child_tree));
            }
            for node in tree.entries() {
                let node_id = self.order.compute_id(node);
                dag.add_non_promotable(node_id.clone());
                changes.put_nodes.push((node_id, node.clone()));
            }
        }

        dag.set_child_count(tree.size());
        dag.set_mirrored();

        changes.put_trees.push(dag.clone());
        self.store.apply(changes)?;
        Ok(dag)
    }

    /// Value of the entry `id`, mirroring the positions on its path from the
    /// root until the one holding it is loaded.
    pub fn get_or_load_node(&self, id: &NodeId) -> Result<Node, StorageError> {
        if let Some(node) = self.store.get_node(id)? {
            return Ok(node);
        }

        let not_found = || StorageError::NodeNotFound(id.name().to_string());
        let mut tree_id = TreeId::root();
        loop {
            let dag = self.get_or_load_tree(&tree_id)?;
            let held = dag.is_pinned(id) || dag.children().map_or(false, |c| c.contains(id));
            if held {
                return self.store.get_node(id)?.ok_or_else(not_found);
            }

            let next = self
                .order
                .bucket(id, dag.depth())
                .map(|index| tree_id.child(index))
                .filter(|child| dag.buckets().map_or(false, |b| b.contains(child)));
            match next {
                Some(child) => tree_id = child,
                None => return Err(not_found()),
            }
        }
    }

    /// Publish a batch of staged changes atomically.
    pub fn apply(&self, changes: StagedChanges) -> Result<(), StorageError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.store.apply(changes)
    }

    /// Build persisted trees for everything changed in this session and
    /// return the new root. Unchanged positions keep their persisted ids and
    /// are never loaded.
    #[instrument(skip(self), fields(original = %self.original_root))]
    pub fn flatten(&self) -> Result<RevTree, StorageError> {
        let start = Instant::now();

        let root = match self.store.get_tree(&TreeId::root())? {
            Some(root) if root.is_changed() => root,
            _ => {
                debug!("Session unchanged, reusing original tree");
                return self.source.get_tree_required(&self.original_root);
            }
        };

        let mut written = 0usize;
        let tree = self.build_tree(&root, &mut written)?;

        info!(
            root_id = %tree.id(),
            size = tree.size(),
            trees_written = written,
            duration_ms = start.elapsed().as_millis(),
            "Flattened session"
        );
        Ok(tree)
    }

    /// Persisted id for the subtree at `id`, or `None` if it is empty.
    fn flatten_position(
        &self,
        id: &TreeId,
        written: &mut usize,
    ) -> Result<Option<ObjectId>, StorageError> {
        let dag = match self.store.get_tree(id)? {
            Some(dag) => dag,
            None => self.get_or_load_tree(id)?,
        };

        if !dag.is_changed() {
            let original = dag.original_tree_id();
            return Ok((original != RevTree::empty_id()).then_some(original));
        }
        if dag.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.build_tree(&dag, written)?.id()))
    }

    fn build_tree(&self, dag: &Dag, written: &mut usize) -> Result<RevTree, StorageError> {
        let mut entry_ids: BTreeSet<NodeId> = dag.non_promotable();
        let mut buckets = BTreeMap::new();

        match dag.form() {
            DagForm::Leaf(children) => {
                entry_ids.extend(children.iter().cloned());
            }
            DagForm::Buckets(bucket_ids) => {
                for bucket_id in bucket_ids {
                    let Some(index) = bucket_id.bucket_index() else {
                        continue;
                    };
                    if let Some(child) = self.flatten_position(bucket_id, written)? {
                        buckets.insert(index, child);
                    }
                }
            }
        }

        let mut entries = Vec::with_capacity(entry_ids.len());
        for entry_id in &entry_ids {
            entries.push(self.get_or_load_node(entry_id)?);
        }

        let tree = RevTree::create(dag.child_count(), entries, buckets);
        self.source.put_tree(&tree)?;
        *written += 1;
        Ok(tree)
    }

    /// Release all staged state. Never fails; backend errors are logged.
    pub fn dispose(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear staging store");
        }
    }
}
