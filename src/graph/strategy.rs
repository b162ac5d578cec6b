//! Clustering strategy: the single-writer session that stages one revision
//! of a tree's index.
//!
//! Each `put`/`remove` descends the DAG tree from the root, splitting full
//! leaves into buckets (promotion) and collapsing buckets that fall back to
//! the size limit (demotion). The layout is a function of the entry set
//! alone, so any insertion order yields the same persisted tree.

use crate::config::CanopyConfig;
use crate::error::{ClusterError, StorageError};
use crate::graph::dag::{Dag, DagForm};
use crate::graph::ids::{NodeId, TreeId};
use crate::graph::mutation::Mutation;
use crate::graph::storage::DagStorageProvider;
use crate::node::Node;
use crate::order::{CanonicalOrder, ClusteringOrder};
use crate::revtree::RevTree;
use crate::store::ObjectStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Staging session over one persisted tree
pub struct ClusteringStrategy {
    order: Arc<dyn ClusteringOrder>,
    storage: DagStorageProvider,
    disposed: bool,
}

impl ClusteringStrategy {
    pub fn new(order: Arc<dyn ClusteringOrder>, storage: DagStorageProvider) -> Self {
        Self {
            order,
            storage,
            disposed: false,
        }
    }

    /// Canonical session over `original`, staging in memory
    pub fn canonical(source: Arc<dyn ObjectStore>, original: &RevTree) -> Self {
        let order: Arc<dyn ClusteringOrder> = Arc::new(CanonicalOrder::new());
        let storage = DagStorageProvider::heap(source, Arc::clone(&order), original.id());
        Self::new(order, storage)
    }

    /// Session with the ordering parameters and staging backend from `config`
    pub fn from_config(
        config: &CanopyConfig,
        source: Arc<dyn ObjectStore>,
        original: &RevTree,
    ) -> Result<Self, ClusterError> {
        let order: Arc<dyn ClusteringOrder> =
            Arc::new(CanonicalOrder::from_config(&config.clustering));
        let storage = DagStorageProvider::from_config(
            &config.storage,
            source,
            Arc::clone(&order),
            original.id(),
        )?;
        Ok(Self::new(order, storage))
    }

    pub fn order(&self) -> &Arc<dyn ClusteringOrder> {
        &self.order
    }

    pub fn storage(&self) -> &DagStorageProvider {
        &self.storage
    }

    fn ensure_live(&self) -> Result<(), ClusterError> {
        if self.disposed {
            return Err(ClusterError::Disposed);
        }
        Ok(())
    }

    /// Insert `node`, or replace the value of an entry with the same name.
    ///
    /// Returns true if the name was not present before. On error the session
    /// is left as it was before the call.
    pub fn put(&mut self, node: Node) -> Result<bool, ClusterError> {
        self.ensure_live()?;
        let id = self.order.compute_id(&node);

        let mut mutation = Mutation::new(&self.storage, self.order.as_ref());
        let mut root = mutation.take_tree(&TreeId::root())?;
        let added = mutation.put(&mut root, id.clone())?;
        mutation.put_tree(root);
        mutation.stage_node(id, node);
        mutation.commit()?;
        Ok(added)
    }

    /// Remove the entry called `name`. Removing an absent name is a no-op
    /// and returns false.
    pub fn remove(&mut self, name: &str) -> Result<bool, ClusterError> {
        self.ensure_live()?;
        let id = self.order.node_id(name);

        let mut mutation = Mutation::new(&self.storage, self.order.as_ref());
        let mut root = mutation.take_tree(&TreeId::root())?;
        let removed = mutation.remove(&mut root, &id)?;
        if !removed {
            debug!(name, "Remove of absent entry ignored");
            return Ok(false);
        }
        mutation.put_tree(root);
        mutation.remove_node(id);
        mutation.commit()?;
        Ok(true)
    }

    /// Current value of the entry `id`, mirroring the positions on its path
    /// if the session has not visited them yet.
    pub fn get_node(&self, id: &NodeId) -> Result<Node, ClusterError> {
        self.ensure_live()?;
        self.storage.get_or_load_node(id).map_err(|e| match e {
            StorageError::NodeNotFound(name) => ClusterError::NodeNotFound(name),
            other => ClusterError::StorageUnavailable(other),
        })
    }

    /// DAG at a structural position, mirrored on first access
    pub fn get_tree(&self, id: &TreeId) -> Result<Dag, ClusterError> {
        self.ensure_live()?;
        Ok(self.storage.get_or_load_tree(id)?)
    }

    pub fn get_root(&self) -> Result<Dag, ClusterError> {
        self.get_tree(&TreeId::root())
    }

    /// Deepest bucket nesting below the root; 0 for a leaf root.
    ///
    /// Walks every position, so a session over a persisted tree mirrors the
    /// whole tree. Cost is linear in the number of positions.
    pub fn depth(&self) -> Result<usize, ClusterError> {
        self.ensure_live()?;
        self.depth_of(&TreeId::root())
    }

    fn depth_of(&self, id: &TreeId) -> Result<usize, ClusterError> {
        let dag = self.storage.get_or_load_tree(id)?;
        match dag.form() {
            DagForm::Leaf(_) => Ok(0),
            DagForm::Buckets(buckets) => {
                let mut deepest = 0;
                for bucket in buckets {
                    deepest = deepest.max(self.depth_of(bucket)?);
                }
                Ok(deepest + 1)
            }
        }
    }

    /// Total number of entries in the session
    pub fn size(&self) -> Result<u64, ClusterError> {
        Ok(self.get_root()?.child_count())
    }

    pub fn normalized_size_limit(&self, depth: usize) -> usize {
        self.order.normalized_size_limit(depth)
    }

    pub fn compute_id(&self, node: &Node) -> NodeId {
        self.order.compute_id(node)
    }

    /// Depth-first iterator over every entry. Each call starts a fresh pass.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            strategy: self,
            stack: vec![TreeId::root()],
            pending: VecDeque::new(),
        }
    }

    /// Flatten the session into a new persisted tree.
    #[instrument(skip(self))]
    pub fn build(&self) -> Result<RevTree, ClusterError> {
        self.ensure_live()?;
        Ok(self.storage.flatten()?)
    }

    /// Release all staged state. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.storage.dispose();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ClusteringStrategy {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Lazy depth-first walk over `(NodeId, Node)` pairs.
///
/// At each position pinned entries come first, then direct children, then
/// the bucket subtrees in index order.
pub struct Entries<'a> {
    strategy: &'a ClusteringStrategy,
    stack: Vec<TreeId>,
    pending: VecDeque<NodeId>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(NodeId, Node), ClusterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.strategy.disposed {
            return None;
        }
        loop {
            if let Some(id) = self.pending.pop_front() {
                let item = self
                    .strategy
                    .storage
                    .get_or_load_node(&id)
                    .map(|node| (id, node))
                    .map_err(ClusterError::from);
                return Some(item);
            }

            let tree_id = self.stack.pop()?;
            let dag = match self.strategy.storage.get_or_load_tree(&tree_id) {
                Ok(dag) => dag,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e.into()));
                }
            };

            self.pending.extend(dag.non_promotable());
            match dag.form() {
                DagForm::Leaf(children) => self.pending.extend(children.iter().cloned()),
                DagForm::Buckets(buckets) => self.stack.extend(buckets.iter().rev().cloned()),
            }
        }
    }
}
