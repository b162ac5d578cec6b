//! Object Store
//!
//! Read/write access to persisted trees by content id. Clustering sessions
//! only read from it while staging; new trees are written when a session is
//! flattened.

pub mod persistence;

pub use persistence::SledObjectStore;

use crate::error::StorageError;
use crate::revtree::RevTree;
use crate::types::ObjectId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Object store interface
pub trait ObjectStore: Send + Sync {
    /// Look up a tree by id. The empty tree always resolves.
    fn get_tree(&self, id: &ObjectId) -> Result<Option<RevTree>, StorageError>;

    /// Store a tree under its id. Storing an existing id is a no-op.
    fn put_tree(&self, tree: &RevTree) -> Result<(), StorageError>;

    fn contains(&self, id: &ObjectId) -> Result<bool, StorageError>;

    /// Look up a tree, failing if it does not exist
    fn get_tree_required(&self, id: &ObjectId) -> Result<RevTree, StorageError> {
        self.get_tree(id)?
            .ok_or(StorageError::TreeNotFound(*id))
    }
}

/// In-memory object store
#[derive(Default)]
pub struct HeapObjectStore {
    trees: RwLock<HashMap<ObjectId, RevTree>>,
}

impl HeapObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }
}

impl ObjectStore for HeapObjectStore {
    fn get_tree(&self, id: &ObjectId) -> Result<Option<RevTree>, StorageError> {
        if *id == RevTree::empty_id() {
            return Ok(Some(RevTree::empty()));
        }
        Ok(self.trees.read().get(id).cloned())
    }

    fn put_tree(&self, tree: &RevTree) -> Result<(), StorageError> {
        self.trees
            .write()
            .entry(tree.id())
            .or_insert_with(|| tree.clone());
        Ok(())
    }

    fn contains(&self, id: &ObjectId) -> Result<bool, StorageError> {
        Ok(*id == RevTree::empty_id() || self.trees.read().contains_key(id))
    }
}
