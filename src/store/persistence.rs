//! Persistence layer for the Object Store

use crate::error::StorageError;
use crate::revtree::RevTree;
use crate::store::ObjectStore;
use crate::types::ObjectId;
use bincode;
use sled;
use std::path::Path;

/// Sled-based implementation of ObjectStore
pub struct SledObjectStore {
    db: sled::Db,
}

impl SledObjectStore {
    /// Open (or create) a SledObjectStore at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Ok(Self { db })
    }

    /// Wrap an already opened database
    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Batch insert multiple trees
    ///
    /// This is more efficient than calling `put_tree()` multiple times.
    pub fn put_batch(&self, trees: &[RevTree]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();

        for tree in trees {
            let value = bincode::serialize(tree).map_err(|e| {
                StorageError::Serialization(format!("Failed to serialize tree: {}", e))
            })?;
            batch.insert(&tree.id().as_bytes()[..], value);
        }

        self.db.apply_batch(batch).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to apply batch: {}", e),
            ))
        })?;

        Ok(())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to flush database: {}", e),
            ))
        })?;
        Ok(())
    }
}

impl ObjectStore for SledObjectStore {
    fn get_tree(&self, id: &ObjectId) -> Result<Option<RevTree>, StorageError> {
        if *id == RevTree::empty_id() {
            return Ok(Some(RevTree::empty()));
        }
        match self.db.get(id.as_bytes()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to get tree {}: {}", id, e),
            ))
        })? {
            Some(value) => {
                let tree: RevTree = bincode::deserialize(&value).map_err(|e| {
                    StorageError::Serialization(format!("Failed to deserialize tree {}: {}", id, e))
                })?;
                Ok(Some(tree))
            }
            None => Ok(None),
        }
    }

    fn put_tree(&self, tree: &RevTree) -> Result<(), StorageError> {
        if self.contains(&tree.id())? {
            return Ok(());
        }
        let value = bincode::serialize(tree)
            .map_err(|e| StorageError::Serialization(format!("Failed to serialize tree: {}", e)))?;

        self.db.insert(tree.id().as_bytes(), value).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to put tree {}: {}", tree.id(), e),
            ))
        })?;
        Ok(())
    }

    fn contains(&self, id: &ObjectId) -> Result<bool, StorageError> {
        if *id == RevTree::empty_id() {
            return Ok(true);
        }
        let exists = self.db.contains_key(id.as_bytes()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to check tree existence: {}", e),
            ))
        })?;
        Ok(exists)
    }
}
