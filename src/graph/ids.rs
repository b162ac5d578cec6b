//! Identifiers used by the staging DAG: entry identity and bucket position

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical key of one promotable entry (feature or subtree).
///
/// Ordered by the ordering function's sort key, then by name. Two ids are
/// equal iff their names are equal, since the key is derived from the name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    key: u64,
    name: String,
}

impl NodeId {
    pub fn new(name: impl Into<String>, key: u64) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sort key assigned by the ordering function
    pub fn key(&self) -> u64 {
        self.key
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}:{:016x})", self.name, self.key)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Structural position of a DAG: the bucket indices walked from the root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TreeId(Vec<u8>);

impl TreeId {
    /// The root position (empty path)
    pub fn root() -> Self {
        TreeId(Vec::new())
    }

    pub fn from_path(path: impl Into<Vec<u8>>) -> Self {
        TreeId(path.into())
    }

    /// Position of bucket `index` below this one
    pub fn child(&self, index: u8) -> TreeId {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.extend_from_slice(&self.0);
        path.push(index);
        TreeId(path)
    }

    pub fn parent(&self) -> Option<TreeId> {
        self.0.split_last().map(|(_, rest)| TreeId(rest.to_vec()))
    }

    /// Nesting depth; the root is at depth 0.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Bucket index of this position within its parent
    pub fn bucket_index(&self) -> Option<u8> {
        self.0.last().copied()
    }

    pub fn path(&self) -> &[u8] {
        &self.0
    }

    /// True if `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &TreeId) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId{:?}", self.0)
    }
}
