//! Entry values: the feature and subtree references a tree indexes

use crate::types::{Envelope, ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of object an entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Feature,
    Tree,
}

/// A named reference to a persisted object.
///
/// The name is the entry's identity; everything else is replaceable content.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub object_id: ObjectId,
    pub metadata_id: Option<ObjectId>,
    pub kind: NodeKind,
    pub bounds: Option<Envelope>,
}

impl Node {
    pub fn new(name: impl Into<String>, object_id: ObjectId, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            object_id,
            metadata_id: None,
            kind,
            bounds: None,
        }
    }

    /// Feature entry pointing at `object_id`
    pub fn feature(name: impl Into<String>, object_id: ObjectId) -> Self {
        Self::new(name, object_id, NodeKind::Feature)
    }

    /// Subtree entry pointing at `object_id`
    pub fn tree(name: impl Into<String>, object_id: ObjectId) -> Self {
        Self::new(name, object_id, NodeKind::Tree)
    }

    pub fn with_metadata_id(mut self, metadata_id: ObjectId) -> Self {
        self.metadata_id = Some(metadata_id);
        self
    }

    pub fn with_bounds(mut self, bounds: Envelope) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_tree(&self) -> bool {
        self.kind == NodeKind::Tree
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{} -> {:?}]", self.kind, self.name, self.object_id)
    }
}
