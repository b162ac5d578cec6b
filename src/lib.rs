//! Canopy: canonical clustering for content-addressed revision trees
//!
//! Stages edits to a persisted tree of named entries and flattens them into
//! a new tree whose bucket layout depends only on the final entry set.

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod node;
pub mod order;
pub mod revtree;
pub mod store;
pub mod types;

pub use error::{ClusterError, StorageError};
pub use graph::{ClusteringStrategy, NodeId, TreeId};
pub use node::{Node, NodeKind};
pub use order::{CanonicalOrder, ClusteringOrder};
pub use revtree::{RevTree, RevTreeBuilder};
pub use store::{HeapObjectStore, ObjectStore};
pub use types::{Envelope, ObjectId};
