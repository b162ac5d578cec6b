//! Staging graph: the mutable DAG mirror of a persisted tree and the
//! clustering session that edits it.

pub mod dag;
pub mod ids;
mod mutation;
pub mod storage;
pub mod strategy;

pub use dag::{Dag, DagForm, DagState};
pub use ids::{NodeId, TreeId};
pub use storage::{DagStorageProvider, DagStore, HeapDagStore, SledDagStore, StagedChanges};
pub use strategy::{ClusteringStrategy, Entries};
