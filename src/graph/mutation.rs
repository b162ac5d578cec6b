//! Buffered put/remove against the staged DAG tree
//!
//! A `Mutation` takes DAGs out of the provider as owned values, applies the
//! clustering rules to them, and holds every changed DAG, value and discarded
//! position until `commit`. Dropping an uncommitted mutation leaves the
//! session exactly as it was.

use crate::error::StorageError;
use crate::graph::dag::{Dag, DagForm};
use crate::graph::ids::{NodeId, TreeId};
use crate::graph::storage::{DagStorageProvider, StagedChanges};
use crate::node::Node;
use crate::order::ClusteringOrder;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

enum Slot {
    Staged(Dag),
    Discarded,
}

pub(crate) struct Mutation<'a> {
    provider: &'a DagStorageProvider,
    order: &'a dyn ClusteringOrder,
    trees: HashMap<TreeId, Slot>,
    nodes: HashMap<NodeId, Option<Node>>,
}

impl<'a> Mutation<'a> {
    pub(crate) fn new(provider: &'a DagStorageProvider, order: &'a dyn ClusteringOrder) -> Self {
        Self {
            provider,
            order,
            trees: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    /// Take the DAG at `id` out of the buffer, or load it from the provider.
    pub(crate) fn take_tree(&mut self, id: &TreeId) -> Result<Dag, StorageError> {
        match self.trees.remove(id) {
            Some(Slot::Staged(dag)) => Ok(dag),
            Some(Slot::Discarded) => {
                let mut dag = Dag::empty(id.clone());
                dag.set_mirrored();
                Ok(dag)
            }
            None => self.provider.get_or_load_tree(id),
        }
    }

    pub(crate) fn put_tree(&mut self, dag: Dag) {
        self.trees.insert(dag.id().clone(), Slot::Staged(dag));
    }

    fn discard_tree(&mut self, id: TreeId) {
        self.trees.insert(id, Slot::Discarded);
    }

    pub(crate) fn stage_node(&mut self, id: NodeId, node: Node) {
        self.nodes.insert(id, Some(node));
    }

    pub(crate) fn remove_node(&mut self, id: NodeId) {
        self.nodes.insert(id, None);
    }

    /// Publish everything buffered to the provider in one atomic batch.
    pub(crate) fn commit(self) -> Result<(), StorageError> {
        let mut changes = StagedChanges::default();
        for (id, slot) in self.trees {
            match slot {
                Slot::Staged(dag) => changes.put_trees.push(dag),
                Slot::Discarded => changes.remove_trees.push(id),
            }
        }
        for (id, node) in self.nodes {
            match node {
                Some(node) => changes.put_nodes.push((id, node)),
                None => changes.remove_nodes.push(id),
            }
        }
        self.provider.apply(changes)
    }

    fn size_limit(&self, dag: &Dag) -> usize {
        self.order.normalized_size_limit(dag.depth())
    }

    /// Insert or replace `id` under `dag`. Returns true if the identity is new.
    pub(crate) fn put(&mut self, dag: &mut Dag, id: NodeId) -> Result<bool, StorageError> {
        // Pinned entries never re-attempt promotion
        if dag.is_pinned(&id) {
            dag.add_non_promotable(id);
            dag.set_changed();
            return Ok(false);
        }

        let added = if dag.is_leaf() {
            let present = dag.children().map_or(false, |c| c.contains(&id));
            if present {
                dag.add_child(id);
                false
            } else if dag.direct_count() < self.size_limit(dag) {
                dag.add_child(id);
                true
            } else {
                self.promote(dag)?;
                self.put_into_bucket(dag, id)?
            }
        } else {
            self.put_into_bucket(dag, id)?
        };

        if added {
            dag.increment_count();
        }
        dag.set_changed();
        Ok(added)
    }

    /// Route `id` to its bucket below a bucket-form `dag`, or pin it here if
    /// the ordering function cannot discriminate it any further.
    fn put_into_bucket(&mut self, dag: &mut Dag, id: NodeId) -> Result<bool, StorageError> {
        let Some(index) = self.order.bucket(&id, dag.depth()) else {
            return Ok(dag.add_non_promotable(id));
        };

        let child_id = dag.id().child(index);
        let mut child = self.take_tree(&child_id)?;
        let added = self.put(&mut child, id)?;
        dag.add_bucket(child_id);
        self.put_tree(child);
        Ok(added)
    }

    /// Switch a full leaf to bucket form and redistribute its children.
    fn promote(&mut self, dag: &mut Dag) -> Result<(), StorageError> {
        let children = dag.switch_to_buckets();
        debug!(
            tree = ?dag.id(),
            entries = children.len(),
            "Promoting leaf to buckets"
        );
        for child in children {
            self.put_into_bucket(dag, child)?;
        }
        Ok(())
    }

    /// Remove `id` from under `dag`. Returns true if it was present.
    pub(crate) fn remove(&mut self, dag: &mut Dag, id: &NodeId) -> Result<bool, StorageError> {
        let removed = if dag.remove_non_promotable(id) {
            true
        } else if dag.is_leaf() {
            dag.remove_child(id)
        } else {
            self.remove_from_bucket(dag, id)?
        };

        if !removed {
            return Ok(false);
        }

        dag.decrement_count();
        dag.set_changed();
        if !dag.is_leaf() && dag.child_count() <= self.size_limit(dag) as u64 {
            self.demote(dag)?;
        }
        Ok(true)
    }

    fn remove_from_bucket(&mut self, dag: &mut Dag, id: &NodeId) -> Result<bool, StorageError> {
        let Some(index) = self.order.bucket(id, dag.depth()) else {
            return Ok(false);
        };
        let child_id = dag.id().child(index);
        if !dag.buckets().map_or(false, |b| b.contains(&child_id)) {
            return Ok(false);
        }

        let mut child = self.take_tree(&child_id)?;
        let removed = self.remove(&mut child, id)?;
        if removed && child.is_empty() {
            dag.remove_bucket(&child_id);
            self.discard_tree(child_id);
        } else {
            self.put_tree(child);
        }
        Ok(removed)
    }

    /// Collapse a bucket-form `dag` back into a leaf holding every entry below it.
    fn demote(&mut self, dag: &mut Dag) -> Result<(), StorageError> {
        let mut entries = dag.take_non_promotable();
        let buckets = dag.buckets().cloned().unwrap_or_default();
        for bucket in &buckets {
            self.collect(bucket, &mut entries)?;
        }

        debug!(
            tree = ?dag.id(),
            buckets = buckets.len(),
            entries = entries.len(),
            "Demoting buckets to leaf"
        );
        debug_assert_eq!(entries.len() as u64, dag.child_count());

        let count = entries.len() as u64;
        dag.switch_to_leaf(entries);
        dag.set_child_count(count);
        Ok(())
    }

    /// Gather every entry at or below `id` and discard the positions.
    fn collect(&mut self, id: &TreeId, into: &mut BTreeSet<NodeId>) -> Result<(), StorageError> {
        let mut dag = self.take_tree(id)?;
        into.extend(dag.take_non_promotable());
        match dag.form() {
            DagForm::Leaf(children) => into.extend(children.iter().cloned()),
            DagForm::Buckets(buckets) => {
                for bucket in buckets {
                    self.collect(bucket, into)?;
                }
            }
        }
        self.discard_tree(id.clone());
        Ok(())
    }
}
