//! Mutable staging state of one tree position

use crate::graph::ids::{NodeId, TreeId};
use crate::revtree::RevTree;
use crate::types::ObjectId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle of a DAG within a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DagState {
    /// Placeholder, content not yet copied from the persisted tree
    Initialized,
    /// Content copied from the persisted tree, unmodified
    Mirrored,
    /// Locally mutated
    Changed,
}

/// Either direct entries or child bucket positions, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DagForm {
    Leaf(BTreeSet<NodeId>),
    Buckets(BTreeSet<TreeId>),
}

/// One tree position's mutable state.
///
/// Pinned (non-promotable) entries live outside the form and survive form
/// switches. `child_count` is the transitive number of entries reachable from
/// this position, pinned ones included.
#[derive(Serialize, Deserialize)]
pub struct Dag {
    id: TreeId,
    original_tree_id: ObjectId,
    state: DagState,
    form: DagForm,
    non_promotable: Mutex<BTreeSet<NodeId>>,
    child_count: u64,
}

impl Dag {
    /// Placeholder mirroring the persisted tree `original_tree_id`
    pub fn new(id: TreeId, original_tree_id: ObjectId) -> Self {
        Self {
            id,
            original_tree_id,
            state: DagState::Initialized,
            form: DagForm::Leaf(BTreeSet::new()),
            non_promotable: Mutex::new(BTreeSet::new()),
            child_count: 0,
        }
    }

    /// Placeholder for a position with no persisted counterpart
    pub fn empty(id: TreeId) -> Self {
        Self::new(id, RevTree::empty_id())
    }

    pub fn id(&self) -> &TreeId {
        &self.id
    }

    /// Id of the persisted tree this DAG mirrors
    pub fn original_tree_id(&self) -> ObjectId {
        self.original_tree_id
    }

    pub fn depth(&self) -> usize {
        self.id.depth()
    }

    pub fn state(&self) -> DagState {
        self.state
    }

    pub fn set_mirrored(&mut self) {
        assert!(
            self.state == DagState::Initialized,
            "DAG {:?} mirrored twice (state {:?})",
            self.id,
            self.state
        );
        self.state = DagState::Mirrored;
    }

    pub fn set_changed(&mut self) {
        assert!(
            self.state != DagState::Initialized,
            "DAG {:?} changed before being mirrored",
            self.id
        );
        self.state = DagState::Changed;
    }

    pub fn is_changed(&self) -> bool {
        self.state == DagState::Changed
    }

    pub fn form(&self) -> &DagForm {
        &self.form
    }

    /// Direct children, if in leaf form
    pub fn children(&self) -> Option<&BTreeSet<NodeId>> {
        match &self.form {
            DagForm::Leaf(children) => Some(children),
            DagForm::Buckets(_) => None,
        }
    }

    /// Child bucket positions, if in bucket form
    pub fn buckets(&self) -> Option<&BTreeSet<TreeId>> {
        match &self.form {
            DagForm::Leaf(_) => None,
            DagForm::Buckets(buckets) => Some(buckets),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.form, DagForm::Leaf(_))
    }

    pub fn child_count(&self) -> u64 {
        self.child_count
    }

    pub(crate) fn set_child_count(&mut self, count: u64) {
        self.child_count = count;
    }

    pub(crate) fn increment_count(&mut self) {
        self.child_count += 1;
    }

    pub(crate) fn decrement_count(&mut self) {
        self.child_count = self.child_count.saturating_sub(1);
    }

    /// Snapshot of the pinned entries
    pub fn non_promotable(&self) -> BTreeSet<NodeId> {
        self.non_promotable.lock().clone()
    }

    pub fn non_promotable_len(&self) -> usize {
        self.non_promotable.lock().len()
    }

    pub fn is_pinned(&self, id: &NodeId) -> bool {
        self.non_promotable.lock().contains(id)
    }

    /// Pin `id` at this position, or refresh the stored id if already pinned.
    ///
    /// Safe to call concurrently for the same identity. Returns true if the
    /// entry was not pinned before.
    pub fn add_non_promotable(&self, id: NodeId) -> bool {
        let mut pinned = self.non_promotable.lock();
        pinned.replace(id).is_none()
    }

    pub fn add_all_non_promotable(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.non_promotable.get_mut().extend(ids);
    }

    pub fn remove_non_promotable(&mut self, id: &NodeId) -> bool {
        self.non_promotable.get_mut().remove(id)
    }

    pub(crate) fn take_non_promotable(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(self.non_promotable.get_mut())
    }

    /// Insert or replace a direct child. Returns true if the identity is new.
    ///
    /// Panics in bucket form.
    pub fn add_child(&mut self, id: NodeId) -> bool {
        match &mut self.form {
            DagForm::Leaf(children) => children.replace(id).is_none(),
            DagForm::Buckets(_) => panic!("add_child on bucket-form DAG {:?}", self.id),
        }
    }

    pub fn remove_child(&mut self, id: &NodeId) -> bool {
        match &mut self.form {
            DagForm::Leaf(children) => children.remove(id),
            DagForm::Buckets(_) => false,
        }
    }

    /// Register a child bucket. Panics in leaf form.
    pub fn add_bucket(&mut self, bucket: TreeId) -> bool {
        match &mut self.form {
            DagForm::Buckets(buckets) => buckets.insert(bucket),
            DagForm::Leaf(_) => panic!("add_bucket on leaf-form DAG {:?}", self.id),
        }
    }

    pub fn remove_bucket(&mut self, bucket: &TreeId) -> bool {
        match &mut self.form {
            DagForm::Buckets(buckets) => buckets.remove(bucket),
            DagForm::Leaf(_) => false,
        }
    }

    /// Switch to bucket form, returning the former direct children.
    pub fn switch_to_buckets(&mut self) -> BTreeSet<NodeId> {
        match std::mem::replace(&mut self.form, DagForm::Buckets(BTreeSet::new())) {
            DagForm::Leaf(children) => children,
            DagForm::Buckets(buckets) => {
                self.form = DagForm::Buckets(buckets);
                BTreeSet::new()
            }
        }
    }

    /// Switch to leaf form holding `children`, returning the former buckets.
    pub fn switch_to_leaf(&mut self, children: BTreeSet<NodeId>) -> BTreeSet<TreeId> {
        match std::mem::replace(&mut self.form, DagForm::Leaf(children)) {
            DagForm::Buckets(buckets) => buckets,
            DagForm::Leaf(_) => BTreeSet::new(),
        }
    }

    /// Entries held directly at this position (children plus pinned)
    pub fn direct_count(&self) -> usize {
        let children = self.children().map_or(0, |c| c.len());
        children + self.non_promotable_len()
    }

    pub fn is_empty(&self) -> bool {
        let form_empty = match &self.form {
            DagForm::Leaf(children) => children.is_empty(),
            DagForm::Buckets(buckets) => buckets.is_empty(),
        };
        form_empty && self.non_promotable.lock().is_empty()
    }
}

impl Clone for Dag {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            original_tree_id: self.original_tree_id,
            state: self.state,
            form: self.form.clone(),
            non_promotable: Mutex::new(self.non_promotable()),
            child_count: self.child_count,
        }
    }
}

impl PartialEq for Dag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.original_tree_id == other.original_tree_id
            && self.state == other.state
            && self.child_count == other.child_count
            && self.form == other.form
            && self.non_promotable() == other.non_promotable()
    }
}

impl fmt::Debug for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dag")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("child_count", &self.child_count)
            .field("form", &self.form)
            .field("non_promotable", &self.non_promotable())
            .finish()
    }
}
