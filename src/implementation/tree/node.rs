// Copyright 2020 Xavier Gillard
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! This module provides the multilevel proposal tree itself: a slab of nodes
//! with owned child lists and non-owning parent back-references. Nodes stand
//! for tentative chain states at some fidelity level and some position within
//! a subchain; the rest of the crate grows, searches, prunes and collapses
//! this structure.

use crate::State;

/// Identifies one node of an [`MlTree`]. Ids are generational: the id of a
/// pruned node keeps referring to that dead node and can never be mistaken
/// for a later tenant of the same slot. This is what lets the scheduler hold
/// on to ids of in-flight evaluations while the tree is pruned underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// The role a node plays with respect to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// The node carries a proposed move and the Metropolis decision on it.
    Accept,
    /// The node repeats its predecessor's state, should the move be refused.
    Reject,
    /// The first node of a nested coarse subchain: same state as the parent,
    /// one level down.
    SubchainRoot,
}

/// One tentative chain state.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The parameter vector this node stands for.
    pub state: State,
    /// The fidelity level the node lives at (0 = coarsest).
    pub level: usize,
    /// Position within the subchain its level is running here.
    pub subchain_index: usize,
    /// The uniform draw in `[0, 1)` fixed at creation and used as this node's
    /// Metropolis acceptance test.
    pub random_draw: f64,
    /// The log-posterior at `(level, state)`, once some evaluation (or a
    /// same-state ancestor) provided it.
    pub logposterior: Option<f64>,
    /// Estimated probability that the chain actually walks through this
    /// node; assigned by the tree modifier, consumed by the scheduler.
    pub probability_reached: Option<f64>,
    /// True while an evaluation of this node is in flight.
    pub pending: bool,
    /// How this node relates to its parent.
    pub branch: BranchKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    serial: u64,
}

impl TreeNode {
    /// The parent of this node, if it has not been promoted to root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
    /// The children of this node (at most two).
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
    /// The creation rank of this node; older nodes have lower serials. Used
    /// as the final, deterministic tie breaker when ranking candidates.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

struct Slot {
    generation: u32,
    node: Option<TreeNode>,
}

/// The multilevel proposal tree.
pub struct MlTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
    next_serial: u64,
}

impl MlTree {
    /// Creates a tree holding only its root: an accepted state at the given
    /// (finest) level, subchain position 0.
    pub fn new(state: State, level: usize, random_draw: f64) -> Self {
        let mut tree = MlTree {
            slots: vec![],
            free: vec![],
            root: NodeId { index: 0, generation: 0 },
            next_serial: 0,
        };
        let root = tree.insert(TreeNode {
            state,
            level,
            subchain_index: 0,
            random_draw,
            logposterior: None,
            probability_reached: Some(1.0),
            pending: false,
            branch: BranchKind::Accept,
            parent: None,
            children: vec![],
            serial: 0,
        });
        tree.root = root;
        tree
    }

    /// The current root of the tree (the most recently accepted finest-level
    /// state, or the initial state before any advancement).
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// True iff the id refers to a node that is still part of the tree.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index)
            .map_or(false, |s| s.generation == id.generation && s.node.is_some())
    }

    /// The node behind an id, if it is still alive.
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    /// Mutable access to the node behind an id, if it is still alive.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// The number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True iff the tree holds no node. (It never does: there is always a
    /// root; provided for completeness.)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a child under `parent` and returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_child(
        &mut self,
        parent: NodeId,
        state: State,
        level: usize,
        subchain_index: usize,
        random_draw: f64,
        branch: BranchKind,
    ) -> NodeId {
        let serial = self.next_serial;
        let id = self.insert(TreeNode {
            state,
            level,
            subchain_index,
            random_draw,
            logposterior: None,
            probability_reached: None,
            pending: false,
            branch,
            parent: Some(parent),
            children: vec![],
            serial,
        });
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Records the log-posterior of a node. The value is written at most
    /// once; a second write is ignored.
    pub fn set_logposterior(&mut self, id: NodeId, logposterior: f64) {
        if let Some(node) = self.get_mut(id) {
            if node.logposterior.is_none() {
                node.logposterior = Some(logposterior);
            }
        }
    }

    /// Detaches the subtree rooted at `id` from the tree and frees it. The
    /// root itself cannot be detached.
    pub fn detach(&mut self, id: NodeId) {
        if id == self.root || !self.contains(id) {
            return;
        }
        let parent = self.get(id).and_then(TreeNode::parent);
        if let Some(parent) = parent {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }
        self.free_subtree(id);
    }

    /// Makes `child` (a direct child of the current root) the new root and
    /// frees the old root together with any sibling subtree of `child`.
    pub fn promote_root(&mut self, child: NodeId) {
        let old = self.root;
        if !self.contains(child) || self.get(child).and_then(TreeNode::parent) != Some(old) {
            return;
        }
        let siblings: Vec<NodeId> = self
            .get(old)
            .map(|n| n.children.iter().copied().filter(|&c| c != child).collect())
            .unwrap_or_default();
        for sibling in siblings {
            self.free_subtree(sibling);
        }
        if let Some(slot) = self.slots.get_mut(old.index) {
            slot.node = None;
            self.free.push(old.index);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = None;
            c.probability_reached = Some(1.0);
        }
        self.root = child;
    }

    /// Replaces the `dropped` child of `ancestor` by `kept`, a strict
    /// descendant of `dropped`: `kept` is unhooked from its current parent,
    /// what remains of the `dropped` subtree is freed, and `kept` takes
    /// `dropped`'s place under `ancestor`. This is the primitive behind
    /// subchain compression.
    pub fn splice(&mut self, ancestor: NodeId, dropped: NodeId, kept: NodeId) {
        if !self.contains(ancestor) || !self.contains(dropped) || !self.contains(kept) {
            return;
        }
        let kept_parent = self[kept].parent();
        if let Some(kp) = kept_parent {
            if let Some(p) = self.get_mut(kp) {
                p.children.retain(|&c| c != kept);
            }
        }
        self.free_subtree(dropped);
        if let Some(a) = self.get_mut(ancestor) {
            a.children.retain(|&c| c != dropped);
            a.children.push(kept);
        }
        if let Some(k) = self.get_mut(kept) {
            k.parent = Some(ancestor);
        }
    }

    /// The number of edges between the root and `id`.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = id;
        while let Some(parent) = self.get(cursor).and_then(TreeNode::parent) {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// The height of the tree: the maximum depth over all nodes.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            height = height.max(depth);
            if let Some(node) = self.get(id) {
                for &child in node.children() {
                    stack.push((child, depth + 1));
                }
            }
        }
        height
    }

    /// All live node ids in level order (breadth first from the root).
    pub fn level_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len());
        let mut cursor = 0;
        order.push(self.root);
        while cursor < order.len() {
            let id = order[cursor];
            cursor += 1;
            if let Some(node) = self.get(id) {
                order.extend_from_slice(node.children());
            }
        }
        order
    }

    /// All childless nodes, in level order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.level_order()
            .into_iter()
            .filter(|&id| self.get(id).map_or(false, |n| n.children.is_empty()))
            .collect()
    }

    /// The other child of this node's parent, when the parent holds exactly
    /// the unresolved accept/reject pair.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.get(id)?.parent()?;
        let children = self.get(parent)?.children();
        if children.len() == 2 {
            children.iter().copied().find(|&c| c != id)
        } else {
            None
        }
    }

    fn insert(&mut self, mut node: TreeNode) -> NodeId {
        node.serial = self.next_serial;
        self.next_serial += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.node = Some(node);
            NodeId { index, generation: slot.generation }
        } else {
            self.slots.push(Slot { generation: 0, node: Some(node) });
            NodeId { index: self.slots.len() - 1, generation: 0 }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cursor) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(cursor.index) {
                if slot.generation == cursor.generation {
                    if let Some(node) = slot.node.take() {
                        stack.extend_from_slice(&node.children);
                        self.free.push(cursor.index);
                    }
                }
            }
        }
    }
}

impl std::ops::Index<NodeId> for MlTree {
    type Output = TreeNode;
    fn index(&self, id: NodeId) -> &TreeNode {
        self.get(id).expect("indexed a node that is no longer in the tree")
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_mltree {
    use std::sync::Arc;

    use crate::{BranchKind, MlTree, State};

    fn state(values: &[f64]) -> State {
        Arc::from(values.to_vec().into_boxed_slice())
    }

    fn tree() -> MlTree {
        MlTree::new(state(&[0.0]), 1, 0.5)
    }

    #[test]
    fn a_new_tree_is_just_its_root() {
        let t = tree();
        assert_eq!(1, t.len());
        assert_eq!(0, t.height());
        assert_eq!(vec![t.root()], t.leaves());
        assert_eq!(1, t[t.root()].level);
        assert_eq!(0, t[t.root()].subchain_index);
        assert_eq!(Some(1.0), t[t.root()].probability_reached);
    }

    #[test]
    fn children_hang_under_their_parent() {
        let mut t = tree();
        let root = t.root();
        let c = t.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        assert_eq!(Some(root), t[c].parent());
        assert_eq!(&[c], t[root].children());
        assert_eq!(1, t.depth(c));
        assert_eq!(1, t.height());
    }

    #[test]
    fn logposteriors_are_written_at_most_once() {
        let mut t = tree();
        let root = t.root();
        t.set_logposterior(root, -1.0);
        t.set_logposterior(root, -2.0);
        assert_eq!(Some(-1.0), t[root].logposterior);
    }

    #[test]
    fn detaching_a_node_frees_its_whole_subtree() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        let b = t.add_child(root, state(&[0.0]), 1, 1, 0.2, BranchKind::Reject);
        let aa = t.add_child(a, state(&[2.0]), 1, 2, 0.3, BranchKind::Accept);

        t.detach(a);
        assert!(!t.contains(a));
        assert!(!t.contains(aa));
        assert!(t.contains(b));
        assert_eq!(&[b], t[root].children());
        assert_eq!(2, t.len());
    }

    #[test]
    fn the_root_cannot_be_detached() {
        let mut t = tree();
        let root = t.root();
        t.detach(root);
        assert!(t.contains(root));
    }

    #[test]
    fn stale_ids_do_not_resolve_to_slot_reusers() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        t.detach(a);
        // the freed slot is reused by the next insertion
        let b = t.add_child(root, state(&[2.0]), 1, 1, 0.2, BranchKind::Reject);
        assert!(!t.contains(a));
        assert!(t.contains(b));
        assert!(t.get(a).is_none());
    }

    #[test]
    fn promoting_a_child_drops_the_old_root_and_its_other_branches() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 1, 1, 0.2, BranchKind::Reject);
        let aa = t.add_child(a, state(&[1.0]), 0, 0, 0.3, BranchKind::SubchainRoot);

        t.promote_root(a);
        assert_eq!(a, t.root());
        assert!(!t.contains(root));
        assert!(!t.contains(r));
        assert!(t.contains(aa));
        assert_eq!(None, t[a].parent());
        assert_eq!(Some(1.0), t[a].probability_reached);
        assert_eq!(1, t.depth(aa));
    }

    #[test]
    fn siblings_pair_up_only_while_both_are_attached() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 1, 1, 0.2, BranchKind::Reject);
        assert_eq!(Some(r), t.sibling(a));
        assert_eq!(Some(a), t.sibling(r));

        t.detach(r);
        assert_eq!(None, t.sibling(a));
    }

    #[test]
    fn level_order_lists_parents_before_children() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 1, 1, 0.2, BranchKind::Reject);
        let aa = t.add_child(a, state(&[1.0]), 0, 0, 0.3, BranchKind::SubchainRoot);
        assert_eq!(vec![root, a, r, aa], t.level_order());
        assert_eq!(vec![r, aa], t.leaves());
    }

    #[test]
    fn splicing_reparents_the_kept_node_and_frees_the_rest() {
        let mut t = tree();
        let root = t.root();
        let s0 = t.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let s1 = t.add_child(s0, state(&[1.0]), 0, 1, 0.2, BranchKind::Accept);
        let f = t.add_child(s1, state(&[1.0]), 1, 1, 0.3, BranchKind::Accept);
        let fc = t.add_child(f, state(&[1.0]), 0, 0, 0.4, BranchKind::SubchainRoot);

        t.splice(root, s0, f);
        assert!(!t.contains(s0));
        assert!(!t.contains(s1));
        assert!(t.contains(f));
        assert!(t.contains(fc));
        assert_eq!(&[f], t[root].children());
        assert_eq!(Some(root), t[f].parent());
        assert_eq!(1, t.depth(f));
        assert_eq!(3, t.len());
    }

    #[test]
    fn serials_follow_creation_order() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 1, 1, 0.1, BranchKind::Accept);
        let b = t.add_child(root, state(&[0.0]), 1, 1, 0.2, BranchKind::Reject);
        assert!(t[root].serial() < t[a].serial());
        assert!(t[a].serial() < t[b].serial());
    }
}
