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

//! The read-only queries over the proposal tree: which node deserves the next
//! worker, which nodes are ripe for a Metropolis decision, and whether the
//! root has a settled successor the chain can advance to.

use crate::{BranchKind, MlTree, NodeId};

/// The kind of Metropolis decision a node is ready for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A plain Metropolis–Hastings step against the same-level predecessor
    /// (ground level only).
    SingleLevel,
    /// A delayed-acceptance step promoting a coarse-accepted candidate to
    /// the next finer level.
    TwoLevel,
}

/// Among the leaves awaiting evaluation (no log-posterior yet, nothing in
/// flight), picks the one the chain is most likely to actually visit. Ties
/// break toward shallower nodes, then lower subchain indices, then creation
/// order.
pub fn find_max_probability_node(tree: &MlTree) -> Option<NodeId> {
    let mut best: Option<(f64, usize, usize, u64, NodeId)> = None;
    for id in tree.leaves() {
        let node = &tree[id];
        if node.logposterior.is_some() || node.pending {
            continue;
        }
        let key = (
            node.probability_reached.unwrap_or(0.0),
            tree.depth(id),
            node.subchain_index,
            node.serial(),
        );
        let better = match &best {
            None => true,
            Some((p, depth, index, serial, _)) => match key.0.total_cmp(p) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    (key.1, key.2, key.3) < (*depth, *index, *serial)
                }
            },
        };
        if better {
            best = Some((key.0, key.1, key.2, key.3, id));
        }
    }
    best.map(|(_, _, _, _, id)| id)
}

/// Classifies whether `id` is ready for a Metropolis decision, and which
/// kind. A node is ready when it is an accept candidate whose decision is
/// still unresolved (the reject sibling is attached) and every log-posterior
/// entering the acceptance ratio is known.
pub fn available_decision(tree: &MlTree, id: NodeId) -> Option<Decision> {
    let node = tree.get(id)?;
    if node.branch != BranchKind::Accept || node.logposterior.is_none() {
        return None;
    }
    let parent = node.parent()?;
    tree.sibling(id)?;
    let parent_node = &tree[parent];
    if node.level == parent_node.level {
        // a ground-level step decided against the direct predecessor
        parent_node.logposterior?;
        Some(Decision::SingleLevel)
    } else if node.level == parent_node.level + 1 {
        // a promotion: the subchain below the same-level ancestor produced
        // this candidate, all four posteriors must be in
        parent_node.logposterior?;
        let same_level = get_same_level_parent(tree, id)?;
        tree[same_level].logposterior?;
        let subchain_root = subchain_root_of(tree, same_level)?;
        tree[subchain_root].logposterior?;
        Some(Decision::TwoLevel)
    } else {
        None
    }
}

/// The nearest ancestor of `id` living at the same level as `id`.
pub fn get_same_level_parent(tree: &MlTree, id: NodeId) -> Option<NodeId> {
    ancestor_at_level(tree, id, tree.get(id)?.level)
}

/// The nearest ancestor of `id` living at the given level.
pub fn ancestor_at_level(tree: &MlTree, id: NodeId, level: usize) -> Option<NodeId> {
    let mut cursor = tree.get(id)?.parent();
    while let Some(a) = cursor {
        let node = tree.get(a)?;
        if node.level == level {
            return Some(a);
        }
        cursor = node.parent();
    }
    None
}

/// The child of `id` that starts its nested coarse subchain, if any.
pub fn subchain_root_of(tree: &MlTree, id: NodeId) -> Option<NodeId> {
    let node = tree.get(id)?;
    node.children()
        .iter()
        .copied()
        .find(|&c| tree[c].branch == BranchKind::SubchainRoot && tree[c].level + 1 == node.level)
}

/// If the root's successor is settled — the root has exactly one child and
/// that child continues the root's own (finest-level) chain — returns it.
/// This is the predicate gating chain advancement.
pub fn get_unique_same_subchain_child(tree: &MlTree) -> Option<NodeId> {
    let root = &tree[tree.root()];
    match root.children() {
        &[only] if tree[only].level == root.level => Some(only),
        _ => None,
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_search {
    use std::sync::Arc;

    use crate::implementation::tree::search::*;
    use crate::{BranchKind, MlTree, State};

    fn state(values: &[f64]) -> State {
        Arc::from(values.to_vec().into_boxed_slice())
    }

    /// root(1) -> s0(0) -> [a(0), r(0)] with the promotion not built yet
    fn two_level_tree() -> (MlTree, NodeId, NodeId, NodeId) {
        let mut t = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = t.root();
        let s0 = t.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let a = t.add_child(s0, state(&[1.0]), 0, 1, 0.2, BranchKind::Accept);
        let r = t.add_child(s0, state(&[0.0]), 0, 1, 0.3, BranchKind::Reject);
        (t, s0, a, r)
    }

    #[test]
    fn the_most_probable_unevaluated_leaf_wins() {
        let (mut t, s0, a, r) = two_level_tree();
        t.set_logposterior(s0, -1.0);
        t.get_mut(a).unwrap().probability_reached = Some(0.6);
        t.get_mut(r).unwrap().probability_reached = Some(0.4);
        assert_eq!(Some(a), find_max_probability_node(&t));
    }

    #[test]
    fn evaluated_and_pending_leaves_are_not_candidates() {
        let (mut t, s0, a, r) = two_level_tree();
        t.set_logposterior(s0, -1.0);
        t.get_mut(a).unwrap().probability_reached = Some(0.6);
        t.get_mut(r).unwrap().probability_reached = Some(0.4);
        t.get_mut(a).unwrap().pending = true;
        assert_eq!(Some(r), find_max_probability_node(&t));
        t.set_logposterior(r, -2.0);
        assert_eq!(None, find_max_probability_node(&t));
    }

    #[test]
    fn probability_ties_break_toward_the_shallower_node() {
        let mut t = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        t.set_logposterior(r, -1.0); // inherited, say
        let aa = t.add_child(r, state(&[2.0]), 0, 2, 0.3, BranchKind::Accept);
        t.get_mut(a).unwrap().probability_reached = Some(0.5);
        t.get_mut(aa).unwrap().probability_reached = Some(0.5);
        assert_eq!(Some(a), find_max_probability_node(&t));
    }

    #[test]
    fn a_ground_pair_is_ready_once_both_posteriors_are_in() {
        let mut t = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let _r = t.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        assert_eq!(None, available_decision(&t, a));
        t.set_logposterior(a, -0.5);
        assert_eq!(None, available_decision(&t, a));
        t.set_logposterior(root, -0.1);
        assert_eq!(Some(Decision::SingleLevel), available_decision(&t, a));
    }

    #[test]
    fn reject_children_never_carry_a_decision() {
        let mut t = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = t.root();
        let _a = t.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        t.set_logposterior(root, -0.1);
        t.set_logposterior(r, -0.1);
        assert_eq!(None, available_decision(&t, r));
    }

    #[test]
    fn a_resolved_pair_is_not_ready_again() {
        let mut t = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = t.root();
        let a = t.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = t.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        t.set_logposterior(root, -0.1);
        t.set_logposterior(a, -0.5);
        t.detach(r);
        assert_eq!(None, available_decision(&t, a));
    }

    #[test]
    fn a_promotion_needs_all_four_posteriors() {
        let (mut t, s0, a, r) = two_level_tree();
        let root = t.root();
        t.detach(r);
        // subchain of length 1: promotion pair under a
        let pa = t.add_child(a, state(&[1.0]), 1, 1, 0.4, BranchKind::Accept);
        let _pr = t.add_child(a, state(&[0.0]), 1, 1, 0.6, BranchKind::Reject);

        t.set_logposterior(pa, -0.7);
        assert_eq!(None, available_decision(&t, pa));
        t.set_logposterior(a, -0.4); // coarse at the candidate
        assert_eq!(None, available_decision(&t, pa));
        t.set_logposterior(root, -0.2); // fine at the current state
        assert_eq!(None, available_decision(&t, pa));
        t.set_logposterior(s0, -0.3); // coarse at the current state
        assert_eq!(Some(Decision::TwoLevel), available_decision(&t, pa));
    }

    #[test]
    fn same_level_parent_skips_the_coarse_subchain() {
        let (mut t, _s0, a, _r) = two_level_tree();
        let root = t.root();
        let pa = t.add_child(a, state(&[1.0]), 1, 1, 0.4, BranchKind::Accept);
        assert_eq!(Some(root), get_same_level_parent(&t, pa));
        assert_eq!(None, get_same_level_parent(&t, root));
    }

    #[test]
    fn the_chain_advances_only_through_a_settled_same_level_successor() {
        let (mut t, _s0, a, r) = two_level_tree();
        // the subchain root is not a successor
        assert_eq!(None, get_unique_same_subchain_child(&t));
        t.detach(r);
        t.detach(a);
        // a lone promotion survivor spliced under the root is one
        let f = t.add_child(t.root(), state(&[1.0]), 1, 1, 0.9, BranchKind::Accept);
        t.splice(t.root(), t[t.root()].children()[0], f);
        assert_eq!(Some(f), get_unique_same_subchain_child(&t));
    }
}
