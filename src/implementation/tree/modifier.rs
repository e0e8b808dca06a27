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

//! This module provides the tree modifier: the one place where the proposal
//! tree grows and shrinks. Expansion applies the multilevel stepping rule to
//! the evaluated frontier, reach probabilities are propagated from the
//! accept-rate estimates, losing branches are pruned after each decision,
//! and fully resolved subchains are collapsed so that the tree height stays
//! within its bound.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::implementation::tree::search;
use crate::{AcceptRateEstimator, BranchKind, MlTree, NodeId, Proposal, RngSet};

/// Grows, reweighs, prunes and collapses the proposal tree according to the
/// multilevel stepping rule.
pub struct TreeModifier {
    subsampling_rates: Vec<i64>,
    max_tree_height: usize,
}

impl TreeModifier {
    /// Creates a modifier for the given subchain lengths (one per level, the
    /// finest conventionally -1) and tree height bound.
    pub fn new(subsampling_rates: Vec<i64>, max_tree_height: usize) -> Self {
        TreeModifier { subsampling_rates, max_tree_height }
    }

    /// Expands the evaluated frontier to closure: every leaf whose own
    /// log-posterior is known (evaluated, or inherited from a same-state
    /// ancestor) grows its children, newly inherited children grow theirs in
    /// turn, and so on until only unevaluated leaves and the height bound
    /// remain. Running to closure makes the tree shape a function of the
    /// harvested results alone, never of how many workers happen to be
    /// around. The visiting order within a round is drawn from the
    /// expansion generator.
    pub fn expand_tree(&self, tree: &mut MlTree, proposal: &dyn Proposal, rngs: &mut RngSet) {
        loop {
            let mut frontier: Vec<NodeId> = tree
                .leaves()
                .into_iter()
                .filter(|&id| {
                    tree[id].logposterior.is_some()
                        && tree.depth(id) + 1 <= self.max_tree_height
                })
                .collect();
            if frontier.is_empty() {
                return;
            }
            frontier.shuffle(&mut rngs.expansion);
            for leaf in frontier {
                self.expand_leaf(tree, leaf, proposal, rngs);
            }
        }
    }

    fn expand_leaf(
        &self,
        tree: &mut MlTree,
        leaf: NodeId,
        proposal: &dyn Proposal,
        rngs: &mut RngSet,
    ) {
        let finest = self.subsampling_rates.len() - 1;
        let Some(node) = tree.get(leaf) else { return };
        if node.logposterior.is_none() || !node.children().is_empty() {
            return;
        }
        let level = node.level;
        let index = node.subchain_index;
        let state = node.state.clone();
        let rate = self.subsampling_rates[level];
        let subchain_done = level < finest && rate >= 0 && index as i64 >= rate;

        if subchain_done {
            // the subchain delivered its proposal: promote it one level up
            let Some(anc) = search::ancestor_at_level(tree, leaf, level + 1) else {
                return;
            };
            let (anc_state, anc_index) = {
                let m = &tree[anc];
                (m.state.clone(), m.subchain_index)
            };
            let accept = tree.add_child(
                leaf,
                state,
                level + 1,
                anc_index + 1,
                rngs.node_init.gen(),
                BranchKind::Accept,
            );
            let reject = tree.add_child(
                leaf,
                anc_state,
                level + 1,
                anc_index + 1,
                rngs.node_init.gen(),
                BranchKind::Reject,
            );
            inherit_logposterior(tree, accept);
            inherit_logposterior(tree, reject);
        } else if level == 0 {
            // ground level: step the chain with a fresh proposal
            let proposed: Arc<[f64]> = proposal.propose(&state, &mut rngs.proposal).into();
            let accept = tree.add_child(
                leaf,
                proposed,
                0,
                index + 1,
                rngs.node_init.gen(),
                BranchKind::Accept,
            );
            let reject = tree.add_child(
                leaf,
                state,
                0,
                index + 1,
                rngs.node_init.gen(),
                BranchKind::Reject,
            );
            inherit_logposterior(tree, accept);
            inherit_logposterior(tree, reject);
        } else {
            // start the nested subchain that will produce the proposal
            let child = tree.add_child(
                leaf,
                state,
                level - 1,
                0,
                rngs.node_init.gen(),
                BranchKind::SubchainRoot,
            );
            inherit_logposterior(tree, child);
        }
    }

    /// Recomputes, for every node, the estimated probability that the chain
    /// walks through it: the root has probability 1, a lone child inherits
    /// its parent's value, and an unresolved pair splits it according to the
    /// estimated accept rate at the pair's level.
    pub fn update_probability_reached(&self, tree: &mut MlTree, estimator: &AcceptRateEstimator) {
        let root = tree.root();
        if let Some(node) = tree.get_mut(root) {
            node.probability_reached = Some(1.0);
        }
        for id in tree.level_order() {
            let (probability, children) = {
                let node = &tree[id];
                (node.probability_reached.unwrap_or(0.0), node.children().to_vec())
            };
            match children.as_slice() {
                &[only] => {
                    if let Some(child) = tree.get_mut(only) {
                        child.probability_reached = Some(probability);
                    }
                }
                &[first, second] => {
                    let alpha = estimator.rate(tree[first].level);
                    for child_id in [first, second] {
                        if let Some(child) = tree.get_mut(child_id) {
                            let share = match child.branch {
                                BranchKind::Reject => 1.0 - alpha,
                                _ => alpha,
                            };
                            child.probability_reached = Some(probability * share);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Pushes the log-posterior of `id` down to every descendant standing for
    /// the same state at the same level that still lacks one. Nothing is
    /// re-evaluated; this only settles values that are already known.
    pub fn update_descendants(&self, tree: &mut MlTree, id: NodeId) {
        let Some(node) = tree.get(id) else { return };
        let Some(logposterior) = node.logposterior else { return };
        let level = node.level;
        let state = node.state.clone();
        let mut stack = node.children().to_vec();
        while let Some(cursor) = stack.pop() {
            let Some(descendant) = tree.get(cursor) else { continue };
            stack.extend_from_slice(descendant.children());
            if descendant.level == level
                && descendant.logposterior.is_none()
                && states_equal(&descendant.state, &state)
            {
                tree.set_logposterior(cursor, logposterior);
            }
        }
    }

    /// Resolves the pair decided at the accept candidate `id`: the losing
    /// branch (the reject sibling if accepted, the candidate itself if not)
    /// is detached together with everything speculated below it.
    pub fn discard_rejected_nodes(&self, tree: &mut MlTree, id: NodeId, accepted: bool) {
        if accepted {
            if let Some(sibling) = tree.sibling(id) {
                tree.detach(sibling);
            }
        } else {
            tree.detach(id);
        }
    }

    /// Collapses every fully resolved subchain: when the nested chain below a
    /// node has become linear and its promotion settled on a single
    /// survivor, the survivor is spliced directly under that node and the
    /// subchain dropped. The splice waits until the survivor has sprouted
    /// its own continuation (so the new subchain can inherit the coarse
    /// value of its start state) unless the height bound is what prevents
    /// the sprouting.
    pub fn compress_resolved_subchains(&self, tree: &mut MlTree) {
        loop {
            let mut changed = false;
            for id in tree.level_order() {
                if !tree.contains(id) {
                    continue;
                }
                if let Some((head, survivor)) = self.resolved_subchain_below(tree, id) {
                    tree.splice(id, head, survivor);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn resolved_subchain_below(&self, tree: &MlTree, id: NodeId) -> Option<(NodeId, NodeId)> {
        let node = tree.get(id)?;
        let &[head] = node.children() else { return None };
        if tree[head].level + 1 != node.level {
            return None;
        }
        let mut cursor = head;
        loop {
            let current = &tree[cursor];
            let &[child] = current.children() else { return None };
            let child_level = tree[child].level;
            if child_level == current.level {
                cursor = child;
            } else if child_level == node.level {
                let capped = tree.depth(child) + 1 > self.max_tree_height;
                if !tree[child].children().is_empty() || capped {
                    return Some((head, child));
                }
                return None;
            } else {
                // a deeper nested subchain, not collapsed yet
                return None;
            }
        }
    }
}

fn inherit_logposterior(tree: &mut MlTree, id: NodeId) {
    let (level, state) = {
        let node = &tree[id];
        (node.level, node.state.clone())
    };
    let mut cursor = tree[id].parent();
    while let Some(a) = cursor {
        let ancestor = &tree[a];
        if ancestor.level == level && states_equal(&ancestor.state, &state) {
            if let Some(logposterior) = ancestor.logposterior {
                tree.set_logposterior(id, logposterior);
            }
            return;
        }
        cursor = ancestor.parent();
    }
}

fn states_equal(a: &Arc<[f64]>, b: &Arc<[f64]>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_modifier {
    use std::sync::Arc;

    use rand::RngCore;

    use crate::implementation::tree::search;
    use crate::{
        AcceptRateEstimator, BranchKind, GaussianRandomWalk, MlTree, Proposal, RngSet, State,
        TreeModifier,
    };

    fn state(values: &[f64]) -> State {
        Arc::from(values.to_vec().into_boxed_slice())
    }

    fn rngs() -> RngSet {
        RngSet::from_seeds(0, 1, 2)
    }

    fn walk() -> GaussianRandomWalk {
        GaussianRandomWalk::new(vec![1.0])
    }

    /// A proposal that never moves: convenient to observe tree structure.
    struct Frozen;
    impl Proposal for Frozen {
        fn propose(&self, current: &[f64], _: &mut dyn RngCore) -> Vec<f64> {
            current.to_vec()
        }
    }

    #[test]
    fn unevaluated_leaves_do_not_expand() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        modifier.expand_tree(&mut tree, &walk(), &mut rngs());
        assert_eq!(1, tree.len());
    }

    #[test]
    fn a_ground_leaf_expands_into_an_accept_reject_pair() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        tree.set_logposterior(root, -0.3);
        modifier.expand_tree(&mut tree, &walk(), &mut rngs());

        let children = tree[root].children().to_vec();
        assert_eq!(2, children.len());
        let accept = children.iter().copied().find(|&c| tree[c].branch == BranchKind::Accept);
        let reject = children.iter().copied().find(|&c| tree[c].branch == BranchKind::Reject);
        let (accept, reject) = (accept.unwrap(), reject.unwrap());
        assert_eq!(1, tree[accept].subchain_index);
        assert_eq!(1, tree[reject].subchain_index);
        // the reject child repeats the current state and inherits its posterior
        assert_eq!(tree[root].state, tree[reject].state);
        assert_eq!(Some(-0.3), tree[reject].logposterior);
        // the proposed move needs an evaluation of its own
        assert_ne!(tree[root].state, tree[accept].state);
        assert_eq!(None, tree[accept].logposterior);
    }

    #[test]
    fn a_coarse_leaf_descends_into_a_subchain() {
        let modifier = TreeModifier::new(vec![3, -1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        tree.set_logposterior(root, -0.3);
        modifier.expand_tree(&mut tree, &walk(), &mut rngs());

        let children = tree[root].children().to_vec();
        assert_eq!(1, children.len());
        let s0 = children[0];
        assert_eq!(BranchKind::SubchainRoot, tree[s0].branch);
        assert_eq!(0, tree[s0].level);
        assert_eq!(0, tree[s0].subchain_index);
        assert_eq!(tree[root].state, tree[s0].state);
        // the coarse posterior at the initial state is not known yet
        assert_eq!(None, tree[s0].logposterior);
    }

    #[test]
    fn a_finished_subchain_promotes_its_final_state() {
        let modifier = TreeModifier::new(vec![1, -1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        // subchain of length 1, already resolved to its accept branch
        let s1 = tree.add_child(s0, state(&[2.0]), 0, 1, 0.2, BranchKind::Accept);
        tree.set_logposterior(root, -0.1);
        tree.set_logposterior(s0, -0.2);
        tree.set_logposterior(s1, -0.4);

        modifier.expand_tree(&mut tree, &Frozen, &mut rngs());

        let children = tree[s1].children().to_vec();
        assert_eq!(2, children.len());
        let accept = children.iter().copied().find(|&c| tree[c].branch == BranchKind::Accept).unwrap();
        let reject = children.iter().copied().find(|&c| tree[c].branch == BranchKind::Reject).unwrap();
        assert_eq!(1, tree[accept].level);
        assert_eq!(1, tree[accept].subchain_index);
        assert_eq!(tree[s1].state, tree[accept].state);
        // the reject alternative repeats the fine current state, posterior included
        assert_eq!(tree[root].state, tree[reject].state);
        assert_eq!(Some(-0.1), tree[reject].logposterior);
        assert_eq!(None, tree[accept].logposterior);
    }

    #[test]
    fn a_fresh_subchain_inherits_the_coarse_posterior_of_its_start() {
        let modifier = TreeModifier::new(vec![1, -1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let s1 = tree.add_child(s0, state(&[2.0]), 0, 1, 0.2, BranchKind::Accept);
        let f = tree.add_child(s1, state(&[2.0]), 1, 1, 0.3, BranchKind::Accept);
        tree.set_logposterior(root, -0.1);
        tree.set_logposterior(s0, -0.2);
        tree.set_logposterior(s1, -0.4);
        tree.set_logposterior(f, -0.15);

        modifier.expand_tree(&mut tree, &Frozen, &mut rngs());

        // f sprouted its own subchain; its root repeats f's state at level 0,
        // which was just evaluated at s1
        let children = tree[f].children().to_vec();
        assert_eq!(1, children.len());
        assert_eq!(BranchKind::SubchainRoot, tree[children[0]].branch);
        assert_eq!(Some(-0.4), tree[children[0]].logposterior);
    }

    #[test]
    fn expansion_respects_the_height_bound() {
        let modifier = TreeModifier::new(vec![-1], 2);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        tree.set_logposterior(tree.root(), -0.3);
        for _ in 0..5 {
            let order = tree.level_order();
            for id in order {
                let lp = tree[id].logposterior;
                if lp.is_none() {
                    tree.set_logposterior(id, -1.0);
                }
            }
            modifier.expand_tree(&mut tree, &walk(), &mut rngs());
        }
        assert!(tree.height() <= 2);
    }

    #[test]
    fn pair_probabilities_split_by_the_estimated_accept_rate() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let estimator = AcceptRateEstimator::new(vec![0.7], 1.0);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        let a = tree.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = tree.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        let aa = tree.add_child(a, state(&[2.0]), 0, 2, 0.3, BranchKind::Accept);
        let ar = tree.add_child(a, state(&[1.0]), 0, 2, 0.4, BranchKind::Reject);

        modifier.update_probability_reached(&mut tree, &estimator);
        assert_eq!(Some(1.0), tree[root].probability_reached);
        assert!((tree[a].probability_reached.unwrap() - 0.7).abs() < 1e-12);
        assert!((tree[r].probability_reached.unwrap() - 0.3).abs() < 1e-12);
        assert!((tree[aa].probability_reached.unwrap() - 0.49).abs() < 1e-12);
        assert!((tree[ar].probability_reached.unwrap() - 0.21).abs() < 1e-12);
    }

    #[test]
    fn a_lone_survivor_inherits_the_full_probability_mass() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let estimator = AcceptRateEstimator::new(vec![0.7], 1.0);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        let a = tree.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = tree.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        tree.detach(r);

        modifier.update_probability_reached(&mut tree, &estimator);
        assert_eq!(Some(1.0), tree[a].probability_reached);
    }

    #[test]
    fn update_descendants_fills_matching_states_across_the_subtree() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        let shared = tree[root].state.clone();
        let a = tree.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = tree.add_child(root, shared.clone(), 0, 1, 0.2, BranchKind::Reject);
        let rr = tree.add_child(r, shared, 0, 2, 0.3, BranchKind::Reject);

        tree.set_logposterior(root, -0.6);
        modifier.update_descendants(&mut tree, root);
        assert_eq!(Some(-0.6), tree[r].logposterior);
        assert_eq!(Some(-0.6), tree[rr].logposterior);
        assert_eq!(None, tree[a].logposterior);
    }

    #[test]
    fn losing_branches_are_discarded_with_their_speculation() {
        let modifier = TreeModifier::new(vec![-1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        let a = tree.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = tree.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        let ra = tree.add_child(r, state(&[3.0]), 0, 2, 0.3, BranchKind::Accept);

        modifier.discard_rejected_nodes(&mut tree, a, true);
        assert!(tree.contains(a));
        assert!(!tree.contains(r));
        assert!(!tree.contains(ra));

        // and the other way around
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let root = tree.root();
        let a = tree.add_child(root, state(&[1.0]), 0, 1, 0.1, BranchKind::Accept);
        let r = tree.add_child(root, state(&[0.0]), 0, 1, 0.2, BranchKind::Reject);
        modifier.discard_rejected_nodes(&mut tree, a, false);
        assert!(!tree.contains(a));
        assert!(tree.contains(r));
    }

    #[test]
    fn a_resolved_subchain_collapses_once_the_survivor_sprouted() {
        let modifier = TreeModifier::new(vec![1, -1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let s1 = tree.add_child(s0, state(&[2.0]), 0, 1, 0.2, BranchKind::Accept);
        let f = tree.add_child(s1, state(&[2.0]), 1, 1, 0.3, BranchKind::Accept);

        // survivor still childless, bound far away: not collapsed yet
        modifier.compress_resolved_subchains(&mut tree);
        assert!(tree.contains(s0));

        let fs = tree.add_child(f, state(&[2.0]), 0, 0, 0.4, BranchKind::SubchainRoot);
        modifier.compress_resolved_subchains(&mut tree);
        assert!(!tree.contains(s0));
        assert!(!tree.contains(s1));
        assert!(tree.contains(f));
        assert!(tree.contains(fs));
        assert_eq!(&[f], tree[root].children());
        assert_eq!(1, tree.depth(f));
        assert_eq!(Some(f), search::get_unique_same_subchain_child(&tree));
    }

    #[test]
    fn an_unresolved_promotion_blocks_the_collapse() {
        let modifier = TreeModifier::new(vec![1, -1], 10);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let s1 = tree.add_child(s0, state(&[2.0]), 0, 1, 0.2, BranchKind::Accept);
        let _f = tree.add_child(s1, state(&[2.0]), 1, 1, 0.3, BranchKind::Accept);
        let _r = tree.add_child(s1, state(&[0.0]), 1, 1, 0.4, BranchKind::Reject);

        modifier.compress_resolved_subchains(&mut tree);
        assert!(tree.contains(s0));
        assert!(tree.contains(s1));
    }

    #[test]
    fn the_height_cap_forces_the_collapse_of_a_childless_survivor() {
        // the survivor sits right at the bound, so waiting for it to sprout
        // would deadlock: the collapse must go ahead
        let modifier = TreeModifier::new(vec![2, -1], 3);
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        let s1 = tree.add_child(s0, state(&[2.0]), 0, 1, 0.2, BranchKind::Accept);
        let s2 = tree.add_child(s1, state(&[3.0]), 0, 2, 0.3, BranchKind::Accept);
        let f = tree.add_child(s2, state(&[3.0]), 1, 1, 0.4, BranchKind::Accept);

        modifier.compress_resolved_subchains(&mut tree);
        assert!(!tree.contains(s0));
        assert_eq!(&[f], tree[root].children());
    }
}
