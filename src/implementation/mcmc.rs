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

//! The Metropolis decision kernel. Decisions are computed in log space
//! against the node's fixed uniform draw, so a decision is a pure function
//! of the tree: re-running it can never flip an outcome.

use crate::implementation::tree::search;
use crate::{MlTree, NodeId};

/// The plain Metropolis–Hastings decision at the ground level: accept the
/// candidate `id` iff its uniform draw falls under the posterior ratio
/// against the direct (same-level) predecessor.
///
/// Callers must have established readiness through
/// [`search::available_decision`]; both log-posteriors are then known.
pub fn single_level_decision(tree: &MlTree, id: NodeId) -> bool {
    let node = &tree[id];
    let parent = &tree[node.parent().expect("a decision candidate has a predecessor")];
    let lp_new = node.logposterior.expect("a ready candidate has its posterior");
    let lp_old = parent.logposterior.expect("a ready candidate has its predecessor's posterior");
    node.random_draw.ln() < lp_new - lp_old
}

/// The delayed-acceptance decision promoting a coarse-accepted candidate to
/// the next finer level: the fine-level posterior ratio is corrected by the
/// coarse-level ratio the candidate already passed, i.e. accept iff
///
/// ```plain
/// u < (pi_f(new) * pi_c(old)) / (pi_f(old) * pi_c(new))
/// ```
///
/// where the coarse values live on the subchain's last node (the candidate's
/// parent) and on the subchain's root.
///
/// Callers must have established readiness through
/// [`search::available_decision`]; all four log-posteriors are then known.
pub fn two_level_decision(tree: &MlTree, id: NodeId) -> bool {
    let node = &tree[id];
    let parent = &tree[node.parent().expect("a decision candidate has a predecessor")];
    let same_level = search::get_same_level_parent(tree, id)
        .expect("a promotion candidate has a same-level ancestor");
    let subchain_root = search::subchain_root_of(tree, same_level)
        .expect("a promotion candidate stems from a subchain");

    let fine_new = node.logposterior.expect("a ready candidate has its posterior");
    let fine_old = tree[same_level]
        .logposterior
        .expect("a ready candidate has the fine posterior of the current state");
    let coarse_new = parent
        .logposterior
        .expect("a ready candidate has the coarse posterior of its state");
    let coarse_old = tree[subchain_root]
        .logposterior
        .expect("a ready candidate has the coarse posterior of the current state");

    node.random_draw.ln() < (fine_new - fine_old) - (coarse_new - coarse_old)
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
