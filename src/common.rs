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

//! This module defines the most basic data types that are used throughout all
//! the code of our library (both at the abstraction and implementation levels).
//! These are also the types your client code is likely to work with.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// --- STATE ------------------------------------------------------------------
// ----------------------------------------------------------------------------
/// A point in parameter space: the real-valued vector a posterior density is
/// evaluated at. States are shared (rejected moves and nested subchains repeat
/// the state of an earlier node), hence the `Arc`.
pub type State = Arc<[f64]>;

// ----------------------------------------------------------------------------
// --- RNG TRIPLE -------------------------------------------------------------
// ----------------------------------------------------------------------------
/// The three independent random number generators owned by a sampler:
/// one feeding the proposal noise, one driving the order in which the tree
/// is speculatively expanded, and one handing each new tree node its
/// uniform acceptance draw.
///
/// The triple is a plain value: cloning it yields a snapshot, and feeding a
/// snapshot back into a sampler resumes the exact random streams. This is
/// what makes interrupted runs resumable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngSet {
    /// Noise source of the random-walk proposal.
    pub proposal: ChaCha20Rng,
    /// Drives the (randomized) tree expansion order.
    pub expansion: ChaCha20Rng,
    /// Hands every created node its uniform `random_draw`.
    pub node_init: ChaCha20Rng,
}

impl RngSet {
    /// Creates the triple from three seeds, one generator each.
    pub fn from_seeds(proposal: u64, expansion: u64, node_init: u64) -> Self {
        RngSet {
            proposal: ChaCha20Rng::seed_from_u64(proposal),
            expansion: ChaCha20Rng::seed_from_u64(expansion),
            node_init: ChaCha20Rng::seed_from_u64(node_init),
        }
    }
}

// ----------------------------------------------------------------------------
// --- RESULTS ----------------------------------------------------------------
// ----------------------------------------------------------------------------
/// A reason explaining why a run ended before the requested number of samples
/// was reached.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Reason {
    /// A model evaluation failed for good (after the worker exhausted its
    /// retries); the run returned whatever chain had accumulated.
    EvaluatorFailure(String),
    /// The driver observed that it could neither schedule work nor make any
    /// other progress for a long stretch. This is a bug guard, not a state a
    /// well-formed configuration can reach.
    Stalled,
}

/// The outcome of a sampling run.
///
/// A run never fails with an error: whatever part of the chain accumulated
/// before an abort is handed back here, along with the reason for the abort.
#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    /// The accumulated chain of accepted finest-level states, in order.
    pub chain: Vec<State>,
    /// True iff the chain reached the requested length.
    pub is_complete: bool,
    /// If the run was cut short, why.
    pub abort: Option<Reason>,
    /// How many model evaluations completed, per level.
    pub num_evaluations: Vec<usize>,
    /// The accept-rate estimates per level at the end of the run.
    pub accept_rates: Vec<f64>,
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_rngset {
    use rand::RngCore;

    use crate::RngSet;

    #[test]
    fn same_seeds_same_streams() {
        let mut a = RngSet::from_seeds(1, 2, 3);
        let mut b = RngSet::from_seeds(1, 2, 3);
        assert_eq!(a.proposal.next_u64(), b.proposal.next_u64());
        assert_eq!(a.expansion.next_u64(), b.expansion.next_u64());
        assert_eq!(a.node_init.next_u64(), b.node_init.next_u64());
    }

    #[test]
    fn generators_are_independent() {
        let a = RngSet::from_seeds(1, 2, 3);
        assert_ne!(a.proposal, a.expansion);
        assert_ne!(a.expansion, a.node_init);
    }

    #[test]
    fn snapshot_roundtrips_through_serde() {
        let mut a = RngSet::from_seeds(4, 5, 6);
        a.proposal.next_u64();
        a.node_init.next_u64();

        let json = serde_json::to_string(&a).unwrap();
        let b: RngSet = serde_json::from_str(&json).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut a = RngSet::from_seeds(7, 8, 9);
        let mut snap = a.clone();
        assert_eq!(a.proposal.next_u64(), snap.proposal.next_u64());
    }
}
