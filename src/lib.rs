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

//! # MTMLDA
//! MTMLDA is a multilevel delayed-acceptance MCMC sampler with asynchronous,
//! prefetching tree exploration. It draws a chain from a target posterior
//! whose expensive likelihood is approximated by a hierarchy of increasingly
//! coarse surrogates: a proposal must pass a Metropolis test against the
//! coarse model before the fine model is consulted, and most fine
//! evaluations are thereby avoided.
//!
//! What makes this sampler *multithreaded* is speculation: the accept/reject
//! outcomes that have not been decided yet span a tree of tentative future
//! states, and a bounded pool of workers evaluates the most promising of
//! those states ahead of time. The expensive model calls thus overlap, while
//! every Metropolis decision stays an exact, sequential one — the produced
//! chain is a deterministic function of the seeds, whatever the pool size.
//!
//! ## Quick Example
//! The following runs a two-level sampler on a standard normal target where
//! both levels happen to be the same analytic density. In a real setting
//! the coarse level would be a cheap surrogate and the fine level a client
//! to some expensive simulation.
//! ```
//! use std::sync::Arc;
//! use mtmlda::*;
//!
//! // 1. One log-posterior per level, coarsest first. Plain closures do.
//! let coarse: Arc<dyn Model> =
//!     Arc::new(|x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>());
//! let fine: Arc<dyn Model> =
//!     Arc::new(|x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>());
//!
//! // 2. Describe the hierarchy: subchains of length 3 at the coarse level,
//! //    the finest level is the output chain itself.
//! let setup = SamplerSetupSettings {
//!     num_levels: 2,
//!     subsampling_rates: vec![3, -1],
//!     max_tree_height: 8,
//!     underflow_threshold: -1000.0,
//!     proposal_seed: 0,
//!     expansion_seed: 1,
//!     node_init_seed: 2,
//! };
//!
//! // 3. Assemble the sampler with its proposal kernel and the initial
//! //    guesses for the per-level accept rates.
//! let mut sampler = Sampler::new(
//!     setup,
//!     vec![coarse, fine],
//!     Box::new(GaussianRandomWalk::new(vec![1.0])),
//!     AcceptRateEstimator::new(vec![0.5, 0.7], 0.01),
//! ).unwrap();
//!
//! // 4. Draw a chain.
//! let outcome = sampler.run(&SamplerRunSettings {
//!     num_samples: 50,
//!     initial_state: vec![0.0],
//!     num_threads: 2,
//!     print_interval: 0,
//!     tree_render_interval: 0,
//! });
//!
//! assert!(outcome.is_complete);
//! assert_eq!(50, outcome.chain.len());
//! ```

mod abstraction;
mod common;
mod implementation;
mod settings;

pub use abstraction::*;
pub use common::*;
pub use implementation::*;
pub use settings::*;
