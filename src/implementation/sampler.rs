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

//! This module provides the sampler driver: the single thread that owns the
//! proposal tree and the growing chain, and that cycles through the four
//! phases of the multilevel delayed-acceptance loop — extend and submit,
//! harvest, decide, compress and advance — until the chain is long enough.
//! Model evaluations run on a scoped pool of workers; everything else is
//! driver-local.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use rand::Rng;

use crate::implementation::logging::{format_run_statistics, render_tree};
use crate::implementation::mcmc;
use crate::implementation::tree::search;
use crate::{
    AcceptRateEstimator, JobHandler, MlTree, Model, Proposal, Reason, RngSet,
    SamplerRunSettings, SamplerSetupSettings, SamplingOutcome, SettingsError, State, TreeModifier,
};

/// How long one harvest may park the driver before it re-checks the world.
const HARVEST_PATIENCE: Duration = Duration::from_millis(100);
/// After this many consecutive iterations without progress and without any
/// evaluation in flight, the driver gives up instead of spinning.
const STALL_LIMIT: usize = 1000;

/// The multilevel delayed-acceptance sampler.
///
/// A sampler owns the model hierarchy, the proposal kernel, the accept-rate
/// estimates and the random generator triple; [`Sampler::run`] produces one
/// chain per call, reusing (and advancing) all of them.
pub struct Sampler {
    setup: SamplerSetupSettings,
    models: Vec<Arc<dyn Model>>,
    proposal: Box<dyn Proposal>,
    estimator: AcceptRateEstimator,
    modifier: TreeModifier,
    rngs: RngSet,
}

impl Sampler {
    /// Assembles a sampler from its setup and its collaborators: one model
    /// per level (coarsest first), the proposal kernel, and the accept-rate
    /// estimator seeded with one guess per level.
    pub fn new(
        setup: SamplerSetupSettings,
        models: Vec<Arc<dyn Model>>,
        proposal: Box<dyn Proposal>,
        estimator: AcceptRateEstimator,
    ) -> Result<Self, SettingsError> {
        setup.validate(models.len(), estimator.num_levels())?;
        let modifier = TreeModifier::new(setup.subsampling_rates.clone(), setup.max_tree_height);
        let rngs = RngSet::from_seeds(setup.proposal_seed, setup.expansion_seed, setup.node_init_seed);
        Ok(Sampler { setup, models, proposal, estimator, modifier, rngs })
    }

    /// A snapshot of the three random generators, e.g. to persist next to a
    /// chain checkpoint.
    pub fn get_rngs(&self) -> RngSet {
        self.rngs.clone()
    }

    /// Replaces the three random generators, e.g. to resume from a
    /// persisted snapshot.
    pub fn set_rngs(&mut self, rngs: RngSet) {
        self.rngs = rngs;
    }

    /// Draws a chain of `num_samples` finest-level states.
    ///
    /// This never fails: on an unrecoverable evaluator error the accumulated
    /// part of the chain is returned, with the reason in the outcome.
    pub fn run(&mut self, run: &SamplerRunSettings) -> SamplingOutcome {
        let num_threads = if run.num_threads == 0 { num_cpus::get() } else { run.num_threads };
        let num_levels = self.setup.num_levels;
        let underflow_threshold = self.setup.underflow_threshold;
        let started = Instant::now();

        let root_state: State = run.initial_state.clone().into();
        let mut tree = MlTree::new(root_state, num_levels - 1, self.rngs.node_init.gen());
        let mut chain: Vec<State> = Vec::with_capacity(run.num_samples);
        let mut abort: Option<Reason> = None;

        info!(
            "starting run: {} samples over {} levels with {} workers",
            run.num_samples, num_levels, num_threads
        );

        std::thread::scope(|scope| {
            let mut jobs = JobHandler::new(scope, self.models.clone(), num_threads, num_levels);
            let mut iteration: u64 = 0;
            let mut idle_iterations = 0;
            let mut next_print = run.print_interval;

            while chain.len() < run.num_samples {
                iteration += 1;

                // 1. extend the tree and feed the pool, most promising first
                let mut submitted = 0;
                while jobs.workers_available() {
                    self.modifier.expand_tree(&mut tree, self.proposal.as_ref(), &mut self.rngs);
                    self.modifier.update_probability_reached(&mut tree, &self.estimator);
                    let Some(candidate) = search::find_max_probability_node(&tree) else {
                        break;
                    };
                    let (level, state) = {
                        let node = &tree[candidate];
                        (node.level, node.state.clone())
                    };
                    if !jobs.submit_job(candidate, level, state) {
                        break;
                    }
                    if let Some(node) = tree.get_mut(candidate) {
                        node.pending = true;
                    }
                    submitted += 1;
                }

                // 2. harvest the oldest delivery, one per cycle so that the
                // growth it triggers happens in a reproducible order; when
                // this iteration has nothing else to do, park on it instead
                // of spinning
                let finished = if submitted == 0 {
                    jobs.wait_for_finished_job(HARVEST_PATIENCE)
                } else {
                    jobs.take_finished_job()
                };
                let mut harvested = 0;
                if let Some(job) = finished {
                    harvested = 1;
                    match job.outcome {
                        Err(failure) => {
                            error!("evaluation failed for good: {failure}");
                            abort = Some(Reason::EvaluatorFailure(failure.to_string()));
                        }
                        Ok(_) if !tree.contains(job.node) => {
                            // the branch was pruned while the job was in flight
                        }
                        Ok(logposterior) if logposterior < underflow_threshold => {
                            debug!("discarding an underflowed candidate ({logposterior})");
                            tree.detach(job.node);
                        }
                        Ok(logposterior) => {
                            tree.set_logposterior(job.node, logposterior);
                            if let Some(node) = tree.get_mut(job.node) {
                                node.pending = false;
                            }
                            self.modifier.update_descendants(&mut tree, job.node);
                        }
                    }
                }
                if abort.is_some() {
                    break;
                }

                // 3. settle every decision the new posteriors unblocked;
                // each resolution may unblock others, so rescan until quiet
                let mut decided = 0;
                loop {
                    let ready = tree.level_order().into_iter().find_map(|id| {
                        search::available_decision(&tree, id).map(|kind| (id, kind))
                    });
                    let Some((id, kind)) = ready else { break };
                    let accepted = match kind {
                        search::Decision::SingleLevel => mcmc::single_level_decision(&tree, id),
                        search::Decision::TwoLevel => mcmc::two_level_decision(&tree, id),
                    };
                    self.estimator.update(tree[id].level, accepted);
                    self.modifier.discard_rejected_nodes(&mut tree, id, accepted);
                    decided += 1;
                }

                // 4. collapse what is settled and walk the root forward
                self.modifier.compress_resolved_subchains(&mut tree);
                let mut advanced = 0;
                while chain.len() < run.num_samples {
                    let Some(next) = search::get_unique_same_subchain_child(&tree) else {
                        break;
                    };
                    chain.push(tree[tree.root()].state.clone());
                    tree.promote_root(next);
                    advanced += 1;
                }

                if run.print_interval > 0 && chain.len() >= next_print {
                    info!(
                        "{}",
                        format_run_statistics(
                            started.elapsed(),
                            chain.len(),
                            self.estimator.rates(),
                            jobs.num_evaluations(),
                        )
                    );
                    while next_print <= chain.len() {
                        next_print += run.print_interval;
                    }
                }
                if run.tree_render_interval > 0 && iteration % run.tree_render_interval as u64 == 0
                {
                    debug!("tree after iteration {iteration}:\n{}", render_tree(&tree));
                }

                if submitted > 0 || harvested > 0 || decided > 0 || advanced > 0 {
                    idle_iterations = 0;
                } else if jobs.in_flight() == 0 {
                    idle_iterations += 1;
                    if idle_iterations > STALL_LIMIT {
                        error!("the sampler cannot make progress; giving up");
                        abort = Some(Reason::Stalled);
                        break;
                    }
                }
            }

            if abort.is_some() {
                // late results are unusable: wait them out and export the
                // tree for the post-mortem
                jobs.drain();
                debug!("tree at abort:\n{}", render_tree(&tree));
            }
            jobs.shutdown();

            let outcome = SamplingOutcome {
                is_complete: abort.is_none() && chain.len() == run.num_samples,
                abort,
                chain,
                num_evaluations: jobs.num_evaluations().to_vec(),
                accept_rates: self.estimator.rates().to_vec(),
            };
            info!(
                "run finished: {}",
                format_run_statistics(
                    started.elapsed(),
                    outcome.chain.len(),
                    &outcome.accept_rates,
                    &outcome.num_evaluations,
                )
            );
            outcome
        })
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
