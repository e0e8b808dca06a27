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

//! This module provides the job handler: a bounded pool of worker threads
//! that evaluate model log-posteriors for tree nodes, while the driver keeps
//! mutating the tree undisturbed. The only state shared across threads is
//! the handler's critical section (task queue plus completion buffer),
//! guarded by a mutex with two monitors: idle workers park on one, the
//! driver waits for completions on the other.
//!
//! Workers finish in whatever order the models let them, but the handler
//! hands results back in submission order (an in-order commit buffer over
//! out-of-order workers). The driver therefore observes one and the same
//! sequence of events for any pool size and any completion timing, which is
//! what makes a run reproducible from its seeds alone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::Scope;
use std::time::Duration;

use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};

use crate::{EvaluationError, Model, NodeId, State};

/// How often a worker retries a transient evaluation failure before giving
/// up and surfacing it.
const MAX_ATTEMPTS: usize = 4;
/// Backoff before the first retry; doubled on every further one.
const BACKOFF: Duration = Duration::from_millis(5);

/// One model evaluation on its way to a worker.
struct Task {
    seq: u64,
    node: NodeId,
    level: usize,
    state: State,
}

/// One delivered evaluation.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    /// The node the evaluation was submitted for. It may have been pruned
    /// while the job was in flight; deciding that is the caller's business.
    pub node: NodeId,
    /// The level the state was evaluated at.
    pub level: usize,
    /// The log-posterior, or the failure that survived the worker's retries.
    pub outcome: Result<f64, EvaluationError>,
}

/// The shared data that may only be manipulated within critical sections.
struct Critical {
    /// Submitted tasks waiting for a worker.
    queue: VecDeque<Task>,
    /// Completed tasks waiting for their turn in submission order.
    completed: FxHashMap<u64, FinishedJob>,
    /// Once set, workers exit as soon as the queue runs dry.
    shutdown: bool,
}

/// The state shared between the driver and the workers: the critical data
/// and the two monitors to park on.
struct Shared {
    critical: Mutex<Critical>,
    /// Workers park here when the queue is empty.
    work_available: Condvar,
    /// The driver parks here when it waits for a completion.
    completion: Condvar,
}

/// The driver-side handle on the worker pool.
pub struct JobHandler {
    shared: Arc<Shared>,
    capacity: usize,
    /// Sequence number of the next submission.
    next_seq: u64,
    /// Sequence number of the next delivery; everything below has been
    /// handed back to the driver already.
    next_commit: u64,
    /// Completed evaluations per level.
    num_evaluations: Vec<usize>,
}

impl JobHandler {
    /// Spawns `capacity` workers onto the given scope, each holding its own
    /// handles on the level models, and returns the driver-side handle.
    pub fn new<'scope, 'env>(
        scope: &'scope Scope<'scope, 'env>,
        models: Vec<Arc<dyn Model>>,
        capacity: usize,
        num_levels: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            critical: Mutex::new(Critical {
                queue: VecDeque::new(),
                completed: FxHashMap::default(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
            completion: Condvar::new(),
        });
        for _ in 0..capacity {
            let shared = Arc::clone(&shared);
            let models = models.clone();
            scope.spawn(move || worker_loop(&shared, &models));
        }
        JobHandler {
            shared,
            capacity,
            next_seq: 0,
            next_commit: 0,
            num_evaluations: vec![0; num_levels],
        }
    }

    /// True iff the pool can take one more evaluation. Completions that have
    /// not been delivered yet still count against the capacity, so that the
    /// driver's submission decisions depend on delivered results only.
    pub fn workers_available(&self) -> bool {
        self.in_flight() < self.capacity
    }

    /// The number of submitted evaluations not yet handed back.
    pub fn in_flight(&self) -> usize {
        (self.next_seq - self.next_commit) as usize
    }

    /// The number of completed evaluations per level.
    pub fn num_evaluations(&self) -> &[usize] {
        &self.num_evaluations
    }

    /// Enqueues an evaluation of the node's state at its level. Returns
    /// false (and does nothing) when no worker is available; a node must
    /// never be enqueued twice.
    pub fn submit_job(&mut self, node: NodeId, level: usize, state: State) -> bool {
        if !self.workers_available() {
            return false;
        }
        let task = Task { seq: self.next_seq, node, level, state };
        self.next_seq += 1;
        let mut critical = self.shared.critical.lock();
        critical.queue.push_back(task);
        self.shared.work_available.notify_one();
        true
    }

    /// Hands back every completion that is next in submission order, without
    /// blocking. May return empty.
    pub fn get_finished_jobs(&mut self) -> Vec<FinishedJob> {
        let mut delivered = vec![];
        while let Some(job) = self.take_finished_job() {
            delivered.push(job);
        }
        delivered
    }

    /// Hands back the oldest completion if it is in, without blocking.
    /// The driver consumes results one by one: together with the in-order
    /// delivery this pins the whole schedule down to the submission
    /// sequence.
    pub fn take_finished_job(&mut self) -> Option<FinishedJob> {
        let shared = Arc::clone(&self.shared);
        let mut critical = shared.critical.lock();
        self.pop_next(&mut critical)
    }

    /// Like [`Self::take_finished_job`], but parks the driver (up to the
    /// given timeout) until the oldest outstanding evaluation comes in.
    pub fn wait_for_finished_job(&mut self, timeout: Duration) -> Option<FinishedJob> {
        let shared = Arc::clone(&self.shared);
        let mut critical = shared.critical.lock();
        if self.next_commit < self.next_seq && !critical.completed.contains_key(&self.next_commit)
        {
            let _ = shared.completion.wait_for(&mut critical, timeout);
        }
        self.pop_next(&mut critical)
    }

    /// Waits out every in-flight evaluation and throws the results away
    /// (they still count as completed evaluations). Used on the abort path.
    pub fn drain(&mut self) {
        while self.in_flight() > 0 {
            let _ = self.wait_for_finished_job(Duration::from_millis(100));
        }
    }

    /// Tells the workers to exit once the queue runs dry. The pool's scope
    /// joins them afterwards.
    pub fn shutdown(&self) {
        let mut critical = self.shared.critical.lock();
        critical.shutdown = true;
        self.shared.work_available.notify_all();
    }

    fn pop_next(&mut self, critical: &mut Critical) -> Option<FinishedJob> {
        let job = critical.completed.remove(&self.next_commit)?;
        self.next_commit += 1;
        if job.outcome.is_ok() {
            self.num_evaluations[job.level] += 1;
        }
        Some(job)
    }
}

fn worker_loop(shared: &Shared, models: &[Arc<dyn Model>]) {
    loop {
        let task = {
            let mut critical = shared.critical.lock();
            loop {
                if let Some(task) = critical.queue.pop_front() {
                    break task;
                }
                if critical.shutdown {
                    return;
                }
                shared.work_available.wait(&mut critical);
            }
        };
        // the evaluation itself runs outside any lock
        let outcome = evaluate_with_retry(models[task.level].as_ref(), &task.state);
        let job = FinishedJob { node: task.node, level: task.level, outcome };
        let mut critical = shared.critical.lock();
        critical.completed.insert(task.seq, job);
        shared.completion.notify_all();
    }
}

fn evaluate_with_retry(model: &dyn Model, state: &[f64]) -> Result<f64, EvaluationError> {
    let mut backoff = BACKOFF;
    let mut attempt = 1;
    loop {
        match model.evaluate(state) {
            Err(EvaluationError::Transient(cause)) if attempt < MAX_ATTEMPTS => {
                log::debug!("transient evaluation failure (attempt {attempt}): {cause}");
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
