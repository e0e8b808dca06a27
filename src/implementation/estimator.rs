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

/// A per-level running estimate of the Metropolis accept rate, updated by
/// exponential smoothing. The estimates are what turns the speculative tree
/// into a priority order: the more likely a branch is to be walked, the
/// earlier its nodes deserve a worker.
#[derive(Debug, Clone)]
pub struct AcceptRateEstimator {
    rates: Vec<f64>,
    update_parameter: f64,
}

impl AcceptRateEstimator {
    /// Creates an estimator from one initial guess per level and the
    /// smoothing parameter. Guesses are clamped into `[0, 1]`, the parameter
    /// into `(0, 1]`.
    pub fn new(initial_guesses: Vec<f64>, update_parameter: f64) -> Self {
        AcceptRateEstimator {
            rates: initial_guesses.iter().map(|g| g.clamp(0.0, 1.0)).collect(),
            update_parameter: update_parameter.clamp(f64::EPSILON, 1.0),
        }
    }

    /// The number of levels this estimator tracks.
    pub fn num_levels(&self) -> usize {
        self.rates.len()
    }

    /// The current estimate for the given level.
    pub fn rate(&self, level: usize) -> f64 {
        self.rates[level]
    }

    /// All current estimates, coarsest level first.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Folds the outcome of one decision at `level` into the estimate.
    pub fn update(&mut self, level: usize, accepted: bool) {
        let observation = if accepted { 1.0 } else { 0.0 };
        let eta = self.update_parameter;
        self.rates[level] = (1.0 - eta) * self.rates[level] + eta * observation;
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
