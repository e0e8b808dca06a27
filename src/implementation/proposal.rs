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

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::Proposal;

/// The stock proposal: a Gaussian random walk with a fixed, diagonal
/// covariance given as one step width (standard deviation) per component.
#[derive(Debug, Clone)]
pub struct GaussianRandomWalk {
    step_widths: Vec<f64>,
}

impl GaussianRandomWalk {
    /// Creates the kernel from one step width per state component.
    pub fn new(step_widths: Vec<f64>) -> Self {
        GaussianRandomWalk { step_widths }
    }
}

impl Proposal for GaussianRandomWalk {
    fn propose(&self, current: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        debug_assert_eq!(self.step_widths.len(), current.len());
        current
            .iter()
            .zip(self.step_widths.iter())
            .map(|(x, width)| {
                let noise: f64 = StandardNormal.sample(rng);
                x + width * noise
            })
            .collect()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
