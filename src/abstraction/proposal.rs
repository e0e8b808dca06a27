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

/// This trait abstracts away the proposal kernel: given the current state, it
/// draws a tentative next state for the ground-level chain.
///
/// # Note:
/// The Metropolis decisions implemented by this crate assume the kernel is
/// symmetric (the density of proposing `y` from `x` equals that of proposing
/// `x` from `y`), so no proposal ratio enters the acceptance probability.
pub trait Proposal {
    /// Draws a proposed state from the kernel centered at `current`, using
    /// the sampler-owned proposal generator.
    fn propose(&self, current: &[f64], rng: &mut dyn RngCore) -> Vec<f64>;
}
