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

use thiserror::Error;

/// An error reported by a model evaluation.
///
/// The distinction matters to the scheduler: a transient failure is retried
/// with backoff by the worker that hit it, a fatal failure (or a transient
/// one that exhausted its retries) aborts the run after the in-flight
/// evaluations have been drained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    /// The evaluator hiccupped (network timeout, busy backend, ...) and the
    /// same call may well succeed if tried again.
    #[error("transient model evaluation failure: {0}")]
    Transient(String),
    /// The evaluator is broken for good; retrying is pointless.
    #[error("fatal model evaluation failure: {0}")]
    Fatal(String),
}

/// This trait abstracts away the evaluator of the (unnormalized) log-posterior
/// density at one level of the model hierarchy. A sampler is handed one
/// implementor per level, index 0 being the coarsest and the last the finest.
///
/// Implementors may be network-backed clients; calls are synchronous from the
/// point of view of the worker executing them, and several workers may call
/// the same model concurrently, so implementors must tolerate parallel calls.
pub trait Model: Send + Sync {
    /// Evaluates the log-posterior density at the given state.
    fn evaluate(&self, state: &[f64]) -> Result<f64, EvaluationError>;
}

/// Any infallible function of the state is a model. This is the convenient
/// form for analytic densities and for tests.
impl<F> Model for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, state: &[f64]) -> Result<f64, EvaluationError> {
        Ok(self(state))
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_model {
    use crate::{EvaluationError, Model};

    #[test]
    fn closures_are_models() {
        let model = |x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>();
        assert_eq!(Ok(-0.5), model.evaluate(&[1.0]));
        assert_eq!(Ok(-2.5), model.evaluate(&[1.0, 2.0]));
    }

    #[test]
    fn errors_format_their_cause() {
        let transient = EvaluationError::Transient("timeout".to_string());
        let fatal = EvaluationError::Fatal("server gone".to_string());
        assert_eq!(
            "transient model evaluation failure: timeout",
            transient.to_string()
        );
        assert_eq!("fatal model evaluation failure: server gone", fatal.to_string());
    }
}
