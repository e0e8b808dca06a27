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

//! The settings structures a sampler is configured with. They are plain serde
//! values so that a surrounding application can keep them in JSON files next
//! to its chain checkpoints.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An invalid sampler configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("a sampler needs at least one level, got {0}")]
    NoLevels(usize),
    #[error("expected one model per level ({expected}), got {got}")]
    WrongNumberOfModels { expected: usize, got: usize },
    #[error("expected one subsampling rate per level ({expected}), got {got}")]
    WrongNumberOfRates { expected: usize, got: usize },
    #[error("subsampling rate of coarse level {level} must be >= 1, got {rate}")]
    InvalidRate { level: usize, rate: i64 },
    #[error("expected one accept-rate guess per level ({expected}), got {got}")]
    WrongNumberOfGuesses { expected: usize, got: usize },
    #[error("the tree height bound must be at least 1")]
    NoHeadroom,
}

/// Everything that shapes a sampler once and for all: the level hierarchy,
/// the speculation bounds, and the seeds of the three random streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSetupSettings {
    /// Number of levels in the model hierarchy; level 0 is the coarsest.
    pub num_levels: usize,
    /// Length of the subchain run at each level to generate one proposal for
    /// the level above. The entry of the finest level is conventionally `-1`
    /// (the finest chain is the output chain, it has no bound).
    pub subsampling_rates: Vec<i64>,
    /// Cap on the height of the speculative tree. Expansion pauses when it
    /// would exceed this and resumes once pruning or compression makes room.
    pub max_tree_height: usize,
    /// A harvested log-posterior below this value discards its node outright
    /// instead of entering a Metropolis decision.
    pub underflow_threshold: f64,
    /// Seed of the proposal-noise generator.
    pub proposal_seed: u64,
    /// Seed of the tree-expansion generator.
    pub expansion_seed: u64,
    /// Seed of the generator handing each node its acceptance draw.
    pub node_init_seed: u64,
}

/// Everything that shapes one particular run of a configured sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerRunSettings {
    /// The number of finest-level samples to accumulate.
    pub num_samples: usize,
    /// The state the chain starts from.
    pub initial_state: Vec<f64>,
    /// Size of the worker pool evaluating models; 0 means one worker per
    /// hardware thread.
    pub num_threads: usize,
    /// Log a run-statistics line every so many samples (0 disables).
    pub print_interval: usize,
    /// Dump the tree to the debug log every so many driver iterations
    /// (0 disables).
    pub tree_render_interval: usize,
}

/// Where the run log and the debug log go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Mirror the run log onto the terminal?
    pub do_printing: bool,
    /// Path of the run log file, if any.
    pub logfile_path: Option<PathBuf>,
    /// Path of the debug log file (tree dumps land here), if any.
    pub debugfile_path: Option<PathBuf>,
    /// Whether log files are truncated or appended to.
    pub write_mode: WriteMode,
}

/// File write mode of the log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Start the file afresh (`"w"`).
    #[serde(rename = "w")]
    Overwrite,
    /// Keep what is there and append (`"a"`).
    #[serde(rename = "a")]
    Append,
}

impl SamplerSetupSettings {
    /// Checks the internal consistency of the setup, given the number of
    /// models and of accept-rate guesses it will be paired with.
    pub fn validate(&self, num_models: usize, num_guesses: usize) -> Result<(), SettingsError> {
        if self.num_levels == 0 {
            return Err(SettingsError::NoLevels(self.num_levels));
        }
        if num_models != self.num_levels {
            return Err(SettingsError::WrongNumberOfModels {
                expected: self.num_levels,
                got: num_models,
            });
        }
        if self.subsampling_rates.len() != self.num_levels {
            return Err(SettingsError::WrongNumberOfRates {
                expected: self.num_levels,
                got: self.subsampling_rates.len(),
            });
        }
        for (level, &rate) in self.subsampling_rates.iter().enumerate() {
            // the finest entry is unconstrained (conventionally -1)
            if level + 1 < self.num_levels && rate < 1 {
                return Err(SettingsError::InvalidRate { level, rate });
            }
        }
        if num_guesses != self.num_levels {
            return Err(SettingsError::WrongNumberOfGuesses {
                expected: self.num_levels,
                got: num_guesses,
            });
        }
        if self.max_tree_height == 0 {
            return Err(SettingsError::NoHeadroom);
        }
        Ok(())
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
