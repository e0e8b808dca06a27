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

//! Logging support: the one-call bootstrap wiring the `log` macros to the
//! terminal and the run/debug files, the run-statistics line the driver
//! emits at its print interval, and the textual tree dump that goes to the
//! debug log.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Duration;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use thiserror::Error;

use crate::{LoggerSettings, MlTree, WriteMode};

/// A failed logger bootstrap.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not open a log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("a logger was already installed: {0}")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Installs the process-wide logger described by the settings: an optional
/// terminal sink, an info-level run log file and a debug-level file (tree
/// dumps land in the latter). May only succeed once per process.
pub fn init_logging(settings: &LoggerSettings) -> Result<(), LoggingError> {
    let config = ConfigBuilder::new()
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut sinks: Vec<Box<dyn SharedLogger>> = vec![];
    if settings.do_printing {
        sinks.push(TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    if let Some(path) = &settings.logfile_path {
        sinks.push(WriteLogger::new(
            LevelFilter::Info,
            config.clone(),
            open_log_file(path, settings.write_mode)?,
        ));
    }
    if let Some(path) = &settings.debugfile_path {
        sinks.push(WriteLogger::new(
            LevelFilter::Debug,
            config.clone(),
            open_log_file(path, settings.write_mode)?,
        ));
    }
    CombinedLogger::init(sinks)?;
    Ok(())
}

fn open_log_file(path: &Path, mode: WriteMode) -> Result<File, std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match mode {
        WriteMode::Overwrite => File::create(path),
        WriteMode::Append => OpenOptions::new().create(true).append(true).open(path),
    }
}

/// The run-statistics line the driver logs every print interval.
pub fn format_run_statistics(
    elapsed: Duration,
    num_samples: usize,
    accept_rates: &[f64],
    num_evaluations: &[usize],
) -> String {
    let rates = accept_rates
        .iter()
        .map(|r| format!("{r:.3}"))
        .collect::<Vec<_>>()
        .join(", ");
    let evals = num_evaluations
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "time {:8.2}s | samples {:>8} | accept rate [{}] | evaluations [{}]",
        elapsed.as_secs_f64(),
        num_samples,
        rates,
        evals
    )
}

/// Renders the tree as an indented listing, one node per line, children
/// below their parent. The walk is iterative, so arbitrarily deep trees
/// cannot blow the stack.
pub fn render_tree(tree: &MlTree) -> String {
    let mut out = String::new();
    let mut stack = vec![(tree.root(), 0usize)];
    while let Some((id, indent)) = stack.pop() {
        let Some(node) = tree.get(id) else { continue };
        let marker = match node.branch {
            crate::BranchKind::Accept => 'a',
            crate::BranchKind::Reject => 'r',
            crate::BranchKind::SubchainRoot => 's',
        };
        let logposterior = node
            .logposterior
            .map_or("?".to_string(), |lp| format!("{lp:.4}"));
        let probability = node
            .probability_reached
            .map_or("?".to_string(), |p| format!("{p:.3}"));
        out.push_str(&"  ".repeat(indent));
        out.push_str(&format!(
            "[{marker}] level {} | index {} | logposterior {} | reached {}{}\n",
            node.level,
            node.subchain_index,
            logposterior,
            probability,
            if node.pending { " | computing" } else { "" },
        ));
        // push in reverse so the first child is printed first
        for &child in node.children().iter().rev() {
            stack.push((child, indent + 1));
        }
    }
    out
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_logging {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::implementation::logging::{format_run_statistics, render_tree};
    use crate::{BranchKind, MlTree, State};

    fn state(values: &[f64]) -> State {
        Arc::from(values.to_vec().into_boxed_slice())
    }

    #[test]
    fn the_statistics_line_reads_naturally() {
        let line =
            format_run_statistics(Duration::from_millis(1500), 42, &[0.5214, 0.8], &[100, 7]);
        assert!(line.contains("1.50s"));
        assert!(line.contains("42"));
        assert!(line.contains("[0.521, 0.800]"));
        assert!(line.contains("[100, 7]"));
    }

    #[test]
    fn the_tree_dump_indents_children_under_parents() {
        let mut tree = MlTree::new(state(&[0.0]), 1, 0.5);
        let root = tree.root();
        tree.set_logposterior(root, -0.25);
        let s0 = tree.add_child(root, state(&[0.0]), 0, 0, 0.1, BranchKind::SubchainRoot);
        tree.get_mut(s0).unwrap().pending = true;

        let dump = render_tree(&tree);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(2, lines.len());
        assert!(lines[0].starts_with("[a] level 1"));
        assert!(lines[0].contains("-0.2500"));
        assert!(lines[1].starts_with("  [s] level 0"));
        assert!(lines[1].ends_with("computing"));
    }

    #[test]
    fn deep_trees_render_without_recursion() {
        let mut tree = MlTree::new(state(&[0.0]), 0, 0.5);
        let mut cursor = tree.root();
        for i in 1..20_000 {
            cursor = tree.add_child(cursor, state(&[0.0]), 0, i, 0.5, BranchKind::Accept);
        }
        let dump = render_tree(&tree);
        assert_eq!(20_000, dump.lines().count());
    }
}
