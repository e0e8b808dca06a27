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

//! The logger bootstrap installs a process-wide logger, so it gets its own
//! test binary.

use mtmlda::{logging, LoggerSettings, WriteMode};

#[test]
fn the_logger_splits_run_and_debug_files() {
    let dir = tempfile::tempdir().unwrap();
    let run_path = dir.path().join("logs").join("run.log");
    let debug_path = dir.path().join("logs").join("debug.log");

    logging::init_logging(&LoggerSettings {
        do_printing: false,
        logfile_path: Some(run_path.clone()),
        debugfile_path: Some(debug_path.clone()),
        write_mode: WriteMode::Overwrite,
    })
    .unwrap();

    log::info!("chain underway");
    log::debug!("speculative tree below");
    log::logger().flush();

    let run = std::fs::read_to_string(&run_path).unwrap();
    let debug = std::fs::read_to_string(&debug_path).unwrap();
    assert!(run.contains("chain underway"));
    assert!(!run.contains("speculative tree below"));
    assert!(debug.contains("chain underway"));
    assert!(debug.contains("speculative tree below"));
}
