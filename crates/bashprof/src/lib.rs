//! bashprof library
//!
//! Compiles timestamped bash execution traces (`set -x` with a custom
//! `PS4`, or a `trap DEBUG` hook) into cProfile-compatible call statistics,
//! and renders them as pstats files, DOT call graphs, record dumps, JSON
//! profiles and text rankings.
//!
//! ```
//! use bashprof::aggregator::compile_trace;
//! use bashprof::parser::{FunctionKey, TraceMode, TraceReader};
//!
//! let trace = "\
//! + 0 1 0 1 main.sh > f
//! + 1 1 1 2 main.sh f echo hi
//! + 3 1 0 1 main.sh > exit
//! ";
//! let mut reader = TraceReader::new(trace.as_bytes(), TraceMode::Xtrace);
//! let compiled = compile_trace(&mut reader, |_| Ok(())).unwrap();
//! let f = compiled.table.get(&FunctionKey::new("main.sh", 2, "f")).unwrap();
//! assert_eq!((f.totals.nc, f.totals.ct), (1, 2));
//! ```

pub mod aggregator;
pub mod commands;
pub mod graph;
pub mod output;
pub mod parser;
pub mod utils;
