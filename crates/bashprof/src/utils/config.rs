//! Configuration and constants for the analyzer.

/// Current JSON profile schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Number of leading non-blank lines that must contain at least one valid
/// record before the declared trace mode is considered unrecognizable.
pub const RECOGNITION_WINDOW: usize = 16;

/// Default number of rows in each summary table
pub const DEFAULT_TOP_N: usize = 20;

/// Commands longer than this are trimmed with ".." in summary tables
pub const COMMAND_TRIM_WIDTH: usize = 50;

/// Number of calling functions listed per command in summary tables
pub const TOP_CALLERS_PER_COMMAND: usize = 3;

// EPOCHREALTIME has microsecond resolution; pstats wants float seconds.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Indentation unit of the record dump, repeated once per depth level
pub const DUMP_INDENT: &str = " >";

/// Placeholders the instrumentation prints for an empty
/// `BASH_SOURCE[0]` and `FUNCNAME[0]`
pub const EMPTY_SOURCE: &str = "<";
pub const EMPTY_FUNCNAME: &str = ">";

/// Name shown for the top-level script body in tables and graphs
pub const TOPLEVEL_LABEL: &str = "<top level>";
