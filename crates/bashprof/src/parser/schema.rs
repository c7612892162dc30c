//! Canonical record types shared by every stage of the pipeline.

use crate::utils::config::{EMPTY_FUNCNAME, EMPTY_SOURCE, TOPLEVEL_LABEL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identity of a function across a whole trace.
///
/// Ordering is (filename, lineno, funcname), which is also the order
/// every renderer emits functions in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub filename: String,
    pub lineno: i64,
    pub funcname: String,
}

impl FunctionKey {
    pub fn new(filename: impl Into<String>, lineno: i64, funcname: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            lineno,
            funcname: funcname.into(),
        }
    }

    /// True for the top-level script body, which has no function name
    pub fn is_toplevel(&self) -> bool {
        self.funcname.is_empty() || self.funcname == EMPTY_FUNCNAME
    }

    /// Function name for display, with the top-level body labelled
    pub fn display_name(&self) -> &str {
        if self.is_toplevel() {
            TOPLEVEL_LABEL
        } else {
            &self.funcname
        }
    }

    /// `file:line` with the empty-source placeholder spelled as `~`
    pub fn location(&self) -> String {
        let file = if self.filename.is_empty() || self.filename == EMPTY_SOURCE {
            "~"
        } else {
            &self.filename
        };
        format!("{}:{}", file, self.lineno)
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.filename, self.lineno, self.funcname)
    }
}

/// Wire format of the trace, selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// Accept both xtrace and debug-hook lines, decided per line
    #[default]
    Auto,
    /// `set -x` output with a timestamped `PS4`
    Xtrace,
    /// `trap DEBUG` output with `%q` quoted fields
    Debug,
    /// `trap DEBUG` output buffered in an array, flushed at exit
    Var,
}

impl TraceMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Xtrace => "xtrace",
            Self::Debug => "debug",
            Self::Var => "var",
        }
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TraceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "0" => Ok(Self::Auto),
            "xtrace" | "1" => Ok(Self::Xtrace),
            "debug" | "2" => Ok(Self::Debug),
            "var" | "3" => Ok(Self::Var),
            other => Err(format!(
                "unknown trace mode '{}' (expected auto, xtrace, debug, var or 1-3)",
                other
            )),
        }
    }
}

/// Mode-specific data carried by a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    /// Number of leading `+` characters (shell indirection level)
    Xtrace { indirection: usize },
    /// Debug-hook line; the command was `%q` quoted on the wire
    Hook,
}

/// One executed statement, as decoded from a trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// 1-based line number in the input
    pub idx: usize,
    /// `$EPOCHREALTIME` in microseconds
    pub stamp_us: u64,
    pub pid: u32,
    /// `${#BASH_SOURCE[@]}`; 0 is the top-level script body
    pub depth: usize,
    pub lineno: i64,
    pub source: String,
    pub funcname: String,
    pub cmd: String,
    pub payload: RecordPayload,
}

impl TraceRecord {
    /// Identity of the function this statement executes in
    pub fn function(&self) -> FunctionKey {
        FunctionKey::new(self.source.clone(), self.lineno, self.funcname.clone())
    }
}

/// Line accounting for one parse run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Input lines read (including blank and skipped ones)
    pub lines_read: usize,
    /// Records produced
    pub records: usize,
    /// Non-blank lines that did not match the grammar
    pub skipped_lines: usize,
    /// Records whose timestamp is earlier than the previous record's
    pub backwards_stamps: usize,
}
