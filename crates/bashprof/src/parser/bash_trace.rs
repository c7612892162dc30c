//! Main trace parser for instrumented bash output.
//!
//! Decodes xtrace (`PS4`) and debug-hook lines into [`TraceRecord`]s.
//! Lines that do not match the declared grammar are counted and skipped;
//! only a trace whose first lines are all unparseable is rejected.

use super::schema::{ParseSummary, RecordPayload, TraceMode, TraceRecord};
use super::shell_words::{split_words, SplitError};
use crate::utils::config::RECOGNITION_WINDOW;
use crate::utils::error::TraceError;
use log::{debug, warn};
use std::io::BufRead;
use thiserror::Error;

/// Number of fixed fields before the command text
const FIXED_FIELDS: usize = 6;

/// Why a single line was not turned into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineRejection {
    #[error("blank line")]
    Blank,

    #[error("line does not start with a {0} marker")]
    Prefix(TraceMode),

    #[error("cannot split fields: {0}")]
    Split(#[from] SplitError),

    #[error("expected at least 6 fields, found {0}")]
    TooFewFields(usize),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Parse one trace line in the given mode
///
/// **Public** - the per-line grammar used by [`TraceReader`]
///
/// # Arguments
/// * `line` - Raw line, with or without its trailing newline
/// * `idx` - 1-based line number, stored in the record
/// * `mode` - Declared wire format
pub fn parse_line(line: &str, idx: usize, mode: TraceMode) -> Result<TraceRecord, LineRejection> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return Err(LineRejection::Blank);
    }

    match mode {
        TraceMode::Xtrace => parse_xtrace_line(line, idx),
        TraceMode::Debug | TraceMode::Var => parse_hook_line(line, idx, mode),
        TraceMode::Auto => {
            if line.starts_with('+') {
                parse_xtrace_line(line, idx)
            } else {
                parse_hook_line(line, idx, mode)
            }
        }
    }
}

/// `+ <stamp> <pid> <level> <lineno> <source> <funcname> <words...>`
fn parse_xtrace_line(line: &str, idx: usize) -> Result<TraceRecord, LineRejection> {
    let indirection = line.chars().take_while(|c| *c == '+').count();
    let rest = &line[indirection..];
    if indirection == 0 || !rest.starts_with(' ') {
        return Err(LineRejection::Prefix(TraceMode::Xtrace));
    }

    let words = split_words(rest)?;
    build_record(words, idx, RecordPayload::Xtrace { indirection })
}

/// `# <stamp> <pid> <level> <lineno> <source> <funcname> <command>`
fn parse_hook_line(line: &str, idx: usize, mode: TraceMode) -> Result<TraceRecord, LineRejection> {
    let Some(rest) = line.strip_prefix("# ") else {
        return Err(LineRejection::Prefix(mode));
    };

    let words = split_words(rest)?;
    build_record(words, idx, RecordPayload::Hook)
}

fn build_record(
    words: Vec<String>,
    idx: usize,
    payload: RecordPayload,
) -> Result<TraceRecord, LineRejection> {
    if words.len() < FIXED_FIELDS {
        return Err(LineRejection::TooFewFields(words.len()));
    }

    let mut words = words.into_iter();
    let mut next = || words.next().unwrap_or_default();

    let stamp_us = parse_field("stamp", &next())?;
    let pid = parse_field("pid", &next())?;
    let depth = parse_field("level", &next())?;
    let lineno = parse_field("lineno", &next())?;
    let source = next();
    let funcname = next();
    let cmd = words.collect::<Vec<_>>().join(" ");

    Ok(TraceRecord {
        idx,
        stamp_us,
        pid,
        depth,
        lineno,
        source,
        funcname,
        cmd,
        payload,
    })
}

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, LineRejection> {
    value.parse::<T>().map_err(|_| LineRejection::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Lazy, ordered sequence of records read from a trace stream
///
/// Yields `Err` at most once; after an error the iterator is exhausted.
///
/// # Example
/// ```
/// use bashprof::parser::{TraceMode, TraceReader};
///
/// let trace = "# 100 1 0 1 < > f\n# 150 1 1 1 ./a.sh f echo\n";
/// let mut reader = TraceReader::new(trace.as_bytes(), TraceMode::Debug);
/// let records: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
/// assert_eq!(records.len(), 2);
/// assert_eq!(reader.summary().skipped_lines, 0);
/// ```
pub struct TraceReader<R> {
    input: R,
    mode: TraceMode,
    line_limit: Option<usize>,
    summary: ParseSummary,
    buf: Vec<u8>,
    /// Non-blank lines seen before the first valid record
    unrecognized_lines: usize,
    recognized: bool,
    pinned_pid: Option<u32>,
    last_stamp: Option<u64>,
    done: bool,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(input: R, mode: TraceMode) -> Self {
        Self {
            input,
            mode,
            line_limit: None,
            summary: ParseSummary::default(),
            buf: Vec::new(),
            unrecognized_lines: 0,
            recognized: false,
            pinned_pid: None,
            last_stamp: None,
            done: false,
        }
    }

    /// Stop after reading this many input lines
    pub fn with_line_limit(mut self, limit: Option<usize>) -> Self {
        self.line_limit = limit.filter(|n| *n > 0);
        self
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Line accounting so far; complete once the iterator is exhausted
    pub fn summary(&self) -> ParseSummary {
        self.summary
    }

    fn unrecognized(&mut self) -> TraceError {
        self.done = true;
        TraceError::UnrecognizedFormat {
            mode: self.mode.to_string(),
            lines: self.unrecognized_lines,
        }
    }

    /// End of input: an input made only of unparseable lines is rejected
    fn finish(&mut self) -> Option<Result<TraceRecord, TraceError>> {
        self.done = true;
        if self.summary.skipped_lines > 0 {
            warn!(
                "Skipped {} of {} lines that are not valid {} records",
                self.summary.skipped_lines, self.summary.lines_read, self.mode
            );
        }
        if self.summary.backwards_stamps > 0 {
            warn!(
                "{} records have a timestamp earlier than their predecessor; \
                 their negative intervals count as zero",
                self.summary.backwards_stamps
            );
        }
        if !self.recognized && self.unrecognized_lines > 0 {
            return Some(Err(self.unrecognized()));
        }
        None
    }

    fn accept(&mut self, record: &TraceRecord) -> bool {
        if self.mode == TraceMode::Var {
            // Subshells cannot append to the buffering array
            match self.pinned_pid {
                None => self.pinned_pid = Some(record.pid),
                Some(pid) if pid != record.pid => return false,
                Some(_) => {}
            }
        }
        true
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self
                .line_limit
                .is_some_and(|limit| self.summary.lines_read >= limit)
            {
                return self.finish();
            }

            self.buf.clear();
            match self.input.read_until(b'\n', &mut self.buf) {
                Ok(0) => return self.finish(),
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            self.summary.lines_read += 1;
            let idx = self.summary.lines_read;
            let line = String::from_utf8_lossy(&self.buf).into_owned();

            let rejection = match parse_line(&line, idx, self.mode) {
                Ok(record) if self.accept(&record) => {
                    self.recognized = true;
                    self.summary.records += 1;
                    if self.last_stamp.is_some_and(|last| record.stamp_us < last) {
                        self.summary.backwards_stamps += 1;
                    }
                    self.last_stamp = Some(record.stamp_us);
                    return Some(Ok(record));
                }
                Ok(record) => format!("pid {} is not the traced shell", record.pid),
                Err(LineRejection::Blank) => continue,
                Err(e) => e.to_string(),
            };

            self.summary.skipped_lines += 1;
            debug!("Skipping line {}: {}", idx, rejection);

            if !self.recognized {
                self.unrecognized_lines += 1;
                if self.unrecognized_lines >= RECOGNITION_WINDOW {
                    return Some(Err(self.unrecognized()));
                }
            }
        }
    }
}
