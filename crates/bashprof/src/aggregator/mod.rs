//! Compilation of trace records into call statistics.
//!
//! This module transforms parsed trace records into:
//! - Call events (enter / statement step / exit) via an explicit call stack
//! - Optionally, only the subtrees of the calls of chosen functions
//! - The per-function and per-caller stats table
//! - Summary rankings of expensive functions and commands

pub mod filter;
pub mod metrics;
pub mod stack_builder;
pub mod stats;

// Re-export main types and functions
pub use filter::SubtreeFilter;
pub use metrics::{group_digits, top_commands, top_functions, RankBy, TraceSummary};
pub use stack_builder::{CallEvent, CallStack, FrameExit, Step, TraceSpan};
pub use stats::{CallStats, CommandStats, FunctionStats, StatsAggregator, StatsTable};

use crate::parser::{ParseSummary, TraceReader, TraceRecord};
use crate::utils::error::TraceError;
use log::debug;
use std::io::BufRead;

/// Result of one complete compilation run
#[derive(Debug, Clone)]
pub struct CompiledTrace {
    pub table: StatsTable,
    pub span: TraceSpan,
    pub parse: ParseSummary,
}

impl CompiledTrace {
    /// Whole-run totals
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            duration_us: self.span.duration_us(),
            instructions: self.table.iter().map(|(_, s)| s.instructions()).sum(),
            functions: self.table.len(),
            skipped_lines: self.parse.skipped_lines,
        }
    }
}

/// Run records through the call stack and the aggregator
///
/// **Public** - the reconstructor and aggregator stages in one pass
///
/// # Arguments
/// * `records` - Ordered records, as produced by the parser
/// * `observer` - Called with every call event before it is aggregated
///
/// # Returns
/// The finished table and the time span covered by the records
///
/// # Errors
/// The first parse, structural or observer error; no table is returned
/// for a failed run.
pub fn compile_records<I, F>(records: I, observer: F) -> Result<(StatsTable, TraceSpan), TraceError>
where
    I: IntoIterator<Item = Result<TraceRecord, TraceError>>,
    F: FnMut(&CallEvent) -> Result<(), TraceError>,
{
    compile_records_with(records, None, observer)
}

/// [`compile_records`], keeping only the events a [`SubtreeFilter`] lets
/// through
///
/// The observer and the aggregator both see the filtered stream; the span
/// still covers the whole trace.
pub fn compile_records_with<I, F>(
    records: I,
    mut filter: Option<SubtreeFilter>,
    mut observer: F,
) -> Result<(StatsTable, TraceSpan), TraceError>
where
    I: IntoIterator<Item = Result<TraceRecord, TraceError>>,
    F: FnMut(&CallEvent) -> Result<(), TraceError>,
{
    let mut stack = CallStack::new();
    let mut aggregator = StatsAggregator::new();
    let mut events = Vec::new();

    let mut drain = |events: &mut Vec<CallEvent>| -> Result<(), TraceError> {
        for event in events.drain(..) {
            let event = match filter.as_mut() {
                Some(filter) => match filter.apply(event) {
                    Some(kept) => kept,
                    None => continue,
                },
                None => event,
            };
            observer(&event)?;
            aggregator.consume(&event)?;
        }
        Ok(())
    };

    for record in records {
        stack.feed(record?, &mut events)?;
        drain(&mut events)?;
    }
    let span = stack.finish(&mut events);
    drain(&mut events)?;

    Ok((aggregator.finish()?, span))
}

/// Compile everything a reader yields
///
/// **Public** - main entry point of the compiler
pub fn compile_trace<R, F>(reader: &mut TraceReader<R>, observer: F) -> Result<CompiledTrace, TraceError>
where
    R: BufRead,
    F: FnMut(&CallEvent) -> Result<(), TraceError>,
{
    compile_trace_with(reader, None, observer)
}

/// [`compile_trace`] restricted by an optional [`SubtreeFilter`]
pub fn compile_trace_with<R, F>(
    reader: &mut TraceReader<R>,
    filter: Option<SubtreeFilter>,
    observer: F,
) -> Result<CompiledTrace, TraceError>
where
    R: BufRead,
    F: FnMut(&CallEvent) -> Result<(), TraceError>,
{
    let (table, span) = compile_records_with(reader.by_ref(), filter, observer)?;
    let parse = reader.summary();
    debug!(
        "Compiled {} records into {} functions over {}us",
        parse.records,
        table.len(),
        span.duration_us()
    );
    Ok(CompiledTrace { table, span, parse })
}
