//! Call-stack reconstruction from a flat record stream.
//!
//! Replays statement records against an explicit stack of frames indexed
//! by depth. A record one level deeper than the stack opens a frame, a
//! shallower record closes every frame above its depth, and a record at the
//! current depth is a statement of the top frame.
//!
//! Depths are measured from the level of the first record, so a script body
//! traced at `${#BASH_SOURCE[@]} == 1` and a `bash -c` body at level 0 both
//! form the bottom frame.
//!
//! Example, with the record stamps in microseconds:
//! ```text
//! depth 0  t=0   a        -> Enter a
//! depth 1  t=1   b        -> Step(a, 1us), Enter b
//! depth 0  t=3   a        -> Step(b, 2us), Exit b (self 2, total 2)
//! end      t=5            -> Exit a (self 3, total 5)
//! ```

use crate::parser::{FunctionKey, TraceRecord};
use crate::utils::error::TraceError;
use log::debug;

/// One active invocation on the reconstruction stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub key: FunctionKey,
    pub entry_us: u64,
    /// Total time of completed child frames
    pub child_us: u64,
    /// Another frame with the same key was active below this one at push time
    pub reentry: bool,
}

/// A completed frame, emitted once per pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameExit {
    pub callee: FunctionKey,
    /// `None` when the frame was called from the synthetic root
    pub caller: Option<FunctionKey>,
    pub depth: usize,
    pub entry_us: u64,
    pub exit_us: u64,
    pub self_us: u64,
    pub total_us: u64,
    pub is_recursive_reentry: bool,
}

impl FrameExit {
    pub fn child_us(&self) -> u64 {
        self.total_us - self.self_us
    }
}

/// A completed statement with its measured duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Input line of the statement's record
    pub idx: usize,
    pub depth: usize,
    /// Function of the frame that executed the statement
    pub function: FunctionKey,
    pub cmd: String,
    pub spent_us: u64,
}

/// Ordered output of the reconstructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Enter {
        depth: usize,
        key: FunctionKey,
        stamp_us: u64,
        is_recursive_reentry: bool,
    },
    Step(Step),
    Exit(FrameExit),
}

/// First and last timestamps of a trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSpan {
    pub start_us: u64,
    pub end_us: u64,
}

impl TraceSpan {
    pub fn duration_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }
}

/// Explicit call stack driven by trace records
///
/// **Public** - the reconstructor stage of the pipeline
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
    /// Last record; its duration is known once the next one arrives
    pending: Option<TraceRecord>,
    span: Option<TraceSpan>,
    /// Raw level of the first record
    base_level: Option<usize>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active frames
    pub fn height(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Replay one record, appending the events it completes to `out`
    ///
    /// The record's depth is rewritten relative to the first record's level.
    ///
    /// # Errors
    /// * `TraceError::MalformedTrace` - the record is more than one level
    ///   deeper than the current stack, or shallower than the first record
    pub fn feed(&mut self, mut record: TraceRecord, out: &mut Vec<CallEvent>) -> Result<(), TraceError> {
        let now = record.stamp_us;
        let base = *self.base_level.get_or_insert(record.depth);

        let Some(depth) = record.depth.checked_sub(base) else {
            return Err(TraceError::MalformedTrace {
                line: record.idx,
                reason: format!(
                    "level {} is below the trace's top level {}",
                    record.depth, base
                ),
            });
        };
        if depth > self.frames.len() {
            return Err(TraceError::MalformedTrace {
                line: record.idx,
                reason: format!(
                    "level jumped from {} to {}",
                    base + self.frames.len().saturating_sub(1),
                    record.depth
                ),
            });
        }
        record.depth = depth;

        if let Some(prev) = self.pending.take() {
            // Still on the stack: pops only happen below
            let function = self.frames[prev.depth].key.clone();
            out.push(CallEvent::Step(Step {
                idx: prev.idx,
                depth: prev.depth,
                function,
                cmd: prev.cmd,
                spent_us: now.saturating_sub(prev.stamp_us),
            }));
        }

        while self.frames.len() > depth + 1 {
            self.pop(now, out);
        }

        if self.frames.len() == depth {
            let key = record.function();
            let reentry = self.frames.iter().any(|frame| frame.key == key);
            out.push(CallEvent::Enter {
                depth,
                key: key.clone(),
                stamp_us: now,
                is_recursive_reentry: reentry,
            });
            self.frames.push(Frame {
                key,
                entry_us: now,
                child_us: 0,
                reentry,
            });
        }

        match &mut self.span {
            Some(span) => span.end_us = now,
            None => {
                self.span = Some(TraceSpan {
                    start_us: now,
                    end_us: now,
                })
            }
        }
        self.pending = Some(record);
        Ok(())
    }

    /// Flush every remaining frame at the last observed timestamp
    ///
    /// The last record only bounds the trace, its own statement has no
    /// measurable duration and is not emitted as a step.
    pub fn finish(&mut self, out: &mut Vec<CallEvent>) -> TraceSpan {
        let span = self.span.unwrap_or_default();
        if let Some(last) = self.pending.take() {
            debug!("Trace ends at line {} ({})", last.idx, last.cmd);
        }
        while !self.frames.is_empty() {
            self.pop(span.end_us, out);
        }
        span
    }

    fn pop(&mut self, now: u64, out: &mut Vec<CallEvent>) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let total_us = now.saturating_sub(frame.entry_us);
        let self_us = total_us.saturating_sub(frame.child_us);

        let caller = match self.frames.last_mut() {
            Some(parent) => {
                parent.child_us += total_us;
                Some(parent.key.clone())
            }
            None => None,
        };

        out.push(CallEvent::Exit(FrameExit {
            callee: frame.key,
            caller,
            depth: self.frames.len(),
            entry_us: frame.entry_us,
            exit_us: now,
            self_us,
            total_us,
            is_recursive_reentry: frame.reentry,
        }));
    }
}
