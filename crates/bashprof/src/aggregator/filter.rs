//! Restriction of a call event stream to the subtrees of chosen functions.
//!
//! Every outermost call of a matching function becomes a top-level frame of
//! the filtered stream: its depth is shifted to 0 and its caller dropped.
//! Events outside every kept subtree are discarded, so the stats table, the
//! record dump and the call tree only describe the kept calls.

use super::stack_builder::CallEvent;
use crate::parser::FunctionKey;
use log::debug;
use regex::Regex;

/// Keeps the calls of functions whose name matches a pattern, and
/// everything they call
///
/// **Public** - optional stage between the reconstructor and the aggregator
#[derive(Debug)]
pub struct SubtreeFilter {
    pattern: Regex,
    /// Depth of the open kept subtree's root in the unfiltered stream
    base: Option<usize>,
    /// Open kept frames, with recursion judged inside the subtree only
    frames: Vec<(FunctionKey, bool)>,
    kept_subtrees: u64,
}

impl SubtreeFilter {
    /// Build a filter from a regex matched at the start of function names
    ///
    /// # Errors
    /// * `regex::Error` - the pattern is not a valid regex
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{})", pattern))?,
            base: None,
            frames: Vec::new(),
            kept_subtrees: 0,
        })
    }

    /// Number of subtrees kept so far
    pub fn kept_subtrees(&self) -> u64 {
        self.kept_subtrees
    }

    /// Rewrite one event, or drop it when it lies outside every kept subtree
    pub fn apply(&mut self, event: CallEvent) -> Option<CallEvent> {
        match event {
            CallEvent::Enter {
                depth,
                key,
                stamp_us,
                ..
            } => {
                let base = match self.base {
                    Some(base) => base,
                    None if self.pattern.is_match(&key.funcname) => {
                        self.kept_subtrees += 1;
                        debug!("Keeping the call of {} at {}us", key, stamp_us);
                        *self.base.insert(depth)
                    }
                    None => return None,
                };
                let reentry = self.frames.iter().any(|(open, _)| *open == key);
                self.frames.push((key.clone(), reentry));
                Some(CallEvent::Enter {
                    depth: depth - base,
                    key,
                    stamp_us,
                    is_recursive_reentry: reentry,
                })
            }
            CallEvent::Step(mut step) => {
                // Steps always belong to the top frame, which is kept
                step.depth -= self.base?;
                Some(CallEvent::Step(step))
            }
            CallEvent::Exit(mut exit) => {
                let base = self.base?;
                let (_, reentry) = self.frames.pop()?;
                exit.depth -= base;
                exit.is_recursive_reentry = reentry;
                if self.frames.is_empty() {
                    self.base = None;
                    exit.caller = None;
                }
                Some(CallEvent::Exit(exit))
            }
        }
    }
}
