//! Per-function and per-edge call statistics.
//!
//! The accumulation rules follow the cProfile stats model:
//! - `nc` counts every call, `cc` only primitive (non-reentrant) ones
//! - `tt` sums self time of every frame, recursive or not
//! - `ct` is charged once per outermost invocation of a function
//!
//! The same [`CallStats`] accumulator is used for a function's totals and
//! for each of its caller edges.

use super::stack_builder::{CallEvent, FrameExit};
use crate::parser::FunctionKey;
use crate::utils::error::TraceError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Primitive calls, total calls, self time and cumulative time
///
/// Times are in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub cc: u64,
    pub nc: u64,
    pub tt: u64,
    pub ct: u64,
}

impl CallStats {
    pub fn new(cc: u64, nc: u64, tt: u64, ct: u64) -> Self {
        Self { cc, nc, tt, ct }
    }

    /// Account one completed frame
    pub fn record(&mut self, exit: &FrameExit) {
        self.nc += 1;
        self.tt += exit.self_us;
        if !exit.is_recursive_reentry {
            self.cc += 1;
            self.ct += exit.total_us;
        }
    }

    pub fn merge(&mut self, other: &CallStats) {
        self.cc += other.cc;
        self.nc += other.nc;
        self.tt += other.tt;
        self.ct += other.ct;
    }

    /// Cumulative time per primitive call
    pub fn ct_per_call(&self) -> u64 {
        if self.cc == 0 {
            0
        } else {
            self.ct / self.cc
        }
    }

    /// Self time per call
    pub fn tt_per_call(&self) -> u64 {
        if self.nc == 0 {
            0
        } else {
            self.tt / self.nc
        }
    }
}

/// Calls and time of one command text inside a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStats {
    pub calls: u64,
    pub total_us: u64,
}

/// Everything known about one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStats {
    pub totals: CallStats,
    /// Keyed by caller
    pub callers: BTreeMap<FunctionKey, CallStats>,
    /// Statements executed directly by this function, keyed by command text
    pub commands: BTreeMap<String, CommandStats>,
}

impl FunctionStats {
    /// Calls received from the synthetic root (top-level frames)
    pub fn root_calls(&self) -> u64 {
        let attributed: u64 = self.callers.values().map(|c| c.nc).sum();
        self.totals.nc.saturating_sub(attributed)
    }

    /// Number of statements executed directly by this function
    pub fn instructions(&self) -> u64 {
        self.commands.values().map(|c| c.calls).sum()
    }
}

/// The final aggregate table, keyed and ordered by [`FunctionKey`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsTable {
    pub functions: BTreeMap<FunctionKey, FunctionStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&FunctionStats> {
        self.functions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FunctionKey, &FunctionStats)> {
        self.functions.iter()
    }

    /// Caller -> callees adjacency, both sides ordered by key
    pub fn callees(&self) -> BTreeMap<&FunctionKey, BTreeSet<&FunctionKey>> {
        let mut adjacency: BTreeMap<&FunctionKey, BTreeSet<&FunctionKey>> = BTreeMap::new();
        for (callee, stats) in &self.functions {
            for caller in stats.callers.keys() {
                adjacency.entry(caller).or_default().insert(callee);
            }
        }
        adjacency
    }

    /// Copy of the table without command details, i.e. what a stats file holds
    pub fn without_commands(&self) -> StatsTable {
        StatsTable {
            functions: self
                .functions
                .iter()
                .map(|(key, stats)| {
                    let stripped = FunctionStats {
                        totals: stats.totals,
                        callers: stats.callers.clone(),
                        commands: BTreeMap::new(),
                    };
                    (key.clone(), stripped)
                })
                .collect(),
        }
    }

    /// Human-readable descriptions of every broken table invariant
    ///
    /// An empty result means:
    /// - `nc >= cc` for every function and every caller edge
    /// - every caller key is itself a function of the table
    /// - no function has more calls attributed by callers than it received
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for (key, stats) in &self.functions {
            if stats.totals.nc < stats.totals.cc {
                violations.push(format!(
                    "{}: nc {} < cc {}",
                    key, stats.totals.nc, stats.totals.cc
                ));
            }
            let mut attributed = 0;
            for (caller, edge) in &stats.callers {
                if !self.functions.contains_key(caller) {
                    violations.push(format!("{}: unknown caller {}", key, caller));
                }
                if edge.nc < edge.cc {
                    violations.push(format!(
                        "{} <- {}: nc {} < cc {}",
                        key, caller, edge.nc, edge.cc
                    ));
                }
                attributed += edge.nc;
            }
            if attributed > stats.totals.nc {
                violations.push(format!(
                    "{}: callers attribute {} calls but only {} were received",
                    key, attributed, stats.totals.nc
                ));
            }
        }
        violations
    }
}

/// Streaming accumulator from call events to a [`StatsTable`]
///
/// **Public** - the aggregator stage of the pipeline
#[derive(Debug, Default)]
pub struct StatsAggregator {
    table: StatsTable,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the table
    ///
    /// `Enter` registers the function, `Step` accumulates command time and
    /// `Exit` applies the call accounting rules to the callee and its edge.
    ///
    /// # Errors
    /// * `TraceError::UnknownCaller` - an exit names a caller that never entered
    pub fn consume(&mut self, event: &CallEvent) -> Result<(), TraceError> {
        match event {
            CallEvent::Enter { key, .. } => {
                self.table.functions.entry(key.clone()).or_default();
            }
            CallEvent::Step(step) => {
                let command = self
                    .table
                    .functions
                    .entry(step.function.clone())
                    .or_default()
                    .commands
                    .entry(step.cmd.clone())
                    .or_default();
                command.calls += 1;
                command.total_us += step.spent_us;
            }
            CallEvent::Exit(exit) => self.record_exit(exit)?,
        }
        Ok(())
    }

    fn record_exit(&mut self, exit: &FrameExit) -> Result<(), TraceError> {
        if let Some(caller) = &exit.caller {
            if !self.table.functions.contains_key(caller) {
                return Err(TraceError::UnknownCaller {
                    caller: caller.to_string(),
                    callee: exit.callee.to_string(),
                });
            }
        }

        let stats = self.table.functions.entry(exit.callee.clone()).or_default();
        stats.totals.record(exit);
        if let Some(caller) = &exit.caller {
            stats.callers.entry(caller.clone()).or_default().record(exit);
        }
        Ok(())
    }

    /// Hand out the finished table
    ///
    /// # Errors
    /// * `TraceError::UnknownCaller` - a caller edge names a function that
    ///   is not in the table
    pub fn finish(self) -> Result<StatsTable, TraceError> {
        for (callee, stats) in &self.table.functions {
            if let Some(caller) = stats
                .callers
                .keys()
                .find(|caller| !self.table.functions.contains_key(*caller))
            {
                return Err(TraceError::UnknownCaller {
                    caller: caller.to_string(),
                    callee: callee.to_string(),
                });
            }
        }
        debug_assert!(
            self.table.invariant_violations().is_empty(),
            "{:?}",
            self.table.invariant_violations()
        );

        debug!("Aggregated {} functions", self.table.len());
        Ok(self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::stack_builder::tests::record;
    use crate::aggregator::stack_builder::CallStack;
    use crate::parser::TraceRecord;
    use pretty_assertions::assert_eq;

    fn aggregate(records: Vec<TraceRecord>) -> StatsTable {
        let mut stack = CallStack::new();
        let mut aggregator = StatsAggregator::new();
        let mut events = Vec::new();
        for r in records {
            stack.feed(r, &mut events).unwrap();
        }
        stack.finish(&mut events);
        for event in &events {
            aggregator.consume(event).unwrap();
        }
        aggregator.finish().unwrap()
    }

    fn key(name: &str) -> FunctionKey {
        FunctionKey::new("t.sh", 1, name)
    }

    #[test]
    fn test_no_recursion() {
        let table = aggregate(vec![
            record(1, 0, "A", 0),
            record(2, 1, "B", 1),
            record(3, 0, "A", 3),
            record(4, 0, "A", 5),
        ]);

        let a = table.get(&key("A")).unwrap();
        assert_eq!(a.totals, CallStats::new(1, 1, 3, 5));
        assert!(a.callers.is_empty());
        assert_eq!(a.root_calls(), 1);

        let b = table.get(&key("B")).unwrap();
        assert_eq!(b.totals, CallStats::new(1, 1, 2, 2));
        assert_eq!(b.callers[&key("A")], CallStats::new(1, 1, 2, 2));
        assert_eq!(b.root_calls(), 0);
    }

    #[test]
    fn test_direct_recursion() {
        let table = aggregate(vec![
            record(1, 0, "A", 0),
            record(2, 1, "A", 2),
            record(3, 0, "A", 6),
            record(4, 0, "A", 10),
        ]);

        let a = table.get(&key("A")).unwrap();
        assert_eq!(a.totals, CallStats::new(1, 2, 10, 10));
        // the reentrant edge counts the call and its self time only
        assert_eq!(a.callers[&key("A")], CallStats::new(0, 1, 4, 0));
        assert!(table.invariant_violations().is_empty());
    }

    #[test]
    fn test_indirect_recursion_charges_outermost_only() {
        // A -> B -> A
        let table = aggregate(vec![
            record(1, 0, "A", 0),
            record(2, 1, "B", 1),
            record(3, 2, "A", 2),
            record(4, 1, "B", 5),
            record(5, 0, "A", 6),
            record(6, 0, "A", 8),
        ]);

        let a = table.get(&key("A")).unwrap();
        assert_eq!(a.totals.nc, 2);
        assert_eq!(a.totals.cc, 1);
        assert_eq!(a.totals.ct, 8);
        // outer A: 1 + 2, inner A: 3
        assert_eq!(a.totals.tt, 6);

        let b = table.get(&key("B")).unwrap();
        assert_eq!(b.totals, CallStats::new(1, 1, 2, 5));
        assert_eq!(a.callers[&key("B")], CallStats::new(0, 1, 3, 0));
    }

    #[test]
    fn test_commands_accumulate_per_function() {
        let table = aggregate(vec![
            record(1, 0, "A", 0),
            record(2, 0, "A", 4),
            record(3, 0, "A", 5),
        ]);
        let a = table.get(&key("A")).unwrap();
        assert_eq!(a.instructions(), 2);
        assert_eq!(a.commands["cmd1"], CommandStats { calls: 1, total_us: 4 });
        assert_eq!(a.commands["cmd2"], CommandStats { calls: 1, total_us: 1 });
        assert!(table.without_commands().get(&key("A")).unwrap().commands.is_empty());
    }

    #[test]
    fn test_unknown_caller_is_rejected() {
        let mut aggregator = StatsAggregator::new();
        let exit = FrameExit {
            callee: key("B"),
            caller: Some(key("ghost")),
            depth: 1,
            entry_us: 0,
            exit_us: 1,
            self_us: 1,
            total_us: 1,
            is_recursive_reentry: false,
        };
        let err = aggregator.consume(&CallEvent::Exit(exit)).unwrap_err();
        assert!(matches!(err, TraceError::UnknownCaller { .. }));
    }

    #[test]
    fn test_callees_adjacency() {
        let table = aggregate(vec![
            record(1, 0, "A", 0),
            record(2, 1, "B", 1),
            record(3, 2, "C", 2),
            record(4, 0, "A", 3),
        ]);
        let callees = table.callees();
        assert_eq!(callees[&key("A")].iter().collect::<Vec<_>>(), vec![&&key("B")]);
        assert_eq!(callees[&key("B")].iter().collect::<Vec<_>>(), vec![&&key("C")]);
        assert!(!callees.contains_key(&key("C")));
    }

    #[test]
    fn test_merge_and_per_call() {
        let mut stats = CallStats::new(1, 2, 10, 30);
        stats.merge(&CallStats::new(1, 1, 2, 10));
        assert_eq!(stats, CallStats::new(2, 3, 12, 40));
        assert_eq!(stats.ct_per_call(), 20);
        assert_eq!(stats.tt_per_call(), 4);
        assert_eq!(CallStats::default().ct_per_call(), 0);
    }
}
