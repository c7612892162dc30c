//! Summary metrics over a finished stats table.
//!
//! These are the "where did the time go" rankings printed after an
//! analysis: the most expensive functions and the most expensive commands,
//! each by total and by per-call cost.

use super::stats::StatsTable;
use crate::parser::FunctionKey;
use crate::utils::config::TOP_CALLERS_PER_COMMAND;
use log::debug;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Ranking order for the summary tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankBy {
    /// Accumulated time
    Total,
    /// Accumulated time divided by calls
    PerCall,
}

/// One row of the function ranking
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRow {
    pub key: FunctionKey,
    /// Self time as a share of the whole trace
    pub percent: f64,
    pub self_us: u64,
    pub calls: u64,
    pub per_call_us: u64,
    /// Statements executed directly by the function
    pub instructions: u64,
}

/// One row of the command ranking
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRow {
    pub cmd: String,
    pub percent: f64,
    pub total_us: u64,
    pub calls: u64,
    pub per_call_us: u64,
    /// Functions that executed the command most often, with their counts
    pub top_callers: Vec<(FunctionKey, u64)>,
}

/// Whole-run totals printed as the last summary line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    pub duration_us: u64,
    pub instructions: u64,
    pub functions: usize,
    pub skipped_lines: usize,
}

impl TraceSummary {
    /// Get human-readable summary
    ///
    /// **Public** - for logging and the final CLI line
    pub fn summary(&self) -> String {
        format!(
            "Script executed in {}us, {} instructions, {} functions, {} skipped lines.",
            group_digits(self.duration_us),
            self.instructions,
            self.functions,
            self.skipped_lines
        )
    }
}

/// Rank functions by self time
///
/// **Public** - feeds the function summary table
///
/// # Arguments
/// * `table` - Finished stats table
/// * `trace_us` - Trace duration, the base for percentages
/// * `top_n` - Number of rows to return
/// * `rank` - Total self time or self time per call
///
/// # Returns
/// Rows sorted by the requested cost (descending), ties by key
pub fn top_functions(
    table: &StatsTable,
    trace_us: u64,
    top_n: usize,
    rank: RankBy,
) -> Vec<FunctionRow> {
    debug!("Ranking top {} of {} functions", top_n, table.len());

    let mut rows: Vec<FunctionRow> = table
        .iter()
        .map(|(key, stats)| FunctionRow {
            key: key.clone(),
            percent: percent_of(stats.totals.tt, trace_us),
            self_us: stats.totals.tt,
            calls: stats.totals.nc,
            per_call_us: stats.totals.tt_per_call(),
            instructions: stats.instructions(),
        })
        .collect();

    rows.sort_by_key(|row| {
        let cost = match rank {
            RankBy::Total => row.self_us,
            RankBy::PerCall => row.per_call_us,
        };
        (Reverse(cost), row.key.clone())
    });
    rows.truncate(top_n);
    rows
}

/// Rank command texts by the time spent executing them
///
/// **Public** - feeds the command summary table
///
/// The same command text executed by several functions is merged into one
/// row; the functions that ran it most are listed as its top callers.
pub fn top_commands(
    table: &StatsTable,
    trace_us: u64,
    top_n: usize,
    rank: RankBy,
) -> Vec<CommandRow> {
    let mut merged: BTreeMap<&str, (u64, u64, Vec<(FunctionKey, u64)>)> = BTreeMap::new();
    for (key, stats) in table.iter() {
        for (cmd, command) in &stats.commands {
            let entry = merged.entry(cmd.as_str()).or_default();
            entry.0 += command.calls;
            entry.1 += command.total_us;
            entry.2.push((key.clone(), command.calls));
        }
    }
    debug!("Ranking top {} of {} commands", top_n, merged.len());

    let mut rows: Vec<CommandRow> = merged
        .into_iter()
        .map(|(cmd, (calls, total_us, mut callers))| {
            callers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            callers.truncate(TOP_CALLERS_PER_COMMAND);
            CommandRow {
                cmd: cmd.to_string(),
                percent: percent_of(total_us, trace_us),
                total_us,
                calls,
                per_call_us: if calls == 0 { 0 } else { total_us / calls },
                top_callers: callers,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        let (x, y) = match rank {
            RankBy::Total => (a.total_us, b.total_us),
            RankBy::PerCall => (a.per_call_us, b.per_call_us),
        };
        y.cmp(&x).then_with(|| a.cmd.cmp(&b.cmd))
    });
    rows.truncate(top_n);
    rows
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        (part as f64 / whole as f64) * 100.0
    } else {
        0.0
    }
}

/// Format an integer with `_` thousands separators
pub fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::stats::{CallStats, CommandStats, FunctionStats};

    fn table() -> StatsTable {
        let mut table = StatsTable::new();
        let mut a = FunctionStats {
            totals: CallStats::new(1, 1, 30, 100),
            ..Default::default()
        };
        a.commands.insert("sleep 1".into(), CommandStats { calls: 2, total_us: 20 });
        a.commands.insert("echo".into(), CommandStats { calls: 1, total_us: 10 });
        let mut b = FunctionStats {
            totals: CallStats::new(10, 10, 70, 70),
            ..Default::default()
        };
        b.commands.insert("echo".into(), CommandStats { calls: 10, total_us: 70 });
        table.functions.insert(FunctionKey::new("t.sh", 1, "a"), a);
        table.functions.insert(FunctionKey::new("t.sh", 5, "b"), b);
        table
    }

    #[test]
    fn test_top_functions_by_total_and_per_call() {
        let table = table();

        let total = top_functions(&table, 100, 20, RankBy::Total);
        assert_eq!(total[0].key.funcname, "b");
        assert_eq!(total[0].percent, 70.0);
        assert_eq!(total[0].instructions, 10);

        let per_call = top_functions(&table, 100, 20, RankBy::PerCall);
        assert_eq!(per_call[0].key.funcname, "a");
        assert_eq!(per_call[0].per_call_us, 30);

        assert_eq!(top_functions(&table, 100, 1, RankBy::Total).len(), 1);
    }

    #[test]
    fn test_top_commands_merge_callers() {
        let rows = top_commands(&table(), 100, 20, RankBy::Total);
        assert_eq!(rows[0].cmd, "echo");
        assert_eq!(rows[0].calls, 11);
        assert_eq!(rows[0].total_us, 80);
        assert_eq!(rows[0].top_callers[0], (FunctionKey::new("t.sh", 5, "b"), 10));
        assert_eq!(rows[0].top_callers.len(), 2);

        let per_call = top_commands(&table(), 100, 20, RankBy::PerCall);
        assert_eq!(per_call[0].cmd, "sleep 1");
        assert_eq!(per_call[0].per_call_us, 10);
    }

    #[test]
    fn test_zero_duration_percent() {
        let rows = top_functions(&table(), 0, 20, RankBy::Total);
        assert!(rows.iter().all(|r| r.percent == 0.0));
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits(0), "0");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1000), "1_000");
        assert_eq!(group_digits(1234567), "1_234_567");
    }

    #[test]
    fn test_summary_line() {
        let summary = TraceSummary {
            duration_us: 1500,
            instructions: 3,
            functions: 2,
            skipped_lines: 1,
        };
        assert_eq!(
            summary.summary(),
            "Script executed in 1_500us, 3 instructions, 2 functions, 1 skipped lines."
        );
    }
}
