use crate::aggregator::stats::{CallStats, StatsTable};
use crate::commands::models::ShowArgs;
use crate::output::read_pstats;
use crate::utils::config::{MICROS_PER_SECOND, SCHEMA_VERSION};
use anyhow::{Context, Result};
use std::fmt::Write;

/// Print a pstats file
///
/// **Public** - the show command
pub fn show_pstats(args: &ShowArgs) -> Result<()> {
    let table = read_pstats(&args.file)
        .with_context(|| format!("Failed to read pstats file {}", args.file.display()))?;

    let text = if args.raw {
        format_raw_stats(&table)
    } else {
        format_stats_ranking(&table, args.limit)
    };
    print!("{}", text);
    Ok(())
}

/// Every entry and caller edge, in key order
pub fn format_raw_stats(table: &StatsTable) -> String {
    let mut out = String::new();
    for (key, stats) in table.iter() {
        let _ = writeln!(out, "{}  {}", key, raw_counts(&stats.totals));
        for (caller, edge) in &stats.callers {
            let _ = writeln!(out, " ^ {}  {}", caller, raw_counts(edge));
        }
    }
    out
}

fn raw_counts(stats: &CallStats) -> String {
    format!(
        "cc={} nc={} tt={:.6} ct={:.6}",
        stats.cc,
        stats.nc,
        stats.tt as f64 / MICROS_PER_SECOND,
        stats.ct as f64 / MICROS_PER_SECOND
    )
}

/// A `pstats`-style listing sorted by cumulative time
pub fn format_stats_ranking(table: &StatsTable, limit: Option<usize>) -> String {
    let total_calls: u64 = table.iter().map(|(_, s)| s.totals.nc).sum();
    let primitive_calls: u64 = table.iter().map(|(_, s)| s.totals.cc).sum();

    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by(|a, b| b.1.totals.ct.cmp(&a.1.totals.ct).then_with(|| a.0.cmp(b.0)));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    let secs = |us: u64| us as f64 / MICROS_PER_SECOND;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "         {} function calls ({} primitive calls)\n",
        total_calls, primitive_calls
    );
    let _ = writeln!(out, "   Ordered by: cumulative time\n");
    let _ = writeln!(
        out,
        "   ncalls  tottime  percall  cumtime  percall filename:lineno(function)"
    );
    for (key, stats) in entries {
        let totals = &stats.totals;
        let ncalls = if totals.nc == totals.cc {
            totals.nc.to_string()
        } else {
            format!("{}/{}", totals.nc, totals.cc)
        };
        let _ = writeln!(
            out,
            "{:>9} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {}",
            ncalls,
            secs(totals.tt),
            secs(totals.tt_per_call()),
            secs(totals.ct),
            secs(totals.ct_per_call()),
            key
        );
    }
    out
}

/// Display version information
pub fn display_version() {
    println!("bashprof v{}", env!("CARGO_PKG_VERSION"));
    println!("Profile Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Compiles timestamped bash execution traces into cProfile statistics.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::stats::FunctionStats;
    use crate::parser::FunctionKey;
    use pretty_assertions::assert_eq;

    fn table() -> StatsTable {
        let mut table = StatsTable::new();
        let a = FunctionKey::new("t.sh", 1, "A");
        table.functions.insert(
            a.clone(),
            FunctionStats {
                totals: CallStats::new(1, 2, 10_000_000, 10_000_000),
                ..Default::default()
            },
        );
        let mut b = FunctionStats {
            totals: CallStats::new(1, 1, 2_000_000, 2_000_000),
            ..Default::default()
        };
        b.callers.insert(a, CallStats::new(1, 1, 2_000_000, 2_000_000));
        table.functions.insert(FunctionKey::new("t.sh", 4, "B"), b);
        table
    }

    #[test]
    fn test_raw_listing() {
        assert_eq!(
            format_raw_stats(&table()),
            "\
t.sh:1(A)  cc=1 nc=2 tt=10.000000 ct=10.000000
t.sh:4(B)  cc=1 nc=1 tt=2.000000 ct=2.000000
 ^ t.sh:1(A)  cc=1 nc=1 tt=2.000000 ct=2.000000
"
        );
    }

    #[test]
    fn test_ranking_orders_by_cumulative_time() {
        let text = format_stats_ranking(&table(), None);
        assert!(text.contains("3 function calls (2 primitive calls)"));
        let a = text.find("t.sh:1(A)").unwrap();
        let b = text.find("t.sh:4(B)").unwrap();
        assert!(a < b);
        assert!(text.contains("      2/1"));

        let limited = format_stats_ranking(&table(), Some(1));
        assert!(!limited.contains("t.sh:4(B)"));
    }
}
