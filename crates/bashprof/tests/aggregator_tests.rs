use bashprof::aggregator::{compile_records, compile_trace, CallStats, StatsTable, TraceSpan};
use bashprof::parser::{FunctionKey, RecordPayload, TraceMode, TraceReader, TraceRecord};
use bashprof::utils::error::TraceError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn compile_text(trace: &str) -> Result<StatsTable, TraceError> {
    let mut reader = TraceReader::new(trace.as_bytes(), TraceMode::Xtrace);
    compile_trace(&mut reader, |_| Ok(())).map(|compiled| compiled.table)
}

fn key(lineno: i64, name: &str) -> FunctionKey {
    FunctionKey::new("t.sh", lineno, name)
}

#[test]
fn test_scenario_no_recursion() {
    let table = compile_text(
        "\
+ 0 1 0 10 t.sh A a1
+ 1 1 1 20 t.sh B b1
+ 3 1 0 11 t.sh A a2
+ 5 1 0 12 t.sh A end
",
    )
    .unwrap();

    let a = table.get(&key(10, "A")).unwrap();
    assert_eq!(a.totals, CallStats::new(1, 1, 3, 5));
    assert!(a.callers.is_empty());

    let b = table.get(&key(20, "B")).unwrap();
    assert_eq!(b.totals, CallStats::new(1, 1, 2, 2));
    assert_eq!(b.callers.len(), 1);
    assert_eq!(b.callers[&key(10, "A")], CallStats::new(1, 1, 2, 2));
}

#[test]
fn test_scenario_direct_recursion() {
    let table = compile_text(
        "\
+ 0 1 0 10 t.sh A outer
+ 2 1 1 10 t.sh A inner
+ 6 1 0 11 t.sh A after
+ 10 1 0 12 t.sh A end
",
    )
    .unwrap();

    let a = table.get(&key(10, "A")).unwrap();
    assert_eq!(a.totals.nc, 2);
    assert_eq!(a.totals.cc, 1);
    assert_eq!(a.totals.tt, 10);
    assert_eq!(a.totals.ct, 10);
    assert!(table.invariant_violations().is_empty());
}

#[test]
fn test_script_levels_start_at_one() {
    // `bash script.sh` reports ${#BASH_SOURCE[@]} == 1 for the script body
    let table = compile_text(
        "\
+ 0 1 1 10 t.sh A a1
+ 1 1 2 20 t.sh B b1
+ 3 1 1 11 t.sh A a2
+ 5 1 1 12 t.sh A end
",
    )
    .unwrap();
    assert_eq!(table.get(&key(10, "A")).unwrap().totals, CallStats::new(1, 1, 3, 5));
    assert_eq!(table.get(&key(20, "B")).unwrap().callers[&key(10, "A")].ct, 2);

    let err = compile_text("+ 0 1 1 1 t.sh main a\n+ 1 1 0 2 t.sh main b\n").unwrap_err();
    assert!(matches!(err, TraceError::MalformedTrace { line: 2, .. }));
}

#[test]
fn test_depth_jump_is_malformed() {
    let err = compile_text(
        "\
+ 0 1 0 1 t.sh main start
+ 1 1 2 5 t.sh f deep
",
    )
    .unwrap_err();
    match err {
        TraceError::MalformedTrace { line, .. } => assert_eq!(line, 2),
        other => panic!("expected MalformedTrace, got {:?}", other),
    }
}

#[test]
fn test_equal_timestamps_exit_before_enter() {
    // B returns and C is called in the same microsecond
    let table = compile_text(
        "\
+ 0 1 0 1 t.sh main a
+ 1 1 1 5 t.sh B b
+ 4 1 0 2 t.sh main c
+ 4 1 1 9 t.sh C d
+ 4 1 0 3 t.sh main e
+ 6 1 0 4 t.sh main end
",
    )
    .unwrap();
    assert_eq!(table.get(&key(5, "B")).unwrap().totals.ct, 3);
    assert_eq!(table.get(&key(9, "C")).unwrap().totals, CallStats::new(1, 1, 0, 0));
    assert_eq!(table.get(&key(1, "main")).unwrap().totals.ct, 6);
}

#[test]
fn test_callers_are_table_keys() {
    let table = compile_text(
        "\
+ 0 1 0 1 t.sh main a
+ 1 1 1 5 t.sh f b
+ 2 1 2 9 t.sh g c
+ 3 1 1 6 t.sh f d
+ 4 1 2 9 t.sh g e
+ 7 1 0 2 t.sh main end
",
    )
    .unwrap();
    let g = table.get(&key(9, "g")).unwrap();
    assert_eq!(g.callers[&key(5, "f")].nc, 2);
    for stats in table.functions.values() {
        for caller in stats.callers.keys() {
            assert!(table.get(caller).is_some());
        }
    }
}

/// Records of a random but well-formed walk over three functions
fn walk(steps: &[(u8, u8, u16)]) -> Vec<TraceRecord> {
    let names = ["f", "g", "h"];
    let mut height = 0usize;
    let mut stamp = 0u64;
    let mut records = Vec::new();
    for (i, (depth_sel, name_sel, dt)) in steps.iter().enumerate() {
        let depth = usize::from(*depth_sel) % (height + 1);
        height = if depth == height { height + 1 } else { depth + 1 };
        let name = if depth == 0 {
            "main"
        } else {
            names[usize::from(*name_sel) % names.len()]
        };
        records.push(TraceRecord {
            idx: i + 1,
            stamp_us: stamp,
            pid: 1,
            depth,
            lineno: name.len() as i64,
            source: "t.sh".to_string(),
            funcname: name.to_string(),
            cmd: format!("cmd{}", i % 4),
            payload: RecordPayload::Hook,
        });
        stamp += u64::from(*dt);
    }
    records
}

fn compile_walk(records: &[TraceRecord]) -> (StatsTable, TraceSpan) {
    compile_records(records.iter().cloned().map(Ok), |_| Ok(())).unwrap()
}

proptest! {
    #[test]
    fn prop_table_invariants(steps in prop::collection::vec((any::<u8>(), any::<u8>(), 0u16..500), 1..60)) {
        let (table, span) = compile_walk(&walk(&steps));

        prop_assert!(table.invariant_violations().is_empty(), "{:?}", table.invariant_violations());
        let mut self_time = 0;
        for stats in table.functions.values() {
            prop_assert!(stats.totals.nc >= stats.totals.cc);
            let attributed: u64 = stats.callers.values().map(|c| c.nc).sum();
            prop_assert_eq!(attributed + stats.root_calls(), stats.totals.nc);
            prop_assert!(stats.totals.tt <= span.duration_us());
            self_time += stats.totals.tt;
        }
        // one top-level frame spans the whole trace
        prop_assert_eq!(self_time, span.duration_us());
    }

    #[test]
    fn prop_aggregation_is_idempotent(steps in prop::collection::vec((any::<u8>(), any::<u8>(), 0u16..500), 1..60)) {
        let records = walk(&steps);
        let first = compile_walk(&records);
        let second = compile_walk(&records);
        prop_assert_eq!(first.0, second.0);
        prop_assert_eq!(first.1, second.1);
    }
}
