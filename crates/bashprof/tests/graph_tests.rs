use bashprof::aggregator::{compile_trace, StatsTable};
use bashprof::graph::{generate_callgraph, GraphConfig};
use bashprof::parser::{TraceMode, TraceReader};

/// main -> A -> B -> C
fn chain() -> StatsTable {
    let trace = "\
+ 0 1 0 1 t.sh main start
+ 1 1 1 10 t.sh A a
+ 2 1 2 20 t.sh B b
+ 3 1 3 30 t.sh C c
+ 7 1 0 2 t.sh main end
";
    let mut reader = TraceReader::new(trace.as_bytes(), TraceMode::Xtrace);
    compile_trace(&mut reader, |_| Ok(())).unwrap().table
}

fn node_labels(dot: &str) -> Vec<String> {
    dot.lines()
        .filter(|l| l.trim_start().starts_with('f') && l.contains("[label=\"") && !l.contains("->"))
        .map(|l| {
            let start = l.find("[label=\"").unwrap() + 8;
            l[start..].split("\\n").next().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_root_filter_with_depth_limit() {
    let config = GraphConfig::new().with_root("A").with_max_depth(1);
    let dot = generate_callgraph(&chain(), &config).unwrap();

    assert_eq!(node_labels(&dot), vec!["A", "B"]);
    // keys sort by line: main=f0, A=f1, B=f2, C=f3
    assert!(dot.contains("f1 -> f2"));
    assert_eq!(dot.matches("->").count(), 1);
}

#[test]
fn test_unfiltered_graph_has_every_function() {
    let dot = generate_callgraph(&chain(), &GraphConfig::new()).unwrap();
    assert_eq!(node_labels(&dot), vec!["main", "A", "B", "C"]);
    assert_eq!(dot.matches("->").count(), 3);
    assert!(dot.starts_with("digraph callstats {\n"));
    assert!(dot.ends_with("}\n"));
}

#[test]
fn test_output_is_deterministic() {
    let table = chain();
    let config = GraphConfig::new().with_commands(true).with_title("run \"1\"");
    let first = generate_callgraph(&table, &config).unwrap();
    let second = generate_callgraph(&table.clone(), &config).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("label=\"run \\\"1\\\"\";"));
}
