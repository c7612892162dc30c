//! DOT rendering of a stats table.

use crate::aggregator::metrics::group_digits;
use crate::aggregator::stats::{CallStats, CommandStats, StatsTable};
use crate::parser::FunctionKey;
use crate::utils::error::GraphError;
use log::{debug, info};
use regex::Regex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write;

/// Call graph configuration
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub title: String,
    /// Pattern matched at the start of function names
    pub root: Option<String>,
    /// Levels of callees expanded below the roots, unlimited if `None`
    pub max_depth: Option<usize>,
    /// Most expensive children kept per node, 0 keeps all
    pub max_children: usize,
    /// Add a box node for every command a function executed
    pub include_commands: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            title: "Bash call graph".to_string(),
            root: None,
            max_depth: None,
            max_children: 0,
            include_commands: false,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_root(mut self, pattern: impl Into<String>) -> Self {
        self.root = Some(pattern.into());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_children(mut self, n: usize) -> Self {
        self.max_children = n;
        self
    }

    pub fn with_commands(mut self, include: bool) -> Self {
        self.include_commands = include;
        self
    }
}

/// A child of a node in the rendered graph
enum Child<'a> {
    Function(&'a FunctionKey, &'a CallStats),
    Command(&'a str, &'a CommandStats),
}

impl Child<'_> {
    fn time_us(&self) -> u64 {
        match self {
            Child::Function(_, edge) => edge.ct,
            Child::Command(_, cmd) => cmd.total_us,
        }
    }
}

/// Generate a DOT call graph from a stats table
///
/// **Public** - main entry point for graph output
///
/// Output is byte-identical for the same table and configuration: node ids
/// follow key order and edges are emitted by (caller, callee).
///
/// # Errors
/// * `GraphError::EmptyTable` - nothing to draw
/// * `GraphError::InvalidPattern` - the root pattern is not a valid regex
/// * `GraphError::NoMatchingRoot` - no function name matches the root pattern
pub fn generate_callgraph(table: &StatsTable, config: &GraphConfig) -> Result<String, GraphError> {
    if table.is_empty() {
        return Err(GraphError::EmptyTable);
    }

    let ids: BTreeMap<&FunctionKey, usize> =
        table.iter().enumerate().map(|(i, (key, _))| (key, i)).collect();
    let callees = table.callees();

    let roots = select_roots(table, config.root.as_deref())?;
    debug!("Call graph roots: {}", roots.len());

    // Breadth-first expansion, remembering the shallowest depth of each node
    let mut depth_of: BTreeMap<&FunctionKey, usize> = BTreeMap::new();
    let mut queue: VecDeque<(&FunctionKey, usize)> = VecDeque::new();
    for root in roots {
        depth_of.insert(root, 0);
        queue.push_back((root, 0));
    }
    while let Some((key, depth)) = queue.pop_front() {
        if config.max_depth.is_some_and(|max| depth >= max) {
            continue;
        }
        for child in ranked_children(table, &callees, key, config) {
            if let Child::Function(callee, _) = child {
                if !depth_of.contains_key(callee) {
                    depth_of.insert(callee, depth + 1);
                    queue.push_back((callee, depth + 1));
                }
            }
        }
    }
    let expanded = |key: &FunctionKey| {
        depth_of
            .get(key)
            .is_some_and(|d| config.max_depth.map_or(true, |max| *d < max))
    };

    let mut nodes = String::new();
    let mut edges = String::new();
    for key in depth_of.keys() {
        let id = ids[key];
        let Some(stats) = table.get(key) else {
            continue;
        };
        let _ = writeln!(
            nodes,
            "  f{} [label=\"{}\"];",
            id,
            escape_dot(&function_label(key, &stats.totals))
        );
        if !expanded(*key) {
            continue;
        }

        let children = ranked_children(table, &callees, key, config);
        let hue = RedGreenHue::new(children.len());
        let mut function_edges = Vec::new();
        for (rank, child) in children.iter().enumerate() {
            let color = hue.color(rank);
            match child {
                Child::Function(callee, edge) => {
                    function_edges.push((*callee, *edge, color));
                }
                Child::Command(cmd, cmd_stats) => {
                    let cmd_id = format!("f{}_c{}", id, rank);
                    let _ = writeln!(
                        nodes,
                        "  {} [label=\"{}\" shape=box color=\"{}\"];",
                        cmd_id,
                        escape_dot(&command_label(cmd, cmd_stats)),
                        color
                    );
                    let _ = writeln!(
                        edges,
                        "  f{} -> {} [style=dashed color=\"{}\"];",
                        id, cmd_id, color
                    );
                }
            }
        }
        function_edges.sort_by_key(|(callee, _, _)| *callee);
        for (callee, edge, color) in function_edges {
            let _ = writeln!(
                edges,
                "  f{} -> f{} [label=\"{}\" color=\"{}\"];",
                id,
                ids[callee],
                escape_dot(&format!(
                    "calls={} total={}us",
                    edge.nc,
                    group_digits(edge.ct)
                )),
                color
            );
        }
    }

    let mut out = String::new();
    out.push_str("digraph callstats {\n");
    let _ = writeln!(out, "  label=\"{}\";", escape_dot(&config.title));
    out.push_str("  labelloc=t;\n");
    out.push_str("  node [fontname=\"Helvetica\", fontsize=10];\n");
    out.push_str("  edge [fontname=\"Helvetica\", fontsize=8];\n");
    out.push('\n');
    out.push_str(&nodes);
    out.push('\n');
    out.push_str(&edges);
    out.push_str("}\n");

    info!("Call graph generated with {} functions", depth_of.len());
    Ok(out)
}

/// Children of a node ranked by time (descending), then by name, keeping
/// only the first `max_children`
fn ranked_children<'a>(
    table: &'a StatsTable,
    callees: &BTreeMap<&'a FunctionKey, BTreeSet<&'a FunctionKey>>,
    key: &FunctionKey,
    config: &GraphConfig,
) -> Vec<Child<'a>> {
    let mut children: Vec<Child<'a>> = Vec::new();
    for &callee in callees.get(key).into_iter().flatten() {
        if let Some(edge) = table.get(callee).and_then(|s| s.callers.get(key)) {
            children.push(Child::Function(callee, edge));
        }
    }
    if config.include_commands {
        if let Some(stats) = table.get(key) {
            children.extend(
                stats
                    .commands
                    .iter()
                    .map(|(cmd, stats)| Child::Command(cmd.as_str(), stats)),
            );
        }
    }
    children.sort_by_key(|child| {
        let name = match child {
            Child::Function(k, _) => (0, k.to_string()),
            Child::Command(c, _) => (1, c.to_string()),
        };
        (Reverse(child.time_us()), name)
    });
    if config.max_children > 0 {
        children.truncate(config.max_children);
    }
    children
}

/// Functions the graph starts from
///
/// **Private** - without a pattern these are the functions called from the
/// top level; with one, every function whose name matches
fn select_roots<'a>(
    table: &'a StatsTable,
    pattern: Option<&str>,
) -> Result<Vec<&'a FunctionKey>, GraphError> {
    let Some(pattern) = pattern else {
        return Ok(table
            .iter()
            .filter(|(_, stats)| stats.root_calls() > 0)
            .map(|(key, _)| key)
            .collect());
    };

    let regex = Regex::new(&format!("^(?:{})", pattern))?;
    let roots: Vec<_> = table
        .iter()
        .filter(|(key, _)| regex.is_match(&key.funcname))
        .map(|(key, _)| key)
        .collect();
    if roots.is_empty() {
        return Err(GraphError::NoMatchingRoot(pattern.to_string()));
    }
    Ok(roots)
}

fn function_label(key: &FunctionKey, totals: &CallStats) -> String {
    format!(
        "{}\n{}\ncalls={} total={}us self={}us percall={}us",
        key.display_name(),
        key.location(),
        totals.nc,
        group_digits(totals.ct),
        group_digits(totals.tt),
        group_digits(totals.ct_per_call())
    )
}

fn command_label(cmd: &str, stats: &CommandStats) -> String {
    let per_call = if stats.calls == 0 {
        0
    } else {
        stats.total_us / stats.calls
    };
    format!(
        "{}\ncalls={} spent={}us\npercall={}us",
        cmd,
        stats.calls,
        group_digits(stats.total_us),
        group_digits(per_call)
    )
}

/// Colours for ranked children, from red (most expensive) to green
struct RedGreenHue {
    elems: usize,
}

impl RedGreenHue {
    fn new(elems: usize) -> Self {
        Self { elems }
    }

    fn color(&self, idx: usize) -> String {
        if self.elems == 0 {
            return "#000000".to_string();
        }
        let val = (255.0 * 2.0 / self.elems as f64 * idx as f64) as u32;
        let (red, green) = if val < 0xff {
            (0xff - val, 0)
        } else {
            (0, (val - 0xff).min(0xff))
        };
        format!("#{:02x}{:02x}00", red, green)
    }
}

/// Escape a string for Graphviz DOT labels.
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
