use crate::graph::GraphConfig;
use crate::parser::TraceMode;
use crate::utils::config::DEFAULT_TOP_N;
use std::path::PathBuf;

/// Arguments for the analyze command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct AnalyzeArgs {
    /// Trace file to compile, `-` for stdin
    pub trace: PathBuf,

    /// Wire format of the trace
    pub mode: TraceMode,

    /// Read at most this many input lines
    pub line_limit: Option<usize>,

    /// Output path for the pstats file
    pub pstats: Option<PathBuf>,

    /// Output path for the DOT call graph
    pub dot: Option<PathBuf>,

    /// Call graph configuration
    pub graph: GraphConfig,

    /// Output path for the per-invocation call tree
    pub tree_dot: Option<PathBuf>,

    /// Restrict every output to the calls of functions matching this
    /// regex and their callees
    pub filter: Option<String>,

    /// Output path for the flat record dump
    pub dump: Option<PathBuf>,

    /// Output path for the JSON profile
    pub json: Option<PathBuf>,

    /// Print the function and command rankings to stdout
    pub print_summary: bool,

    /// Rows per ranking
    pub top_n: usize,

    /// Log stage timings at info level
    pub show_times: bool,
}

impl Default for AnalyzeArgs {
    fn default() -> Self {
        Self {
            trace: PathBuf::from("-"),
            mode: TraceMode::Auto,
            line_limit: None,
            pstats: None,
            dot: None,
            graph: GraphConfig::default(),
            tree_dot: None,
            filter: None,
            dump: None,
            json: None,
            print_summary: true,
            top_n: DEFAULT_TOP_N,
            show_times: false,
        }
    }
}

impl AnalyzeArgs {
    /// True when the trace is read from stdin
    pub fn reads_stdin(&self) -> bool {
        self.trace.as_os_str() == "-"
    }

    /// Every output file requested, in the order they are committed
    pub fn outputs(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.dump, &self.tree_dot, &self.pstats, &self.dot, &self.json]
            .into_iter()
            .flatten()
    }
}

/// Arguments for the show command
#[derive(Debug, Clone, Default)]
pub struct ShowArgs {
    /// pstats file to print
    pub file: PathBuf,

    /// Print every entry and caller in key order instead of a ranking
    pub raw: bool,

    /// Rows of the ranking, all when `None`
    pub limit: Option<usize>,
}
