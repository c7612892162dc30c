//! bashprof CLI
//!
//! Profiles bash scripts from their execution traces.
//! Writes pstats files, DOT call graphs, call trees and record dumps.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use std::path::PathBuf;

use bashprof::commands::{
    display_version, execute_analyze, show_pstats, validate_args, AnalyzeArgs, ShowArgs,
};
use bashprof::graph::GraphConfig;
use bashprof::parser::TraceMode;

/// bashprof - cProfile statistics for bash scripts
#[derive(Parser, Debug)]
#[command(name = "bashprof")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a trace into call statistics
    Analyze {
        /// Trace file, `-` for stdin
        #[arg(default_value = "-")]
        trace: PathBuf,

        /// Trace format: auto, xtrace (1), debug (2) or var (3)
        #[arg(short, long, default_value = "auto")]
        mode: TraceMode,

        /// Parse only that many lines from the top of the trace
        #[arg(long)]
        line_limit: Option<usize>,

        /// Output path for the pstats file
        #[arg(short, long)]
        pstats: Option<PathBuf>,

        /// Output path for the DOT call graph
        #[arg(short, long)]
        dot: Option<PathBuf>,

        /// Output path for the per-invocation call tree (DOT)
        #[arg(long)]
        tree_dot: Option<PathBuf>,

        /// Only profile calls of functions matching this regex, and their
        /// callees; applies to every output
        #[arg(short, long)]
        filter: Option<String>,

        /// Only graph functions whose name matches this regex, and their
        /// callees; applies to the DOT call graph only
        #[arg(long)]
        root: Option<String>,

        /// Levels of callees graphed below the roots
        #[arg(long)]
        max_depth: Option<usize>,

        /// Keep only the N most expensive children of each graph node
        #[arg(long, default_value = "0")]
        max_children: usize,

        /// Add the commands executed by each function to the call graph
        #[arg(long)]
        commands: bool,

        /// Call graph title
        #[arg(long)]
        title: Option<String>,

        /// Output path for the flat record dump
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Output path for the JSON profile
        #[arg(long)]
        json: Option<PathBuf>,

        /// Rows in each summary table
        #[arg(long, default_value = "20")]
        top: usize,

        /// Do not print the summary tables
        #[arg(long)]
        no_summary: bool,

        /// Log how long each stage took
        #[arg(long)]
        show_times: bool,
    },

    /// Print a pstats file
    Show {
        /// Path to the pstats file
        file: PathBuf,

        /// Print every entry and caller instead of a ranking
        #[arg(short, long)]
        raw: bool,

        /// Rows of the ranking
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    debug!("Parsed command: {:?}", cli.command);

    // Execute command
    match cli.command {
        Commands::Analyze {
            trace,
            mode,
            line_limit,
            pstats,
            dot,
            tree_dot,
            filter,
            root,
            max_depth,
            max_children,
            commands,
            title,
            dump,
            json,
            top,
            no_summary,
            show_times,
        } => {
            let mut graph = GraphConfig::new()
                .with_max_children(max_children)
                .with_commands(commands);
            if let Some(root) = root {
                graph = graph.with_root(root);
            }
            if let Some(depth) = max_depth {
                graph = graph.with_max_depth(depth);
            }
            if let Some(title) = title {
                graph = graph.with_title(title);
            }

            let args = AnalyzeArgs {
                trace,
                mode,
                line_limit,
                pstats,
                dot,
                graph,
                tree_dot,
                filter,
                dump,
                json,
                print_summary: !no_summary,
                top_n: top,
                show_times,
            };

            // Validate args first
            validate_args(&args)?;

            execute_analyze(&args)?;
        }

        Commands::Show { file, raw, limit } => {
            show_pstats(&ShowArgs { file, raw, limit })?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
