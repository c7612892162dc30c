//! Analyze command implementation.
//!
//! The analyze command:
//! 1. Reads and parses the trace
//! 2. Reconstructs the call stack and aggregates call statistics
//! 3. Renders the requested output files (dump, call tree, pstats, DOT, JSON)
//! 4. Prints the summary rankings
//!
//! Every output is rendered into a temporary sibling first. Files are only
//! renamed into place once all of them rendered, so a failing run leaves
//! none of its outputs behind.

use crate::aggregator::{
    compile_trace_with, top_commands, top_functions, CompiledTrace, RankBy, SubtreeFilter,
};
use crate::commands::models::AnalyzeArgs;
use crate::graph::{generate_callgraph, TreeGraphWriter};
use crate::output::{
    format_command_table, format_function_table, pstats_to_bytes, to_profile, write_profile_to,
    AtomicFile, RecordDumper,
};
use crate::parser::TraceReader;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::time::Instant;

/// Execute the analyze command
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `args` - Analyze command arguments
///
/// # Returns
/// The compiled trace, after all outputs were written
///
/// # Errors
/// * Unreadable or unrecognizable trace input
/// * Structurally malformed traces
/// * Invalid filter or root patterns
/// * File write errors
pub fn execute_analyze(args: &AnalyzeArgs) -> Result<CompiledTrace> {
    let start_time = Instant::now();
    info!(
        "Analyzing {} trace: {}",
        args.mode,
        args.trace.display()
    );

    let filter = args
        .filter
        .as_deref()
        .map(SubtreeFilter::new)
        .transpose()
        .context("Invalid filter pattern")?;

    let input = open_trace(args)?;
    let mut reader = TraceReader::new(input, args.mode).with_line_limit(args.line_limit);

    // Streamed outputs fill while compiling
    let mut dumper = match &args.dump {
        Some(path) => Some(RecordDumper::new(
            AtomicFile::create(path).context("Failed to create record dump")?,
        )),
        None => None,
    };
    let mut tree = match &args.tree_dot {
        Some(path) => {
            let file = AtomicFile::create(path).context("Failed to create call tree")?;
            let title = format!("Call tree of {}", args.trace.display());
            Some(TreeGraphWriter::new(file, &title).context("Failed to write call tree")?)
        }
        None => None,
    };

    let compiled = {
        let _stage = StageTimer::new("Compiling trace", args.show_times);
        compile_trace_with(&mut reader, filter, |event| {
            if let Some(dumper) = dumper.as_mut() {
                dumper.dump(event)?;
            }
            if let Some(tree) = tree.as_mut() {
                tree.record(event)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to compile trace {}", args.trace.display()))?
    };
    debug!(
        "Parsed {} records from {} lines",
        compiled.parse.records, compiled.parse.lines_read
    );
    if let Some(pattern) = &args.filter {
        if compiled.table.is_empty() {
            warn!("No call matches filter '{}', outputs are empty", pattern);
        }
    }

    let staged = stage_outputs(args, &compiled, dumper, tree)?;
    commit_outputs(staged)?;

    if args.print_summary {
        print_summary_tables(args, &compiled);
    }
    println!("{}", compiled.summary().summary());

    info!(
        "Analysis completed in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(compiled)
}

/// Open the trace file, or stdin for `-`
///
/// **Private** - internal helper for execute_analyze
fn open_trace(args: &AnalyzeArgs) -> Result<Box<dyn BufRead>> {
    if args.reads_stdin() {
        debug!("Reading trace from stdin");
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(&args.trace)
        .with_context(|| format!("Failed to open trace {}", args.trace.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// A rendered output waiting for its rename
struct StagedOutput {
    what: &'static str,
    file: AtomicFile,
}

/// Render every requested output into its temporary file.
///
/// Returning early drops the staged files, which deletes them.
///
/// **Private** - internal helper for execute_analyze
fn stage_outputs(
    args: &AnalyzeArgs,
    compiled: &CompiledTrace,
    dumper: Option<RecordDumper<AtomicFile>>,
    tree: Option<TreeGraphWriter<AtomicFile>>,
) -> Result<Vec<StagedOutput>> {
    let _stage = StageTimer::new("Rendering outputs", args.show_times);
    let mut staged = Vec::new();

    if let Some(dumper) = dumper {
        debug!("Record dump has {} rows", dumper.rows());
        staged.push(StagedOutput {
            what: "Record dump",
            file: dumper.into_inner(),
        });
    }

    if let Some(tree) = tree {
        debug!("Call tree has {} nodes", tree.nodes());
        let file = tree.finish().context("Failed to write call tree")?;
        staged.push(StagedOutput {
            what: "Call tree",
            file,
        });
    }

    if let Some(path) = &args.pstats {
        let mut file = AtomicFile::create(path).context("Failed to create pstats file")?;
        file.write_all(&pstats_to_bytes(&compiled.table))
            .context("Failed to write pstats file")?;
        staged.push(StagedOutput {
            what: "pstats",
            file,
        });
    }

    if let Some(path) = &args.dot {
        if compiled.table.is_empty() {
            warn!("Trace has no functions, call graph not written");
        } else {
            let dot = generate_callgraph(&compiled.table, &args.graph)
                .context("Failed to generate call graph")?;
            let mut file = AtomicFile::create(path).context("Failed to create call graph")?;
            file.write_all(dot.as_bytes())
                .context("Failed to write call graph")?;
            staged.push(StagedOutput {
                what: "Call graph",
                file,
            });
        }
    }

    if let Some(path) = &args.json {
        let profile = to_profile(compiled, &args.trace.display().to_string());
        let mut file = AtomicFile::create(path).context("Failed to create profile JSON")?;
        write_profile_to(&profile, &mut file).context("Failed to write profile JSON")?;
        staged.push(StagedOutput {
            what: "Profile",
            file,
        });
    }

    Ok(staged)
}

/// Rename the staged outputs into place, in the order they were staged
///
/// **Private** - internal helper for execute_analyze
fn commit_outputs(staged: Vec<StagedOutput>) -> Result<()> {
    for StagedOutput { what, file } in staged {
        let path = file.path().to_path_buf();
        file.commit()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("✓ {} written to: {}", what, path.display());
    }
    Ok(())
}

/// Print the function and command rankings to stdout.
///
/// **Private** - internal helper for execute_analyze
fn print_summary_tables(args: &AnalyzeArgs, compiled: &CompiledTrace) {
    let trace_us = compiled.span.duration_us();
    let table = &compiled.table;

    for (title, rank) in [
        ("Top cumulatively longest commands", RankBy::Total),
        ("Top cumulatively longest commands per call", RankBy::PerCall),
    ] {
        let rows = top_commands(table, trace_us, args.top_n, rank);
        println!("{}\n", format_command_table(title, &rows));
    }
    for (title, rank) in [
        ("Top cumulatively longest functions", RankBy::Total),
        ("Top cumulatively longest functions per call", RankBy::PerCall),
    ] {
        let rows = top_functions(table, trace_us, args.top_n, rank);
        println!("{}\n", format_function_table(title, &rows));
    }
}

/// Logs how long a stage took when dropped
///
/// Timings go to info with `--show-times`, to debug otherwise.
struct StageTimer {
    name: &'static str,
    start: Instant,
    show: bool,
}

impl StageTimer {
    fn new(name: &'static str, show: bool) -> Self {
        Self {
            name,
            start: Instant::now(),
            show,
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if self.show {
            info!("{} took {:.3}s", self.name, elapsed);
        } else {
            debug!("{} took {:.3}s", self.name, elapsed);
        }
    }
}

/// Validate analyze arguments
///
/// **Public** - can be called before execute_analyze for early validation
///
/// # Arguments
/// * `args` - Arguments to validate
///
/// # Returns
/// Ok if arguments are valid, Err with message if not
pub fn validate_args(args: &AnalyzeArgs) -> Result<()> {
    if args.trace.as_os_str().is_empty() {
        anyhow::bail!("Trace path cannot be empty");
    }

    if !args.reads_stdin() && !args.trace.is_file() {
        anyhow::bail!("Trace file does not exist: {}", args.trace.display());
    }

    if args.top_n == 0 {
        anyhow::bail!("top_n must be greater than 0");
    }

    let outputs: Vec<_> = args.outputs().collect();
    for (i, path) in outputs.iter().enumerate() {
        if outputs[..i].contains(path) {
            anyhow::bail!("Output path used twice: {}", path.display());
        }
        if **path == args.trace {
            anyhow::bail!("Output would overwrite the trace: {}", path.display());
        }
    }

    if args.dot.is_none() && (args.graph.root.is_some() || args.graph.include_commands) {
        warn!("Call graph options have no effect without a DOT output path");
    }

    if let Some(pattern) = &args.filter {
        SubtreeFilter::new(pattern).context("Invalid filter pattern")?;
    }

    Ok(())
}
