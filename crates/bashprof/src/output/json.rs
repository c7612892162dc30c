//! JSON profile output writer.
//!
//! Writes a versioned, serde-serialised copy of the stats table for tools
//! that do not read pstats.

use crate::aggregator::stats::StatsTable;
use crate::aggregator::CompiledTrace;
use crate::parser::FunctionKey;
use crate::utils::config::SCHEMA_VERSION;
use crate::utils::error::OutputError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// Top-level profile structure written to JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Schema version for compatibility checking
    pub version: String,

    /// Timestamp when profile was generated (RFC 3339)
    pub generated_at: String,

    /// Trace file the profile was compiled from
    pub trace: String,

    /// Wall-clock span of the trace
    pub total_us: u64,

    /// Statements with a measured duration
    pub instructions: u64,

    pub skipped_lines: usize,

    /// One entry per function, in key order
    pub functions: Vec<FunctionProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionProfile {
    pub key: FunctionKey,
    pub cc: u64,
    pub nc: u64,
    pub tt_us: u64,
    pub ct_us: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callers: Vec<CallerProfile>,
}

/// Calls of one function made by `caller`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerProfile {
    pub caller: FunctionKey,
    pub cc: u64,
    pub nc: u64,
    pub tt_us: u64,
    pub ct_us: u64,
}

/// Build the JSON profile of a compiled trace
pub fn to_profile(compiled: &CompiledTrace, trace: &str) -> Profile {
    let summary = compiled.summary();
    Profile {
        version: SCHEMA_VERSION.to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        trace: trace.to_string(),
        total_us: summary.duration_us,
        instructions: summary.instructions,
        skipped_lines: summary.skipped_lines,
        functions: function_profiles(&compiled.table),
    }
}

fn function_profiles(table: &StatsTable) -> Vec<FunctionProfile> {
    table
        .iter()
        .map(|(key, stats)| FunctionProfile {
            key: key.clone(),
            cc: stats.totals.cc,
            nc: stats.totals.nc,
            tt_us: stats.totals.tt,
            ct_us: stats.totals.ct,
            callers: stats
                .callers
                .iter()
                .map(|(caller, edge)| CallerProfile {
                    caller: caller.clone(),
                    cc: edge.cc,
                    nc: edge.nc,
                    tt_us: edge.tt,
                    ct_us: edge.ct,
                })
                .collect(),
        })
        .collect()
}

/// Write a profile to a JSON file
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `profile` - Profile data to write
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_profile(profile: &Profile, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing profile to: {}", output_path.display());

    let mut file = super::AtomicFile::create(output_path)?;
    write_profile_to(profile, &mut file)?;
    file.commit()?;

    info!(
        "Profile written successfully ({} bytes)",
        super::calculate_file_size(output_path)
    );

    Ok(())
}

/// Serialize a profile as pretty JSON into any writer
///
/// # Errors
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::WriteFailed` - I/O error on the writer
pub fn write_profile_to<W: Write>(profile: &Profile, mut out: W) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut out, profile)?;
    writeln!(out)?;
    Ok(())
}

/// Read a profile from a JSON file
///
/// **Public** - useful for validation and testing
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_profile(input_path: impl AsRef<Path>) -> Result<Profile, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading profile from: {}", input_path.display());

    let file = File::open(input_path)?;
    let profile: Profile = serde_json::from_reader(BufReader::new(file))?;

    debug!(
        "Profile loaded: version {}, {} functions",
        profile.version,
        profile.functions.len()
    );

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::compile_records;
    use crate::aggregator::stack_builder::tests::record;
    use crate::parser::ParseSummary;

    fn compiled() -> CompiledTrace {
        let records = vec![
            Ok(record(1, 0, "A", 0)),
            Ok(record(2, 1, "B", 1)),
            Ok(record(3, 0, "A", 3)),
            Ok(record(4, 0, "A", 5)),
        ];
        let (table, span) = compile_records(records, |_| Ok(())).unwrap();
        CompiledTrace {
            table,
            span,
            parse: ParseSummary::default(),
        }
    }

    #[test]
    fn test_profile_contents() {
        let profile = to_profile(&compiled(), "trace.log");
        assert_eq!(profile.version, SCHEMA_VERSION);
        assert_eq!(profile.total_us, 5);
        assert_eq!(profile.instructions, 3);
        assert_eq!(profile.functions.len(), 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&profile.generated_at).is_ok());

        let b = &profile.functions[1];
        assert_eq!(b.key.funcname, "B");
        assert_eq!(b.callers[0].caller.funcname, "A");
        assert_eq!((b.callers[0].nc, b.callers[0].ct_us), (1, 2));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let profile = to_profile(&compiled(), "trace.log");
        write_profile(&profile, &path).unwrap();
        assert_eq!(read_profile(&path).unwrap(), profile);
    }
}
