//! pstats file writer and reader.
//!
//! The file is the marshalled dict `cProfile` produces:
//! `{(file, line, func): (cc, nc, tt, ct, callers)}` with
//! `callers = {(file, line, func): (nc, cc, tt, ct)}`. Times are float
//! seconds. Caller tuples list `nc` before `cc`, as `cProfile` writes them
//! and `pstats` reads them.

use super::marshal::{dumps, loads, MarshalValue};
use crate::aggregator::stats::{CallStats, FunctionStats, StatsTable};
use crate::parser::FunctionKey;
use crate::utils::config::MICROS_PER_SECOND;
use crate::utils::error::{MarshalError, OutputError};
use log::{debug, info};
use std::fs;
use std::path::Path;

/// Encode a stats table in pstats format
///
/// Command details are not part of the format and are left out.
pub fn pstats_to_bytes(table: &StatsTable) -> Vec<u8> {
    let entries = table
        .iter()
        .map(|(key, stats)| {
            let callers = stats
                .callers
                .iter()
                .map(|(caller, edge)| {
                    let tuple = MarshalValue::Tuple(vec![
                        count(edge.nc),
                        count(edge.cc),
                        seconds(edge.tt),
                        seconds(edge.ct),
                    ]);
                    (key_tuple(caller), tuple)
                })
                .collect();
            let tuple = MarshalValue::Tuple(vec![
                count(stats.totals.cc),
                count(stats.totals.nc),
                seconds(stats.totals.tt),
                seconds(stats.totals.ct),
                MarshalValue::Dict(callers),
            ]);
            (key_tuple(key), tuple)
        })
        .collect();
    dumps(&MarshalValue::Dict(entries))
}

/// Write a stats table to a pstats file
///
/// **Public** - main entry point for pstats output
///
/// # Errors
/// * `OutputError::InvalidPath` - Path is empty or a directory
/// * `OutputError::WriteFailed` - I/O error during write
pub fn write_pstats(table: &StatsTable, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing pstats to: {}", output_path.display());

    let bytes = pstats_to_bytes(table);
    super::write_atomic(output_path, &bytes)?;

    info!(
        "pstats written successfully ({} functions, {} bytes)",
        table.len(),
        super::calculate_file_size(output_path)
    );
    Ok(())
}

/// Read a pstats file back into a stats table
///
/// Accepts files written by [`write_pstats`] and by `cProfile` itself.
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error
/// * `OutputError::InvalidStats` - not marshal data of the pstats shape
pub fn read_pstats(input_path: impl AsRef<Path>) -> Result<StatsTable, OutputError> {
    let input_path = input_path.as_ref();
    debug!("Reading pstats from: {}", input_path.display());

    let bytes = fs::read(input_path)?;
    let table = stats_from_bytes(&bytes)?;

    debug!("pstats loaded: {} functions", table.len());
    Ok(table)
}

/// Decode pstats bytes
pub fn stats_from_bytes(bytes: &[u8]) -> Result<StatsTable, MarshalError> {
    let root = loads(bytes)?;
    let entries = root
        .as_dict()
        .ok_or_else(|| not_stats(format!("top level is a {}", root.type_name())))?;

    let mut table = StatsTable::new();
    for (key, value) in entries {
        let key = parse_key(key)?;
        let fields = value
            .as_tuple()
            .filter(|fields| fields.len() == 5)
            .ok_or_else(|| not_stats(format!("entry for {} is not a 5-tuple", key)))?;

        let totals = parse_counts(&fields[..4], false)
            .ok_or_else(|| not_stats(format!("bad counters for {}", key)))?;
        let mut stats = FunctionStats {
            totals,
            ..Default::default()
        };

        let callers = fields[4]
            .as_dict()
            .ok_or_else(|| not_stats(format!("callers of {} are not a dict", key)))?;
        for (caller, edge) in callers {
            let caller = parse_key(caller)?;
            let edge = edge
                .as_tuple()
                .filter(|edge| edge.len() >= 4)
                .and_then(|edge| parse_counts(&edge[..4], true))
                .ok_or_else(|| not_stats(format!("bad edge {} -> {}", caller, key)))?;
            stats.callers.insert(caller, edge);
        }
        table.functions.insert(key, stats);
    }
    Ok(table)
}

fn not_stats(reason: String) -> MarshalError {
    MarshalError::NotStats(reason)
}

fn key_tuple(key: &FunctionKey) -> MarshalValue {
    MarshalValue::Tuple(vec![
        MarshalValue::Str(key.filename.clone()),
        MarshalValue::Int(key.lineno),
        MarshalValue::Str(key.funcname.clone()),
    ])
}

fn parse_key(value: &MarshalValue) -> Result<FunctionKey, MarshalError> {
    match value.as_tuple() {
        Some([file, line, func]) => match (file.as_str(), line.as_int(), func.as_str()) {
            (Some(file), Some(line), Some(func)) => Ok(FunctionKey::new(file, line, func)),
            _ => Err(not_stats("function key fields have wrong types".to_string())),
        },
        _ => Err(not_stats(format!(
            "function key is a {}, not a 3-tuple",
            value.type_name()
        ))),
    }
}

/// `(cc, nc, tt, ct)`, or `(nc, cc, tt, ct)` for caller edges
fn parse_counts(fields: &[MarshalValue], nc_first: bool) -> Option<CallStats> {
    let first = u64::try_from(fields[0].as_int()?).ok()?;
    let second = u64::try_from(fields[1].as_int()?).ok()?;
    let (cc, nc) = if nc_first { (second, first) } else { (first, second) };
    Some(CallStats {
        cc,
        nc,
        tt: micros(fields[2].as_float()?),
        ct: micros(fields[3].as_float()?),
    })
}

fn count(n: u64) -> MarshalValue {
    MarshalValue::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn seconds(us: u64) -> MarshalValue {
    MarshalValue::Float(us as f64 / MICROS_PER_SECOND)
}

fn micros(seconds: f64) -> u64 {
    (seconds * MICROS_PER_SECOND).round().max(0.0) as u64
}
