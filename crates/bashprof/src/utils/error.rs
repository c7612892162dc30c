//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in the CLI and commands.

use thiserror::Error;

/// Errors that abort the trace-to-stats compilation.
///
/// No stats table (and no output file) is produced once one of these is raised.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Unrecognized {mode} trace: none of the first {lines} lines is a valid record")]
    UnrecognizedFormat { mode: String, lines: usize },

    #[error("Malformed trace at line {line}: {reason}")]
    MalformedTrace { line: usize, reason: String },

    #[error("Unknown caller {caller} for {callee}: caller was never entered")]
    UnknownCaller { caller: String, callee: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while decoding or encoding marshal data
#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("Unexpected end of marshal data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Unsupported marshal type code {code:#04x} at offset {offset}")]
    UnsupportedType { code: u8, offset: usize },

    #[error("Invalid marshal reference {0}")]
    InvalidReference(usize),

    #[error("Invalid UTF-8 in marshal string at offset {0}")]
    InvalidString(usize),

    #[error("Marshal data is not a stats table: {0}")]
    NotStats(String),
}

/// Errors that can occur during call graph generation
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid root function pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("No function matches root pattern '{0}'")]
    NoMatchingRoot(String),

    #[error("Stats table is empty")]
    EmptyTable,
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Invalid stats file: {0}")]
    InvalidStats(#[from] MarshalError),
}
