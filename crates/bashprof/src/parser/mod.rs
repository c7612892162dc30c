//! Trace parsing and record definitions.
//!
//! This module handles:
//! - Decoding raw trace lines of the supported wire formats
//! - Shell-style word splitting of quoted fields
//! - Counting lines that do not match the declared grammar

pub mod bash_trace;
pub mod schema;
pub mod shell_words;

// Re-export main types
pub use bash_trace::{parse_line, TraceReader};
pub use schema::{FunctionKey, ParseSummary, RecordPayload, TraceMode, TraceRecord};
pub use shell_words::split_words;
