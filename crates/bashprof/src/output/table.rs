//! Text summary tables for terminal output.

use crate::aggregator::metrics::{group_digits, CommandRow, FunctionRow};
use crate::utils::config::COMMAND_TRIM_WIDTH;

/// Trim a string to `width` characters, ending it with ".." when cut
pub fn dots_trim(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let kept: String = s.chars().take(width.saturating_sub(2)).collect();
        format!("{}..", kept)
    }
}

/// Render the function ranking
pub fn format_function_table(title: &str, rows: &[FunctionRow]) -> String {
    let mut lines = vec![format!("{} ({} functions):", title, rows.len())];
    if rows.is_empty() {
        lines.push("  No functions found".to_string());
        return lines.join("\n");
    }

    lines.push(format!(
        "  {:>7}  {:>12}  {:>7}  {:>12}  {:>7}  {:<24}  {}",
        "%", "SELF(us)", "CALLS", "PERCALL(us)", "INSTR", "FUNCTION", "LOCATION"
    ));
    for row in rows {
        lines.push(format!(
            "  {:>6.2}%  {:>12}  {:>7}  {:>12}  {:>7}  {:<24}  {}",
            row.percent,
            group_digits(row.self_us),
            row.calls,
            group_digits(row.per_call_us),
            row.instructions,
            dots_trim(row.key.display_name(), 24),
            row.key.location()
        ));
    }
    lines.join("\n")
}

/// Render the command ranking
pub fn format_command_table(title: &str, rows: &[CommandRow]) -> String {
    let mut lines = vec![format!("{} ({} commands):", title, rows.len())];
    if rows.is_empty() {
        lines.push("  No commands found".to_string());
        return lines.join("\n");
    }

    lines.push(format!(
        "  {:>7}  {:>12}  {:<w$}  {:>7}  {:>12}  {}",
        "%",
        "TOTAL(us)",
        "COMMAND",
        "CALLS",
        "PERCALL(us)",
        "TOP CALLERS",
        w = COMMAND_TRIM_WIDTH
    ));
    for row in rows {
        let callers = row
            .top_callers
            .iter()
            .map(|(key, calls)| format!("{} {}", key.display_name(), calls))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "  {:>6.2}%  {:>12}  {:<w$}  {:>7}  {:>12}  {}",
            row.percent,
            group_digits(row.total_us),
            dots_trim(&row.cmd, COMMAND_TRIM_WIDTH),
            row.calls,
            group_digits(row.per_call_us),
            callers,
            w = COMMAND_TRIM_WIDTH
        ));
    }
    lines.join("\n")
}
