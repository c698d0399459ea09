//! Shared text-shaping helpers.

/// Default line cap for tool result truncation.
pub const TOOL_RESULT_MAX_LINES: usize = 80;

/// Default character cap for tool result truncation.
pub const TOOL_RESULT_MAX_CHARS: usize = 12_000;

/// Truncate text by line count and character count, appending a trailer
/// that says how much was omitted.
pub fn truncate_text(text: &str, max_chars: usize, max_lines: usize) -> String {
    let total_lines = text.matches('\n').count() + 1;
    let total_chars = text.chars().count();

    let mut lines: Vec<&str> = text.lines().collect();
    let mut truncated = false;

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        truncated = true;
    }

    let mut result = lines.join("\n");
    if result.chars().count() > max_chars {
        let byte_cap = result
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(result.len());
        let cut = match result[..byte_cap].rfind('\n') {
            Some(pos) => pos,
            None => byte_cap,
        };
        result.truncate(cut);
        truncated = true;
    }

    if truncated {
        let omitted_lines = total_lines - result.matches('\n').count() - 1;
        let omitted_chars = total_chars.saturating_sub(result.chars().count());
        result = format!(
            "{}\n... ({omitted_lines} more lines, {omitted_chars} more chars omitted)",
            result.trim_end()
        );
    }
    result
}

/// Truncate with the default caps.
pub fn truncate_default(text: &str) -> String {
    truncate_text(text, TOOL_RESULT_MAX_CHARS, TOOL_RESULT_MAX_LINES)
}

/// Cap a one-line preview at `max` characters, appending an ellipsis.
pub fn preview(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        let cap = value
            .char_indices()
            .nth(max)
            .map(|(idx, _)| idx)
            .unwrap_or(value.len());
        format!("{}...", &value[..cap])
    } else {
        value.to_string()
    }
}
