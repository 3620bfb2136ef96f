//! Plain-text rendering of session listings for chat replies and the CLI.

use crate::conversation::Conversation;
use crate::list::SessionListing;

pub const DEFAULT_MAX_CONVERSATION_CHARS: usize = 120;
pub const NO_PROMPT_PLACEHOLDER: &str = "(no user prompt captured)";

/// "N units ago" relative to `now_ms`.  Unknown (non-positive) stamps render
/// as `unknown`; stamps in the future as `0 seconds ago`.
pub fn format_relative_time(last_ms: i64, now_ms: i64) -> String {
    if last_ms <= 0 {
        return "unknown".into();
    }
    let diff = now_ms - last_ms;
    if diff < 0 {
        return "0 seconds ago".into();
    }
    let seconds = diff / 1000;
    if seconds < 60 {
        return time_unit(seconds, "second");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return time_unit(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return time_unit(hours, "hour");
    }
    time_unit(hours / 24, "day")
}

fn time_unit(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{value} {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

/// `first | last` on one line, truncated to `max_chars` with a trailing
/// `...`.  The last message is omitted when it repeats the first.
pub fn format_conversation(conversation: &Conversation, max_chars: Option<usize>) -> String {
    let initial = conversation
        .initial_message
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let last = conversation
        .last_message
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && Some(*s) != initial);

    let parts: Vec<&str> = initial.into_iter().chain(last).collect();
    if parts.is_empty() {
        return NO_PROMPT_PLACEHOLDER.into();
    }
    let single_line = parts
        .join(" | ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    match max_chars {
        Some(max) if single_line.chars().count() > max => {
            let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
            format!("{kept}...")
        }
        _ => single_line,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub include_header: bool,
    pub token_column: bool,
    pub session_id_column: bool,
    pub repo_column: bool,
    /// Align columns with fixed widths (CLI output).
    pub pad: bool,
    pub max_chars: Option<usize>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            include_header: true,
            token_column: true,
            session_id_column: false,
            repo_column: false,
            pad: false,
            max_chars: Some(DEFAULT_MAX_CONVERSATION_CHARS),
        }
    }
}

const UPDATED_WIDTH: usize = 15;
const TOKEN_WIDTH: usize = 9;
const SESSION_WIDTH: usize = 38;
const REPO_WIDTH: usize = 14;

pub fn format_sessions_list(
    entries: &[SessionListing],
    options: &FormatOptions,
    now_ms: i64,
) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 1);

    if options.include_header {
        lines.push(header(options));
    }

    for entry in entries {
        let updated = format_relative_time(entry.last_access_ms, now_ms);
        let conversation = format_conversation(&entry.conversation, options.max_chars);
        if !options.token_column {
            lines.push(format!("{updated} {conversation}"));
            continue;
        }

        let mut row = Vec::new();
        if options.pad {
            row.push(format!("{updated:<UPDATED_WIDTH$}"));
            row.push(format!("{:<TOKEN_WIDTH$}", entry.token.as_str()));
            if options.session_id_column {
                row.push(format!("{:<SESSION_WIDTH$}", entry.session_id));
            }
            if options.repo_column {
                row.push(format!("{:<REPO_WIDTH$}", entry.repo_name));
            }
        } else {
            row.push(updated);
            row.push(entry.token.to_string());
            if options.session_id_column {
                row.push(entry.session_id.clone());
            }
            if options.repo_column {
                row.push(entry.repo_name.clone());
            }
        }
        row.push(conversation);
        lines.push(row.join(" "));
    }

    lines.join("\n")
}

fn header(options: &FormatOptions) -> String {
    if !options.token_column {
        return "Updated Conversation".into();
    }
    let mut cols = Vec::new();
    if options.pad {
        cols.push(format!("{:<UPDATED_WIDTH$}", "Updated"));
        cols.push(format!("{:<TOKEN_WIDTH$}", "Token"));
        if options.session_id_column {
            cols.push(format!("{:<SESSION_WIDTH$}", "Session"));
        }
        if options.repo_column {
            cols.push(format!("{:<REPO_WIDTH$}", "Repo"));
        }
    } else {
        cols.push("Updated".into());
        cols.push("Token".into());
        if options.session_id_column {
            cols.push("Session".into());
        }
        if options.repo_column {
            cols.push("Repo".into());
        }
    }
    cols.push("Conversation".into());
    cols.join(" ")
}
