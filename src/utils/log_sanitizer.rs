// ============================================================================
// Log Sanitization
// ============================================================================
//
// File names, invoice numbers and provider names arrive from spreadsheets
// and the SharePoint list. They pass through `sanitize_for_log` before being
// written to the logs so a crafted cell cannot forge log lines or inject
// terminal escape codes.
//
// ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest value written to the logs, in characters.
const MAX_LOG_LENGTH: usize = 200;

static ANSI_ESCAPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap()
});

/// Strips escape sequences and control characters, flattens line breaks and
/// truncates to `MAX_LOG_LENGTH` characters.
pub fn sanitize_for_log(input: &str) -> String {
    let no_ansi = ANSI_ESCAPE_REGEX.replace_all(input, "");

    let cleaned: String = no_ansi
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    if cleaned.chars().count() > MAX_LOG_LENGTH {
        let truncated: String = cleaned.chars().take(MAX_LOG_LENGTH).collect();
        format!("{}...", truncated)
    } else {
        cleaned
    }
}
