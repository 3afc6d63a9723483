// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::LazyLock;

use regex::Regex;

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static RELATIVE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\./\S+").expect("valid regex"));
static SOURCE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/\S+\.(php|json|sql|log|rs)\b").expect("valid regex")
});

/// Trims and strips markup tags. Used for values that are compared against
/// each other, such as category names.
pub fn strip_tags(input: &str) -> String {
    TAGS.replace_all(input.trim(), "").trim().to_string()
}

/// Trims, strips markup tags and HTML-escapes user supplied text.
pub fn sanitize_input(input: &str) -> String {
    let stripped = strip_tags(input);
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Removes anything resembling a filesystem path from a client-facing error.
pub fn sanitize_error_message(message: &str) -> String {
    let message = RELATIVE_PATH.replace_all(message, "[path removed]");
    SOURCE_FILE.replace_all(&message, "[file removed]").into_owned()
}
