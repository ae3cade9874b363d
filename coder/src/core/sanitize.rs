//! Text normalization for commit messages and artifact labels.

use std::sync::LazyLock;

use regex::Regex;

/// Longest commit subject kept verbatim.
pub const MAX_SUBJECT_CHARS: usize = 72;
/// Used when the supplied message has no usable first line.
pub const FALLBACK_COMMIT_MESSAGE: &str = "task: automated change";

static UNSAFE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

/// Reduce `message` to a single trimmed line of at most [`MAX_SUBJECT_CHARS`] characters.
///
/// Longer subjects are cut and end with `...`.
pub fn sanitize_commit_message(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return FALLBACK_COMMIT_MESSAGE.to_string();
    }
    if first_line.chars().count() <= MAX_SUBJECT_CHARS {
        return first_line.to_string();
    }
    let mut subject: String = first_line.chars().take(MAX_SUBJECT_CHARS - 3).collect();
    subject.push_str("...");
    subject
}

/// Map an artifact label onto `[A-Za-z0-9._-]`, collapsing other runs to `_`.
///
/// Empty and dot-only results become `artifact`.
pub fn sanitize_label(label: &str) -> String {
    let replaced = UNSAFE_LABEL_RE.replace_all(label, "_");
    let trimmed = replaced.trim_matches('_');
    // `.` and `..` would escape the artifact directory.
    if trimmed.chars().all(|c| c == '.') {
        return "artifact".to_string();
    }
    trimmed.to_string()
}
