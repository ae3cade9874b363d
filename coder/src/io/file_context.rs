//! Loads hinted repository files as prompt context for diff generation.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

use serde::Serialize;
use tracing::debug;

const TRUNCATION_MARKER: &str = "...\n[truncated]";

/// A repository file included in a generation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnippet {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
}

/// Read each hinted file under `root`.
///
/// Paths are deduplicated in first-seen order. Missing or unreadable files and
/// paths escaping the root are skipped. Content longer than `max_chars` is cut
/// and marked as truncated.
pub fn load_file_context<'a>(
    root: &Path,
    hints: impl IntoIterator<Item = &'a str>,
    max_chars: usize,
) -> Vec<FileSnippet> {
    let mut seen = HashSet::new();
    let mut snippets = Vec::new();
    for hint in hints {
        let Some(relative) = normalize_hint(hint) else {
            debug!(hint, "skipping unusable context path");
            continue;
        };
        if !seen.insert(relative.clone()) {
            continue;
        }
        let content = match fs::read_to_string(root.join(&relative)) {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %relative, error = %err, "context file not readable; skipping");
                continue;
            }
        };
        snippets.push(FileSnippet {
            path: relative,
            content: truncate_chars(&content, max_chars),
        });
    }
    snippets
}

fn normalize_hint(hint: &str) -> Option<String> {
    let trimmed = hint.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unified = trimmed.replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Cut `text` to at most `max_chars` characters, appending a marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
    }
}
