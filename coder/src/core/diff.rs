//! Structural validation of unified diffs.

use std::sync::LazyLock;

use regex::Regex;

static GIT_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^diff --git a/\S+ b/\S+").expect("valid regex"));
static FILE_HEADERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--- \S[^\n]*\r?\n\+\+\+ \S").expect("valid regex"));
static HUNK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^@@ [^\n]*@@").expect("valid regex"));

/// Explanation appended to the goal when asking the generator to try again.
pub const INVALID_DIFF_REASON: &str = "Model returned a patch that is not a valid unified diff.";

/// True if `diff` has a file header (`diff --git` or paired `---`/`+++`) and at least one hunk.
pub fn is_unified_diff(diff: &str) -> bool {
    let trimmed = diff.trim();
    if trimmed.is_empty() {
        return false;
    }
    let has_header = GIT_HEADER_RE.is_match(trimmed) || FILE_HEADERS_RE.is_match(trimmed);
    has_header && HUNK_RE.is_match(trimmed)
}

/// Goal text for the single regeneration attempt after an invalid diff.
pub fn regeneration_goal(goal: &str) -> String {
    format!(
        "{}. Previous attempt failed because: {INVALID_DIFF_REASON} Produce a valid unified diff for the target files.",
        goal.trim_end_matches('.')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_DIFF: &str = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-hi\n+hello\n";
    const PLAIN_DIFF: &str = "--- a/notes.txt\n+++ b/notes.txt\n@@ -1,2 +1,3 @@\n a\n+b\n c\n";

    #[test]
    fn accepts_git_and_plain_unified_diffs() {
        assert!(is_unified_diff(GIT_DIFF));
        assert!(is_unified_diff(PLAIN_DIFF));
    }

    #[test]
    fn accepts_new_file_from_dev_null() {
        let diff = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+new\n";
        assert!(is_unified_diff(diff));
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(!is_unified_diff(""));
        assert!(!is_unified_diff("  \n\t\n"));
    }

    #[test]
    fn rejects_header_without_hunk() {
        let diff = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n-hi\n+hello\n";
        assert!(!is_unified_diff(diff));
    }

    #[test]
    fn rejects_hunk_without_header() {
        assert!(!is_unified_diff("@@ -1 +1 @@\n-hi\n+hello\n"));
    }

    #[test]
    fn rejects_unpaired_file_headers() {
        let diff = "--- a/notes.txt\nsomething else\n+++ b/notes.txt\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(!is_unified_diff(diff));
    }

    #[test]
    fn rejects_prose() {
        assert!(!is_unified_diff("Sure! Here is the change you asked for."));
    }

    #[test]
    fn regeneration_goal_carries_failure_reason() {
        let goal = regeneration_goal("Update the README.");
        assert!(goal.starts_with("Update the README. Previous attempt failed"));
        assert!(goal.contains(INVALID_DIFF_REASON));
    }
}
