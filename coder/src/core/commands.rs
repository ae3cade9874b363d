//! Command-line synthesis and allow-list checks for shell and test steps.

/// Leading executable token of a shell command line.
pub fn leading_executable(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

/// True if `command` may run under `allow`.
///
/// An empty allow-list permits everything.
pub fn is_allowed(command: &str, allow: &[String]) -> bool {
    if allow.is_empty() {
        return true;
    }
    let binary = leading_executable(command);
    allow.iter().any(|entry| entry == binary)
}

/// Command line for a named test framework. Unknown names fall back to `npm test`.
pub fn test_command(framework: Option<&str>, args: &[String]) -> String {
    let base: &[&str] = match framework {
        Some("vitest") => &["npx", "vitest", "run"],
        Some("jest") => &["npx", "jest"],
        Some("pytest") => &["pytest"],
        Some("go") => &["go", "test"],
        Some("cargo") => &["cargo", "test"],
        _ => &["npm", "test"],
    };
    base.iter()
        .copied()
        .chain(args.iter().map(String::as_str))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
