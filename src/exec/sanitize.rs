//! Quoting and filtering helpers
//!
//! Provides escaping for values spliced into POSIX shell and PowerShell
//! scripts, plus the user-list filter shared by validation and rendering.

/// Escapes a string for safe use in single-quoted shell contexts.
///
/// Replaces single quotes with `'"'"'`: end the quote, add a literal quote
/// inside double quotes, start a new single-quoted string.
///
/// # Examples
///
/// ```
/// use ssh_provision::exec::sanitize::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Wraps a value in single quotes for a POSIX shell
///
/// ```
/// use ssh_provision::exec::sanitize::shell_quote;
///
/// assert_eq!(shell_quote("/srv/my dir"), "'/srv/my dir'");
/// ```
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", escape_for_shell(s))
}

/// Wraps a value in a PowerShell single-quoted (verbatim) string
///
/// ```
/// use ssh_provision::exec::sanitize::powershell_quote;
///
/// assert_eq!(powershell_quote("C:\\work's"), "'C:\\work''s'");
/// ```
pub fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Drops empty and whitespace-only entries, trimming the rest, preserving order
pub fn filter_users(users: &[String]) -> Vec<&str> {
    users
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect()
}
