//! Slash-separated path helpers.
//!
//! Backend paths are plain UTF-8 strings separated by `/`, independent of
//! the host's path flavor. These helpers are purely lexical; they never
//! touch a filesystem.

/// The path separator used by every backend.
pub const SEPARATOR: char = '/';

/// Lexically simplify `path`.
///
/// Collapses repeated separators, eliminates `.` components, and resolves
/// `..` components against their parent where possible. A rooted path stays
/// rooted and `..` cannot climb above the root. The empty path cleans to
/// `"."`.
#[must_use]
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }
    let rooted = path.starts_with(SEPARATOR);
    let mut kept: Vec<&str> = Vec::new();
    for comp in path.split(SEPARATOR) {
        match comp {
            "" | "." => {}
            ".." => {
                if kept.last().is_some_and(|last| *last != "..") {
                    kept.pop();
                } else if !rooted {
                    kept.push("..");
                }
            }
            name => kept.push(name),
        }
    }
    let joined = kept.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_owned(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// Split `path` immediately after its final separator.
///
/// Returns `(dir, file)` where `dir` keeps its trailing separator and
/// `file` contains no separator. If there is no separator, `dir` is empty.
#[must_use]
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(idx) => path.split_at(idx + 1),
        None => ("", path),
    }
}

/// The last element of `path`, with trailing separators removed.
///
/// The empty path yields `"."`; a path of only separators yields `"/"`.
#[must_use]
pub fn base(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Everything but the last element of `path`, cleaned.
#[must_use]
pub fn dir(path: &str) -> String {
    let (head, _) = split(path);
    clean(head)
}

/// Join two path elements with a separator and clean the result.
///
/// Empty elements are ignored; joining two empty elements yields the empty
/// string.
#[must_use]
pub fn join(lhs: &str, rhs: &str) -> String {
    let parts: Vec<&str> = [lhs, rhs].into_iter().filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return String::new();
    }
    clean(&parts.join("/"))
}
