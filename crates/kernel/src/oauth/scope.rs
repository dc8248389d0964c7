//! Scope string handling.
//!
//! Scopes are stored canonicalized: space-separated, insertion order of the
//! request that granted them, duplicates dropped. Comparison is always
//! set-based.

use std::collections::HashSet;

/// Maximum allowed length for scope strings to prevent memory abuse.
const MAX_SCOPE_LENGTH: usize = 1000;

/// Parse a scope string into its tokens, preserving first-seen order.
pub fn parse(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split_whitespace()
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// Canonical serialized form: parsed tokens space-joined.
pub fn canonicalize(raw: &str) -> String {
    parse(raw).join(" ")
}

/// Set-based subset test: every requested token appears in the grant.
pub fn is_subset(requested: &str, granted: &str) -> bool {
    let granted: HashSet<&str> = granted.split_whitespace().collect();
    requested.split_whitespace().all(|s| granted.contains(s))
}

/// Validate that a scope string contains only safe characters and is bounded
/// in length.
///
/// Scope tokens are defined in RFC 6749 §3.3 as: `%x21 / %x23-5B / %x5D-7E`
/// (printable ASCII except `"` and `\`, separated by spaces).
pub fn is_valid(scope: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    if scope.len() > MAX_SCOPE_LENGTH {
        return false;
    }
    scope
        .bytes()
        .all(|b| b == 0x20 || b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}
