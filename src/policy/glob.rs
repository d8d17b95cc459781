//! Anchored single-token wildcard matching.
//!
//! `*` matches any run of characters (including none). Every other
//! character, `?` included, matches itself. Patterns are split on `*` and
//! the segments are located left to right, which keeps matching linear in
//! the number of segments regardless of how many wildcards appear.

/// The pattern used when a selector field is left unset.
pub const MATCH_ALL: &str = "*";

/// Check whether `value` matches `pattern` in full.
#[must_use]
pub fn matches(pattern: &str, value: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == value;
    };

    let Some(remaining) = value.strip_prefix(head) else {
        return false;
    };

    // `rest` holds every segment after the first wildcard; its last segment
    // must anchor to the end of the value.
    let (middle, tail) = rest.rsplit_once('*').unwrap_or(("", rest));
    let Some(mut remaining) = remaining.strip_suffix(tail) else {
        return false;
    };

    for segment in middle.split('*').filter(|s| !s.is_empty()) {
        match remaining.find(segment) {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
    }
    true
}

/// Match against an optional pattern, treating `None` as [`MATCH_ALL`].
#[must_use]
pub fn matches_or_all(pattern: Option<&str>, value: &str) -> bool {
    matches(pattern.unwrap_or(MATCH_ALL), value)
}
