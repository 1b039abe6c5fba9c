//! Minimal shell-style glob matching (`*` and `?`) for `cleanup`'s table
//! name pattern, equivalent to Python's `fnmatch.filter` over a single
//! path segment.

pub fn matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    match_from(&pattern, &candidate)
}

fn match_from(pattern: &[char], candidate: &[char]) -> bool {
    match pattern.first() {
        None => candidate.is_empty(),
        Some('*') => {
            match_from(&pattern[1..], candidate)
                || (!candidate.is_empty() && match_from(pattern, &candidate[1..]))
        }
        Some('?') => !candidate.is_empty() && match_from(&pattern[1..], &candidate[1..]),
        Some(c) => candidate.first() == Some(c) && match_from(&pattern[1..], &candidate[1..]),
    }
}
