//! Substring-based exclusion of source paths.
//!
//! A path is excluded when it contains any pattern verbatim. There is no glob
//! support and no anchoring to path segments, so `tmp` also excludes
//! `tmpfile.txt`. Patterns are tried in order and the first hit is reported.

/// Returns the first pattern contained in `path`, if any.
pub fn is_excluded<'a, S: AsRef<str>>(path: &str, patterns: &'a [S]) -> Option<&'a str> {
    patterns
        .iter()
        .map(|pattern| pattern.as_ref())
        .find(|pattern| path.contains(*pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_patterns_never_excludes() {
        let patterns: [&str; 0] = [];
        assert_eq!(is_excluded("src/main.rs", &patterns), None);
    }

    #[test]
    fn first_matching_pattern_wins() {
        let patterns = ["target", "main", "src"];
        assert_eq!(is_excluded("src/main.rs", &patterns), Some("main"));
    }

    #[test]
    fn matching_is_plain_substring_not_segment_aware() {
        let patterns = vec!["tmp".to_string()];
        assert_eq!(is_excluded("build/tmpfile.txt", &patterns), Some("tmp"));
        assert_eq!(is_excluded("build/out.txt", &patterns), None);
    }

    #[test]
    fn agrees_with_contains_for_every_pattern_set() {
        let paths = ["a/b/c.txt", "README.md", "", "x.tmp"];
        let pattern_sets: [&[&str]; 4] = [&["b"], &["zz", "md"], &["", "a"], &["c.txt", "a/"]];
        for path in paths {
            for patterns in pattern_sets {
                let expected = patterns.iter().copied().find(|p| path.contains(p));
                assert_eq!(is_excluded(path, patterns), expected, "{path} {patterns:?}");
            }
        }
    }
}
