//! Gitignore-style pattern matching for file reservation conflicts.
//!
//! Patterns support `**`, `*`, `?` and an optional leading `/`, resolved
//! relative to the project root. Compiled patterns are cached by pattern
//! string: conflict checks run on every send, and recompiling the same
//! glob for each inbox path would dominate the gate's cost.

use glob::{MatchOptions, Pattern};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::RwLock;

lazy_static! {
    static ref PATTERN_CACHE: RwLock<HashMap<String, Option<Pattern>>> =
        RwLock::new(HashMap::new());
}

fn match_options(case_insensitive: bool) -> MatchOptions {
    MatchOptions {
        case_sensitive: !case_insensitive,
        // `*` must not cross directory separators; `**` does.
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Normalize a reservation pattern: strip the leading `/` (patterns are
/// project-root-relative) and any `./` prefix.
fn normalize(pattern: &str) -> &str {
    pattern
        .trim_start_matches("./")
        .trim_start_matches('/')
}

/// Fetch (or compile and cache) the glob for a pattern string.
///
/// Invalid globs cache as `None` so a malformed pattern is reported once
/// and never recompiled.
fn compiled(pattern: &str) -> Option<Pattern> {
    let normalized = normalize(pattern);
    {
        let cache = PATTERN_CACHE
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(cached) = cache.get(normalized) {
            return cached.clone();
        }
    }

    let parsed = Pattern::new(normalized).ok();
    if parsed.is_none() {
        tracing::warn!(pattern = normalized, "unparseable reservation pattern");
    }
    let mut cache = PATTERN_CACHE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    cache.insert(normalized.to_string(), parsed.clone());
    parsed
}

/// Whether `pattern` matches the concrete path `path`.
pub fn pattern_matches_path(pattern: &str, path: &str, case_insensitive: bool) -> bool {
    let path = normalize(path);
    if normalize(pattern) == path {
        return true;
    }
    compiled(pattern)
        .map(|p| p.matches_with(path, match_options(case_insensitive)))
        .unwrap_or(false)
}

/// Whether two patterns could match overlapping files.
///
/// Uses a two-sided match (each pattern against the other taken as a
/// literal path) plus a common-prefix check for the glob-vs-glob case
/// where neither side is literal.
pub fn patterns_overlap(pattern_a: &str, pattern_b: &str, case_insensitive: bool) -> bool {
    let a = normalize(pattern_a);
    let b = normalize(pattern_b);

    if a == b {
        return true;
    }

    if pattern_matches_path(a, b, case_insensitive) {
        return true;
    }
    if pattern_matches_path(b, a, case_insensitive) {
        return true;
    }

    patterns_have_common_prefix(a, b)
}

/// Check if two patterns share a common directory prefix before wildcards.
///
/// Catches glob-vs-glob cases like `src/**/*.rs` vs `src/api/**` where
/// neither pattern matches the other as a literal.
fn patterns_have_common_prefix(a: &str, b: &str) -> bool {
    let a_parts: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b_parts: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();

    let mut common_prefix_len = 0;
    let mut hit_wildcard = false;

    for (pa, pb) in a_parts.iter().zip(b_parts.iter()) {
        if pa.contains('*') || pb.contains('*') || pa.contains('?') || pb.contains('?') {
            hit_wildcard = true;
            break;
        }
        if pa != pb {
            // Literal segments diverge before any wildcard.
            return false;
        }
        common_prefix_len += 1;
    }

    if common_prefix_len > 0 {
        // Shared literal prefix only signals overlap when at least one
        // side keeps matching past it (a wildcard or a longer tail).
        return hit_wildcard || a_parts.len() != b_parts.len();
    }

    // One or both patterns start with wildcards; they can reach anywhere.
    let a_starts_wild = a_parts.first().is_some_and(|p| p.contains('*'));
    let b_starts_wild = b_parts.first().is_some_and(|p| p.contains('*'));

    a_starts_wild || b_starts_wild
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(patterns_overlap("src/main.rs", "src/main.rs", false));
        assert!(patterns_overlap("Cargo.toml", "Cargo.toml", false));
    }

    #[test]
    fn test_glob_matches_literal() {
        assert!(patterns_overlap("src/**/*.py", "src/auth/login.py", false));
        assert!(patterns_overlap("src/auth/login.py", "src/**/*.py", false));
        assert!(patterns_overlap("src/**", "src/api/auth.rs", false));
        assert!(patterns_overlap("*.rs", "main.rs", false));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        assert!(patterns_overlap("src/auth/*.py", "src/auth/login.py", false));
        assert!(patterns_overlap("src/auth/login.py", "src/auth/*.py", false));
    }

    #[test]
    fn test_overlapping_globs() {
        assert!(patterns_overlap("src/**/*.rs", "src/api/**", false));
        assert!(patterns_overlap("src/api/**", "src/**/*.rs", false));
        assert!(patterns_overlap("src/**", "src/api/**", false));
    }

    #[test]
    fn test_non_overlapping() {
        assert!(!patterns_overlap("src/**", "tests/**", false));
        assert!(!patterns_overlap("docs/**", "src/**", false));
        assert!(!patterns_overlap("src/api/**", "src/auth/**", false));
        assert!(!patterns_overlap("src/main.rs", "src/lib.rs", false));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        assert!(!pattern_matches_path("src/*.py", "src/auth/login.py", false));
        assert!(pattern_matches_path("src/**/*.py", "src/auth/login.py", false));
        assert!(pattern_matches_path("src/*.py", "src/app.py", false));
    }

    #[test]
    fn test_question_mark() {
        assert!(pattern_matches_path("src/app?.py", "src/app1.py", false));
        assert!(!pattern_matches_path("src/app?.py", "src/app12.py", false));
    }

    #[test]
    fn test_leading_slash_normalized() {
        assert!(pattern_matches_path("/src/app.py", "src/app.py", false));
        assert!(patterns_overlap("/src/*.py", "src/app.py", false));
    }

    #[test]
    fn test_case_insensitive_toggle() {
        assert!(!pattern_matches_path("SRC/*.py", "src/app.py", false));
        assert!(pattern_matches_path("SRC/*.py", "src/app.py", true));
    }

    #[test]
    fn test_invalid_pattern_does_not_panic() {
        assert!(!pattern_matches_path("src/[", "src/app.py", false));
        // Exact-equality still works for unparseable patterns.
        assert!(patterns_overlap("src/[", "src/[", false));
    }

    #[test]
    fn test_inbox_surface_pattern() {
        // The send gate checks concrete archive paths against patterns.
        assert!(pattern_matches_path(
            "agents/GreenCastle/inbox/*/*/*.md",
            "agents/GreenCastle/inbox/2026/08/12-blocked.md",
            false
        ));
        assert!(!pattern_matches_path(
            "agents/GreenCastle/inbox/*/*/*.md",
            "agents/BlueLake/inbox/2026/08/12-ok.md",
            false
        ));
    }
}
