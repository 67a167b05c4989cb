//! Near-miss detection for common agent input mistakes.

use strsim::levenshtein;

/// Find similar strings using Levenshtein distance
pub fn suggest_similar<'a>(
    input: &str,
    candidates: &'a [&str],
    max_distance: usize,
) -> Vec<&'a str> {
    let mut matches: Vec<_> = candidates
        .iter()
        .map(|c| (*c, levenshtein(input, c)))
        .filter(|(_, d)| *d <= max_distance)
        .collect();

    matches.sort_by_key(|(_, d)| *d);
    matches.into_iter().map(|(c, _)| c).take(3).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similar_suggestions() {
        let candidates = &["BlueLake", "GreenCastle", "JadePond"];
        let similar = suggest_similar("BlueLaek", candidates, 3);
        assert_eq!(similar.first(), Some(&"BlueLake"));
    }

    #[test]
    fn test_no_suggestions_when_distant() {
        let candidates = &["BlueLake", "GreenCastle"];
        let similar = suggest_similar("zzzzzzzz", candidates, 3);
        assert!(similar.is_empty());
    }
}
