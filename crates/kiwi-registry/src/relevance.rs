//! Relevance scoring for registry record search.
//!
//! Registry search runs over record rows (names, descriptions), not full
//! content; the BM25 engine covers local file search. Scoring bands:
//! exact match 100, all terms in the primary text 80, partial primary
//! 60·(matches/terms), all terms in the secondary text 40, partial
//! secondary 20·(matches/terms).

/// Splits a query into normalized terms: lowercased, whitespace-split,
/// single characters dropped.
pub fn parse_search_query(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| w.len() >= 2)
        .collect()
}

/// Scores a record's primary (name/title) and secondary (description)
/// text against query terms. Returns 0–100.
pub fn relevance_score(terms: &[String], primary: &str, secondary: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let primary_lower = primary.to_lowercase();
    let secondary_lower = secondary.to_lowercase();

    // Exact match, tolerating id separators.
    let primary_normalized = primary_lower.replace(['_', '-'], " ");
    let query_joined = terms.join(" ");
    if primary_normalized == query_joined || primary_lower == query_joined.replace(' ', "_") {
        return 100.0;
    }

    let primary_matches = terms.iter().filter(|t| primary_lower.contains(*t)).count();
    let secondary_matches = terms
        .iter()
        .filter(|t| secondary_lower.contains(*t))
        .count();

    let mut score = 0.0f64;
    if primary_matches == terms.len() {
        score = 80.0;
    } else if primary_matches > 0 {
        score = 60.0 * primary_matches as f64 / terms.len() as f64;
    }

    if secondary_matches == terms.len() {
        score = score.max(40.0);
    } else if secondary_matches > 0 {
        score = score.max(20.0 * secondary_matches as f64 / terms.len() as f64);
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(q: &str) -> Vec<String> {
        parse_search_query(q)
    }

    #[test]
    fn test_parse_drops_single_chars() {
        assert_eq!(terms("a Deploy  X tool"), vec!["deploy", "tool"]);
        assert!(terms("").is_empty());
    }

    #[test]
    fn test_exact_match_scores_100() {
        assert_eq!(relevance_score(&terms("hello node"), "hello_node", ""), 100.0);
        assert_eq!(relevance_score(&terms("hello node"), "hello node", ""), 100.0);
    }

    #[test]
    fn test_all_terms_in_primary() {
        assert_eq!(
            relevance_score(&terms("node runtime"), "the_node_runtime_wrapper", ""),
            80.0
        );
    }

    #[test]
    fn test_partial_primary() {
        let score = relevance_score(&terms("node docker"), "node_runtime", "");
        assert_eq!(score, 30.0);
    }

    #[test]
    fn test_secondary_fallback() {
        assert_eq!(
            relevance_score(&terms("deploy staging"), "unrelated", "deploy to staging env"),
            40.0
        );
        assert_eq!(
            relevance_score(&terms("deploy mars"), "unrelated", "deploy to staging"),
            10.0
        );
    }

    #[test]
    fn test_primary_beats_secondary() {
        let primary = relevance_score(&terms("deploy"), "deploy_tool", "");
        let secondary = relevance_score(&terms("deploy"), "other", "handles deploy");
        assert!(primary > secondary);
    }

    #[test]
    fn test_no_match_is_zero() {
        assert_eq!(relevance_score(&terms("quantum"), "deploy_tool", "ships code"), 0.0);
    }
}
