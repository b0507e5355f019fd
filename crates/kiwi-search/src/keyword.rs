//! BM25 keyword search engine.
//!
//! Scoring sums per-field BM25 contributions weighted by the applicable
//! field weight; an exact substring match of the raw query in any raw
//! field multiplies the total by 1.5. IDF values are recomputed for the
//! affected terms after every `index_document`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Term frequency saturation.
pub const BM25_K1: f64 = 1.5;
/// Document length normalization.
pub const BM25_B: f64 = 0.75;

/// Phrase-match score multiplier.
const PHRASE_BONUS: f64 = 1.5;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9_]{2,}").expect("valid regex"));

/// Default field boost weights, overridable per document.
fn default_weight(field: &str) -> f64 {
    match field {
        "title" | "name" => 5.0,
        "description" | "summary" => 2.0,
        "category" | "tags" => 1.5,
        _ => 1.0,
    }
}

/// One scored keyword hit.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub item_id: String,
    pub item_type: String,
    pub score: f64,
    pub title: String,
    pub preview: String,
    pub path: PathBuf,
    pub metadata: Value,
}

struct Document {
    item_type: String,
    /// Per-field token counts.
    fields: HashMap<String, HashMap<String, usize>>,
    raw_fields: HashMap<String, String>,
    length: usize,
    path: PathBuf,
    metadata: Value,
    field_weights: Option<HashMap<String, f64>>,
}

/// In-memory BM25 index over artifact metadata.
///
/// # Example
///
/// ```rust
/// use kiwi_search::KeywordSearchEngine;
/// use std::collections::HashMap;
///
/// let mut engine = KeywordSearchEngine::new();
/// engine.index_document(
///     "hello_node",
///     "tool",
///     HashMap::from([("name".to_string(), "hello node".to_string())]),
///     "/tmp/hello_node.py".into(),
///     serde_json::json!({}),
///     None,
/// );
///
/// let hits = engine.search("hello", None, 10, 0.1);
/// assert_eq!(hits[0].item_id, "hello_node");
/// ```
#[derive(Default)]
pub struct KeywordSearchEngine {
    docs: HashMap<String, Document>,
    idf: HashMap<String, f64>,
    avg_doc_length: f64,
}

impl KeywordSearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a document. `field_weights` from an extractor
    /// schema override the default weights for this document only.
    pub fn index_document(
        &mut self,
        item_id: &str,
        item_type: &str,
        fields: HashMap<String, String>,
        path: PathBuf,
        metadata: Value,
        field_weights: Option<HashMap<String, f64>>,
    ) {
        let mut tokenized: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut length = 0usize;

        for (field, content) in &fields {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokenize(content) {
                *counts.entry(token).or_insert(0) += 1;
                length += 1;
            }
            tokenized.insert(field.clone(), counts);
        }

        let affected: Vec<String> = tokenized
            .values()
            .flat_map(|counts| counts.keys().cloned())
            .collect();

        self.docs.insert(
            item_id.to_string(),
            Document {
                item_type: item_type.to_string(),
                fields: tokenized,
                raw_fields: fields,
                length,
                path,
                metadata,
                field_weights,
            },
        );

        self.refresh_idf(&affected);
        self.avg_doc_length =
            self.docs.values().map(|d| d.length).sum::<usize>() as f64 / self.docs.len() as f64;
    }

    /// Removes a document from the index.
    pub fn remove_document(&mut self, item_id: &str) -> bool {
        let removed = self.docs.remove(item_id);
        if let Some(doc) = &removed {
            let affected: Vec<String> = doc
                .fields
                .values()
                .flat_map(|counts| counts.keys().cloned())
                .collect();
            self.refresh_idf(&affected);
            if !self.docs.is_empty() {
                self.avg_doc_length = self.docs.values().map(|d| d.length).sum::<usize>() as f64
                    / self.docs.len() as f64;
            }
        }
        removed.is_some()
    }

    /// Searches the index. Hits below `min_score` are discarded; the rest
    /// sort by descending score, truncated to `limit`.
    pub fn search(
        &self,
        query: &str,
        item_type: Option<&str>,
        limit: usize,
        min_score: f64,
    ) -> Vec<KeywordHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let query_lower = query.to_lowercase();

        let mut hits: Vec<KeywordHit> = self
            .docs
            .iter()
            .filter(|(_, doc)| item_type.map_or(true, |t| doc.item_type == t))
            .filter_map(|(item_id, doc)| {
                let mut score = self.score_document(&query_tokens, doc);
                if has_phrase_match(&query_lower, doc) {
                    score *= PHRASE_BONUS;
                }
                if score < min_score {
                    return None;
                }
                Some(KeywordHit {
                    item_id: item_id.clone(),
                    item_type: doc.item_type.clone(),
                    score,
                    title: doc
                        .raw_fields
                        .get("title")
                        .or_else(|| doc.raw_fields.get("name"))
                        .cloned()
                        .unwrap_or_else(|| item_id.clone()),
                    preview: preview(doc),
                    path: doc.path.clone(),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    /// Drops every document and cache.
    pub fn clear(&mut self) {
        self.docs.clear();
        self.idf.clear();
        self.avg_doc_length = 0.0;
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn score_document(&self, query_tokens: &[String], doc: &Document) -> f64 {
        let mut total = 0.0;
        let doc_length = doc.length as f64;

        for (field, counts) in &doc.fields {
            let weight = doc
                .field_weights
                .as_ref()
                .and_then(|w| w.get(field).copied())
                .unwrap_or_else(|| default_weight(field));

            for token in query_tokens {
                let Some(&tf) = counts.get(token) else {
                    continue;
                };
                let tf = tf as f64;
                let idf = self.idf.get(token).copied().unwrap_or(1.0);

                let numerator = tf * (BM25_K1 + 1.0);
                let denominator = tf
                    + BM25_K1
                        * (1.0 - BM25_B + BM25_B * (doc_length / self.avg_doc_length.max(1.0)));
                total += idf * (numerator / denominator) * weight;
            }
        }
        total
    }

    /// `idf(t) = ln((N − df + 0.5)/(df + 0.5) + 1)`
    fn refresh_idf(&mut self, terms: &[String]) {
        let n = self.docs.len() as f64;
        for term in terms {
            let df = self
                .docs
                .values()
                .filter(|doc| doc.fields.values().any(|counts| counts.contains_key(term)))
                .count() as f64;
            if df == 0.0 {
                self.idf.remove(term);
            } else {
                self.idf
                    .insert(term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln());
            }
        }
    }
}

impl std::fmt::Debug for KeywordSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordSearchEngine")
            .field("documents", &self.docs.len())
            .field("terms", &self.idf.len())
            .finish()
    }
}

/// Lower-cases and keeps `[a-z0-9_]{2,}` runs.
fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn has_phrase_match(query_lower: &str, doc: &Document) -> bool {
    doc.raw_fields
        .values()
        .any(|content| content.to_lowercase().contains(query_lower))
}

fn preview(doc: &Document) -> String {
    let content = doc
        .raw_fields
        .get("description")
        .filter(|s| !s.is_empty())
        .cloned()
        .unwrap_or_else(|| {
            doc.raw_fields
                .get("content")
                .cloned()
                .unwrap_or_default()
        });

    if content.len() > 200 {
        let cut: String = content.chars().take(200).collect();
        format!("{cut}...")
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index(engine: &mut KeywordSearchEngine, id: &str, title: &str, description: &str) {
        engine.index_document(
            id,
            "tool",
            HashMap::from([
                ("title".to_string(), title.to_string()),
                ("description".to_string(), description.to_string()),
            ]),
            format!("/tmp/{id}.py").into(),
            json!({}),
            None,
        );
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World_2!"), vec!["hello", "world_2"]);
        // Single characters drop out.
        assert_eq!(tokenize("a b cd"), vec!["cd"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_basic_ranking() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc1", "Python Testing", "unit tests in python");
        index(&mut engine, "doc2", "Rust Basics", "memory safety");

        let hits = engine.search("python", None, 10, 0.1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "doc1");
    }

    #[test]
    fn test_phrase_bonus_orders_exact_title_first() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc1", "Python Testing", "");
        index(&mut engine, "doc2", "Testing Python Framework", "");

        let hits = engine.search("python testing", None, 10, 0.0);
        assert_eq!(hits.len(), 2);
        // doc1 carries the exact phrase, so the 1.5x bonus puts it first.
        assert_eq!(hits[0].item_id, "doc1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_title_weight_beats_description() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "in_title", "deployment guide", "other things");
        index(&mut engine, "in_desc", "other title", "mentions deployment once");

        let hits = engine.search("deployment", None, 10, 0.0);
        assert_eq!(hits[0].item_id, "in_title");
    }

    #[test]
    fn test_type_filter() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "tool_doc", "shared term", "");
        engine.index_document(
            "knowledge_doc",
            "knowledge",
            HashMap::from([("title".to_string(), "shared term".to_string())]),
            "/tmp/k.md".into(),
            json!({}),
            None,
        );

        let hits = engine.search("shared", Some("knowledge"), 10, 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "knowledge_doc");
    }

    #[test]
    fn test_min_score_and_limit() {
        let mut engine = KeywordSearchEngine::new();
        for i in 0..10 {
            index(&mut engine, &format!("doc{i}"), "common topic", "");
        }
        let hits = engine.search("common", None, 3, 0.0);
        assert_eq!(hits.len(), 3);

        let none = engine.search("common", None, 10, f64::MAX);
        assert!(none.is_empty());
    }

    #[test]
    fn test_per_document_weight_override() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "normal", "keyword here", "");
        engine.index_document(
            "boosted",
            "tool",
            HashMap::from([("title".to_string(), "keyword here".to_string())]),
            "/tmp/b.py".into(),
            json!({}),
            Some(HashMap::from([("title".to_string(), 50.0)])),
        );

        let hits = engine.search("keyword", None, 10, 0.0);
        assert_eq!(hits[0].item_id, "boosted");
    }

    #[test]
    fn test_idf_favors_rare_terms() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc1", "alpha rare_term", "");
        index(&mut engine, "doc2", "alpha common", "");
        index(&mut engine, "doc3", "alpha common", "");

        // The rare term contributes more than the ubiquitous one.
        let rare = engine.search("rare_term", None, 10, 0.0);
        let common = engine.search("alpha", None, 10, 0.0);
        assert!(rare[0].score > common[0].score);
    }

    #[test]
    fn test_preview_truncation() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "long", "title term", &"word ".repeat(100));
        let hits = engine.search("term", None, 10, 0.0);
        assert!(hits[0].preview.ends_with("..."));
        assert!(hits[0].preview.len() <= 203);
    }

    #[test]
    fn test_empty_query() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc", "anything", "");
        assert!(engine.search("", None, 10, 0.0).is_empty());
        assert!(engine.search("!!", None, 10, 0.0).is_empty());
    }

    #[test]
    fn test_clear_and_remove() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc1", "topic", "");
        index(&mut engine, "doc2", "topic", "");
        assert_eq!(engine.len(), 2);

        assert!(engine.remove_document("doc1"));
        assert_eq!(engine.search("topic", None, 10, 0.0).len(), 1);

        engine.clear();
        assert!(engine.is_empty());
        assert!(engine.search("topic", None, 10, 0.0).is_empty());
    }

    #[test]
    fn test_reindex_replaces_document() {
        let mut engine = KeywordSearchEngine::new();
        index(&mut engine, "doc", "old topic", "");
        index(&mut engine, "doc", "new subject", "");

        assert!(engine.search("old", None, 10, 0.0).is_empty());
        assert_eq!(engine.search("subject", None, 10, 0.0).len(), 1);
        assert_eq!(engine.len(), 1);
    }
}
