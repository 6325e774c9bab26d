//! Hybrid relevance scoring
//!
//! score = w_vec*cos + w_kw*keyword_boost + w_bm25*bm25 + w_sal*salience_now
//!       + w_rec*recency
//!
//! BM25 document frequency comes from the candidate set while the document
//! count and average length come from engine-wide corpus statistics, so the
//! metadata schema needs no per-term table.

use std::collections::{HashMap, HashSet};

use crate::config::ScoreWeights;
use crate::store::CorpusStats;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keyword boost: fraction of qualifying query tokens present in the
/// content, scaled by the configured boost.
pub fn keyword_boost(
    query_tokens: &[String],
    content_tokens: &HashSet<String>,
    min_token_len: usize,
    boost: f64,
) -> f64 {
    let qualifying: Vec<&String> = query_tokens
        .iter()
        .filter(|t| t.len() >= min_token_len)
        .collect();
    if qualifying.is_empty() {
        return 0.0;
    }
    let present = qualifying
        .iter()
        .filter(|t| content_tokens.contains(t.as_str()))
        .count();
    present as f64 * boost / qualifying.len() as f64
}

/// Per-candidate document frequencies for the query terms.
pub fn document_frequencies(
    query_tokens: &[String],
    candidate_token_sets: &[HashSet<String>],
) -> HashMap<String, usize> {
    let mut df: HashMap<String, usize> = HashMap::new();
    for term in query_tokens {
        let count = candidate_token_sets
            .iter()
            .filter(|set| set.contains(term))
            .count();
        df.insert(term.clone(), count);
    }
    df
}

/// Normalized BM25 in [0, 1).
///
/// Each term's contribution is divided by its saturation ceiling
/// `idf * (k1 + 1)`, so the sum over terms normalizes to the term count.
pub fn bm25(
    query_tokens: &[String],
    content_tokens: &[String],
    df: &HashMap<String, usize>,
    corpus: CorpusStats,
) -> f64 {
    if query_tokens.is_empty() || content_tokens.is_empty() {
        return 0.0;
    }
    let n = corpus.doc_count.max(1) as f64;
    let avg_len = corpus.avg_doc_tokens.max(1.0);
    let doc_len = content_tokens.len() as f64;

    let mut tf: HashMap<&str, f64> = HashMap::new();
    for token in content_tokens {
        *tf.entry(token.as_str()).or_default() += 1.0;
    }

    let mut score = 0.0;
    let mut idf_ceiling = 0.0;
    for term in query_tokens {
        let term_df = df.get(term).copied().unwrap_or(0) as f64;
        let idf = (1.0 + (n - term_df + 0.5) / (term_df + 0.5)).ln();
        idf_ceiling += idf;
        let term_tf = tf.get(term.as_str()).copied().unwrap_or(0.0);
        if term_tf == 0.0 {
            continue;
        }
        let denom = term_tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len);
        score += idf * term_tf * (BM25_K1 + 1.0) / denom;
    }
    if idf_ceiling <= 0.0 {
        return 0.0;
    }
    (score / (idf_ceiling * (BM25_K1 + 1.0))).clamp(0.0, 1.0)
}

/// Components of one candidate's hybrid score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreParts {
    pub cosine: f64,
    pub keyword: f64,
    pub bm25: f64,
    pub salience: f64,
    pub recency: f64,
}

/// Weighted combination. Weights sum to 1, so the result stays in [0, 1]
/// for in-range components.
pub fn hybrid_score(parts: ScoreParts, weights: &ScoreWeights) -> f64 {
    weights.w_vec * parts.cosine.max(0.0)
        + weights.w_kw * parts.keyword
        + weights.w_bm25 * parts.bm25
        + weights.w_sal * parts.salience
        + weights.w_rec * parts.recency
}

// ============================================================================
// TESTS
// ============================================================================
