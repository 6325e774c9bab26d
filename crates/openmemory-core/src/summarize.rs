//! Extractive summarization for cold-memory fingerprints
//!
//! Summary generation is a pure function with a max-length contract. The
//! default implementation keeps lead sentences and appends the dominant
//! keywords when the lead alone would waste the budget.

use std::collections::HashMap;

/// Words too common to be worth keeping in a keyword tail.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "to",
    "of", "in", "on", "for", "with", "at", "by", "from", "as", "it", "this",
    "that", "be", "has", "have", "had", "not", "its", "their", "they", "we",
];

/// Produce a summary of at most `max_len` characters.
///
/// Lead sentences are kept whole while they fit; remaining budget gets a
/// keyword tail ordered by frequency. Always returns a non-empty string for
/// non-empty input.
pub fn summarize(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if max_len == 0 || text.is_empty() {
        return String::new();
    }
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let mut out = String::new();
    for sentence in split_sentences(text) {
        let candidate_len = out.chars().count() + sentence.chars().count() + 1;
        if candidate_len > max_len {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(sentence);
    }

    // Lead didn't fit at all: hard-truncate the first sentence
    if out.is_empty() {
        out = text.chars().take(max_len).collect();
        return out;
    }

    // Spend leftover budget on a keyword tail
    let remaining = max_len.saturating_sub(out.chars().count());
    if remaining > 8 {
        let tail = keyword_tail(text, remaining.saturating_sub(3));
        if !tail.is_empty() {
            out.push_str(" [");
            out.push_str(&tail);
            out.push(']');
        }
    }

    // The tail arithmetic is in chars; enforce the contract regardless
    if out.chars().count() > max_len {
        out = out.chars().take(max_len).collect();
    }
    out
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Dominant non-stopword tokens, most frequent first, joined by spaces up to
/// `budget` characters.
fn keyword_tail(text: &str, budget: usize) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 4 && !STOPWORDS.contains(t))
    {
        *counts.entry(token.to_string()).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut tail = String::new();
    for (word, _) in ranked {
        let needed = if tail.is_empty() { word.len() } else { word.len() + 1 };
        if tail.len() + needed > budget {
            break;
        }
        if !tail.is_empty() {
            tail.push(' ');
        }
        tail.push_str(&word);
    }
    tail
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_passes_through() {
        assert_eq!(summarize("short note", 100), "short note");
    }

    #[test]
    fn test_never_exceeds_max_len() {
        let text = "The deployment pipeline failed twice on Tuesday. \
                    The retry logic masked the real certificate error. \
                    Rotating the certificate fixed the pipeline for good."
            .repeat(4);
        for max_len in [10, 40, 80, 200] {
            let s = summarize(&text, max_len);
            assert!(
                s.chars().count() <= max_len,
                "summary of {} chars exceeded {}",
                s.chars().count(),
                max_len
            );
            assert!(!s.is_empty());
        }
    }

    #[test]
    fn test_keeps_lead_sentence() {
        let text = "Rotating the certificate fixed the pipeline. \
                    Everything after this sentence is padding that will not fit \
                    in the summary budget because it rambles on and on and on.";
        let s = summarize(text, 60);
        assert!(s.starts_with("Rotating the certificate fixed the pipeline."));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(summarize("", 50), "");
        assert_eq!(summarize("anything", 0), "");
    }

    #[test]
    fn test_keyword_tail_prefers_frequent_words() {
        let tail = keyword_tail(
            "certificate certificate certificate pipeline pipeline deploy",
            40,
        );
        assert!(tail.starts_with("certificate"));
        assert!(tail.contains("pipeline"));
    }
}
